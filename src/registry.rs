//! Installed-plugin directory, looked up by `CreateBlock`'s `plugin_id`
//! (§4.13). Grounded on the teacher's plugin-host lookup-by-id pattern;
//! scanning/loading binaries themselves is outside this crate's concerns
//! (§1 Non-goals), same as `audiograph_core::plugin`'s own scope note.

use fnv::FnvHashMap;

use audiograph_core::PluginFactory;

/// Maps a plugin's reverse-domain-name id to the factory that instantiates
/// it. Populated by the embedding application before the engine starts;
/// consulted only by the PreProcessor thread's `CreateBlock::prepare`.
#[derive(Default)]
pub struct PluginRegistry {
    factories: FnvHashMap<String, Box<dyn PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, factory: Box<dyn PluginFactory>) {
        self.factories.insert(id.into(), factory);
    }

    pub fn get(&self, id: &str) -> Option<&dyn PluginFactory> {
        self.factories.get(id).map(|f| f.as_ref())
    }
}
