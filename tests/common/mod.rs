//! Shared end-to-end test harness: activates an `Engine`/`Executor` pair
//! against a `FakeAudioBackend` and drives blocking commands without
//! deadlocking.
//!
//! A blocking `Command` (`CreateGraph`/`CreateBlock`/`CreatePort`/`Move`)
//! only returns from `PreProcessor::prepare` once the `PostProcessor` has
//! drained its ack back through the outbox — which means the thread
//! calling `submit` can never also be the thread calling `drive` for that
//! same command. `run_commands` below submits each command from its own
//! thread while the caller's thread keeps the Executor/PostProcessor
//! turning until every submitting thread reports back.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use audiograph::backend::fake::FakeAudioBackend;
use audiograph::{Command, Engine, EngineSettings, Op, PluginRegistry, Response};
use audiograph_core::test_support::PassThroughFactory;

pub struct Harness {
    pub engine: Engine,
    pub executor: audiograph::Executor,
    pub backend: FakeAudioBackend,
}

pub fn new_harness(sample_rate: u32, block_length: u32, n_in: usize, n_out: usize) -> Harness {
    new_harness_with(sample_rate, block_length, n_in, n_out, |_| {})
}

/// Same as [`new_harness`], but lets a scenario register extra plugin
/// factories (beyond the ever-present `"test.passthrough"`) before the
/// engine activates — a `PluginRegistry` is consumed whole by
/// `Engine::activate`, so there is no way to add to it afterward.
pub fn new_harness_with(
    sample_rate: u32,
    block_length: u32,
    n_in: usize,
    n_out: usize,
    register: impl FnOnce(&mut PluginRegistry),
) -> Harness {
    let mut settings = EngineSettings::default();
    settings.min_frames = 1;
    settings.max_frames = block_length as usize;

    let mut registry = PluginRegistry::new();
    registry.register("test.passthrough", Box::new(PassThroughFactory));
    register(&mut registry);

    let (notify_tx, _notify_rx) = crossbeam_channel::unbounded();
    let host_info = audiograph_core::HostInfo::new("audiograph-tests", "audiograph", "0.1.0");
    let (engine, executor) = Engine::activate(settings, registry, host_info, notify_tx);
    let backend = FakeAudioBackend::new(sample_rate, block_length, n_in, n_out);

    Harness { engine, executor, backend }
}

impl Harness {
    /// Run one period: pull/push the backend's buffers through the
    /// Executor, then drain whatever the Executor finished into
    /// notifications/acks.
    pub fn run_period(&mut self) {
        let nframes = self.backend.block_length() as usize;
        self.executor.run_period(nframes, &mut self.backend);
        self.engine.drive();
    }

    /// Submit a batch of commands, driving periods in the background until
    /// every one of them has a `Response` (§4.9), in submission order.
    /// Non-blocking commands (e.g. `Connect`, `SetPortValue`) return
    /// immediately from `submit`; blocking ones
    /// (`CreateGraph`/`CreateBlock`/`CreatePort`/`Move`) only return once
    /// the Executor has applied them and the PostProcessor has acked them,
    /// which is what makes the dedicated submitting thread below
    /// necessary: this method's own thread is the one turning periods, so
    /// it must never be the one blocked inside `prepare`.
    pub fn run_commands(&mut self, cmds: Vec<Command>) -> Vec<Response> {
        let expected = cmds.len();
        let (tx, rx) = mpsc::channel::<Response>();
        let (pre, post) = self.engine.split_mut();
        let executor = &mut self.executor;
        let backend = &mut self.backend;

        let mut responses = Vec::with_capacity(expected);
        thread::scope(|scope| {
            scope.spawn(move || {
                for cmd in cmds {
                    let resp = pre.prepare(cmd);
                    if tx.send(resp).is_err() {
                        return;
                    }
                }
            });

            while responses.len() < expected {
                let nframes = backend.block_length() as usize;
                executor.run_period(nframes, backend);
                post.run();
                if let Ok(resp) = rx.recv_timeout(Duration::from_millis(5)) {
                    responses.push(resp);
                }
            }
        });

        responses
    }
}
