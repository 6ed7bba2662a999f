//! Outbound notification stream emitted by the PostProcessor (§6).

use crate::command::PropertyValue;
use crate::path::Path;

#[derive(Debug, Clone)]
pub enum Notification {
    /// Object created or fully described.
    Put { path: Path, properties: Vec<(String, PropertyValue)> },
    /// Property diff.
    Delta { path: Path, removed: Vec<String>, added: Vec<(String, PropertyValue)> },
    /// Wiring change: a connection was made.
    Connect { src: Path, dst: Path },
    /// Wiring change: a connection was broken.
    Disconnect { src: Path, dst: Path },
    /// Object removed.
    Delete { path: Path },
    /// Rename.
    Move { old: Path, new: Path },
    /// Sample-accurate event at a port, opt-in by property.
    Activity { path: Path, value: f64 },
    /// Asynchronous error tied to a request id.
    Error { request_id: u64, message: String },
}
