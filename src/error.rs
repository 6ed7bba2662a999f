use std::fmt;

use crate::path::Path;

/// The closed set of status codes an event's `prepare()` may fail with
/// (error handling design §7). Every failure here completes the event
/// locally: it never reaches the `EventQueue`.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    NotFound(Path),
    Exists(Path),
    BadPath(String),
    BadPoly { requested: usize, reason: &'static str },
    TypeMismatch { expected: &'static str, found: &'static str },
    ParentDiffers { a: Path, b: Path },
    CycleDetected,
    QueueFull,
    PluginUnavailable(String),
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotFound(p) => write!(f, "no object at path {}", p),
            EngineError::Exists(p) => write!(f, "an object already exists at path {}", p),
            EngineError::BadPath(s) => write!(f, "invalid path: {}", s),
            EngineError::BadPoly { requested, reason } => {
                write!(f, "invalid polyphony {}: {}", requested, reason)
            }
            EngineError::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            EngineError::ParentDiffers { a, b } => {
                write!(f, "{} and {} do not share a parent graph", a, b)
            }
            EngineError::CycleDetected => write!(f, "compiling the graph would introduce a cycle"),
            EngineError::QueueFull => write!(f, "event queue is full"),
            EngineError::PluginUnavailable(id) => write!(f, "plugin unavailable: {}", id),
            EngineError::Internal(msg) => write!(f, "internal engine error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
