//! Event callback type shared by the queue engine, pipeline and monitor.

use std::fmt;

/// The six event kinds a running streamer can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started,
    Stopped,
    /// `(from, to)` sequence indices.
    SwitchedAtBoundary(i32, i32),
    /// Index that was just appended to the pending queue.
    QueuedNext(i32),
    ClearedQueue,
    Error(String),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
            Event::SwitchedAtBoundary(from, to) => {
                write!(f, "switched_at_boundary({from},{to})")
            }
            Event::QueuedNext(idx) => write!(f, "queued_next({idx})"),
            Event::ClearedQueue => write!(f, "cleared_queue"),
            Event::Error(msg) => write!(f, "error({msg})"),
        }
    }
}

/// Receives events on whatever thread produced them. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: logs every event at `info!` (or `error!` for faults).
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match &event {
            Event::Error(msg) => log::error!("{msg}"),
            _ => log::info!("{event}"),
        }
    }
}
