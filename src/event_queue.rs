//! Lock-free SPSC transfer of prepared events (§4.8), and of executed
//! events on their way to the PostProcessor (§4.10). Both hops share this
//! one generic ring: a fixed-capacity `rtrb::RingBuffer` split into a
//! producer/consumer pair, exactly as the teacher wires its audio-sample
//! rings in `engine::audio_thread` — just carrying `TimedEvent`s instead of
//! `f32` samples.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::events::PreparedEvent;

/// A `PreparedEvent` stamped with its delivery metadata (§4.9 step 3).
pub struct TimedEvent {
    pub event: PreparedEvent,
    pub request_id: u64,
    /// Target frame time: `AudioBackend::current_frame() + delivery_margin`
    /// at the moment the PreProcessor pushed it.
    pub scheduled_frame: u64,
    /// Held back until the Executor has executed it and the PostProcessor
    /// has run its `post_process()` (§4.9): `CreateGraph` followed
    /// immediately by a `CreateBlock` inside it is the canonical example.
    pub blocking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
    Empty,
}

pub struct EventProducer {
    inner: Producer<TimedEvent>,
}

impl EventProducer {
    pub fn push(&mut self, event: TimedEvent) -> Result<(), QueueError> {
        self.inner.push(event).map_err(|_| QueueError::Full)
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }
}

pub struct EventConsumer {
    inner: Consumer<TimedEvent>,
}

impl EventConsumer {
    pub fn pop(&mut self) -> Result<TimedEvent, QueueError> {
        self.inner.pop().map_err(|_| QueueError::Empty)
    }

    /// Non-destructively look at the next event's scheduled time, so the
    /// Executor's drain phase (§4.7 step 1) can decide whether it falls
    /// within this period's window before popping it.
    pub fn peek_scheduled_frame(&self) -> Option<u64> {
        self.inner.peek().ok().map(|e| e.scheduled_frame)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Build one SPSC ring of the given fixed capacity (§4.8).
pub fn event_queue(capacity: usize) -> (EventProducer, EventConsumer) {
    let (tx, rx) = RingBuffer::new(capacity);
    (EventProducer { inner: tx }, EventConsumer { inner: rx })
}

/// One event the Executor has already run, on its way to the
/// PostProcessor's outbox (§4.7 step 1, §4.10).
pub struct ExecutedEvent {
    pub outcome: crate::events::EventOutcome,
    pub request_id: u64,
    pub blocking: bool,
}

pub struct OutboxProducer {
    inner: Producer<ExecutedEvent>,
}

impl OutboxProducer {
    pub fn push(&mut self, event: ExecutedEvent) -> Result<(), QueueError> {
        self.inner.push(event).map_err(|_| QueueError::Full)
    }
}

pub struct OutboxConsumer {
    inner: Consumer<ExecutedEvent>,
}

impl OutboxConsumer {
    pub fn pop(&mut self) -> Result<ExecutedEvent, QueueError> {
        self.inner.pop().map_err(|_| QueueError::Empty)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

pub fn outbox(capacity: usize) -> (OutboxProducer, OutboxConsumer) {
    let (tx, rx) = RingBuffer::new(capacity);
    (OutboxProducer { inner: tx }, OutboxConsumer { inner: rx })
}
