#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for warden
//!
//! Registry and job machinery report what they do as typed events instead of
//! printing. Consumers (the stress harness, embedding hosts) own the receiving
//! end of the channel and decide how to render or log them.
//!
//! Unlike progress reports, which travel through the controller queue, events
//! may be emitted from any thread. The sender is a tokio unbounded channel, so
//! emission never blocks and a dropped receiver is silently tolerated.

pub mod meta;
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{
    AppEvent, DisposeTrigger, ExecutionMode, FailureContext, GeneralEvent, JobEvent,
    RegistryEvent,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// An event together with its envelope metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    #[must_use]
    pub fn new(meta: EventMeta, event: AppEvent) -> Self {
        Self { meta, event }
    }

    /// Wrap an event, deriving its metadata from the event itself
    #[must_use]
    pub fn from_event(event: AppEvent) -> Self {
        Self {
            meta: EventMeta::for_event(&event),
            event,
        }
    }
}

impl From<AppEvent> for EventMessage {
    fn from(event: AppEvent) -> Self {
        Self::from_event(event)
    }
}

/// Type alias for the event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for the event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout warden
///
/// Implemented by anything that may hold an `EventSender`; types without a
/// configured sender return `None` and every emission becomes a no-op.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(EventMessage::from_event(event));
        }
    }

    /// Emit a pre-built message, keeping its metadata
    fn emit_message(&self, message: EventMessage) {
        if let Some(sender) = self.event_sender() {
            let _ = sender.send(message);
        }
    }

    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message)));
    }

    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning_with_context(
            message, context,
        )));
    }

    fn emit_error(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(message)));
    }

    /// Emit a job lifecycle event
    fn emit_job(&self, event: JobEvent) {
        self.emit(AppEvent::Job(event));
    }

    /// Emit a registry lifecycle event
    fn emit_registry(&self, event: RegistryEvent) {
        self.emit(AppEvent::Registry(event));
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}
