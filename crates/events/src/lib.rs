#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in fleetpkg
//!
//! Library crates report what they are doing through domain events sent over
//! an unbounded channel; the front end decides how to log or render them.
//! Emission never blocks and never fails: a dropped receiver is ignored.

pub mod meta;
pub use meta::EventSource;

pub mod events;
pub use events::{
    AppEvent, FailureContext, GeneralEvent, PackageEvent, ProcessEvent, ScanEvent, ScriptEvent,
};

use tokio::sync::mpsc::UnboundedSender;

pub type EventSender = UnboundedSender<AppEvent>;

pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<AppEvent>;

#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Anything that may hold an `EventSender`
///
/// Engines, runners and registries all carry an optional sender; this trait
/// gives them a single `emit` that is a no-op when nobody is listening.
pub trait EventEmitter {
    fn event_sender(&self) -> Option<&EventSender>;

    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // A closed channel only means the front end stopped listening
            let _ = sender.send(event);
        }
    }

    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(
            message,
            Some(context.into()),
        )));
    }

    fn emit_error_with_details(&self, message: impl Into<String>, details: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(
            message,
            Some(details.into()),
        )));
    }
}

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
