//! Core infrastructure shared by the document model: the event bus.

pub mod event_bus;

pub use event_bus::{downcast_event, BoxedEvent, Connection, Event, EventBus};
