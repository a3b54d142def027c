//! LIENZO - in-memory document model for vector animation editing.
//!
//! The crate models one editable document unit: a hierarchy of canvases
//! holding ordered layer stacks, animatable value nodes, named layer groups,
//! keyframes and render settings, with synchronous change notification for
//! renderers, UIs and undo stacks. Rendering, persistence and per-frame
//! value evaluation are external collaborators.

// Core engine (event bus)
pub mod core;

// Document model
pub mod config;
pub mod entities;

// Re-export commonly used types from core
pub use core::event_bus::{downcast_event, BoxedEvent, Connection, Event, EventBus};

// Re-export entities
pub use entities::{
    AttrValue, Attrs, BatchGuard, Canvas, CanvasWeak, Guid, Keyframe, KeyframeList, Layer,
    LayerBounds, RendDesc, Time, ValueKind, ValueNode,
};
