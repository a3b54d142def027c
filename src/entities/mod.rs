//! Entities module - the document model core types.
//!
//! A document is a tree of [`Canvas`] instances; each canvas owns an ordered
//! stack of [`Layer`]s, a registry of [`ValueNode`]s, keyframes and render
//! settings. Change notification flows through the per-element event buses
//! and the canvas-level signal catalogue in [`canvas_events`].

pub mod attrs;
pub mod canvas;
pub mod canvas_events;
pub mod groups;
pub mod guid;
pub mod keyframe;
pub mod keys;
pub mod layer;
pub mod rend_desc;
pub mod time;
pub mod value_node;

pub use attrs::{AttrValue, Attrs};
pub use canvas::{BatchGuard, Canvas, CanvasWeak};
pub use groups::{GroupIndex, GroupInsert, GroupRemove};
pub use guid::{derive_id, Guid};
pub use keyframe::{Keyframe, KeyframeList};
pub use layer::{Layer, LayerBounds};
pub use rend_desc::RendDesc;
pub use time::Time;
pub use value_node::{bone_map, ValueKind, ValueNode};
