//! Crate-wide defaults for new documents.
//!
//! Usage: `RendDesc::default()` picks these up; factories use
//! `DEFAULT_CANVAS_NAME` for freshly created canvases.

/// Document format version written into new canvases
pub const CURRENT_CANVAS_VERSION: &str = "0.7";

/// Name given to a canvas created without one
pub const DEFAULT_CANVAS_NAME: &str = "Untitled";

/// Timeline framerate (frames per second)
pub const DEFAULT_FPS: f32 = 24.0;

/// Default render resolution (width, height)
pub const DEFAULT_DIM: (u32, u32) = (480, 270);

/// Default time range of a new canvas, in seconds
pub const DEFAULT_DURATION: f64 = 5.0;
