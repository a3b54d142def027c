//! Attribute key constants for Attrs access.
//!
//! Avoid string typos, enable IDE autocomplete.
//! Usage: `layer.get_attr(A_OPACITY)`

// === Identity ===
/// Human-readable name
pub const A_NAME: &str = "name";

// === Compose flags ===
/// Visibility flag
pub const A_VISIBLE: &str = "visible";
/// Opacity (0.0-1.0)
pub const A_OPACITY: &str = "opacity";
/// Blend mode (normal, screen, add, multiply, etc.)
pub const A_BLEND_MODE: &str = "blend_mode";

// === Transform ===
/// Position (Vec2)
pub const A_ORIGIN: &str = "origin";
/// Rotation in degrees
pub const A_ROTATION: &str = "rotation";
/// Scale (Vec2)
pub const A_SCALE: &str = "scale";

// === Value node payloads ===
/// Constant value carried by a placeholder node
pub const A_VALUE: &str = "value";
