//! Render descriptor: resolution, frame rate and time range of a canvas.
//!
//! The canvas owns one `RendDesc` and republishes its change signal; the
//! renderer consumes it together with the ordered layer sequence. Nothing
//! here interprets pixels - this is document state only.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_DIM, DEFAULT_DURATION, DEFAULT_FPS};

use super::time::Time;

/// Render settings for one canvas.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RendDesc {
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Timeline framerate (frames per second)
    pub fps: f32,
    /// Timeline start (inclusive)
    pub time_begin: Time,
    /// Timeline end (inclusive)
    pub time_end: Time,
}

impl Default for RendDesc {
    fn default() -> Self {
        Self {
            width: DEFAULT_DIM.0,
            height: DEFAULT_DIM.1,
            fps: DEFAULT_FPS,
            time_begin: Time::ZERO,
            time_end: Time::new(DEFAULT_DURATION),
        }
    }
}

impl RendDesc {
    /// Timeline duration in seconds. Never negative.
    pub fn duration(&self) -> Time {
        if self.time_end < self.time_begin {
            Time::ZERO
        } else {
            self.time_end - self.time_begin
        }
    }

    /// Number of frames in the time range (inclusive endpoints).
    pub fn frame_count(&self) -> i32 {
        (self.duration().as_secs() * self.fps as f64).round() as i32 + 1
    }

    /// Set time range, normalizing an inverted interval to empty.
    pub fn set_time_range(&mut self, begin: Time, end: Time) {
        if end < begin {
            self.time_begin = begin;
            self.time_end = begin;
        } else {
            self.time_begin = begin;
            self.time_end = end;
        }
    }
}
