//! Time cursor type: seconds on the document timeline.

use std::fmt;
use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// A point on the timeline, in seconds.
///
/// Plain wrapper so frame/second conversions live in one place. Comparison
/// is exact; callers that need tolerance compare `as_secs()` themselves.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Time(f64);

impl Time {
    pub const ZERO: Time = Time(0.0);

    pub fn new(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }

    /// Timeline position of frame `frame` at `fps`.
    pub fn from_frame(frame: i32, fps: f32) -> Self {
        Self(frame as f64 / fps as f64)
    }

    /// Nearest frame index at `fps`.
    pub fn to_frame(&self, fps: f32) -> i32 {
        (self.0 * fps as f64).round() as i32
    }
}

impl Add for Time {
    type Output = Time;
    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl Sub for Time {
    type Output = Time;
    fn sub(self, rhs: Time) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
