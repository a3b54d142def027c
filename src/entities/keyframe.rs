//! Keyframes: ordered timeline markers.
//!
//! The canvas stores and orders them; it never interprets them. Editors use
//! the neighbor queries for snap-to-keyframe navigation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::time::Time;

/// A single timeline marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Stable identifier, survives time edits
    pub uuid: Uuid,
    /// Position on the timeline
    pub time: Time,
    /// Free-form label shown in the timeline UI
    pub description: String,
    /// Inactive keyframes are kept but ignored by interpolation consumers
    pub active: bool,
}

impl Keyframe {
    pub fn new(time: Time, description: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            time,
            description: description.into(),
            active: true,
        }
    }
}

/// Time-ordered sequence of keyframes.
///
/// Duplicate times are allowed; insertion among equal times is stable
/// (new marker lands after existing ones).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyframeList {
    keyframes: Vec<Keyframe>,
}

impl KeyframeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping time order.
    pub fn add(&mut self, keyframe: Keyframe) {
        let pos = self
            .keyframes
            .partition_point(|k| k.time <= keyframe.time);
        self.keyframes.insert(pos, keyframe);
    }

    /// Remove by identity. Returns the removed marker, None when absent.
    pub fn remove_by_uuid(&mut self, uuid: Uuid) -> Option<Keyframe> {
        let pos = self.keyframes.iter().position(|k| k.uuid == uuid)?;
        Some(self.keyframes.remove(pos))
    }

    /// First keyframe strictly after `time`.
    pub fn find_next(&self, time: Time) -> Option<&Keyframe> {
        self.keyframes.iter().find(|k| k.time > time)
    }

    /// Last keyframe strictly before `time`.
    pub fn find_prev(&self, time: Time) -> Option<&Keyframe> {
        self.keyframes.iter().rev().find(|k| k.time < time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Keyframe> {
        self.keyframes.iter()
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    pub fn clear(&mut self) {
        self.keyframes.clear();
    }
}
