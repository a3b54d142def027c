//! Group index: derived mapping from group name to member layers.
//!
//! The index is the reverse view of per-layer membership; the canvas keeps
//! the two in sync by funneling every change through `insert`/`remove` from
//! its layer-signal hooks. Outcome enums tell the canvas exactly which
//! signals to fire, so signal policy stays in one place (the canvas).

use indexmap::IndexMap;
use uuid::Uuid;

use super::layer::Layer;

/// Result of adding one (group, layer) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupInsert {
    /// First member: the group itself came into existence
    GroupCreated,
    /// Group existed, layer joined it
    Joined,
    /// Pair was already present
    AlreadyPresent,
}

/// Result of removing one (group, layer) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupRemove {
    /// Last member left: the group itself was dropped
    GroupDropped,
    /// Layer left, group still has members
    Left,
    /// Pair was not present
    NotPresent,
}

/// Name -> member set, insertion-ordered both ways.
#[derive(Debug, Default)]
pub struct GroupIndex {
    db: IndexMap<String, IndexMap<Uuid, Layer>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Member layers of `group`, empty when the group is unknown.
    pub fn layers_in(&self, group: &str) -> Vec<Layer> {
        self.db
            .get(group)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// All known group names.
    pub fn groups(&self) -> Vec<String> {
        self.db.keys().cloned().collect()
    }

    pub fn group_count(&self) -> usize {
        self.db.len()
    }

    pub fn contains(&self, group: &str, layer: &Layer) -> bool {
        self.db
            .get(group)
            .map(|set| set.contains_key(&layer.uuid()))
            .unwrap_or(false)
    }

    /// Groups a given layer currently appears in.
    pub fn groups_of(&self, layer: &Layer) -> Vec<String> {
        let uuid = layer.uuid();
        self.db
            .iter()
            .filter(|(_, set)| set.contains_key(&uuid))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn insert(&mut self, group: impl Into<String>, layer: Layer) -> GroupInsert {
        let set = self.db.entry(group.into()).or_default();
        let created = set.is_empty();
        if set.insert(layer.uuid(), layer).is_some() {
            GroupInsert::AlreadyPresent
        } else if created {
            GroupInsert::GroupCreated
        } else {
            GroupInsert::Joined
        }
    }

    pub fn remove(&mut self, group: &str, layer: &Layer) -> GroupRemove {
        let Some(set) = self.db.get_mut(group) else {
            return GroupRemove::NotPresent;
        };
        if set.shift_remove(&layer.uuid()).is_none() {
            return GroupRemove::NotPresent;
        }
        if set.is_empty() {
            self.db.shift_remove(group);
            GroupRemove::GroupDropped
        } else {
            GroupRemove::Left
        }
    }

    pub fn clear(&mut self) {
        self.db.clear();
    }
}
