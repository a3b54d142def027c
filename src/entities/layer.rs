//! Layer: one drawable element in a canvas's compositing stack.
//!
//! The canvas only relies on the narrow contract here: stable identity,
//! group membership reporting, a change-signal bus it can subscribe to, and
//! a geometric hit test. Everything a concrete layer type computes per
//! frame lives behind its attributes and is none of the canvas's business.

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec2;
use indexmap::IndexSet;
use uuid::Uuid;

use crate::core::event_bus::EventBus;

use super::attrs::{AttrValue, Attrs};
use super::canvas_events::{LayerChangedEvent, LayerGroupAddedEvent, LayerGroupRemovedEvent};
use super::guid::Guid;
use super::keys::{A_NAME, A_OPACITY, A_VISIBLE};

/// Axis-aligned bounds used for hit testing, in canvas units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl LayerBounds {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Inclusive containment test.
    pub fn contains(&self, pos: Vec2) -> bool {
        pos.x >= self.min.x && pos.x <= self.max.x && pos.y >= self.min.y && pos.y <= self.max.y
    }
}

struct LayerInner {
    guid: Guid,
    attrs: Attrs,
    groups: IndexSet<String>,
    bounds: Option<LayerBounds>,
    bus: EventBus,
}

/// Cheap-to-clone handle to one layer. Equality is identity, not content.
#[derive(Clone)]
pub struct Layer {
    inner: Rc<RefCell<LayerInner>>,
}

impl Layer {
    pub fn new(name: impl Into<String>) -> Self {
        let mut attrs = Attrs::new();
        attrs.set(A_NAME, AttrValue::Str(name.into()));
        attrs.set(A_OPACITY, AttrValue::Float(1.0));
        attrs.set(A_VISIBLE, AttrValue::Bool(true));

        Self {
            inner: Rc::new(RefCell::new(LayerInner {
                guid: Guid::new(),
                attrs,
                groups: IndexSet::new(),
                bounds: None,
                bus: EventBus::new(),
            })),
        }
    }

    // ========== Identity ==========

    pub fn guid(&self) -> Guid {
        self.inner.borrow().guid
    }

    /// Map/set key form of the identity.
    pub fn uuid(&self) -> Uuid {
        self.inner.borrow().guid.as_uuid()
    }

    pub fn name(&self) -> String {
        self.inner
            .borrow()
            .attrs
            .get_str(A_NAME)
            .unwrap_or("Layer")
            .to_string()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.set_attr(A_NAME, AttrValue::Str(name.into()));
    }

    // ========== Attributes ==========

    pub fn get_attr(&self, key: &str) -> Option<AttrValue> {
        self.inner.borrow().attrs.get(key).cloned()
    }

    pub fn set_attr(&self, key: &str, value: AttrValue) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.attrs.get(key) == Some(&value) {
                return;
            }
            inner.attrs.set(key, value);
        }
        self.signals().emit(LayerChangedEvent {
            layer: self.clone(),
        });
    }

    pub fn attrs(&self) -> Attrs {
        self.inner.borrow().attrs.clone()
    }

    // ========== Group membership ==========

    /// Groups this layer reports belonging to, in join order.
    pub fn groups(&self) -> Vec<String> {
        self.inner.borrow().groups.iter().cloned().collect()
    }

    pub fn is_in_group(&self, group: &str) -> bool {
        self.inner.borrow().groups.contains(group)
    }

    /// Join a named group. No-op when already a member.
    pub fn add_to_group(&self, group: impl Into<String>) {
        let group = group.into();
        let added = self.inner.borrow_mut().groups.insert(group.clone());
        if added {
            self.signals().emit(LayerGroupAddedEvent {
                layer: self.clone(),
                group,
            });
        }
    }

    /// Leave a named group. No-op when not a member.
    pub fn remove_from_group(&self, group: &str) {
        let removed = self.inner.borrow_mut().groups.shift_remove(group);
        if removed {
            self.signals().emit(LayerGroupRemovedEvent {
                layer: self.clone(),
                group: group.to_string(),
            });
        }
    }

    // ========== Geometry ==========

    pub fn bounds(&self) -> Option<LayerBounds> {
        self.inner.borrow().bounds
    }

    pub fn set_bounds(&self, bounds: Option<LayerBounds>) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.bounds == bounds {
                return;
            }
            inner.bounds = bounds;
        }
        self.signals().emit(LayerChangedEvent {
            layer: self.clone(),
        });
    }

    /// Geometric containment test used by canvas hit testing.
    /// A layer without bounds never hits.
    pub fn hit_check(&self, pos: Vec2) -> bool {
        self.inner
            .borrow()
            .bounds
            .map(|b| b.contains(pos))
            .unwrap_or(false)
    }

    // ========== Signals ==========

    /// This layer's own change-signal bus.
    pub fn signals(&self) -> EventBus {
        self.inner.borrow().bus.clone()
    }

    // ========== Cloning ==========

    /// Structurally independent copy with identity re-derived from
    /// `deriv_guid`. Group membership and attributes travel with the copy;
    /// signal subscriptions do not.
    pub fn clone_layer(&self, deriv_guid: &Guid) -> Layer {
        let inner = self.inner.borrow();
        Layer {
            inner: Rc::new(RefCell::new(LayerInner {
                guid: inner.guid ^ *deriv_guid,
                attrs: inner.attrs.clone(),
                groups: inner.groups.clone(),
                bounds: inner.bounds,
                bus: EventBus::new(),
            })),
        }
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Layer {}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("uuid", &self.uuid())
            .field("name", &self.name())
            .field("groups", &self.groups())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_group_membership_events() {
        let layer = Layer::new("shape");
        let joins = Rc::new(Cell::new(0));
        let leaves = Rc::new(Cell::new(0));

        let j = Rc::clone(&joins);
        let _c1 = layer
            .signals()
            .subscribe::<LayerGroupAddedEvent, _>(move |_| j.set(j.get() + 1));
        let l = Rc::clone(&leaves);
        let _c2 = layer
            .signals()
            .subscribe::<LayerGroupRemovedEvent, _>(move |_| l.set(l.get() + 1));

        layer.add_to_group("bg");
        layer.add_to_group("bg"); // no-op
        layer.add_to_group("fx");
        assert_eq!(joins.get(), 2);
        assert_eq!(layer.groups(), vec!["bg".to_string(), "fx".to_string()]);

        layer.remove_from_group("bg");
        layer.remove_from_group("bg"); // no-op
        assert_eq!(leaves.get(), 1);
        assert!(!layer.is_in_group("bg"));
    }

    #[test]
    fn test_attr_change_emits_once() {
        let layer = Layer::new("shape");
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let _c = layer
            .signals()
            .subscribe::<LayerChangedEvent, _>(move |_| h.set(h.get() + 1));

        layer.set_attr(A_OPACITY, AttrValue::Float(0.25));
        layer.set_attr(A_OPACITY, AttrValue::Float(0.25)); // unchanged, no event
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_hit_check() {
        let layer = Layer::new("shape");
        assert!(!layer.hit_check(Vec2::new(0.0, 0.0)));

        layer.set_bounds(Some(LayerBounds::new(
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, 1.0),
        )));
        assert!(layer.hit_check(Vec2::new(0.5, -0.5)));
        assert!(!layer.hit_check(Vec2::new(2.0, 0.0)));
    }

    #[test]
    fn test_clone_layer_derives_identity() {
        let layer = Layer::new("shape");
        layer.add_to_group("bg");
        let deriv = Guid::new();

        let a = layer.clone_layer(&deriv);
        let b = layer.clone_layer(&deriv);
        let c = layer.clone_layer(&Guid::new());

        assert_ne!(a.uuid(), layer.uuid());
        assert_eq!(a.uuid(), b.uuid()); // same derivation guid -> same identity
        assert_ne!(a.uuid(), c.uuid()); // different guid -> no aliasing
        assert_eq!(a.groups(), vec!["bg".to_string()]);
        assert!(a != layer);
    }
}
