//! Value nodes: the animatable-value dependency graph.
//!
//! The canvas core needs only the narrow contract: a stable string id inside
//! one canvas, a change-signal bus, and child/parent link signals it can
//! forward. Concrete evaluation semantics (interpolation, composite math)
//! belong to the value-node kinds themselves and stay out of the canvas.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::event_bus::EventBus;

use super::attrs::AttrValue;
use super::canvas::{Canvas, CanvasWeak};
use super::canvas_events::{
    NodeChangedEvent, NodeChildAddedEvent, NodeChildRemovedEvent, NodeRenamedEvent,
};
use super::guid::{derive_id, Guid};

/// Kind tag for unified storage and filtering of node variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Fixed value, no inputs
    Const,
    /// Value interpolated over time
    Animated,
    /// Value computed from sub-node links
    Composite,
    /// Skeleton bone transform
    Bone,
}

struct ValueNodeInner {
    guid: Guid,
    /// Export id; empty while the node is unexported
    id: String,
    kind: ValueKind,
    value: AttrValue,
    children: Vec<ValueNode>,
    bus: EventBus,
    /// Canvas whose registry exports this node, if any
    parent_canvas: Option<CanvasWeak>,
}

/// Cheap-to-clone handle to one value node. Equality is identity.
#[derive(Clone)]
pub struct ValueNode {
    inner: Rc<RefCell<ValueNodeInner>>,
}

impl ValueNode {
    pub fn new(kind: ValueKind, value: AttrValue) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ValueNodeInner {
                guid: Guid::new(),
                id: String::new(),
                kind,
                value,
                children: Vec::new(),
                bus: EventBus::new(),
                parent_canvas: None,
            })),
        }
    }

    /// Default stand-in created when an id is referenced before its defining
    /// node shows up.
    pub fn placeholder() -> Self {
        Self::new(ValueKind::Const, AttrValue::default())
    }

    // ========== Identity ==========

    pub fn guid(&self) -> Guid {
        self.inner.borrow().guid
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.borrow().guid.as_uuid()
    }

    pub fn id(&self) -> String {
        self.inner.borrow().id.clone()
    }

    /// True once the node is registered under an id in some canvas.
    pub fn is_exported(&self) -> bool {
        !self.inner.borrow().id.is_empty()
    }

    /// Rename the node. The owning canvas forwards the resulting signal as a
    /// canvas-level rename.
    pub fn set_id(&self, id: impl Into<String>) {
        let id = id.into();
        let old_id = {
            let mut inner = self.inner.borrow_mut();
            if inner.id == id {
                return;
            }
            std::mem::replace(&mut inner.id, id)
        };
        self.signals().emit(NodeRenamedEvent {
            node: self.clone(),
            old_id,
        });
    }

    pub fn kind(&self) -> ValueKind {
        self.inner.borrow().kind
    }

    // ========== Payload ==========

    pub fn value(&self) -> AttrValue {
        self.inner.borrow().value.clone()
    }

    pub fn set_value(&self, value: AttrValue) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value;
        }
        self.signals().emit(NodeChangedEvent {
            node: self.clone(),
        });
    }

    // ========== Sub-node links ==========

    pub fn children(&self) -> Vec<ValueNode> {
        self.inner.borrow().children.clone()
    }

    /// Link a sub-node. The same child may be linked more than once
    /// (e.g. both endpoints of a segment sharing a radius).
    pub fn add_child(&self, child: ValueNode) {
        self.inner.borrow_mut().children.push(child.clone());
        self.signals().emit(NodeChildAddedEvent {
            parent: self.clone(),
            child,
        });
    }

    /// Unlink the first occurrence of `child`. No-op when not linked.
    pub fn remove_child(&self, child: &ValueNode) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            match inner.children.iter().position(|c| c == child) {
                Some(pos) => {
                    inner.children.remove(pos);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.signals().emit(NodeChildRemovedEvent {
                parent: self.clone(),
                child: child.clone(),
            });
        }
    }

    // ========== Signals / ownership ==========

    /// This node's own change-signal bus.
    pub fn signals(&self) -> EventBus {
        self.inner.borrow().bus.clone()
    }

    /// Canvas whose registry currently exports this node.
    pub fn parent_canvas(&self) -> Option<Canvas> {
        self.inner
            .borrow()
            .parent_canvas
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }

    pub(crate) fn set_parent_canvas(&self, canvas: Option<CanvasWeak>) {
        self.inner.borrow_mut().parent_canvas = canvas;
    }

    // ========== Cloning ==========

    /// Deep copy with identity re-derived from `deriv_guid`.
    ///
    /// `remap` memoizes copies by original identity so shared sub-nodes map
    /// to a single copy and link cycles terminate. Children exported by a
    /// canvas outside `subtree_root`'s subtree escape the clone: they stay
    /// shared with the original unless `for_export` pulls them in.
    pub fn clone_node(
        &self,
        deriv_guid: &Guid,
        remap: &mut HashMap<Uuid, ValueNode>,
        subtree_root: &Canvas,
        for_export: bool,
    ) -> ValueNode {
        if let Some(done) = remap.get(&self.uuid()) {
            return done.clone();
        }

        let (new_guid, new_id, kind, value, children) = {
            let inner = self.inner.borrow();
            let new_guid = inner.guid ^ *deriv_guid;
            let new_id = if inner.id.is_empty() {
                String::new()
            } else {
                derive_id(&inner.id, &new_guid)
            };
            (
                new_guid,
                new_id,
                inner.kind,
                inner.value.clone(),
                inner.children.clone(),
            )
        };

        let copy = ValueNode {
            inner: Rc::new(RefCell::new(ValueNodeInner {
                guid: new_guid,
                id: new_id,
                kind,
                value,
                children: Vec::new(),
                bus: EventBus::new(),
                parent_canvas: None,
            })),
        };
        // Memoize before descending: link cycles must resolve to the copy.
        remap.insert(self.uuid(), copy.clone());

        for child in children {
            let in_subtree = match child.parent_canvas() {
                Some(owner) => owner.is_in_subtree_of(subtree_root),
                // Unexported children belong to this node alone.
                None => true,
            };
            let new_child = if in_subtree || for_export {
                child.clone_node(deriv_guid, remap, subtree_root, for_export)
            } else {
                child.clone()
            };
            copy.inner.borrow_mut().children.push(new_child);
        }

        copy
    }
}

impl PartialEq for ValueNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ValueNode {}

impl std::fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueNode")
            .field("uuid", &self.uuid())
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Derived skeleton mapping over one canvas's registry.
///
/// The canvas delegates here and owns no bone state of its own.
pub fn bone_map(canvas: &Canvas) -> IndexMap<Uuid, ValueNode> {
    canvas
        .value_nodes()
        .into_iter()
        .filter(|node| node.kind() == ValueKind::Bone)
        .map(|node| (node.uuid(), node))
        .collect()
}
