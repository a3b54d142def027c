//! Canvas, layer and value-node change events.
//!
//! # Event Hierarchy
//!
//! Canvas-level events are emitted on the canvas's own bus ([`Canvas::signals`])
//! and form the fixed notification catalogue: group bookkeeping, layer order,
//! render settings, identity/metadata, value-node propagation, plus the
//! generic [`ChangedEvent`] that doubles as the dirty signal.
//!
//! Layer-level and node-level events are emitted on the element's own bus;
//! the owning canvas subscribes when the element enters the document and
//! forwards (or reacts to) them, so observers can listen either granularly
//! on one element or in aggregate on the canvas.
//!
//! All dispatch is synchronous: handlers run on the mutating caller's stack
//! before the triggering operation returns.

use super::guid::Guid;
use super::layer::Layer;
use super::value_node::ValueNode;

// === Canvas: groups ===

/// A group gained its first member.
#[derive(Clone, Debug)]
pub struct GroupAddedEvent {
    pub group: String,
}

/// A group lost its last member and was dropped from the index.
#[derive(Clone, Debug)]
pub struct GroupRemovedEvent {
    pub group: String,
}

/// A group's membership changed (member joined/left, or rename merge).
#[derive(Clone, Debug)]
pub struct GroupChangedEvent {
    pub group: String,
}

/// One (group, layer) pair was added to the index.
#[derive(Clone, Debug)]
pub struct GroupPairAddedEvent {
    pub group: String,
    pub layer: Layer,
}

/// One (group, layer) pair was removed from the index.
#[derive(Clone, Debug)]
pub struct GroupPairRemovedEvent {
    pub group: String,
    pub layer: Layer,
}

// === Canvas: structure ===

/// Layer sequence changed (insert/erase/reorder).
#[derive(Clone, Debug)]
pub struct LayersReorderedEvent {
    pub canvas: Guid,
}

/// Render descriptor replaced.
#[derive(Clone, Debug)]
pub struct RendDescChangedEvent {
    pub canvas: Guid,
}

/// Canvas id changed.
#[derive(Clone, Debug)]
pub struct IdChangedEvent {
    pub old_id: String,
    pub new_id: String,
}

/// Canvas file name changed.
#[derive(Clone, Debug)]
pub struct FileNameChangedEvent {
    pub file_name: String,
}

/// Metadata entry set or erased. Observers interested in a single key
/// filter on `key`.
#[derive(Clone, Debug)]
pub struct MetaDataChangedEvent {
    pub key: String,
}

/// Generic changed/dirty signal. Coalesced to a single emission per batch
/// when a batch guard is active.
#[derive(Clone, Debug)]
pub struct ChangedEvent {
    pub canvas: Guid,
}

// === Canvas: value nodes ===

/// A registered value node changed value, or entered/left the registry.
#[derive(Clone, Debug)]
pub struct ValueNodeChangedEvent {
    pub node: ValueNode,
}

/// A registered value node was renamed.
#[derive(Clone, Debug)]
pub struct ValueNodeRenamedEvent {
    pub node: ValueNode,
}

/// A registered value node gained a sub-node.
#[derive(Clone, Debug)]
pub struct ValueNodeChildAddedEvent {
    pub parent: ValueNode,
    pub child: ValueNode,
}

/// A registered value node lost a sub-node.
#[derive(Clone, Debug)]
pub struct ValueNodeChildRemovedEvent {
    pub parent: ValueNode,
    pub child: ValueNode,
}

// === Layer bus ===

/// Layer state changed (attribute edit, bounds move).
#[derive(Clone, Debug)]
pub struct LayerChangedEvent {
    pub layer: Layer,
}

/// Layer joined a named group.
#[derive(Clone, Debug)]
pub struct LayerGroupAddedEvent {
    pub layer: Layer,
    pub group: String,
}

/// Layer left a named group.
#[derive(Clone, Debug)]
pub struct LayerGroupRemovedEvent {
    pub layer: Layer,
    pub group: String,
}

// === Value-node bus ===

/// Node payload changed.
#[derive(Clone, Debug)]
pub struct NodeChangedEvent {
    pub node: ValueNode,
}

/// Node id changed.
#[derive(Clone, Debug)]
pub struct NodeRenamedEvent {
    pub node: ValueNode,
    pub old_id: String,
}

/// Node gained a child link.
#[derive(Clone, Debug)]
pub struct NodeChildAddedEvent {
    pub parent: ValueNode,
    pub child: ValueNode,
}

/// Node lost a child link.
#[derive(Clone, Debug)]
pub struct NodeChildRemovedEvent {
    pub parent: ValueNode,
    pub child: ValueNode,
}
