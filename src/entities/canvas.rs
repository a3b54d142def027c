//! Canvas: the aggregate root of one editable document unit.
//!
//! A canvas holds the ordered layer stack, the value-node registry, the
//! named-group index, keyframes, render settings and the parent/child/
//! external canvas hierarchy. Every public mutation funnels through here,
//! updates the relevant container or index, then fires the matching signal
//! synchronously before returning - the renderer, UI and undo stack all
//! stay consistent by subscribing to [`Canvas::signals`].
//!
//! Consistency rules enforced by this module:
//! - the group index only ever references layers currently in the stack
//! - value-node ids are unique per canvas and stable while registered
//! - the externals cache is keyed by normalized path and lives on the
//!   nearest non-inline canvas (inline canvases inherit it, like the time
//!   cursor)
//! - signal subscriptions on layers/nodes are torn down when the element
//!   leaves the document and on canvas drop, before layer references are
//!   released

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use anyhow::{anyhow, bail, Result};
use glam::Vec2;
use indexmap::IndexMap;
use log::{debug, warn};
use uuid::Uuid;

use crate::config::{CURRENT_CANVAS_VERSION, DEFAULT_CANVAS_NAME};
use crate::core::event_bus::{Connection, EventBus};

use super::canvas_events::{
    ChangedEvent, FileNameChangedEvent, GroupAddedEvent, GroupChangedEvent, GroupPairAddedEvent,
    GroupPairRemovedEvent, GroupRemovedEvent, IdChangedEvent, LayerChangedEvent,
    LayerGroupAddedEvent, LayerGroupRemovedEvent, LayersReorderedEvent, MetaDataChangedEvent,
    NodeChangedEvent, NodeChildAddedEvent, NodeChildRemovedEvent, NodeRenamedEvent,
    RendDescChangedEvent, ValueNodeChangedEvent, ValueNodeChildAddedEvent,
    ValueNodeChildRemovedEvent, ValueNodeRenamedEvent,
};
use super::groups::{GroupIndex, GroupInsert, GroupRemove};
use super::guid::{derive_id, Guid};
use super::keyframe::{Keyframe, KeyframeList};
use super::layer::Layer;
use super::rend_desc::RendDesc;
use super::time::Time;
use super::value_node::{self, ValueNode};

struct CanvasInner {
    guid: Guid,
    id: String,
    name: String,
    description: String,
    author: String,
    version: String,
    file_name: String,
    meta_data: IndexMap<String, String>,
    layers: Vec<Layer>,
    value_nodes: Vec<ValueNode>,
    keyframes: KeyframeList,
    rend_desc: RendDesc,
    cur_time: Time,
    parent: Option<CanvasWeak>,
    children: Vec<Canvas>,
    /// Normalized file path -> externally loaded canvas. Lives on the
    /// nearest non-inline canvas.
    externals: IndexMap<String, Canvas>,
    groups: GroupIndex,
    /// Signal subscriptions this canvas holds on layers/value nodes,
    /// keyed by element identity
    connections: HashMap<Uuid, Vec<Connection>>,
    bus: EventBus,
    is_inline: bool,
    is_dirty: bool,
    batch_depth: u32,
    batch_changed: bool,
}

impl Drop for CanvasInner {
    fn drop(&mut self) {
        // Teardown order matters: subscriptions first, then the group index,
        // and only then do the layer references go with the struct.
        for (_, conns) in self.connections.drain() {
            for conn in conns {
                conn.disconnect();
            }
        }
        self.groups.clear();
    }
}

/// Cheap-to-clone handle to one canvas. Equality is identity.
#[derive(Clone)]
pub struct Canvas {
    inner: Rc<RefCell<CanvasInner>>,
}

/// Non-owning canvas handle. Parent links use this, so ownership cycles
/// between parents and children cannot form.
#[derive(Clone)]
pub struct CanvasWeak {
    inner: Weak<RefCell<CanvasInner>>,
}

impl CanvasWeak {
    pub fn upgrade(&self) -> Option<Canvas> {
        self.inner.upgrade().map(|inner| Canvas { inner })
    }
}

impl fmt::Debug for CanvasWeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(canvas) => write!(f, "CanvasWeak({})", canvas.get_string()),
            None => write!(f, "CanvasWeak(<dropped>)"),
        }
    }
}

/// Reject ids that would collide with the path syntax of `find_canvas`.
fn valid_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("id must not be empty");
    }
    if id.contains([':', '#', '@']) {
        bail!("id '{}' contains a reserved character", id);
    }
    Ok(())
}

/// Externals cache keys and stored file names use forward slashes only.
fn normalize_path(file: &str) -> String {
    let mut out = file.replace('\\', "/");
    while out.contains("//") {
        out = out.replace("//", "/");
    }
    out.strip_prefix("./").unwrap_or(&out).to_string()
}

impl Canvas {
    // ========== Factories ==========

    /// New root canvas.
    pub fn create() -> Canvas {
        Canvas {
            inner: Rc::new(RefCell::new(CanvasInner {
                guid: Guid::new(),
                id: String::new(),
                name: DEFAULT_CANVAS_NAME.to_string(),
                description: String::new(),
                author: String::new(),
                version: CURRENT_CANVAS_VERSION.to_string(),
                file_name: String::new(),
                meta_data: IndexMap::new(),
                layers: Vec::new(),
                value_nodes: Vec::new(),
                keyframes: KeyframeList::new(),
                rend_desc: RendDesc::default(),
                cur_time: Time::ZERO,
                parent: None,
                children: Vec::new(),
                externals: IndexMap::new(),
                groups: GroupIndex::new(),
                connections: HashMap::new(),
                bus: EventBus::new(),
                is_inline: false,
                is_dirty: false,
                batch_depth: 0,
                batch_changed: false,
            })),
        }
    }

    /// New inline canvas embedded under `parent` for grouping purposes.
    ///
    /// The embedding element owns the returned handle; inline canvases are
    /// deliberately not listed in `parent.children()` and inherit time and
    /// externals from their nearest non-inline ancestor.
    pub fn create_inline(parent: &Canvas) -> Canvas {
        let canvas = Canvas::create();
        canvas.set_inline(parent);
        canvas
    }

    /// Convert an existing canvas into an inline child of `parent`.
    pub fn set_inline(&self, parent: &Canvas) {
        let mut inner = self.inner.borrow_mut();
        inner.is_inline = true;
        inner.parent = Some(parent.downgrade());
    }

    pub fn downgrade(&self) -> CanvasWeak {
        CanvasWeak {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// This canvas's signal bus: the full notification catalogue of
    /// `canvas_events` is emitted here.
    pub fn signals(&self) -> EventBus {
        self.inner.borrow().bus.clone()
    }

    // ========== Identity & metadata ==========

    pub fn guid(&self) -> Guid {
        self.inner.borrow().guid
    }

    pub fn get_id(&self) -> String {
        self.inner.borrow().id.clone()
    }

    pub fn set_id(&self, id: &str) -> Result<()> {
        valid_id(id)?;
        let old_id = {
            let mut inner = self.inner.borrow_mut();
            if inner.id == id {
                return Ok(());
            }
            std::mem::replace(&mut inner.id, id.to_string())
        };
        self.signals().emit(IdChangedEvent {
            old_id,
            new_id: id.to_string(),
        });
        self.changed();
        Ok(())
    }

    pub fn get_name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn set_name(&self, name: &str) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.name == name {
                return;
            }
            inner.name = name.to_string();
        }
        self.changed();
    }

    pub fn get_description(&self) -> String {
        self.inner.borrow().description.clone()
    }

    pub fn set_description(&self, description: &str) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.description == description {
                return;
            }
            inner.description = description.to_string();
        }
        self.changed();
    }

    pub fn get_author(&self) -> String {
        self.inner.borrow().author.clone()
    }

    pub fn set_author(&self, author: &str) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.author == author {
                return;
            }
            inner.author = author.to_string();
        }
        self.changed();
    }

    pub fn get_version(&self) -> String {
        self.inner.borrow().version.clone()
    }

    pub fn set_version(&self, version: &str) {
        self.inner.borrow_mut().version = version.to_string();
    }

    /// Human-readable description for logs and diagnostics.
    pub fn get_string(&self) -> String {
        let inner = self.inner.borrow();
        if inner.id.is_empty() {
            format!("canvas '{}'", inner.name)
        } else {
            format!("canvas '{}'", inner.id)
        }
    }

    pub fn get_meta_data(&self, key: &str) -> Option<String> {
        self.inner.borrow().meta_data.get(key).cloned()
    }

    pub fn get_meta_data_keys(&self) -> Vec<String> {
        self.inner.borrow().meta_data.keys().cloned().collect()
    }

    /// Set one metadata entry. Setting the value it already has is a no-op
    /// and fires no signal.
    pub fn set_meta_data(&self, key: &str, data: &str) {
        if key.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.borrow_mut();
            if inner.meta_data.get(key).map(String::as_str) == Some(data) {
                return;
            }
            inner.meta_data.insert(key.to_string(), data.to_string());
        }
        self.signals().emit(MetaDataChangedEvent {
            key: key.to_string(),
        });
        self.changed();
    }

    pub fn erase_meta_data(&self, key: &str) {
        let removed = self.inner.borrow_mut().meta_data.shift_remove(key).is_some();
        if removed {
            self.signals().emit(MetaDataChangedEvent {
                key: key.to_string(),
            });
            self.changed();
        }
    }

    // ========== File name ==========

    pub fn set_file_name(&self, file_name: &str) {
        let file_name = normalize_path(file_name);
        {
            let mut inner = self.inner.borrow_mut();
            if inner.file_name == file_name {
                return;
            }
            inner.file_name = file_name.clone();
        }
        self.signals().emit(FileNameChangedEvent { file_name });
    }

    pub fn get_file_name(&self) -> String {
        self.inner.borrow().file_name.clone()
    }

    /// Directory part of the file name (trailing segment stripped).
    pub fn get_file_path(&self) -> String {
        let file_name = self.get_file_name();
        match file_name.rfind('/') {
            Some(pos) => file_name[..pos].to_string(),
            None => String::new(),
        }
    }

    // ========== Render descriptor & time ==========

    pub fn rend_desc(&self) -> RendDesc {
        self.inner.borrow().rend_desc.clone()
    }

    pub fn set_rend_desc(&self, desc: RendDesc) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.rend_desc == desc {
                return;
            }
            inner.rend_desc = desc;
        }
        self.signals().emit(RendDescChangedEvent {
            canvas: self.guid(),
        });
        self.changed();
    }

    /// Current time cursor. Inline canvases read their nearest non-inline
    /// ancestor's cursor.
    pub fn get_time(&self) -> Time {
        if self.is_inline() {
            let host = self.get_non_inline_ancestor();
            if host != *self {
                return host.get_time();
            }
        }
        self.inner.borrow().cur_time
    }

    /// Move the time cursor here and in all child canvases. On an inline
    /// canvas this forwards to the non-inline ancestor. Setting the current
    /// time again is a no-op.
    pub fn set_time(&self, time: Time) {
        if self.is_inline() {
            let host = self.get_non_inline_ancestor();
            if host != *self {
                host.set_time(time);
                return;
            }
        }
        self.set_time_impl(time);
    }

    fn set_time_impl(&self, time: Time) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.cur_time == time {
                return;
            }
            inner.cur_time = time;
        }
        for child in self.children() {
            child.set_time_impl(time);
        }
    }

    // ========== Dirty state & batching ==========

    pub fn is_dirty(&self) -> bool {
        self.inner.borrow().is_dirty
    }

    /// Reset the dirty flag (persistence calls this after a save).
    pub fn clear_dirty(&self) {
        self.inner.borrow_mut().is_dirty = false;
    }

    /// Suppress per-operation changed signals until the guard drops, then
    /// fire a single coalesced one. Guards nest; the outermost emits.
    pub fn begin_batch(&self) -> BatchGuard {
        self.inner.borrow_mut().batch_depth += 1;
        BatchGuard {
            canvas: self.clone(),
        }
    }

    fn changed(&self) {
        let emit_now = {
            let mut inner = self.inner.borrow_mut();
            inner.is_dirty = true;
            if inner.batch_depth > 0 {
                inner.batch_changed = true;
                false
            } else {
                true
            }
        };
        if emit_now {
            self.signals().emit(ChangedEvent {
                canvas: self.guid(),
            });
        }
    }

    // ========== Layer container ==========

    /// Snapshot of the layer stack, front (index 0) being the top of the
    /// compositing stack. Renderers iterate this together with
    /// [`Canvas::rend_desc`] and [`Canvas::get_time`].
    pub fn layers(&self) -> Vec<Layer> {
        self.inner.borrow().layers.clone()
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().layers.is_empty()
    }

    /// Bottom-most layer.
    pub fn back(&self) -> Option<Layer> {
        self.inner.borrow().layers.last().cloned()
    }

    pub fn push_back(&self, layer: Layer) {
        let depth = self.size();
        self.insert(depth, layer);
    }

    pub fn push_front(&self, layer: Layer) {
        self.insert(0, layer);
    }

    /// Append without group/connection bookkeeping or signals. Reserved for
    /// callers that establish consistency separately (clone reconstruction).
    pub fn push_back_simple(&self, layer: Layer) {
        self.inner.borrow_mut().layers.push(layer);
    }

    /// Insert at `depth` (clamped), with full bookkeeping: group index
    /// update, signal subscriptions, dirty mark and structural signals.
    pub fn insert(&self, depth: usize, layer: Layer) {
        {
            let mut inner = self.inner.borrow_mut();
            let depth = depth.min(inner.layers.len());
            inner.layers.insert(depth, layer.clone());
        }
        self.signals().emit(LayersReorderedEvent {
            canvas: self.guid(),
        });
        self.hook_layer(&layer);
        self.changed();
    }

    /// Remove a layer. No-op when absent. The layer leaves every group it
    /// appeared in and all subscriptions on it are torn down.
    pub fn erase(&self, layer: &Layer) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            match inner.layers.iter().position(|l| l == layer) {
                Some(pos) => {
                    inner.layers.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return;
        }
        self.unhook_layer(layer);
        self.signals().emit(LayersReorderedEvent {
            canvas: self.guid(),
        });
        self.changed();
    }

    /// Remove every layer, coalescing the changed signal into one emission.
    pub fn clear(&self) {
        let layers = self.layers();
        if layers.is_empty() {
            return;
        }
        let _batch = self.begin_batch();
        for layer in layers {
            self.erase(&layer);
        }
    }

    /// Position of `layer` in the stack, None when absent.
    pub fn get_depth(&self, layer: &Layer) -> Option<usize> {
        self.inner.borrow().layers.iter().position(|l| l == layer)
    }

    /// Topmost layer whose bounds contain `pos`. The front of the sequence
    /// is the top of the compositing stack, so the first forward hit wins.
    pub fn find_layer(&self, pos: Vec2) -> Option<Layer> {
        self.layers().into_iter().find(|layer| layer.hit_check(pos))
    }

    fn hook_layer(&self, layer: &Layer) {
        for group in layer.groups() {
            self.add_group_pair(group, layer.clone());
        }

        let bus = layer.signals();
        let weak = self.downgrade();

        let on_changed = {
            let weak = weak.clone();
            move |_event: &LayerChangedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.changed();
                }
            }
        };
        let on_join = {
            let weak = weak.clone();
            move |event: &LayerGroupAddedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.add_group_pair(event.group.clone(), event.layer.clone());
                    canvas.changed();
                }
            }
        };
        let on_leave = {
            let weak = weak.clone();
            move |event: &LayerGroupRemovedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.remove_group_pair(event.group.clone(), event.layer.clone());
                    canvas.changed();
                }
            }
        };

        let connections = vec![
            bus.subscribe::<LayerChangedEvent, _>(on_changed),
            bus.subscribe::<LayerGroupAddedEvent, _>(on_join),
            bus.subscribe::<LayerGroupRemovedEvent, _>(on_leave),
        ];
        self.inner
            .borrow_mut()
            .connections
            .entry(layer.uuid())
            .or_default()
            .extend(connections);
    }

    fn unhook_layer(&self, layer: &Layer) {
        let groups = self.inner.borrow().groups.groups_of(layer);
        for group in groups {
            self.remove_group_pair(group, layer.clone());
        }
        self.disconnect_connections(layer.uuid());
    }

    fn disconnect_connections(&self, uuid: Uuid) {
        if let Some(connections) = self.inner.borrow_mut().connections.remove(&uuid) {
            for conn in connections {
                conn.disconnect();
            }
        }
    }

    // ========== Groups ==========

    /// Members of `group`, empty when unknown.
    pub fn get_layers_in_group(&self, group: &str) -> Vec<Layer> {
        self.inner.borrow().groups.layers_in(group)
    }

    pub fn get_groups(&self) -> Vec<String> {
        self.inner.borrow().groups.groups()
    }

    pub fn get_group_count(&self) -> usize {
        self.inner.borrow().groups.group_count()
    }

    /// Rename a group in place, preserving membership. Renaming onto an
    /// existing group merges the membership sets. Renaming an unknown group
    /// is a no-op.
    pub fn rename_group(&self, old_name: &str, new_name: &str) {
        if old_name == new_name {
            return;
        }
        let members = self.get_layers_in_group(old_name);
        if members.is_empty() {
            return;
        }
        for layer in members {
            layer.remove_from_group(old_name);
            layer.add_to_group(new_name);
        }
        self.signals().emit(GroupChangedEvent {
            group: new_name.to_string(),
        });
    }

    fn add_group_pair(&self, group: String, layer: Layer) {
        let outcome = self
            .inner
            .borrow_mut()
            .groups
            .insert(group.clone(), layer.clone());
        match outcome {
            GroupInsert::AlreadyPresent => return,
            GroupInsert::GroupCreated => self.signals().emit(GroupAddedEvent {
                group: group.clone(),
            }),
            GroupInsert::Joined => self.signals().emit(GroupChangedEvent {
                group: group.clone(),
            }),
        }
        self.signals().emit(GroupPairAddedEvent { group, layer });
    }

    fn remove_group_pair(&self, group: String, layer: Layer) {
        let outcome = self.inner.borrow_mut().groups.remove(&group, &layer);
        match outcome {
            GroupRemove::NotPresent => return,
            GroupRemove::GroupDropped => self.signals().emit(GroupRemovedEvent {
                group: group.clone(),
            }),
            GroupRemove::Left => self.signals().emit(GroupChangedEvent {
                group: group.clone(),
            }),
        }
        self.signals().emit(GroupPairRemovedEvent { group, layer });
    }

    // ========== Value-node registry ==========

    /// Registered nodes, in registration order.
    pub fn value_nodes(&self) -> Vec<ValueNode> {
        self.inner.borrow().value_nodes.clone()
    }

    fn find_value_node_local(&self, id: &str) -> Option<ValueNode> {
        self.inner
            .borrow()
            .value_nodes
            .iter()
            .find(|node| node.id() == id)
            .cloned()
    }

    /// Resolve `id` in this canvas, or through a `canvas_path:node_id`
    /// reference. Absent ids resolve to None.
    pub fn find_value_node(&self, id: &str) -> Option<ValueNode> {
        if let Some((canvas_id, node_id)) = id.rsplit_once(':') {
            let mut warnings = Vec::new();
            return self
                .find_canvas(canvas_id, &mut warnings)?
                .find_value_node(node_id);
        }
        self.find_value_node_local(id)
    }

    /// Resolve `id`, creating and registering a placeholder node when the
    /// reference precedes its defining node. Creations and odd lookups are
    /// reported into `warnings`, never escalated.
    pub fn surefind_value_node(&self, id: &str, warnings: &mut Vec<String>) -> Result<ValueNode> {
        if let Some((canvas_id, node_id)) = id.rsplit_once(':') {
            let canvas = self.surefind_canvas(canvas_id, warnings)?;
            return canvas.surefind_value_node(node_id, warnings);
        }
        if let Some(node) = self.find_value_node_local(id) {
            return Ok(node);
        }
        valid_id(id)?;
        warnings.push(format!(
            "value node '{}' is not defined in {}, creating a placeholder",
            id,
            self.get_string()
        ));
        let node = ValueNode::placeholder();
        self.add_value_node(node.clone(), id)?;
        Ok(node)
    }

    /// Register `node` under `id`. Fails on id collisions and when the node
    /// is already exported elsewhere; re-registering the same node under the
    /// same id is a no-op.
    pub fn add_value_node(&self, node: ValueNode, id: &str) -> Result<()> {
        valid_id(id)?;
        if let Some(existing) = self.find_value_node_local(id) {
            if existing == node {
                return Ok(());
            }
            bail!(
                "a value node with id '{}' already exists in {}",
                id,
                self.get_string()
            );
        }
        if let Some(owner) = node.parent_canvas() {
            if owner == *self {
                bail!("value node is already exported here as '{}'", node.id());
            }
            bail!("value node is already exported by {}", owner.get_string());
        }

        node.set_id(id);
        node.set_parent_canvas(Some(self.downgrade()));
        self.inner.borrow_mut().value_nodes.push(node.clone());
        self.hook_value_node(&node);
        self.signals().emit(ValueNodeChangedEvent { node });
        self.changed();
        Ok(())
    }

    /// Deregister by identity. No-op when the node is not registered here.
    pub fn remove_value_node(&self, node: &ValueNode) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            match inner.value_nodes.iter().position(|n| n == node) {
                Some(pos) => {
                    inner.value_nodes.remove(pos);
                    true
                }
                None => false,
            }
        };
        if !removed {
            return;
        }
        self.disconnect_connections(node.uuid());
        node.set_parent_canvas(None);
        node.set_id("");
        self.signals().emit(ValueNodeChangedEvent { node: node.clone() });
        self.changed();
    }

    /// Sugar for find-then-remove; silently does nothing when `id` does not
    /// resolve to a node registered here.
    pub fn remove_value_node_by_id(&self, id: &str) {
        if let Some(node) = self.find_value_node(id) {
            self.remove_value_node(&node);
        }
    }

    /// Derived skeleton mapping; the canvas owns no bone state.
    pub fn get_bone_map(&self) -> IndexMap<Uuid, ValueNode> {
        value_node::bone_map(self)
    }

    fn hook_value_node(&self, node: &ValueNode) {
        let bus = node.signals();
        let weak = self.downgrade();

        let on_changed = {
            let weak = weak.clone();
            move |event: &NodeChangedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.signals().emit(ValueNodeChangedEvent {
                        node: event.node.clone(),
                    });
                    canvas.changed();
                }
            }
        };
        let on_renamed = {
            let weak = weak.clone();
            move |event: &NodeRenamedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.signals().emit(ValueNodeRenamedEvent {
                        node: event.node.clone(),
                    });
                    canvas.changed();
                }
            }
        };
        let on_child_added = {
            let weak = weak.clone();
            move |event: &NodeChildAddedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.signals().emit(ValueNodeChildAddedEvent {
                        parent: event.parent.clone(),
                        child: event.child.clone(),
                    });
                    canvas.changed();
                }
            }
        };
        let on_child_removed = {
            let weak = weak.clone();
            move |event: &NodeChildRemovedEvent| {
                if let Some(canvas) = weak.upgrade() {
                    canvas.signals().emit(ValueNodeChildRemovedEvent {
                        parent: event.parent.clone(),
                        child: event.child.clone(),
                    });
                    canvas.changed();
                }
            }
        };

        let connections = vec![
            bus.subscribe::<NodeChangedEvent, _>(on_changed),
            bus.subscribe::<NodeRenamedEvent, _>(on_renamed),
            bus.subscribe::<NodeChildAddedEvent, _>(on_child_added),
            bus.subscribe::<NodeChildRemovedEvent, _>(on_child_removed),
        ];
        self.inner
            .borrow_mut()
            .connections
            .entry(node.uuid())
            .or_default()
            .extend(connections);
    }

    // ========== Keyframes ==========

    /// Snapshot of the keyframe list. The canvas stores and orders markers;
    /// it never interprets them.
    pub fn keyframes(&self) -> KeyframeList {
        self.inner.borrow().keyframes.clone()
    }

    pub fn add_keyframe(&self, keyframe: Keyframe) {
        self.inner.borrow_mut().keyframes.add(keyframe);
        self.changed();
    }

    pub fn remove_keyframe(&self, uuid: Uuid) -> Option<Keyframe> {
        let removed = self.inner.borrow_mut().keyframes.remove_by_uuid(uuid);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    // ========== Hierarchy ==========

    pub fn is_root(&self) -> bool {
        self.inner.borrow().parent.is_none()
    }

    pub fn is_inline(&self) -> bool {
        self.inner.borrow().is_inline
    }

    pub fn parent(&self) -> Option<Canvas> {
        self.inner
            .borrow()
            .parent
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }

    /// Non-inline child canvases, in attach order.
    pub fn children(&self) -> Vec<Canvas> {
        self.inner.borrow().children.clone()
    }

    pub fn get_root(&self) -> Canvas {
        let mut canvas = self.clone();
        while let Some(parent) = canvas.parent() {
            canvas = parent;
        }
        canvas
    }

    /// Nearest ancestor (possibly self) that is not inline. Inline canvases
    /// inherit time and externals from this canvas.
    pub fn get_non_inline_ancestor(&self) -> Canvas {
        let mut canvas = self.clone();
        while canvas.is_inline() {
            match canvas.parent() {
                Some(parent) => canvas = parent,
                None => break,
            }
        }
        canvas
    }

    /// True when `root` appears on this canvas's parent chain (or is self).
    pub fn is_in_subtree_of(&self, root: &Canvas) -> bool {
        let mut canvas = self.clone();
        loop {
            if canvas == *root {
                return true;
            }
            match canvas.parent() {
                Some(parent) => canvas = parent,
                None => return false,
            }
        }
    }

    /// Create and attach a child under a generated unique id.
    pub fn new_child_canvas(&self) -> Canvas {
        let mut n = 1;
        loop {
            let id = format!("canvas{}", n);
            if let Some(child) = self.new_child_canvas_with_id(&id) {
                return child;
            }
            n += 1;
        }
    }

    /// Create and attach a child with `id`. Returns None when `id` is
    /// invalid or already taken by an existing child.
    pub fn new_child_canvas_with_id(&self, id: &str) -> Option<Canvas> {
        if let Err(err) = valid_id(id) {
            warn!("new child canvas rejected: {}", err);
            return None;
        }
        if self
            .inner
            .borrow()
            .children
            .iter()
            .any(|child| child.get_id() == id)
        {
            warn!("child canvas id '{}' already exists in {}", id, self.get_string());
            return None;
        }
        let child = Canvas::create();
        {
            let mut child_inner = child.inner.borrow_mut();
            child_inner.id = id.to_string();
            child_inner.parent = Some(self.downgrade());
        }
        self.inner.borrow_mut().children.push(child.clone());
        self.changed();
        Some(child)
    }

    /// Attach an existing detached canvas as a child under `id`.
    pub fn add_child_canvas(&self, child: Canvas, id: &str) -> Result<Canvas> {
        valid_id(id)?;
        if child.parent().is_some() {
            bail!("{} is already attached to a parent", child.get_string());
        }
        if self
            .inner
            .borrow()
            .children
            .iter()
            .any(|existing| existing.get_id() == id)
        {
            bail!("child canvas id '{}' already exists in {}", id, self.get_string());
        }
        {
            let mut child_inner = child.inner.borrow_mut();
            child_inner.id = id.to_string();
            child_inner.parent = Some(self.downgrade());
        }
        self.inner.borrow_mut().children.push(child.clone());
        self.changed();
        Ok(child)
    }

    /// Detach a child. No-op when `child` is not attached here.
    pub fn remove_child_canvas(&self, child: &Canvas) {
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
            child.inner.borrow_mut().parent = None;
            self.changed();
        }
    }

    /// Resolve a canvas reference. Forms:
    /// - `""` - this canvas
    /// - `"sub"` - self (matching id) or a direct child
    /// - `"sub:deeper"` - path through children
    /// - `":sub:deeper"` - absolute path from the root
    /// - `"dir/file.ext#sub"` - registered external canvas, then a path in it
    pub fn find_canvas(&self, id: &str, warnings: &mut Vec<String>) -> Option<Canvas> {
        if id.is_empty() {
            return Some(self.clone());
        }
        if let Some(rest) = id.strip_prefix(':') {
            return self.get_root().find_canvas(rest, warnings);
        }
        if let Some((file, canvas_id)) = id.split_once('#') {
            let host = self.get_non_inline_ancestor();
            let external = {
                let key = normalize_path(file);
                host.inner.borrow().externals.get(&key).cloned()
            };
            return match external {
                Some(ext) => {
                    if canvas_id.is_empty() {
                        Some(ext)
                    } else {
                        ext.find_canvas(canvas_id, warnings)
                    }
                }
                None => {
                    warnings.push(format!("external canvas file '{}' is not registered", file));
                    None
                }
            };
        }
        if let Some((head, rest)) = id.split_once(':') {
            let child = self.find_canvas(head, warnings)?;
            return child.find_canvas(rest, warnings);
        }
        if self.get_id() == id {
            return Some(self.clone());
        }
        self.inner
            .borrow()
            .children
            .iter()
            .find(|child| child.get_id() == id)
            .cloned()
    }

    /// Like [`Canvas::find_canvas`], but creates whatever is missing along
    /// the way, reporting each creation into `warnings` instead of failing.
    /// Errs only on ids that cannot name a canvas at all.
    pub fn surefind_canvas(&self, id: &str, warnings: &mut Vec<String>) -> Result<Canvas> {
        if id.is_empty() {
            return Ok(self.clone());
        }
        if let Some(rest) = id.strip_prefix(':') {
            return self.get_root().surefind_canvas(rest, warnings);
        }
        if let Some((file, canvas_id)) = id.split_once('#') {
            let host = self.get_non_inline_ancestor();
            let existing = {
                let key = normalize_path(file);
                host.inner.borrow().externals.get(&key).cloned()
            };
            let external = match existing {
                Some(ext) => ext,
                None => {
                    warnings.push(format!(
                        "external canvas file '{}' is not loaded, creating an empty stand-in",
                        file
                    ));
                    let stand_in = Canvas::create();
                    stand_in.set_file_name(file);
                    host.register_external_canvas(file, stand_in.clone());
                    stand_in
                }
            };
            if canvas_id.is_empty() {
                return Ok(external);
            }
            return external.surefind_canvas(canvas_id, warnings);
        }
        if let Some((head, rest)) = id.split_once(':') {
            let child = self.surefind_canvas(head, warnings)?;
            return child.surefind_canvas(rest, warnings);
        }
        if self.get_id() == id {
            return Ok(self.clone());
        }
        if let Some(child) = self
            .inner
            .borrow()
            .children
            .iter()
            .find(|child| child.get_id() == id)
            .cloned()
        {
            return Ok(child);
        }
        valid_id(id)?;
        warnings.push(format!(
            "canvas '{}' not found in {}, creating",
            id,
            self.get_string()
        ));
        self.new_child_canvas_with_id(id)
            .ok_or_else(|| anyhow!("failed to create child canvas '{}'", id))
    }

    // ========== Externals ==========

    /// Cache an externally loaded canvas under its (normalized) file path.
    /// Inline canvases delegate to their non-inline ancestor. Registering an
    /// already-known path overwrites the entry.
    pub fn register_external_canvas(&self, file: &str, canvas: Canvas) {
        let host = self.get_non_inline_ancestor();
        let key = normalize_path(file);
        debug!("{}: registering external canvas '{}'", host.get_string(), key);
        host.inner.borrow_mut().externals.insert(key, canvas);
    }

    /// Drop one externals cache entry so a later lookup re-resolves it.
    pub fn unregister_external_canvas(&self, file: &str) -> Option<Canvas> {
        let host = self.get_non_inline_ancestor();
        let key = normalize_path(file);
        host.inner.borrow_mut().externals.shift_remove(&key)
    }

    /// Registered external file paths, in registration order.
    pub fn external_files(&self) -> Vec<String> {
        let host = self.get_non_inline_ancestor();
        let files = host.inner.borrow().externals.keys().cloned().collect();
        files
    }

    /// Dotted path that reaches `other` from this canvas: a plain descent
    /// (`"sub:deeper"`) when `other` sits below self, otherwise an absolute
    /// path from the shared root (`":sub"`; `":"` for the root itself).
    /// Fails without producing a partial id when the two canvases do not
    /// share a root.
    pub fn get_relative_id(&self, other: &Canvas) -> Result<String> {
        if self == other {
            return Ok(String::new());
        }
        let mut mine = self.ancestor_chain();
        mine.reverse();
        let mut theirs = other.ancestor_chain();
        theirs.reverse();
        if mine[0] != theirs[0] {
            bail!(
                "{} and {} do not share a root",
                self.get_string(),
                other.get_string()
            );
        }
        let common = mine
            .iter()
            .zip(theirs.iter())
            .take_while(|(a, b)| a == b)
            .count();
        if common == mine.len() {
            let ids: Vec<String> = theirs[common..].iter().map(|c| c.get_id()).collect();
            Ok(ids.join(":"))
        } else {
            let ids: Vec<String> = theirs[1..].iter().map(|c| c.get_id()).collect();
            Ok(format!(":{}", ids.join(":")))
        }
    }

    fn ancestor_chain(&self) -> Vec<Canvas> {
        let mut chain = vec![self.clone()];
        let mut canvas = self.clone();
        while let Some(parent) = canvas.parent() {
            chain.push(parent.clone());
            canvas = parent;
        }
        chain
    }

    // ========== Cloning ==========

    /// Structurally independent deep copy of this canvas subtree.
    ///
    /// Every layer, value node, keyframe and child canvas gets its identity
    /// re-derived by combining with `deriv_guid`: repeating a clone with the
    /// same guid reproduces identical ids, two clones with different guids
    /// never alias. Value-node links inside the subtree are rewritten to the
    /// copies; links escaping the subtree keep pointing at the originals
    /// unless `for_export`, which pulls the referenced nodes into the clone.
    /// The source canvas is never mutated.
    pub fn clone_canvas(&self, deriv_guid: &Guid, for_export: bool) -> Canvas {
        let mut remap = HashMap::new();
        let copy = self.clone_into(deriv_guid, for_export, &mut remap, self);
        if for_export {
            // Escaped-and-copied nodes have no registry yet; flatten them
            // into the exported root.
            let strays: Vec<ValueNode> = remap
                .values()
                .filter(|node| node.is_exported() && node.parent_canvas().is_none())
                .cloned()
                .collect();
            for node in strays {
                let id = node.id();
                if copy.find_value_node_local(&id).is_none() {
                    if let Err(err) = copy.add_value_node(node, &id) {
                        warn!("export flattening: {}", err);
                    }
                }
            }
        }
        copy.clear_dirty();
        copy
    }

    fn clone_into(
        &self,
        deriv_guid: &Guid,
        for_export: bool,
        remap: &mut HashMap<Uuid, ValueNode>,
        subtree_root: &Canvas,
    ) -> Canvas {
        let copy = Canvas::create();
        {
            let src = self.inner.borrow();
            let mut dst = copy.inner.borrow_mut();
            dst.guid = src.guid ^ *deriv_guid;
            dst.id = if src.id.is_empty() {
                String::new()
            } else {
                derive_id(&src.id, &dst.guid)
            };
            dst.name = src.name.clone();
            dst.description = src.description.clone();
            dst.author = src.author.clone();
            dst.version = src.version.clone();
            dst.file_name = src.file_name.clone();
            dst.meta_data = src.meta_data.clone();
            dst.rend_desc = src.rend_desc.clone();
            dst.cur_time = src.cur_time;
            dst.is_inline = src.is_inline;
            // Escaping references stay shared with the originals.
            dst.externals = src.externals.clone();

            let mut keyframes = KeyframeList::new();
            for keyframe in src.keyframes.iter() {
                let mut copy_kf = keyframe.clone();
                copy_kf.uuid = (Guid::from_uuid(keyframe.uuid) ^ *deriv_guid).as_uuid();
                keyframes.add(copy_kf);
            }
            dst.keyframes = keyframes;
        }

        let nodes = self.value_nodes();
        for node in nodes {
            let cloned = node.clone_node(deriv_guid, remap, subtree_root, for_export);
            let id = cloned.id();
            if let Err(err) = copy.add_value_node(cloned, &id) {
                warn!("clone: {}", err);
            }
        }

        for layer in self.layers() {
            let cloned = layer.clone_layer(deriv_guid);
            copy.push_back_simple(cloned.clone());
            copy.hook_layer(&cloned);
        }

        for child in self.children() {
            let cloned_child = child.clone_into(deriv_guid, for_export, remap, subtree_root);
            cloned_child.inner.borrow_mut().parent = Some(copy.downgrade());
            copy.inner.borrow_mut().children.push(cloned_child);
        }

        copy.clear_dirty();
        copy
    }
}

impl PartialEq for Canvas {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Canvas {}

impl fmt::Display for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_string())
    }
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Canvas")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("layers", &inner.layers.len())
            .field("value_nodes", &inner.value_nodes.len())
            .field("children", &inner.children.len())
            .field("inline", &inner.is_inline)
            .finish()
    }
}

/// Scoped batch token from [`Canvas::begin_batch`]. While at least one guard
/// is alive, per-operation changed signals are suppressed; the outermost
/// drop fires one coalesced [`ChangedEvent`] on every exit path.
pub struct BatchGuard {
    canvas: Canvas,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let fire = {
            let mut inner = self.canvas.inner.borrow_mut();
            inner.batch_depth = inner.batch_depth.saturating_sub(1);
            inner.batch_depth == 0 && std::mem::take(&mut inner.batch_changed)
        };
        if fire {
            let guid = self.canvas.guid();
            self.canvas.signals().emit(ChangedEvent { canvas: guid });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::Event;
    use crate::entities::attrs::AttrValue;
    use crate::entities::keys::A_OPACITY;
    use crate::entities::layer::LayerBounds;
    use crate::entities::value_node::ValueKind;
    use std::cell::Cell;

    fn count_events<E: Event + Clone>(canvas: &Canvas) -> (Rc<Cell<usize>>, Connection) {
        let counter = Rc::new(Cell::new(0usize));
        let c = Rc::clone(&counter);
        let conn = canvas.signals().subscribe::<E, _>(move |_| c.set(c.get() + 1));
        (counter, conn)
    }

    fn layer_names(canvas: &Canvas) -> Vec<String> {
        canvas.layers().iter().map(|l| l.name()).collect()
    }

    fn node_ids(canvas: &Canvas) -> Vec<String> {
        let mut ids: Vec<String> = canvas.value_nodes().iter().map(|n| n.id()).collect();
        ids.sort();
        ids
    }

    // ===== layer container =====

    #[test]
    fn test_push_order_erase_and_back() {
        let canvas = Canvas::create();
        let l1 = Layer::new("L1");
        let l2 = Layer::new("L2");
        let l3 = Layer::new("L3");
        l1.add_to_group("solo");

        canvas.push_back(l1.clone());
        canvas.push_back(l2.clone());
        canvas.push_front(l3.clone());

        assert_eq!(layer_names(&canvas), vec!["L3", "L1", "L2"]);
        assert_eq!(canvas.back().unwrap(), l2);
        assert_eq!(canvas.get_depth(&l1), Some(1));

        canvas.erase(&l1);
        assert_eq!(layer_names(&canvas), vec!["L3", "L2"]);
        // The group L1 alone belonged to has no members left.
        assert!(canvas.get_layers_in_group("solo").is_empty());
        assert!(!canvas.get_groups().contains(&"solo".to_string()));
    }

    #[test]
    fn test_size_tracks_inserts_and_removes() {
        let canvas = Canvas::create();
        assert!(canvas.is_empty());

        let layers: Vec<Layer> = (0..5).map(|i| Layer::new(format!("l{}", i))).collect();
        for layer in &layers {
            canvas.push_back(layer.clone());
        }
        assert_eq!(canvas.size(), 5);

        canvas.erase(&layers[1]);
        canvas.erase(&layers[1]); // absent: no-op
        assert_eq!(canvas.size(), 4);

        canvas.insert(99, Layer::new("clamped"));
        assert_eq!(canvas.size(), 5);
        assert_eq!(canvas.back().unwrap().name(), "clamped");
    }

    #[test]
    fn test_find_layer_returns_topmost_hit() {
        let canvas = Canvas::create();
        let bottom = Layer::new("bottom");
        bottom.set_bounds(Some(LayerBounds::new(
            Vec2::new(-2.0, -2.0),
            Vec2::new(2.0, 2.0),
        )));
        let top = Layer::new("top");
        top.set_bounds(Some(LayerBounds::new(
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, 1.0),
        )));

        canvas.push_back(bottom.clone());
        canvas.push_front(top.clone());

        assert_eq!(canvas.find_layer(Vec2::new(0.0, 0.0)).unwrap(), top);
        assert_eq!(canvas.find_layer(Vec2::new(1.5, 1.5)).unwrap(), bottom);
        assert!(canvas.find_layer(Vec2::new(5.0, 5.0)).is_none());
    }

    #[test]
    fn test_clear_coalesces_into_one_changed() {
        let canvas = Canvas::create();
        for i in 0..3 {
            canvas.push_back(Layer::new(format!("l{}", i)));
        }
        let (changed, _conn) = count_events::<ChangedEvent>(&canvas);

        canvas.clear();
        assert!(canvas.is_empty());
        assert_eq!(changed.get(), 1);
        assert_eq!(canvas.get_group_count(), 0);
    }

    // ===== groups =====

    #[test]
    fn test_group_index_is_bidirectionally_consistent() {
        let canvas = Canvas::create();
        let layer = Layer::new("shape");
        layer.add_to_group("g1");
        layer.add_to_group("g2");
        canvas.push_back(layer.clone());

        assert!(canvas.get_layers_in_group("g1").contains(&layer));
        assert!(canvas.get_layers_in_group("g2").contains(&layer));
        assert_eq!(canvas.get_group_count(), 2);

        canvas.erase(&layer);
        assert!(canvas.get_layers_in_group("g1").is_empty());
        assert!(canvas.get_layers_in_group("g2").is_empty());
        assert_eq!(canvas.get_group_count(), 0);
    }

    #[test]
    fn test_membership_changes_after_insert_update_index() {
        let canvas = Canvas::create();
        let layer = Layer::new("shape");
        canvas.push_back(layer.clone());

        let (pair_added, _c1) = count_events::<GroupPairAddedEvent>(&canvas);
        let (group_added, _c2) = count_events::<GroupAddedEvent>(&canvas);

        layer.add_to_group("fx");
        assert!(canvas.get_layers_in_group("fx").contains(&layer));
        assert_eq!(pair_added.get(), 1);
        assert_eq!(group_added.get(), 1);

        let (group_removed, _c3) = count_events::<GroupRemovedEvent>(&canvas);
        layer.remove_from_group("fx");
        assert!(canvas.get_layers_in_group("fx").is_empty());
        assert_eq!(group_removed.get(), 1);
    }

    #[test]
    fn test_rename_group_merges_memberships() {
        let canvas = Canvas::create();
        let a1 = Layer::new("a1");
        a1.add_to_group("a");
        let a2 = Layer::new("a2");
        a2.add_to_group("a");
        let b1 = Layer::new("b1");
        b1.add_to_group("b");
        for layer in [&a1, &a2, &b1] {
            canvas.push_back(layer.clone());
        }

        canvas.rename_group("a", "b");

        let merged = canvas.get_layers_in_group("b");
        assert_eq!(merged.len(), 3);
        assert!(merged.contains(&a1) && merged.contains(&a2) && merged.contains(&b1));
        assert!(!canvas.get_groups().contains(&"a".to_string()));
        // The layers themselves agree with the index.
        assert!(a1.is_in_group("b") && !a1.is_in_group("a"));
    }

    #[test]
    fn test_rename_unknown_group_is_noop() {
        let canvas = Canvas::create();
        canvas.push_back(Layer::new("l"));
        let (changed, _conn) = count_events::<GroupChangedEvent>(&canvas);

        canvas.rename_group("ghost", "anything");
        assert_eq!(changed.get(), 0);
        assert!(canvas.get_groups().is_empty());
    }

    // ===== value nodes =====

    #[test]
    fn test_add_and_find_value_node() {
        let canvas = Canvas::create();
        let node = ValueNode::new(ValueKind::Const, AttrValue::Float(2.0));
        canvas.add_value_node(node.clone(), "x").unwrap();

        assert_eq!(canvas.find_value_node("x").unwrap(), node);
        assert!(node.is_exported());
        assert_eq!(node.parent_canvas().unwrap(), canvas);
        assert!(canvas.find_value_node("y").is_none());
    }

    #[test]
    fn test_add_value_node_collision_has_no_effect() {
        let canvas = Canvas::create();
        let n = ValueNode::new(ValueKind::Const, AttrValue::Float(1.0));
        let m = ValueNode::new(ValueKind::Const, AttrValue::Float(2.0));
        canvas.add_value_node(n.clone(), "x").unwrap();

        assert!(canvas.add_value_node(m.clone(), "x").is_err());
        assert_eq!(canvas.find_value_node("x").unwrap(), n);
        assert!(!m.is_exported());

        // Re-registering the same node under the same id is a no-op.
        assert!(canvas.add_value_node(n.clone(), "x").is_ok());
        assert_eq!(canvas.value_nodes().len(), 1);
    }

    #[test]
    fn test_remove_value_node_by_id_unresolved_is_noop() {
        let canvas = Canvas::create();
        let node = ValueNode::new(ValueKind::Const, AttrValue::Float(1.0));
        canvas.add_value_node(node.clone(), "x").unwrap();

        canvas.remove_value_node_by_id("nope");
        assert_eq!(canvas.value_nodes().len(), 1);

        canvas.remove_value_node_by_id("x");
        assert!(canvas.value_nodes().is_empty());
        assert!(!node.is_exported());
        assert!(node.parent_canvas().is_none());
    }

    #[test]
    fn test_surefind_value_node_creates_placeholder_once() {
        let canvas = Canvas::create();
        let mut warnings = Vec::new();

        let node = canvas.surefind_value_node("radius", &mut warnings).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(node.kind(), ValueKind::Const);

        let again = canvas.surefind_value_node("radius", &mut warnings).unwrap();
        assert_eq!(again, node);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_value_node_signals_are_forwarded() {
        let canvas = Canvas::create();
        let node = ValueNode::new(ValueKind::Composite, AttrValue::default());
        canvas.add_value_node(node.clone(), "comp").unwrap();

        let (changed, _c1) = count_events::<ValueNodeChangedEvent>(&canvas);
        let (child_added, _c2) = count_events::<ValueNodeChildAddedEvent>(&canvas);
        let (renamed, _c3) = count_events::<ValueNodeRenamedEvent>(&canvas);

        node.set_value(AttrValue::Float(4.0));
        assert_eq!(changed.get(), 1);

        node.add_child(ValueNode::new(ValueKind::Const, AttrValue::Float(1.0)));
        assert_eq!(child_added.get(), 1);

        node.set_id("renamed");
        assert_eq!(renamed.get(), 1);
        assert!(canvas.find_value_node("renamed").is_some());
    }

    #[test]
    fn test_pathed_value_node_lookup() {
        let root = Canvas::create();
        let sub = root.new_child_canvas_with_id("sub").unwrap();
        let node = ValueNode::new(ValueKind::Const, AttrValue::Float(7.0));
        sub.add_value_node(node.clone(), "depth").unwrap();

        assert_eq!(root.find_value_node("sub:depth").unwrap(), node);
        assert!(root.find_value_node("missing:depth").is_none());
    }

    // ===== hierarchy =====

    #[test]
    fn test_root_and_inline_ancestry() {
        let root = Canvas::create();
        assert!(root.is_root());
        assert_eq!(root.get_root(), root);

        let child = root.new_child_canvas_with_id("sub").unwrap();
        assert!(!child.is_root());
        assert_eq!(child.get_root(), root);
        assert_eq!(child.parent().unwrap(), root);

        let inline = Canvas::create_inline(&child);
        assert!(inline.is_inline());
        assert_eq!(inline.get_non_inline_ancestor(), child);
        assert_eq!(inline.get_root(), root);

        // Inline canvases inherit the time cursor from the ancestor.
        child.set_time(Time::new(1.5));
        assert_eq!(inline.get_time(), Time::new(1.5));
        inline.set_time(Time::new(3.0));
        assert_eq!(child.get_time(), Time::new(3.0));
    }

    #[test]
    fn test_duplicate_child_id_fails_first_child_survives() {
        let parent = Canvas::create();
        let first = parent.new_child_canvas_with_id("sub").unwrap();
        assert!(parent.new_child_canvas_with_id("sub").is_none());

        let mut warnings = Vec::new();
        assert_eq!(parent.find_canvas("sub", &mut warnings).unwrap(), first);
        assert_eq!(parent.children().len(), 1);
    }

    #[test]
    fn test_generated_child_ids_are_unique() {
        let parent = Canvas::create();
        let a = parent.new_child_canvas();
        let b = parent.new_child_canvas();
        assert_ne!(a.get_id(), b.get_id());
        assert_eq!(parent.children().len(), 2);
    }

    #[test]
    fn test_find_canvas_paths() {
        let root = Canvas::create();
        let sub = root.new_child_canvas_with_id("sub").unwrap();
        let deep = sub.new_child_canvas_with_id("deep").unwrap();

        let mut warnings = Vec::new();
        assert_eq!(root.find_canvas("", &mut warnings).unwrap(), root);
        assert_eq!(root.find_canvas("sub:deep", &mut warnings).unwrap(), deep);
        assert_eq!(deep.find_canvas(":sub", &mut warnings).unwrap(), sub);
        assert!(root.find_canvas("sub:missing", &mut warnings).is_none());
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_surefind_canvas_creates_and_warns_once() {
        let root = Canvas::create();
        let mut warnings = Vec::new();

        let deep = root.surefind_canvas("a:b", &mut warnings).unwrap();
        assert_eq!(warnings.len(), 2); // "a" created, then "b"
        assert_eq!(deep.get_root(), root);
        assert_eq!(deep.parent().unwrap().get_id(), "a");

        let again = root.surefind_canvas("a:b", &mut warnings).unwrap();
        assert_eq!(again, deep);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_add_and_remove_child_canvas() {
        let parent = Canvas::create();
        let detached = Canvas::create();
        let attached = parent.add_child_canvas(detached.clone(), "lib").unwrap();
        assert_eq!(attached.parent().unwrap(), parent);

        // Attaching an already-attached canvas fails.
        assert!(Canvas::create().add_child_canvas(detached.clone(), "x").is_err());

        parent.remove_child_canvas(&detached);
        assert!(detached.is_root());
        assert!(parent.children().is_empty());
    }

    #[test]
    fn test_externals_registry_lives_on_non_inline_host() {
        let root = Canvas::create();
        let library = Canvas::create();
        library.set_file_name("lib/shapes.sif");
        let fig = library.new_child_canvas_with_id("fig").unwrap();

        let inline = Canvas::create_inline(&root);
        inline.register_external_canvas("lib\\shapes.sif", library.clone());

        let mut warnings = Vec::new();
        // Normalized path, resolvable from the host and from the inline canvas.
        assert_eq!(
            root.find_canvas("lib/shapes.sif#", &mut warnings).unwrap(),
            library
        );
        assert_eq!(
            inline
                .find_canvas("lib/shapes.sif#fig", &mut warnings)
                .unwrap(),
            fig
        );
        assert_eq!(root.external_files(), vec!["lib/shapes.sif".to_string()]);

        root.unregister_external_canvas("lib/shapes.sif");
        assert!(root.find_canvas("lib/shapes.sif#", &mut warnings).is_none());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_get_relative_id() {
        let root = Canvas::create();
        let a = root.new_child_canvas_with_id("a").unwrap();
        let b = root.new_child_canvas_with_id("b").unwrap();
        let deep = a.new_child_canvas_with_id("deep").unwrap();

        assert_eq!(root.get_relative_id(&root).unwrap(), "");
        assert_eq!(root.get_relative_id(&deep).unwrap(), "a:deep");
        assert_eq!(a.get_relative_id(&deep).unwrap(), "deep");
        assert_eq!(a.get_relative_id(&b).unwrap(), ":b");
        assert_eq!(deep.get_relative_id(&root).unwrap(), ":");

        let unrelated = Canvas::create();
        assert!(a.get_relative_id(&unrelated).is_err());
    }

    // ===== notifications & dirty state =====

    #[test]
    fn test_batch_coalesces_changed_signals() {
        let canvas = Canvas::create();
        let (changed, _conn) = count_events::<ChangedEvent>(&canvas);

        {
            let _batch = canvas.begin_batch();
            canvas.push_back(Layer::new("a"));
            canvas.push_back(Layer::new("b"));
            canvas.set_meta_data("background", "checkers");
            assert_eq!(changed.get(), 0);
            assert!(canvas.is_dirty());
        }
        assert_eq!(changed.get(), 1);
    }

    #[test]
    fn test_nested_batches_fire_once_at_outermost_exit() {
        let canvas = Canvas::create();
        let (changed, _conn) = count_events::<ChangedEvent>(&canvas);

        {
            let _outer = canvas.begin_batch();
            {
                let _inner = canvas.begin_batch();
                canvas.push_back(Layer::new("a"));
            }
            assert_eq!(changed.get(), 0);
        }
        assert_eq!(changed.get(), 1);
    }

    #[test]
    fn test_erased_layer_no_longer_notifies() {
        let canvas = Canvas::create();
        let layer = Layer::new("shape");
        canvas.push_back(layer.clone());
        canvas.erase(&layer);

        canvas.clear_dirty();
        let (changed, _conn) = count_events::<ChangedEvent>(&canvas);

        layer.set_attr(A_OPACITY, AttrValue::Float(0.1));
        layer.add_to_group("late");
        assert_eq!(changed.get(), 0);
        assert!(!canvas.is_dirty());
        assert!(canvas.get_layers_in_group("late").is_empty());
    }

    #[test]
    fn test_meta_data_signals_and_noops() {
        let canvas = Canvas::create();
        let (meta, _conn) = count_events::<MetaDataChangedEvent>(&canvas);

        canvas.set_meta_data("grid", "on");
        canvas.set_meta_data("grid", "on"); // unchanged: no signal
        assert_eq!(meta.get(), 1);
        assert_eq!(canvas.get_meta_data("grid").unwrap(), "on");

        canvas.erase_meta_data("ghost"); // absent: no signal
        assert_eq!(meta.get(), 1);

        canvas.erase_meta_data("grid");
        assert_eq!(meta.get(), 2);
        assert!(canvas.get_meta_data_keys().is_empty());
    }

    #[test]
    fn test_rend_desc_change_signal() {
        let canvas = Canvas::create();
        let (rend, _conn) = count_events::<RendDescChangedEvent>(&canvas);

        let mut desc = canvas.rend_desc();
        canvas.set_rend_desc(desc.clone()); // unchanged: no signal
        assert_eq!(rend.get(), 0);

        desc.width = 1920;
        desc.height = 1080;
        canvas.set_rend_desc(desc);
        assert_eq!(rend.get(), 1);
        assert_eq!(canvas.rend_desc().width, 1920);
    }

    #[test]
    fn test_id_change_signal_and_validation() {
        let canvas = Canvas::create();
        let (ids, _conn) = count_events::<IdChangedEvent>(&canvas);

        canvas.set_id("main").unwrap();
        assert_eq!(ids.get(), 1);
        assert!(canvas.set_id("bad:id").is_err());
        assert!(canvas.set_id("").is_err());
        assert_eq!(canvas.get_id(), "main");
    }

    #[test]
    fn test_file_name_and_path() {
        let canvas = Canvas::create();
        let (names, _conn) = count_events::<FileNameChangedEvent>(&canvas);

        canvas.set_file_name("projects\\demo\\walk.sif");
        assert_eq!(names.get(), 1);
        assert_eq!(canvas.get_file_name(), "projects/demo/walk.sif");
        assert_eq!(canvas.get_file_path(), "projects/demo");

        canvas.set_file_name("projects/demo/walk.sif"); // unchanged: no signal
        assert_eq!(names.get(), 1);
    }

    // ===== cloning =====

    fn build_clone_fixture() -> Canvas {
        let canvas = Canvas::create();
        canvas.set_id("scene").unwrap();

        let radius = ValueNode::new(ValueKind::Const, AttrValue::Float(1.0));
        canvas.add_value_node(radius.clone(), "radius").unwrap();
        let outline = ValueNode::new(ValueKind::Composite, AttrValue::default());
        outline.add_child(radius);
        canvas.add_value_node(outline, "outline").unwrap();

        let shape = Layer::new("shape");
        shape.add_to_group("figures");
        canvas.push_back(shape);
        canvas.push_back(Layer::new("background"));

        let sub = canvas.new_child_canvas_with_id("sub").unwrap();
        let depth = ValueNode::new(ValueKind::Const, AttrValue::Float(9.0));
        sub.add_value_node(depth, "depth").unwrap();

        canvas.clear_dirty();
        canvas
    }

    #[test]
    fn test_clone_identity_derivation_properties() {
        let canvas = build_clone_fixture();
        let g1 = Guid::new();
        let g2 = Guid::new();

        let clone_a = canvas.clone_canvas(&g1, false);
        let clone_b = canvas.clone_canvas(&g1, false);
        let clone_c = canvas.clone_canvas(&g2, false);

        // Same guid twice: identical id sets. Different guid: disjoint.
        assert_eq!(node_ids(&clone_a), node_ids(&clone_b));
        let ids_a = node_ids(&clone_a);
        let ids_c = node_ids(&clone_c);
        assert!(ids_a.iter().all(|id| !ids_c.contains(id)));
        // And neither collides with the source.
        let src_ids = node_ids(&canvas);
        assert!(ids_a.iter().all(|id| !src_ids.contains(id)));

        // Layer identities follow the same rule.
        let uuids_a: Vec<Uuid> = clone_a.layers().iter().map(|l| l.uuid()).collect();
        let uuids_b: Vec<Uuid> = clone_b.layers().iter().map(|l| l.uuid()).collect();
        let uuids_c: Vec<Uuid> = clone_c.layers().iter().map(|l| l.uuid()).collect();
        assert_eq!(uuids_a, uuids_b);
        assert!(uuids_a.iter().all(|u| !uuids_c.contains(u)));
    }

    #[test]
    fn test_clone_is_deep_and_consistent() {
        let canvas = build_clone_fixture();
        let copy = canvas.clone_canvas(&Guid::new(), false);

        assert_eq!(copy.size(), canvas.size());
        assert_eq!(copy.children().len(), 1);
        assert!(copy.is_root());
        assert!(!copy.is_dirty());

        // Group index was rebuilt for the copied layers.
        let figures = copy.get_layers_in_group("figures");
        assert_eq!(figures.len(), 1);
        assert!(figures[0] != canvas.get_layers_in_group("figures")[0]);

        // Mutating the copy leaves the source alone.
        copy.push_back(Layer::new("extra"));
        assert_eq!(canvas.size(), 2);
        assert!(!canvas.is_dirty());
    }

    #[test]
    fn test_clone_rewrites_intra_subtree_references() {
        let canvas = build_clone_fixture();
        let copy = canvas.clone_canvas(&Guid::new(), false);

        let outline_copy = copy
            .value_nodes()
            .into_iter()
            .find(|n| n.kind() == ValueKind::Composite)
            .unwrap();
        let radius_copy = copy
            .value_nodes()
            .into_iter()
            .find(|n| n.kind() == ValueKind::Const)
            .unwrap();
        let original_radius = canvas.find_value_node("radius").unwrap();

        let children = outline_copy.children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0], radius_copy);
        assert!(children[0] != original_radius);
    }

    #[test]
    fn test_clone_escaping_references() {
        let root = Canvas::create();
        let shared = ValueNode::new(ValueKind::Const, AttrValue::Float(5.0));
        root.add_value_node(shared.clone(), "shared").unwrap();

        let sub = root.new_child_canvas_with_id("sub").unwrap();
        let comp = ValueNode::new(ValueKind::Composite, AttrValue::default());
        comp.add_child(shared.clone());
        sub.add_value_node(comp, "comp").unwrap();

        // Plain clone of the sub-canvas: the reference escapes its subtree
        // and stays pointing at the original.
        let plain = sub.clone_canvas(&Guid::new(), false);
        let comp_copy = plain
            .value_nodes()
            .into_iter()
            .find(|n| n.kind() == ValueKind::Composite)
            .unwrap();
        assert_eq!(comp_copy.children()[0], shared);

        // Export clone: the escaping reference is pulled into the clone and
        // registered there.
        let exported = sub.clone_canvas(&Guid::new(), true);
        let comp_exported = exported
            .value_nodes()
            .into_iter()
            .find(|n| n.kind() == ValueKind::Composite)
            .unwrap();
        let pulled = comp_exported.children()[0].clone();
        assert!(pulled != shared);
        assert!(pulled.is_exported());
        assert_eq!(exported.find_value_node(&pulled.id()).unwrap(), pulled);
    }

    #[test]
    fn test_clone_keyframes_and_metadata() {
        let canvas = Canvas::create();
        canvas.set_meta_data("background", "checkers");
        let kf = Keyframe::new(Time::new(1.0), "start");
        let original_uuid = kf.uuid;
        canvas.add_keyframe(kf);

        let copy = canvas.clone_canvas(&Guid::new(), false);
        assert_eq!(copy.get_meta_data("background").unwrap(), "checkers");
        assert_eq!(copy.keyframes().len(), 1);
        let copied = copy.keyframes().iter().next().unwrap().clone();
        assert_eq!(copied.time, Time::new(1.0));
        assert_ne!(copied.uuid, original_uuid);
    }

    // ===== keyframes on the canvas =====

    #[test]
    fn test_keyframe_edits_mark_dirty() {
        let canvas = Canvas::create();
        let kf = Keyframe::new(Time::new(2.0), "beat");
        let uuid = kf.uuid;

        canvas.add_keyframe(kf);
        assert!(canvas.is_dirty());

        canvas.clear_dirty();
        assert!(canvas.remove_keyframe(uuid).is_some());
        assert!(canvas.is_dirty());

        canvas.clear_dirty();
        assert!(canvas.remove_keyframe(uuid).is_none());
        assert!(!canvas.is_dirty());
    }

    // ===== bones =====

    #[test]
    fn test_get_bone_map_delegates() {
        let canvas = Canvas::create();
        let bone = ValueNode::new(ValueKind::Bone, AttrValue::default());
        canvas.add_value_node(bone.clone(), "spine").unwrap();
        canvas
            .add_value_node(ValueNode::new(ValueKind::Const, AttrValue::Float(0.0)), "x")
            .unwrap();

        let map = canvas.get_bone_map();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&bone.uuid()).unwrap(), &bone);
    }
}
