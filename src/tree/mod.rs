//! The parameter tree (§3 "Tree", §4.2).
//!
//! Grounded on the teacher's `OSCNode::add_recursion`/`get` (descend a
//! `/`-split path, auto-creating missing segments) and on
//! `original_source/source/oscquery/tree.cpp`/`node.cpp`
//! (`createSubnode`/`removeSubnode`/`collect`). Nodes live in an arena
//! (`Vec<Option<Node>>`) indexed by [`NodeId`]; a node never holds a raw
//! pointer back to its parent (§9 "Cyclic parent/child").

mod json;
mod node;

pub use node::{Access, Clipmode, Node, Range};

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::session::SessionId;
use crate::value::{Type, Value};

/// An index into a [`Tree`]'s arena. Stable for the node's lifetime; a
/// removed node's id is never reused while any sibling still references
/// it, because the slot is simply left vacant until the tree is dropped
/// or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);
}

/// Observable effects of a tree mutation, for the dispatcher to turn into
/// network fan-out (§4.5, §5 ordering guarantees). The tree itself never
/// touches a socket.
#[derive(Debug, Clone)]
pub enum TreeEvent {
    NodeAdded { id: NodeId, path: String },
    NodeRemoved { path: String },
    /// §4.2 `link`: atomic remove-then-add as observed by subscribers.
    NodeReplaced { id: NodeId, path: String },
    ValueReceived { id: NodeId, path: String, value: Value },
    ValueChanged { id: NodeId, path: String, value: Value, quiet: bool },
}

pub struct Tree {
    arena: Vec<Option<Node>>,
    free: Vec<usize>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            arena: vec![Some(Node::new_root())],
            free: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.arena.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.arena.get_mut(id.0).and_then(|s| s.as_mut())
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(idx) = self.free.pop() {
            self.arena[idx] = Some(node);
            NodeId(idx)
        } else {
            let idx = self.arena.len();
            self.arena.push(Some(node));
            NodeId(idx)
        }
    }

    fn split_path(path: &str) -> VecDeque<String> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `parent_path(p)` — everything before the final `/`; root for a
    /// top-level path (§4.2).
    pub fn parent_path(path: &str) -> String {
        match path.trim_end_matches('/').rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        }
    }

    /// `find(path) -> Node?` (§4.2). Case-sensitive descent; `""`/`"/"`
    /// is root.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut segments = Self::split_path(path);
        let mut current = self.root();
        while let Some(name) = segments.pop_front() {
            current = self.node(current)?.child_id(&name)?;
        }
        Some(current)
    }

    /// `find_or_create(path) -> Node` (§4.2). Missing segments are
    /// inserted as `None`-typed nodes. Returns the leaf id plus the
    /// `NodeAdded` events for every segment that had to be created, in
    /// tree order (parent before child, per §3 invariant).
    pub fn find_or_create(&mut self, path: &str) -> (NodeId, Vec<TreeEvent>) {
        let mut segments = Self::split_path(path);
        let mut current = self.root();
        let mut events = Vec::new();
        while let Some(name) = segments.pop_front() {
            if let Some(existing) = self.node(current).and_then(|n| n.child_id(&name)) {
                current = existing;
                continue;
            }
            let child_path = format!("{}/{}", current_path_prefix(self.node(current).unwrap()), name);
            let new_id = self.alloc(Node::new_child(NodeId(self.arena.len()), current, &name, child_path.clone()));
            // `new_child` above captured an id before `alloc` assigned the
            // real one when a free slot was reused; fix it up now.
            self.node_mut(new_id).unwrap().id = new_id;
            self.node_mut(current).unwrap().children.push((name, new_id));
            events.push(TreeEvent::NodeAdded {
                id: new_id,
                path: child_path,
            });
            current = new_id;
        }
        (current, events)
    }

    /// `link(node)` (§4.2): insert a fully-formed node at `path`. If a
    /// node already exists there, the new node adopts its children, the
    /// old node is detached and destroyed, and a single `NodeReplaced`
    /// event fires instead of remove-then-add.
    pub fn link(&mut self, path: &str, mut data: Node) -> (NodeId, Vec<TreeEvent>) {
        let parent_path = Self::parent_path(path);
        let name = path.rsplit('/').next().unwrap_or("").to_string();
        let (parent_id, mut events) = if parent_path == "/" {
            (self.root(), Vec::new())
        } else {
            self.find_or_create(&parent_path)
        };

        data.path = path.to_string();
        data.name = name.clone();

        if let Some(existing_id) = self.node(parent_id).and_then(|n| n.child_id(&name)) {
            let children = self.node(existing_id).unwrap().children.clone();
            let listeners = self.node(existing_id).unwrap().listeners.clone();
            data.parent = Some(parent_id);
            let new_id = existing_id;
            data.id = new_id;
            data.children = children;
            data.listeners = listeners;
            // Re-parent adopted children onto the same id (path/parent
            // pointer are unaffected since the id is reused in place).
            self.arena[new_id.0] = Some(data);
            events.push(TreeEvent::NodeReplaced {
                id: new_id,
                path: path.to_string(),
            });
            (new_id, events)
        } else {
            data.parent = Some(parent_id);
            let new_id = self.alloc(data);
            self.node_mut(new_id).unwrap().id = new_id;
            self.node_mut(parent_id).unwrap().children.push((name, new_id));
            events.push(TreeEvent::NodeAdded {
                id: new_id,
                path: path.to_string(),
            });
            (new_id, events)
        }
    }

    /// Remove the node at `path` and its entire subtree. Emits
    /// `NodeRemoved` in reverse tree order (children before parents, per
    /// §3 invariant) — equivalent to §9's `clear_subnodes` definition
    /// applied recursively.
    pub fn remove(&mut self, path: &str) -> Vec<TreeEvent> {
        let Some(id) = self.find(path) else {
            return Vec::new();
        };
        let mut events = Vec::new();
        self.remove_recursive(id, &mut events);

        let parent_path = Self::parent_path(path);
        if let Some(parent_id) = self.find(&parent_path) {
            if let Some(parent) = self.node_mut(parent_id) {
                parent.children.retain(|(_, child)| *child != id);
            }
        }
        events
    }

    fn remove_recursive(&mut self, id: NodeId, events: &mut Vec<TreeEvent>) {
        let children = self.node(id).map(|n| n.children.clone()).unwrap_or_default();
        for (_, child_id) in children {
            self.remove_recursive(child_id, events);
        }
        if let Some(node) = self.arena.get_mut(id.0).and_then(|s| s.take()) {
            events.push(TreeEvent::NodeRemoved { path: node.path });
            self.free.push(id.0);
        }
    }

    /// `set_value(v)` (§4.3): always emits `ValueReceived`; if the
    /// coerced value differs from the current one, updates and emits
    /// `ValueChanged { quiet: false }` so the caller pushes to
    /// subscribers.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<Vec<TreeEvent>> {
        self.set_value_impl(id, value, false)
    }

    /// `set_value_quiet(v)` (§4.3): same coercion/update semantics, but
    /// the emitted `ValueChanged` is marked `quiet: true` so the
    /// dispatcher does not echo it back to subscribers (used when the
    /// value arrived *from* one of them).
    pub fn set_value_quiet(&mut self, id: NodeId, value: Value) -> Result<Vec<TreeEvent>> {
        self.set_value_impl(id, value, true)
    }

    fn set_value_impl(&mut self, id: NodeId, value: Value, quiet: bool) -> Result<Vec<TreeEvent>> {
        let node = self
            .node(id)
            .ok_or_else(|| Error::UnknownAddress(format!("node id {:?}", id)))?;
        let path = node.path.clone();
        let target_type = node.node_type;
        let coerced = value.coerce(target_type)?;

        let mut events = vec![TreeEvent::ValueReceived {
            id,
            path: path.clone(),
            value: coerced.clone(),
        }];

        let node = self.node_mut(id).unwrap();
        if node.value != coerced {
            node.value = coerced.clone();
            events.push(TreeEvent::ValueChanged {
                id,
                path,
                value: coerced,
                quiet,
            });
        }
        Ok(events)
    }

    /// `collect(name_or_pattern, bucket)` (§4.3): depth-first walk
    /// collecting nodes whose name exactly matches.
    pub fn collect(&self, start: NodeId, name: &str, bucket: &mut Vec<NodeId>) {
        let Some(node) = self.node(start) else { return };
        if node.name == name {
            bucket.push(start);
        }
        for (_, child_id) in &node.children {
            self.collect(*child_id, name, bucket);
        }
    }
}

fn current_path_prefix(node: &Node) -> String {
    if node.path == "/" {
        String::new()
    } else {
        node.path.clone()
    }
}

/// The process-wide singleton tree (§3, §9): used only by factory paths
/// that cannot receive an explicit tree handle. Everything reachable
/// through the public API takes an explicit `&mut Tree` instead.
static SINGLETON: OnceLock<Mutex<Tree>> = OnceLock::new();

pub fn singleton() -> &'static Mutex<Tree> {
    SINGLETON.get_or_init(|| Mutex::new(Tree::new()))
}

/// Re-exported so callers building nodes don't need `crate::session`.
pub type Listener = SessionId;
pub use crate::value::Type as NodeType;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_create_is_idempotent() {
        let mut tree = Tree::new();
        let (id1, events1) = tree.find_or_create("/a/b/c");
        assert_eq!(events1.len(), 3);
        let (id2, events2) = tree.find_or_create("/a/b/c");
        assert_eq!(id1, id2);
        assert!(events2.is_empty());
    }

    #[test]
    fn find_or_create_fires_events_parent_before_child() {
        let mut tree = Tree::new();
        let (_, events) = tree.find_or_create("/a/b");
        let paths: Vec<_> = events
            .iter()
            .map(|e| match e {
                TreeEvent::NodeAdded { path, .. } => path.clone(),
                _ => panic!("unexpected event"),
            })
            .collect();
        assert_eq!(paths, vec!["/a".to_string(), "/a/b".to_string()]);
    }

    #[test]
    fn find_missing_segment_is_none() {
        let mut tree = Tree::new();
        tree.find_or_create("/a/b");
        assert!(tree.find("/a/x").is_none());
        assert!(tree.find("/a/b").is_some());
        assert!(tree.find("/").is_some());
    }

    #[test]
    fn remove_fires_reverse_order_and_parent_loses_child() {
        let mut tree = Tree::new();
        tree.find_or_create("/a/b/c");
        let events = tree.remove("/a/b");
        let paths: Vec<_> = events
            .iter()
            .map(|e| match e {
                TreeEvent::NodeRemoved { path } => path.clone(),
                _ => panic!("unexpected event"),
            })
            .collect();
        assert_eq!(paths, vec!["/a/b/c".to_string(), "/a/b".to_string()]);
        assert!(tree.find("/a/b").is_none());
        let a = tree.find("/a").unwrap();
        assert_eq!(tree.node(a).unwrap().nsubnodes(), 0);
    }

    #[test]
    fn link_over_existing_node_preserves_children_and_emits_replaced() {
        let mut tree = Tree::new();
        let (_, _) = tree.find_or_create("/a/b");
        let (_, _) = tree.find_or_create("/a/b/c");

        let replacement = Node::new_child(NodeId::ROOT, tree.root(), "b", "/a/b".to_string());
        let (new_id, events) = tree.link("/a/b", replacement);
        assert!(matches!(events.last().unwrap(), TreeEvent::NodeReplaced { .. }));
        assert_eq!(tree.node(new_id).unwrap().nsubnodes(), 1);
        assert!(tree.find("/a/b/c").is_some());
    }

    #[test]
    fn set_value_received_always_changed_only_when_different() {
        let mut tree = Tree::new();
        let (id, _) = tree.find_or_create("/a");
        tree.node_mut(id).unwrap().node_type = Type::Int;

        let events = tree.set_value(id, Value::Int(1)).unwrap();
        assert!(matches!(events[0], TreeEvent::ValueReceived { .. }));
        assert!(matches!(events[1], TreeEvent::ValueChanged { quiet: false, .. }));

        let events_again = tree.set_value(id, Value::Int(1)).unwrap();
        assert_eq!(events_again.len(), 1);
    }

    #[test]
    fn set_value_quiet_marks_event_quiet() {
        let mut tree = Tree::new();
        let (id, _) = tree.find_or_create("/a");
        tree.node_mut(id).unwrap().node_type = Type::Int;
        let events = tree.set_value_quiet(id, Value::Int(5)).unwrap();
        assert!(matches!(events[1], TreeEvent::ValueChanged { quiet: true, .. }));
    }

    #[test]
    fn collect_finds_all_nodes_by_exact_name() {
        let mut tree = Tree::new();
        tree.find_or_create("/a/x");
        tree.find_or_create("/b/x");
        let mut bucket = Vec::new();
        tree.collect(tree.root(), "x", &mut bucket);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn parent_path_operations() {
        assert_eq!(Tree::parent_path("/a/b/c"), "/a/b");
        assert_eq!(Tree::parent_path("/a"), "/");
        assert_eq!(Tree::parent_path("/"), "/");
    }
}
