//! A single addressable entry in the tree (§3 "Node", §4.3).
//!
//! Grounded on `original_source/source/oscquery/node.hpp`'s `Attributes`
//! struct and `Type::Values`/`Access::Values`/`Clipmode::Values` enums,
//! and on the teacher's `OSCAccess`/`OscRangeBounds`. The source models
//! the tree as `QObject`s with raw parent back-pointers; per §9's "Cyclic
//! parent/child" redesign note this crate keeps nodes in the arena owned
//! by [`crate::tree::Tree`] and never stores a parent pointer directly —
//! see [`crate::tree::NodeId`].

use std::collections::HashSet;

use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::session::SessionId;
use crate::tree::NodeId;
use crate::value::{Type, Value};

/// §3: `None|Read|Write|RW`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Access {
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

/// §3: `None|Low|High|Both`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Clipmode {
    None = 0,
    Low = 1,
    High = 2,
    Both = 3,
}

/// §3 `range`: `{min, max, vals}`. `vals` is the source's `QVariantList`
/// of discrete allowed values, dropped to a stub by the distilled spec's
/// three-field summary and restored here per `SPEC_FULL.md` §3.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Range {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub vals: Vec<Value>,
}

/// One entry in the parameter tree.
#[derive(Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub name: String,
    pub path: String,
    pub node_type: Type,
    pub access: Access,
    pub value: Value,
    pub default_value: Value,
    pub range: Range,
    pub description: String,
    pub tags: Vec<String>,
    pub critical: bool,
    pub clipmode: Clipmode,
    pub extended_type: Option<String>,
    /// Unit of the value, kept from the teacher's `oscunit` module
    /// (§3 "extension attributes").
    pub unit: Option<crate::unit::OscUnit>,
    /// Insertion-ordered children; order is the enumeration order (§3).
    pub(crate) children: Vec<(String, NodeId)>,
    /// Sessions individually subscribed to this exact path (§4.3).
    pub(crate) listeners: HashSet<SessionId>,
}

impl Node {
    pub(crate) fn new_root() -> Self {
        Node {
            id: NodeId::ROOT,
            parent: None,
            name: String::new(),
            path: "/".to_string(),
            node_type: Type::None,
            access: Access::None,
            value: Value::None,
            default_value: Value::None,
            range: Range::default(),
            description: String::new(),
            tags: Vec::new(),
            critical: false,
            clipmode: Clipmode::None,
            extended_type: Some("folder".to_string()),
            unit: None,
            children: Vec::new(),
            listeners: HashSet::new(),
        }
    }

    pub(crate) fn new_child(id: NodeId, parent: NodeId, name: &str, path: String) -> Self {
        Node {
            id,
            parent: Some(parent),
            name: name.to_string(),
            path,
            node_type: Type::None,
            access: Access::None,
            value: Value::None,
            default_value: Value::None,
            range: Range::default(),
            description: String::new(),
            tags: Vec::new(),
            critical: false,
            clipmode: Clipmode::None,
            extended_type: None,
            unit: None,
            children: Vec::new(),
            listeners: HashSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    pub fn child_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(name, _)| name.as_str())
    }

    pub fn child_id(&self, name: &str) -> Option<NodeId> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn child_at(&self, index: usize) -> Option<NodeId> {
        self.children.get(index).map(|(_, id)| *id)
    }

    pub fn nsubnodes(&self) -> usize {
        self.children.len()
    }

    pub fn has_listener(&self, session: SessionId) -> bool {
        self.listeners.contains(&session)
    }

    pub(crate) fn add_listener(&mut self, session: SessionId) {
        self.listeners.insert(session);
    }

    pub(crate) fn remove_listener(&mut self, session: SessionId) {
        self.listeners.remove(&session);
    }

    pub fn listeners(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.listeners.iter().copied()
    }
}
