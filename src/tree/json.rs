//! Namespace JSON projection and ingest (§6 "Namespace JSON").
//!
//! Grounded on the teacher's `oscquery_types.rs` (`OSCNode`'s manual
//! `Serialize`, which walks `CONTENTS` the same way) and on
//! `original_source/source/oscquery/node.cpp`'s `toJSON`/`fromJSON`. The
//! teacher's version is a flat, server-only struct with a fixed field
//! set; this one projects straight off [`Node`]/[`Tree`] and round-trips
//! through [`Tree::update`] for the client-side mirror.

use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};
use crate::value::{Type, Value};

use super::node::{Access, Clipmode, Node, Range};
use super::{NodeId, Tree, TreeEvent};

impl Tree {
    /// Build the namespace JSON for the node at `path`, recursing into
    /// `CONTENTS` (§6). `None` if no node exists at `path`. When
    /// `attribute` is given (`"VALUE"`, `"TYPE"`, `"RANGE"`, ...),
    /// projects just that key out of the node's JSON instead of
    /// returning the whole object — the HTTP attribute-query surface of
    /// §4.5 (`GET /path?VALUE`). `None` if the node has no such key.
    pub fn query(&self, path: &str, attribute: Option<&str>) -> Option<Json> {
        let id = self.find(path)?;
        let json = node_json(self, id);
        match attribute {
            Some(attr) => json.get(attr).cloned(),
            None => Some(json),
        }
    }

    /// Apply a namespace JSON object at `path`, creating the node (and any
    /// missing ancestors) if needed, then recursing into `CONTENTS` to
    /// build descendants (§3: `update(json)`). Used to populate a
    /// client-side mirror tree from a server push.
    pub fn update(&mut self, path: &str, json: &Json) -> Result<Vec<TreeEvent>> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::MalformedJson("node JSON must be an object".to_string()))?;
        let (id, mut events) = self.find_or_create(path);

        if let Some(n) = obj.get("ACCESS").and_then(Json::as_u64) {
            self.node_mut(id).unwrap().access = access_from_u8(n as u8);
        }
        if let Some(tag) = obj.get("TYPE").and_then(Json::as_str) {
            self.node_mut(id).unwrap().node_type = type_from_osc_tag(tag);
        }
        if let Some(value_json) = obj.get("VALUE") {
            let ty = self.node(id).unwrap().node_type;
            let value = Value::from_json_array(value_json, ty)?;
            events.extend(self.set_value_quiet(id, value)?);
        }
        if let Some(critical) = obj.get("CRITICAL").and_then(Json::as_bool) {
            self.node_mut(id).unwrap().critical = critical;
        }
        if let Some(ext) = obj.get("EXTENDED_TYPE").and_then(Json::as_str) {
            self.node_mut(id).unwrap().extended_type = Some(ext.to_string());
        }
        if let Some(desc) = obj.get("DESCRIPTION").and_then(Json::as_str) {
            self.node_mut(id).unwrap().description = desc.to_string();
        }
        if let Some(tags) = obj.get("TAGS").and_then(Json::as_array) {
            self.node_mut(id).unwrap().tags = tags
                .iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect();
        }
        if let Some(unit) = obj.get("UNIT").and_then(Json::as_str) {
            self.node_mut(id).unwrap().unit = unit.parse().ok();
        }
        if let Some(range_json) = obj.get("RANGE").and_then(Json::as_object) {
            self.node_mut(id).unwrap().range = range_from_json(range_json)?;
        }
        if let Some(contents) = obj.get("CONTENTS").and_then(Json::as_object) {
            for (name, child_json) in contents {
                let child_path = if path == "/" {
                    format!("/{name}")
                } else {
                    format!("{path}/{name}")
                };
                events.extend(self.update(&child_path, child_json)?);
            }
        }
        Ok(events)
    }
}

fn node_json(tree: &Tree, id: NodeId) -> Json {
    let node = tree.node(id).expect("caller holds a valid id");
    let mut map = Map::new();
    map.insert("FULL_PATH".to_string(), Json::String(node.path.clone()));

    if node.is_root() {
        map.insert("CONTENTS".to_string(), contents_json(tree, node));
        return Json::Object(map);
    }

    map.insert("ACCESS".to_string(), Json::from(node.access as u8));
    map.insert("TYPE".to_string(), Json::String(node.value.osc_type_tag()));
    map.insert("VALUE".to_string(), node.value.to_json_array());
    map.insert("CRITICAL".to_string(), Json::Bool(node.critical));

    if let Some(ext) = &node.extended_type {
        map.insert("EXTENDED_TYPE".to_string(), Json::String(ext.clone()));
    }
    if !node.description.is_empty() {
        map.insert(
            "DESCRIPTION".to_string(),
            Json::String(node.description.clone()),
        );
    }
    if !node.tags.is_empty() {
        map.insert(
            "TAGS".to_string(),
            Json::Array(node.tags.iter().cloned().map(Json::String).collect()),
        );
    }
    if has_range(&node.range) {
        map.insert("RANGE".to_string(), range_json(&node.range));
    }
    if let Some(unit) = &node.unit {
        map.insert("UNIT".to_string(), Json::String(unit.to_string()));
    }
    if !matches!(node.clipmode, Clipmode::None) {
        map.insert("CLIPMODE".to_string(), Json::from(node.clipmode as u8));
    }
    if node.nsubnodes() > 0 {
        map.insert("CONTENTS".to_string(), contents_json(tree, node));
    }
    Json::Object(map)
}

fn contents_json(tree: &Tree, node: &Node) -> Json {
    let mut map = Map::new();
    for (name, child_id) in &node.children {
        map.insert(name.clone(), node_json(tree, *child_id));
    }
    Json::Object(map)
}

fn has_range(range: &Range) -> bool {
    range.min.is_some() || range.max.is_some() || !range.vals.is_empty()
}

fn range_json(range: &Range) -> Json {
    let mut map = Map::new();
    if let Some(min) = range.min {
        map.insert("MIN".to_string(), Json::from(min));
    }
    if let Some(max) = range.max {
        map.insert("MAX".to_string(), Json::from(max));
    }
    if !range.vals.is_empty() {
        map.insert(
            "VALS".to_string(),
            Json::Array(range.vals.iter().map(Value::to_json_array).collect()),
        );
    }
    Json::Object(map)
}

fn range_from_json(obj: &Map<String, Json>) -> Result<Range> {
    Ok(Range {
        min: obj.get("MIN").and_then(Json::as_f64).map(|f| f as f32),
        max: obj.get("MAX").and_then(Json::as_f64).map(|f| f as f32),
        vals: obj
            .get("VALS")
            .and_then(Json::as_array)
            .map(|vals| {
                vals.iter()
                    .map(|v| Value::from_json_array(v, Type::Float))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default(),
    })
}

fn access_from_u8(v: u8) -> Access {
    match v {
        1 => Access::Read,
        2 => Access::Write,
        3 => Access::ReadWrite,
        _ => Access::None,
    }
}

fn type_from_osc_tag(tag: &str) -> Type {
    match tag {
        "" => Type::None,
        "T" | "F" => Type::Bool,
        "i" => Type::Int,
        "f" => Type::Float,
        "s" => Type::String,
        "c" => Type::Char,
        "I" => Type::Impulse,
        "ff" => Type::Vec2f,
        "fff" => Type::Vec3f,
        "ffff" => Type::Vec4f,
        _ => Type::List,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_get_matches_sample_shape() {
        let mut tree = Tree::new();
        let (a, _) = tree.find_or_create("/a");
        tree.node_mut(a).unwrap().node_type = Type::Float;
        tree.set_value(a, Value::Float(0.5)).unwrap();

        let (b, _) = tree.find_or_create("/a/b");
        tree.node_mut(b).unwrap().node_type = Type::Int;
        tree.set_value(b, Value::Int(7)).unwrap();

        let root_json = tree.query("/", None).unwrap();
        assert_eq!(root_json["FULL_PATH"], "/");
        assert!(root_json.get("TYPE").is_none());

        let a_json = &root_json["CONTENTS"]["a"];
        assert_eq!(a_json["FULL_PATH"], "/a");
        assert_eq!(a_json["TYPE"], "f");
        assert_eq!(a_json["VALUE"], serde_json::json!([0.5]));
        assert_eq!(a_json["CONTENTS"]["b"]["TYPE"], "i");
        assert_eq!(a_json["CONTENTS"]["b"]["VALUE"], serde_json::json!([7]));
    }

    #[test]
    fn query_missing_path_is_none() {
        let tree = Tree::new();
        assert!(tree.query("/nope", None).is_none());
    }

    #[test]
    fn query_with_attribute_projects_a_single_key() {
        let mut tree = Tree::new();
        let (a, _) = tree.find_or_create("/a");
        tree.node_mut(a).unwrap().node_type = Type::Float;
        tree.set_value(a, Value::Float(0.5)).unwrap();

        assert_eq!(
            tree.query("/a", Some("VALUE")).unwrap(),
            serde_json::json!([0.5])
        );
        assert_eq!(tree.query("/a", Some("TYPE")).unwrap(), "f");
        assert!(tree.query("/a", Some("RANGE")).is_none());
        assert!(tree.query("/nope", Some("VALUE")).is_none());
    }

    #[test]
    fn update_builds_mirror_recursively() {
        let mut mirror = Tree::new();
        let json = serde_json::json!({
            "FULL_PATH": "/",
            "CONTENTS": {
                "a": {
                    "FULL_PATH": "/a",
                    "ACCESS": 1,
                    "TYPE": "f",
                    "VALUE": [0.5],
                    "CRITICAL": false
                }
            }
        });
        mirror.update("/", &json).unwrap();
        let a = mirror.find("/a").unwrap();
        let node = mirror.node(a).unwrap();
        assert_eq!(node.node_type, Type::Float);
        assert_eq!(node.value, Value::Float(0.5));
        assert_eq!(node.access, Access::Read);
    }

    #[test]
    fn round_trip_query_then_update_preserves_values() {
        let mut source = Tree::new();
        let (id, _) = source.find_or_create("/x");
        source.node_mut(id).unwrap().node_type = Type::String;
        source.node_mut(id).unwrap().description = "a knob".to_string();
        source.set_value(id, Value::String("hi".into())).unwrap();

        let json = source.query("/", None).unwrap();

        let mut mirror = Tree::new();
        mirror.update("/", &json).unwrap();
        let mirrored = mirror.node(mirror.find("/x").unwrap()).unwrap();
        assert_eq!(mirrored.value, Value::String("hi".into()));
        assert_eq!(mirrored.description, "a knob");
    }
}
