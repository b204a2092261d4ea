//! Dynamically-typed node values and the OSCQuery `Type` enumeration.
//!
//! Grounded on the teacher's `oscquery_types.rs` (`osc_type_serialize`,
//! `osc_value_serialize`, `OscRangeBounds`) and on
//! `original_source/source/oscquery/node.hpp`'s `Type::Values` /
//! `Attributes`. The source keeps values in a `QVariant`; here that
//! becomes an explicit tagged union with coercion rules enforced at the
//! boundary instead of left to runtime `QVariant` conversion.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{Error, Result};

/// The type a node's value is declared to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    None,
    Bool,
    Int,
    Float,
    String,
    Char,
    Impulse,
    List,
    Vec2f,
    Vec3f,
    Vec4f,
    File,
}

impl Type {
    /// Canonical OSC type tag for a *declared* type. `Bool` has no single
    /// static tag (it depends on the carried value, `T` or `F`); callers
    /// needing a wire tag for an actual value should use
    /// [`Value::osc_type_tag`] instead.
    pub fn static_osc_tag(self) -> &'static str {
        match self {
            Type::None => "",
            Type::Bool => "T",
            Type::Int => "i",
            Type::Float => "f",
            Type::String => "s",
            Type::Char => "c",
            Type::Impulse => "I",
            Type::List => "",
            Type::Vec2f => "ff",
            Type::Vec3f => "fff",
            Type::Vec4f => "ffff",
            Type::File => "s",
        }
    }
}

/// A node's dynamically-typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i32),
    Float(f32),
    String(String),
    Char(char),
    Impulse,
    List(Vec<Value>),
    Vec2f([f32; 2]),
    Vec3f([f32; 3]),
    Vec4f([f32; 4]),
    /// A filesystem path, for file-backed nodes (`extended_type == "file"`).
    File(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl Value {
    pub fn value_type(&self) -> Type {
        match self {
            Value::None => Type::None,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::String(_) => Type::String,
            Value::Char(_) => Type::Char,
            Value::Impulse => Type::Impulse,
            Value::List(_) => Type::List,
            Value::Vec2f(_) => Type::Vec2f,
            Value::Vec3f(_) => Type::Vec3f,
            Value::Vec4f(_) => Type::Vec4f,
            Value::File(_) => Type::File,
        }
    }

    /// The OSC wire type-tag string for this value (`"f"`, `"T"`, `"ff"`,
    /// a concatenation for `List`, …), per the encoding table in §4.1.
    pub fn osc_type_tag(&self) -> String {
        match self {
            Value::None => String::new(),
            Value::Bool(true) => "T".to_string(),
            Value::Bool(false) => "F".to_string(),
            Value::Int(_) => "i".to_string(),
            Value::Float(_) => "f".to_string(),
            Value::String(_) => "s".to_string(),
            Value::Char(_) => "c".to_string(),
            Value::Impulse => "I".to_string(),
            Value::List(items) => items.iter().map(|v| v.osc_type_tag()).collect(),
            Value::Vec2f(_) => "ff".to_string(),
            Value::Vec3f(_) => "fff".to_string(),
            Value::Vec4f(_) => "ffff".to_string(),
            Value::File(_) => "s".to_string(),
        }
    }

    fn display_string(&self) -> String {
        match self {
            Value::None => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.clone(),
            Value::Char(c) => c.to_string(),
            Value::Impulse => "impulse".to_string(),
            Value::List(items) => items
                .iter()
                .map(|v| v.display_string())
                .collect::<Vec<_>>()
                .join(","),
            Value::Vec2f([a, b]) => format!("{a},{b}"),
            Value::Vec3f([a, b, c]) => format!("{a},{b},{c}"),
            Value::Vec4f([a, b, c, d]) => format!("{a},{b},{c},{d}"),
            Value::File(p) => p.clone(),
        }
    }

    /// Coerce this value into `target`'s shape, per the edge cases in
    /// §4.3: int widens to float, anything formats down to string,
    /// `None` (an untyped node that hasn't received a value yet) accepts
    /// any target without conversion, and everything else that doesn't
    /// match is a `TypeMismatch`.
    pub fn coerce(&self, target: Type) -> Result<Value> {
        if self.value_type() == target {
            return Ok(self.clone());
        }
        match (self, target) {
            (Value::None, _) => Ok(Value::None),
            (Value::Int(i), Type::Float) => Ok(Value::Float(*i as f32)),
            (_, Type::String) => Ok(Value::String(self.display_string())),
            _ => Err(Error::TypeMismatch {
                from: self.value_type(),
                to: target,
            }),
        }
    }

    /// Flattened OSC arguments for wire encoding (§4.1).
    pub(crate) fn to_osc_args(&self) -> Vec<rosc::OscType> {
        match self {
            Value::None => Vec::new(),
            Value::Bool(b) => vec![rosc::OscType::Bool(*b)],
            Value::Int(i) => vec![rosc::OscType::Int(*i)],
            Value::Float(f) => vec![rosc::OscType::Float(*f)],
            Value::String(s) => vec![rosc::OscType::String(s.clone())],
            Value::Char(c) => vec![rosc::OscType::Char(*c)],
            Value::Impulse => vec![rosc::OscType::Inf],
            Value::List(items) => items.iter().flat_map(|v| v.to_osc_args()).collect(),
            Value::Vec2f([a, b]) => vec![rosc::OscType::Float(*a), rosc::OscType::Float(*b)],
            Value::Vec3f([a, b, c]) => vec![
                rosc::OscType::Float(*a),
                rosc::OscType::Float(*b),
                rosc::OscType::Float(*c),
            ],
            Value::Vec4f([a, b, c, d]) => vec![
                rosc::OscType::Float(*a),
                rosc::OscType::Float(*b),
                rosc::OscType::Float(*c),
                rosc::OscType::Float(*d),
            ],
            Value::File(p) => vec![rosc::OscType::String(p.clone())],
        }
    }

    /// Rebuild a `Value` from a decoded, flat OSC argument list, per the
    /// decode contract in §4.1: empty ⇒ `None`, one element ⇒ that
    /// scalar, more than one ⇒ `List`. A `List` nested inside another
    /// `List` is flattened on the way out by [`Value::to_osc_args`] and
    /// never reconstructed here — OSC 1.0 has no nesting grammar, and
    /// `original_source/source/osc/osc.cpp`'s own `OSCHandler::decode()`
    /// collapses a multi-argument message to one flat `QVariantList` the
    /// same way.
    pub(crate) fn from_osc_args(args: Vec<rosc::OscType>) -> Value {
        match args.len() {
            0 => Value::None,
            1 => Self::from_osc_type(args.into_iter().next().unwrap()),
            _ => Value::List(args.into_iter().map(Self::from_osc_type).collect()),
        }
    }

    fn from_osc_type(t: rosc::OscType) -> Value {
        match t {
            rosc::OscType::Int(i) => Value::Int(i),
            rosc::OscType::Float(f) => Value::Float(f),
            rosc::OscType::String(s) => Value::String(s),
            rosc::OscType::Bool(b) => Value::Bool(b),
            rosc::OscType::Char(c) => Value::Char(c),
            rosc::OscType::Inf => Value::Impulse,
            rosc::OscType::Nil => Value::None,
            // OSCQuery's value model does not define these wire types;
            // degrade gracefully rather than panic on foreign traffic.
            other => Value::String(format!("{other:?}")),
        }
    }

    /// JSON projection used for the namespace `VALUE` key (§6): always a
    /// JSON array, matching the teacher's `osc_value_serialize`, which the
    /// wider OSCQuery ecosystem also emits as an array-of-arguments.
    pub fn to_json_array(&self) -> Json {
        match self {
            Value::None => Json::Array(Vec::new()),
            Value::List(items) => Json::Array(items.iter().map(Value::scalar_json).collect()),
            Value::Vec2f([a, b]) => Json::Array(vec![(*a).into(), (*b).into()]),
            Value::Vec3f([a, b, c]) => Json::Array(vec![(*a).into(), (*b).into(), (*c).into()]),
            Value::Vec4f([a, b, c, d]) => {
                Json::Array(vec![(*a).into(), (*b).into(), (*c).into(), (*d).into()])
            }
            other => Json::Array(vec![other.scalar_json()]),
        }
    }

    fn scalar_json(&self) -> Json {
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Json::from(*f),
            Value::String(s) => Json::String(s.clone()),
            Value::Char(c) => Json::String(c.to_string()),
            Value::Impulse => Json::Bool(true),
            Value::File(p) => Json::String(p.clone()),
            Value::List(_) | Value::Vec2f(_) | Value::Vec3f(_) | Value::Vec4f(_) => {
                self.to_json_array()
            }
        }
    }

    /// Parse a `VALUE` JSON array back into a `Value` of the given type,
    /// for client-side mirror ingest (`Node::update`).
    pub fn from_json_array(json: &Json, ty: Type) -> Result<Value> {
        let items = json
            .as_array()
            .ok_or_else(|| Error::MalformedJson("VALUE must be an array".to_string()))?;
        match ty {
            Type::Vec2f | Type::Vec3f | Type::Vec4f => {
                let floats: Vec<f32> = items.iter().filter_map(Json::as_f64).map(|f| f as f32).collect();
                match (ty, floats.as_slice()) {
                    (Type::Vec2f, [a, b]) => Ok(Value::Vec2f([*a, *b])),
                    (Type::Vec3f, [a, b, c]) => Ok(Value::Vec3f([*a, *b, *c])),
                    (Type::Vec4f, [a, b, c, d]) => Ok(Value::Vec4f([*a, *b, *c, *d])),
                    _ => Err(Error::MalformedJson("wrong vector arity".to_string())),
                }
            }
            Type::List => Ok(Value::List(
                items
                    .iter()
                    .map(|j| Self::scalar_from_json(j))
                    .collect::<Result<Vec<_>>>()?,
            )),
            _ if items.is_empty() => Ok(Value::None),
            _ => Self::scalar_from_json(&items[0]),
        }
    }

    fn scalar_from_json(json: &Json) -> Result<Value> {
        Ok(match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i as i32)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0) as f32)
                }
            }
            Json::String(s) => Value::String(s.clone()),
            other => {
                return Err(Error::MalformedJson(format!(
                    "unsupported VALUE element: {other}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_int_to_float_widens() {
        let v = Value::Int(3);
        assert_eq!(v.coerce(Type::Float).unwrap(), Value::Float(3.0));
    }

    #[test]
    fn coerce_to_string_uses_decimal_representation() {
        let v = Value::Float(1.5);
        assert_eq!(v.coerce(Type::String).unwrap(), Value::String("1.5".into()));
    }

    #[test]
    fn coerce_incompatible_is_type_mismatch() {
        let v = Value::String("x".into());
        assert!(matches!(
            v.coerce(Type::Int),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn osc_type_tag_matches_encoding_table() {
        assert_eq!(Value::Float(1.0).osc_type_tag(), "f");
        assert_eq!(Value::Bool(true).osc_type_tag(), "T");
        assert_eq!(Value::Bool(false).osc_type_tag(), "F");
        assert_eq!(Value::Vec3f([0.0, 0.0, 0.0]).osc_type_tag(), "fff");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::String("a".into())]).osc_type_tag(),
            "is"
        );
    }

    #[test]
    fn round_trip_osc_args_scalar_and_list() {
        let v = Value::List(vec![Value::Int(1), Value::Float(2.0)]);
        let args = v.to_osc_args();
        assert_eq!(Value::from_osc_args(args), v);

        let scalar = Value::Float(9.5);
        assert_eq!(Value::from_osc_args(scalar.to_osc_args()), scalar);

        assert_eq!(Value::from_osc_args(Value::None.to_osc_args()), Value::None);
    }
}
