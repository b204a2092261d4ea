//! OSC 1.0 wire codec.
//!
//! The teacher re-exports `rosc` wholesale (`pub mod osc { pub use
//! rosc::*; }`) and never touches the byte layer itself. This module
//! keeps `rosc` doing the actual big-endian packing but owns the
//! encode/decode *contract* of §4.1, including the "missing leading
//! comma ⇒ empty argument set" tie-break that `rosc` has no concept of.

use crate::error::{Error, Result};
use crate::value::Value;

/// A decoded OSC message: address plus the reconstructed argument value.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub address: String,
    pub value: Value,
}

/// Encode `(address, value)` as a complete OSC 1.0 message.
pub fn encode_message(address: &str, value: &Value) -> Result<Vec<u8>> {
    let args = value.to_osc_args();
    let packet = rosc::OscPacket::Message(rosc::OscMessage {
        addr: address.to_string(),
        args,
    });
    rosc::encoder::encode(&packet).map_err(Error::from_osc)
}

/// Decode a buffer as a single OSC message (bundles are out of scope;
/// see §1 Non-goals).
pub fn decode_message(bytes: &[u8]) -> Result<DecodedMessage> {
    let (address, type_tag_region_start) = read_padded_string(bytes)?;
    let rest = bytes
        .get(type_tag_region_start..)
        .ok_or_else(|| Error::MalformedOsc("buffer too short for type-tag region".to_string()))?;

    if rest.first() != Some(&b',') {
        // Tie-break (§4.1): no leading comma ⇒ treat as an empty
        // argument set carrying only the address.
        return Ok(DecodedMessage {
            address,
            value: Value::None,
        });
    }

    match rosc::decoder::decode_udp(bytes) {
        Ok((_, rosc::OscPacket::Message(msg))) => Ok(DecodedMessage {
            address: msg.addr,
            value: Value::from_osc_args(msg.args),
        }),
        Ok((_, rosc::OscPacket::Bundle(_))) => Err(Error::MalformedOsc(
            "OSC bundles are not supported".to_string(),
        )),
        Err(err) => Err(Error::from_osc(err)),
    }
}

/// Reads a null-terminated, null-padded-to-4-bytes string starting at the
/// front of `bytes`. Returns the decoded string and the offset of the
/// byte immediately following the padded region.
fn read_padded_string(bytes: &[u8]) -> Result<(String, usize)> {
    let nul = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::MalformedOsc("no null terminator found".to_string()))?;
    let s = std::str::from_utf8(&bytes[..nul])
        .map_err(|_| Error::InvalidUtf8)?
        .to_string();
    let padded_len = ((nul + 4) / 4) * 4;
    if bytes.len() < padded_len {
        return Err(Error::MalformedOsc("short buffer".to_string()));
    }
    Ok((s, padded_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_float_literal_matches_spec_vector() {
        let bytes = encode_message("/x", &Value::Float(3.25)).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x2f, 0x78, 0x00, 0x00, 0x2c, 0x66, 0x00, 0x00, 0x40, 0x50, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn encode_string_bool_list_matches_spec_vector() {
        let value = Value::List(vec![Value::String("hi".to_string()), Value::Bool(true)]);
        let bytes = encode_message("/y", &value).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x2f, 0x79, 0x00, 0x00, 0x2c, 0x73, 0x54, 0x00, 0x68, 0x69, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn round_trip_scalar_and_vector() {
        for value in [
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-7),
            Value::Float(0.125),
            Value::String("hello world".to_string()),
            Value::Char('q'),
            Value::Impulse,
            Value::Vec2f([1.0, 2.0]),
            Value::Vec3f([1.0, 2.0, 3.0]),
            Value::Vec4f([1.0, 2.0, 3.0, 4.0]),
            Value::List(vec![Value::Int(1), Value::Float(2.0), Value::String("x".into())]),
        ] {
            let bytes = encode_message("/a/b", &value).unwrap();
            let decoded = decode_message(&bytes).unwrap();
            assert_eq!(decoded.address, "/a/b");
            assert_eq!(decoded.value, value);
        }
    }

    /// OSC 1.0 has no nesting grammar, and neither did the system this
    /// protocol was modeled on: a nested `List` is flattened to its leaves
    /// on the wire and decodes back as one flat `List`, same as a `List`
    /// containing another `List` collapses to a single level either way.
    #[test]
    fn nested_list_flattens_on_the_wire() {
        let nested = Value::List(vec![
            Value::Int(1),
            Value::List(vec![Value::Float(2.0), Value::String("x".into())]),
        ]);
        let flat = Value::List(vec![Value::Int(1), Value::Float(2.0), Value::String("x".into())]);

        let bytes = encode_message("/a/b", &nested).unwrap();
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.value, flat);
    }

    #[test]
    fn every_encoded_message_is_four_byte_aligned() {
        for (addr, value) in [
            ("/x", Value::Float(1.0)),
            ("/longer/address/here", Value::String("payload".into())),
            ("/abcd", Value::Int(1)),
        ] {
            let bytes = encode_message(addr, &value).unwrap();
            assert_eq!(bytes.len() % 4, 0);
        }
    }

    #[test]
    fn missing_comma_yields_empty_args_with_raw_address() {
        // "/ping\0\0\0" with no type-tag region at all.
        let bytes = b"/ping\0\0\0".to_vec();
        let decoded = decode_message(&bytes).unwrap();
        assert_eq!(decoded.address, "/ping");
        assert_eq!(decoded.value, Value::None);
    }

    #[test]
    fn non_utf8_address_fails_with_invalid_utf8() {
        let bytes = vec![0xff, 0xfe, 0x00, 0x00];
        assert!(matches!(decode_message(&bytes), Err(Error::InvalidUtf8)));
    }

    #[test]
    fn short_buffer_fails() {
        let bytes = vec![0x2f, 0x78];
        assert!(decode_message(&bytes).is_err());
    }
}
