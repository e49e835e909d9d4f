//! The tagged-variant value decoder (spec §4.3, §9 "Dynamic typing of
//! value decoder"). Each variant carries the decoded value; printing is
//! a method on the variant, matching the Design Note's description.

use crate::binary::types::{Type, TypeKind};
use crate::binary::Binary;
use crate::debug_api::DebugApiClient;
use crate::error::Result;

#[derive(Clone, Debug)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Complex(f64, f64),
    Bool(bool),
    Pointer(u64, Option<Box<Value>>),
    Func(u64),
    Struct(Vec<(String, Value)>),
    Array(Vec<Value>),
    Slice { ptr: u64, len: u64, cap: u64, elems: Vec<Value> },
    String(String),
    Map(Vec<(Value, Value)>),
    Interface { type_name: Option<String>, value: Option<Box<Value>> },
    Void,
    /// A location the decoder understands but `parse_level` forbids
    /// following further, or a read/decode failure — printed as `-`
    /// per spec §4.5.10 / §7 ("failures to decode a value do not fail
    /// the loop; the value prints as `-`").
    Abbreviated,
}

impl Value {
    pub fn render(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Uint(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Complex(re, im) => format!("({}+{}i)", re, im),
            Value::Bool(v) => v.to_string(),
            Value::Pointer(addr, inner) => match inner {
                Some(v) => format!("&{}", v.render()),
                None => format!("0x{:x}", addr),
            },
            Value::Func(addr) => format!("0x{:x}", addr),
            Value::Struct(fields) => {
                let body = fields
                    .iter()
                    .map(|(name, v)| format!("{}: {}", name, v.render()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", body)
            }
            Value::Array(elems) | Value::Slice { elems, .. } => {
                let body = elems.iter().map(Value::render).collect::<Vec<_>>().join(", ");
                format!("[{}]", body)
            }
            Value::String(s) => format!("{:?}", s),
            Value::Map(entries) => {
                let body = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.render(), v.render()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("map[{}]", body)
            }
            Value::Interface { type_name, value } => match (type_name, value) {
                (Some(t), Some(v)) => format!("{}({})", t, v.render()),
                _ => "-".to_string(),
            },
            Value::Void => "void".to_string(),
            Value::Abbreviated => "-".to_string(),
        }
    }
}

/// Reads `ty` at `addr` from the target, recursing into pointers and
/// structs while `parse_level` allows it. `0` means "don't read any
/// further than this value's own bytes" (spec §4.3).
pub fn decode(
    client: &dyn DebugApiClient,
    binary: &Binary,
    addr: u64,
    ty: &Type,
    parse_level: u32,
) -> Result<Value> {
    match &ty.kind {
        TypeKind::Void => Ok(Value::Void),
        TypeKind::Bool => {
            let b = client.read_memory(addr, 1)?;
            Ok(Value::Bool(b[0] != 0))
        }
        TypeKind::Int { bits, signed } => {
            let bytes = client.read_memory(addr, (*bits / 8) as usize)?;
            Ok(if *signed {
                Value::Int(sign_extend(&bytes))
            } else {
                Value::Uint(zero_extend(&bytes))
            })
        }
        TypeKind::Float { bits } => {
            let bytes = client.read_memory(addr, (*bits / 8) as usize)?;
            let v = if *bits == 32 {
                f32::from_le_bytes(bytes.try_into().unwrap_or_default()) as f64
            } else {
                f64::from_le_bytes(bytes.try_into().unwrap_or_default())
            };
            Ok(Value::Float(v))
        }
        TypeKind::Complex { bits } => {
            let half = (*bits / 2 / 8) as usize;
            let bytes = client.read_memory(addr, half * 2)?;
            let (re_bytes, im_bytes) = bytes.split_at(half);
            let (re, im) = if half == 4 {
                (
                    f32::from_le_bytes(re_bytes.try_into().unwrap_or_default()) as f64,
                    f32::from_le_bytes(im_bytes.try_into().unwrap_or_default()) as f64,
                )
            } else {
                (
                    f64::from_le_bytes(re_bytes.try_into().unwrap_or_default()),
                    f64::from_le_bytes(im_bytes.try_into().unwrap_or_default()),
                )
            };
            Ok(Value::Complex(re, im))
        }
        TypeKind::Pointer => {
            let bytes = client.read_memory(addr, 8)?;
            let target = zero_extend(&bytes);
            if parse_level == 0 || target == 0 {
                return Ok(Value::Pointer(target, None));
            }
            match &ty.element {
                Some(elem) => match decode(client, binary, target, elem, parse_level - 1) {
                    Ok(v) => Ok(Value::Pointer(target, Some(Box::new(v)))),
                    Err(_) => Ok(Value::Abbreviated),
                },
                None => Ok(Value::Pointer(target, None)),
            }
        }
        TypeKind::Func => {
            let bytes = client.read_memory(addr, 8)?;
            Ok(Value::Func(zero_extend(&bytes)))
        }
        TypeKind::String => {
            let header = client.read_memory(addr, 16)?;
            let ptr = zero_extend(&header[0..8]);
            let len = zero_extend(&header[8..16]);
            if parse_level == 0 || ptr == 0 {
                return Ok(Value::Abbreviated);
            }
            let bytes = client.read_memory(ptr, len as usize)?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
        TypeKind::Slice => {
            let header = client.read_memory(addr, 24)?;
            let ptr = zero_extend(&header[0..8]);
            let len = zero_extend(&header[8..16]);
            let cap = zero_extend(&header[16..24]);
            if parse_level == 0 || ptr == 0 {
                return Ok(Value::Slice { ptr, len, cap, elems: Vec::new() });
            }
            let elem_ty = ty.element.as_deref().cloned().unwrap_or_else(Type::opaque_word);
            let mut elems = Vec::with_capacity(len as usize);
            for i in 0..len {
                let elem_addr = ptr + i * elem_ty.size;
                elems.push(decode(client, binary, elem_addr, &elem_ty, parse_level - 1)?);
            }
            Ok(Value::Slice { ptr, len, cap, elems })
        }
        TypeKind::Array => {
            let elem_ty = ty.element.as_deref().cloned().unwrap_or_else(Type::opaque_word);
            let mut elems = Vec::with_capacity(ty.length as usize);
            for i in 0..ty.length {
                let elem_addr = addr + i * elem_ty.size;
                if parse_level == 0 {
                    elems.push(Value::Abbreviated);
                } else {
                    elems.push(decode(client, binary, elem_addr, &elem_ty, parse_level - 1)?);
                }
            }
            Ok(Value::Array(elems))
        }
        TypeKind::Struct => {
            if parse_level == 0 {
                return Ok(Value::Abbreviated);
            }
            let mut fields = Vec::with_capacity(ty.fields.len());
            for f in &ty.fields {
                let v = decode(client, binary, addr + f.offset, &f.ty, parse_level - 1)?;
                fields.push((f.name.clone(), v));
            }
            Ok(Value::Struct(fields))
        }
        TypeKind::Map => {
            if parse_level == 0 {
                return Ok(Value::Abbreviated);
            }
            match (&ty.key, &ty.element) {
                (Some(key_ty), Some(val_ty)) => {
                    decode_map(client, binary, addr, key_ty, val_ty, parse_level)
                }
                // key/value types unknown (e.g. recovered without DWARF):
                // nothing to walk buckets with, so print as empty rather
                // than guessing a layout.
                _ => Ok(Value::Map(Vec::new())),
            }
        }
        TypeKind::Interface => {
            let header = client.read_memory(addr, 16)?;
            let type_word = zero_extend(&header[0..8]);
            let data_word = zero_extend(&header[8..16]);
            if type_word == 0 {
                return Ok(Value::Interface { type_name: None, value: None });
            }
            let dynamic_ty = binary.resolve_interface_type(type_word);
            let type_name = dynamic_ty.name.clone();
            if parse_level == 0 || data_word == 0 {
                return Ok(Value::Interface { type_name: Some(type_name), value: None });
            }
            let value = decode(client, binary, data_word, &dynamic_ty, parse_level - 1).unwrap_or(Value::Abbreviated);
            Ok(Value::Interface { type_name: Some(type_name), value: Some(Box::new(value)) })
        }
    }
}

/// Walks a classic (pre-Swiss-map) Go `hmap`'s buckets and their overflow
/// chains, decoding every occupied slot (spec §4.3 map decoding). Layout
/// per `runtime/map.go`: `hmap{count u64, flags u8, B u8, noverflow u16,
/// hash0 u32, buckets *bmap, ...}`; each `bmap` is `tophash[bucketCnt]`
/// followed by `bucketCnt` keys, then `bucketCnt` elems, then an overflow
/// pointer. A tophash byte below 5 (`minTopHash`) marks an empty or
/// evacuated slot.
fn decode_map(
    client: &dyn DebugApiClient,
    binary: &Binary,
    addr: u64,
    key_ty: &Type,
    val_ty: &Type,
    parse_level: u32,
) -> Result<Value> {
    const BUCKET_CNT: u64 = 8;
    const MIN_TOP_HASH: u8 = 5;

    let header = client.read_memory(addr, 48)?;
    let count = zero_extend(&header[0..8]);
    let b = header[9];
    let buckets = zero_extend(&header[16..24]);
    if count == 0 || buckets == 0 {
        return Ok(Value::Map(Vec::new()));
    }

    let nbuckets = 1u64 << b;
    let bucket_size = BUCKET_CNT + BUCKET_CNT * key_ty.size + BUCKET_CNT * val_ty.size + 8;

    let mut entries = Vec::new();
    for i in 0..nbuckets {
        let mut bucket_addr = buckets + i * bucket_size;
        loop {
            let tophash = client.read_memory(bucket_addr, BUCKET_CNT as usize)?;
            let keys_off = bucket_addr + BUCKET_CNT;
            let elems_off = keys_off + BUCKET_CNT * key_ty.size;
            let overflow_off = elems_off + BUCKET_CNT * val_ty.size;
            for slot in 0..BUCKET_CNT {
                if tophash[slot as usize] < MIN_TOP_HASH {
                    continue;
                }
                let key_addr = keys_off + slot * key_ty.size;
                let val_addr = elems_off + slot * val_ty.size;
                let key = decode(client, binary, key_addr, key_ty, parse_level - 1).unwrap_or(Value::Abbreviated);
                let val = decode(client, binary, val_addr, val_ty, parse_level - 1).unwrap_or(Value::Abbreviated);
                entries.push((key, val));
            }
            let overflow = zero_extend(&client.read_memory(overflow_off, 8)?);
            if overflow == 0 {
                break;
            }
            bucket_addr = overflow;
        }
    }
    Ok(Value::Map(entries))
}

fn zero_extend(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn sign_extend(bytes: &[u8]) -> i64 {
    let raw = zero_extend(bytes);
    let bits = bytes.len() * 8;
    if bits == 64 {
        return raw as i64;
    }
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extend_negative_byte() {
        assert_eq!(sign_extend(&[0xff]), -1);
    }

    #[test]
    fn sign_extend_positive_word() {
        assert_eq!(sign_extend(&[0x05, 0x00]), 5);
    }

    #[test]
    fn render_pointer_without_target_prints_address() {
        let v = Value::Pointer(0x1000, None);
        assert_eq!(v.render(), "0x1000");
    }

    #[test]
    fn render_string_quotes_contents() {
        let v = Value::String("hi".to_string());
        assert_eq!(v.render(), "\"hi\"");
    }
}
