//! The debug-info-present path of the binary inspector (spec §4.2/§6):
//! walks the target ELF's DWARF sections with `gimli`, yielding
//! `Function` records with exact parameter names/types/stack offsets
//! where the compiler recorded a constant-offset location, and applying
//! the two "lazy parameter filling" heuristics (spec §4.2, §9) where it
//! didn't.
//!
//! Section bytes are owned via `Rc<[u8]>` (`gimli::EndianRcSlice`) so the
//! resulting `Dwarf` value isn't tied to the lifetime of the mapped file
//! — the same self-contained-reader trick `addr2line` and other
//! gimli-based tools use.

use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use fallible_iterator::FallibleIterator;
use flate2::read::ZlibDecoder;
use gimli::{AttributeValue, DebuggingInformationEntry, EndianRcSlice, RunTimeEndian, Unit};

use super::types::{Function, Parameter, StructField, Type};
use crate::error::{Error, Result};

pub type R = EndianRcSlice<RunTimeEndian>;
pub type Dwarf = gimli::Dwarf<R>;

const ZLIB_MAGIC: &[u8; 4] = b"ZLIB";

/// Returns the (possibly decompressed) bytes of an ELF section by name,
/// or an empty slice if the binary doesn't have it — gimli treats a
/// missing section as "no entries", which is the right behavior for
/// optional DWARF sections.
fn section_bytes(elf: &goblin::elf::Elf, data: &[u8], name: &str) -> Rc<[u8]> {
    for section in &elf.section_headers {
        let section_name = elf
            .shdr_strtab
            .get_at(section.sh_name)
            .unwrap_or("");
        if section_name != name {
            continue;
        }
        let start = section.sh_offset as usize;
        let end = start + section.sh_size as usize;
        if end > data.len() {
            continue;
        }
        let raw = &data[start..end];
        if raw.len() >= 12 && &raw[0..4] == ZLIB_MAGIC {
            let uncompressed_len = u64::from_be_bytes(raw[4..12].try_into().unwrap()) as usize;
            let mut out = Vec::with_capacity(uncompressed_len);
            let mut decoder = ZlibDecoder::new(&raw[12..]);
            if decoder.read_to_end(&mut out).is_ok() {
                return Rc::from(out.into_boxed_slice());
            }
        }
        return Rc::from(raw.to_vec().into_boxed_slice());
    }
    Rc::from(Vec::new().into_boxed_slice())
}

pub fn load(elf: &goblin::elf::Elf, data: &[u8]) -> Result<Dwarf> {
    // This tracer only targets x86-64 (spec §1/§6), always little-endian.
    let endian = RunTimeEndian::Little;
    let load_section = |id: gimli::SectionId| -> std::result::Result<R, gimli::Error> {
        let bytes = section_bytes(elf, data, id.name());
        Ok(EndianRcSlice::new(bytes, endian))
    };
    gimli::Dwarf::load(load_section).map_err(|e: gimli::Error| Error::debug_info(e.to_string()))
}

fn die_name(dwarf: &Dwarf, unit: &Unit<R>, die: &DebuggingInformationEntry<R>) -> Option<String> {
    let attr = die.attr_value(gimli::DW_AT_name).ok().flatten()?;
    dwarf
        .attr_string(unit, attr)
        .ok()
        .map(|s| s.to_string_lossy().into_owned())
}

fn die_addr(die: &DebuggingInformationEntry<R>, at: gimli::DwAt) -> Option<u64> {
    match die.attr_value(at).ok().flatten()? {
        AttributeValue::Addr(a) => Some(a),
        AttributeValue::Udata(u) => Some(u),
        _ => None,
    }
}

/// A formal parameter's location, if it resolves to a constant
/// frame-relative offset (`DW_OP_fbreg <n>`), the only location form
/// this tracer understands. Anything else (register-resident, a
/// location list) yields `None`, i.e. `exists: false`.
fn constant_fbreg_offset(die: &DebuggingInformationEntry<R>) -> Option<i64> {
    let value = die.attr_value(gimli::DW_AT_location).ok().flatten()?;
    let expr = match value {
        AttributeValue::Exprloc(expr) => expr,
        _ => return None,
    };
    let mut ops = expr.operations(gimli::Encoding {
        address_size: 8,
        format: gimli::Format::Dwarf32,
        version: 4,
    });
    match ops.next().ok().flatten()? {
        gimli::Operation::FrameOffset { offset } => Some(offset),
        _ => None,
    }
}

/// Finds a named struct type anywhere in the DWARF and returns it with
/// its members as fields, flattening one level of embedded structs
/// using dotted names (e.g. `runtime.g`'s embedded `stack` field
/// exposes `stack.hi` directly) — the convention
/// `goroutine_layout_from_type`/`defer_layout_from_type` resolve field
/// offsets "by name against the runtime-descriptor type" against
/// (spec §4.3 step 2).
pub fn find_struct_type(dwarf: &Dwarf, name: &str) -> Option<Type> {
    let mut units = dwarf.units();
    while let Ok(Some(header)) = units.next() {
        let unit = match dwarf.unit(header) {
            Ok(u) => u,
            Err(_) => continue,
        };
        let mut entries = unit.entries();
        while let Ok(Some((_, die))) = entries.next_dfs() {
            if die.tag() != gimli::DW_TAG_structure_type {
                continue;
            }
            if die_name(dwarf, &unit, die).as_deref() != Some(name) {
                continue;
            }
            return Some(build_struct_type(dwarf, &unit, die.offset(), name.to_string(), 1));
        }
    }
    None
}

fn build_struct_type(dwarf: &Dwarf, unit: &Unit<R>, offset: gimli::UnitOffset, name: String, embed_depth: u32) -> Type {
    let mut tree = match unit.entries_tree(Some(offset)) {
        Ok(t) => t,
        Err(_) => return Type::opaque_word(),
    };
    let root = match tree.root() {
        Ok(r) => r,
        Err(_) => return Type::opaque_word(),
    };
    let byte_size = match root.entry().attr_value(gimli::DW_AT_byte_size) {
        Ok(Some(AttributeValue::Udata(sz))) => sz,
        _ => 0,
    };
    let mut fields = Vec::new();
    let mut children = root.children();
    while let Ok(Some(child)) = children.next() {
        let die = child.entry();
        if die.tag() != gimli::DW_TAG_member {
            continue;
        }
        let member_name = match die_name(dwarf, unit, die) {
            Some(n) => n,
            None => continue,
        };
        let member_offset = match die.attr_value(gimli::DW_AT_data_member_location) {
            Ok(Some(AttributeValue::Udata(o))) => o,
            _ => 0,
        };
        let type_offset = match die.attr_value(gimli::DW_AT_type) {
            Ok(Some(AttributeValue::UnitRef(r))) => Some(r),
            _ => None,
        };

        if embed_depth > 0 {
            if let Some(to) = type_offset {
                if let Some(nested_name) = struct_type_name_at(dwarf, unit, to) {
                    let nested = build_struct_type(dwarf, unit, to, nested_name, embed_depth - 1);
                    for nf in nested.fields {
                        fields.push(StructField {
                            name: format!("{}.{}", member_name, nf.name),
                            offset: member_offset + nf.offset,
                            ty: nf.ty,
                        });
                    }
                }
            }
        }
        fields.push(StructField { name: member_name, offset: member_offset, ty: Type::opaque_word() });
    }
    Type { name, kind: crate::binary::types::TypeKind::Struct, size: byte_size, element: None, key: None, fields, length: 0 }
}

fn struct_type_name_at(dwarf: &Dwarf, unit: &Unit<R>, offset: gimli::UnitOffset) -> Option<String> {
    let mut tree = unit.entries_tree(Some(offset)).ok()?;
    let root = tree.root().ok()?;
    let die = root.entry();
    if die.tag() != gimli::DW_TAG_structure_type {
        return None;
    }
    die_name(dwarf, unit, die)
}

fn resolve_type(dwarf: &Dwarf, unit: &Unit<R>, offset: Option<gimli::UnitOffset>) -> Type {
    let offset = match offset {
        Some(o) => o,
        None => return Type::opaque_word(),
    };
    let mut tree = match unit.entries_tree(Some(offset)) {
        Ok(t) => t,
        Err(_) => return Type::opaque_word(),
    };
    let node = match tree.root() {
        Ok(n) => n,
        Err(_) => return Type::opaque_word(),
    };
    let die = node.entry();
    let name = die_name(dwarf, unit, die).unwrap_or_else(|| "<anon>".to_string());
    let byte_size = match die.attr_value(gimli::DW_AT_byte_size) {
        Ok(Some(AttributeValue::Udata(sz))) => sz,
        _ => 8,
    };
    Type {
        name,
        kind: crate::binary::types::TypeKind::Int { bits: (byte_size * 8) as u8, signed: true },
        size: byte_size,
        element: None,
        key: None,
        fields: Vec::new(),
        length: 0,
    }
}

/// Applies the two lazy-parameter-filling heuristics from spec §4.2:
/// if exactly one parameter is missing and the located sizes plus its
/// own size account for the whole args area, place it at the one
/// remaining offset; otherwise, if every missing parameter is an
/// unnamed `~rN` output, lay them out contiguously at the tail in name
/// order. Both are gated on the "no padding" check (located sizes sum
/// exactly to `args_size`, once the fill is applied).
fn fill_missing_parameters(params: &mut Vec<Parameter>, args_size: u64) {
    let located_size: u64 = params.iter().filter(|p| p.exists).map(|p| p.ty.size).sum();
    let missing: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.exists)
        .map(|(i, _)| i)
        .collect();

    if missing.len() == 1 {
        let idx = missing[0];
        let missing_size = params[idx].ty.size;
        if located_size + missing_size == args_size {
            let mut used: Vec<(u64, u64)> = params
                .iter()
                .filter(|p| p.exists)
                .map(|p| (p.stack_offset, p.ty.size))
                .collect();
            used.sort_by_key(|(off, _)| *off);
            let mut cursor = 0u64;
            for (off, size) in &used {
                if *off > cursor {
                    break;
                }
                cursor = cursor.max(off + size);
            }
            params[idx].stack_offset = cursor;
            params[idx].exists = true;
        }
        return;
    }

    let all_tilde_r_outputs = missing
        .iter()
        .all(|&i| params[i].name.as_deref().map(|n| n.starts_with("~r")).unwrap_or(false));
    if !missing.is_empty() && all_tilde_r_outputs {
        let mut ordered = missing.clone();
        ordered.sort_by_key(|&i| params[i].name.clone());
        let mut cursor = args_size - ordered.iter().map(|&i| params[i].ty.size).sum::<u64>();
        for idx in ordered {
            params[idx].stack_offset = cursor;
            params[idx].exists = true;
            cursor += params[idx].ty.size;
        }
    }
}

pub fn functions(dwarf: &Dwarf) -> Result<Vec<Function>> {
    let mut out = Vec::new();
    let mut units = dwarf.units();
    while let Some(header) = units.next().map_err(|e| Error::debug_info(e.to_string()))? {
        let unit = dwarf
            .unit(header)
            .map_err(|e| Error::debug_info(e.to_string()))?;
        let mut entries = unit.entries();
        while let Some((_, die)) = entries.next_dfs().map_err(|e| Error::debug_info(e.to_string()))? {
            if die.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            let name = match die_name(dwarf, &unit, die) {
                Some(n) => n,
                None => continue,
            };
            let low_pc = match die_addr(die, gimli::DW_AT_low_pc) {
                Some(a) => a,
                None => continue,
            };
            let high_pc_raw = die.attr_value(gimli::DW_AT_high_pc).ok().flatten();
            let end_address = match high_pc_raw {
                Some(AttributeValue::Addr(a)) => a,
                Some(AttributeValue::Udata(offset)) => low_pc + offset,
                _ => 0,
            };

            let mut params = collect_formal_parameters(dwarf, &unit, die.offset())?;
            // Every `DW_TAG_formal_parameter` child is collected regardless
            // of whether its location resolved (see `collect_formal_parameters`),
            // so summing declared type sizes gives the function's true args
            // area even when some parameters are `exists: false` — deriving
            // it from located `stack_offset`s instead would make the one
            // genuinely missing offset impossible to recover below.
            let args_size: u64 = params.iter().map(|p| p.ty.size).sum();
            fill_missing_parameters(&mut params, args_size);
            params.sort_by_key(|p| p.stack_offset);

            out.push(Function {
                name,
                start_address: low_pc,
                end_address,
                parameters: params,
                args_size,
            });
        }
    }
    out.sort_by_key(|f| f.start_address);
    for i in 0..out.len() {
        if out[i].end_address == 0 {
            out[i].end_address = out.get(i + 1).map(|f| f.start_address).unwrap_or(0);
        }
    }
    Ok(out)
}

/// Looks up the function enclosing `pc`, preferring the innermost
/// `DW_TAG_inlined_subroutine` whose range contains it over the
/// containing `DW_TAG_subprogram` itself — the toolchain this tracer
/// targets inlines small leaf functions even at low optimization
/// levels, so a breakpoint inside an inlined call site would otherwise
/// resolve to the wrong enclosing symbol.
pub fn find_function(dwarf: &Dwarf, pc: u64) -> Result<Option<Function>> {
    let mut units = dwarf.units();
    while let Some(header) = units.next().map_err(|e| Error::debug_info(e.to_string()))? {
        let unit = dwarf.unit(header).map_err(|e| Error::debug_info(e.to_string()))?;
        let mut entries = unit.entries();
        while let Some((_, die)) = entries.next_dfs().map_err(|e| Error::debug_info(e.to_string()))? {
            if die.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            let low_pc = match die_addr(die, gimli::DW_AT_low_pc) {
                Some(a) => a,
                None => continue,
            };
            let high_pc = match die.attr_value(gimli::DW_AT_high_pc).ok().flatten() {
                Some(AttributeValue::Addr(a)) => a,
                Some(AttributeValue::Udata(offset)) => low_pc + offset,
                _ => 0,
            };
            if pc < low_pc || (high_pc != 0 && pc >= high_pc) {
                continue;
            }
            if let Some(inlined) = innermost_inlined_subroutine(dwarf, &unit, die.offset(), pc)? {
                return Ok(Some(inlined));
            }
            let name = die_name(dwarf, &unit, die).unwrap_or_else(|| "<unknown>".to_string());
            let params = collect_formal_parameters(dwarf, &unit, die.offset())?;
            let args_size = params.iter().map(|p| p.ty.size).sum();
            return Ok(Some(Function { name, start_address: low_pc, end_address: high_pc, parameters: params, args_size }));
        }
    }
    Ok(None)
}

/// Recurses into `DW_TAG_inlined_subroutine` children of `parent`,
/// returning the deepest one whose range contains `pc` (an inlined call
/// may itself contain further inlining), with its name resolved through
/// `DW_AT_abstract_origin` back to the original subprogram.
fn innermost_inlined_subroutine(
    dwarf: &Dwarf,
    unit: &Unit<R>,
    parent: gimli::UnitOffset,
    pc: u64,
) -> Result<Option<Function>> {
    let mut tree = unit.entries_tree(Some(parent)).map_err(|e| Error::debug_info(e.to_string()))?;
    let root = tree.root().map_err(|e| Error::debug_info(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children.next().map_err(|e| Error::debug_info(e.to_string()))? {
        let die = child.entry();
        if die.tag() != gimli::DW_TAG_inlined_subroutine {
            continue;
        }
        let low_pc = match die_addr(die, gimli::DW_AT_low_pc) {
            Some(a) => a,
            None => continue,
        };
        let high_pc = match die.attr_value(gimli::DW_AT_high_pc).ok().flatten() {
            Some(AttributeValue::Addr(a)) => a,
            Some(AttributeValue::Udata(offset)) => low_pc + offset,
            _ => 0,
        };
        if pc < low_pc || (high_pc != 0 && pc >= high_pc) {
            continue;
        }
        if let Some(deeper) = innermost_inlined_subroutine(dwarf, unit, die.offset(), pc)? {
            return Ok(Some(deeper));
        }
        let name = resolve_abstract_origin_name(dwarf, unit, die).unwrap_or_else(|| "<inlined>".to_string());
        let params = collect_formal_parameters(dwarf, unit, die.offset())?;
        let args_size = params.iter().map(|p| p.ty.size).sum();
        return Ok(Some(Function { name, start_address: low_pc, end_address: high_pc, parameters: params, args_size }));
    }
    Ok(None)
}

fn resolve_abstract_origin_name(dwarf: &Dwarf, unit: &Unit<R>, die: &DebuggingInformationEntry<R>) -> Option<String> {
    match die.attr_value(gimli::DW_AT_abstract_origin).ok().flatten()? {
        AttributeValue::UnitRef(offset) => {
            let mut tree = unit.entries_tree(Some(offset)).ok()?;
            let root = tree.root().ok()?;
            die_name(dwarf, unit, root.entry())
        }
        _ => None,
    }
}

fn collect_formal_parameters(
    dwarf: &Dwarf,
    unit: &Unit<R>,
    parent: gimli::UnitOffset,
) -> Result<Vec<Parameter>> {
    let mut out = Vec::new();
    let mut tree = unit
        .entries_tree(Some(parent))
        .map_err(|e| Error::debug_info(e.to_string()))?;
    let root = tree.root().map_err(|e| Error::debug_info(e.to_string()))?;
    let mut children = root.children();
    while let Some(child) = children.next().map_err(|e| Error::debug_info(e.to_string()))? {
        let die = child.entry();
        if die.tag() != gimli::DW_TAG_formal_parameter {
            continue;
        }
        let name = die_name(dwarf, unit, die);
        let type_offset = match die.attr_value(gimli::DW_AT_type) {
            Ok(Some(AttributeValue::UnitRef(r))) => Some(r),
            _ => None,
        };
        let ty = resolve_type(dwarf, unit, type_offset);
        let offset = constant_fbreg_offset(die);
        let is_output = name.as_deref().map(|n| n.starts_with("~r")).unwrap_or(false);
        out.push(Parameter {
            name,
            stack_offset: offset.unwrap_or(0).max(0) as u64,
            exists: offset.is_some(),
            is_output,
            ty,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::types::TypeKind;

    fn param(name: &str, offset: u64, size: u64, exists: bool, is_output: bool) -> Parameter {
        Parameter {
            name: Some(name.to_string()),
            stack_offset: offset,
            exists,
            is_output,
            ty: Type {
                name: "int".into(),
                kind: TypeKind::Int { bits: (size * 8) as u8, signed: true },
                size,
                element: None,
                key: None,
                fields: Vec::new(),
                length: 0,
            },
        }
    }

    #[test]
    fn single_unknown_parameter_is_placed_at_remaining_offset() {
        let mut params = vec![
            param("n", 0, 8, true, false),
            param("~r0", 0, 8, false, true),
        ];
        fill_missing_parameters(&mut params, 16);
        assert!(params[1].exists);
        assert_eq!(params[1].stack_offset, 8);
    }

    #[test]
    fn single_unknown_parameter_not_placed_when_padding_present() {
        let mut params = vec![
            param("n", 0, 8, true, false),
            param("~r0", 0, 8, false, true),
        ];
        // declared args size doesn't match located + missing: alignment padding
        fill_missing_parameters(&mut params, 24);
        assert!(!params[1].exists);
    }

    #[test]
    fn tilde_r_outputs_laid_out_at_tail_in_name_order() {
        let mut params = vec![
            param("a", 0, 8, true, false),
            param("~r1", 0, 8, false, true),
            param("~r0", 0, 8, false, true),
        ];
        fill_missing_parameters(&mut params, 24);
        params.sort_by_key(|p| p.stack_offset);
        assert_eq!(params[1].name.as_deref(), Some("~r0"));
        assert_eq!(params[1].stack_offset, 8);
        assert_eq!(params[2].name.as_deref(), Some("~r1"));
        assert_eq!(params[2].stack_offset, 16);
    }
}
