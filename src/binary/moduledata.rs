//! Resolves the runtime-descriptor field offsets and the
//! runtime-type-address → static-type mapping that component C (the
//! goroutine/frame introspector) needs (spec §6 "Target runtime
//! descriptor"). Prefers the struct type recovered from DWARF; falls
//! back to a hardcoded offset table, mirroring the TLS-offset fallback
//! in `config.rs`, when debug info is absent or doesn't name these
//! fields.

use std::collections::HashMap;

use super::types::Type;

/// Byte offsets of the fields component C reads out of a goroutine
/// descriptor (`runtime.g`), resolved once per `Binary`.
#[derive(Copy, Clone, Debug)]
pub struct GoroutineLayout {
    pub goid: u64,
    pub stack_hi: u64,
    pub panic: u64,
    pub defer: u64,
    pub ancestors: Option<u64>,
}

/// Offsets inside a defer record (`runtime._defer`) component C walks
/// to find the active panic handler (spec §4.3).
#[derive(Copy, Clone, Debug)]
pub struct DeferLayout {
    pub func: u64,
    pub link: u64,
    pub sp: u64,
    pub pc: u64,
    pub panic: u64,
}

/// Fallback offsets for a runtime version with no usable debug info.
/// These are the offsets this tracer was validated against; spec §9's
/// first open question notes that a new runtime release can shift them,
/// in which case this is the one table to extend, not logic to rewrite.
pub fn fallback_goroutine_layout() -> GoroutineLayout {
    GoroutineLayout {
        goid: 152,
        // `stack` is the first field of `runtime.g`: `{lo, hi uintptr}`,
        // so `stack.hi` sits one word past the struct's own base.
        stack_hi: 8,
        panic: 176,
        defer: 184,
        ancestors: Some(392),
    }
}

pub fn fallback_defer_layout() -> DeferLayout {
    DeferLayout { func: 8, link: 40, sp: 16, pc: 24, panic: 32 }
}

/// Resolves field offsets by name against a DWARF-recovered struct
/// `Type`. Returns `None` (triggering the hardcoded fallback) if any
/// required field is missing — a partial struct is as unusable as none,
/// since the introspector needs every field to build a snapshot.
pub fn goroutine_layout_from_type(ty: &Type) -> Option<GoroutineLayout> {
    let offsets: HashMap<&str, u64> = ty
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.offset))
        .collect();
    Some(GoroutineLayout {
        goid: *offsets.get("goid")?,
        stack_hi: *offsets.get("stack.hi")?,
        panic: *offsets.get("_panic")?,
        defer: *offsets.get("_defer")?,
        ancestors: offsets.get("ancestors").copied(),
    })
}

pub fn defer_layout_from_type(ty: &Type) -> Option<DeferLayout> {
    let offsets: HashMap<&str, u64> = ty
        .fields
        .iter()
        .map(|f| (f.name.as_str(), f.offset))
        .collect();
    Some(DeferLayout {
        func: *offsets.get("fn")?,
        link: *offsets.get("link")?,
        sp: *offsets.get("sp")?,
        pc: *offsets.get("pc")?,
        panic: *offsets.get("_panic")?,
    })
}

/// Static (load-address) map from a Go runtime type descriptor's
/// address to the static `Type` it describes, built once from the
/// ELF symbol table's `type.*` symbols at `Binary::open` time. Assumes
/// the target is linked without position-independent relocation for
/// its data symbols, which is the default for this toolchain's internal
/// linker.
#[derive(Default, Debug)]
pub struct RuntimeTypeMap {
    by_addr: HashMap<u64, Type>,
}

impl RuntimeTypeMap {
    pub fn insert(&mut self, addr: u64, ty: Type) {
        self.by_addr.insert(addr, ty);
    }

    pub fn get(&self, addr: u64) -> Option<&Type> {
        self.by_addr.get(&addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::types::{StructField, TypeKind};

    fn g_type() -> Type {
        Type {
            name: "runtime.g".to_string(),
            kind: TypeKind::Struct,
            size: 400,
            element: None,
            key: None,
            length: 0,
            fields: vec![
                StructField { name: "goid".into(), offset: 152, ty: Type::opaque_word() },
                StructField { name: "stack.hi".into(), offset: 8, ty: Type::opaque_word() },
                StructField { name: "_panic".into(), offset: 176, ty: Type::opaque_word() },
                StructField { name: "_defer".into(), offset: 184, ty: Type::opaque_word() },
            ],
        }
    }

    #[test]
    fn fallback_layout_places_stack_hi_after_stack_lo() {
        let layout = fallback_goroutine_layout();
        assert_eq!(layout.stack_hi, 8);
    }

    #[test]
    fn resolves_layout_from_struct_type() {
        let layout = goroutine_layout_from_type(&g_type()).unwrap();
        assert_eq!(layout.goid, 152);
        assert_eq!(layout.panic, 176);
        assert_eq!(layout.defer, 184);
        assert_eq!(layout.ancestors, None);
    }

    #[test]
    fn runtime_type_map_roundtrips() {
        let mut map = RuntimeTypeMap::default();
        map.insert(0x5000, Type::opaque_word());
        assert!(map.get(0x5000).is_some());
        assert!(map.get(0x5008).is_none());
    }
}
