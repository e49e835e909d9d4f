pub mod dwarf;
pub mod moduledata;
pub mod pclntab;
pub mod types;

use std::fs;

use goblin::elf::Elf;

use moduledata::{DeferLayout, GoroutineLayout, RuntimeTypeMap};
use pclntab::{FuncTabEntry, PcValueTable};
use types::{Function, FunctionId, Type};

use crate::error::{Error, Result};

/// The binary inspector (component B, spec §4.2). Opens the target
/// executable once; every `Function` it hands out is immutable for the
/// lifetime of this value (spec §3), so callers hold `FunctionId`
/// indices rather than borrowed references.
pub struct Binary {
    functions: Vec<Function>,
    has_debug_info: bool,
    goroutine_layout: GoroutineLayout,
    defer_layout: DeferLayout,
    type_map: RuntimeTypeMap,
    first_moduledata_addr: u64,
}

impl Binary {
    pub fn open(path: &str) -> Result<Binary> {
        let data = fs::read(path)?;
        let elf = Elf::parse(&data).map_err(|e| Error::debug_info(e.to_string()))?;

        let has_debug_info = elf
            .section_headers
            .iter()
            .any(|s| elf.shdr_strtab.get_at(s.sh_name) == Some(".debug_info") && s.sh_size > 0);

        let (functions, goroutine_layout, defer_layout) = if has_debug_info {
            let dw = dwarf::load(&elf, &data)?;
            let functions = dwarf::functions(&dw)?;
            let goroutine_layout = dwarf::find_struct_type(&dw, "runtime.g")
                .and_then(|t| moduledata::goroutine_layout_from_type(&t))
                .unwrap_or_else(moduledata::fallback_goroutine_layout);
            let defer_layout = dwarf::find_struct_type(&dw, "runtime._defer")
                .and_then(|t| moduledata::defer_layout_from_type(&t))
                .unwrap_or_else(moduledata::fallback_defer_layout);
            (functions, goroutine_layout, defer_layout)
        } else {
            (
                functions_from_gopclntab(&elf, &data).unwrap_or_else(|| functions_from_symtab(&elf)),
                moduledata::fallback_goroutine_layout(),
                moduledata::fallback_defer_layout(),
            )
        };
        let type_map = build_type_map(&elf);
        let first_moduledata_addr = elf
            .syms
            .iter()
            .find(|s| elf.strtab.get_at(s.st_name) == Some("runtime.firstmoduledata"))
            .map(|s| s.st_value)
            .unwrap_or(0);

        Ok(Binary {
            functions,
            has_debug_info,
            goroutine_layout,
            defer_layout,
            type_map,
            first_moduledata_addr,
        })
    }

    pub fn has_debug_info(&self) -> bool {
        self.has_debug_info
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    pub fn function_id(&self, pc: u64) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.contains(pc))
            .map(FunctionId)
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn find_function(&self, pc: u64) -> Option<&Function> {
        self.functions.iter().find(|f| f.contains(pc))
    }

    pub fn function_args_size(&self, pc: u64) -> Option<u64> {
        self.find_function(pc).map(|f| f.args_size)
    }

    pub fn goroutine_layout(&self) -> GoroutineLayout {
        self.goroutine_layout
    }

    pub fn defer_layout(&self) -> DeferLayout {
        self.defer_layout
    }

    pub fn first_moduledata_addr(&self) -> u64 {
        self.first_moduledata_addr
    }

    pub fn type_at_runtime_addr(&self, addr: u64) -> Option<&Type> {
        self.type_map.get(addr)
    }

    /// Resolves an interface's runtime type word to a static `Type`,
    /// defaulting to an opaque named-by-address type if the word isn't in
    /// the static type map (spec §4.3 interface decoding).
    pub fn resolve_interface_type(&self, type_word: u64) -> Type {
        self.type_at_runtime_addr(type_word).cloned().unwrap_or_else(|| Type {
            name: format!("0x{:x}", type_word),
            kind: types::TypeKind::Void,
            size: 0,
            element: None,
            key: None,
            fields: Vec::new(),
            length: 0,
        })
    }

    /// Builds a `Binary` from hand-assembled functions, bypassing ELF
    /// parsing entirely — the controller's state-machine tests have no
    /// compiled target to open (spec SPEC_FULL §12 "Test Tooling").
    #[cfg(test)]
    pub fn synthetic(functions: Vec<Function>) -> Binary {
        Binary {
            functions,
            has_debug_info: true,
            goroutine_layout: moduledata::fallback_goroutine_layout(),
            defer_layout: moduledata::fallback_defer_layout(),
            type_map: RuntimeTypeMap::default(),
            first_moduledata_addr: 0,
        }
    }
}

/// Recovers function records, with real argument sizes, straight from
/// the target's own `.gopclntab` section — no DWARF or live process
/// needed (spec §4.2/§6(b), scenario S3). Falls back to `None` (and
/// from there to `functions_from_symtab`) when the section is missing
/// or its header doesn't match the classic layout this tracer parses.
fn functions_from_gopclntab(elf: &Elf, data: &[u8]) -> Option<Vec<Function>> {
    let section = elf
        .section_headers
        .iter()
        .find(|s| elf.shdr_strtab.get_at(s.sh_name) == Some(".gopclntab"))?;
    let start = section.sh_offset as usize;
    let end = start + section.sh_size as usize;
    let bytes = data.get(start..end)?;
    let table = pclntab::parse_classic_pclntab(bytes)?;
    let mut out = Vec::with_capacity(table.functab.len());
    for entry in &table.functab {
        if let Some(f) = table.function_at(entry.entry) {
            out.push(f);
        }
    }
    Some(out)
}

/// Builds function records from the ELF symbol table alone (no DWARF,
/// no parsed pclntab): a `STT_FUNC` symbol's `st_value`/`st_size` give
/// the range, and args-size is unknown. This is the last-resort path,
/// used only when `.gopclntab` is absent or unparseable.
fn functions_from_symtab(elf: &Elf) -> Vec<Function> {
    let mut entries: Vec<FuncTabEntry> = elf
        .syms
        .iter()
        .filter(|s| s.is_function() && s.st_value != 0)
        .map(|s| FuncTabEntry { entry: s.st_value, funcoff: s.st_value })
        .collect();
    entries.sort_by_key(|e| e.entry);
    entries.dedup_by_key(|e| e.entry);

    let mut names = std::collections::HashMap::new();
    let mut sizes = std::collections::HashMap::new();
    for s in elf.syms.iter().filter(|s| s.is_function() && s.st_value != 0) {
        if let Some(name) = elf.strtab.get_at(s.st_name) {
            names.insert(s.st_value, name.to_string());
        }
        sizes.insert(s.st_value, 0);
    }

    let table = PcValueTable {
        functab: entries,
        names_by_funcoff: names,
        args_size_by_funcoff: sizes,
    };

    let mut out = Vec::new();
    for entry in &table.functab {
        if let Some(f) = table.function_at(entry.entry) {
            out.push(f);
        }
    }
    out
}

/// Go type descriptor symbols follow the `type.<name>` convention in the
/// symbol table; this builds the static address → `Type` map
/// `type_at_runtime_addr` serves, under the non-PIE internal-linking
/// assumption noted on `RuntimeTypeMap`.
fn build_type_map(elf: &Elf) -> RuntimeTypeMap {
    let mut map = RuntimeTypeMap::default();
    for s in elf.syms.iter().filter(|s| s.st_value != 0) {
        if let Some(name) = elf.strtab.get_at(s.st_name) {
            if let Some(stripped) = name.strip_prefix("type.") {
                map.insert(
                    s.st_value,
                    Type {
                        name: stripped.to_string(),
                        kind: types::TypeKind::Struct,
                        size: s.st_size,
                        element: None,
                        key: None,
                        fields: Vec::new(),
                        length: 0,
                    },
                );
            }
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Parameter, TypeKind};

    fn func(name: &str, start: u64, end: u64) -> Function {
        Function {
            name: name.to_string(),
            start_address: start,
            end_address: end,
            parameters: vec![Parameter {
                name: Some("n".into()),
                ty: Type { name: "int".into(), kind: TypeKind::Int { bits: 64, signed: true }, size: 8, element: None, key: None, fields: vec![], length: 0 },
                stack_offset: 0,
                exists: true,
                is_output: false,
            }],
            args_size: 8,
        }
    }

    #[test]
    fn function_contains_checks_half_open_range() {
        let f = func("main.fib", 0x1000, 0x1010);
        assert!(f.contains(0x1000));
        assert!(f.contains(0x100f));
        assert!(!f.contains(0x1010));
    }

    #[test]
    fn last_function_with_zero_end_contains_everything_after_start() {
        let f = func("main.fib", 0x1000, 0);
        assert!(f.contains(0x1000));
        assert!(f.contains(u64::MAX));
    }
}
