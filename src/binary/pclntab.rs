//! The debug-info-free fallback (spec §4.2): when the target carries no
//! DWARF, function boundaries and argument sizes are recovered from the
//! runtime's own `pclntab`-style lookup tables instead. Parameter names
//! and the input/output boundary are unknowable here — every recovered
//! function gets `args_size/8` unnamed input parameters followed by an
//! equal count of unnamed output parameters (spec §4.2, scenario S3).

use super::types::{Function, Parameter, Type};

/// One entry of the runtime's function table: a PC and the byte offset
/// (relative to the module's pclntable) of that function's metadata
/// record, from which name and args-size are read.
#[derive(Copy, Clone, Debug)]
pub struct FuncTabEntry {
    pub entry: u64,
    pub funcoff: u64,
}

/// A minimal view of one module's pclntab-derived metadata: enough to
/// look up the enclosing function for a PC and recover its name and
/// declared argument-area size. A real implementation walks the
/// `moduledata` chain and the `findfuncbucket`/`findfuncbucket2`
/// 2-level bucket index described in spec §4.2 to locate the entry
/// covering a given PC in better than linear time; this type models
/// the result of that walk so the controller/binary-inspector seam
/// doesn't care how the lookup happened.
#[derive(Clone, Debug)]
pub struct PcValueTable {
    pub functab: Vec<FuncTabEntry>,
    /// funcname strings, keyed by offset into the pclntable, and each
    /// function record's declared args size, keyed the same way.
    pub names_by_funcoff: std::collections::HashMap<u64, String>,
    pub args_size_by_funcoff: std::collections::HashMap<u64, u64>,
}

/// Parses a classic-layout `.gopclntab` section (magic `0xfffffffb`: the
/// `nameoff`/`args` fields live directly on each `_func` record, with no
/// separate funcname/cutab/filetab offset table) into a `PcValueTable`,
/// recovering real per-function argument sizes without DWARF (spec
/// §4.2/§6(b), scenario S3). Entries in `functab` are taken as absolute
/// addresses already, matching the non-PIE internal-linking assumption
/// `build_type_map` also makes; anything that doesn't parse (wrong
/// magic, truncated section, non-8-byte pointers) returns `None` so the
/// caller can fall back to the symbol-table-only path.
pub fn parse_classic_pclntab(data: &[u8]) -> Option<PcValueTable> {
    const MAGIC: u32 = 0xfffffffb;
    const HEADER_LEN: usize = 16;
    if data.len() < HEADER_LEN {
        return None;
    }
    if u32::from_le_bytes(data[0..4].try_into().ok()?) != MAGIC {
        return None;
    }
    let ptr_size = data[7] as usize;
    if ptr_size != 8 {
        return None; // this tracer only targets amd64 (spec §1/§6).
    }
    let nfunc = read_uint(data, 8, ptr_size)? as usize;

    let entry_width = ptr_size * 2;
    let mut functab = Vec::with_capacity(nfunc);
    let mut names_by_funcoff = std::collections::HashMap::new();
    let mut args_size_by_funcoff = std::collections::HashMap::new();
    for i in 0..nfunc {
        let off = HEADER_LEN + i * entry_width;
        let entry = read_uint(data, off, ptr_size)?;
        let funcoff = read_uint(data, off + ptr_size, ptr_size)?;
        functab.push(FuncTabEntry { entry, funcoff });

        // `_func`: { entry uintptr; nameoff int32; args int32; ... }.
        let rec = funcoff as usize;
        let nameoff = read_i32(data, rec + ptr_size)? as usize;
        let args = read_i32(data, rec + ptr_size + 4)? as u64;
        if let Some(name) = read_cstr(data, nameoff) {
            names_by_funcoff.insert(funcoff, name);
        }
        args_size_by_funcoff.insert(funcoff, args);
    }
    functab.sort_by_key(|e| e.entry);
    Some(PcValueTable { functab, names_by_funcoff, args_size_by_funcoff })
}

fn read_uint(data: &[u8], off: usize, width: usize) -> Option<u64> {
    let bytes = data.get(off..off + width)?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

fn read_i32(data: &[u8], off: usize) -> Option<i32> {
    data.get(off..off + 4).map(|b| i32::from_le_bytes(b.try_into().unwrap()))
}

fn read_cstr(data: &[u8], off: usize) -> Option<String> {
    let bytes = data.get(off..)?;
    let end = bytes.iter().position(|&b| b == 0)?;
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_string)
}

impl PcValueTable {
    /// Binary-searches `functab` (must be sorted by `entry`, as the
    /// runtime always emits it) for the function whose range contains
    /// `pc`, exactly as `findfunc` does in the runtime itself.
    pub fn find(&self, pc: u64) -> Option<&FuncTabEntry> {
        let idx = self.functab.partition_point(|e| e.entry <= pc);
        if idx == 0 {
            return None;
        }
        self.functab.get(idx - 1)
    }

    pub fn function_at(&self, pc: u64) -> Option<Function> {
        let entry = self.find(pc)?;
        let name = self
            .names_by_funcoff
            .get(&entry.funcoff)
            .cloned()
            .unwrap_or_else(|| format!("func_{:x}", entry.entry));
        let args_size = *self.args_size_by_funcoff.get(&entry.funcoff).unwrap_or(&0);
        let end_address = self
            .functab
            .iter()
            .map(|e| e.entry)
            .filter(|&a| a > entry.entry)
            .min()
            .unwrap_or(0);
        Some(synthesize_function(name, entry.entry, end_address, args_size))
    }
}

/// Builds a `Function` with `args_size/8` unnamed input parameters and
/// an equal number of unnamed output parameters, each a raw
/// pointer-sized slot (spec §4.2, §7 "degrades to opaque call/return
/// traces").
pub fn synthesize_function(name: String, start: u64, end: u64, args_size: u64) -> Function {
    let slots = (args_size / 8) as usize;
    let half = slots / 2;
    let mut parameters = Vec::with_capacity(slots);
    for i in 0..half {
        parameters.push(Parameter {
            name: None,
            ty: Type::opaque_word(),
            stack_offset: (i as u64) * 8,
            exists: true,
            is_output: false,
        });
    }
    for i in 0..(slots - half) {
        parameters.push(Parameter {
            name: None,
            ty: Type::opaque_word(),
            stack_offset: ((half + i) as u64) * 8,
            exists: true,
            is_output: true,
        });
    }
    Function {
        name,
        start_address: start,
        end_address: end,
        parameters,
        args_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PcValueTable {
        let mut names = std::collections::HashMap::new();
        names.insert(0x10, "main.fib".to_string());
        let mut sizes = std::collections::HashMap::new();
        sizes.insert(0x10, 16); // one input, one output, 8 bytes each
        PcValueTable {
            functab: vec![
                FuncTabEntry { entry: 0x1000, funcoff: 0x10 },
                FuncTabEntry { entry: 0x2000, funcoff: 0x20 },
            ],
            names_by_funcoff: names,
            args_size_by_funcoff: sizes,
        }
    }

    #[test]
    fn finds_enclosing_function_by_range() {
        let t = table();
        let f = t.find(0x1500).unwrap();
        assert_eq!(f.entry, 0x1000);
    }

    #[test]
    fn pc_before_first_entry_has_no_function() {
        let t = table();
        assert!(t.find(0x500).is_none());
    }

    #[test]
    fn synthesized_function_splits_slots_evenly() {
        let f = synthesize_function("main.fib".to_string(), 0x1000, 0x2000, 16);
        assert_eq!(f.parameters.len(), 2);
        assert_eq!(f.input_parameters().count(), 1);
        assert_eq!(f.output_parameters().count(), 1);
        assert!(f.parameters.iter().all(|p| p.name.is_none()));
    }

    fn classic_section(entry: u64, funcoff: u64, args: i32, name: &str) -> Vec<u8> {
        let mut data = vec![0u8; 64 + name.len() + 1];
        data[0..4].copy_from_slice(&0xfffffffbu32.to_le_bytes());
        data[7] = 8; // ptrSize
        data[8..16].copy_from_slice(&1u64.to_le_bytes()); // nfunc
        data[16..24].copy_from_slice(&entry.to_le_bytes());
        data[24..32].copy_from_slice(&funcoff.to_le_bytes());
        let rec = funcoff as usize;
        let nameoff = rec + 16;
        data[rec..rec + 8].copy_from_slice(&entry.to_le_bytes());
        data[rec + 8..rec + 12].copy_from_slice(&(nameoff as i32).to_le_bytes());
        data[rec + 12..rec + 16].copy_from_slice(&args.to_le_bytes());
        data[nameoff..nameoff + name.len()].copy_from_slice(name.as_bytes());
        data
    }

    #[test]
    fn parses_classic_pclntab_args_size() {
        let data = classic_section(0x1000, 32, 16, "main.fib");
        let table = parse_classic_pclntab(&data).unwrap();
        let f = table.function_at(0x1000).unwrap();
        assert_eq!(f.name, "main.fib");
        assert_eq!(f.args_size, 16);
        assert_eq!(f.parameters.len(), 2);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut data = classic_section(0x1000, 32, 16, "main.fib");
        data[0] = 0;
        assert!(parse_classic_pclntab(&data).is_none());
    }
}
