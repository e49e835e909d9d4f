pub mod frame;
pub mod snapshot;
pub mod value;

use crate::binary::types::{FunctionId, Type};
use crate::binary::Binary;
use crate::config::{self, Os, RuntimeVersion};
use crate::debug_api::{DebugApiClient, ThreadId};
use crate::error::Result;

pub use frame::StackFrame;
pub use snapshot::{GoroutineSnapshot, PanicHandler};

/// The goroutine/frame introspector (component C, spec §4.3).
pub struct Introspector {
    os: Os,
    version: RuntimeVersion,
}

impl Introspector {
    pub fn new(os: Os, version: RuntimeVersion) -> Introspector {
        Introspector { os, version }
    }

    fn read_u64(&self, client: &dyn DebugApiClient, addr: u64) -> Result<u64> {
        let bytes = client.read_memory(addr, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64(&self, client: &dyn DebugApiClient, addr: u64) -> Result<i64> {
        Ok(self.read_u64(client, addr)? as i64)
    }

    /// Steps (1)-(4) of spec §4.3: TLS base, field offsets by name
    /// against the runtime-descriptor type, the defer-chain walk to
    /// find the active panic handler, and the next deferred call.
    pub fn current_goroutine(
        &self,
        client: &dyn DebugApiClient,
        binary: &Binary,
        thread: ThreadId,
    ) -> Result<GoroutineSnapshot> {
        let offset = config::tls_offset(self.os, self.version);
        let g_addr = client.read_tls(thread, offset)?;

        let layout = binary.goroutine_layout();
        let defer_layout = binary.defer_layout();

        let goid = self.read_i64(client, g_addr + layout.goid)?;
        let stack_hi = self.read_u64(client, g_addr + layout.stack_hi)?;
        let panic_ptr = self.read_u64(client, g_addr + layout.panic)?;
        let defer_ptr = self.read_u64(client, g_addr + layout.defer)?;

        let regs = client.read_registers(thread)?;
        let current_pc = regs.pc();
        let current_sp = regs.sp();
        let used_stack_size = stack_hi.saturating_sub(current_sp);

        let mut next_defer_fn_addr = 0;
        let mut panic_handler = None;
        let mut cursor = defer_ptr;
        let mut first = true;
        while cursor != 0 {
            let func = self.read_u64(client, cursor + defer_layout.func)?;
            if first {
                next_defer_fn_addr = func;
                first = false;
            }
            if panic_ptr != 0 {
                let this_panic = self.read_u64(client, cursor + defer_layout.panic)?;
                if this_panic == panic_ptr {
                    let pc = self.read_u64(client, cursor + defer_layout.pc)?;
                    let sp = self.read_u64(client, cursor + defer_layout.sp)?;
                    panic_handler = Some(PanicHandler {
                        pc_at_defer: pc,
                        used_stack_size_at_defer: stack_hi.saturating_sub(sp),
                    });
                    break;
                }
            }
            cursor = self.read_u64(client, cursor + defer_layout.link)?;
        }

        let ancestor_ids = match layout.ancestors {
            Some(off) => self.read_ancestor_ids(client, g_addr + off).unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(GoroutineSnapshot {
            id: goid,
            ancestor_ids,
            used_stack_size,
            current_pc,
            current_stack_addr: current_sp,
            next_defer_fn_addr,
            panicking: panic_ptr != 0,
            panic_handler,
        })
    }

    fn read_ancestor_ids(&self, client: &dyn DebugApiClient, slice_addr: u64) -> Result<Vec<i64>> {
        let header = client.read_memory(slice_addr, 16)?;
        let mut ptr_buf = [0u8; 8];
        ptr_buf.copy_from_slice(&header[0..8]);
        let ptr = u64::from_le_bytes(ptr_buf);
        let mut len_buf = [0u8; 8];
        len_buf.copy_from_slice(&header[8..16]);
        let len = u64::from_le_bytes(len_buf);
        if ptr == 0 {
            return Ok(Vec::new());
        }
        let mut ids = Vec::with_capacity(len as usize);
        for i in 0..len {
            // each `ancestorInfo` starts with the ancestor's goid
            ids.push(self.read_i64(client, ptr + i * 8)?);
        }
        Ok(ids)
    }

    /// Builds a `StackFrame` at `(sp, pc)`, where `sp` is guaranteed to
    /// point at a return address (spec §4.3).
    pub fn stack_frame_at(
        &self,
        client: &dyn DebugApiClient,
        binary: &Binary,
        sp: u64,
        pc: u64,
        parse_level: u32,
    ) -> Result<StackFrame> {
        let function_id = binary
            .function_id(pc)
            .ok_or_else(|| crate::error::Error::debug_info(format!("no function covers pc 0x{:x}", pc)))?;
        let function = binary.function(function_id);
        frame::build(client, binary, function_id, function, sp, parse_level)
    }

    /// Resolves an interface's runtime type word to a static `Type` via
    /// the binary inspector, defaulting to an opaque type if the
    /// address isn't in the static type map (spec §4.3 interface
    /// decoding).
    pub fn resolve_interface_type(&self, binary: &Binary, type_word: u64) -> Type {
        binary.resolve_interface_type(type_word)
    }
}

pub fn function_id_of(snapshot_pc: u64, binary: &Binary) -> Option<FunctionId> {
    binary.function_id(snapshot_pc)
}
