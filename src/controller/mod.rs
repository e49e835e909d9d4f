//! The tracing controller (component E, spec §4.5). The single-threaded
//! event loop that drives a stopped target through breakpoint hits,
//! maintains the per-goroutine shadow call stack, and emits the log.

pub mod print;
pub mod shadow_stack;

use std::collections::HashSet;
use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};

use crate::config::{self, CONTROL_CHANNEL_CAPACITY};
use crate::debug_api::{Event, ThreadId, TrapCause};
use crate::error::{Error, Result};
use crate::goroutine::frame::ParameterValue;
use crate::goroutine::value::Value;
use crate::goroutine::{GoroutineSnapshot, StackFrame};
use crate::process::Process;

use shadow_stack::{ShadowFrame, ShadowStacks};

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ExitReason {
    Exited(i32),
    CoreDump,
    Terminated(i32),
    Interrupted,
}

enum ControlMsg {
    StartPoint(u64),
    EndPoint(u64),
}

/// A handle for asynchronously feeding a running `main_loop` new trace
/// points or an interrupt request (spec §5: these must not block and
/// must not race with controller-internal state, hence bounded channels).
#[derive(Clone)]
pub struct ControlHandle {
    points: SyncSender<ControlMsg>,
    interrupt: SyncSender<()>,
}

impl ControlHandle {
    pub fn add_start_trace_point(&self, addr: u64) -> Result<()> {
        self.points
            .try_send(ControlMsg::StartPoint(addr))
            .map_err(|_| Error::internal("control channel full"))
    }

    pub fn add_end_trace_point(&self, addr: u64) -> Result<()> {
        self.points
            .try_send(ControlMsg::EndPoint(addr))
            .map_err(|_| Error::internal("control channel full"))
    }

    pub fn interrupt(&self) -> Result<()> {
        self.interrupt.try_send(()).map_err(|_| Error::internal("control channel full"))
    }
}

pub struct Controller {
    process: Process,
    shadow_stacks: ShadowStacks,
    start_addresses: HashSet<u64>,
    end_addresses: HashSet<u64>,
    /// Multiset of goroutine ids currently "inside" tracing (spec §3
    /// "Tracing-points registry"): a goroutine may in principle enter
    /// twice if start/end points are nested, so this counts occurrences.
    traced_goroutines: std::collections::HashMap<i64, u32>,
    entry_breakpoints: Vec<u64>,
    trace_level: u32,
    parse_level: u32,
    sink: Box<dyn Write>,
    points_rx: Receiver<ControlMsg>,
    interrupt_rx: Receiver<()>,
    handle: ControlHandle,
}

impl Controller {
    pub fn new(process: Process, trace_level: u32, parse_level: u32, sink: Box<dyn Write>) -> Controller {
        let (points_tx, points_rx) = mpsc::sync_channel::<ControlMsg>(CONTROL_CHANNEL_CAPACITY);
        let (interrupt_tx, interrupt_rx) = mpsc::sync_channel::<()>(CONTROL_CHANNEL_CAPACITY);
        Controller {
            process,
            shadow_stacks: ShadowStacks::new(),
            start_addresses: HashSet::new(),
            end_addresses: HashSet::new(),
            traced_goroutines: std::collections::HashMap::new(),
            entry_breakpoints: Vec::new(),
            trace_level: trace_level.max(1),
            parse_level,
            sink,
            points_rx,
            interrupt_rx,
            handle: ControlHandle { points: points_tx, interrupt: interrupt_tx },
        }
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn add_start_trace_point(&self, addr: u64) -> Result<()> {
        self.handle.add_start_trace_point(addr)
    }

    pub fn add_end_trace_point(&self, addr: u64) -> Result<()> {
        self.handle.add_end_trace_point(addr)
    }

    pub fn interrupt(&self) -> Result<()> {
        self.handle.interrupt()
    }

    fn drain_points(&mut self) {
        loop {
            match self.points_rx.try_recv() {
                Ok(ControlMsg::StartPoint(addr)) => {
                    self.start_addresses.insert(addr);
                }
                Ok(ControlMsg::EndPoint(addr)) => {
                    self.end_addresses.insert(addr);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn interrupt_requested(&self) -> bool {
        match self.interrupt_rx.try_recv() {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    /// spec §4.5.2.
    pub fn main_loop(&mut self) -> Result<ExitReason> {
        self.install_queued_trace_points()?;
        let mut event = self.process.client.continue_and_wait()?;
        loop {
            match event {
                Event::Exited(status) => return Ok(ExitReason::Exited(status)),
                Event::CoreDump => return Ok(ExitReason::CoreDump),
                Event::Terminated(sig) => return Ok(ExitReason::Terminated(sig as i32)),
                Event::Trapped(traps) => {
                    for trap in traps {
                        self.handle_trap(trap.thread, trap.cause)?;
                    }
                    self.install_queued_trace_points()?;
                    if self.interrupt_requested() {
                        self.process.detach()?;
                        return Ok(ExitReason::Interrupted);
                    }
                    event = self.process.client.continue_and_wait()?;
                }
            }
        }
    }

    fn install_queued_trace_points(&mut self) -> Result<()> {
        self.drain_points();
        Ok(())
    }

    /// spec §4.5.3: the 7-way trap classification, in priority order.
    fn handle_trap(&mut self, thread: ThreadId, cause: TrapCause) -> Result<()> {
        if let TrapCause::Forwarded(_) = cause {
            // re-delivered transparently by the next continue_and_wait (spec §7).
            return Ok(());
        }

        let g = match self.process.introspector.current_goroutine(self.process.client.as_ref(), &self.process.binary, thread) {
            Ok(g) => g,
            Err(_) => {
                // no goroutine descriptor resolvable: a system thread.
                self.process.client.step_and_wait(thread)?;
                return Ok(());
            }
        };

        let bp_addr = g.current_pc.wrapping_sub(1);

        // 1. start-address hit.
        if self.start_addresses.contains(&bp_addr) && self.process.breakpoints.is_hit(bp_addr, g.id) {
            return self.enter_tracepoint(thread, &g, bp_addr);
        }
        // 2. end-address hit.
        if self.end_addresses.contains(&bp_addr) && self.process.breakpoints.is_hit(bp_addr, g.id) {
            return self.exit_tracepoint(thread, &g, bp_addr);
        }
        // 3. no hit at all (conditional mismatch or unrelated address).
        if !self.process.breakpoints.is_hit(bp_addr, g.id) {
            return self.step_across(thread, bp_addr);
        }
        // 4. not currently traced.
        if !self.is_traced(g.id) {
            return self.step_across(thread, bp_addr);
        }
        // 5. stack-growth re-trap of the currently active function.
        if let Some(top) = self.top_frame(g.id) {
            if top.used_stack_size_at_entry == g.used_stack_size && bp_addr == top.function_start(&self.process) {
                return self.step_across(thread, bp_addr);
            }
        }
        // 6. function call.
        if self.process.binary.find_function(bp_addr).map(|f| f.start_address) == Some(bp_addr) {
            return self.handle_call(thread, &g, bp_addr);
        }
        // 7. function return.
        self.handle_return(thread, &g)
    }

    fn is_traced(&self, goroutine_id: i64) -> bool {
        self.traced_goroutines.contains_key(&goroutine_id)
    }

    fn top_frame(&self, goroutine_id: i64) -> Option<ShadowFrame> {
        self.shadow_stacks.peek(goroutine_id)
    }

    fn step_across(&mut self, thread: ThreadId, bp_addr: u64) -> Result<()> {
        // single-stepping past a breakpoint requires temporarily
        // restoring the original byte; the registry already guarantees
        // the byte is 0xCC while installed (P1), so hide it, step, then
        // let it be reinstalled implicitly since we never removed the
        // registry entry — only the physical byte is toggled here.
        self.temporarily_remove_and_step(thread, bp_addr)
    }

    /// Rewinds past the trap byte and single-steps the real instruction
    /// back in. `handle_return`'s own unwind (§4.5.6/§4.5.7) may have
    /// already cleared the conditional return breakpoint at this exact
    /// address via `clear_conditional` — the multiset's last occurrence
    /// for this goroutine — in which case the original byte is already
    /// back in target memory and there is nothing left to hide.
    fn temporarily_remove_and_step(&mut self, thread: ThreadId, bp_addr: u64) -> Result<()> {
        let original = self.process.breakpoints.original_byte(bp_addr);
        if let Some(original) = original {
            self.process.client.write_memory(bp_addr, &[original])?;
        }
        let mut regs = self.process.client.read_registers(thread)?;
        regs.rewind_past_trap();
        self.process.client.write_registers(thread, &regs)?;
        self.process.client.step_and_wait(thread)?;
        if original.is_some() {
            self.process.client.write_memory(bp_addr, &[0xCC])?;
        }
        Ok(())
    }

    /// spec §4.5.4.
    fn enter_tracepoint(&mut self, thread: ThreadId, g: &GoroutineSnapshot, bp_addr: u64) -> Result<()> {
        if self.traced_goroutines.is_empty() {
            self.entry_breakpoints.clear();
            let eligible: Vec<u64> = self
                .process
                .binary
                .functions()
                .filter(|f| is_eligible(&f.name))
                .map(|f| f.start_address)
                .collect();
            for addr in eligible {
                self.process.breakpoints.set(self.process.client.as_ref(), addr)?;
                self.entry_breakpoints.push(addr);
            }
        }
        *self.traced_goroutines.entry(g.id).or_insert(0) += 1;
        self.temporarily_remove_and_step(thread, bp_addr)
    }

    /// spec §4.5.5.
    fn exit_tracepoint(&mut self, thread: ThreadId, g: &GoroutineSnapshot, bp_addr: u64) -> Result<()> {
        if let Some(count) = self.traced_goroutines.get_mut(&g.id) {
            *count -= 1;
            if *count == 0 {
                self.traced_goroutines.remove(&g.id);
            }
        }
        if self.traced_goroutines.is_empty() {
            let addrs = std::mem::take(&mut self.entry_breakpoints);
            for addr in addrs {
                self.process.breakpoints.clear(self.process.client.as_ref(), addr)?;
            }
        }
        self.process.breakpoints.clear_all_for(self.process.client.as_ref(), g.id)?;
        self.shadow_stacks.drop_goroutine(g.id);
        self.temporarily_remove_and_step(thread, bp_addr)
    }

    fn unwind(&mut self, g: &GoroutineSnapshot) -> Vec<ShadowFrame> {
        let client = self.process.client.as_ref();
        let breakpoints = &mut self.process.breakpoints;
        self.shadow_stacks.unwind_to(g.id, g.used_stack_size, |frame| {
            let _ = breakpoints.clear_conditional(client, frame.return_address, g.id);
        })
    }

    fn print_depth(&self, g: &GoroutineSnapshot, raw_depth: usize) -> u32 {
        let adjustment = match &g.panic_handler {
            Some(h) if g.panicking => self.shadow_stacks.frames_above(g.id, h.used_stack_size_at_defer),
            _ => 0,
        };
        raw_depth.saturating_sub(adjustment).max(1) as u32
    }

    /// Emits a `/`-line for every frame `unwind` silently popped (P6:
    /// each pushed frame still owes exactly one return line, even when
    /// it never hits its own return breakpoint because a panic jumped
    /// past it). `base_depth` is the shadow stack's depth after all of
    /// `popped` was removed; frames are listed deepest-first, so the
    /// i-th one's original depth is `base_depth + popped.len() - i`.
    fn print_unwound_returns(&mut self, g: &GoroutineSnapshot, popped: &[ShadowFrame], base_depth: usize) -> Result<()> {
        let n = popped.len();
        for (i, frame) in popped.iter().enumerate() {
            let raw_depth = base_depth + n - i;
            self.print_abbreviated_return(g, frame, raw_depth)?;
        }
        Ok(())
    }

    /// A return line for a frame whose real return site can't be read
    /// from stack memory: a stale frame popped during a call trap's
    /// preliminary unwind, or an ancestor silently unwound past by the
    /// same panic/defer jump that produced the one frame actually
    /// returning (spec §7, §8 S4) — its output parameters print as `-`
    /// instead of being decoded from a stack slot that no longer
    /// belongs to it.
    fn print_abbreviated_return(&mut self, g: &GoroutineSnapshot, frame: &ShadowFrame, raw_depth: usize) -> Result<()> {
        let depth = self.print_depth(g, raw_depth);
        if depth <= self.trace_level {
            let function = self.process.binary.function(frame.function);
            let parameters = function
                .output_parameters()
                .map(|p| ParameterValue { name: p.name.clone(), value: Value::Abbreviated, is_output: true })
                .collect();
            let stack_frame = StackFrame {
                function: frame.function,
                function_name: function.name.clone(),
                return_address: frame.return_address,
                parameters,
            };
            let line = print::format_return(depth, g.id, &stack_frame);
            print::write_line(&mut self.sink, &line).map_err(Error::Io)?;
        }
        Ok(())
    }

    /// spec §4.5.6.
    fn handle_call(&mut self, thread: ThreadId, g: &GoroutineSnapshot, bp_addr: u64) -> Result<()> {
        let stale = self.unwind(g);
        let base_depth = self.shadow_stacks.depth(g.id);
        self.print_unwound_returns(g, &stale, base_depth)?;

        let function_id = self
            .process
            .binary
            .function_id(bp_addr)
            .ok_or_else(|| Error::internal("call trap at unresolvable address"))?;

        let depth = self.print_depth(g, self.shadow_stacks.depth(g.id) + 1);
        if depth <= self.trace_level {
            let frame = self.process.introspector.stack_frame_at(
                self.process.client.as_ref(),
                &self.process.binary,
                g.current_stack_addr,
                g.current_pc,
                self.parse_level,
            )?;
            let line = print::format_call(depth, g.id, &frame);
            print::write_line(&mut self.sink, &line).map_err(Error::Io)?;

            self.process.breakpoints.set_conditional(self.process.client.as_ref(), frame.return_address, g.id)?;
            self.temporarily_remove_and_step(thread, bp_addr)?;
            self.shadow_stacks.push(
                g.id,
                ShadowFrame { function: function_id, return_address: frame.return_address, used_stack_size_at_entry: g.used_stack_size },
            );
        } else {
            let ret_bytes = self.process.client.read_memory(g.current_stack_addr, 8)?;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&ret_bytes);
            let return_address = u64::from_le_bytes(buf);
            self.process.breakpoints.set_conditional(self.process.client.as_ref(), return_address, g.id)?;
            self.temporarily_remove_and_step(thread, bp_addr)?;
            self.shadow_stacks.push(
                g.id,
                ShadowFrame { function: function_id, return_address, used_stack_size_at_entry: g.used_stack_size },
            );
        }
        Ok(())
    }

    /// spec §4.5.7. A single return trap can pop more than one shadow
    /// frame at once (P4's stale-unwind case, e.g. a panic/recover
    /// collapsing several frames): only the frame whose return address
    /// is the address that actually trapped has a live stack slot to
    /// decode output parameters from, so every other popped frame gets
    /// its return line via `print_unwound_returns` instead (spec §8 S4).
    fn handle_return(&mut self, thread: ThreadId, g: &GoroutineSnapshot) -> Result<()> {
        let bp_addr = g.current_pc.wrapping_sub(1);
        let popped = self.unwind(g);
        if popped.is_empty() {
            return Err(Error::internal("return trap with empty shadow stack"));
        }
        let live_index = popped.iter().position(|f| f.return_address == bp_addr).unwrap_or(popped.len() - 1);

        let base_depth = self.shadow_stacks.depth(g.id);
        let n = popped.len();
        for (i, frame) in popped.iter().enumerate() {
            let raw_depth = base_depth + n - i;
            if i != live_index {
                self.print_abbreviated_return(g, frame, raw_depth)?;
                continue;
            }
            let depth = self.print_depth(g, raw_depth);
            if depth <= self.trace_level {
                let stack_frame = self.process.introspector.stack_frame_at(
                    self.process.client.as_ref(),
                    &self.process.binary,
                    g.current_stack_addr.wrapping_sub(8),
                    self.process.binary.function(frame.function).start_address,
                    self.parse_level,
                )?;
                let line = print::format_return(depth, g.id, &stack_frame);
                print::write_line(&mut self.sink, &line).map_err(Error::Io)?;
            }
        }
        self.temporarily_remove_and_step(thread, bp_addr)
    }
}

fn is_eligible(name: &str) -> bool {
    if name == config::PANIC_THROW_SYMBOL {
        return true;
    }
    if name.starts_with(config::RUNTIME_INTERNAL_PREFIX) {
        return false;
    }
    !config::NON_FUNCTION_SYMBOL_MARKERS.iter().any(|m| name.contains(m))
}

trait FunctionStart {
    fn function_start(&self, process: &Process) -> u64;
}

impl FunctionStart for ShadowFrame {
    fn function_start(&self, process: &Process) -> u64 {
        process.binary.function(self.function).start_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_internal_symbol_stays_eligible() {
        assert!(is_eligible("runtime.gopanic"));
    }

    #[test]
    fn runtime_internal_prefix_excluded() {
        assert!(!is_eligible("runtime.mallocgc"));
    }

    #[test]
    fn typehash_helper_excluded() {
        assert!(!is_eligible("main..typehash.123"));
    }

    #[test]
    fn ordinary_user_function_eligible() {
        assert!(is_eligible("main.fib"));
    }
}

/// State-machine tests driving `Controller` end to end against a
/// synthetic `Binary` and a fake `DebugApiClient`, per SPEC_FULL §12
/// "Test Tooling": no compiled target or ptrace privileges needed to
/// check the call/return/depth bookkeeping against the spec's own
/// literal scenarios (§8 S1/S5).
#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;
    use std::rc::Rc;

    use crate::binary::types::{Function, Parameter, Type, TypeKind};
    use crate::binary::Binary;
    use crate::config::{Os, RuntimeVersion};
    use crate::debug_api::{DebugApiClient, Event};
    use crate::goroutine::{GoroutineSnapshot, Introspector};
    use crate::registers::Registers;

    struct FakeClient {
        mem: RefCell<Map<u64, u8>>,
        regs: RefCell<Map<ThreadId, Registers>>,
    }

    impl FakeClient {
        fn new() -> FakeClient {
            FakeClient { mem: RefCell::new(Map::new()), regs: RefCell::new(Map::new()) }
        }

        fn write_u64(&self, addr: u64, val: u64) {
            let mut mem = self.mem.borrow_mut();
            for (i, b) in val.to_le_bytes().iter().enumerate() {
                mem.insert(addr + i as u64, *b);
            }
        }

        fn set_regs(&self, thread: ThreadId, pc: u64, sp: u64) {
            let mut raw: libc::user_regs_struct = unsafe { std::mem::zeroed() };
            raw.rip = pc;
            raw.rsp = sp;
            self.regs.borrow_mut().insert(thread, Registers::from_raw(raw));
        }
    }

    impl DebugApiClient for FakeClient {
        fn launch(&mut self, _: &str, _: &[String]) -> Result<ThreadId> {
            unimplemented!()
        }
        fn attach(&mut self, _: libc::pid_t) -> Result<ThreadId> {
            unimplemented!()
        }
        fn detach(&mut self) -> Result<()> {
            Ok(())
        }
        fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
            let mem = self.mem.borrow();
            Ok((0..len as u64).map(|i| *mem.get(&(addr + i)).unwrap_or(&0)).collect())
        }
        fn write_memory(&self, addr: u64, bytes: &[u8]) -> Result<()> {
            let mut mem = self.mem.borrow_mut();
            for (i, b) in bytes.iter().enumerate() {
                mem.insert(addr + i as u64, *b);
            }
            Ok(())
        }
        fn read_registers(&self, thread: ThreadId) -> Result<Registers> {
            Ok(*self.regs.borrow().get(&thread).expect("registers not primed for thread"))
        }
        fn write_registers(&self, thread: ThreadId, regs: &Registers) -> Result<()> {
            self.regs.borrow_mut().insert(thread, *regs);
            Ok(())
        }
        fn read_tls(&self, _: ThreadId, _: i64) -> Result<u64> {
            unimplemented!("these tests drive handle_call/handle_return directly with a hand-built GoroutineSnapshot")
        }
        fn continue_and_wait(&mut self) -> Result<Event> {
            unimplemented!()
        }
        fn step_and_wait(&mut self, _: ThreadId) -> Result<Event> {
            Ok(Event::Exited(0))
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn int_param(name: &str, offset: u64, is_output: bool) -> Parameter {
        Parameter {
            name: Some(name.to_string()),
            ty: Type { name: "int".into(), kind: TypeKind::Int { bits: 64, signed: true }, size: 8, element: None, key: None, fields: vec![], length: 0 },
            stack_offset: offset,
            exists: true,
            is_output,
        }
    }

    fn fib_function() -> Function {
        Function {
            name: "main.fib".to_string(),
            start_address: 0x2000,
            end_address: 0x2010,
            parameters: vec![int_param("n", 0, false), int_param("r", 8, true)],
            args_size: 16,
        }
    }

    fn make_controller(client: FakeClient, trace_level: u32) -> (Controller, SharedBuf) {
        let sink = SharedBuf::default();
        let process = Process {
            client: Box::new(client),
            binary: Binary::synthetic(vec![fib_function()]),
            breakpoints: crate::breakpoint::Registry::new(),
            introspector: Introspector::new(Os::Linux, RuntimeVersion::new(1, 20)),
            leader: 1,
        };
        let controller = Controller::new(process, trace_level, 1, Box::new(sink.clone()));
        (controller, sink)
    }

    fn lines_of(sink: &SharedBuf) -> Vec<String> {
        String::from_utf8(sink.0.borrow().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Spec §8 S1: `fib(3)`, trace_level=1 — one call line, one return
    /// line, exactly as printed.
    #[test]
    fn call_then_return_prints_scenario_s1() {
        let client = FakeClient::new();
        const SP: u64 = 0x7000;
        const RET_ADDR: u64 = 0x9999;
        client.set_regs(1, fib_function().start_address + 1, SP);
        client.write_u64(SP, RET_ADDR); // return address
        client.write_u64(SP + 8, 3); // n = 3

        let (mut controller, sink) = make_controller(client, 1);
        let bp_addr = fib_function().start_address;
        {
            let client_ref = controller.process.client.as_ref();
            controller.process.breakpoints.set(client_ref, bp_addr).unwrap();
        }

        let g_call = GoroutineSnapshot {
            id: 1,
            ancestor_ids: Vec::new(),
            used_stack_size: 0x1000,
            current_pc: fib_function().start_address + 1,
            current_stack_addr: SP,
            next_defer_fn_addr: 0,
            panicking: false,
            panic_handler: None,
        };
        controller.handle_call(1, &g_call, bp_addr).unwrap();
        assert_eq!(controller.shadow_stacks.depth(1), 1);
        assert!(controller.process.breakpoints.is_hit(RET_ADDR, 1));

        // the callee writes its result (r = 2) before returning.
        controller.process.client.write_memory(SP + 8 + 8, &2i64.to_le_bytes()).unwrap();
        let mut raw: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        raw.rip = RET_ADDR + 1;
        raw.rsp = SP + 8;
        controller.process.client.write_registers(1, &Registers::from_raw(raw)).unwrap();

        let g_return = GoroutineSnapshot {
            id: 1,
            ancestor_ids: Vec::new(),
            used_stack_size: 0xFF8,
            current_pc: RET_ADDR + 1,
            current_stack_addr: SP + 8,
            next_defer_fn_addr: 0,
            panicking: false,
            panic_handler: None,
        };
        controller.handle_return(1, &g_return).unwrap();
        assert_eq!(controller.shadow_stacks.depth(1), 0);
        assert!(!controller.process.breakpoints.exists(RET_ADDR));

        assert_eq!(
            lines_of(&sink),
            vec!["\\ (#1) main.fib(n = 3)".to_string(), "/ (#1) main.fib() (r = 2)".to_string()]
        );
    }
}
