pub mod event;
pub mod ptrace;
pub mod worker;

pub use event::{Event, ThreadId, TrapCause, TrapInfo};

use crate::error::Result;
use crate::registers::Registers;

/// OS-level control of one target (component A, spec §4.1). The only
/// component allowed to issue ptrace/mach-class requests. Every method
/// serializes onto the single OS thread that owns the target's tracer
/// relationship internally (see `worker::Dispatcher`); callers may
/// invoke these from any context.
pub trait DebugApiClient {
    fn launch(&mut self, path: &str, argv: &[String]) -> Result<ThreadId>;
    fn attach(&mut self, pid: libc::pid_t) -> Result<ThreadId>;
    fn detach(&mut self) -> Result<()>;

    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>>;
    fn write_memory(&self, addr: u64, bytes: &[u8]) -> Result<()>;

    fn read_registers(&self, thread: ThreadId) -> Result<Registers>;
    fn write_registers(&self, thread: ThreadId, regs: &Registers) -> Result<()>;

    /// Reads a u64 at `fs_base/gs_base + offset` for `thread`. Per spec
    /// §4.1, a `DebugInfo`-flavored "unspecified threads stopped"
    /// condition is surfaced as an error whose message names the
    /// threads that still need a `step_and_wait` before this can
    /// succeed; it is the only way the client asks the controller for
    /// help.
    fn read_tls(&self, thread: ThreadId, offset: i64) -> Result<u64>;

    fn continue_and_wait(&mut self) -> Result<Event>;
    fn step_and_wait(&mut self, thread: ThreadId) -> Result<Event>;
}
