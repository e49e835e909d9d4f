use libc::pid_t;
use nix::sys::signal::Signal;

pub type ThreadId = pid_t;

/// Why a given thread's trap was reported. The debug-API client tells
/// these apart so the controller never has to re-derive "was this a
/// breakpoint or a delivered signal" from scratch (spec §4.1 supplement).
#[derive(Copy, Clone, Debug)]
pub enum TrapCause {
    /// SIGTRAP, consistent with having executed a 0xCC byte (or a
    /// single-step completing).
    Breakpoint,
    /// Some other signal was pending; the client has not yet forwarded
    /// it. The controller is expected to resume with it via
    /// `continue_and_wait`, which re-delivers it transparently.
    Forwarded(Signal),
}

#[derive(Copy, Clone, Debug)]
pub struct TrapInfo {
    pub thread: ThreadId,
    pub cause: TrapCause,
}

#[derive(Clone, Debug)]
pub enum Event {
    Trapped(Vec<TrapInfo>),
    Exited(i32),
    CoreDump,
    Terminated(Signal),
}
