//! The process handle (spec §3 Data Model "Process handle"). Owns the
//! debug-API client, the binary inspector, and the breakpoint registry —
//! the parts of the system that are tied to one running target. The
//! controller (component E) layers the shadow stacks, tracing-points
//! registry, and output sink on top, since those belong to a trace
//! *session* rather than the OS-level attachment itself.

use crate::binary::Binary;
use crate::breakpoint::Registry;
use crate::config::{Os, RuntimeVersion};
use crate::debug_api::ptrace::PtraceClient;
use crate::debug_api::{DebugApiClient, ThreadId};
use crate::error::Result;
use crate::goroutine::Introspector;

pub struct Process {
    pub client: Box<dyn DebugApiClient>,
    pub binary: Binary,
    pub breakpoints: Registry,
    pub introspector: Introspector,
    pub leader: ThreadId,
}

impl Process {
    pub fn launch(path: &str, argv: &[String], os: Os, version: RuntimeVersion) -> Result<Process> {
        let binary = Binary::open(path)?;
        let mut client = PtraceClient::new();
        let leader = client.launch(path, argv)?;
        Ok(Process {
            client: Box::new(client),
            binary,
            breakpoints: Registry::new(),
            introspector: Introspector::new(os, version),
            leader,
        })
    }

    pub fn attach(pid: libc::pid_t, path: &str, os: Os, version: RuntimeVersion) -> Result<Process> {
        let binary = Binary::open(path)?;
        let mut client = PtraceClient::new();
        let leader = client.attach(pid)?;
        Ok(Process {
            client: Box::new(client),
            binary,
            breakpoints: Registry::new(),
            introspector: Introspector::new(os, version),
            leader,
        })
    }

    /// Restores every byte this process's breakpoint registry ever
    /// modified before releasing the OS-level attachment (spec P3).
    pub fn detach(&mut self) -> Result<()> {
        let addrs: Vec<u64> = self.breakpoints.installed_bytes().into_iter().map(|(addr, _)| addr).collect();
        for addr in addrs {
            if let Err(e) = self.breakpoints.clear(self.client.as_ref(), addr) {
                if !e.is_no_such_process() {
                    log!(crate::log::LogLevel::LogDebug, "failed to restore byte at 0x{:x}: {}", addr, e);
                }
            }
        }
        self.client.detach()
    }
}
