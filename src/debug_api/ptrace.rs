//! Linux/x86-64 implementation of [`DebugApiClient`] over `ptrace(2)`,
//! using `/proc/<pid>/mem` for bulk memory I/O (a short read is a hard
//! error, matching spec §4.1) and `nix::sys::ptrace` for control
//! requests. All actual syscalls run on the dispatcher thread spawned
//! by `worker::Dispatcher` — every public method here just marshals
//! arguments onto that thread and blocks for the reply.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write as IoWrite};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::{Arc, Mutex};

use libc::pid_t;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use super::event::{Event, ThreadId, TrapCause, TrapInfo};
use super::worker::Dispatcher;
use super::DebugApiClient;
use crate::error::{Error, Result};
use crate::log::LogLevel::LogDebug;
use crate::registers::Registers;

fn trace_options() -> Options {
    Options::PTRACE_O_TRACECLONE
        | Options::PTRACE_O_TRACEFORK
        | Options::PTRACE_O_TRACEEXEC
        | Options::PTRACE_O_TRACEEXIT
}

struct Inner {
    leader: pid_t,
    /// Threads currently stopped and owed a resume, with the cause
    /// that stopped them (a pending signal to re-deliver, or none for
    /// a plain breakpoint trap).
    trapped: HashMap<ThreadId, Option<Signal>>,
    mem: Option<File>,
}

impl Inner {
    fn mem_file(&mut self) -> Result<&mut File> {
        if self.mem.is_none() {
            let path = format!("/proc/{}/mem", self.leader);
            let f = OpenOptions::new().read(true).write(true).open(path)?;
            self.mem = Some(f);
        }
        Ok(self.mem.as_mut().unwrap())
    }

    /// Every thread id currently live under the traced thread group,
    /// from `/proc/<pid>/task`. Threads the kernel hasn't reported via
    /// a wait yet are still present here, so newly cloned threads are
    /// picked up without needing a dedicated clone-event path.
    fn live_threads(&self) -> Vec<ThreadId> {
        let dir = format!("/proc/{}/task", self.leader);
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                if let Ok(tid) = entry.file_name().to_string_lossy().parse::<pid_t>() {
                    out.push(tid);
                }
            }
        }
        out
    }
}

pub struct PtraceClient {
    dispatcher: Dispatcher,
    inner: Arc<Mutex<Inner>>,
}

impl PtraceClient {
    pub fn new() -> PtraceClient {
        PtraceClient {
            dispatcher: Dispatcher::spawn(),
            inner: Arc::new(Mutex::new(Inner {
                leader: 0,
                trapped: HashMap::new(),
                mem: None,
            })),
        }
    }

    fn wait_status_to_event(status: WaitStatus, tid: ThreadId) -> Event {
        match status {
            WaitStatus::Exited(_, code) => Event::Exited(code),
            WaitStatus::Signaled(_, sig, core_dumped) => {
                if core_dumped {
                    Event::CoreDump
                } else {
                    Event::Terminated(sig)
                }
            }
            WaitStatus::Stopped(_, Signal::SIGTRAP) => Event::Trapped(vec![TrapInfo {
                thread: tid,
                cause: TrapCause::Breakpoint,
            }]),
            WaitStatus::Stopped(_, sig) => Event::Trapped(vec![TrapInfo {
                thread: tid,
                cause: TrapCause::Forwarded(sig),
            }]),
            WaitStatus::PtraceEvent(_, _, _) => Event::Trapped(vec![TrapInfo {
                thread: tid,
                cause: TrapCause::Breakpoint,
            }]),
            other => panic!("unexpected wait status: {:?}", other),
        }
    }
}

impl Default for PtraceClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugApiClient for PtraceClient {
    fn launch(&mut self, path: &str, argv: &[String]) -> Result<ThreadId> {
        let path = path.to_string();
        let argv = argv.to_vec();
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<ThreadId> {
            let mut cmd = Command::new(&path);
            cmd.args(&argv);
            unsafe {
                cmd.pre_exec(|| {
                    ptrace::traceme()
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
                });
            }
            let child = cmd.spawn()?;
            let pid = Pid::from_raw(child.id() as pid_t);
            match waitpid(pid, None)? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
                other => {
                    return Err(Error::internal(format!(
                        "expected initial SIGTRAP from exec, got {:?}",
                        other
                    )))
                }
            }
            ptrace::setoptions(pid, trace_options())?;
            let mut guard = inner.lock().unwrap();
            guard.leader = pid.as_raw();
            guard.trapped.insert(pid.as_raw(), None);
            Ok(pid.as_raw())
        })
    }

    fn attach(&mut self, pid: pid_t) -> Result<ThreadId> {
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<ThreadId> {
            let p = Pid::from_raw(pid);
            ptrace::attach(p)?;
            match waitpid(p, None)? {
                WaitStatus::Stopped(_, Signal::SIGSTOP) | WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
                other => {
                    return Err(Error::internal(format!(
                        "expected stop after attach, got {:?}",
                        other
                    )))
                }
            }
            ptrace::setoptions(p, trace_options())?;
            let mut guard = inner.lock().unwrap();
            guard.leader = pid;
            guard.trapped.insert(pid, None);
            Ok(pid)
        })
    }

    fn detach(&mut self) -> Result<()> {
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<()> {
            let guard = inner.lock().unwrap();
            for tid in guard.live_threads() {
                match ptrace::detach(Pid::from_raw(tid)) {
                    Ok(()) => {}
                    Err(nix::Error::Sys(nix::errno::Errno::ESRCH)) => {
                        log!(LogDebug, "thread {} already gone at detach", tid);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        })
    }

    fn read_memory(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<Vec<u8>> {
            let mut guard = inner.lock().unwrap();
            let file = guard.mem_file()?;
            file.seek(SeekFrom::Start(addr))?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)?;
            Ok(buf)
        })
    }

    fn write_memory(&self, addr: u64, bytes: &[u8]) -> Result<()> {
        let bytes = bytes.to_vec();
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<()> {
            let mut guard = inner.lock().unwrap();
            let file = guard.mem_file()?;
            file.seek(SeekFrom::Start(addr))?;
            file.write_all(&bytes)?;
            Ok(())
        })
    }

    fn read_registers(&self, thread: ThreadId) -> Result<Registers> {
        self.dispatcher
            .call(move || -> Result<Registers> {
                let raw = ptrace::getregs(Pid::from_raw(thread))?;
                Ok(Registers::from_raw(raw))
            })
    }

    fn write_registers(&self, thread: ThreadId, regs: &Registers) -> Result<()> {
        let raw = regs.raw();
        self.dispatcher.call(move || -> Result<()> {
            ptrace::setregs(Pid::from_raw(thread), raw)?;
            Ok(())
        })
    }

    fn read_tls(&self, thread: ThreadId, offset: i64) -> Result<u64> {
        let base = self.dispatcher.call(move || -> Result<u64> {
            let regs = ptrace::getregs(Pid::from_raw(thread))?;
            Ok(regs.fs_base)
        })?;
        let addr = (base as i64 + offset) as u64;
        let bytes = self.read_memory(addr, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes);
        Ok(u64::from_ne_bytes(buf))
    }

    fn continue_and_wait(&mut self) -> Result<Event> {
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<Event> {
            let mut guard = inner.lock().unwrap();
            let pending: Vec<(ThreadId, Option<Signal>)> =
                guard.trapped.drain().collect();
            for (tid, sig) in pending {
                match ptrace::cont(Pid::from_raw(tid), sig) {
                    Ok(()) => {}
                    Err(nix::Error::Sys(nix::errno::Errno::ESRCH)) => {
                        log!(LogDebug, "thread {} vanished before continue", tid);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            let leader = guard.leader;
            drop(guard);

            loop {
                match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                    Ok(status) => {
                        let tid = status
                            .pid()
                            .map(|p| p.as_raw())
                            .unwrap_or(leader);
                        let event = Self::wait_status_to_event(status, tid);
                        if let Event::Trapped(ref traps) = event {
                            let mut guard = inner.lock().unwrap();
                            for t in traps {
                                let pending_sig = match t.cause {
                                    TrapCause::Breakpoint => None,
                                    TrapCause::Forwarded(s) => Some(s),
                                };
                                guard.trapped.insert(t.thread, pending_sig);
                            }
                        }
                        return Ok(event);
                    }
                    Err(nix::Error::Sys(nix::errno::Errno::ECHILD)) => {
                        return Ok(Event::Exited(0));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        })
    }

    fn step_and_wait(&mut self, thread: ThreadId) -> Result<Event> {
        let inner = self.inner.clone();
        self.dispatcher.call(move || -> Result<Event> {
            {
                let mut guard = inner.lock().unwrap();
                let sig = guard.trapped.remove(&thread).flatten();
                ptrace::step(Pid::from_raw(thread), sig)?;
            }
            match waitpid(Pid::from_raw(thread), None) {
                Ok(status) => {
                    let event = Self::wait_status_to_event(status, thread);
                    if let Event::Trapped(ref traps) = event {
                        let mut guard = inner.lock().unwrap();
                        for t in traps {
                            let pending_sig = match t.cause {
                                TrapCause::Breakpoint => None,
                                TrapCause::Forwarded(s) => Some(s),
                            };
                            guard.trapped.insert(t.thread, pending_sig);
                        }
                    }
                    Ok(event)
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}
