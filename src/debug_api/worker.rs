//! The "one OS thread may issue ptrace-class syscalls" constraint (spec
//! §4.1, Design Note in §9) implemented as a dedicated dispatcher thread
//! that owns a request channel. Public `DebugApiClient` methods enqueue a
//! closure and block on a private reply channel; they may be called from
//! any thread.

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct Dispatcher {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn() -> Dispatcher {
        let (tx, rx) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("gotrace-ptrace".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .expect("failed to spawn ptrace dispatcher thread");
        Dispatcher {
            jobs: Some(tx),
            handle: Some(handle),
        }
    }

    /// Run `f` on the dispatcher thread and block until it completes.
    pub fn call<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel::<T>();
        let job: Job = Box::new(move || {
            let result = f();
            // The dispatcher thread outlives every call; a send failure
            // here would mean the caller leaked its receiver, which
            // can't happen through this API.
            let _ = reply_tx.send(result);
        });
        self.jobs
            .as_ref()
            .expect("dispatcher used after shutdown")
            .send(job)
            .expect("ptrace dispatcher thread terminated unexpectedly");
        reply_rx
            .recv()
            .expect("ptrace dispatcher thread dropped the reply channel")
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        // Drop the sender first so the worker's recv loop observes a
        // closed channel and exits, then join it so a detach truly
        // completes before this returns.
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_runs_on_dispatcher_and_returns_result() {
        let d = Dispatcher::spawn();
        let result = d.call(|| 2 + 2);
        assert_eq!(result, 4);
    }

    #[test]
    fn multiple_calls_are_serialized() {
        let d = Dispatcher::spawn();
        for i in 0..50 {
            assert_eq!(d.call(move || i * 2), i * 2);
        }
    }
}
