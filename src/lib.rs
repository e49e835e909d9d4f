//! A function-call tracer for compiled Go-runtime binaries, driven over
//! ptrace. See the module layout: `debug_api` is the OS-level control
//! surface (component A), `binary` the DWARF/pclntab inspector (B),
//! `goroutine` the per-goroutine introspector (C), `breakpoint` the
//! breakpoint registry (D), and `controller` the tracing event loop (E).

#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod log;

pub mod binary;
pub mod breakpoint;
pub mod config;
pub mod controller;
pub mod debug_api;
pub mod error;
pub mod goroutine;
pub mod process;
pub mod registers;

pub use config::{Os, RuntimeVersion};
pub use controller::{ControlHandle, Controller, ExitReason};
pub use error::{Error, Result};
pub use process::Process;
