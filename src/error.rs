use thiserror::Error;

/// The five error kinds the tracer ever produces. `main_loop` treats
/// `ProcessIo` and `DebugInfo` as fatal; everything else is either
/// swallowed at the call site or signals cooperative shutdown.
#[derive(Debug, Error)]
pub enum Error {
    #[error("process I/O error: {0}")]
    ProcessIo(#[from] nix::Error),

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("debug info error: {0}")]
    DebugInfo(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    pub fn debug_info<S: Into<String>>(msg: S) -> Error {
        Error::DebugInfo(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Error {
        Error::Internal(msg.into())
    }

    /// True if this is the "target already gone" flavor of I/O error,
    /// which `detach` should swallow rather than propagate.
    pub fn is_no_such_process(&self) -> bool {
        matches!(self, Error::ProcessIo(nix::Error::Sys(nix::errno::Errno::ESRCH)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
