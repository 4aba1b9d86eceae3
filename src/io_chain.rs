//! C2 — IO chain.
//!
//! The concrete set of stdio wiring for one [`crate::process::Process`]:
//! either inherited from the shell, connected to a pipe to a neighboring
//! stage, or captured into an in-memory buffer for an internal process
//! piped to an external one ("bufferfill", grounded on ion's
//! `RefinedJob` stdin/stdout/stderr fields and `do_redirection`/`need_tee`
//! in `src/lib/shell/pipe_exec/mod.rs`).

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;

use crate::redirection::Dup2Action;

/// Where one of a process's three standard streams is connected.
#[derive(Debug, Clone)]
pub enum IoEndpoint {
    /// Use the shell's own stream (the default for the first/last stage
    /// unless overridden by redirection).
    Inherit,
    /// The read or write end of a pipe to the next/previous pipeline stage.
    Pipe(RawFd),
    /// A redirected file descriptor, already resolved to a [`Dup2Action`].
    Redirected,
    /// An internal process's output is captured here instead of ever
    /// touching a real fd; `exec::internal` drains the write end into this
    /// buffer on a dedicated thread.
    Bufferfill(Arc<Mutex<Vec<u8>>>),
}

/// The full set of actions applied to a child immediately before exec, plus
/// the logical endpoints used to decide how the *parent* talks to it
/// (whether it needs to spawn a writer thread, wait on a pipe, etc).
/// Not `Clone`: `extra` may own real open file descriptors
/// ([`Dup2Action::OpenAndDup`]) that must never be duplicated.
#[derive(Debug, Default)]
pub struct IoChain {
    pub stdin: Option<IoEndpointSlot>,
    pub stdout: Option<IoEndpointSlot>,
    pub stderr: Option<IoEndpointSlot>,
    /// Extra redirections beyond the three standard streams (`3>&1`, etc).
    pub extra: SmallVec<[Dup2Action; 2]>,
}

#[derive(Debug, Clone)]
pub struct IoEndpointSlot {
    pub fd: RawFd,
    pub endpoint: IoEndpointKind,
}

#[derive(Debug, Clone)]
pub enum IoEndpointKind {
    Inherit,
    Pipe(RawFd),
    File(RawFd),
    Bufferfill(Arc<Mutex<Vec<u8>>>),
}

impl IoChain {
    pub fn new() -> Self { IoChain::default() }

    pub fn set_stdin_pipe(&mut self, read_fd: RawFd) {
        self.stdin = Some(IoEndpointSlot { fd: 0, endpoint: IoEndpointKind::Pipe(read_fd) });
    }

    pub fn set_stdout_pipe(&mut self, write_fd: RawFd) {
        self.stdout = Some(IoEndpointSlot { fd: 1, endpoint: IoEndpointKind::Pipe(write_fd) });
    }

    pub fn set_stdout_bufferfill(&mut self, buf: Arc<Mutex<Vec<u8>>>) {
        self.stdout = Some(IoEndpointSlot { fd: 1, endpoint: IoEndpointKind::Bufferfill(buf) });
    }

    /// Upper bound, in bytes, applied to a single bufferfill capture before
    /// the writer reports [`crate::error::ExecError::ReadTooMuch`]. Grounded
    /// on fish's `read_limit`; ion has no equivalent so this is a
    /// supplemented behavior.
    pub const READ_TOO_MUCH_LIMIT: usize = 100 * 1024 * 1024;

    /// Resolves which fd actually backs `target` once every action in
    /// `extra` has been applied, following `3>&1`-style dup2 chains to
    /// their ultimate source. See [`crate::redirection::fd_for_target_fd`].
    pub fn resolved_fd(&self, target: RawFd) -> RawFd {
        crate::redirection::fd_for_target_fd(&self.extra, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chain_has_no_slots() {
        let chain = IoChain::new();
        assert!(chain.stdin.is_none());
        assert!(chain.stdout.is_none());
        assert!(chain.stderr.is_none());
    }

    #[test]
    fn resolved_fd_follows_extra_dup_chain() {
        use crate::redirection::Dup2Action;
        let mut chain = IoChain::new();
        chain.extra = SmallVec::from_vec(vec![Dup2Action::DupFd { fd: 2, source: 1 }]);
        assert_eq!(chain.resolved_fd(2), 1);
        assert_eq!(chain.resolved_fd(1), 1);
    }

    #[test]
    fn bufferfill_slot_shares_the_same_buffer() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut chain = IoChain::new();
        chain.set_stdout_bufferfill(buf.clone());
        buf.lock().unwrap().extend_from_slice(b"hi");
        if let Some(slot) = &chain.stdout {
            if let IoEndpointKind::Bufferfill(shared) = &slot.endpoint {
                assert_eq!(&**shared.lock().unwrap(), b"hi");
                return;
            }
        }
        panic!("expected bufferfill slot");
    }
}
