//! C8 — terminal controller.
//!
//! tcsetpgrp handoff and the `fg`/`bg` handshake. Grounded on ion's
//! `set_foreground_as`/`set_bg_task_in_foreground`
//! (`src/lib/shell/pipe_exec/job_control.rs`) and `ForegroundSignals`
//! (`src/lib/shell/pipe_exec/foreground.rs`).

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use nix::unistd::{tcsetpgrp, Pid};

use crate::signals::SignalBlockGuard;

/// Which fd is the controlling terminal; always 0 for an interactive shell,
/// parameterized here so tests can run without a real tty.
#[derive(Debug, Clone, Copy)]
pub struct TerminalController {
    pub fd: RawFd,
}

impl TerminalController {
    pub fn new(fd: RawFd) -> Self { TerminalController { fd } }

    /// Gives `pid`'s process group the controlling terminal. Signals that
    /// would otherwise fire from this very call (SIGTTOU) are blocked for
    /// its duration, matching ion's bracketing of
    /// `unistd::tcsetpgrp` between `signals::block()`/`signals::unblock()`.
    pub fn set_foreground(&self, pid: Pid) -> nix::Result<()> {
        let _guard = SignalBlockGuard::new().map_err(|_| nix::Error::EINVAL)?;
        tcsetpgrp(self.fd, pid)
    }

    /// Reclaims the terminal for the shell itself once a foreground job
    /// has exited or stopped.
    pub fn reclaim(&self) -> nix::Result<()> { self.set_foreground(Pid::this()) }
}

/// The atomic handshake structure the `fg` builtin uses to ask the
/// background-job watcher thread to hand a stopped/backgrounded job's pid
/// back into the foreground — unchanged in shape from ion's
/// `ForegroundSignals`, ported onto the now-stable `AtomicU32`/`AtomicU8`
/// ion's own comments say they were waiting for.
#[derive(Debug, Default)]
pub struct ForegroundSignals {
    grab: AtomicU32,
    status: AtomicU8,
    reply: AtomicU8,
}

const REPLIED: u8 = 1;
const ERRORED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundResult { Errored, Status(u8) }

impl ForegroundSignals {
    pub fn new() -> Self { Self::default() }

    pub fn was_grabbed(&self, pid: u32) -> bool { self.grab.load(Ordering::SeqCst) == pid }

    pub fn signal_to_grab(&self, pid: u32) { self.grab.store(pid, Ordering::SeqCst); }

    pub fn reply_with(&self, status: u8) {
        self.grab.store(0, Ordering::SeqCst);
        self.status.store(status, Ordering::SeqCst);
        self.reply.store(REPLIED, Ordering::SeqCst);
    }

    pub fn errored(&self) {
        self.grab.store(0, Ordering::SeqCst);
        self.reply.store(ERRORED, Ordering::SeqCst);
    }

    pub fn was_processed(&self) -> Option<ForegroundResult> {
        let reply = self.reply.swap(0, Ordering::SeqCst);
        if reply & ERRORED != 0 {
            Some(ForegroundResult::Errored)
        } else if reply & REPLIED != 0 {
            Some(ForegroundResult::Status(self.status.load(Ordering::SeqCst)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_foreground_signals_report_nothing() {
        let fg = ForegroundSignals::new();
        assert_eq!(fg.was_processed(), None);
    }

    #[test]
    fn reply_then_processed_clears_state() {
        let fg = ForegroundSignals::new();
        fg.signal_to_grab(42);
        assert!(fg.was_grabbed(42));
        fg.reply_with(7);
        assert_eq!(fg.was_processed(), Some(ForegroundResult::Status(7)));
        assert_eq!(fg.was_processed(), None);
        assert!(!fg.was_grabbed(42));
    }

    #[test]
    fn errored_reports_errored_once() {
        let fg = ForegroundSignals::new();
        fg.errored();
        assert_eq!(fg.was_processed(), Some(ForegroundResult::Errored));
        assert_eq!(fg.was_processed(), None);
    }
}
