//! Signal blocking helpers, grounded on ion's `src/shell/signals.rs`
//! (`block`/`unblock` around `sigprocmask`), plus a process-wide atomic
//! SIGCHLD generation counter in place of a signal handler doing real
//! work.

use std::sync::atomic::{AtomicU64, Ordering};

use nix::sys::signal::{self, SigSet, Signal};

/// Bumped by the SIGCHLD handler only — no other work happens in signal
/// context; signal handlers should only ever set atomic flags. The reaper
/// polls this counter to know a wait() call might now make progress.
static SIGCHLD_GENERATION: AtomicU64 = AtomicU64::new(0);

/// Safe to call from a signal handler: only ever increments an atomic.
pub extern "C" fn sigchld_handler(_signum: libc_like::c_int) {
    SIGCHLD_GENERATION.fetch_add(1, Ordering::SeqCst);
}

pub fn current_generation() -> u64 { SIGCHLD_GENERATION.load(Ordering::SeqCst) }

/// Minimal local stand-in for `libc::c_int` so this module doesn't need a
/// direct `libc` dependency solely for one type alias; `nix` re-exports the
/// real signal plumbing used everywhere else.
mod libc_like {
    pub type c_int = i32;
}

/// Blocks the job-control-relevant signals (SIGCHLD, SIGTSTP, SIGTTOU,
/// SIGTTIN) for the duration of a critical section — pgid assignment,
/// terminal handoff — the same set ion blocks in
/// `src/shell/signals.rs` and `set_foreground_as`.
pub fn block_job_control_signals() -> nix::Result<SigSet> {
    let mut set = SigSet::empty();
    for sig in [Signal::SIGCHLD, Signal::SIGTSTP, Signal::SIGTTOU, Signal::SIGTTIN] {
        set.add(sig);
    }
    let mut old = SigSet::empty();
    signal::sigprocmask(signal::SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut old))?;
    Ok(old)
}

pub fn restore_signal_mask(old: SigSet) -> nix::Result<()> {
    signal::sigprocmask(signal::SigmaskHow::SIG_SETMASK, Some(&old), None)
}

/// RAII guard: blocks job-control signals on construction, restores the
/// previous mask on drop. Grounded on ion's bracketed
/// `signals::block()` / `signals::unblock()` call pairs in
/// `pipe_exec/job_control.rs::set_foreground_as`.
pub struct SignalBlockGuard {
    previous: Option<SigSet>,
}

impl SignalBlockGuard {
    pub fn new() -> nix::Result<Self> {
        Ok(SignalBlockGuard { previous: Some(block_job_control_signals()?) })
    }
}

impl Drop for SignalBlockGuard {
    fn drop(&mut self) {
        if let Some(old) = self.previous.take() {
            let _ = restore_signal_mask(old);
        }
    }
}
