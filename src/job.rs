//! C4 — job record.
//!
//! One pipeline: its processes, its process group, and the bookkeeping the
//! reaper (C7) and terminal controller (C8) need. Grounded on ion's
//! `Job`/`JobKind` (`src/shell/job.rs`, modernized in `src/lib/shell/job.rs`).

use nix::unistd::Pid;

use crate::io_chain::IoChain;
use crate::process::Process;

bitflags::bitflags! {
    /// Grounded on ion's `bitflags!` usage in
    /// `src/lib/builtins/status.rs`, extended with the rest of fish's
    /// `job_flag_t`/`block_t` bits (`src/job_group.h`, `src/parser.h`) that
    /// the foreground/background and notification machinery needs.
    pub struct JobFlags: u16 {
        /// Run detached from the controlling terminal, never taking the
        /// foreground pgroup.
        const BACKGROUND       = 0b0000_0001;
        /// `not job` — invert the final exit status.
        const NEGATE           = 0b0000_0010;
        /// The job's pgid has already been assigned to its first process;
        /// later processes `setpgid` to join it instead of starting a new
        /// group.
        const PGID_SET         = 0b0000_0100;
        /// The job was stopped (SIGTSTP/SIGTTOU/SIGTTIN) and is parked in
        /// the background job table awaiting `fg`/`bg`.
        const STOPPED          = 0b0000_1000;
        /// This shell has job control over the job's process group (can
        /// give/take the terminal, send it SIGCONT/SIGTTOU). A job launched
        /// while job control is off (a non-interactive script, or a
        /// substitution subshell) never gets this set.
        const JOB_CONTROL      = 0b0001_0000;
        /// Currently holds the controlling terminal and is the one the user
        /// is interacting with. Cleared while a nested job runs (see
        /// `Job::enter_nested_builtin`) and restored after.
        const FOREGROUND       = 0b0010_0000;
        /// Every process has been populated and handed a pid (or inline
        /// status); `false` while still being built up stage by stage.
        const CONSTRUCTED      = 0b0100_0000;
        /// The user has already been told about this job's completion/stop
        /// (the "[1]  Done  sleep 5" style line); avoids repeating it on
        /// every subsequent poll.
        const NOTIFIED         = 0b1000_0000;
        /// Suppress the notification entirely, even the first time — used
        /// for jobs the shell spawns on the user's behalf that shouldn't
        /// clutter the job-complete feed (a `$(...)` subshell's job, for
        /// instance).
        const SKIP_NOTIFICATION = 0b0001_0000_0000;
        /// Wait on this job by polling each process's pid individually
        /// rather than the whole process group — needed when the group
        /// itself was never fully formed (a single internal process that
        /// never forked).
        const WAIT_BY_PROCESS  = 0b0010_0000_0000;
        /// Launched from inside another job's builtin (a function or block
        /// called while an enclosing pipeline is still running) rather than
        /// directly from the top-level script.
        const NESTED           = 0b0100_0000_0000;
        /// This job's first process is also its process group's leader —
        /// the common case; unset for a job that joined a pgid created by
        /// an already-running group (rare, but distinct from `PGID_SET`,
        /// which only tracks whether *a* pgid has been chosen).
        const IS_GROUP_ROOT    = 0b1000_0000_0000;
    }
}

/// A runtime pipeline: zero or more [`Process`]es connected by pipes.
#[derive(Debug)]
pub struct Job {
    pub id: u32,
    pub description: String,
    pub processes: Vec<Process>,
    pub pgid: Option<Pid>,
    pub flags: JobFlags,
    /// Redirections applied to the whole process group rather than any one
    /// stage — `begin ... end 2>&1`'s block-level target, kept here too so
    /// a caller can inspect what's redirected without walking every stage's
    /// own `io.extra`.
    pub block_io: Option<IoChain>,
    /// The terminal's mode snapshot taken the moment this job was stopped,
    /// so resuming it with `fg`/`bg` can restore exactly what it left
    /// behind (raw mode, disabled echo, and so on) instead of whatever mode
    /// the shell itself was last in.
    pub tmodes: Option<nix::sys::termios::Termios>,
    /// Whether this job was introduced by a leading `time` keyword; the
    /// walker prints the elapsed-time line once wait completes.
    pub wants_timing: bool,
}

impl Job {
    pub fn new(id: u32, description: impl Into<String>) -> Self {
        Job {
            id,
            description: description.into(),
            processes: Vec::new(),
            pgid: None,
            flags: JobFlags::empty(),
            block_io: None,
            tmodes: None,
            wants_timing: false,
        }
    }

    pub fn is_background(&self) -> bool { self.flags.contains(JobFlags::BACKGROUND) }
    pub fn is_negated(&self) -> bool { self.flags.contains(JobFlags::NEGATE) }
    pub fn is_stopped(&self) -> bool { self.flags.contains(JobFlags::STOPPED) }
    pub fn is_foreground(&self) -> bool { self.flags.contains(JobFlags::FOREGROUND) }

    /// Clears `FOREGROUND` for the duration of a builtin that runs another
    /// job on this shell's behalf (a function body containing its own
    /// pipeline, for instance), then restores whatever it was before —
    /// mirrors ion's save/restore of `Shell::is_background_shell`-adjacent
    /// state around nested builtin dispatch in
    /// `src/lib/shell/pipe_exec/mod.rs`. The nested job itself should run
    /// with `FOREGROUND` clear on entry and the caller restores this job's
    /// flag afterward with the returned guard value.
    pub fn suspend_foreground_for_nested_builtin(&mut self) -> bool {
        let was_foreground = self.flags.contains(JobFlags::FOREGROUND);
        self.flags.remove(JobFlags::FOREGROUND);
        was_foreground
    }

    pub fn restore_foreground(&mut self, was_foreground: bool) {
        if was_foreground {
            self.flags.insert(JobFlags::FOREGROUND);
        } else {
            self.flags.remove(JobFlags::FOREGROUND);
        }
    }

    pub fn all_completed(&self) -> bool { self.processes.iter().all(|p| p.completed) }

    /// The job's own exit status: the last process's status, with negation
    /// applied.
    pub fn exit_status(&self) -> Option<i32> {
        let last = self.processes.last()?;
        let status = last.status?;
        Some(if self.is_negated() { (status == 0) as i32 } else { status })
    }

    /// Assigns the job's pgid from its first launched process, the way
    /// `set_process_group` does in ion's
    /// `src/lib/shell/pipe_exec/mod.rs`: first process to fork defines the
    /// group, everyone else joins it.
    pub fn set_process_group(&mut self, pid: Pid) {
        if !self.flags.contains(JobFlags::PGID_SET) {
            self.pgid = Some(pid);
            self.flags.insert(JobFlags::PGID_SET);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{Process, ProcessKind};

    fn proc_with_status(status: i32) -> Process {
        let mut p = Process::new(ProcessKind::External { path: "/bin/true".into() }, vec!["true".into()]);
        p.mark_exited(status);
        p
    }

    #[test]
    fn exit_status_is_last_process_status() {
        let mut job = Job::new(1, "a | b");
        job.processes.push(proc_with_status(0));
        job.processes.push(proc_with_status(7));
        assert_eq!(job.exit_status(), Some(7));
    }

    #[test]
    fn negated_job_inverts_success_to_failure_and_back() {
        let mut job = Job::new(1, "not true");
        job.flags.insert(JobFlags::NEGATE);
        job.processes.push(proc_with_status(0));
        assert_eq!(job.exit_status(), Some(1));

        let mut job2 = Job::new(2, "not false");
        job2.flags.insert(JobFlags::NEGATE);
        job2.processes.push(proc_with_status(1));
        assert_eq!(job2.exit_status(), Some(0));
    }

    #[test]
    fn pgid_locks_to_first_assignment() {
        let mut job = Job::new(1, "a | b");
        job.set_process_group(Pid::from_raw(100));
        job.set_process_group(Pid::from_raw(200));
        assert_eq!(job.pgid, Some(Pid::from_raw(100)));
    }
}
