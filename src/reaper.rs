//! C7 — reaper.
//!
//! Grounded on ion's `watch_foreground`/`watch_background`
//! (`src/lib/shell/pipe_exec/job_control.rs`): a `waitpid(-pgid, ...)` loop
//! driven by the SIGCHLD generation counter, with foreground jobs stopping
//! synchronously and background jobs polled from a monitor thread.

use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::event::{Event, EventKind, EventStore};
use crate::job::{Job, JobFlags};
use crate::signals::current_generation;

/// What happened to a job this reap pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// No change; nothing in the group has changed state yet.
    Pending,
    /// The whole group has exited/completed; carries the job's final
    /// status (already negation-adjusted by [`Job::exit_status`]).
    Completed(i32),
    /// The group was stopped (SIGTSTP/SIGTTOU/SIGTTIN); should be parked in
    /// the background job table.
    Stopped,
}

/// Waits on one job's process group until every process has either exited
/// or the whole group has stopped, updating each [`crate::process::Process`]
/// as statuses arrive. Mirrors ion's `watch_foreground` loop
/// (`WUNTRACED`, `WaitStatus::Exited`/`Signaled`/`Stopped`).
pub fn reap_foreground(job: &mut Job, events: &mut dyn EventStore) -> nix::Result<ReapOutcome> {
    let pgid = match job.pgid {
        Some(p) => p,
        None => {
            let outcome = ReapOutcome::Completed(job.exit_status().unwrap_or(0));
            fire_job_exit(job, events);
            return Ok(outcome);
        }
    };
    let wait_target = Pid::from_raw(-pgid.as_raw());

    loop {
        if job.all_completed() {
            let outcome = ReapOutcome::Completed(job.exit_status().unwrap_or(0));
            fire_job_exit(job, events);
            return Ok(outcome);
        }
        match waitpid(wait_target, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(pid, code)) => record_exit(job, pid, code, None, events),
            Ok(WaitStatus::Signaled(pid, signal, _core_dumped)) => {
                record_exit(job, pid, crate::status::signal_code(signal as i32), Some(signal as i32), events);
            }
            Ok(WaitStatus::Stopped(_, _)) => {
                job.flags.insert(JobFlags::STOPPED);
                save_terminal_modes(job);
                eprintln!("shell-core: stopped: {}", job.description);
                return Ok(ReapOutcome::Stopped);
            }
            Ok(WaitStatus::Continued(_)) | Ok(WaitStatus::StillAlive) => continue,
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(nix::Error::ECHILD) => {
                let outcome = ReapOutcome::Completed(job.exit_status().unwrap_or(0));
                fire_job_exit(job, events);
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Non-blocking poll used by the background-job monitor (one thread per
/// background job, matching ion's `send_to_background` watcher
/// thread rather than a single global poller).
pub fn poll_background(job: &mut Job, events: &mut dyn EventStore) -> nix::Result<ReapOutcome> {
    let pgid = match job.pgid {
        Some(p) => p,
        None => return Ok(ReapOutcome::Pending),
    };
    let wait_target = Pid::from_raw(-pgid.as_raw());
    loop {
        match waitpid(wait_target, Some(WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED | WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => return Ok(ReapOutcome::Pending),
            Ok(WaitStatus::Exited(pid, code)) => {
                record_exit(job, pid, code, None, events);
                if job.all_completed() {
                    let outcome = ReapOutcome::Completed(job.exit_status().unwrap_or(0));
                    fire_job_exit(job, events);
                    return Ok(outcome);
                }
            }
            Ok(WaitStatus::Signaled(pid, signal, _)) => {
                record_exit(job, pid, crate::status::signal_code(signal as i32), Some(signal as i32), events);
                if job.all_completed() {
                    let outcome = ReapOutcome::Completed(job.exit_status().unwrap_or(0));
                    fire_job_exit(job, events);
                    return Ok(outcome);
                }
            }
            Ok(WaitStatus::Stopped(_, _)) => {
                job.flags.insert(JobFlags::STOPPED);
                save_terminal_modes(job);
                eprintln!("shell-core: stopped: {}", job.description);
                return Ok(ReapOutcome::Stopped);
            }
            Ok(_) => return Ok(ReapOutcome::Pending),
            Err(nix::Error::EINTR) => continue,
            Err(nix::Error::ECHILD) => {
                let outcome = ReapOutcome::Completed(job.exit_status().unwrap_or(0));
                fire_job_exit(job, events);
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Records one process's exit, firing `PROCESS_EXIT` (and, for a
/// signal-terminated process, `Signal` plus the "terminated by signal"
/// diagnostic line) the way ion's `proc_state_update`/`JobNotification`
/// pair does in `src/lib/shell/pipe_exec/job_control.rs`.
fn record_exit(job: &mut Job, pid: Pid, code: i32, signal: Option<i32>, events: &mut dyn EventStore) {
    if let Some(process) = job.processes.iter_mut().find(|p| p.pid == Some(pid)) {
        process.mark_exited(code);
        if let Some(sig) = signal {
            eprintln!("shell-core: terminated by signal: {}", signal_name(sig));
            events.fire(&Event { kind: EventKind::Signal(sig), description: job.description.clone() });
        }
        events.fire(&Event { kind: EventKind::ProcessExit, description: job.description.clone() });
    }
}

fn fire_job_exit(job: &Job, events: &mut dyn EventStore) {
    events.fire(&Event { kind: EventKind::JobExit, description: job.description.clone() });
}

fn signal_name(signal: i32) -> String {
    match nix::sys::signal::Signal::try_from(signal) {
        Ok(s) => s.to_string(),
        Err(_) => signal.to_string(),
    }
}

/// Snapshots the controlling terminal's mode so a stopped job's own
/// settings (raw mode, disabled echo, whatever the foreground process left
/// behind) can be restored verbatim when it's later resumed with `fg`/`bg`,
/// the way ion's `JobControl::resume`/`tmodes` field does in
/// `src/lib/shell/pipe_exec/job_control.rs`.
fn save_terminal_modes(job: &mut Job) {
    use std::os::unix::io::BorrowedFd;
    let fd = unsafe { BorrowedFd::borrow_raw(0) };
    job.tmodes = nix::sys::termios::tcgetattr(fd).ok();
}

/// Whether the reaper should even attempt a `waitpid` call right now:
/// either we're sure a child changed state (generation moved since the
/// caller last checked) or we're about to block anyway. This is the
/// SIGCHLD-generation-counter-driven hook that avoids a busy loop of
/// `waitpid(WNOHANG)` calls between real signals.
pub fn generation_advanced_since(last_seen: u64) -> (bool, u64) {
    let now = current_generation();
    (now != last_seen, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reap_foreground_with_no_pgid_reports_completed_immediately() {
        let mut job = Job::new(1, "true");
        let mut events = crate::event::NullEventStore;
        assert_eq!(reap_foreground(&mut job, &mut events).unwrap(), ReapOutcome::Completed(0));
    }

    struct RecordingEventStore(Vec<EventKind>);

    impl EventStore for RecordingEventStore {
        fn fire(&mut self, event: &Event) { self.0.push(event.kind.clone()); }
    }

    #[test]
    fn reap_foreground_fires_job_exit_once_settled() {
        let mut job = Job::new(1, "true");
        let mut events = RecordingEventStore(Vec::new());
        reap_foreground(&mut job, &mut events).unwrap();
        assert_eq!(events.0, vec![EventKind::JobExit]);
    }

    #[test]
    fn generation_advanced_since_detects_no_change() {
        let (changed, gen) = generation_advanced_since(current_generation());
        assert!(!changed);
        let _ = gen;
    }
}
