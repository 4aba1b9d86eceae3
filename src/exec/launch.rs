//! The fork/exec core of C6: turns a populated [`Job`] into running
//! processes, wiring pipes between stages and assigning the process group.
//! Grounded on ion's `pipe()`/`spawn_proc`/`prepare_child`/
//! `resume_prior_process`/`set_process_group` in
//! `src/lib/shell/pipe_exec/mod.rs`.

use std::convert::Infallible;
use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;
use std::thread;

use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use crate::error::ExecError;
use crate::exec::internal::{run_builtin_captured, spawn_deferred_writer, BuiltinRegistry};
use crate::io_chain::{IoChain, IoEndpointKind};
use crate::job::Job;
use crate::process::Process;
use crate::redirection::Dup2Action;

/// Resets the signals a shell blocks/ignores for itself back to their
/// default disposition, and un-stops the new child if it was started
/// SIGSTOPped for ordered pgid assignment. Grounded on `prepare_child` in
/// ion's `pipe_exec/mod.rs`.
fn prepare_child(child_blocked: bool) -> nix::Result<()> {
    let mut set = nix::sys::signal::SigSet::empty();
    set.add(Signal::SIGCHLD);
    set.add(Signal::SIGTSTP);
    set.add(Signal::SIGTTOU);
    set.add(Signal::SIGTTIN);
    signal::sigprocmask(signal::SigmaskHow::SIG_UNBLOCK, Some(&set), None)?;

    unsafe {
        signal::signal(Signal::SIGINT, SigHandler::SigDfl)?;
        signal::signal(Signal::SIGHUP, SigHandler::SigDfl)?;
        signal::signal(Signal::SIGTERM, SigHandler::SigDfl)?;
    }

    if child_blocked {
        signal::raise(Signal::SIGSTOP)?;
    }
    Ok(())
}

/// Waits for a just-forked child to actually reach the stopped state before
/// continuing the parent's pgid bookkeeping, then resumes the *previous*
/// pipeline stage so processes join the group in a deterministic order.
/// Grounded on `resume_prior_process` in ion's `pipe_exec/mod.rs`.
fn resume_prior_process(prior: Option<Pid>, just_forked: Pid) -> nix::Result<()> {
    loop {
        match waitpid(just_forked, Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Stopped(_, _)) => break,
            Ok(_) => continue,
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    if let Some(prior_pid) = prior {
        signal::kill(prior_pid, Signal::SIGCONT)?;
    }
    Ok(())
}

fn apply_dup2_actions(actions: &[Dup2Action]) -> nix::Result<()> {
    use std::os::unix::io::AsRawFd;
    for action in actions {
        match action {
            Dup2Action::OpenAndDup { fd, file } => {
                unistd::dup2(file.as_raw_fd(), *fd)?;
            }
            Dup2Action::DupFd { fd, source } => {
                unistd::dup2(*source, *fd)?;
            }
            Dup2Action::Close { fd } => {
                let _ = unistd::close(*fd);
            }
        }
    }
    Ok(())
}

/// Applies an [`IoChain`]'s stdin/stdout/stderr slots (pipe ends or
/// inherited fds) plus any extra redirections, in the child, right before
/// exec/builtin dispatch.
fn wire_io_chain(chain: &IoChain) -> nix::Result<()> {
    for slot in [&chain.stdin, &chain.stdout, &chain.stderr].into_iter().flatten() {
        match &slot.endpoint {
            IoEndpointKind::Inherit => {}
            IoEndpointKind::Pipe(fd) => {
                unistd::dup2(*fd, slot.fd)?;
            }
            IoEndpointKind::File(fd) => {
                unistd::dup2(*fd, slot.fd)?;
            }
            IoEndpointKind::Bufferfill(_) => {
                // Handled by the caller before fork; a bufferfill slot
                // never reaches a real child.
            }
        }
    }
    for action in &chain.extra {
        match action {
            Dup2Action::OpenAndDup { .. } | Dup2Action::DupFd { .. } | Dup2Action::Close { .. } => {
                apply_dup2_actions(std::slice::from_ref(action))?;
            }
        }
    }
    Ok(())
}

fn exec_external(path: &std::path::Path, argv: &[String]) -> Result<Infallible, ExecError> {
    let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned()).unwrap();
    let c_argv: Vec<CString> = argv.iter().map(|a| CString::new(a.as_str()).unwrap()).collect();
    match unistd::execv(&c_path, &c_argv) {
        Err(e) => Err(ExecError::Exec { path: path.to_path_buf(), source: e }),
        Ok(_) => unreachable!("execv only returns on error"),
    }
}

/// Forks one external-process stage, returning the child's pid to the
/// parent. `child_blocked` requests the child SIGSTOP itself immediately
/// after exec setup so the parent can assign pgids in a fixed order
/// (`resume_prior_process` then wakes it).
pub fn fork_external(
    path: &std::path::Path,
    argv: &[String],
    io: &IoChain,
    child_blocked: bool,
) -> Result<Pid, ExecError> {
    match unsafe { unistd::fork() }.map_err(ExecError::Fork)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            let result = (|| -> Result<Infallible, ExecError> {
                wire_io_chain(io).map_err(ExecError::Fork)?;
                prepare_child(child_blocked).map_err(ExecError::Fork)?;
                exec_external(path, argv)
            })();
            if let Err(e) = result {
                eprintln!("shell-core: {}", e);
            }
            std::process::exit(crate::status::EXEC_FAIL);
        }
    }
}

/// Forks one internal-process stage (builtin/function/block), running its
/// body in the child after wiring io — used whenever an internal process
/// must participate in the pipeline's real pgid/pipe plumbing rather than
/// taking the deferred-writer fast path.
pub fn fork_internal(
    argv: &[String],
    io: &IoChain,
    child_blocked: bool,
    run: impl FnOnce() -> i32,
) -> Result<Pid, ExecError> {
    let _ = argv;
    match unsafe { unistd::fork() }.map_err(ExecError::Fork)? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => {
            if wire_io_chain(io).is_err() || prepare_child(child_blocked).is_err() {
                std::process::exit(crate::status::EXEC_FAIL);
            }
            std::process::exit(run());
        }
    }
}

/// Runs an internal process without forking at all, by capturing its
/// output and handing it to a background writer thread feeding the real
/// pipe — the "deferred process" optimization. The returned writer
/// thread is deliberately NOT joined here: joining would
/// block on the pipe's kernel buffer draining, but the external consumer
/// downstream hasn't been forked yet at the point this runs, which is
/// exactly the deadlock avoided by launching such a process last. The
/// caller must launch the remaining stages first and join the handle
/// afterwards.
pub fn run_deferred_internal(
    registry: &mut dyn BuiltinRegistry,
    name: &str,
    args: &[String],
    stdin: &mut dyn std::io::Read,
    stdout_write_fd: RawFd,
    vars: &mut dyn crate::env::VariableStore,
) -> Result<(i32, thread::JoinHandle<io::Result<()>>), ExecError> {
    let (status, out, err) = run_builtin_captured(registry, name, args, stdin, vars)?;
    if !err.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&err));
    }
    let handle = spawn_deferred_writer(out, stdout_write_fd);
    Ok((status, handle))
}

/// First process in a job defines its pgid; the rest join it. Grounded on
/// `set_process_group` in ion's `pipe_exec/mod.rs`.
pub fn assign_process_group(job: &mut Job, pid: Pid) -> nix::Result<()> {
    job.set_process_group(pid);
    let pgid = job.pgid.unwrap();
    unistd::setpgid(pid, pgid)
}

pub fn mark_process_pid(process: &mut Process, pid: Pid) { process.mark_launched(pid); }

#[allow(dead_code)]
pub(crate) fn resume_chain(prior: Option<Pid>, just_forked: Pid) -> nix::Result<()> {
    resume_prior_process(prior, just_forked)
}
