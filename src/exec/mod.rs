//! C6 — exec engine.
//!
//! Ties together population (AST `Job` -> runtime [`Job`]/[`Process`]),
//! redirection resolution (C1), IO chain wiring (C2), and the fork/exec
//! launch loop (`launch.rs`) into one pipeline execution. Grounded on
//! ion's `PipelineExecution` trait and its `Shell` impl
//! (`src/lib/shell/pipe_exec/mod.rs`).

pub mod internal;
pub mod launch;
pub mod terminal;

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};

use crate::ast;
use crate::error::{ExecError, RedirectionError};
use crate::expand::Expander;
use crate::function_store::{FunctionDef, FunctionStore};
use crate::io_chain::IoChain;
use crate::job::{Job, JobFlags};
use crate::process::{Process, ProcessKind};
use crate::reaper::{reap_foreground, ReapOutcome};
use crate::redirection::{self, RedirectionSpec};
use crate::status;

use internal::{run_builtin_inline, BuiltinRegistry};
use terminal::{ForegroundSignals, TerminalController};

/// Tunable limits backing the block-depth and function-recursion guard
/// rails. Not a config-file layer — just the plain struct-of-fields
/// ion's `Shell::new` uses.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub max_block_depth: usize,
    pub max_function_recursion: usize,
}

impl Default for ExecConfig {
    fn default() -> Self { ExecConfig { max_block_depth: 128, max_function_recursion: 128 } }
}

/// What a `FunctionOrBlock`/`Eval` process needs the tree walker to run on
/// its behalf once forked: a function/block call (name, param bindings,
/// body, call args) or a bare `if`/`switch` statement used as a pipeline
/// stage. `ExecEngine` has no block stack, variable-shadowing, or
/// recursion-guard machinery of its own — those live on `context::
/// ShellContext` — so it can only ask the walker to do the work and report
/// back a status.
pub enum ReentryRequest<'a> {
    FunctionOrBlock { name: &'a str, params: &'a [String], body: &'a ast::JobList, args: &'a [String] },
    Eval { statement: &'a ast::Statement },
}

/// A callback from `ExecEngine` back into `ShellContext`/the tree walker,
/// built fresh by the walker around each `launch()` call and valid only for
/// its duration. Letting `ExecEngine::launch` take this instead of holding
/// a permanent reference to `ShellContext` keeps the engine's ownership
/// structure the same as before (it still doesn't own the block stack or
/// variable store) while giving the one thing a forked function/block stage
/// actually needs: a way to re-run its body and get a status back.
pub type ReentryFn<'a> = dyn for<'r> FnMut(ReentryRequest<'r>) -> Result<i32, ExecError> + 'a;

/// The C6 engine: owns the process-group/terminal bookkeeping and the
/// builtin-dispatch surface; does not own the block stack or variable store
/// (those belong to `context::ShellContext`, which calls into here).
pub struct ExecEngine {
    pub builtins: Box<dyn BuiltinRegistry>,
    pub terminal: TerminalController,
    pub foreground_signals: Arc<ForegroundSignals>,
    pub background_jobs: Vec<Job>,
    pub config: ExecConfig,
    next_job_id: u32,
    /// Ids released by [`ExecEngine::release_job_id`], reused in ascending
    /// order before ever handing out a fresh one from `next_job_id`. Keeps
    /// the set of in-use ids small and stable (`[1, 2, 3]`, not `[1, 2,
    /// 10004]`) the way a shell's job table numbers jobs `1`, `2`, `3`
    /// rather than counting every job ever launched.
    free_job_ids: std::collections::BinaryHeap<std::cmp::Reverse<u32>>,
}

impl ExecEngine {
    pub fn new(builtins: Box<dyn BuiltinRegistry>) -> Self {
        ExecEngine {
            builtins,
            terminal: TerminalController::new(0),
            foreground_signals: Arc::new(ForegroundSignals::new()),
            background_jobs: Vec::new(),
            config: ExecConfig::default(),
            next_job_id: 1,
            free_job_ids: std::collections::BinaryHeap::new(),
        }
    }

    fn alloc_job_id(&mut self) -> u32 {
        if let Some(std::cmp::Reverse(id)) = self.free_job_ids.pop() {
            return id;
        }
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    /// Returns `id` to the free set once nothing references its job anymore
    /// — called on every path that retires a job (ran to completion inline,
    /// or reaped after forking). A job parked in `background_jobs` after
    /// being stopped keeps its id allocated, since it's still a live job;
    /// a caller that later drains `background_jobs` for good (the job
    /// finished or was killed) should call this once it does.
    pub fn release_job_id(&mut self, id: u32) {
        self.free_job_ids.push(std::cmp::Reverse(id));
    }

    /// Resolves a command name against `$PATH`, classifying the
    /// not-found-vs-not-executable ambiguity the way fish's
    /// `exec.cpp`/`get_interpreter` does: consult the filesystem before
    /// blaming `execv`'s `ENOENT`.
    pub fn resolve_command(&self, name: &str, path_var: Option<&str>) -> Result<PathBuf, ExecError> {
        if name.contains('/') {
            return classify_candidate(Path::new(name));
        }
        let path_var = path_var.unwrap_or("");
        for dir in path_var.split(':').filter(|d| !d.is_empty()) {
            let candidate = Path::new(dir).join(name);
            if candidate.exists() {
                return classify_candidate(&candidate);
            }
        }
        Err(ExecError::CommandNotFound(name.to_string()))
    }

    /// Builds the runtime [`Job`] from an AST pipeline node: resolves each
    /// stage's [`ProcessKind`] (external/builtin/function/block), but does
    /// *not* yet wire pipes or redirections (those need the neighboring
    /// stages' fds, assigned in [`ExecEngine::launch`]).
    pub fn populate_job(
        &mut self,
        ast_job: &ast::Job,
        expander: &mut dyn Expander,
        functions: &dyn FunctionStore,
        path_var: Option<&str>,
    ) -> Result<Job, ExecError> {
        let id = self.alloc_job_id();
        let mut job = Job::new(id, describe(ast_job));
        if ast_job.background {
            job.flags.insert(JobFlags::BACKGROUND);
        }

        for stage in &ast_job.stages {
            let process = self.populate_stage(stage, &mut job.flags, expander, functions, path_var)?;
            job.processes.push(process);
        }
        job.flags.insert(JobFlags::CONSTRUCTED);
        Ok(job)
    }

    fn populate_stage(
        &mut self,
        stage: &ast::Statement,
        flags: &mut JobFlags,
        expander: &mut dyn Expander,
        functions: &dyn FunctionStore,
        path_var: Option<&str>,
    ) -> Result<Process, ExecError> {
        match stage {
            ast::Statement::Not(inner) => {
                flags.insert(JobFlags::NEGATE);
                self.populate_stage(inner, flags, expander, functions, path_var)
            }
            ast::Statement::Time(inner) => {
                // Timing is reported, not modeled on the Process: the
                // walker wraps the call to `launch`/`wait` with an
                // `Instant` and prints to stderr, matching ion's
                // `eprintln!` diagnostics idiom rather than introducing a
                // timing field here.
                self.populate_stage(inner, flags, expander, functions, path_var)
            }
            ast::Statement::Decorated(decorated) => {
                self.populate_decorated(decorated, expander, functions, path_var)
            }
            ast::Statement::Block(node) => {
                let mut process = Process::new(
                    ProcessKind::FunctionOrBlock { body: block_body(&node.block), params: block_params(&node.block) },
                    vec!["{block}".to_string()],
                );
                process.io.extra = resolve_redirections(&node.redirections, expander)?.into();
                Ok(process)
            }
            ast::Statement::If(_) | ast::Statement::Switch(_) => {
                // `if`/`switch` as a bare pipeline stage (rather than a
                // standalone top-level statement) behaves like an
                // anonymous block: its status is the status of whichever
                // branch ran.
                Ok(Process::new(
                    ProcessKind::Eval { statement: Box::new(stage.clone()) },
                    vec!["{control-flow}".to_string()],
                ))
            }
        }
    }

    fn populate_decorated(
        &mut self,
        decorated: &ast::DecoratedStatement,
        expander: &mut dyn Expander,
        functions: &dyn FunctionStore,
        path_var: Option<&str>,
    ) -> Result<Process, ExecError> {
        let mut argv = expander.expand_word(&decorated.command)?;
        if argv.len() != 1 {
            return Err(ExecError::IllegalCommand(describe_word(&decorated.command)));
        }
        let command = argv.remove(0);
        let mut rest = expander.expand_words(&decorated.arguments)?;
        let mut full_argv = vec![command.clone()];
        full_argv.append(&mut rest);

        let kind = match decorated.decorator {
            ast::Decorator::Exec => {
                let path = self.resolve_command(&command, path_var)?;
                ProcessKind::Exec { path }
            }
            ast::Decorator::Builtin => {
                if !self.builtins.has(&command) {
                    return Err(ExecError::CommandNotFound(command));
                }
                ProcessKind::Builtin { name: command }
            }
            ast::Decorator::Command => {
                let path = self.resolve_command(&command, path_var)?;
                ProcessKind::External { path }
            }
            ast::Decorator::None => {
                if let Some(FunctionDef { params, body, .. }) = functions.get(&command) {
                    ProcessKind::FunctionOrBlock { body, params }
                } else if self.builtins.has(&command) {
                    ProcessKind::Builtin { name: command }
                } else {
                    let path = self.resolve_command(&command, path_var)?;
                    ProcessKind::External { path }
                }
            }
        };

        let mut process = Process::new(kind, full_argv);
        process.io.extra = resolve_redirections(&decorated.redirections, expander)?.into();
        Ok(process)
    }

    /// Launches every stage of a populated job, wiring pipes between
    /// consecutive stages, assigns the process group, hands the terminal
    /// over if the job is foreground, then reaps it. Mirrors ion's
    /// `pipe()` function (`src/lib/shell/pipe_exec/mod.rs`).
    ///
    /// `reentry` lets a `FunctionOrBlock`/`Eval` stage that must fork (it
    /// isn't alone in the job) call back into the tree walker to actually
    /// run its body; `None` reports such a stage as succeeding without
    /// running it; only `context::ShellContext::populate_and_launch`
    /// passes `None` here, and only when it has otherwise already handled
    /// the single-stage case itself before ever reaching this engine.
    ///
    /// `events` is fired once per process exit and once more for the job as
    /// a whole once every stage has settled, the way ion's
    /// `JobNotification` dispatch does after its own wait loop returns.
    pub fn launch(
        &mut self,
        job: &mut Job,
        vars: &mut dyn crate::env::VariableStore,
        mut reentry: Option<&mut ReentryFn<'_>>,
        events: &mut dyn crate::event::EventStore,
    ) -> Result<i32, ExecError> {
        let n = job.processes.len();
        if n == 0 {
            self.release_job_id(job.id);
            return Ok(status::SUCCESS);
        }
        job.restore_foreground(!job.is_background());

        // Fast path: a single internal process with nothing downstream and
        // no pipe upstream runs inline on the main thread, skipping fork
        // entirely, recovered from fish's `internal_exec`.
        if n == 1 && !job.processes[0].kind.is_external() && job.processes[0].io.extra.is_empty() {
            return self.run_single_internal(job, vars, reentry.as_deref_mut(), events);
        }

        let mut read_ends: Vec<Option<RawFd>> = Vec::new();
        let mut write_ends: Vec<Option<RawFd>> = Vec::new();
        for _ in 0..n.saturating_sub(1) {
            let (r, w) = unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).map_err(ExecError::Fork)?;
            read_ends.push(Some(r));
            write_ends.push(Some(w));
        }

        // Deferred-process writer threads: joined only after every
        // remaining stage has been launched, so the real external consumer
        // downstream already exists and is draining its end of the pipe by
        // the time we block waiting for the write to finish. Joining
        // eagerly, before that consumer is forked, is exactly the
        // pipe-buffer deadlock the deferred-launch rule exists to avoid.
        let mut deferred_writers = Vec::new();

        let mut prior_pid: Option<Pid> = None;
        for i in 0..n {
            let is_last = i == n - 1;
            let deferred = !is_last
                && job.processes[i].io.extra.is_empty()
                && matches!(job.processes[i].kind, ProcessKind::Builtin { .. });

            if deferred {
                let name = match &job.processes[i].kind {
                    ProcessKind::Builtin { name } => name.clone(),
                    _ => unreachable!(),
                };
                let argv = job.processes[i].argv.clone();
                let write_fd = write_ends[i].take().expect("non-last stage always has a downstream pipe");
                let mut stdin_reader: Box<dyn std::io::Read> = if i > 0 {
                    let fd = read_ends[i - 1].take().expect("stdin pipe not yet consumed");
                    use std::os::unix::io::FromRawFd;
                    Box::new(unsafe { std::fs::File::from_raw_fd(fd) })
                } else {
                    Box::new(std::io::empty())
                };
                let (status, handle) = launch::run_deferred_internal(
                    self.builtins.as_mut(),
                    &name,
                    &argv,
                    &mut *stdin_reader,
                    write_fd,
                    vars,
                )?;
                job.processes[i].mark_exited(status);
                deferred_writers.push(handle);
                continue;
            }

            if i > 0 {
                let fd = read_ends[i - 1].expect("stdin pipe not yet consumed");
                job.processes[i].io.set_stdin_pipe(fd);
            }
            if let Some(w) = write_ends[i] {
                job.processes[i].io.set_stdout_pipe(w);
            }

            let child_blocked = !is_last;
            let pid = self.spawn_stage(&job.processes[i], child_blocked, vars, reentry.as_deref_mut())?;
            launch::mark_process_pid(&mut job.processes[i], pid);
            launch::assign_process_group(job, pid).map_err(ExecError::Fork)?;
            if child_blocked {
                launch::resume_chain(prior_pid, pid).map_err(ExecError::Fork)?;
            } else if let Some(prior) = prior_pid {
                let _ = signal::kill(prior, Signal::SIGCONT);
            }
            prior_pid = Some(pid);
        }

        for fd in read_ends.into_iter().flatten().chain(write_ends.into_iter().flatten()) {
            let _ = unistd::close(fd);
        }

        for handle in deferred_writers {
            let _ = handle.join();
        }

        let pgid = job.pgid.expect("at least one process launched");
        if !job.is_background() {
            self.terminal.set_foreground(pgid).map_err(ExecError::Fork)?;
        }

        let status_code = match reap_foreground(job, events).map_err(ExecError::Fork)? {
            ReapOutcome::Completed(code) => {
                self.release_job_id(job.id);
                code
            }
            ReapOutcome::Stopped => {
                job.flags.insert(JobFlags::STOPPED);
                job.flags.remove(JobFlags::FOREGROUND);
                let mut parked = Job::new(job.id, job.description.clone());
                parked.flags = job.flags;
                parked.tmodes = job.tmodes.clone();
                self.background_jobs.push(parked);
                status::TERMINATED
            }
            ReapOutcome::Pending => unreachable!("reap_foreground only returns once settled"),
        };

        if !job.is_background() {
            let _ = self.terminal.reclaim();
        }
        Ok(status_code)
    }

    fn run_single_internal(
        &mut self,
        job: &mut Job,
        vars: &mut dyn crate::env::VariableStore,
        mut reentry: Option<&mut ReentryFn<'_>>,
        events: &mut dyn crate::event::EventStore,
    ) -> Result<i32, ExecError> {
        let process = &mut job.processes[0];
        let status_code = match &process.kind {
            ProcessKind::Builtin { name } => run_builtin_inline(self.builtins.as_mut(), name, &process.argv, vars),
            ProcessKind::FunctionOrBlock { body, params } => {
                let name = process.argv[0].clone();
                let args = process.argv[1..].to_vec();
                match reentry.as_deref_mut() {
                    Some(reentry) => reentry(ReentryRequest::FunctionOrBlock { name: &name, params, body, args: &args })?,
                    // `context::ShellContext::populate_and_launch` already
                    // handles a single-stage function/block call itself
                    // before ever reaching here (see its own doc comment),
                    // so the only caller that reaches this arm without a
                    // `reentry` is a test exercising `ExecEngine` standalone.
                    None => status::SUCCESS,
                }
            }
            ProcessKind::Eval { statement } => match reentry.as_deref_mut() {
                Some(reentry) => reentry(ReentryRequest::Eval { statement })?,
                None => status::SUCCESS,
            },
            ProcessKind::External { .. } | ProcessKind::Exec { .. } => unreachable!("fast path excludes external kinds"),
        };
        process.mark_exited(status_code);
        events.fire(&crate::event::Event {
            kind: crate::event::EventKind::ProcessExit,
            description: job.description.clone(),
        });
        events.fire(&crate::event::Event { kind: crate::event::EventKind::JobExit, description: job.description.clone() });
        self.release_job_id(job.id);
        Ok(status_code)
    }

    fn spawn_stage(
        &mut self,
        process: &Process,
        child_blocked: bool,
        vars: &mut dyn crate::env::VariableStore,
        reentry: Option<&mut ReentryFn<'_>>,
    ) -> Result<Pid, ExecError> {
        match &process.kind {
            ProcessKind::External { path } | ProcessKind::Exec { path } => {
                launch::fork_external(path, &process.argv, &process.io, child_blocked)
            }
            ProcessKind::Builtin { name } => {
                let name = name.clone();
                let argv = process.argv.clone();
                let registry_ptr: *mut dyn BuiltinRegistry = self.builtins.as_mut();
                let vars_ptr: *mut dyn crate::env::VariableStore = vars;
                launch::fork_internal(&process.argv, &process.io, child_blocked, move || {
                    // Safety: the child is a fresh address space (post
                    // fork); the raw pointers into the parent's registry
                    // and variable store are only ever dereferenced here,
                    // never across the fork boundary from the parent's
                    // side again.
                    let registry = unsafe { &mut *registry_ptr };
                    let vars = unsafe { &mut *vars_ptr };
                    run_builtin_inline(registry, &name, &argv, vars)
                })
            }
            ProcessKind::FunctionOrBlock { body, params } => {
                let name = process.argv[0].clone();
                let args = process.argv[1..].to_vec();
                let body = body.clone();
                let params = params.clone();
                launch::fork_internal(&process.argv, &process.io, child_blocked, move || match reentry {
                    Some(reentry) => run_reentry(reentry, ReentryRequest::FunctionOrBlock {
                        name: &name,
                        params: &params,
                        body: &body,
                        args: &args,
                    }),
                    None => status::SUCCESS,
                })
            }
            ProcessKind::Eval { statement } => {
                let statement = statement.clone();
                launch::fork_internal(&process.argv, &process.io, child_blocked, move || match reentry {
                    Some(reentry) => run_reentry(reentry, ReentryRequest::Eval { statement: &statement }),
                    None => status::SUCCESS,
                })
            }
        }
    }
}

/// Runs the walker-reentry callback in a forked child, turning an error
/// (e.g. a broken pipe while evaluating the body) into a `FAILURE` status
/// the way an external process's own error handling would report it,
/// rather than letting it escape the `FnOnce` that `fork_internal` expects
/// to always produce a plain status code.
fn run_reentry(reentry: &mut ReentryFn<'_>, request: ReentryRequest<'_>) -> i32 {
    match reentry(request) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("shell-core: {}", e);
            status::FAILURE
        }
    }
}

fn classify_candidate(path: &Path) -> Result<PathBuf, ExecError> {
    if !path.exists() {
        return Err(ExecError::CommandNotFound(path.display().to_string()));
    }
    let executable = path
        .metadata()
        .map(|m| {
            use std::os::unix::fs::PermissionsExt;
            m.permissions().mode() & 0o111 != 0
        })
        .unwrap_or(false);
    if executable {
        Ok(path.to_path_buf())
    } else {
        Err(ExecError::NotExecutable(path.to_path_buf()))
    }
}

fn resolve_redirections(
    nodes: &[ast::RedirectionNode],
    expander: &mut dyn Expander,
) -> Result<Vec<crate::redirection::Dup2Action>, ExecError> {
    let mut specs = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut words = expander.expand_word(&node.target)?;
        if words.len() != 1 {
            return Err(RedirectionError::BadFdTarget(describe_word(&node.target)).into());
        }
        let target = words.remove(0);
        let spec = if let Some(fd_str) = target.strip_prefix('&') {
            if fd_str == "-" {
                RedirectionSpec::close(node.fd)
            } else {
                let source: i32 = fd_str
                    .parse()
                    .map_err(|_| RedirectionError::BadFdTarget(target.clone()))?;
                RedirectionSpec::dup_fd(node.fd, source)
            }
        } else {
            RedirectionSpec::to_path(node.fd, node.mode, target)
        };
        specs.push(spec);
    }
    Ok(redirection::resolve(&specs)?)
}

fn block_body(block: &ast::BlockStatement) -> ast::JobList {
    match block {
        ast::BlockStatement::For { body, .. }
        | ast::BlockStatement::While { body, .. }
        | ast::BlockStatement::Function { body, .. }
        | ast::BlockStatement::Begin { body } => body.clone(),
    }
}

fn block_params(block: &ast::BlockStatement) -> Vec<String> {
    match block {
        ast::BlockStatement::Function { params, .. } => params.clone(),
        _ => Vec::new(),
    }
}

/// Renders a `Word` for diagnostics/job descriptions; a command
/// substitution has no fixed text until it runs, so it's rendered as its
/// source form rather than its (not yet known) result.
fn describe_word(word: &ast::Word) -> String {
    match word {
        ast::Word::Literal(s) => s.clone(),
        ast::Word::CommandSubstitution(_) => "$(...)".to_string(),
    }
}

fn describe(job: &ast::Job) -> String {
    job.stages
        .iter()
        .map(describe_stage)
        .collect::<Vec<_>>()
        .join(" | ")
}

fn describe_stage(stage: &ast::Statement) -> String {
    match stage {
        ast::Statement::Not(inner) => format!("not {}", describe_stage(inner)),
        ast::Statement::Time(inner) => format!("time {}", describe_stage(inner)),
        ast::Statement::Decorated(d) => describe_word(&d.command),
        ast::Statement::Block(_) => "{block}".to_string(),
        ast::Statement::If(_) => "{if}".to_string(),
        ast::Statement::Switch(_) => "{switch}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_match_documented_guard_rails() {
        let cfg = ExecConfig::default();
        assert_eq!(cfg.max_block_depth, 128);
        assert_eq!(cfg.max_function_recursion, 128);
    }

    struct NoBuiltins;
    impl BuiltinRegistry for NoBuiltins {
        fn has(&self, _name: &str) -> bool { false }
        fn call(&mut self, _name: &str, _args: &[String], _io: &mut internal::BuiltinIo<'_>) -> i32 {
            status::FAILURE
        }
    }

    #[test]
    fn released_job_ids_are_reused_before_minting_a_fresh_one() {
        let mut engine = ExecEngine::new(Box::new(NoBuiltins));
        let a = engine.alloc_job_id();
        let b = engine.alloc_job_id();
        assert_eq!((a, b), (1, 2));
        engine.release_job_id(a);
        let c = engine.alloc_job_id();
        assert_eq!(c, a);
        let d = engine.alloc_job_id();
        assert_eq!(d, 3);
    }

    #[test]
    fn classify_candidate_reports_not_executable_for_nonexec_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();
        let err = classify_candidate(&path).unwrap_err();
        assert!(matches!(err, ExecError::NotExecutable(_)));
    }

    #[test]
    fn classify_candidate_reports_command_not_found_for_missing_path() {
        let err = classify_candidate(Path::new("/no/such/binary-xyz")).unwrap_err();
        assert!(matches!(err, ExecError::CommandNotFound(_)));
    }
}
