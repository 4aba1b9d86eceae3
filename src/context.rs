//! Ties every component together into the facade the tree walker (C9)
//! drives, the way ion's `Shell` struct does in `src/shell/mod.rs`:
//! owns the variable/function/event stores, the block stack, and the exec
//! engine, and exposes the entry points a front-end (REPL, script runner —
//! both out of scope here) calls into.

use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult};

use crate::ast::JobList;
use crate::block::BlockStack;
use crate::error::{ExecError, ExpandError};
use crate::event::EventStore;
use crate::exec::internal::BuiltinRegistry;
use crate::exec::{ExecConfig, ExecEngine};
use crate::expand::CommandSubstituter;
use crate::function_store::FunctionStore;
use crate::status;
use crate::walker::Flow;
use crate::env::VariableStore;

pub struct ShellContext {
    pub vars: Box<dyn VariableStore>,
    pub functions: Box<dyn FunctionStore>,
    pub events: Box<dyn EventStore>,
    pub blocks: BlockStack,
    pub exec: ExecEngine,
    pub previous_status: i32,
}

impl ShellContext {
    pub fn new(
        vars: Box<dyn VariableStore>,
        functions: Box<dyn FunctionStore>,
        events: Box<dyn EventStore>,
        builtins: Box<dyn BuiltinRegistry>,
        config: ExecConfig,
    ) -> Self {
        let mut exec = ExecEngine::new(builtins);
        exec.config = config.clone();
        ShellContext {
            vars,
            functions,
            events,
            blocks: BlockStack::new(config.max_block_depth),
            exec,
            previous_status: status::SUCCESS,
        }
    }

    /// Runs a full top-level script body and returns its final status,
    /// the entry point a front-end calls once per parsed input.
    pub fn run(&mut self, script: &JobList) -> Result<i32, ExecError> {
        let flow = self.execute_job_list(script)?;
        Ok(flow.status())
    }
}

/// Implements `$(...)` command substitution by forking a subshell, running
/// `body` with its stdout redirected into a pipe, and reading all of its
/// output back in the parent — the same fork-and-capture shape fish uses
/// for command substitutions that can't be satisfied in-process.
impl CommandSubstituter for ShellContext {
    fn run_capture(&mut self, body: &JobList) -> Result<String, ExpandError> {
        let (read_fd, write_fd) =
            unistd::pipe().map_err(|e| ExpandError::CommandSubstitution(e.to_string()))?;

        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => {
                let _ = unistd::close(read_fd);
                let _ = unistd::dup2(write_fd, 1);
                let _ = unistd::close(write_fd);
                let code = self.run(body).unwrap_or(status::FAILURE);
                std::process::exit(code);
            }
            Ok(ForkResult::Parent { child }) => {
                let _ = unistd::close(write_fd);
                let mut buf = Vec::new();
                {
                    use std::io::Read;
                    use std::os::unix::io::FromRawFd;
                    let mut file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                    let _ = file.read_to_end(&mut buf);
                }
                let _ = waitpid(child, None);
                let mut text = String::from_utf8_lossy(&buf).into_owned();
                while text.ends_with('\n') {
                    text.pop();
                }
                Ok(text)
            }
            Err(e) => Err(ExpandError::CommandSubstitution(e.to_string())),
        }
    }
}

/// Minimal harness for exercising the engine without a real parser/variable
/// store/builtin set wired in; used by this crate's own unit tests and by
/// `tests/end_to_end.rs`.
pub mod test_support {
    use super::*;
    use crate::env::MapVariableStore;
    use crate::event::NullEventStore;
    use crate::exec::internal::BuiltinIo;
    use crate::function_store::MapFunctionStore;

    /// Just enough builtins to drive unit/integration tests: `echo`, `cat`,
    /// `warn`, `true`, `false`, `status`, `set`. A real shell supplies its
    /// own, much larger, registry — builtin implementations themselves
    /// are out of scope for this crate.
    pub struct TestBuiltins;

    impl BuiltinRegistry for TestBuiltins {
        fn has(&self, name: &str) -> bool {
            matches!(name, "echo" | "cat" | "warn" | "true" | "false" | "status" | "set")
        }

        fn call(&mut self, name: &str, args: &[String], io: &mut BuiltinIo<'_>) -> i32 {
            match name {
                "echo" => {
                    let text = args.get(1..).unwrap_or(&[]).join(" ");
                    let _ = std::io::Write::write_all(io.stdout, text.as_bytes());
                    let _ = std::io::Write::write_all(io.stdout, b"\n");
                    status::SUCCESS
                }
                "cat" => {
                    let mut buf = Vec::new();
                    if std::io::Read::read_to_end(io.stdin, &mut buf).is_err() {
                        return status::FAILURE;
                    }
                    let _ = std::io::Write::write_all(io.stdout, &buf);
                    status::SUCCESS
                }
                "warn" => {
                    let text = args.get(1..).unwrap_or(&[]).join(" ");
                    let _ = std::io::Write::write_all(io.stderr, text.as_bytes());
                    let _ = std::io::Write::write_all(io.stderr, b"\n");
                    status::SUCCESS
                }
                "set" => {
                    let rest = args.get(1..).unwrap_or(&[]);
                    match rest.split_first() {
                        Some((var, values)) => {
                            io.vars.set(var, values.join(" "), crate::env::Scope::Local);
                            status::SUCCESS
                        }
                        None => status::BAD_ARG,
                    }
                }
                "true" => status::SUCCESS,
                "false" => status::FAILURE,
                "status" => status::SUCCESS,
                _ => status::NO_SUCH_COMMAND,
            }
        }
    }

    pub fn test_context() -> ShellContext {
        ShellContext::new(
            Box::new(MapVariableStore::new()),
            Box::new(MapFunctionStore::new()),
            Box::new(NullEventStore),
            Box::new(TestBuiltins),
            ExecConfig::default(),
        )
    }
}
