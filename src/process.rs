//! C3 — process record.
//!
//! Grounded on ion's `RefinedJob`/`JobVariant` split
//! (`src/lib/shell/job.rs`): one pipeline stage, tagged by what kind of
//! thing produces it, carrying its own argv and io chain.

use nix::unistd::Pid;

use crate::io_chain::IoChain;
use crate::types::Array;

/// What a [`Process`] actually runs. Mirrors ion's `JobVariant`, renamed
/// to an External/Exec/Builtin/Function-or-BlockNode/Eval taxonomy.
#[derive(Debug, Clone)]
pub enum ProcessKind {
    /// A real `fork`+`exec` of a binary on `$PATH` or at an absolute path.
    External { path: std::path::PathBuf },
    /// `exec foo`: like `External`, but replaces the shell instead of
    /// forking (only meaningful for the last process of the last job of
    /// the top-level script).
    Exec { path: std::path::PathBuf },
    /// A builtin, dispatched in-process (possibly still forked, if piped to
    /// other stages) via the `BuiltinRegistry` collaborator.
    Builtin { name: String },
    /// A user-defined function or an anonymous block (`begin ... end`)
    /// re-entering the tree walker.
    FunctionOrBlock { body: crate::ast::JobList, params: Vec<String> },
    /// A bare `if`/`switch` used as one pipeline stage instead of a
    /// standalone top-level statement; its status is whichever branch ran.
    /// Re-enters the tree walker the same way `FunctionOrBlock` does.
    Eval { statement: Box<crate::ast::Statement> },
}

impl ProcessKind {
    /// Whether this process kind ever needs a real child process (and thus
    /// participates in pgid/terminal handoff) as opposed to running
    /// entirely on the main thread.
    pub fn is_external(&self) -> bool {
        matches!(self, ProcessKind::External { .. } | ProcessKind::Exec { .. })
    }
}

/// One stage of a pipeline. Not `Clone`: its `io` chain owns real, opened
/// file descriptors (`Dup2Action::OpenAndDup`) that must never be
/// duplicated behind the type system's back.
#[derive(Debug)]
pub struct Process {
    pub kind: ProcessKind,
    pub argv: Array,
    pub io: IoChain,
    /// Set once the process has actually been launched (forked, or — for
    /// internal processes run inline — given a synthetic pid-like token is
    /// unnecessary, so this stays `None` for those).
    pub pid: Option<Pid>,
    pub completed: bool,
    pub status: Option<i32>,
}

impl Process {
    pub fn new(kind: ProcessKind, argv: Array) -> Self {
        Process { kind, argv, io: IoChain::new(), pid: None, completed: false, status: None }
    }

    pub fn mark_launched(&mut self, pid: Pid) { self.pid = Some(pid); }

    pub fn mark_exited(&mut self, status: i32) {
        self.completed = true;
        self.status = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_process_is_not_completed() {
        let p = Process::new(ProcessKind::Builtin { name: "echo".into() }, vec!["echo".into()]);
        assert!(!p.completed);
        assert!(p.pid.is_none());
    }

    #[test]
    fn only_external_and_exec_are_external() {
        let builtin = ProcessKind::Builtin { name: "cd".into() };
        let external = ProcessKind::External { path: "/bin/ls".into() };
        assert!(!builtin.is_external());
        assert!(external.is_external());
    }
}
