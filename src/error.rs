//! Error taxonomy (C10) and stack-trace formatting.
//!
//! One `thiserror` enum per failure surface, the way
//! `src/lib/expansion/mod.rs` in ion does it, rather than a single
//! catch-all error type.

use std::fmt;
use std::path::PathBuf;

use crate::block::Block;

#[derive(Debug, thiserror::Error)]
pub enum ExpandError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("command substitution failed: {0}")]
    CommandSubstitution(String),
    #[error("no matches for wildcard '{0}'")]
    UnmatchedWildcard(String),
    #[error("malformed expansion in '{0}'")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RedirectionError {
    #[error("failed to open '{path}' for {mode}: {source}")]
    Open { path: PathBuf, mode: &'static str, #[source] source: std::io::Error },
    #[error("invalid file descriptor duplication target: {0}")]
    BadFdTarget(String),
    #[error("noclobber: '{0}' already exists")]
    Noclobber(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("unknown command: {0}")]
    CommandNotFound(String),
    #[error("not executable: {0}")]
    NotExecutable(PathBuf),
    #[error("illegal use of command '{0}'")]
    IllegalCommand(String),
    #[error(transparent)]
    Redirection(#[from] RedirectionError),
    #[error(transparent)]
    Expand(#[from] ExpandError),
    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),
    #[error("exec failed for '{path}': {source}")]
    Exec { path: PathBuf, #[source] source: nix::Error },
    #[error("internal process produced too much output")]
    ReadTooMuch,
    #[error(transparent)]
    Control(#[from] ControlFlowError),
}

/// Errors surfaced by the tree walker (C9) that are not process-launch
/// failures: control structures misused, or the engine's own guard rails.
#[derive(Debug, thiserror::Error)]
pub enum ControlFlowError {
    #[error("loop control statement used outside of a loop")]
    LoopControlOutsideLoop,
    #[error("stack overflow: block nesting exceeded {0} frames")]
    StackOverflow(usize),
    #[error("function '{0}' appears to be infinitely recursive")]
    InfiniteRecursion(String),
    #[error("wrong number of arguments to function '{0}': expected {expected}, got {got}", expected = .1, got = .2)]
    ArgCount(String, usize, usize),
}

/// A single frame in an error stack trace, formatted the way ion's
/// `Function::execute` / `FlowControl` machinery tracks call context.
#[derive(Debug, Clone)]
pub struct Frame {
    pub description: String,
    pub line: Option<u32>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "  in {} (line {})", self.description, line),
            None => write!(f, "  in {}", self.description),
        }
    }
}

/// Renders the active block stack into a trace, most recent frame first.
pub fn format_trace(blocks: &[Block]) -> String {
    let mut out = String::new();
    for block in blocks.iter().rev() {
        out.push_str(&format!("  in {}\n", block.describe()));
    }
    out
}
