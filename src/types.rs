//! Shared scalar types used across the engine.

/// A shell identifier: a variable or function name.
pub type Identifier = String;

/// A single expanded word.
pub type Value = String;

/// An expanded argument list.
pub type Array = Vec<String>;

/// Process id, re-exported at the crate boundary so callers outside `sys`
/// never need to depend on `nix` directly.
pub type Pid = nix::unistd::Pid;
