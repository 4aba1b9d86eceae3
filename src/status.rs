//! Process exit status codes.
//!
//! The first block matches ion's own constants
//! (`src/shell/status.rs`); the second block adds fish-derived codes that
//! ion doesn't have.

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const BAD_ARG: i32 = 2;
pub const COULD_NOT_EXEC: i32 = 126;
pub const NO_SUCH_COMMAND: i32 = 127;
pub const TERMINATED: i32 = 143;

pub const ILLEGAL_COMMAND: i32 = 123;
pub const UNMATCHED_WILDCARD: i32 = 124;
pub const EXPAND_ERROR: i32 = 121;
pub const READ_TOO_MUCH: i32 = 122;
pub const EXEC_FAIL: i32 = 125;

/// 128 + signal number, the POSIX convention for "killed by signal".
pub fn signal_code(signal: i32) -> i32 { 128 + signal }

/// Typed view over the handful of codes the engine itself produces, so
/// callers can match instead of comparing raw ints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Failure,
    InvalidArgs,
    NotExecutable,
    CmdUnknown,
    IllegalCmd,
    UnmatchedWildcard,
    ExpandError,
    ReadTooMuch,
    ExecFail,
    Signaled(i32),
    Code(i32),
}

impl Status {
    pub fn code(self) -> i32 {
        match self {
            Status::Ok => SUCCESS,
            Status::Failure => FAILURE,
            Status::InvalidArgs => BAD_ARG,
            Status::NotExecutable => COULD_NOT_EXEC,
            Status::CmdUnknown => NO_SUCH_COMMAND,
            Status::IllegalCmd => ILLEGAL_COMMAND,
            Status::UnmatchedWildcard => UNMATCHED_WILDCARD,
            Status::ExpandError => EXPAND_ERROR,
            Status::ReadTooMuch => READ_TOO_MUCH,
            Status::ExecFail => EXEC_FAIL,
            Status::Signaled(sig) => signal_code(sig),
            Status::Code(c) => c,
        }
    }

    pub fn from_exit_code(code: i32) -> Self {
        match code {
            SUCCESS => Status::Ok,
            other => Status::Code(other),
        }
    }

    pub fn is_success(self) -> bool { self.code() == SUCCESS }
}

impl From<Status> for i32 {
    fn from(s: Status) -> i32 { s.code() }
}
