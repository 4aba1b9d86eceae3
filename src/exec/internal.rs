//! Internal-process (builtin/function/block) execution and the
//! bufferfill writer (C4.4 / C6). Grounded on ion's
//! `RefinedJob::Builtin`/`Function` dispatch in
//! `src/lib/shell/pipe_exec/mod.rs` (`exec_builtin`/`exec_function`) and the
//! `send_to_background` watcher-thread pattern for backgrounding writer
//! work (`src/lib/shell/pipe_exec/job_control.rs`).

use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::env::VariableStore;
use crate::error::ExecError;
use crate::io_chain::IoChain;

/// What a builtin call is given to read/write on, plus the variable store
/// access builtins like `set`/`cd`/`export` need — grounded on
/// ion's `Box<Fn(&[&str], &mut Shell) -> i32>` builtin signature
/// (`src/builtins/mod.rs`), narrowed from the whole shell down to just the
/// variable store so `exec` never depends on `context`.
pub struct BuiltinIo<'a> {
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
    pub vars: &'a mut dyn VariableStore,
}

/// The builtin-command collaborator contract: only the calling contract
/// for builtins, never their implementations.
pub trait BuiltinRegistry {
    fn has(&self, name: &str) -> bool;
    fn call(&mut self, name: &str, args: &[String], io: &mut BuiltinIo<'_>) -> i32;
}

/// A `Write` sink enforcing the `ReadTooMuch` byte budget on a single
/// internal process's captured output.
pub struct LimitedBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self { LimitedBuffer { buf: Vec::new(), limit } }
    pub fn into_inner(self) -> Vec<u8> { self.buf }
}

impl Write for LimitedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "read too much"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }
    fn flush(&mut self) -> io::Result<()> { Ok(()) }
}

/// Runs a builtin to completion, capturing its stdout into an in-memory
/// buffer bounded by [`IoChain::READ_TOO_MUCH_LIMIT`]. Used whenever a
/// builtin's output needs to be visible to a downstream pipe stage rather
/// than inherited directly (it is always "internal" in the sense that it
/// never itself forks).
pub fn run_builtin_captured(
    registry: &mut dyn BuiltinRegistry,
    name: &str,
    args: &[String],
    stdin: &mut dyn Read,
    vars: &mut dyn VariableStore,
) -> Result<(i32, Vec<u8>, Vec<u8>), ExecError> {
    let mut stdout = LimitedBuffer::new(IoChain::READ_TOO_MUCH_LIMIT);
    let mut stderr_buf = LimitedBuffer::new(IoChain::READ_TOO_MUCH_LIMIT);
    let status = {
        let mut io = BuiltinIo { stdin, stdout: &mut stdout, stderr: &mut stderr_buf, vars };
        registry.call(name, args, &mut io)
    };
    Ok((status, stdout.into_inner(), stderr_buf.into_inner()))
}

/// Runs a builtin inline against the shell's real stdio — the fast path
/// taken for a job that is a single unpiped builtin, skipping the
/// bufferfill machinery entirely (recovered from fish's
/// `internal_exec`/`exec_job` split).
pub fn run_builtin_inline(
    registry: &mut dyn BuiltinRegistry,
    name: &str,
    args: &[String],
    vars: &mut dyn VariableStore,
) -> i32 {
    let mut stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    let mut io = BuiltinIo { stdin: &mut stdin, stdout: &mut stdout, stderr: &mut stderr, vars };
    registry.call(name, args, &mut io)
}

/// Spawns a background thread draining `data` into the write end of a real
/// pipe (`write_fd`). This is the "deferred process" optimization: rather
/// than the main thread writing synchronously (which can deadlock if the
/// downstream external process never drains its own stdout before this
/// write would block), the write happens off-thread while the main thread
/// goes on to wait for the rest of the pipeline. Grounded on ion's
/// `send_to_background` spawning a raw `std::thread` rather than using a
/// shared thread pool.
pub fn spawn_deferred_writer(data: Vec<u8>, write_fd: RawFd) -> thread::JoinHandle<io::Result<()>> {
    thread::spawn(move || {
        use std::os::unix::io::FromRawFd;
        // Safety: `write_fd` is a pipe write end owned by the caller for
        // the duration of this pipeline stage; wrapping it in a `File`
        // here and letting it drop closes it exactly once, which is what
        // the reading end needs to see EOF.
        let mut file = unsafe { std::fs::File::from_raw_fd(write_fd) };
        file.write_all(&data)
    })
}

/// Shared handle for a bufferfill slot that a downstream consumer polls
/// rather than waiting on a pipe fd at all (used when both sides of the
/// pipe are internal processes and no real fd is needed).
pub fn new_bufferfill() -> Arc<Mutex<Vec<u8>>> { Arc::new(Mutex::new(Vec::new())) }

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;
    impl BuiltinRegistry for Echo {
        fn has(&self, name: &str) -> bool { name == "echo" }
        fn call(&mut self, name: &str, args: &[String], io: &mut BuiltinIo<'_>) -> i32 {
            assert_eq!(name, "echo");
            let _ = io.stdout.write_all(args.join(" ").as_bytes());
            0
        }
    }

    #[test]
    fn captured_builtin_collects_stdout() {
        let mut registry = Echo;
        let mut stdin = io::empty();
        let mut vars = crate::env::MapVariableStore::new();
        let (status, out, _err) =
            run_builtin_captured(&mut registry, "echo", &["hi".to_string()], &mut stdin, &mut vars).unwrap();
        assert_eq!(status, 0);
        assert_eq!(out, b"hi");
    }

    #[test]
    fn limited_buffer_rejects_writes_past_limit() {
        let mut buf = LimitedBuffer::new(4);
        assert!(buf.write_all(b"1234").is_ok());
        assert!(buf.write_all(b"5").is_err());
    }
}
