//! C1 — redirection resolver.
//!
//! Turns an AST-level [`RedirectionSpec`] list into a concrete, ordered list
//! of [`Dup2Action`]s that [`crate::io_chain::IoChain`] applies to a child
//! right before exec. Grounded on ion's `redirect_input` /
//! `redirect_output` / `redirect_multiple_outputs` in
//! `src/shell/pipe_exec/mod.rs`, generalized past "one stdout + N extra fds
//! via memfd" into a flat action list any fd can target.

use std::fs::OpenOptions;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

use crate::error::RedirectionError;

/// How a redirection target is written to an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// `>` — truncate and write.
    Overwrite,
    /// `>>` — open for append.
    Append,
    /// `<` — open for read.
    Input,
    /// `>|` style / `set -o noclobber` violation guard disabled explicitly.
    OverwriteForce,
}

/// Where a redirection's target file descriptor comes from.
#[derive(Debug, Clone)]
pub enum RedirectTarget {
    /// A path to open, e.g. `> out.txt`.
    Path(PathBuf),
    /// Duplicate another fd, e.g. `2>&1`.
    Fd(RawFd),
    /// Close the fd, e.g. `2>&-`.
    Close,
}

/// One redirection as produced by the AST: "make `fd` refer to `target`,
/// opened/duplicated per `mode`". `mode` is ignored when `target` is
/// `Fd`/`Close`.
#[derive(Debug, Clone)]
pub struct RedirectionSpec {
    pub fd: RawFd,
    pub mode: RedirectMode,
    pub target: RedirectTarget,
    pub noclobber: bool,
}

impl RedirectionSpec {
    pub fn to_path(fd: RawFd, mode: RedirectMode, path: impl Into<PathBuf>) -> Self {
        RedirectionSpec { fd, mode, target: RedirectTarget::Path(path.into()), noclobber: false }
    }

    pub fn dup_fd(fd: RawFd, source: RawFd) -> Self {
        RedirectionSpec { fd, mode: RedirectMode::Overwrite, target: RedirectTarget::Fd(source), noclobber: false }
    }

    pub fn close(fd: RawFd) -> Self {
        RedirectionSpec { fd, mode: RedirectMode::Overwrite, target: RedirectTarget::Close, noclobber: false }
    }
}

/// One concrete action to perform in the child before exec. This is the
/// "dup2 action list": plain enough that applying it never needs to
/// consult the AST again.
#[derive(Debug)]
pub enum Dup2Action {
    /// Open `path` with the given flags, yielding a fresh fd, then dup2 it
    /// onto `fd` ("transmogrification" — opened eagerly, before fork, so a
    /// failure to open is reported in the parent rather than silently
    /// killing the child).
    OpenAndDup { fd: RawFd, file: std::fs::File },
    DupFd { fd: RawFd, source: RawFd },
    Close { fd: RawFd },
}

/// Resolves a list of [`RedirectionSpec`] into ordered [`Dup2Action`]s,
/// opening files eagerly (transmogrification) so errors surface before any
/// fork happens.
pub fn resolve(specs: &[RedirectionSpec]) -> Result<Vec<Dup2Action>, RedirectionError> {
    let mut actions = Vec::with_capacity(specs.len());
    for spec in specs {
        let action = match &spec.target {
            RedirectTarget::Fd(source) => Dup2Action::DupFd { fd: spec.fd, source: *source },
            RedirectTarget::Close => Dup2Action::Close { fd: spec.fd },
            RedirectTarget::Path(path) => {
                if spec.noclobber && spec.mode == RedirectMode::Overwrite && path.exists() {
                    return Err(RedirectionError::Noclobber(path.clone()));
                }
                let mut opts = OpenOptions::new();
                match spec.mode {
                    RedirectMode::Overwrite | RedirectMode::OverwriteForce => {
                        opts.write(true).create(true).truncate(true);
                    }
                    RedirectMode::Append => {
                        opts.write(true).create(true).append(true);
                    }
                    RedirectMode::Input => {
                        opts.read(true);
                    }
                }
                let file = opts.open(path).map_err(|source| RedirectionError::Open {
                    path: path.clone(),
                    mode: mode_name(spec.mode),
                    source,
                })?;
                Dup2Action::OpenAndDup { fd: spec.fd, file }
            }
        };
        actions.push(action);
    }
    Ok(actions)
}

/// Walks a resolved dup2 action list backward from `target`, following
/// `DupFd { fd, source }` links (`fd` becomes a copy of `source`) until
/// landing on an fd the chain never redirects, an `OpenAndDup`/`Close`
/// action (file-backed or closed, not a copy of a live fd), or a cycle.
/// Grounded on the original implementation's `redirection.h` worked
/// example: given `5 -> 3` and `3 -> 1`, `fd_for_target_fd(&actions, 5)`
/// returns `1`, the fd that's actually backing descriptor 5 once the whole
/// chain has been applied. A target the chain never mentions resolves to
/// itself.
pub fn fd_for_target_fd(actions: &[Dup2Action], target: RawFd) -> RawFd {
    let mut current = target;
    loop {
        let last_affecting = actions.iter().rev().find(|a| action_fd(a) == current);
        match last_affecting {
            Some(Dup2Action::DupFd { source, .. }) if *source != current => current = *source,
            _ => return current,
        }
    }
}

fn action_fd(action: &Dup2Action) -> RawFd {
    match action {
        Dup2Action::OpenAndDup { fd, .. } | Dup2Action::DupFd { fd, .. } | Dup2Action::Close { fd } => *fd,
    }
}

fn mode_name(mode: RedirectMode) -> &'static str {
    match mode {
        RedirectMode::Overwrite | RedirectMode::OverwriteForce => "writing",
        RedirectMode::Append => "appending",
        RedirectMode::Input => "reading",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noclobber_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.txt");
        std::fs::write(&path, b"x").unwrap();
        let spec = RedirectionSpec {
            fd: 1,
            mode: RedirectMode::Overwrite,
            target: RedirectTarget::Path(path),
            noclobber: true,
        };
        assert!(matches!(resolve(&[spec]), Err(RedirectionError::Noclobber(_))));
    }

    #[test]
    fn fd_dup_and_close_do_not_touch_filesystem() {
        let specs = vec![RedirectionSpec::dup_fd(2, 1), RedirectionSpec::close(0)];
        let actions = resolve(&specs).unwrap();
        assert!(matches!(actions[0], Dup2Action::DupFd { fd: 2, source: 1 }));
        assert!(matches!(actions[1], Dup2Action::Close { fd: 0 }));
    }

    #[test]
    fn fd_for_target_fd_walks_a_chain_to_its_ultimate_source() {
        let actions = vec![Dup2Action::DupFd { fd: 5, source: 3 }, Dup2Action::DupFd { fd: 3, source: 1 }];
        assert_eq!(fd_for_target_fd(&actions, 5), 1);
    }

    #[test]
    fn fd_for_target_fd_returns_the_fd_itself_when_unreferenced() {
        let actions = vec![Dup2Action::DupFd { fd: 2, source: 1 }];
        assert_eq!(fd_for_target_fd(&actions, 9), 9);
    }

    #[test]
    fn fd_for_target_fd_stops_at_a_file_backed_action() {
        let dir = tempfile::tempdir().unwrap();
        let file = std::fs::File::create(dir.path().join("f")).unwrap();
        let actions = vec![Dup2Action::OpenAndDup { fd: 1, file }, Dup2Action::DupFd { fd: 2, source: 1 }];
        assert_eq!(fd_for_target_fd(&actions, 2), 1);
    }

    #[test]
    fn fd_for_target_fd_is_idempotent() {
        let actions = vec![Dup2Action::DupFd { fd: 5, source: 3 }, Dup2Action::DupFd { fd: 3, source: 1 }];
        let once = fd_for_target_fd(&actions, 5);
        assert_eq!(fd_for_target_fd(&actions, once), once);
    }
}
