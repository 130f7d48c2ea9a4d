//! Per-command redirection table.
//!
//! Entries are keyed by the target descriptor in the child. The table is applied
//! in two different ways: built-ins resolve a descriptor to an open [`File`] in
//! the shell process, external commands get the table turned into a list of
//! [`FdStep`]s that the forked child replays before `exec`.

use crate::error::{ExecError, RedirectError};
use nix::errno::Errno;
use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup, dup2};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{FromRawFd, RawFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Truncate,
    Append,
}

impl OpenMode {
    fn flags(self) -> OFlag {
        match self {
            OpenMode::Read => OFlag::O_RDONLY,
            OpenMode::Truncate => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            OpenMode::Append => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
        }
    }

    fn options(self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self {
            OpenMode::Read => options.read(true),
            OpenMode::Truncate => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        options
    }
}

/// What a target descriptor is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirection {
    /// A file opened with the given mode.
    Open { path: String, mode: OpenMode },
    /// A copy of another descriptor of the shell.
    Dup { source: RawFd },
    /// Closed in the child.
    Close,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirections {
    table: BTreeMap<RawFd, Redirection>,
}

impl Redirections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects `fd` to a file. `fd` comes straight from the source text and is
    /// range-checked here.
    pub fn open_file(&mut self, fd: i64, path: impl Into<String>, mode: OpenMode) -> Result<(), RedirectError> {
        let fd = RawFd::try_from(fd).map_err(|_| RedirectError::IncorrectFd(fd))?;
        self.claim(
            fd,
            Redirection::Open {
                path: path.into(),
                mode,
            },
        )
    }

    /// Makes `fd` a copy of the shell's `source`. Redirecting a descriptor onto
    /// itself records nothing.
    pub fn set_fd_redirect(&mut self, fd: RawFd, source: RawFd) -> Result<(), RedirectError> {
        if fd == source {
            return if fd < 0 {
                Err(RedirectError::IncorrectFd(fd.into()))
            } else {
                Ok(())
            };
        }
        if source < 0 {
            return Err(RedirectError::IncorrectFd(source.into()));
        }
        self.claim(fd, Redirection::Dup { source })
    }

    /// Closes `fd` in the child. Repeating a close is fine.
    pub fn mark_fd_for_close(&mut self, fd: RawFd) -> Result<(), RedirectError> {
        self.claim(fd, Redirection::Close)
    }

    fn claim(&mut self, fd: RawFd, redirection: Redirection) -> Result<(), RedirectError> {
        if fd < 0 {
            return Err(RedirectError::IncorrectFd(fd.into()));
        }
        match self.table.get(&fd) {
            None | Some(Redirection::Close) => {
                self.table.insert(fd, redirection);
                Ok(())
            }
            Some(_) => Err(RedirectError::FdTaken(fd)),
        }
    }

    pub fn get(&self, fd: RawFd) -> Option<&Redirection> {
        self.table.get(&fd)
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawFd, &Redirection)> {
        self.table.iter().map(|(fd, r)| (*fd, r))
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Opens every file entry, in descriptor order.
    pub(crate) fn open_files(&self) -> io::Result<BTreeMap<RawFd, File>> {
        let mut files = BTreeMap::new();
        for (fd, redirection) in &self.table {
            if let Redirection::Open { path, mode } = redirection {
                let file = mode
                    .options()
                    .open(path)
                    .map_err(|err| io::Error::new(err.kind(), format!("{path}: {err}")))?;
                files.insert(*fd, file);
            }
        }
        Ok(files)
    }

    /// What a built-in writing to `fd` writes to, as a file owned by the caller.
    pub(crate) fn resolve(&self, fd: RawFd) -> io::Result<File> {
        let source = match self.table.get(&fd) {
            Some(Redirection::Open { path, mode }) => {
                return mode
                    .options()
                    .open(path)
                    .map_err(|err| io::Error::new(err.kind(), format!("{path}: {err}")));
            }
            Some(Redirection::Dup { source }) => *source,
            Some(Redirection::Close) => return Err(io::Error::from(Errno::EBADF)),
            None => fd,
        };
        let copy = dup(source)?;
        // SAFETY: `dup` just returned a fresh descriptor nobody else owns.
        Ok(unsafe { File::from_raw_fd(copy) })
    }

    /// Converts the table into steps a forked child can replay without allocating.
    pub(crate) fn plan(&self) -> Result<Vec<FdStep>, ExecError> {
        self.table
            .iter()
            .map(|(&fd, redirection)| {
                Ok(match redirection {
                    Redirection::Open { path, mode } => FdStep::Open {
                        fd,
                        path: CString::new(path.as_str())
                            .map_err(|_| ExecError::InvalidArgument(path.clone()))?,
                        flags: mode.flags(),
                    },
                    Redirection::Dup { source } => FdStep::Dup {
                        fd,
                        source: *source,
                    },
                    Redirection::Close => FdStep::Close { fd },
                })
            })
            .collect()
    }
}

#[derive(Debug)]
pub(crate) enum FdStep {
    Open { fd: RawFd, path: CString, flags: OFlag },
    Dup { fd: RawFd, source: RawFd },
    Close { fd: RawFd },
}

impl FdStep {
    /// Subject of an error message about this step.
    pub(crate) fn subject(&self) -> &[u8] {
        match self {
            FdStep::Open { path, .. } => path.as_bytes(),
            FdStep::Dup { .. } => b"dup2",
            FdStep::Close { .. } => b"close",
        }
    }
}

/// Replays the steps in the current process. Only for use between `fork` and `exec`.
pub(crate) fn apply(steps: &[FdStep]) -> Result<(), (&FdStep, Errno)> {
    for step in steps {
        match step {
            FdStep::Open { fd, path, flags } => {
                let opened = open(path.as_c_str(), *flags, Mode::from_bits_truncate(0o666))
                    .map_err(|err| (step, err))?;
                if opened != *fd {
                    dup2(opened, *fd).map_err(|err| (step, err))?;
                    let _ = close(opened);
                }
            }
            FdStep::Dup { fd, source } => {
                dup2(*source, *fd).map_err(|err| (step, err))?;
                let _ = close(*source);
            }
            FdStep::Close { fd } => {
                let _ = close(*fd);
            }
        }
    }
    Ok(())
}
