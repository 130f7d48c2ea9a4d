//! Low-level pipe helpers and the one-byte rendezvous used to hold children
//! between `fork` and `exec`.
//!
//! The `child_*` methods run in a freshly forked child and stick to raw system
//! calls: no allocation, no locks.

use nix::errno::Errno;
use nix::unistd::{close, read};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Creates a pipe whose both ends are close-on-exec.
pub(crate) fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    Errno::result(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    // SAFETY: pipe2 succeeded, so both descriptors are open and owned by nobody else.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

fn write_byte(fd: RawFd) -> Result<(), Errno> {
    let byte = [1u8];
    loop {
        let written = unsafe { libc::write(fd, byte.as_ptr().cast(), 1) };
        match Errno::result(written) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Blocks until one byte arrives. `Ok(false)` means end of file.
fn read_byte(fd: RawFd) -> Result<bool, Errno> {
    let mut byte = [0u8];
    loop {
        match read(fd, &mut byte) {
            Ok(n) => return Ok(n == 1),
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// A private pipe shared by the shell and one child.
///
/// Either side can be the one waiting: the child waits to be released before
/// `exec`, the shell waits for the child to report that it created its group.
/// Closing the channel without sending anything reads as "give up" on the other
/// end.
#[derive(Debug)]
pub(crate) struct Rendezvous {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Rendezvous {
    pub(crate) fn new() -> Result<Self, Errno> {
        let (read, write) = cloexec_pipe()?;
        Ok(Rendezvous {
            read: Some(read),
            write: Some(write),
        })
    }

    /// Shell side: sends the byte and closes the channel.
    pub(crate) fn notify(&mut self) -> Result<(), Errno> {
        self.read = None;
        match self.write.take() {
            Some(write) => write_byte(write.as_raw_fd()),
            None => Ok(()),
        }
    }

    /// Shell side: waits for the byte and closes the channel.
    pub(crate) fn wait(&mut self) -> Result<bool, Errno> {
        self.write = None;
        match self.read.take() {
            Some(read) => read_byte(read.as_raw_fd()),
            None => Ok(false),
        }
    }

    pub(crate) fn close(&mut self) {
        self.read = None;
        self.write = None;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.read.is_some() || self.write.is_some()
    }

    /// Child side: drops the inherited write end and blocks for the byte.
    pub(crate) fn child_wait(&self) -> bool {
        if let Some(write) = &self.write {
            let _ = close(write.as_raw_fd());
        }
        match &self.read {
            Some(read) => matches!(read_byte(read.as_raw_fd()), Ok(true)),
            None => false,
        }
    }

    /// Child side: drops the inherited read end and sends the byte.
    pub(crate) fn child_notify(&self) {
        if let Some(read) = &self.read {
            let _ = close(read.as_raw_fd());
        }
        if let Some(write) = &self.write {
            let _ = write_byte(write.as_raw_fd());
        }
    }
}
