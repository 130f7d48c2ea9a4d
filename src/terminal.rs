//! Foreground process group of the controlling terminal.

use log::{debug, warn};
use nix::errno::Errno;
use nix::unistd::Pid;

/// The process group currently owning the terminal on stdin.
pub fn foreground_group() -> Result<Pid, Errno> {
    let pgid = Errno::result(unsafe { libc::tcgetpgrp(libc::STDIN_FILENO) })?;
    Ok(Pid::from_raw(pgid))
}

pub fn set_foreground_group(pgid: Pid) -> Result<(), Errno> {
    Errno::result(unsafe { libc::tcsetpgrp(libc::STDIN_FILENO, pgid.as_raw()) })?;
    Ok(())
}

/// The terminal handed to a job's process group.
///
/// The previous foreground group is given the terminal back by [`restore`] or,
/// on early exit paths, when the handoff is dropped.
///
/// [`restore`]: TerminalHandoff::restore
#[derive(Debug)]
pub struct TerminalHandoff {
    previous: Option<Pid>,
}

impl TerminalHandoff {
    pub fn to(pgid: Pid) -> Result<Self, Errno> {
        let previous = foreground_group()?;
        set_foreground_group(pgid)?;
        debug!("terminal handed from group {previous} to {pgid}");
        Ok(TerminalHandoff {
            previous: Some(previous),
        })
    }

    pub fn restore(mut self) -> Result<(), Errno> {
        match self.previous.take() {
            Some(previous) => set_foreground_group(previous),
            None => Ok(()),
        }
    }
}

impl Drop for TerminalHandoff {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(err) = set_foreground_group(previous) {
                warn!("cannot give the terminal back to group {previous}: {err}");
            }
        }
    }
}
