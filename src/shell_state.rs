//! Per-session state: last status, interactivity and background jobs.

use crate::command::CommandStatus;
use crate::error::ExecError;
use crate::fd::cloexec_pipe;
use crate::parser::Symbol;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork, setpgid};
use std::fs::File;
use std::io::{self, Read, Write};

/// A job started with `&`.
#[derive(Debug)]
pub struct BackgroundJob {
    pid: Pid,
    channel: File,
    finished: bool,
}

impl BackgroundJob {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// A background job collected by [`ShellState::reap_finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedJob {
    pub pid: Pid,
    pub status: CommandStatus,
}

#[derive(Debug)]
pub struct ShellState {
    last_status: CommandStatus,
    interactive: bool,
    jobs: Vec<BackgroundJob>,
}

impl ShellState {
    pub fn new(interactive: bool) -> Self {
        ShellState {
            last_status: CommandStatus::Exited(0),
            interactive,
            jobs: Vec::new(),
        }
    }

    pub fn last_status(&self) -> CommandStatus {
        self.last_status
    }

    pub fn set_last_status(&mut self, status: CommandStatus) {
        self.last_status = status;
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn jobs(&self) -> &[BackgroundJob] {
        &self.jobs
    }

    /// Runs `node` in a forked copy of the shell.
    ///
    /// The copy moves into its own process group, runs non-interactively and
    /// reports its final status through a pipe before exiting. The job is added
    /// to the table and its pid returned right away.
    pub fn spawn_background(&mut self, node: &Symbol) -> Result<Pid, ExecError> {
        let (read, write) =
            cloexec_pipe().map_err(|err| ExecError::system("background job: can't create status pipe", err))?;
        let _ = io::stdout().flush();

        // SAFETY: the shell is single-threaded, so the child owns a consistent
        // copy of the whole process.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                drop(write);
                debug!("background job {child} started");
                self.jobs.push(BackgroundJob {
                    pid: child,
                    channel: File::from(read),
                    finished: false,
                });
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                drop(read);
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
                let mut state = ShellState::new(false);
                let status = match crate::executor::execute(node, &mut state) {
                    Ok(()) => state.last_status(),
                    Err(err) => {
                        eprintln!("{}: {err}", crate::SHELL_NAME);
                        CommandStatus::Abnormal
                    }
                };
                let mut channel = File::from(write);
                let _ = channel.write_all(&status.encode());
                drop(channel);
                drop(state);
                // SAFETY: skips the parent's atexit handlers and buffers.
                unsafe { libc::_exit(0) }
            }
            Err(err) => Err(ExecError::system("background job: fork", err)),
        }
    }

    /// Flags the job `pid` as finished, e.g. after its termination was observed
    /// elsewhere. The job stays in the table until its process is actually gone.
    /// Returns false for unknown pids.
    pub fn mark_finished(&mut self, pid: Pid) -> bool {
        match self.jobs.iter_mut().find(|job| job.pid == pid) {
            Some(job) => {
                job.finished = true;
                true
            }
            None => false,
        }
    }

    /// Collects every background job that has terminated, without blocking,
    /// and removes it from the table.
    pub fn reap_finished(&mut self) -> Vec<FinishedJob> {
        let mut reaped = Vec::new();
        let mut index = 0;
        while index < self.jobs.len() {
            match poll(&mut self.jobs[index]) {
                Some(status) => {
                    let mut job = self.jobs.remove(index);
                    let status = read_status(&mut job.channel).unwrap_or(status);
                    debug!("background job {} finished: {status}", job.pid);
                    reaped.push(FinishedJob { pid: job.pid, status });
                }
                None => index += 1,
            }
        }
        reaped
    }
}

/// Checks a job's process without blocking, whatever its flag says. `Some`
/// once it is gone, with the status the kernel reported.
fn poll(job: &mut BackgroundJob) -> Option<CommandStatus> {
    match waitpid(job.pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => None,
        Ok(status) => {
            let status = CommandStatus::from_wait(status)?;
            job.finished = true;
            Some(status)
        }
        Err(Errno::ECHILD) => {
            // Collected by someone else already.
            job.finished = true;
            Some(CommandStatus::Abnormal)
        }
        Err(err) => {
            warn!("cannot poll background job {}: {err}", job.pid);
            None
        }
    }
}

fn read_status(channel: &mut File) -> Option<CommandStatus> {
    let mut bytes = [0u8; CommandStatus::ENCODED_LEN];
    channel.read_exact(&mut bytes).ok()?;
    CommandStatus::decode(&bytes)
}
