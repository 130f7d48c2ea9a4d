//! N commands joined by N-1 pipes and run as one process group.
//!
//! Every member is forked suspended. Group membership and terminal ownership are
//! settled while nothing runs yet, and only then are the members released.

use crate::command::{Command, CommandStatus, CommandTraits, NOT_FOUND};
use crate::error::{CommandError, ExecError};
use crate::fd::cloexec_pipe;
use crate::grammar::NonterminalKind;
use crate::parser::Symbol;
use crate::terminal::TerminalHandoff;
use log::{debug, warn};
use nix::unistd::setpgid;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

pub struct Pipeline {
    commands: Vec<Command>,
    blocks: bool,
    job_control: bool,
    status: Option<CommandStatus>,
}

impl Pipeline {
    /// Builds a pipeline out of a [`NonterminalKind::Pipeline`] node. Every
    /// member is suspended before exec. With `job_control` the first member
    /// starts a new process group which the others join.
    pub fn from_node(node: &Symbol, blocks: bool, job_control: bool) -> Result<Self, CommandError> {
        if node.kind() != Some(NonterminalKind::Pipeline) {
            return Err(CommandError::NotAPipeline(node.kind()));
        }
        let commands = node
            .children()
            .iter()
            .enumerate()
            .map(|(index, child)| {
                let traits = CommandTraits {
                    suspend_before_exec: true,
                    own_process_group: job_control && index == 0,
                    ..CommandTraits::default()
                };
                Command::from_node(child, traits)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline {
            commands,
            blocks,
            job_control,
            status: None,
        })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Status of the last member, once collected.
    pub fn status(&self) -> Option<CommandStatus> {
        self.status
    }

    /// Starts all members and, for a blocking pipeline, waits for them.
    ///
    /// # Arguments
    /// * `foreground` - Whether the pipeline's group gets the terminal while it
    ///   runs. Ignored without job control.
    ///
    /// # Returns
    /// An error if pipes, processes, group or terminal setup failed. Members that
    /// were already forked are cancelled when the pipeline is dropped.
    pub fn execute(&mut self, foreground: bool) -> Result<(), ExecError> {
        let pipes = (1..self.commands.len())
            .map(|_| cloexec_pipe())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| ExecError::system("pipeline failure: can't create enough pipes", err))?;
        self.wire(&pipes);

        for command in &mut self.commands {
            match command.execute() {
                Ok(()) => {}
                Err(ExecError::NoSuchCommand(name)) => {
                    eprintln!("{}: {name}: command not found", crate::SHELL_NAME);
                    debug!("pipeline member {name} not found, status {NOT_FOUND}");
                }
                Err(err) => return Err(err),
            }
        }

        drop(pipes);

        let leader = if self.job_control {
            self.commands.iter().find_map(Command::pid)
        } else {
            None
        };
        if let Some(leader) = leader {
            for pid in self.commands.iter().filter_map(Command::pid) {
                setpgid(pid, leader).map_err(|err| {
                    ExecError::system(format!("pipeline failure: can't move {pid} to group {leader}"), err)
                })?;
            }
            debug!("pipeline group {leader} formed");
        }

        let handoff = match leader {
            Some(leader) if foreground => Some(
                TerminalHandoff::to(leader)
                    .map_err(|err| ExecError::system("pipeline failure: can't hand over the terminal", err))?,
            ),
            _ => None,
        };

        for command in &mut self.commands {
            command.release()?;
        }

        if self.blocks {
            self.wait()?;
        }

        if let Some(handoff) = handoff {
            handoff
                .restore()
                .map_err(|err| ExecError::system("pipeline failure: can't take the terminal back", err))?;
        }
        Ok(())
    }

    /// Waits for every member; the pipeline's status is the last member's.
    pub fn wait(&mut self) -> Result<CommandStatus, ExecError> {
        let mut last = CommandStatus::Abnormal;
        for command in &mut self.commands {
            last = command.wait()?;
        }
        self.status = Some(last);
        Ok(last)
    }

    /// Connects member `i` to pipe `i - 1` on fd 0 and pipe `i` on fd 1, and
    /// marks every other pipe end for closing. A redirection written by the user
    /// takes precedence over the pipe.
    fn wire(&mut self, pipes: &[(OwnedFd, OwnedFd)]) {
        for (index, command) in self.commands.iter_mut().enumerate() {
            for (pipe_index, (read, write)) in pipes.iter().enumerate() {
                let (read, write) = (read.as_raw_fd(), write.as_raw_fd());
                if pipe_index + 1 == index {
                    connect(command, 0, read);
                    close_in_child(command, write);
                } else if pipe_index == index {
                    connect(command, 1, write);
                    close_in_child(command, read);
                } else {
                    close_in_child(command, read);
                    close_in_child(command, write);
                }
            }
        }
    }
}

fn connect(command: &mut Command, fd: RawFd, source: RawFd) {
    if command.set_fd_redirect(fd, source).is_err() {
        debug!("{}: fd {fd} redirected explicitly, pipe end {source} unused", command.name());
        close_in_child(command, source);
    }
}

fn close_in_child(command: &mut Command, fd: RawFd) {
    if let Err(err) = command.mark_fd_for_close(fd) {
        debug!("{}: not closing pipe end {fd}: {err}", command.name());
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Close every channel before any member is waited for.
        for command in &mut self.commands {
            command.abandon();
        }
        if self.status.is_none() && self.commands.iter().any(|c| c.pid().is_some()) {
            warn!("pipeline dropped before completion, collecting members");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect::Redirection;

    fn pipeline(source: &str) -> Pipeline {
        Pipeline::from_node(&crate::parse(source).unwrap(), true, true).unwrap()
    }

    #[test]
    fn members_get_pipeline_traits() {
        let p = pipeline("a | b | c");
        let traits: Vec<(bool, bool)> = p
            .commands()
            .iter()
            .map(|c| (c.traits().suspend_before_exec, c.traits().own_process_group))
            .collect();
        assert_eq!(traits, vec![(true, true), (true, false), (true, false)]);

        let node = crate::parse("a | b").unwrap();
        let p = Pipeline::from_node(&node, true, false).unwrap();
        assert!(p.commands().iter().all(|c| !c.traits().own_process_group));
    }

    #[test]
    fn rejects_non_pipeline_nodes() {
        let err = Pipeline::from_node(&crate::parse("a").unwrap(), true, true).err().unwrap();
        assert!(matches!(
            err,
            CommandError::NotAPipeline(Some(NonterminalKind::Command))
        ));
    }

    #[test]
    fn wiring_connects_neighbours_and_closes_the_rest() {
        let mut p = pipeline("a | b | c");
        let pipes: Vec<(OwnedFd, OwnedFd)> = (0..2).map(|_| cloexec_pipe().unwrap()).collect();
        p.wire(&pipes);
        let raw: Vec<(RawFd, RawFd)> = pipes.iter().map(|(r, w)| (r.as_raw_fd(), w.as_raw_fd())).collect();

        let middle = p.commands()[1].redirects();
        assert_eq!(middle.get(0), Some(&Redirection::Dup { source: raw[0].0 }));
        assert_eq!(middle.get(1), Some(&Redirection::Dup { source: raw[1].1 }));
        assert_eq!(middle.get(raw[0].1), Some(&Redirection::Close));
        assert_eq!(middle.get(raw[1].0), Some(&Redirection::Close));

        let first = p.commands()[0].redirects();
        assert_eq!(first.get(0), None);
        assert_eq!(first.get(1), Some(&Redirection::Dup { source: raw[0].1 }));
        for fd in [raw[0].0, raw[1].0, raw[1].1] {
            assert_eq!(first.get(fd), Some(&Redirection::Close));
        }
    }

    #[test]
    fn explicit_redirection_beats_the_pipe() {
        let mut p = pipeline("a > out | b");
        let pipes = vec![cloexec_pipe().unwrap()];
        p.wire(&pipes);
        let write = pipes[0].1.as_raw_fd();
        let first = p.commands()[0].redirects();
        assert!(matches!(first.get(1), Some(Redirection::Open { .. })));
        assert_eq!(first.get(write), Some(&Redirection::Close));
    }

    #[test]
    fn producer_bytes_reach_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut p = pipeline(&format!("printf \"a\\nb\\nc\\n\" | sort -r | cat > {}", out.display()));
        p.execute(false).unwrap();
        assert_eq!(p.status(), Some(CommandStatus::Exited(0)));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "c\nb\na\n");
    }

    #[test]
    fn status_is_last_member_status() {
        let mut p = pipeline("sh -c \"exit 4\" | sh -c \"exit 5\"");
        p.execute(false).unwrap();
        assert_eq!(p.status(), Some(CommandStatus::Exited(5)));

        let mut p = pipeline("sh -c \"exit 4\" | true");
        p.execute(false).unwrap();
        assert_eq!(p.status(), Some(CommandStatus::Exited(0)));
    }

    #[test]
    fn members_share_the_first_members_group() {
        let node = crate::parse("sleep 0.2 | sleep 0.2 | cat").unwrap();
        let mut p = Pipeline::from_node(&node, false, true).unwrap();
        p.execute(false).unwrap();
        assert_eq!(p.status(), None);
        let leader = p.commands()[0].pid().unwrap();
        for command in p.commands() {
            let pid = command.pid().unwrap();
            assert_eq!(nix::unistd::getpgid(Some(pid)).unwrap(), leader);
        }
        assert_eq!(p.wait().unwrap(), CommandStatus::Exited(0));
    }

    #[test]
    fn missing_member_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut p = pipeline(&format!(
            "jcsh-no-such-program | sh -c \"cat; echo done\" > {}",
            out.display()
        ));
        p.execute(false).unwrap();
        assert_eq!(p.commands()[0].status(), Some(CommandStatus::Exited(NOT_FOUND)));
        assert_eq!(p.status(), Some(CommandStatus::Exited(0)));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "done\n");
    }

    #[test]
    fn builtin_member_writes_into_the_pipe() {
        let _lock = crate::test_util::lock_current_dir();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut p = pipeline(&format!("pwd | cat > {}", out.display()));
        p.execute(false).unwrap();
        let expected = format!("{}\n", std::env::current_dir().unwrap().display());
        assert_eq!(std::fs::read_to_string(&out).unwrap(), expected);
    }

    #[test]
    fn failed_setup_does_not_leave_members_waiting() {
        let (done, finished) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let node = crate::parse("sleep 0 | sleep 0 | cat \"a\0b\"").unwrap();
            let mut p = Pipeline::from_node(&node, true, false).unwrap();
            let result = p.execute(false);
            let forked = p.commands().iter().filter(|c| c.pid().is_some()).count();
            drop(p);
            let _ = done.send((matches!(result, Err(ExecError::InvalidArgument(_))), forked));
        });
        let outcome = finished.recv_timeout(std::time::Duration::from_secs(10));
        assert_eq!(outcome, Ok((true, 2)));
    }
}
