//! A single command: argv, redirections, how it is run, and its outcome.

use crate::builtin::BuiltinKind;
use crate::error::{CommandError, ExecError, RedirectError};
use crate::external;
use crate::fd::Rendezvous;
use crate::grammar::NonterminalKind;
use crate::parser::Symbol;
use crate::redirect::{OpenMode, Redirections};
use crate::token::TokenKind;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use std::cell::OnceCell;
use std::fmt;
use std::os::fd::RawFd;

pub type ExitCode = i32;

/// Exit code of a command that could not be found.
pub const NOT_FOUND: ExitCode = 127;

/// How a command is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandTraits {
    /// The child stops right before `exec` until [`Command::release`].
    pub suspend_before_exec: bool,
    /// The child creates a new process group led by itself.
    pub own_process_group: bool,
    /// [`Command::execute`] waits for the command to finish.
    pub blocks: bool,
    /// The child reports back once its group exists, see
    /// [`Command::wait_for_group_change`].
    pub wait_for_group_change: bool,
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Exited(ExitCode),
    Signaled(i32),
    Abnormal,
}

impl CommandStatus {
    pub fn success(self) -> bool {
        self == CommandStatus::Exited(0)
    }

    /// The exit code, if the command exited normally.
    pub fn code(self) -> Option<ExitCode> {
        match self {
            CommandStatus::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(CommandStatus::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(CommandStatus::Signaled(signal as i32)),
            _ => None,
        }
    }

    /// Name of the terminating signal, like `SIGTERM`.
    pub fn signal_name(self) -> Option<String> {
        match self {
            CommandStatus::Signaled(number) => Some(match Signal::try_from(number) {
                Ok(signal) => signal.as_str().to_string(),
                Err(_) => format!("signal {number}"),
            }),
            _ => None,
        }
    }

    pub(crate) const ENCODED_LEN: usize = 5;

    /// Fixed-size form sent over a background job's status channel.
    pub(crate) fn encode(self) -> [u8; Self::ENCODED_LEN] {
        let (tag, value) = match self {
            CommandStatus::Exited(code) => (0u8, code),
            CommandStatus::Signaled(signal) => (1, signal),
            CommandStatus::Abnormal => (2, 0),
        };
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[0] = tag;
        bytes[1..].copy_from_slice(&value.to_le_bytes());
        bytes
    }

    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        let (&tag, rest) = bytes.split_first()?;
        let value = i32::from_le_bytes(rest.try_into().ok()?);
        match tag {
            0 => Some(CommandStatus::Exited(value)),
            1 => Some(CommandStatus::Signaled(value)),
            2 => Some(CommandStatus::Abnormal),
            _ => None,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Exited(code) => write!(f, "exit {code}"),
            CommandStatus::Signaled(_) => {
                write!(f, "killed by {}", self.signal_name().unwrap_or_default())
            }
            CommandStatus::Abnormal => f.write_str("abnormal termination"),
        }
    }
}

/// Who runs a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Builtin(BuiltinKind),
    External,
}

impl Handler {
    pub fn lookup(name: &str) -> Handler {
        BuiltinKind::lookup(name).map_or(Handler::External, Handler::Builtin)
    }
}

/// A command ready to run.
///
/// The pid is set at most once and the status is collected at most once.
/// Dropping a command whose process was never waited for closes its channels
/// and then blocks until the process is collected.
pub struct Command {
    argv: Vec<String>,
    redirects: Redirections,
    traits: CommandTraits,
    handler: Handler,
    pid: OnceCell<Pid>,
    status: OnceCell<CommandStatus>,
    release: Option<Rendezvous>,
    group_change: Option<Rendezvous>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("argv", &self.argv)
            .field("handler", &self.handler)
            .field("traits", &self.traits)
            .field("pid", &self.pid.get())
            .field("status", &self.status.get())
            .finish()
    }
}

impl Command {
    pub fn new(argv: Vec<String>, redirects: Redirections, traits: CommandTraits) -> Result<Self, CommandError> {
        let handler = Handler::lookup(argv.first().map_or("", String::as_str));
        Ok(Command {
            argv,
            redirects,
            traits,
            handler,
            pid: OnceCell::new(),
            status: OnceCell::new(),
            release: None,
            group_change: None,
        })
    }

    /// Builds a command out of a [`NonterminalKind::Command`] node.
    pub fn from_node(node: &Symbol, traits: CommandTraits) -> Result<Self, CommandError> {
        if node.kind() != Some(NonterminalKind::Command) {
            return Err(CommandError::NotACommand(node.kind()));
        }
        let mut argv = Vec::new();
        let mut redirects = Redirections::new();
        for child in node.children() {
            match child {
                Symbol::Terminal(token) => argv.push(token.text.clone()),
                Symbol::Nonterminal(_) => add_redirection(&mut redirects, child)?,
            }
        }
        Command::new(argv, redirects, traits)
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn name(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    pub fn redirects(&self) -> &Redirections {
        &self.redirects
    }

    pub fn traits(&self) -> CommandTraits {
        self.traits
    }

    pub fn handler(&self) -> Handler {
        self.handler
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.handler, Handler::Builtin(_))
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid.get().copied()
    }

    /// The collected status, if any.
    pub fn status(&self) -> Option<CommandStatus> {
        self.status.get().copied()
    }

    /// Connects `fd` to the shell's descriptor `source`.
    pub fn set_fd_redirect(&mut self, fd: RawFd, source: RawFd) -> Result<(), RedirectError> {
        self.redirects.set_fd_redirect(fd, source)
    }

    pub fn mark_fd_for_close(&mut self, fd: RawFd) -> Result<(), RedirectError> {
        self.redirects.mark_fd_for_close(fd)
    }

    /// Runs the command.
    ///
    /// Built-ins run to completion right here. External commands are resolved and
    /// forked; with [`CommandTraits::blocks`] this waits for them as well.
    pub fn execute(&mut self) -> Result<(), ExecError> {
        if self.pid.get().is_some() || self.status.get().is_some() {
            return Ok(());
        }
        match self.handler {
            Handler::Builtin(kind) => {
                let status = kind.run(&self.argv, &self.redirects);
                debug!("builtin {} finished: {status}", self.name());
                let _ = self.status.set(status);
                Ok(())
            }
            Handler::External => {
                self.open_channels()?;
                let pid = match external::spawn(self) {
                    Ok(pid) => pid,
                    Err(err) => {
                        self.abandon();
                        if matches!(err, ExecError::NoSuchCommand(_)) {
                            let _ = self.status.set(CommandStatus::Exited(NOT_FOUND));
                        }
                        return Err(err);
                    }
                };
                let _ = self.pid.set(pid);
                if self.traits.blocks {
                    self.wait()?;
                }
                Ok(())
            }
        }
    }

    /// Allocates the release and group-change channels this command's traits ask
    /// for. Runs right before the fork, so a child never inherits the channels
    /// of commands forked after it.
    fn open_channels(&mut self) -> Result<(), ExecError> {
        let open = |wanted: bool, name: &str| -> Result<Option<Rendezvous>, ExecError> {
            if !wanted {
                return Ok(None);
            }
            Rendezvous::new()
                .map(Some)
                .map_err(|err| ExecError::system(format!("{name}: cannot allocate a synchronization pipe"), err))
        };
        let release = open(self.traits.suspend_before_exec, self.name())?;
        let group_change = open(
            self.traits.wait_for_group_change && self.traits.own_process_group,
            self.name(),
        )?;
        self.release = release;
        self.group_change = group_change;
        Ok(())
    }

    /// Lets a suspended child proceed to `exec`. Does nothing for built-ins and
    /// commands that were not suspended.
    pub fn release(&mut self) -> Result<(), ExecError> {
        match self.release.take() {
            Some(mut channel) if self.pid.get().is_some() => channel
                .notify()
                .map_err(|err| ExecError::system(format!("{}: cannot release", self.name()), err)),
            _ => Ok(()),
        }
    }

    /// Blocks until the child reports that it runs in its own process group.
    pub fn wait_for_group_change(&mut self) -> Result<(), ExecError> {
        let Some(mut channel) = self.group_change.take() else {
            return Ok(());
        };
        match channel.wait() {
            Ok(true) => Ok(()),
            Ok(false) => Err(ExecError::system(
                format!("{}: did not create its process group", self.name()),
                Errno::ESRCH,
            )),
            Err(err) => Err(ExecError::system(format!("{}: group change", self.name()), err)),
        }
    }

    /// Collects the command's status, once.
    pub fn wait(&mut self) -> Result<CommandStatus, ExecError> {
        if let Some(status) = self.status.get() {
            return Ok(*status);
        }
        let status = match self.pid.get() {
            Some(&pid) => wait_for_exit(pid)
                .map_err(|err| ExecError::system(format!("{}: waitpid", self.name()), err))?,
            None => CommandStatus::Abnormal,
        };
        let _ = self.status.set(status);
        Ok(status)
    }

    /// Closes the synchronization channels; a child still suspended gives up.
    pub(crate) fn abandon(&mut self) {
        if let Some(channel) = self.release.as_mut() {
            channel.close();
        }
        if let Some(channel) = self.group_change.as_mut() {
            channel.close();
        }
    }

    pub(crate) fn release_channel(&self) -> Option<&Rendezvous> {
        self.release.as_ref().filter(|c| c.is_open())
    }

    pub(crate) fn group_change_channel(&self) -> Option<&Rendezvous> {
        self.group_change.as_ref().filter(|c| c.is_open())
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.abandon();
        if self.status.get().is_none() {
            if let Some(&pid) = self.pid.get() {
                match wait_for_exit(pid) {
                    Ok(status) => debug!("collected {} ({pid}) on drop: {status}", self.name()),
                    Err(err) => warn!("cannot collect {} ({pid}): {err}", self.name()),
                }
            }
        }
    }
}

/// Blocking `waitpid` until the process terminates.
fn wait_for_exit(pid: Pid) -> Result<CommandStatus, Errno> {
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(status) = CommandStatus::from_wait(status) {
                    return Ok(status);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

fn add_redirection(redirects: &mut Redirections, node: &Symbol) -> Result<(), CommandError> {
    if node.kind() != Some(NonterminalKind::Redirection) {
        return Err(CommandError::NotACommand(node.kind()));
    }
    let (Some(op), Some(target)) = (
        node.children().first().and_then(Symbol::as_token),
        node.children().get(1).and_then(Symbol::as_token),
    ) else {
        return Err(CommandError::NotACommand(node.kind()));
    };
    let (mode, default_fd) = match op.kind {
        TokenKind::RedirIn | TokenKind::FdIn => (OpenMode::Read, 0),
        TokenKind::RedirOut | TokenKind::FdOut => (OpenMode::Truncate, 1),
        TokenKind::RedirAppend | TokenKind::FdAppend => (OpenMode::Append, 1),
        _ => return Err(CommandError::NotACommand(node.kind())),
    };
    let fd = match op.kind {
        TokenKind::FdIn | TokenKind::FdOut | TokenKind::FdAppend => parse_fd_prefix(&op.text)?,
        _ => default_fd,
    };
    redirects.open_file(fd, target.text.clone(), mode)?;
    Ok(())
}

/// The descriptor number in front of an operator such as `2>>`.
fn parse_fd_prefix(text: &str) -> Result<i64, RedirectError> {
    let digits = text.trim_end_matches(['<', '>']);
    digits
        .parse::<i64>()
        .map_err(|_| RedirectError::IncorrectFd(i64::MAX))
}
