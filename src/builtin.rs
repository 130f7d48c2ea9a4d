use crate::command::{CommandStatus, ExitCode};
use crate::redirect::Redirections;
use anyhow::{Context, Result, bail};
use argh::{EarlyExit, FromArgs};
use log::debug;
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::RawFd;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process. They see the world through the
/// command's redirection table only.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "pwd" or "cd".
    fn name() -> &'static str;

    /// Executes the command writing to the descriptors of `io`.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, io: &mut BuiltinIo<'_>) -> Result<ExitCode>;
}

/// The closed set of built-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Cd,
    Pwd,
    True,
    False,
}

impl BuiltinKind {
    pub fn lookup(name: &str) -> Option<Self> {
        [
            BuiltinKind::Cd,
            BuiltinKind::Pwd,
            BuiltinKind::True,
            BuiltinKind::False,
        ]
        .into_iter()
        .find(|kind| kind.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::Cd => Cd::name(),
            BuiltinKind::Pwd => Pwd::name(),
            BuiltinKind::True => True::name(),
            BuiltinKind::False => False::name(),
        }
    }

    /// Runs the builtin in the shell process. Never fails: problems end up on the
    /// command's fd 2 and in the exit code.
    pub(crate) fn run(self, argv: &[String], redirects: &Redirections) -> CommandStatus {
        let args: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();
        let code = match self {
            BuiltinKind::Cd => run_as::<Cd>(&args, redirects),
            BuiltinKind::Pwd => run_as::<Pwd>(&args, redirects),
            BuiltinKind::True => run_as::<True>(&args, redirects),
            BuiltinKind::False => run_as::<False>(&args, redirects),
        };
        CommandStatus::Exited(code)
    }
}

fn run_as<T: BuiltinCommand>(args: &[&str], redirects: &Redirections) -> ExitCode {
    let mut io = match BuiltinIo::new(redirects) {
        Ok(io) => io,
        Err(err) => {
            eprintln!("{}: {err}", crate::SHELL_NAME);
            return 1;
        }
    };
    let code = match T::from_args(&[T::name()], args) {
        Ok(cmd) => match cmd.execute(&mut io) {
            Ok(code) => code,
            Err(err) => {
                debug!("{} failed: {err:#}", T::name());
                let _ = writeln!(io.stderr, "{}: {err:#}", T::name());
                1
            }
        },
        Err(EarlyExit { output, status }) => {
            let (target, code) = match status {
                Ok(()) => (&mut io.stdout, 0),
                Err(()) => (&mut io.stderr, 1),
            };
            let _ = target.write_all(output.as_bytes());
            code
        }
    };
    let _ = io.stdout.flush();
    let _ = io.stderr.flush();
    code
}

/// Standard output and error of a builtin.
pub(crate) struct BuiltinIo<'a> {
    pub stdout: FdWriter<'a>,
    pub stderr: FdWriter<'a>,
}

impl<'a> BuiltinIo<'a> {
    /// Opens every file the command redirects to, like a forked child would,
    /// so that `true > file` still creates `file`.
    fn new(redirects: &'a Redirections) -> io::Result<Self> {
        let mut files = redirects.open_files()?;
        Ok(BuiltinIo {
            stdout: FdWriter::new(redirects, 1, files.remove(&1)),
            stderr: FdWriter::new(redirects, 2, files.remove(&2)),
        })
    }
}

/// Writer for one descriptor of a builtin, resolved through the redirection
/// table on first use.
pub(crate) struct FdWriter<'a> {
    redirects: &'a Redirections,
    fd: RawFd,
    file: Option<File>,
}

impl<'a> FdWriter<'a> {
    fn new(redirects: &'a Redirections, fd: RawFd, file: Option<File>) -> Self {
        FdWriter {
            redirects,
            fd,
            file,
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => self.redirects.resolve(self.fd)?,
        };
        Ok(self.file.insert(file))
    }
}

impl Write for FdWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, io: &mut BuiltinIo<'_>) -> Result<ExitCode> {
        let current = env::current_dir().context("can't determine working directory")?;
        writeln!(io.stdout, "{}", current.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _io: &mut BuiltinIo<'_>) -> Result<ExitCode> {
        let target = match self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match env::var_os("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("unknown HOME"),
            },
        };
        env::set_current_dir(&target)
            .with_context(|| format!("can't change working directory to {}", target.display()))?;
        debug!("working directory is now {}", target.display());
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Do nothing, successfully.
pub struct True {
    #[argh(positional, greedy)]
    /// ignored
    pub _args: Vec<String>,
}

impl BuiltinCommand for True {
    fn name() -> &'static str {
        "true"
    }

    fn execute(self, _io: &mut BuiltinIo<'_>) -> Result<ExitCode> {
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Do nothing, unsuccessfully.
pub struct False {
    #[argh(positional, greedy)]
    /// ignored
    pub _args: Vec<String>,
}

impl BuiltinCommand for False {
    fn name() -> &'static str {
        "false"
    }

    fn execute(self, _io: &mut BuiltinIo<'_>) -> Result<ExitCode> {
        Ok(1)
    }
}
