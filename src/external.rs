use crate::command::{Command, CommandTraits};
use crate::error::ExecError;
use crate::fd::Rendezvous;
use crate::redirect::{self, FdStep};
use log::debug;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::unistd::{ForkResult, Pid, execv, fork, setpgid};
use std::borrow::Cow;
use std::ffi::{CString, OsStr, OsString};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Search path used when `PATH` is not set.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Exit code of a child whose `exec` failed.
const EXEC_FAILED: i32 = 126;

/// Signals the interactive shell ignores and its children must not.
const JOB_CONTROL_SIGNALS: [Signal; 7] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGCHLD,
    Signal::SIGPIPE,
];

/// Resolves `name` against `PATH`.
pub fn resolve(name: &str) -> Option<PathBuf> {
    let search_paths = std::env::var_os("PATH").unwrap_or_else(|| OsString::from(DEFAULT_PATH));
    find_command_path(&search_paths, Path::new(name)).map(Cow::into_owned)
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it is an executable file.
/// - Relative with multiple components (e.g., `bin/sh`) or `./`-prefixed: returns it
///   if it is an executable file.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first executable match.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() || path.starts_with("./") {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, None) => None,
        (Some(single), None) => find_in_path(search_paths, single.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| find_by_path(candidate).is_some())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    let metadata = path.metadata().ok()?;
    if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
        Some(path)
    } else {
        None
    }
}

/// Everything the child needs, prepared before forking.
struct ExecPlan<'a> {
    path: CString,
    argv: Vec<CString>,
    steps: Vec<FdStep>,
    traits: CommandTraits,
    release: Option<&'a Rendezvous>,
    group_change: Option<&'a Rendezvous>,
}

impl<'a> ExecPlan<'a> {
    fn prepare(command: &'a Command, path: &Path) -> Result<Self, ExecError> {
        let path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| ExecError::InvalidArgument(path.display().to_string()))?;
        let argv = command
            .argv()
            .iter()
            .map(|arg| CString::new(arg.as_str()).map_err(|_| ExecError::InvalidArgument(arg.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecPlan {
            path,
            argv,
            steps: command.redirects().plan()?,
            traits: command.traits(),
            release: command.release_channel(),
            group_change: command.group_change_channel(),
        })
    }

    /// Runs in the forked child.
    fn run_child(&self) -> ! {
        if self.traits.own_process_group {
            if let Err(err) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
                child_exit(b"setpgid", err.desc(), 1);
            }
            if let Some(channel) = self.group_change {
                channel.child_notify();
            }
        }
        if let Some(channel) = self.release {
            if !channel.child_wait() {
                // The shell gave up on this command.
                unsafe { libc::_exit(1) }
            }
        }
        for sig in JOB_CONTROL_SIGNALS {
            let _ = unsafe { signal(sig, SigHandler::SigDfl) };
        }
        if let Err((step, err)) = redirect::apply(&self.steps) {
            child_exit(step.subject(), err.desc(), 1);
        }
        let err = match execv(&self.path, &self.argv) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        child_exit(self.path.as_bytes(), err.desc(), EXEC_FAILED)
    }
}

/// Writes `jcsh: <subject>: <detail>` to stderr and terminates the child
/// without unwinding.
fn child_exit(subject: &[u8], detail: &str, code: i32) -> ! {
    let parts: [&[u8]; 6] = [crate::SHELL_NAME.as_bytes(), b": ", subject, b": ", detail.as_bytes(), b"\n"];
    for part in parts {
        unsafe { libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len()) };
    }
    unsafe { libc::_exit(code) }
}

/// Forks the process for `command`.
///
/// The child optionally creates its own process group, optionally blocks until
/// released, restores default signal handling, applies the redirections and
/// replaces itself with the resolved program.
pub(crate) fn spawn(command: &Command) -> Result<Pid, ExecError> {
    let path = resolve(command.name()).ok_or_else(|| ExecError::NoSuchCommand(command.name().to_string()))?;
    let plan = ExecPlan::prepare(command, &path)?;
    let _ = io::stdout().flush();

    // SAFETY: the child only performs async-signal-safe calls on data prepared above.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!("spawned {} as pid {child} ({:?})", path.display(), command.traits());
            Ok(child)
        }
        Ok(ForkResult::Child) => plan.run_child(),
        Err(err) => Err(ExecError::system(format!("{}: fork", command.name()), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::lock_current_dir;
    use std::fs;
    use std::fs::File;

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn make_executable(path: &Path) {
        File::create(path).expect("create file");
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    #[test]
    fn absolute_existing_sh() {
        let path = Path::new("/bin/sh");
        let found = find_command_path(osstr("/bin"), path).expect("Expected to find /bin/sh via absolute path");
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let res = find_command_path(osstr("/bin"), Path::new("/bin/nonexisting"));
        assert!(res.is_none(), "Expected not to find /bin/nonexisting via absolute path");
    }

    #[test]
    fn single_component_found_in_path() {
        let found = find_command_path(osstr("/nowhere:/bin"), Path::new("sh"))
            .expect("Expected to find 'sh' in /bin via PATH search");
        assert_eq!(found.as_ref(), Path::new("/bin/sh"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("nonexisting"));
        assert!(res.is_none(), "Expected not to find 'nonexisting' in PATH");
    }

    #[test]
    fn non_executable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("tool")).unwrap();
        let res = find_command_path(dir.path().as_os_str(), Path::new("tool"));
        assert!(res.is_none());

        make_executable(&dir.path().join("tool"));
        let res = find_command_path(dir.path().as_os_str(), Path::new("tool"));
        assert_eq!(res.unwrap().as_ref(), dir.path().join("tool"));
    }

    #[test]
    fn directories_are_not_commands() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        assert!(find_command_path(dir.path().as_os_str(), Path::new("sub")).is_none());
    }

    #[test]
    fn multiple_components_relative_existing() {
        let _lock = lock_current_dir();
        let cwd_before = std::env::current_dir().expect("cwd");
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("bin")).expect("create temp bin dir");
        make_executable(&tmp.path().join("bin").join("tool"));

        std::env::set_current_dir(tmp.path()).expect("set cwd");
        let res = find_command_path(osstr("/does/not/matter"), Path::new("bin/tool"));
        let dotted = find_command_path(osstr("/bin"), Path::new("./bin/tool"));
        std::env::set_current_dir(&cwd_before).ok();

        let found = res.expect("Expected to find relative 'bin/tool' in current dir");
        assert_eq!(found.as_ref(), Path::new("bin/tool"));
        assert_eq!(dotted.expect("Expected to find './bin/tool'").as_ref(), Path::new("./bin/tool"));
    }

    #[test]
    fn empty_path_is_none() {
        let res = find_command_path(osstr("/bin"), Path::new(""));
        assert!(res.is_none(), "Empty path should not resolve to anything");
    }
}
