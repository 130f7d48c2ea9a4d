use crate::command::{CommandStatus, ExitCode};
use crate::error::ShellError;
use crate::executor;
use crate::lexer::{self, Pending};
use crate::shell_state::ShellState;
use log::{debug, info, warn};
use nix::sys::signal::{SigHandler, Signal, signal};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::Path;

const PROMPT: &str = "$ ";
const CONTINUATION_PROMPT: &str = "> ";

/// Signals an interactive shell must survive while it owns the terminal.
const IGNORED_SIGNALS: [Signal; 5] = [
    Signal::SIGTTOU,
    Signal::SIGTTIN,
    Signal::SIGTSTP,
    Signal::SIGQUIT,
    Signal::SIGINT,
];

/// Drives one shell session: source text in, execution out.
///
/// Example
/// ```no_run
/// use jcsh::{Interpreter, ShellState};
/// let mut sh = Interpreter::new(ShellState::new(false));
/// sh.run_source("true && echo ok").unwrap();
/// assert_eq!(sh.exit_code(), 0);
/// ```
pub struct Interpreter {
    state: ShellState,
    print_tree: bool,
}

impl Interpreter {
    pub fn new(state: ShellState) -> Self {
        Self {
            state,
            print_tree: false,
        }
    }

    /// Print the shaped tree of every input before running it.
    pub fn with_tree_printing(mut self, print_tree: bool) -> Self {
        self.print_tree = print_tree;
        self
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    /// Parses and runs `source`. Syntax errors leave the session untouched.
    pub fn run_source(&mut self, source: &str) -> Result<(), ShellError> {
        let tree = crate::parse(source)?;
        if self.print_tree {
            print!("{tree}");
        }
        executor::execute(&tree, &mut self.state)?;
        Ok(())
    }

    /// Reads the whole script at `path` and runs it.
    pub fn run_script(&mut self, path: &Path) -> Result<(), ShellError> {
        let source = std::fs::read_to_string(path).map_err(|source| ShellError::ScriptUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        info!("running script {}", path.display());
        self.run_source(&source)
    }

    /// Read-Eval-Print Loop on the controlling terminal.
    ///
    /// Ends on end of file or interrupt at the prompt.
    pub fn repl(&mut self) -> rustyline::Result<()> {
        for sig in IGNORED_SIGNALS {
            // SAFETY: SigIgn installs no handler code.
            if let Err(err) = unsafe { signal(sig, SigHandler::SigIgn) } {
                warn!("cannot ignore {sig}: {err}");
            }
        }
        let mut rl = DefaultEditor::new()?;

        loop {
            self.announce_finished_jobs();
            let source = match read_input(&mut rl) {
                Ok(source) => source,
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            };
            if source.trim().is_empty() {
                continue;
            }
            rl.add_history_entry(source.as_str())?;
            if let Err(err) = self.run_source(&source) {
                eprintln!("{}: {err}", crate::SHELL_NAME);
            }
        }
        Ok(())
    }

    /// Final non-blocking reap at the end of the session.
    pub fn finish(&mut self) {
        for job in self.state.reap_finished() {
            debug!("background job {} finished: {}", job.pid, job.status);
        }
        for job in self.state.jobs() {
            info!("background job {} still running, leaving it", job.pid());
        }
    }

    /// The process exit code mirroring the last status.
    pub fn exit_code(&self) -> ExitCode {
        match self.state.last_status() {
            CommandStatus::Exited(code) => code,
            CommandStatus::Signaled(signal) => 128 + signal,
            CommandStatus::Abnormal => 1,
        }
    }

    fn announce_finished_jobs(&mut self) {
        for job in self.state.reap_finished() {
            println!("[{}] done: {}", job.pid, job.status);
        }
    }
}

/// Reads one unit of input, asking for more lines while a double quote is open
/// or the line ends with an escaping backslash.
fn read_input(rl: &mut DefaultEditor) -> rustyline::Result<String> {
    let mut source = rl.readline(PROMPT)?;
    while lexer::is_incomplete(&source) {
        let more = rl.readline(CONTINUATION_PROMPT)?;
        join_continuation(&mut source, &more);
    }
    Ok(source)
}

fn join_continuation(source: &mut String, more: &str) {
    if lexer::pending(source) == Some(Pending::Escape) {
        source.pop();
    } else {
        source.push('\n');
    }
    source.push_str(more);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_mirrors_last_status() {
        let mut sh = Interpreter::new(ShellState::new(false));
        assert_eq!(sh.exit_code(), 0);
        sh.run_source("sh -c \"exit 7\"").unwrap();
        assert_eq!(sh.exit_code(), 7);
        sh.run_source("sh -c \"kill -TERM $$\"").unwrap();
        assert_eq!(sh.exit_code(), 128 + libc::SIGTERM);
    }

    #[test]
    fn syntax_errors_leave_state_untouched() {
        let mut sh = Interpreter::new(ShellState::new(false));
        sh.run_source("false").unwrap();
        let err = sh.run_source("a | | b").unwrap_err();
        assert!(err.is_syntax());
        assert!(err.to_string().starts_with("line 1: "), "{err}");
        assert_eq!(sh.state().last_status(), CommandStatus::Exited(1));

        let err = sh.run_source("echo \"open").unwrap_err();
        assert!(matches!(err, ShellError::Lex(_)));
    }

    #[test]
    fn unreadable_script() {
        let mut sh = Interpreter::new(ShellState::new(false));
        let err = sh.run_script(Path::new("/nonexistent/jcsh/script")).unwrap_err();
        assert!(matches!(err, ShellError::ScriptUnreadable { .. }));
        assert!(!err.is_syntax());
    }

    #[test]
    fn script_runs_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let script = dir.path().join("script");
        std::fs::write(
            &script,
            format!("# comment\necho one > {o}\n\necho two >> {o} # trailing\n", o = out.display()),
        )
        .unwrap();
        let mut sh = Interpreter::new(ShellState::new(false));
        sh.run_script(&script).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn continuation_joins() {
        let mut source = String::from("echo a\\");
        join_continuation(&mut source, "b");
        assert_eq!(source, "echo ab");

        let mut source = String::from("echo \"a");
        join_continuation(&mut source, "b\"");
        assert_eq!(source, "echo \"a\nb\"");
    }
}
