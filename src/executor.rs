//! Walks a shaped tree and runs it.
//!
//! The result of [`execute`] only says whether the tree could be executed at
//! all. How the commands ended is recorded in [`ShellState::last_status`].

use crate::command::{Command, CommandStatus, CommandTraits};
use crate::error::{CommandError, ExecError};
use crate::grammar::NonterminalKind;
use crate::parser::Symbol;
use crate::pipeline::Pipeline;
use crate::shell_state::ShellState;
use crate::terminal::TerminalHandoff;
use crate::token::TokenKind;
use log::debug;

pub fn execute(node: &Symbol, state: &mut ShellState) -> Result<(), ExecError> {
    match node.kind() {
        Some(NonterminalKind::Script) => {
            for line in node.children() {
                execute(line, state)?;
            }
            Ok(())
        }
        Some(NonterminalKind::Line) => execute_line(node, state),
        Some(NonterminalKind::AndOr) => execute_and_or(node, state),
        Some(NonterminalKind::Pipeline) => {
            let result = Pipeline::from_node(node, true, state.is_interactive())
                .map_err(ExecError::from)
                .and_then(|mut pipeline| {
                    pipeline.execute(state.is_interactive())?;
                    Ok(pipeline.status().unwrap_or(CommandStatus::Abnormal))
                });
            settle(state, result);
            Ok(())
        }
        Some(NonterminalKind::Command) => {
            let result = run_command(node, state.is_interactive());
            if let Ok(status) = result {
                report_signal(node, status);
            }
            settle(state, result);
            Ok(())
        }
        kind => Err(ExecError::Unsupported(kind)),
    }
}

/// Segments separated by `;` or `&`. A segment followed by `&` runs in the
/// background.
fn execute_line(node: &Symbol, state: &mut ShellState) -> Result<(), ExecError> {
    let children = node.children();
    for (index, child) in children.iter().enumerate() {
        if child.as_token().is_some() {
            continue;
        }
        let background = children.get(index + 1).and_then(Symbol::token_kind) == Some(TokenKind::Amp);
        if background {
            match state.spawn_background(child) {
                Ok(pid) => {
                    if state.is_interactive() {
                        println!("[{pid}]");
                    }
                }
                Err(err) => settle(state, Err(err)),
            }
        } else {
            execute(child, state)?;
        }
    }
    Ok(())
}

/// `a && b || c`: members alternate with their operators.
fn execute_and_or(node: &Symbol, state: &mut ShellState) -> Result<(), ExecError> {
    let mut children = node.children().iter();
    let Some(first) = children.next() else {
        return Ok(());
    };
    execute(first, state)?;
    while let (Some(op), Some(next)) = (children.next(), children.next()) {
        let Some(code) = state.last_status().code() else {
            debug!("chain stopped: {}", state.last_status());
            break;
        };
        let proceed = match op.token_kind() {
            Some(TokenKind::And) => code == 0,
            Some(TokenKind::Or) => code != 0,
            _ => return Err(ExecError::Unsupported(node.kind())),
        };
        if !proceed {
            break;
        }
        execute(next, state)?;
    }
    Ok(())
}

fn run_command(node: &Symbol, interactive: bool) -> Result<CommandStatus, ExecError> {
    let traits = CommandTraits {
        suspend_before_exec: interactive,
        own_process_group: interactive,
        blocks: !interactive,
        wait_for_group_change: interactive,
    };
    let mut command = Command::from_node(node, traits)?;
    command.execute()?;
    if interactive && !command.is_builtin() {
        command.wait_for_group_change()?;
        if let Some(pid) = command.pid() {
            let handoff = TerminalHandoff::to(pid)
                .map_err(|err| ExecError::system(format!("{}: can't hand over the terminal", command.name()), err))?;
            command.release()?;
            let status = command.wait()?;
            handoff
                .restore()
                .map_err(|err| ExecError::system("can't take the terminal back", err))?;
            return Ok(status);
        }
    }
    command.release()?;
    command.wait()
}

/// Records the outcome of one command or pipeline. Failures to run it are
/// reported and become its status; they do not stop the session.
fn settle(state: &mut ShellState, result: Result<CommandStatus, ExecError>) {
    let status = match result {
        Ok(status) => status,
        Err(ExecError::NoSuchCommand(name)) => {
            eprintln!("{}: {name}: command not found", crate::SHELL_NAME);
            CommandStatus::Exited(crate::command::NOT_FOUND)
        }
        Err(ExecError::Command(err @ CommandError::Redirect(_))) => {
            eprintln!("{}: {err}", crate::SHELL_NAME);
            CommandStatus::Exited(1)
        }
        Err(err @ ExecError::InvalidArgument(_)) => {
            eprintln!("{}: {err}", crate::SHELL_NAME);
            CommandStatus::Exited(1)
        }
        Err(err) => {
            eprintln!("{}: {err}", crate::SHELL_NAME);
            CommandStatus::Abnormal
        }
    };
    debug!("last status: {status}");
    state.set_last_status(status);
}

fn report_signal(node: &Symbol, status: CommandStatus) {
    if let Some(signal) = status.signal_name() {
        let name = node.children().first().and_then(Symbol::as_token).map_or("", |t| t.text.as_str());
        eprintln!("{name}: caught signal {signal}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn run(source: &str) -> ShellState {
        let mut state = ShellState::new(false);
        execute(&crate::parse(source).unwrap(), &mut state).unwrap();
        state
    }

    #[test]
    fn sequence_runs_everything_and_keeps_the_last_status() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let state = run(&format!("false; touch {}; sh -c \"exit 6\"", marker.display()));
        assert!(marker.exists());
        assert_eq!(state.last_status(), CommandStatus::Exited(6));
    }

    #[test]
    fn and_or_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let state = run(&format!("false && touch {}; true || touch {}", a.display(), b.display()));
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(state.last_status(), CommandStatus::Exited(0));

        let state = run(&format!("false || touch {} && touch {}", a.display(), b.display()));
        assert!(a.exists());
        assert!(b.exists());
        assert!(state.last_status().success());
    }

    #[test]
    fn and_or_stops_at_the_first_short_circuit() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let state = run(&format!("false && true || touch {}", marker.display()));
        assert!(!marker.exists());
        assert_eq!(state.last_status(), CommandStatus::Exited(1));
    }

    #[test]
    fn signal_stops_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let state = run(&format!("sh -c \"kill -KILL $$\" || touch {}", marker.display()));
        assert_eq!(state.last_status(), CommandStatus::Signaled(libc::SIGKILL));
        assert!(!marker.exists());
    }

    #[test]
    fn redirected_output_can_be_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        let out = dir.path().join("out");
        let state = run(&format!(
            "echo hi > {f} && cat < {f} > {o}",
            f = file.display(),
            o = out.display()
        ));
        assert!(state.last_status().success());
        assert_eq!(fs::read_to_string(&file).unwrap(), "hi\n");
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");
    }

    #[test]
    fn append_keeps_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        run(&format!("echo one > {f}; echo two >> {f}", f = file.display()));
        assert_eq!(fs::read_to_string(&file).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn pipeline_status_is_recorded() {
        let state = run("true | sh -c \"exit 2\"");
        assert_eq!(state.last_status(), CommandStatus::Exited(2));
    }

    #[test]
    fn unknown_command_sets_127_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let state = run(&format!("jcsh-no-such-program; touch {}", marker.display()));
        assert!(marker.exists());
        assert!(state.last_status().success());

        let state = run("jcsh-no-such-program");
        assert_eq!(state.last_status(), CommandStatus::Exited(127));
    }

    #[test]
    fn duplicate_redirection_is_reported_not_fatal() {
        let state = run("true > a 1> b");
        assert_eq!(state.last_status(), CommandStatus::Exited(1));
    }

    #[test]
    fn background_segment_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let mut state = ShellState::new(false);
        let source = format!("sleep 0.3 && touch {} & true", marker.display());
        execute(&crate::parse(&source).unwrap(), &mut state).unwrap();
        assert_eq!(state.jobs().len(), 1);
        assert!(!marker.exists());

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let mut reaped = Vec::new();
        while reaped.is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
            reaped = state.reap_finished();
        }
        assert_eq!(reaped.len(), 1);
        assert_eq!(reaped[0].status, CommandStatus::Exited(0));
        assert!(marker.exists());
    }

    #[test]
    fn non_executable_nodes_are_unsupported() {
        let node = crate::parse("ls > out").unwrap();
        let redirection = node.children()[1].clone();
        let mut state = ShellState::new(false);
        assert!(matches!(
            execute(&redirection, &mut state),
            Err(ExecError::Unsupported(Some(NonterminalKind::Redirection)))
        ));
    }
}
