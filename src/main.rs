use anyhow::Context;
use argh::{EarlyExit, FromArgs};
use jcsh::config::{Args, Config, InputMode};
use jcsh::error::ShellError;
use jcsh::{Interpreter, ShellState, logging};
use log::error;
use std::io::Read;
use std::process::ExitCode;

/// Exit code for lexical and syntax errors outside the interactive loop.
const SYNTAX_ERROR: u8 = 2;
/// Exit code when the script file cannot be read.
const SCRIPT_UNREADABLE: u8 = 126;
/// Exit code for invalid command-line usage.
const USAGE: u8 = 64;

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
    let (command, rest) = argv.split_first().map_or((jcsh::SHELL_NAME, &[][..]), |(c, r)| (*c, r));
    let args = match Args::from_args(&[command], rest) {
        Ok(args) => args,
        Err(EarlyExit { output, status }) => {
            return match status {
                Ok(()) => {
                    print!("{output}");
                    ExitCode::SUCCESS
                }
                Err(()) => {
                    eprint!("{output}");
                    ExitCode::from(USAGE)
                }
            };
        }
    };
    let config = match Config::from_env(args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}: {err}", jcsh::SHELL_NAME);
            return ExitCode::from(USAGE);
        }
    };
    if let Err(err) = logging::init(config.log_level, config.log_file.as_deref()) {
        eprintln!("{}: cannot set up logging: {err}", jcsh::SHELL_NAME);
    }

    match run(&config) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("{}: {err:#}", jcsh::SHELL_NAME);
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> anyhow::Result<u8> {
    let mut sh = Interpreter::new(ShellState::new(config.is_interactive())).with_tree_printing(config.print_tree);
    let outcome = match &config.input {
        InputMode::Interactive => {
            sh.repl().context("line editor failed")?;
            Ok(())
        }
        InputMode::Command(source) => sh.run_source(source),
        InputMode::Script(path) => sh.run_script(path),
        InputMode::Stdin => {
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("cannot read standard input")?;
            sh.run_source(&source)
        }
    };
    sh.finish();

    match outcome {
        Ok(()) => Ok(status_byte(sh.exit_code())),
        Err(err) => {
            eprintln!("{}: {err}", jcsh::SHELL_NAME);
            Ok(match err {
                ShellError::Lex(_) | ShellError::Parse(_) => SYNTAX_ERROR,
                ShellError::ScriptUnreadable { .. } => SCRIPT_UNREADABLE,
                _ => 1,
            })
        }
    }
}

/// Process exit statuses are one byte wide.
fn status_byte(code: i32) -> u8 {
    (code & 0xff) as u8
}
