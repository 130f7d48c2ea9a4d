//! Command-line arguments and environment settings of the `jcsh` binary.

use crate::error::ConfigError;
use argh::FromArgs;
use log::LevelFilter;
use std::path::PathBuf;

/// Environment variable with the log level, used when `--log-level` is absent.
pub const LOG_LEVEL_VAR: &str = "JCSH_LOG";
/// Environment variable with the log file, used when `--log-file` is absent.
pub const LOG_FILE_VAR: &str = "JCSH_LOG_FILE";

#[derive(FromArgs, Debug, Default, PartialEq)]
/// A small job-control shell.
pub struct Args {
    #[argh(option, short = 'c')]
    /// run the given command line and exit
    pub command: Option<String>,

    #[argh(switch)]
    /// print the syntax tree of every input before running it
    pub print_tree: bool,

    #[argh(option)]
    /// log level: off, error, warn, info, debug or trace
    pub log_level: Option<LevelFilter>,

    #[argh(option)]
    /// append logs to this file instead of standard error
    pub log_file: Option<PathBuf>,

    #[argh(positional)]
    /// script file to run
    pub script: Option<PathBuf>,
}

/// Where the session reads its input from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    /// `-c COMMAND`
    Command(String),
    /// A script file.
    Script(PathBuf),
    /// Line editor on a terminal.
    Interactive,
    /// Everything on standard input, read at once.
    Stdin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub input: InputMode,
    pub print_tree: bool,
    pub log_level: LevelFilter,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Builds the configuration from the process environment.
    pub fn from_env(args: Args) -> Result<Self, ConfigError> {
        use std::io::IsTerminal;
        Self::resolve(
            args,
            |name| std::env::var_os(name).map(|v| v.to_string_lossy().into_owned()),
            std::io::stdin().is_terminal(),
        )
    }

    /// Command-line values win over the environment. Without `-c` or a script
    /// the session is interactive when stdin is a terminal.
    pub fn resolve(
        args: Args,
        env: impl Fn(&str) -> Option<String>,
        stdin_is_terminal: bool,
    ) -> Result<Self, ConfigError> {
        let input = match (args.command, args.script) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingInput),
            (Some(command), None) => InputMode::Command(command),
            (None, Some(script)) => InputMode::Script(script),
            (None, None) if stdin_is_terminal => InputMode::Interactive,
            (None, None) => InputMode::Stdin,
        };
        let log_level = match args.log_level {
            Some(level) => level,
            None => match env(LOG_LEVEL_VAR).filter(|v| !v.is_empty()) {
                Some(value) => value.parse().map_err(|_| ConfigError::InvalidLogLevel {
                    var: LOG_LEVEL_VAR,
                    value,
                })?,
                None => LevelFilter::Off,
            },
        };
        let log_file = args
            .log_file
            .or_else(|| env(LOG_FILE_VAR).filter(|v| !v.is_empty()).map(PathBuf::from));
        Ok(Config {
            input,
            print_tree: args.print_tree,
            log_level,
            log_file,
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.input == InputMode::Interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["jcsh"], args).expect("valid arguments")
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn command_flag_selects_command_mode() {
        let config = Config::resolve(parse(&["-c", "ls | wc"]), no_env, true).unwrap();
        assert_eq!(config.input, InputMode::Command("ls | wc".into()));
        assert!(!config.is_interactive());
        assert_eq!(config.log_level, LevelFilter::Off);
    }

    #[test]
    fn terminal_decides_between_interactive_and_stdin() {
        let config = Config::resolve(parse(&[]), no_env, true).unwrap();
        assert!(config.is_interactive());
        let config = Config::resolve(parse(&[]), no_env, false).unwrap();
        assert_eq!(config.input, InputMode::Stdin);
    }

    #[test]
    fn script_and_tree_printing() {
        let config = Config::resolve(parse(&["--print-tree", "run.sh"]), no_env, true).unwrap();
        assert_eq!(config.input, InputMode::Script("run.sh".into()));
        assert!(config.print_tree);
    }

    #[test]
    fn command_and_script_conflict() {
        let err = Config::resolve(parse(&["-c", "ls", "run.sh"]), no_env, true).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingInput));
    }

    #[test]
    fn environment_fills_in_logging() {
        let env = |name: &str| match name {
            LOG_LEVEL_VAR => Some("debug".to_string()),
            LOG_FILE_VAR => Some("/tmp/jcsh.log".to_string()),
            _ => None,
        };
        let config = Config::resolve(parse(&[]), env, false).unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/jcsh.log")));

        let config = Config::resolve(parse(&["--log-level", "warn"]), env, false).unwrap();
        assert_eq!(config.log_level, LevelFilter::Warn);
    }

    #[test]
    fn bad_level_in_environment_is_an_error() {
        let env = |name: &str| (name == LOG_LEVEL_VAR).then(|| "loud".to_string());
        let err = Config::resolve(parse(&[]), env, false).unwrap_err();
        assert_eq!(err.to_string(), "JCSH_LOG: unknown log level `loud'");
    }

    #[test]
    fn bad_level_on_command_line_is_a_usage_error() {
        assert!(Args::from_args(&["jcsh"], &["--log-level", "loud"]).is_err());
    }
}
