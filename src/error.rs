//! Error types shared across the front end and the execution engine.

use crate::grammar::NonterminalKind;
use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// What went wrong while scanning characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    /// A non-printable character outside quotes or an escape.
    UnexpectedChar(char),
    /// Input ended inside a double-quoted string.
    UnterminatedQuote,
    /// Input ended right after an escaping backslash.
    UnterminatedEscape,
}

/// A lexical error with the line it was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("line {line}: {}", describe_lex_error(.kind))]
pub struct LexError {
    pub line: usize,
    pub kind: LexErrorKind,
}

fn describe_lex_error(kind: &LexErrorKind) -> String {
    match kind {
        LexErrorKind::UnexpectedChar(c) => {
            format!("unexpected character {:#04x}", u32::from(*c))
        }
        LexErrorKind::UnterminatedQuote => "unterminated double quote".to_string(),
        LexErrorKind::UnterminatedEscape => "nothing left to escape".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: syntax error near unexpected token `{text}'")]
    UnexpectedToken { line: usize, text: String },
    #[error("line {line}: syntax error: unexpected end of input")]
    UnexpectedEnd { line: usize },
    #[error("line {line}: internal parser error")]
    Internal { line: usize },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { line, .. }
            | ParseError::UnexpectedEnd { line }
            | ParseError::Internal { line } => *line,
        }
    }
}

/// Rejected insertion into a command's redirection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RedirectError {
    #[error("incorrect file descriptor {0}")]
    IncorrectFd(i64),
    #[error("file descriptor {0} is already redirected")]
    FdTaken(i32),
}

/// Failure to build a [`Command`](crate::command::Command) or
/// [`Pipeline`](crate::pipeline::Pipeline) out of an AST node.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("expected a command node, found {0:?}")]
    NotACommand(Option<NonterminalKind>),
    #[error("expected a pipeline node, found {0:?}")]
    NotAPipeline(Option<NonterminalKind>),
    #[error(transparent)]
    Redirect(#[from] RedirectError),
}

/// Failure while running an AST node.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}: command not found")]
    NoSuchCommand(String),
    #[error("{0}: argument contains a NUL byte")]
    InvalidArgument(String),
    #[error("{context}: {source}")]
    System {
        context: String,
        #[source]
        source: Errno,
    },
    #[error("cannot execute a {0:?} node")]
    Unsupported(Option<NonterminalKind>),
    #[error(transparent)]
    Command(#[from] CommandError),
}

impl ExecError {
    pub(crate) fn system(context: impl Into<String>, source: Errno) -> Self {
        ExecError::System {
            context: context.into(),
            source,
        }
    }
}

/// Everything a session can report for one unit of input.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("{}: {source}", .path.display())]
    ScriptUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    /// Lexical and syntax errors, as opposed to failures while running.
    pub fn is_syntax(&self) -> bool {
        matches!(self, ShellError::Lex(_) | ShellError::Parse(_))
    }
}

/// Invalid command line or environment settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("-c and a script file cannot be used together")]
    ConflictingInput,
    #[error("{var}: unknown log level `{value}'")]
    InvalidLogLevel { var: &'static str, value: String },
}
