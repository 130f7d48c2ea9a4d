//! A small job-control shell.
//!
//! Source text goes through a character-level [`lexer`], a table-driven SLR(1)
//! [`parser`] and the [`ast`] shaping pass. The resulting tree is run by the
//! [`executor`], which turns commands and pipelines into processes placed in
//! their own process groups, with the controlling terminal handed to the
//! foreground job. Every child is held between `fork` and `exec` until the
//! shell has finished setting up its group and terminal.
//!
//! The main entry point is [`Interpreter`], which drives one session over a
//! [`ShellState`]:
//!
//! ```no_run
//! use jcsh::{Interpreter, ShellState};
//! let mut sh = Interpreter::new(ShellState::new(false));
//! sh.run_source("ls | wc -l").unwrap();
//! sh.finish();
//! std::process::exit(sh.exit_code());
//! ```

pub mod ast;
pub mod builtin;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod external;
mod fd;
pub mod grammar;
mod interpreter;
pub mod lexer;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod redirect;
pub mod shell_state;
pub mod terminal;
pub mod token;

use crate::error::ShellError;
use crate::parser::Symbol;

/// Name used as the prefix of every diagnostic the shell prints.
pub const SHELL_NAME: &str = "jcsh";

/// Just a convenient re-export of the session driver.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::Interpreter;
pub use shell_state::ShellState;

/// Tokenizes, parses and shapes `source` into an executable tree.
pub fn parse(source: &str) -> Result<Symbol, ShellError> {
    let tokens = lexer::tokenize(source)?;
    let tree = parser::parse_tokens(tokens)?;
    Ok(ast::shape(tree))
}
