//! Character-level lexical analysis.
//!
//! [`Lexer`] is a finite state machine fed one character at a time. Every call to
//! [`Lexer::next`] yields zero or one token, which makes it usable both over a whole
//! script and over text arriving incrementally from a line editor.

use crate::error::{LexError, LexErrorKind};
use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Waiting,
    ReadingWord,
    /// An operator (or a line break) is buffered and flushed by the next
    /// character that cannot extend it.
    ReadingOperator(TokenKind),
    Escaped,
    Quoted,
    QuotedEscape,
    Comment,
    Finished,
}

/// Incremental tokenizer.
///
/// Feed characters with [`Lexer::next`] and signal the end of input by passing
/// `None`. Once an error is returned the lexer keeps returning it.
#[derive(Debug)]
pub struct Lexer {
    state: LexingState,
    buffer: String,
    /// The word read so far consists of unquoted digits only and may turn out
    /// to be the fd prefix of a redirection.
    plain_digits: bool,
    line: usize,
    token_line: usize,
    last_kind: Option<TokenKind>,
    failure: Option<LexError>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    pub fn new() -> Self {
        Lexer {
            state: LexingState::Waiting,
            buffer: String::new(),
            plain_digits: false,
            line: 1,
            token_line: 1,
            last_kind: None,
            failure: None,
        }
    }

    /// Current line number, starting from 1.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Advances the machine by one character.
    ///
    /// # Arguments
    /// * `input` - The next character, or `None` once the input is exhausted.
    ///
    /// # Returns
    /// The token completed by this character, if any, or the lexical error it caused.
    pub fn next(&mut self, input: Option<char>) -> Result<Option<Token>, LexError> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        let result = match input {
            Some(c) => {
                let result = self.consume(c);
                if c == '\n' {
                    self.line += 1;
                }
                result
            }
            None => self.finish(),
        };
        if let Err(err) = result {
            self.failure = Some(err);
            self.state = LexingState::Finished;
        }
        result
    }

    /// Whether the text fed so far stops inside quotes or right after a
    /// backslash, so that more input is required to complete it.
    pub fn awaits_more(&self) -> bool {
        self.failure.is_none()
            && matches!(
                self.state,
                LexingState::Escaped | LexingState::Quoted | LexingState::QuotedEscape
            )
    }

    fn consume(&mut self, c: char) -> Result<Option<Token>, LexError> {
        match self.state {
            LexingState::Waiting => {
                self.start_token(c)?;
                Ok(None)
            }
            LexingState::ReadingWord => self.handle_word(c),
            LexingState::ReadingOperator(kind) => self.handle_operator(kind, c),
            LexingState::Escaped => {
                self.buffer.push(c);
                self.state = LexingState::ReadingWord;
                Ok(None)
            }
            LexingState::Quoted => {
                match c {
                    '"' => self.state = LexingState::ReadingWord,
                    '\\' => self.state = LexingState::QuotedEscape,
                    c => self.buffer.push(c),
                }
                Ok(None)
            }
            LexingState::QuotedEscape => {
                if c != '"' {
                    self.buffer.push('\\');
                }
                self.buffer.push(c);
                self.state = LexingState::Quoted;
                Ok(None)
            }
            LexingState::Comment => {
                if c == '\n' {
                    self.hold_operator(TokenKind::Newline, c);
                }
                Ok(None)
            }
            LexingState::Finished => Ok(None),
        }
    }

    /// Handles a character seen while no token is in progress. Never completes a token.
    fn start_token(&mut self, c: char) -> Result<(), LexError> {
        match c {
            c if is_blank(c) => {}
            '\n' => self.hold_operator(TokenKind::Newline, c),
            '#' => self.state = LexingState::Comment,
            '\\' => {
                self.begin_word();
                self.plain_digits = false;
                self.state = LexingState::Escaped;
            }
            '"' => {
                self.begin_word();
                self.plain_digits = false;
                self.state = LexingState::Quoted;
            }
            c => {
                if let Some(kind) = TokenKind::from_delimiter(c) {
                    self.hold_operator(kind, c);
                } else {
                    self.check_printable(c)?;
                    self.begin_word();
                    self.plain_digits = c.is_ascii_digit();
                    self.buffer.push(c);
                    self.state = LexingState::ReadingWord;
                }
            }
        }
        Ok(())
    }

    fn handle_word(&mut self, c: char) -> Result<Option<Token>, LexError> {
        match c {
            c if is_blank(c) => {
                let token = self.emit(TokenKind::Word);
                self.state = LexingState::Waiting;
                Ok(token)
            }
            '\n' => {
                let token = self.emit(TokenKind::Word);
                self.hold_operator(TokenKind::Newline, c);
                Ok(token)
            }
            '\\' => {
                self.plain_digits = false;
                self.state = LexingState::Escaped;
                Ok(None)
            }
            '"' => {
                self.plain_digits = false;
                self.state = LexingState::Quoted;
                Ok(None)
            }
            '<' | '>' if self.plain_digits => {
                // `2>` and friends: the digits become part of the operator.
                let kind = if c == '<' {
                    TokenKind::FdIn
                } else {
                    TokenKind::FdOut
                };
                self.buffer.push(c);
                self.state = LexingState::ReadingOperator(kind);
                Ok(None)
            }
            c => {
                if let Some(kind) = TokenKind::from_delimiter(c) {
                    let token = self.emit(TokenKind::Word);
                    self.hold_operator(kind, c);
                    return Ok(token);
                }
                self.check_printable(c)?;
                if !c.is_ascii_digit() {
                    self.plain_digits = false;
                }
                self.buffer.push(c);
                Ok(None)
            }
        }
    }

    fn handle_operator(&mut self, kind: TokenKind, c: char) -> Result<Option<Token>, LexError> {
        if let Some(doubled) = kind.doubled() {
            if self.buffer.ends_with(c) {
                self.buffer.push(c);
                self.state = LexingState::ReadingOperator(doubled);
                return Ok(None);
            }
        }
        if kind == TokenKind::Newline {
            // Keep folding blank lines and comments into the pending separator.
            match c {
                c if is_blank(c) || c == '\n' => return Ok(None),
                '#' => {
                    self.state = LexingState::Comment;
                    return Ok(None);
                }
                _ => {}
            }
        }
        let token = self.emit(kind);
        self.state = LexingState::Waiting;
        self.start_token(c)?;
        Ok(token)
    }

    fn finish(&mut self) -> Result<Option<Token>, LexError> {
        let token = match self.state {
            LexingState::Waiting | LexingState::Comment | LexingState::Finished => None,
            LexingState::ReadingWord => self.emit(TokenKind::Word),
            LexingState::ReadingOperator(TokenKind::Newline) => None,
            LexingState::ReadingOperator(kind) => self.emit(kind),
            LexingState::Escaped => return Err(self.error(LexErrorKind::UnterminatedEscape)),
            LexingState::Quoted | LexingState::QuotedEscape => {
                return Err(self.error(LexErrorKind::UnterminatedQuote));
            }
        };
        self.state = LexingState::Finished;
        Ok(token)
    }

    fn begin_word(&mut self) {
        self.buffer.clear();
        self.token_line = self.line;
    }

    fn hold_operator(&mut self, kind: TokenKind, c: char) {
        self.buffer.clear();
        self.buffer.push(c);
        self.token_line = self.line;
        self.state = LexingState::ReadingOperator(kind);
    }

    fn emit(&mut self, kind: TokenKind) -> Option<Token> {
        let text = std::mem::take(&mut self.buffer);
        if kind == TokenKind::Newline && self.last_kind.is_none_or(TokenKind::absorbs_newline) {
            return None;
        }
        self.last_kind = Some(kind);
        Some(Token::new(kind, self.token_line, text))
    }

    fn check_printable(&self, c: char) -> Result<(), LexError> {
        if c.is_control() {
            Err(self.error(LexErrorKind::UnexpectedChar(c)))
        } else {
            Ok(())
        }
    }

    fn error(&self, kind: LexErrorKind) -> LexError {
        LexError {
            line: self.line,
            kind,
        }
    }
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0b' | '\r')
}

/// Splits a whole piece of source text into tokens.
///
/// # Arguments
/// * `source` - Shell text, possibly spanning several lines.
///
/// # Returns
/// The tokens in source order (without the end-of-stream marker), or the first
/// lexical error.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new();
    let mut tokens = Vec::new();
    for c in source.chars() {
        if let Some(token) = lexer.next(Some(c))? {
            tokens.push(token);
        }
    }
    if let Some(token) = lexer.next(None)? {
        tokens.push(token);
    }
    Ok(tokens)
}

/// Why a piece of text cannot be tokenized yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// A double-quoted string is still open.
    Quote,
    /// The text ends with an escaping backslash outside quotes.
    Escape,
}

/// Whether `source` ends inside a double-quoted string or right after an
/// escaping backslash. Text with a lexical error is never pending.
pub fn pending(source: &str) -> Option<Pending> {
    let mut lexer = Lexer::new();
    for c in source.chars() {
        if lexer.next(Some(c)).is_err() {
            return None;
        }
    }
    match lexer.state {
        _ if !lexer.awaits_more() => None,
        LexingState::Escaped => Some(Pending::Escape),
        _ => Some(Pending::Quote),
    }
}

pub fn is_incomplete(source: &str) -> bool {
    pending(source).is_some()
}
