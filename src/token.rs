//! Token value objects produced by the [`lexer`](crate::lexer).

use std::fmt;

/// Kind of a lexical token.
///
/// The order of the variants is the column order of the parser's action table,
/// see [`TokenKind::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    /// A word, already stripped of quotes and escapes.
    Word,
    /// `&`
    Amp,
    /// `&&`
    And,
    /// `|`
    Pipe,
    /// `||`
    Or,
    /// `;`
    Semi,
    /// `<`
    RedirIn,
    /// `>`
    RedirOut,
    /// `>>`
    RedirAppend,
    /// `N<`
    FdIn,
    /// `N>`
    FdOut,
    /// `N>>`
    FdAppend,
    /// `(`, reserved.
    OpenParen,
    /// `)`, reserved.
    CloseParen,
    /// `{`, reserved.
    OpenBrace,
    /// `}`, reserved.
    CloseBrace,
    /// An unescaped, unquoted line break acting as a statement separator.
    Newline,
    /// Pseudo token fed to the parser once input is exhausted.
    EndOfStream,
}

impl TokenKind {
    pub const COUNT: usize = TokenKind::EndOfStream as usize + 1;

    pub const ALL: [TokenKind; TokenKind::COUNT] = [
        TokenKind::Word,
        TokenKind::Amp,
        TokenKind::And,
        TokenKind::Pipe,
        TokenKind::Or,
        TokenKind::Semi,
        TokenKind::RedirIn,
        TokenKind::RedirOut,
        TokenKind::RedirAppend,
        TokenKind::FdIn,
        TokenKind::FdOut,
        TokenKind::FdAppend,
        TokenKind::OpenParen,
        TokenKind::CloseParen,
        TokenKind::OpenBrace,
        TokenKind::CloseBrace,
        TokenKind::Newline,
        TokenKind::EndOfStream,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Operator spelled by a single delimiter character, if any.
    pub(crate) fn from_delimiter(c: char) -> Option<Self> {
        Some(match c {
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            ';' => TokenKind::Semi,
            '<' => TokenKind::RedirIn,
            '>' => TokenKind::RedirOut,
            '(' => TokenKind::OpenParen,
            ')' => TokenKind::CloseParen,
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            _ => return None,
        })
    }

    /// The doubled form of a one-character operator (`&` -> `&&`).
    pub(crate) fn doubled(self) -> Option<Self> {
        match self {
            TokenKind::Amp => Some(TokenKind::And),
            TokenKind::Pipe => Some(TokenKind::Or),
            TokenKind::RedirOut => Some(TokenKind::RedirAppend),
            TokenKind::FdOut => Some(TokenKind::FdAppend),
            _ => None,
        }
    }

    /// Whether a line break right after this token is redundant.
    pub(crate) fn absorbs_newline(self) -> bool {
        matches!(
            self,
            TokenKind::Newline
                | TokenKind::Semi
                | TokenKind::Amp
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Pipe
        )
    }

    pub fn is_redirection(self) -> bool {
        matches!(
            self,
            TokenKind::RedirIn
                | TokenKind::RedirOut
                | TokenKind::RedirAppend
                | TokenKind::FdIn
                | TokenKind::FdOut
                | TokenKind::FdAppend
        )
    }
}

/// A token with the line it started on and its literal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize, text: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            text: text.into(),
        }
    }

    pub(crate) fn end_of_stream(line: usize) -> Self {
        Self::new(TokenKind::EndOfStream, line, "")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Newline => f.write_str("newline"),
            TokenKind::EndOfStream => f.write_str("end of input"),
            _ => f.write_str(&self.text),
        }
    }
}
