//! Table-driven shift-reduce parser.

use crate::error::ParseError;
use crate::grammar::{self, Action, NonterminalKind, ParseTable, PRODUCTIONS};
use crate::token::{Token, TokenKind};

/// A node of the parse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Terminal(Token),
    Nonterminal(Nonterminal),
}

/// An inner node owning its children in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonterminal {
    pub kind: NonterminalKind,
    pub children: Vec<Symbol>,
}

impl Symbol {
    pub fn nonterminal(kind: NonterminalKind, children: Vec<Symbol>) -> Self {
        Symbol::Nonterminal(Nonterminal { kind, children })
    }

    /// Kind of an inner node, `None` for tokens.
    pub fn kind(&self) -> Option<NonterminalKind> {
        match self {
            Symbol::Terminal(_) => None,
            Symbol::Nonterminal(n) => Some(n.kind),
        }
    }

    pub fn children(&self) -> &[Symbol] {
        match self {
            Symbol::Terminal(_) => &[],
            Symbol::Nonterminal(n) => &n.children,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Symbol::Terminal(token) => Some(token),
            Symbol::Nonterminal(_) => None,
        }
    }

    pub fn token_kind(&self) -> Option<TokenKind> {
        self.as_token().map(|t| t.kind)
    }

    /// Line of the first token below this symbol.
    pub fn line(&self) -> Option<usize> {
        match self {
            Symbol::Terminal(token) => Some(token.line),
            Symbol::Nonterminal(n) => n.children.iter().find_map(Symbol::line),
        }
    }
}

/// Shift-reduce driver over the SLR table from [`grammar::table`].
///
/// Tokens are pushed one at a time; [`Parser::finish`] feeds the end-of-stream
/// marker and hands out the root of the tree.
pub struct Parser {
    table: &'static ParseTable,
    states: Vec<usize>,
    symbols: Vec<Symbol>,
    last_line: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            table: grammar::table(),
            states: vec![0],
            symbols: Vec::new(),
            last_line: 1,
        }
    }

    /// Consumes one token, performing every reduction it triggers and the final shift.
    pub fn push(&mut self, token: Token) -> Result<(), ParseError> {
        self.last_line = token.line;
        loop {
            match self.table.action(self.top()?, token.kind) {
                Action::Shift(next) => {
                    self.states.push(next);
                    self.symbols.push(Symbol::Terminal(token));
                    return Ok(());
                }
                Action::Reduce(production) => self.reduce(production)?,
                Action::Accept(_) | Action::Error => {
                    let err = ParseError::UnexpectedToken {
                        line: token.line,
                        text: token.to_string(),
                    };
                    self.abort();
                    return Err(err);
                }
            }
        }
    }

    /// Feeds the end-of-stream marker and returns the root symbol.
    pub fn finish(mut self) -> Result<Symbol, ParseError> {
        let end = Token::end_of_stream(self.last_line);
        loop {
            match self.table.action(self.top()?, end.kind) {
                Action::Reduce(production) => self.reduce(production)?,
                Action::Accept(production) => {
                    self.reduce(production)?;
                    if self.symbols.len() == 1 {
                        if let Some(root) = self.symbols.pop() {
                            return Ok(root);
                        }
                    }
                    break;
                }
                Action::Shift(_) | Action::Error => break,
            }
        }
        self.abort();
        Err(ParseError::UnexpectedEnd { line: end.line })
    }

    /// The state on top of the stack. The bottom state 0 is never popped.
    fn top(&self) -> Result<usize, ParseError> {
        self.states.last().copied().ok_or(ParseError::Internal {
            line: self.last_line,
        })
    }

    fn reduce(&mut self, production: usize) -> Result<(), ParseError> {
        let rule = &PRODUCTIONS[production];
        let count = rule.rhs.len();
        let split = self.symbols.len().saturating_sub(count);
        let children = self.symbols.split_off(split);
        self.states.truncate(self.states.len().saturating_sub(count).max(1));
        let Some(next) = self.table.goto(self.top()?, rule.lhs) else {
            self.abort();
            return Err(ParseError::Internal {
                line: self.last_line,
            });
        };
        self.symbols.push(Symbol::nonterminal(rule.lhs, children));
        self.states.push(next);
        Ok(())
    }

    fn abort(&mut self) {
        self.symbols.clear();
        self.states.truncate(1);
    }
}

/// Parses a complete token sequence into a raw parse tree.
pub fn parse_tokens(tokens: impl IntoIterator<Item = Token>) -> Result<Symbol, ParseError> {
    let mut parser = Parser::new();
    for token in tokens {
        parser.push(token)?;
    }
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(source: &str) -> Result<Symbol, ParseError> {
        parse_tokens(tokenize(source).unwrap())
    }

    fn kinds_on_path(mut symbol: &Symbol) -> Vec<NonterminalKind> {
        let mut path = Vec::new();
        while let Symbol::Nonterminal(n) = symbol {
            path.push(n.kind);
            match n.children.first() {
                Some(child) => symbol = child,
                None => break,
            }
        }
        path
    }

    #[test]
    fn empty_input_gives_empty_script() {
        let root = parse("").unwrap();
        assert_eq!(root, Symbol::nonterminal(NonterminalKind::Script, vec![]));
    }

    #[test]
    fn single_word_builds_full_chain() {
        let root = parse("ls").unwrap();
        use NonterminalKind::*;
        assert_eq!(
            kinds_on_path(&root),
            vec![Script, Lines, Line, Sequence, AndOr, Pipeline, Command]
        );
        assert_eq!(root.line(), Some(1));
    }

    #[test]
    fn command_children_follow_production() {
        let root = parse("cat a > out").unwrap();
        let mut node = &root;
        while node.kind() != Some(NonterminalKind::Command) || node.children().len() != 2 {
            node = &node.children()[0];
        }
        // Command := Command Redirection
        assert_eq!(node.children()[1].kind(), Some(NonterminalKind::Redirection));
        let redirection = node.children()[1].children();
        assert_eq!(redirection[0].token_kind(), Some(TokenKind::RedirOut));
        assert_eq!(redirection[1].as_token().unwrap().text, "out");
    }

    #[test]
    fn accepts_well_formed_inputs() {
        for source in [
            "a",
            "a | b | c",
            "a && b || c",
            "a; b & c",
            "a &",
            "a ;",
            "a 2> err < in >> log",
            "a\nb\nc",
            "a |\n b",
            "a > f b",
        ] {
            assert!(parse(source).is_ok(), "{source:?}");
        }
    }

    #[test]
    fn unexpected_token_reports_line_and_text() {
        let err = parse("echo ok\nls | | wc").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnexpectedToken {
                line: 2,
                text: "|".to_string()
            }
        );
    }

    #[test]
    fn leading_operator_is_rejected() {
        assert!(matches!(parse("| a"), Err(ParseError::UnexpectedToken { .. })));
        assert!(matches!(parse("; a"), Err(ParseError::UnexpectedToken { .. })));
        assert!(matches!(parse("a && && b"), Err(ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn reserved_brackets_are_syntax_errors() {
        let err = parse("(ls)").unwrap_err();
        assert_eq!(err.line(), 1);
        assert!(matches!(parse("a { b"), Err(ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn dangling_operator_is_unexpected_end() {
        assert_eq!(
            parse("a\nb &&").unwrap_err(),
            ParseError::UnexpectedEnd { line: 2 }
        );
        assert!(matches!(parse("a >"), Err(ParseError::UnexpectedEnd { .. })));
        assert!(matches!(parse("a |"), Err(ParseError::UnexpectedEnd { .. })));
    }

    #[test]
    fn redirection_needs_a_word() {
        assert!(matches!(parse("a > | b"), Err(ParseError::UnexpectedToken { .. })));
    }

    #[test]
    fn broken_stack_is_an_internal_error() {
        let mut parser = Parser::new();
        parser.states.clear();
        let err = parser.push(Token::new(TokenKind::Word, 3, "ls")).unwrap_err();
        assert_eq!(err, ParseError::Internal { line: 3 });
        assert_eq!(err.line(), 3);
    }
}
