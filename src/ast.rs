//! Canonicalization of raw parse trees.
//!
//! The grammar is left-recursive, so `a | b | c` comes out of the parser as a
//! pipeline nested inside a pipeline. [`shape`] turns every such chain into a
//! single node with all members as direct children, drops tokens that carry no
//! meaning after parsing, and collapses wrappers with a single inner child.

use crate::grammar::NonterminalKind;
use crate::parser::{Nonterminal, Symbol};
use crate::token::TokenKind;
use std::fmt;

/// Flattens list nonterminals and collapses singleton chains.
pub fn shape(root: Symbol) -> Symbol {
    match root {
        Symbol::Terminal(_) => root,
        Symbol::Nonterminal(node) => collapse(flatten(node)),
    }
}

fn flatten(node: Nonterminal) -> Nonterminal {
    let kind = node.kind;
    let members = match kind {
        NonterminalKind::Script => node
            .children
            .into_iter()
            .flat_map(|child| match child {
                Symbol::Nonterminal(n) if n.kind == NonterminalKind::Lines => {
                    unroll(n, NonterminalKind::Lines)
                }
                other => vec![other],
            })
            .collect(),
        NonterminalKind::Line => node
            .children
            .into_iter()
            .flat_map(|child| match child {
                Symbol::Nonterminal(n) if n.kind == NonterminalKind::Sequence => {
                    unroll(n, NonterminalKind::Sequence)
                }
                other => vec![other],
            })
            .collect(),
        NonterminalKind::Lines
        | NonterminalKind::Sequence
        | NonterminalKind::AndOr
        | NonterminalKind::Pipeline
        | NonterminalKind::Command => unroll(node, kind),
        NonterminalKind::Redirection => node.children,
    };

    let children = members
        .into_iter()
        .filter(|child| !is_noise(kind, child))
        .map(|child| match child {
            Symbol::Nonterminal(inner) => Symbol::Nonterminal(flatten(inner)),
            terminal => terminal,
        })
        .collect();
    Nonterminal { kind, children }
}

/// Tokens that only mattered for the shape of the raw tree.
fn is_noise(parent: NonterminalKind, child: &Symbol) -> bool {
    match child.token_kind() {
        Some(TokenKind::Newline) => matches!(
            parent,
            NonterminalKind::Script | NonterminalKind::Lines
        ),
        Some(TokenKind::Pipe) => parent == NonterminalKind::Pipeline,
        _ => false,
    }
}

/// Children of a left-recursive list node, with nested nodes of the same kind
/// spliced in place. Iterative so that very long lists do not exhaust the stack.
fn unroll(node: Nonterminal, kind: NonterminalKind) -> Vec<Symbol> {
    let mut tails: Vec<Vec<Symbol>> = Vec::new();
    let mut current = node;
    let head = loop {
        let mut children = current.children.into_iter();
        let first = children.next();
        tails.push(children.collect());
        match first {
            Some(Symbol::Nonterminal(inner)) if inner.kind == kind => current = inner,
            other => break other,
        }
    };
    let mut members: Vec<Symbol> = head.into_iter().collect();
    for tail in tails.into_iter().rev() {
        members.extend(tail);
    }
    members
}

fn collapse(node: Nonterminal) -> Symbol {
    let mut children: Vec<Symbol> = node
        .children
        .into_iter()
        .map(|child| match child {
            Symbol::Nonterminal(inner) => collapse(inner),
            terminal => terminal,
        })
        .collect();
    if children.len() == 1 && matches!(children[0], Symbol::Nonterminal(_)) {
        if let Some(only) = children.pop() {
            return only;
        }
    }
    Symbol::nonterminal(node.kind, children)
}

impl fmt::Display for Symbol {
    /// Indented tree dump, one symbol per line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_tree(f, self, 0)
    }
}

fn write_tree(f: &mut fmt::Formatter<'_>, symbol: &Symbol, depth: usize) -> fmt::Result {
    write!(f, "{:indent$}", "", indent = depth * 2)?;
    match symbol {
        Symbol::Terminal(token) => {
            writeln!(f, "{:?} \"{}\"", token.kind, token.text.escape_debug())
        }
        Symbol::Nonterminal(node) => {
            writeln!(f, "{:?}", node.kind)?;
            for child in &node.children {
                write_tree(f, child, depth + 1)?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;

    fn shaped(source: &str) -> Symbol {
        shape(parse_tokens(tokenize(source).unwrap()).unwrap())
    }

    fn words(command: &Symbol) -> Vec<String> {
        command
            .children()
            .iter()
            .filter_map(|c| c.as_token())
            .map(|t| t.text.clone())
            .collect()
    }

    fn assert_no_singleton_chains(symbol: &Symbol) {
        if let Symbol::Nonterminal(node) = symbol {
            assert!(
                !(node.children.len() == 1 && matches!(node.children[0], Symbol::Nonterminal(_))),
                "singleton chain at {:?}",
                node.kind
            );
            node.children.iter().for_each(assert_no_singleton_chains);
        }
    }

    #[test]
    fn simple_command_collapses_to_command() {
        let root = shaped("ls -l /tmp");
        assert_eq!(root.kind(), Some(NonterminalKind::Command));
        assert_eq!(words(&root), vec!["ls", "-l", "/tmp"]);
    }

    #[test]
    fn pipeline_members_are_siblings() {
        for k in 2..=8 {
            let source = (0..k).map(|i| format!("cmd{i} arg")).collect::<Vec<_>>().join(" | ");
            let root = shaped(&source);
            assert_eq!(root.kind(), Some(NonterminalKind::Pipeline), "k = {k}");
            assert_eq!(root.children().len(), k);
            for (i, child) in root.children().iter().enumerate() {
                assert_eq!(child.kind(), Some(NonterminalKind::Command));
                assert_eq!(words(child), vec![format!("cmd{i}"), "arg".to_string()]);
            }
        }
    }

    #[test]
    fn boolean_chain_keeps_operators() {
        let root = shaped("a && b | c || d");
        assert_eq!(root.kind(), Some(NonterminalKind::AndOr));
        let shape: Vec<Option<NonterminalKind>> = root.children().iter().map(Symbol::kind).collect();
        assert_eq!(
            shape,
            vec![
                Some(NonterminalKind::Command),
                None,
                Some(NonterminalKind::Pipeline),
                None,
                Some(NonterminalKind::Command),
            ]
        );
        assert_eq!(root.children()[1].token_kind(), Some(TokenKind::And));
        assert_eq!(root.children()[3].token_kind(), Some(TokenKind::Or));
    }

    #[test]
    fn sequence_merges_into_line_with_separators() {
        let root = shaped("a; b & c &");
        assert_eq!(root.kind(), Some(NonterminalKind::Line));
        let tokens: Vec<Option<TokenKind>> = root.children().iter().map(Symbol::token_kind).collect();
        assert_eq!(
            tokens,
            vec![
                None,
                Some(TokenKind::Semi),
                None,
                Some(TokenKind::Amp),
                None,
                Some(TokenKind::Amp),
            ]
        );
    }

    #[test]
    fn background_single_command_keeps_line() {
        let root = shaped("sleep 1 &");
        assert_eq!(root.kind(), Some(NonterminalKind::Line));
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.children()[0].kind(), Some(NonterminalKind::Command));
    }

    #[test]
    fn script_lines_are_flattened() {
        let root = shaped("a\nb | c\nd && e\n");
        assert_eq!(root.kind(), Some(NonterminalKind::Script));
        let kinds: Vec<Option<NonterminalKind>> = root.children().iter().map(Symbol::kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(NonterminalKind::Command),
                Some(NonterminalKind::Pipeline),
                Some(NonterminalKind::AndOr),
            ]
        );
    }

    #[test]
    fn redirections_stay_nested_in_command() {
        let root = shaped("sort < in > out b");
        assert_eq!(root.kind(), Some(NonterminalKind::Command));
        let kinds: Vec<Option<NonterminalKind>> = root.children().iter().map(Symbol::kind).collect();
        assert_eq!(
            kinds,
            vec![
                None,
                Some(NonterminalKind::Redirection),
                Some(NonterminalKind::Redirection),
                None,
            ]
        );
    }

    #[test]
    fn no_singleton_chains_remain() {
        for source in [
            "",
            "a",
            "a | b",
            "a && b; c | d & e",
            "a\nb\nc | d || e &\nf > g",
            "x 2>>y",
        ] {
            assert_no_singleton_chains(&shaped(source));
        }
    }

    #[test]
    fn long_pipeline_does_not_recurse_per_member() {
        let source = vec!["true"; 5000].join(" | ");
        let root = shaped(&source);
        assert_eq!(root.children().len(), 5000);
    }

    #[test]
    fn tree_printer_indents_and_escapes() {
        let root = shaped("echo \"a\tb\" > f");
        let printed = root.to_string();
        assert_eq!(
            printed,
            "Command\n  Word \"echo\"\n  Word \"a\\tb\"\n  Redirection\n    RedirOut \">\"\n    Word \"f\"\n"
        );
    }
}
