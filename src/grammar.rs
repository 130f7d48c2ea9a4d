//! Shell grammar and its SLR(1) parse table.
//!
//! The table is derived from [`PRODUCTIONS`] once per process: canonical LR(0)
//! item sets, FIRST/FOLLOW sets, then shift/reduce/accept actions. Nothing about
//! the state numbering is written down by hand.

use crate::token::TokenKind;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::OnceLock;

/// Nonterminal symbols of the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NonterminalKind {
    /// The whole input.
    Script,
    /// Newline-separated lines. Disappears during shaping.
    Lines,
    /// A sequence with an optional trailing `;` or `&`; holds background markers.
    Line,
    /// `;`/`&` separated boolean chains. Merged into [`NonterminalKind::Line`]
    /// during shaping.
    Sequence,
    /// Pipelines joined by `&&` and `||`.
    AndOr,
    Pipeline,
    Command,
    Redirection,
}

impl NonterminalKind {
    pub const COUNT: usize = NonterminalKind::Redirection as usize + 1;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A grammar symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GrammarSymbol {
    T(TokenKind),
    N(NonterminalKind),
}

#[derive(Debug)]
pub struct Production {
    pub lhs: NonterminalKind,
    pub rhs: &'static [GrammarSymbol],
}

use GrammarSymbol::{N, T};
use NonterminalKind as NK;
use TokenKind as TK;

/// Productions of the grammar. The productions of [`NonterminalKind::Script`]
/// are the start productions: reducing one of them accepts the input.
pub static PRODUCTIONS: &[Production] = &[
    Production { lhs: NK::Script, rhs: &[] },
    Production { lhs: NK::Script, rhs: &[N(NK::Lines)] },
    Production { lhs: NK::Lines, rhs: &[N(NK::Line)] },
    Production { lhs: NK::Lines, rhs: &[N(NK::Lines), T(TK::Newline), N(NK::Line)] },
    Production { lhs: NK::Line, rhs: &[N(NK::Sequence)] },
    Production { lhs: NK::Line, rhs: &[N(NK::Sequence), T(TK::Amp)] },
    Production { lhs: NK::Line, rhs: &[N(NK::Sequence), T(TK::Semi)] },
    Production { lhs: NK::Sequence, rhs: &[N(NK::AndOr)] },
    Production { lhs: NK::Sequence, rhs: &[N(NK::Sequence), T(TK::Amp), N(NK::AndOr)] },
    Production { lhs: NK::Sequence, rhs: &[N(NK::Sequence), T(TK::Semi), N(NK::AndOr)] },
    Production { lhs: NK::AndOr, rhs: &[N(NK::Pipeline)] },
    Production { lhs: NK::AndOr, rhs: &[N(NK::AndOr), T(TK::And), N(NK::Pipeline)] },
    Production { lhs: NK::AndOr, rhs: &[N(NK::AndOr), T(TK::Or), N(NK::Pipeline)] },
    Production { lhs: NK::Pipeline, rhs: &[N(NK::Command)] },
    Production { lhs: NK::Pipeline, rhs: &[N(NK::Pipeline), T(TK::Pipe), N(NK::Command)] },
    Production { lhs: NK::Command, rhs: &[T(TK::Word)] },
    Production { lhs: NK::Command, rhs: &[N(NK::Command), T(TK::Word)] },
    Production { lhs: NK::Command, rhs: &[N(NK::Command), N(NK::Redirection)] },
    Production { lhs: NK::Redirection, rhs: &[T(TK::RedirIn), T(TK::Word)] },
    Production { lhs: NK::Redirection, rhs: &[T(TK::RedirOut), T(TK::Word)] },
    Production { lhs: NK::Redirection, rhs: &[T(TK::RedirAppend), T(TK::Word)] },
    Production { lhs: NK::Redirection, rhs: &[T(TK::FdIn), T(TK::Word)] },
    Production { lhs: NK::Redirection, rhs: &[T(TK::FdOut), T(TK::Word)] },
    Production { lhs: NK::Redirection, rhs: &[T(TK::FdAppend), T(TK::Word)] },
];

const START: NonterminalKind = NonterminalKind::Script;

/// Parser action for a (state, lookahead) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shift(usize),
    Reduce(usize),
    /// Reduce by a start production and stop.
    Accept(usize),
    Error,
}

/// A cell that two different actions competed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub state: usize,
    pub lookahead: TokenKind,
    pub kept: Action,
    pub dropped: Action,
}

#[derive(Debug)]
pub struct ParseTable {
    action: Vec<[Action; TokenKind::COUNT]>,
    goto: Vec<[Option<usize>; NonterminalKind::COUNT]>,
    conflicts: Vec<Conflict>,
}

impl ParseTable {
    pub fn action(&self, state: usize, lookahead: TokenKind) -> Action {
        self.action
            .get(state)
            .map_or(Action::Error, |row| row[lookahead.index()])
    }

    pub fn goto(&self, state: usize, nonterminal: NonterminalKind) -> Option<usize> {
        self.goto.get(state).and_then(|row| row[nonterminal.index()])
    }

    pub fn state_count(&self) -> usize {
        self.action.len()
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// Builds the SLR(1) table for `productions`, whose start symbol is `start`.
    pub fn build(productions: &'static [Production], start: NonterminalKind) -> ParseTable {
        TableBuilder::new(productions, start).build()
    }
}

/// The process-wide table for [`PRODUCTIONS`].
pub fn table() -> &'static ParseTable {
    static TABLE: OnceLock<ParseTable> = OnceLock::new();
    TABLE.get_or_init(|| ParseTable::build(PRODUCTIONS, START))
}

/// LR(0) item: production index and dot position.
type Item = (usize, usize);
type ItemSet = BTreeSet<Item>;

struct TableBuilder {
    productions: &'static [Production],
    start: NonterminalKind,
    nullable: [bool; NonterminalKind::COUNT],
    first: Vec<BTreeSet<TokenKind>>,
    follow: Vec<BTreeSet<TokenKind>>,
}

impl TableBuilder {
    fn new(productions: &'static [Production], start: NonterminalKind) -> Self {
        let mut builder = TableBuilder {
            productions,
            start,
            nullable: [false; NonterminalKind::COUNT],
            first: vec![BTreeSet::new(); NonterminalKind::COUNT],
            follow: vec![BTreeSet::new(); NonterminalKind::COUNT],
        };
        builder.compute_first();
        builder.compute_follow();
        builder
    }

    fn compute_first(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for production in self.productions {
                let lhs = production.lhs.index();
                let mut all_nullable = true;
                for symbol in production.rhs {
                    match *symbol {
                        T(kind) => {
                            changed |= self.first[lhs].insert(kind);
                            all_nullable = false;
                        }
                        N(nt) => {
                            let inherited: Vec<TokenKind> =
                                self.first[nt.index()].iter().copied().collect();
                            for kind in inherited {
                                changed |= self.first[lhs].insert(kind);
                            }
                            if !self.nullable[nt.index()] {
                                all_nullable = false;
                            }
                        }
                    }
                    if !all_nullable {
                        break;
                    }
                }
                if all_nullable && !self.nullable[lhs] {
                    self.nullable[lhs] = true;
                    changed = true;
                }
            }
        }
    }

    /// FIRST of a symbol string and whether the whole string can derive ε.
    fn first_of(&self, symbols: &[GrammarSymbol]) -> (BTreeSet<TokenKind>, bool) {
        let mut first = BTreeSet::new();
        for symbol in symbols {
            match *symbol {
                T(kind) => {
                    first.insert(kind);
                    return (first, false);
                }
                N(nt) => {
                    first.extend(self.first[nt.index()].iter().copied());
                    if !self.nullable[nt.index()] {
                        return (first, false);
                    }
                }
            }
        }
        (first, true)
    }

    fn compute_follow(&mut self) {
        self.follow[self.start.index()].insert(TokenKind::EndOfStream);
        let mut changed = true;
        while changed {
            changed = false;
            for production in self.productions {
                for (pos, symbol) in production.rhs.iter().enumerate() {
                    let N(nt) = *symbol else { continue };
                    let (first, nullable) = self.first_of(&production.rhs[pos + 1..]);
                    let mut additions: Vec<TokenKind> = first.into_iter().collect();
                    if nullable {
                        additions.extend(self.follow[production.lhs.index()].iter().copied());
                    }
                    for kind in additions {
                        changed |= self.follow[nt.index()].insert(kind);
                    }
                }
            }
        }
    }

    fn closure(&self, kernel: ItemSet) -> ItemSet {
        let mut set = kernel;
        let mut queue: VecDeque<Item> = set.iter().copied().collect();
        while let Some((production, dot)) = queue.pop_front() {
            let Some(&N(nt)) = self.productions[production].rhs.get(dot) else {
                continue;
            };
            for (index, candidate) in self.productions.iter().enumerate() {
                if candidate.lhs == nt && set.insert((index, 0)) {
                    queue.push_back((index, 0));
                }
            }
        }
        set
    }

    fn goto(&self, set: &ItemSet, symbol: GrammarSymbol) -> ItemSet {
        let kernel: ItemSet = set
            .iter()
            .filter(|&&(production, dot)| self.productions[production].rhs.get(dot) == Some(&symbol))
            .map(|&(production, dot)| (production, dot + 1))
            .collect();
        if kernel.is_empty() {
            kernel
        } else {
            self.closure(kernel)
        }
    }

    fn symbols(&self) -> Vec<GrammarSymbol> {
        let mut symbols: BTreeSet<GrammarSymbol> = BTreeSet::new();
        for production in self.productions {
            symbols.extend(production.rhs.iter().copied());
        }
        symbols.into_iter().collect()
    }

    fn build(self) -> ParseTable {
        let initial: ItemSet = self
            .productions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.lhs == self.start)
            .map(|(index, _)| (index, 0))
            .collect();

        let symbols = self.symbols();
        let mut states = vec![self.closure(initial)];
        let mut index_of: HashMap<ItemSet, usize> = HashMap::new();
        index_of.insert(states[0].clone(), 0);
        let mut transitions: Vec<Vec<(GrammarSymbol, usize)>> = vec![Vec::new()];

        let mut cursor = 0;
        while cursor < states.len() {
            for &symbol in &symbols {
                let target = self.goto(&states[cursor], symbol);
                if target.is_empty() {
                    continue;
                }
                let next = match index_of.get(&target) {
                    Some(&existing) => existing,
                    None => {
                        let fresh = states.len();
                        index_of.insert(target.clone(), fresh);
                        states.push(target);
                        transitions.push(Vec::new());
                        fresh
                    }
                };
                transitions[cursor].push((symbol, next));
            }
            cursor += 1;
        }

        let mut table = ParseTable {
            action: vec![[Action::Error; TokenKind::COUNT]; states.len()],
            goto: vec![[None; NonterminalKind::COUNT]; states.len()],
            conflicts: Vec::new(),
        };

        for (state, edges) in transitions.iter().enumerate() {
            for &(symbol, next) in edges {
                match symbol {
                    T(kind) => table.set_action(state, kind, Action::Shift(next)),
                    N(nt) => table.goto[state][nt.index()] = Some(next),
                }
            }
        }

        for (state, items) in states.iter().enumerate() {
            for &(production, dot) in items {
                let rule = &self.productions[production];
                if dot != rule.rhs.len() {
                    continue;
                }
                let action = if rule.lhs == self.start {
                    Action::Accept(production)
                } else {
                    Action::Reduce(production)
                };
                for &lookahead in &self.follow[rule.lhs.index()] {
                    table.set_action(state, lookahead, action);
                }
            }
        }

        table
    }
}

impl ParseTable {
    /// Fills a cell, preferring shifts and then the earlier production.
    fn set_action(&mut self, state: usize, lookahead: TokenKind, action: Action) {
        let cell = &mut self.action[state][lookahead.index()];
        let current = *cell;
        if current == Action::Error || current == action {
            *cell = action;
            return;
        }
        let keep_current = match (current, action) {
            (Action::Shift(_), _) => true,
            (_, Action::Shift(_)) => false,
            (Action::Reduce(a) | Action::Accept(a), Action::Reduce(b) | Action::Accept(b)) => a < b,
            _ => true,
        };
        let (kept, dropped) = if keep_current {
            (current, action)
        } else {
            (action, current)
        };
        *cell = kept;
        self.conflicts.push(Conflict {
            state,
            lookahead,
            kept,
            dropped,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_is_slr1() {
        assert_eq!(table().conflicts(), &[] as &[Conflict]);
    }

    #[test]
    fn empty_input_is_accepted_immediately() {
        assert_eq!(table().action(0, TokenKind::EndOfStream), Action::Accept(0));
    }

    #[test]
    fn initial_state_shifts_words_only() {
        let t = table();
        assert!(matches!(t.action(0, TokenKind::Word), Action::Shift(_)));
        for kind in TokenKind::ALL {
            if kind != TokenKind::Word && kind != TokenKind::EndOfStream {
                assert_eq!(t.action(0, kind), Action::Error, "{kind:?}");
            }
        }
    }

    #[test]
    fn reserved_tokens_are_never_shifted() {
        let t = table();
        for state in 0..t.state_count() {
            for kind in [
                TokenKind::OpenParen,
                TokenKind::CloseParen,
                TokenKind::OpenBrace,
                TokenKind::CloseBrace,
            ] {
                assert_eq!(t.action(state, kind), Action::Error);
            }
        }
    }

    #[test]
    fn follow_sets_include_separators() {
        let builder = TableBuilder::new(PRODUCTIONS, START);
        let follow = &builder.follow[NonterminalKind::Command.index()];
        for kind in [
            TokenKind::Word,
            TokenKind::Pipe,
            TokenKind::And,
            TokenKind::Or,
            TokenKind::Semi,
            TokenKind::Amp,
            TokenKind::Newline,
            TokenKind::EndOfStream,
            TokenKind::RedirOut,
        ] {
            assert!(follow.contains(&kind), "{kind:?} missing");
        }
        assert!(builder.nullable[NonterminalKind::Script.index()]);
        assert!(!builder.nullable[NonterminalKind::Lines.index()]);
    }

    #[test]
    fn conflicting_grammar_is_reported() {
        // E := E + E | w is ambiguous.
        static AMBIGUOUS: &[Production] = &[
            Production { lhs: NK::Script, rhs: &[N(NK::Command)] },
            Production { lhs: NK::Command, rhs: &[N(NK::Command), T(TK::Pipe), N(NK::Command)] },
            Production { lhs: NK::Command, rhs: &[T(TK::Word)] },
        ];
        let table = ParseTable::build(AMBIGUOUS, NK::Script);
        assert!(!table.conflicts().is_empty());
        assert!(table
            .conflicts()
            .iter()
            .all(|c| c.lookahead == TokenKind::Pipe && matches!(c.kept, Action::Shift(_))));
    }
}
