//! Parser that consumes the scanner's tokens and builds a `SyntaxNode` tree.
//!
//! This is not a full Ruby grammar. It understands enough to recover the
//! shape a connector analysis needs (hashes, pairs, calls with receivers and
//! arguments, callable blocks, literals) and folds everything else into
//! `Group` nodes. Statements are separated by newlines or `;`; a statement
//! continues over a line break only after a trailing operator or comma, or
//! before a leading `.`.

use std::collections::BTreeSet;

use thiserror::Error;

use super::ast::{Literal, Span, SyntaxKind, SyntaxNode};
use super::scanner::{self, ScanError, Token, TokenKind};
use crate::model::{Location, Section};

/// Upper bound on parser recursion. Each nesting level of the source costs
/// a few units.
pub const MAX_NESTING_DEPTH: usize = 256;

/// A hash must mention at least this many distinct sections to be taken for
/// the connector document.
pub const MIN_DOCUMENT_SCORE: usize = 2;

/// Words that separate clauses inside keyword bodies and never start an
/// expression of their own.
const SEPARATOR_KEYWORDS: &[&str] = &[
    "then", "else", "elsif", "when", "in", "rescue", "ensure", "do",
];

/// Word operators that continue an expression: `a and b`, `x if y`.
const KEYWORD_OPERATORS: &[&str] = &["and", "or", "if", "unless", "while", "until", "rescue"];

const UNARY_OPERATORS: &[&str] = &["!", "-", "+", "~", "*", "**", "&", "::", "..", "..."];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("unexpected `{found}` at line {line}, column {column}; expected {expected}")]
    Unexpected {
        found: String,
        expected: &'static str,
        line: usize,
        column: usize,
    },
    #[error("unexpected end of input; expected {expected}")]
    UnexpectedEof { expected: &'static str },
    #[error("nesting deeper than {limit} levels at line {line}")]
    DepthExceeded { limit: usize, line: usize },
}

impl ParseError {
    /// Where the failure was detected, as far as the error knows.
    pub fn location(&self) -> Location {
        let (line, column) = match *self {
            ParseError::Scan(ScanError::UnterminatedLiteral { line, column, .. })
            | ParseError::Scan(ScanError::UnbalancedDelimiter { line, column, .. })
            | ParseError::Unexpected { line, column, .. } => (Some(line), Some(column)),
            ParseError::Scan(ScanError::NestingTooDeep { line, .. })
            | ParseError::DepthExceeded { line, .. } => (Some(line), None),
            ParseError::Scan(ScanError::ExpectedOpener { .. }) | ParseError::UnexpectedEof { .. } => {
                (None, None)
            }
        };
        Location {
            line,
            column,
            length: None,
        }
    }
}

/// A failed parse plus whatever non-fatal notes were collected before it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct ParseFailure {
    pub error: ParseError,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub tree: SyntaxNode,
    /// Non-fatal notes: skipped stray tokens, hash entries without keys.
    pub diagnostics: Vec<String>,
}

pub fn parse(source: &str) -> Result<ParsedDocument, ParseFailure> {
    let tokens = scanner::tokenize(source).map_err(|e| ParseFailure {
        error: e.into(),
        diagnostics: Vec::new(),
    })?;
    parse_tokens(&tokens)
}

pub fn parse_tokens(tokens: &[Token]) -> Result<ParsedDocument, ParseFailure> {
    let mut parser = Parser::new(tokens.iter().collect(), Span::default());
    match parser.parse_program() {
        Ok(tree) => Ok(ParsedDocument {
            tree,
            diagnostics: parser.diagnostics,
        }),
        Err(error) => Err(ParseFailure {
            error,
            diagnostics: parser.diagnostics,
        }),
    }
}

/// Locates the connector document: the hash with the most distinct known
/// section keys (at least `MIN_DOCUMENT_SCORE`). Ties go to the first hash
/// in pre-order.
pub fn find_document(tree: &SyntaxNode) -> Option<&SyntaxNode> {
    let mut best: Option<(&SyntaxNode, usize)> = None;
    for node in tree.preorder().filter(|n| n.kind == SyntaxKind::Hash) {
        let score = document_score(node);
        if score >= MIN_DOCUMENT_SCORE && best.is_none_or(|(_, top)| score > top) {
            best = Some((node, score));
        }
    }
    best.map(|(node, _)| node)
}

/// Number of distinct known sections among a hash's literal keys.
pub fn document_score(hash: &SyntaxNode) -> usize {
    hash.hash_keys()
        .into_iter()
        .filter_map(Section::from_key)
        .collect::<BTreeSet<_>>()
        .len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closer {
    Eof,
    Brace,
    Paren,
    Bracket,
    End,
}

impl Closer {
    fn matches(self, token: &Token) -> bool {
        match self {
            Closer::Eof => false,
            Closer::Brace => token.kind == TokenKind::BraceClose,
            Closer::Paren => token.is_punct(")"),
            Closer::Bracket => token.is_punct("]"),
            Closer::End => token.kind == TokenKind::BlockEnd,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Closer::Eof => "end of input",
            Closer::Brace => "`}`",
            Closer::Paren => "`)`",
            Closer::Bracket => "`]`",
            Closer::End => "`end`",
        }
    }
}

fn is_closer(token: &Token) -> bool {
    matches!(token.kind, TokenKind::BraceClose | TokenKind::BlockEnd)
        || token.is_punct(")")
        || token.is_punct("]")
}

fn is_keyword_operator(token: &Token) -> bool {
    token.kind == TokenKind::Identifier && KEYWORD_OPERATORS.contains(&token.text.as_str())
}

fn is_separator(token: &Token) -> bool {
    token.kind == TokenKind::Identifier && SEPARATOR_KEYWORDS.contains(&token.text.as_str())
}

fn starts_operand(token: &Token) -> bool {
    match token.kind {
        TokenKind::BraceClose | TokenKind::BlockEnd | TokenKind::Comment => false,
        TokenKind::Punctuation => {
            matches!(token.text.as_str(), "(" | "[" | "->") || UNARY_OPERATORS.contains(&token.text.as_str())
        }
        TokenKind::Identifier => !is_keyword_operator(token) && !is_separator(token),
        _ => true,
    }
}

#[derive(Debug, Clone, Copy)]
struct ExprCtx {
    allow_comma: bool,
    allow_rocket: bool,
}

const STATEMENT: ExprCtx = ExprCtx {
    allow_comma: true,
    allow_rocket: true,
};

const ARGUMENT: ExprCtx = ExprCtx {
    allow_comma: false,
    allow_rocket: false,
};

enum Entry {
    Positional(SyntaxNode),
    Pair(SyntaxNode),
}

fn pair_node(key: SyntaxNode, value: SyntaxNode) -> SyntaxNode {
    let span = key.span.to(&value.span);
    SyntaxNode::new(SyntaxKind::Pair, span, vec![key, value])
}

fn call_node(
    name: &str,
    receiver: Option<SyntaxNode>,
    args: Vec<SyntaxNode>,
    block: Option<SyntaxNode>,
    span: Span,
) -> SyntaxNode {
    let kind = SyntaxKind::Call {
        name: name.to_string(),
        receiver: receiver.is_some(),
        args: args.len(),
        block: block.is_some(),
    };
    let children = receiver.into_iter().chain(args).chain(block).collect();
    SyntaxNode::new(kind, span, children)
}

/// Folds runs of `key: value` entries into implicit hash arguments.
fn collect_arguments(entries: Vec<Entry>) -> Vec<SyntaxNode> {
    let mut args = Vec::new();
    let mut pairs: Vec<SyntaxNode> = Vec::new();
    let flush = |pairs: &mut Vec<SyntaxNode>, args: &mut Vec<SyntaxNode>| {
        if let (Some(first), Some(last)) = (pairs.first(), pairs.last()) {
            let span = first.span.to(&last.span);
            args.push(SyntaxNode::new(SyntaxKind::Hash, span, std::mem::take(pairs)));
        }
    };
    for entry in entries {
        match entry {
            Entry::Pair(pair) => pairs.push(pair),
            Entry::Positional(node) => {
                flush(&mut pairs, &mut args);
                args.push(node);
            }
        }
    }
    flush(&mut pairs, &mut args);
    args
}

struct Parser<'t> {
    tokens: Vec<&'t Token>,
    pos: usize,
    /// Span of the most recently consumed token.
    last: Span,
    /// Inside unparenthesised command arguments a `do` belongs to the
    /// command, not to the argument before it.
    in_command_args: bool,
    diagnostics: Vec<String>,
}

impl<'t> Parser<'t> {
    fn new(tokens: Vec<&'t Token>, start: Span) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .filter(|t| t.kind != TokenKind::Comment)
                .collect(),
            pos: 0,
            last: start,
            in_command_args: false,
            diagnostics: Vec::new(),
        }
    }

    fn scoped<T>(
        &mut self,
        in_command_args: bool,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        let saved = std::mem::replace(&mut self.in_command_args, in_command_args);
        let result = parse(self);
        self.in_command_args = saved;
        result
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Result<&'t Token, ParseError> {
        let token = self.peek().ok_or(ParseError::UnexpectedEof {
            expected: "more input",
        })?;
        self.pos += 1;
        self.last = token.span();
        Ok(token)
    }

    fn unexpected(&self, token: &Token, expected: &'static str) -> ParseError {
        ParseError::Unexpected {
            found: token.text.clone(),
            expected,
            line: token.pos.line,
            column: token.pos.column,
        }
    }

    fn check_depth(&self, depth: usize) -> Result<(), ParseError> {
        if depth > MAX_NESTING_DEPTH {
            let line = self.peek().map_or(self.last.line, |t| t.pos.line);
            return Err(ParseError::DepthExceeded {
                limit: MAX_NESTING_DEPTH,
                line,
            });
        }
        Ok(())
    }

    fn expect(&mut self, closer: Closer) -> Result<(), ParseError> {
        let token = self.peek().ok_or(ParseError::UnexpectedEof {
            expected: closer.describe(),
        })?;
        if !closer.matches(token) {
            return Err(self.unexpected(token, closer.describe()));
        }
        self.bump()?;
        Ok(())
    }

    fn note(&mut self, token: &Token, what: &str) {
        self.diagnostics.push(format!(
            "line {}, column {}: {what} `{}`",
            token.pos.line, token.pos.column, token.text
        ));
    }

    fn parse_program(&mut self) -> Result<SyntaxNode, ParseError> {
        let statements = self.parse_statements(Closer::Eof, 0)?;
        let span = match (statements.first(), statements.last()) {
            (Some(first), Some(last)) => first.span.to(&last.span),
            _ => Span {
                line: 1,
                ..Span::default()
            },
        };
        Ok(SyntaxNode::new(SyntaxKind::Program, span, statements))
    }

    fn parse_statements(
        &mut self,
        closer: Closer,
        depth: usize,
    ) -> Result<Vec<SyntaxNode>, ParseError> {
        self.check_depth(depth)?;
        let mut statements = Vec::new();
        loop {
            let Some(token) = self.peek() else {
                if closer == Closer::Eof {
                    break;
                }
                return Err(ParseError::UnexpectedEof {
                    expected: closer.describe(),
                });
            };
            if closer.matches(token) {
                break;
            }
            if is_closer(token) {
                return Err(self.unexpected(token, closer.describe()));
            }
            // `;`, clause keywords and the `,`/`=>` of rescue clauses.
            if token.is_punct(";") || token.is_punct(",") || token.is_punct("=>") || is_separator(token)
            {
                self.bump()?;
                continue;
            }
            statements.push(self.parse_expression(STATEMENT, depth + 1)?);
        }
        Ok(statements)
    }

    fn is_binary_operator(&self, token: &Token, ctx: ExprCtx) -> bool {
        match token.kind {
            TokenKind::Punctuation => match token.text.as_str() {
                "," => ctx.allow_comma,
                "=>" => ctx.allow_rocket,
                "(" | ")" | "[" | "]" | "." | "&." | "::" | "->" | ";" | "!" | "~" => false,
                _ => true,
            },
            TokenKind::Identifier => is_keyword_operator(token),
            _ => false,
        }
    }

    fn parse_expression(&mut self, ctx: ExprCtx, depth: usize) -> Result<SyntaxNode, ParseError> {
        self.check_depth(depth)?;
        let first = self.parse_operand(ctx, depth + 1)?;
        let mut parts = vec![first];
        while let Some(token) = self.peek() {
            if token.newline_before || !self.is_binary_operator(token, ctx) {
                break;
            }
            self.bump()?;
            match self.peek() {
                Some(next) if !is_closer(next) && !next.is_punct(";") => {
                    parts.push(self.parse_operand(ctx, depth + 1)?);
                }
                _ => break,
            }
        }
        if parts.len() == 1 {
            return Ok(parts.swap_remove(0));
        }
        let span = parts[0].span.to(&self.last);
        Ok(SyntaxNode::new(SyntaxKind::Group, span, parts))
    }

    fn parse_operand(&mut self, ctx: ExprCtx, depth: usize) -> Result<SyntaxNode, ParseError> {
        self.check_depth(depth)?;
        let token = self.peek().ok_or(ParseError::UnexpectedEof {
            expected: "expression",
        })?;
        let primary = match token.kind {
            TokenKind::BraceClose | TokenKind::BlockEnd => {
                return Err(self.unexpected(token, "expression"));
            }
            TokenKind::Punctuation => match token.text.as_str() {
                ")" | "]" => return Err(self.unexpected(token, "expression")),
                "(" => self.parse_parenthesised(depth)?,
                "[" => self.parse_array(depth)?,
                "->" => self.parse_stabby_lambda(depth)?,
                op if UNARY_OPERATORS.contains(&op) => return self.parse_unary(ctx, depth),
                _ => {
                    self.bump()?;
                    self.note(token, "skipped stray");
                    SyntaxNode::leaf(SyntaxKind::Identifier(token.text.clone()), token.span())
                }
            },
            TokenKind::BraceOpen => self.parse_brace_literal(depth)?,
            TokenKind::BlockStart => self.parse_keyword_body(depth)?,
            TokenKind::Label => self.parse_implicit_hash(depth)?,
            TokenKind::Identifier => return self.parse_identifier(ctx, depth),
            TokenKind::StringLiteral
            | TokenKind::SymbolLiteral
            | TokenKind::CommandLiteral
            | TokenKind::RegexLiteral
            | TokenKind::WordList
            | TokenKind::Numeral => self.parse_literal(depth)?,
            TokenKind::Comment | TokenKind::Other => {
                self.bump()?;
                SyntaxNode::leaf(SyntaxKind::Identifier(token.text.clone()), token.span())
            }
        };
        self.parse_postfix(primary, depth)
    }

    fn parse_unary(&mut self, ctx: ExprCtx, depth: usize) -> Result<SyntaxNode, ParseError> {
        let op = self.bump()?;
        match self.peek() {
            Some(next) if starts_operand(next) && !next.newline_before => {
                let operand = self.parse_operand(ctx, depth + 1)?;
                let span = op.span().to(&self.last);
                Ok(SyntaxNode::new(SyntaxKind::Group, span, vec![operand]))
            }
            _ => Ok(SyntaxNode::leaf(
                SyntaxKind::Identifier(op.text.clone()),
                op.span(),
            )),
        }
    }

    fn parse_literal(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let token = self.bump()?;
        let value = token.value.clone();
        let mut literal = match token.kind {
            TokenKind::StringLiteral => value.map_or(Literal::DynamicStr, Literal::Str),
            TokenKind::SymbolLiteral => value.map_or(Literal::DynamicSymbol, Literal::Symbol),
            TokenKind::CommandLiteral => Literal::Command,
            TokenKind::RegexLiteral => Literal::Regex,
            TokenKind::WordList => Literal::Words(
                value
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
            ),
            _ => Literal::Number(token.text.clone()),
        };
        let mut span = token.span();
        let mut children = self.parse_interpolations(token, depth)?;
        if token.kind == TokenKind::StringLiteral {
            // `'a' "b"`, also across a `\` line continuation, is one string.
            while let Some(next) = self
                .peek()
                .filter(|t| t.kind == TokenKind::StringLiteral && !t.newline_before)
            {
                self.bump()?;
                literal = match (literal, &next.value) {
                    (Literal::Str(mut head), Some(tail)) => {
                        head.push_str(tail);
                        Literal::Str(head)
                    }
                    _ => Literal::DynamicStr,
                };
                children.extend(self.parse_interpolations(next, depth)?);
                span = span.to(&next.span());
            }
        }
        Ok(SyntaxNode::new(SyntaxKind::Literal(literal), span, children))
    }

    fn parse_interpolations(
        &mut self,
        token: &Token,
        depth: usize,
    ) -> Result<Vec<SyntaxNode>, ParseError> {
        if token.nested.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = Parser::new(token.nested.iter().collect(), token.span());
        let statements = inner.parse_statements(Closer::Eof, depth + 1)?;
        self.diagnostics.append(&mut inner.diagnostics);
        Ok(statements)
    }

    fn parse_identifier(&mut self, ctx: ExprCtx, depth: usize) -> Result<SyntaxNode, ParseError> {
        let token = self.bump()?;
        let name = token.text.as_str();
        let node = match name {
            "nil" => SyntaxNode::leaf(SyntaxKind::Literal(Literal::Nil), token.span()),
            "true" => SyntaxNode::leaf(SyntaxKind::Literal(Literal::True), token.span()),
            "false" => SyntaxNode::leaf(SyntaxKind::Literal(Literal::False), token.span()),
            "return" | "next" | "break" | "not" => {
                let keyword = SyntaxNode::leaf(SyntaxKind::Identifier(name.to_string()), token.span());
                return match self.peek() {
                    Some(next) if starts_operand(next) && !next.newline_before => {
                        let value_ctx = ExprCtx {
                            allow_comma: name != "not",
                            ..ctx
                        };
                        let value = self.parse_expression(value_ctx, depth + 1)?;
                        let span = token.span().to(&self.last);
                        Ok(SyntaxNode::new(SyntaxKind::Group, span, vec![keyword, value]))
                    }
                    _ => Ok(keyword),
                };
            }
            _ => {
                let args = if self
                    .peek()
                    .is_some_and(|t| t.is_punct("(") && !t.space_before && !t.newline_before)
                {
                    self.bump()?;
                    let entries =
                        self.scoped(false, |p| p.parse_entries(Some(Closer::Paren), depth + 1))?;
                    Some(collect_arguments(entries))
                } else if self.command_argument_follows() {
                    let entries = self.scoped(true, |p| p.parse_entries(None, depth + 1))?;
                    Some(collect_arguments(entries))
                } else {
                    None
                };
                match args {
                    Some(args) => {
                        let span = token.span().to(&self.last);
                        call_node(name, None, args, None, span)
                    }
                    None => SyntaxNode::leaf(SyntaxKind::Identifier(name.to_string()), token.span()),
                }
            }
        };
        self.parse_postfix(node, depth)
    }

    /// Whether the next token starts the first argument of a call written
    /// without parentheses (`call 'name', x`).
    fn command_argument_follows(&self) -> bool {
        let Some(next) = self.peek() else {
            return false;
        };
        if next.newline_before || !next.space_before {
            return false;
        }
        let glued_to_next = || {
            self.peek_at(1)
                .is_some_and(|t| !t.space_before && !t.newline_before)
        };
        match next.kind {
            TokenKind::StringLiteral
            | TokenKind::SymbolLiteral
            | TokenKind::Numeral
            | TokenKind::RegexLiteral
            | TokenKind::WordList
            | TokenKind::CommandLiteral
            | TokenKind::Label => true,
            TokenKind::Identifier => !is_keyword_operator(next) && !is_separator(next),
            TokenKind::Punctuation => match next.text.as_str() {
                "[" | "->" | "!" | "::" | "(" => true,
                "-" | "*" | "&" | "**" | ":" => glued_to_next(),
                _ => false,
            },
            _ => false,
        }
    }

    /// Comma-separated entries up to `closer` (consumed), or, for command
    /// calls, up to the first entry not followed by a comma.
    fn parse_entries(
        &mut self,
        closer: Option<Closer>,
        depth: usize,
    ) -> Result<Vec<Entry>, ParseError> {
        self.check_depth(depth)?;
        let mut entries = Vec::new();
        loop {
            let next = self.peek();
            match (closer, next) {
                (Some(closer), None) => {
                    return Err(ParseError::UnexpectedEof {
                        expected: closer.describe(),
                    });
                }
                (Some(closer), Some(token)) if closer.matches(token) => {
                    self.bump()?;
                    break;
                }
                (Some(closer), Some(token)) if is_closer(token) => {
                    return Err(self.unexpected(token, closer.describe()));
                }
                (None, None) => break,
                (None, Some(token)) if is_closer(token) || token.is_punct(";") => break,
                _ => {}
            }

            entries.push(self.parse_entry(depth)?);

            match self.peek() {
                Some(token) if token.is_punct(",") => {
                    self.bump()?;
                }
                Some(token) if closer.is_some() && !closer.is_some_and(|c| c.matches(token)) => {
                    if is_closer(token) {
                        let expected = closer.map_or("`,`", Closer::describe);
                        return Err(self.unexpected(token, expected));
                    }
                    self.note(token, "missing comma before");
                }
                _ if closer.is_none() => break,
                _ => {}
            }
        }
        Ok(entries)
    }

    fn parse_entry(&mut self, depth: usize) -> Result<Entry, ParseError> {
        let token = self.peek().ok_or(ParseError::UnexpectedEof {
            expected: "argument",
        })?;
        if token.kind == TokenKind::Label {
            self.bump()?;
            let key = self.label_key(token);
            let shorthand = self
                .peek()
                .is_none_or(|t| t.is_punct(",") || is_closer(t));
            let value = if shorthand {
                let name = token.value.clone().unwrap_or_default();
                SyntaxNode::leaf(SyntaxKind::Identifier(name), token.span())
            } else {
                self.parse_expression(ARGUMENT, depth + 1)?
            };
            return Ok(Entry::Pair(pair_node(key, value)));
        }
        let expr = self.parse_expression(ARGUMENT, depth + 1)?;
        if self.peek().is_some_and(|t| t.is_punct("=>")) {
            self.bump()?;
            let value = self.parse_expression(ARGUMENT, depth + 1)?;
            return Ok(Entry::Pair(pair_node(expr, value)));
        }
        Ok(Entry::Positional(expr))
    }

    fn label_key(&self, token: &Token) -> SyntaxNode {
        let name = token.value.clone().unwrap_or_default();
        SyntaxNode::leaf(SyntaxKind::Literal(Literal::Symbol(name)), token.span())
    }

    /// `key: value, key: value` in operand position.
    fn parse_implicit_hash(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let mut pairs = Vec::new();
        loop {
            match self.parse_entry(depth + 1)? {
                Entry::Pair(pair) => pairs.push(pair),
                Entry::Positional(node) => pairs.push(node),
            }
            let more = self.peek().is_some_and(|t| t.is_punct(","))
                && self.peek_at(1).is_some_and(|t| t.kind == TokenKind::Label);
            if !more {
                break;
            }
            self.bump()?;
        }
        let span = pairs[0].span.to(&self.last);
        Ok(SyntaxNode::new(SyntaxKind::Hash, span, pairs))
    }

    fn parse_parenthesised(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let open = self.bump()?;
        let statements = self.scoped(false, |p| p.parse_statements(Closer::Paren, depth + 1))?;
        self.expect(Closer::Paren)?;
        Ok(SyntaxNode::new(
            SyntaxKind::Group,
            open.span().to(&self.last),
            statements,
        ))
    }

    fn parse_array(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let open = self.bump()?;
        let entries = self.scoped(false, |p| p.parse_entries(Some(Closer::Bracket), depth + 1))?;
        Ok(SyntaxNode::new(
            SyntaxKind::Array,
            open.span().to(&self.last),
            collect_arguments(entries),
        ))
    }

    /// `{` in operand position: a hash literal, or a block body when it
    /// opens with `|params|`.
    fn parse_brace_literal(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let open = self.bump()?;
        if self.peek().is_some_and(|t| t.is_punct("|") || t.is_punct("||")) {
            let (params, body) = self.parse_block_rest(Closer::Brace, depth + 1)?;
            return Ok(SyntaxNode::new(
                SyntaxKind::Block { params },
                open.span().to(&self.last),
                body,
            ));
        }
        let entries = self.scoped(false, |p| p.parse_entries(Some(Closer::Brace), depth + 1))?;
        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                Entry::Pair(pair) => children.push(pair),
                Entry::Positional(node) => {
                    if node.kind != SyntaxKind::Group {
                        self.diagnostics.push(format!(
                            "line {}, column {}: hash entry without a key",
                            node.span.line, node.span.column
                        ));
                    }
                    children.push(node);
                }
            }
        }
        Ok(SyntaxNode::new(
            SyntaxKind::Hash,
            open.span().to(&self.last),
            children,
        ))
    }

    /// `if`/`while`/`case`/`begin`/`def`/... up to the matching `end`.
    fn parse_keyword_body(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let open = self.bump()?;
        match open.text.as_str() {
            "do" => {
                let (params, body) = self.parse_block_rest(Closer::End, depth + 1)?;
                return Ok(SyntaxNode::new(
                    SyntaxKind::Block { params },
                    open.span().to(&self.last),
                    body,
                ));
            }
            "def" => {
                if let Some(body) = self.skip_def_signature(open, depth)? {
                    return Ok(body);
                }
            }
            _ => {}
        }
        let body = self.scoped(false, |p| p.parse_statements(Closer::End, depth + 1))?;
        self.expect(Closer::End)?;
        Ok(SyntaxNode::new(
            SyntaxKind::Group,
            open.span().to(&self.last),
            body,
        ))
    }

    /// Skips `name(params)` after `def`. An endless definition
    /// (`def name = expr`) is parsed whole and returned.
    fn skip_def_signature(
        &mut self,
        def: &Token,
        depth: usize,
    ) -> Result<Option<SyntaxNode>, ParseError> {
        let mut parens = 0usize;
        while let Some(token) = self.peek() {
            if parens == 0 && (token.pos.line != def.pos.line || token.is_punct(";")) {
                break;
            }
            if parens == 0 && is_closer(token) {
                break;
            }
            self.bump()?;
            if token.is_punct("(") {
                parens += 1;
            } else if token.is_punct(")") {
                parens = parens.saturating_sub(1);
            } else if parens == 0 && token.is_punct("=") {
                let body = self.parse_expression(STATEMENT, depth + 1)?;
                let span = def.span().to(&self.last);
                return Ok(Some(SyntaxNode::new(SyntaxKind::Group, span, vec![body])));
            }
        }
        Ok(None)
    }

    /// `-> (params) { body }` / `-> x do body end`.
    fn parse_stabby_lambda(&mut self, depth: usize) -> Result<SyntaxNode, ParseError> {
        let arrow = self.bump()?;
        let mut params = Vec::new();
        if self.peek().is_some_and(|t| t.is_punct("(")) {
            self.bump()?;
            params = self.parse_params(")")?;
        } else {
            while let Some(token) = self.peek() {
                let in_params = matches!(token.kind, TokenKind::Identifier | TokenKind::Label)
                    || token.is_punct(",")
                    || token.is_punct("*")
                    || token.is_punct("&");
                if !in_params || token.newline_before {
                    break;
                }
                self.bump()?;
                if token.kind != TokenKind::Punctuation || token.text != "," {
                    params.push(token.text.clone());
                }
            }
        }
        let opener = self.peek().ok_or(ParseError::UnexpectedEof {
            expected: "lambda body",
        })?;
        let closer = match opener.kind {
            TokenKind::BraceOpen => Closer::Brace,
            TokenKind::BlockStart if opener.text == "do" => Closer::End,
            _ => return Err(self.unexpected(opener, "`{` or `do`")),
        };
        self.bump()?;
        let (block_params, body) = self.parse_block_rest(closer, depth + 1)?;
        params.extend(block_params);
        Ok(SyntaxNode::new(
            SyntaxKind::CallableBlock { params },
            arrow.span().to(&self.last),
            body,
        ))
    }

    /// After `{`/`do`: optional `|params|`, the body and the closer.
    fn parse_block_rest(
        &mut self,
        closer: Closer,
        depth: usize,
    ) -> Result<(Vec<String>, Vec<SyntaxNode>), ParseError> {
        let params = match self.peek() {
            Some(t) if t.is_punct("||") => {
                self.bump()?;
                Vec::new()
            }
            Some(t) if t.is_punct("|") => {
                self.bump()?;
                self.parse_params("|")?
            }
            _ => Vec::new(),
        };
        let body = self.scoped(false, |p| p.parse_statements(closer, depth))?;
        self.expect(closer)?;
        Ok((params, body))
    }

    /// Parameter names up to `terminator` (consumed): `a`, `b:`, `*c`,
    /// `**d`, `&e`, `(f, g)`. Default values (`x = {}`, `y: []`) and
    /// block-locals are skipped.
    fn parse_params(&mut self, terminator: &str) -> Result<Vec<String>, ParseError> {
        let mut params = Vec::new();
        let mut current = String::new();
        // Open `(`, `[` and `{` groups, from a destructuring pattern or a
        // default value.
        let mut nesting = 0usize;
        let mut skipping = false;
        let mut locals = false;
        loop {
            let token = self.peek().ok_or(ParseError::UnexpectedEof {
                expected: "end of parameter list",
            })?;
            if nesting == 0 && token.is_punct(terminator) {
                self.bump()?;
                break;
            }
            if nesting == 0 && is_closer(token) {
                return Err(self.unexpected(token, "end of parameter list"));
            }
            self.bump()?;
            if locals {
                continue;
            }
            match (token.kind, token.text.as_str()) {
                (TokenKind::BraceOpen, _) | (TokenKind::Punctuation, "[") => nesting += 1,
                (TokenKind::BraceClose, _) | (TokenKind::Punctuation, "]") => {
                    nesting = nesting.saturating_sub(1);
                }
                (TokenKind::Punctuation, "(") => {
                    nesting += 1;
                    if !skipping {
                        current.push('(');
                    }
                }
                (TokenKind::Punctuation, ")") => {
                    nesting = nesting.saturating_sub(1);
                    if !skipping {
                        current.push(')');
                    }
                }
                (TokenKind::Punctuation, ",") if nesting == 0 => {
                    if !current.is_empty() {
                        params.push(std::mem::take(&mut current));
                    }
                    skipping = false;
                }
                (TokenKind::Punctuation, ",") if !skipping => current.push_str(", "),
                (TokenKind::Punctuation, ";") if nesting == 0 => locals = true,
                (TokenKind::Punctuation, "*" | "**" | "&") if current.is_empty() => {
                    current.push_str(&token.text);
                }
                (TokenKind::Punctuation, "=") => skipping = true,
                (TokenKind::Identifier, _) if !skipping => current.push_str(&token.text),
                (TokenKind::Label, _) if !skipping => {
                    current.push_str(&token.text);
                    skipping = true;
                }
                _ => {}
            }
        }
        if !current.is_empty() {
            params.push(current);
        }
        Ok(params)
    }

    fn parse_postfix(&mut self, mut node: SyntaxNode, depth: usize) -> Result<SyntaxNode, ParseError> {
        while let Some(token) = self.peek() {
            let glued = !token.space_before && !token.newline_before;
            if token.is_punct(".") || token.is_punct("&.") {
                self.bump()?;
                node = self.parse_method_call(node, depth)?;
            } else if token.is_punct("::") && glued {
                self.bump()?;
                let constant = self.peek().filter(|t| {
                    t.kind == TokenKind::Identifier
                        && !self.peek_at(1).is_some_and(|p| p.is_punct("(") && !p.space_before)
                });
                let scope = match &node.kind {
                    SyntaxKind::Identifier(scope) => Some(scope.clone()),
                    _ => None,
                };
                match (scope, constant) {
                    (Some(scope), Some(name)) => {
                        self.bump()?;
                        let path = format!("{scope}::{}", name.text);
                        let span = node.span.to(&self.last);
                        node = SyntaxNode::leaf(SyntaxKind::Identifier(path), span);
                    }
                    _ => node = self.parse_method_call(node, depth)?,
                }
            } else if token.is_punct("[") && glued {
                self.bump()?;
                let entries =
                    self.scoped(false, |p| p.parse_entries(Some(Closer::Bracket), depth + 1))?;
                let span = node.span.to(&self.last);
                node = call_node("[]", Some(node), collect_arguments(entries), None, span);
            } else if !token.newline_before
                && (token.kind == TokenKind::BraceOpen
                    || (token.kind == TokenKind::BlockStart
                        && token.text == "do"
                        && !self.in_command_args))
                && accepts_block(&node)
            {
                node = self.attach_block(node, depth)?;
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_method_call(&mut self, receiver: SyntaxNode, depth: usize) -> Result<SyntaxNode, ParseError> {
        let token = self.peek().ok_or(ParseError::UnexpectedEof {
            expected: "method name",
        })?;
        let name = match token.kind {
            // `.()` is shorthand for `.call()`
            TokenKind::Punctuation if token.text == "(" => "call".to_string(),
            // `.[](k)`, `&.[]=(k, v)`
            TokenKind::Punctuation
                if token.text == "["
                    && self.peek_at(1).is_some_and(|t| t.is_punct("]") && !t.space_before) =>
            {
                self.bump()?;
                self.bump()?;
                if self.peek().is_some_and(|t| t.is_punct("=") && !t.space_before) {
                    self.bump()?;
                    "[]=".to_string()
                } else {
                    "[]".to_string()
                }
            }
            TokenKind::Identifier
            | TokenKind::BlockStart
            | TokenKind::BlockEnd
            | TokenKind::Punctuation => {
                self.bump()?;
                token.text.clone()
            }
            _ => return Err(self.unexpected(token, "method name")),
        };
        let args = if self
            .peek()
            .is_some_and(|t| t.is_punct("(") && !t.space_before && !t.newline_before)
        {
            self.bump()?;
            collect_arguments(self.scoped(false, |p| p.parse_entries(Some(Closer::Paren), depth + 1))?)
        } else if self.command_argument_follows() {
            collect_arguments(self.scoped(true, |p| p.parse_entries(None, depth + 1))?)
        } else {
            Vec::new()
        };
        let span = receiver.span.to(&self.last);
        Ok(call_node(&name, Some(receiver), args, None, span))
    }

    fn attach_block(&mut self, node: SyntaxNode, depth: usize) -> Result<SyntaxNode, ParseError> {
        let opener = self.bump()?;
        let closer = if opener.kind == TokenKind::BraceOpen {
            Closer::Brace
        } else {
            Closer::End
        };
        let (params, body) = self.parse_block_rest(closer, depth + 1)?;
        let span = node.span.to(&self.last);

        if makes_callable(&node) {
            return Ok(SyntaxNode::new(SyntaxKind::CallableBlock { params }, span, body));
        }
        let block = SyntaxNode::new(
            SyntaxKind::Block { params },
            opener.span().to(&self.last),
            body,
        );
        Ok(match node.kind {
            SyntaxKind::Call {
                name,
                receiver,
                args,
                ..
            } => {
                let mut children = node.children;
                children.push(block);
                SyntaxNode::new(
                    SyntaxKind::Call {
                        name,
                        receiver,
                        args,
                        block: true,
                    },
                    span,
                    children,
                )
            }
            SyntaxKind::Identifier(name) => call_node(&name, None, Vec::new(), Some(block), span),
            _ => SyntaxNode::new(SyntaxKind::Group, span, vec![node, block]),
        })
    }
}

fn accepts_block(node: &SyntaxNode) -> bool {
    matches!(
        node.kind,
        SyntaxKind::Identifier(_) | SyntaxKind::Call { block: false, .. }
    )
}

/// `lambda`, `proc`, `Proc.new` in front of a block make it callable.
fn makes_callable(node: &SyntaxNode) -> bool {
    match &node.kind {
        SyntaxKind::Identifier(name) => name == "lambda" || name == "proc",
        SyntaxKind::Call {
            name,
            receiver: false,
            ..
        } => name == "lambda" || name == "proc",
        SyntaxKind::Call {
            name,
            receiver: true,
            args: 0,
            ..
        } => {
            name == "new"
                && node
                    .receiver()
                    .is_some_and(|r| r.kind == SyntaxKind::Identifier("Proc".to_string()))
        }
        _ => false,
    }
}
