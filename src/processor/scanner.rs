//! Hand-written scanner for connector documents.
//!
//! Breaks the raw source into `Token`s while tracking quote, escape and
//! comment state, so that nothing inside a string, regex, heredoc or
//! comment is ever mistaken for structural punctuation. Keywords are only
//! classified as far as the layers above need: `do`/`begin`/`if`/... that
//! open a body come out as `BlockStart`, `end` as `BlockEnd`, and trailing
//! modifiers (`x if y`) stay plain identifiers.
//
//  Lexical items (informal):
//
//      Label      ::= IDENT ':'            (not '::')   |  STRING ':'
//      Symbol     ::= ':' IDENT  |  ':' STRING  |  ':' OPERATOR
//      String     ::= '...' | "..." (with #{...}) | %q() %Q() %() | heredoc
//      Words      ::= %w[] %i[] %W[] %I[]
//      Regex      ::= /.../flags | %r{...}flags
//      Command    ::= `...` | %x()
//      Comment    ::= '#' .* EOL | =begin ... =end
//
//  The scanner runs in two modes. Strict mode (`tokenize`) stops at the
//  first malformed literal. Lossy mode (`tokenize_lossy`) records the error,
//  degrades the literal's opening character to an `Other` token and keeps
//  going; salvage relies on that.

use thiserror::Error;

use super::ast::Span;

const MAX_INTERPOLATION_DEPTH: usize = 32;

const PUNCTUATION: &[&str] = &[
    "**=", "<=>", "===", "...", "<<=", ">>=", "&&=", "||=", "&.", "::", "->", "=>", "==", "!=",
    "=~", "!~", "<=", ">=", "&&", "||", "<<", ">>", "**", "+=", "-=", "*=", "/=", "%=", "|=",
    "&=", "^=", "..", "(", ")", "[", "]", ",", ".", ";", "+", "-", "*", "/", "%", "=", "<",
    ">", "!", "&", "|", "^", "~", "?", ":",
];

const OPERATOR_SYMBOLS: &[&str] = &[
    "[]=", "[]", "<=>", "===", "==", "=~", "!=", "!~", "**", "<=", ">=", "<<", ">>", "+@", "-@",
    "+", "-", "*", "/", "%", "<", ">", "!", "&", "|", "^", "~",
];

/// Identifiers after which a value (and therefore a regex or percent
/// literal) is expected rather than an operator.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "and", "or", "not", "then", "else", "elsif", "when", "in", "rescue", "ensure", "if", "unless",
    "while", "until", "do",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    /// `name:` or `"name":` keyword-argument / hash key.
    Label,
    StringLiteral,
    SymbolLiteral,
    /// Backtick or `%x` command substitution.
    CommandLiteral,
    RegexLiteral,
    /// `%w[]` / `%i[]` word arrays.
    WordList,
    Numeral,
    Punctuation,
    BlockStart,
    BlockEnd,
    BraceOpen,
    BraceClose,
    Comment,
    Other,
}

/// 1-based line, 0-based column (in characters).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token.
    pub text: String,
    pub pos: Position,
    /// Byte offset of the first character.
    pub offset: usize,
    /// Cooked value for labels, symbols and strings; `None` when the
    /// literal interpolates and therefore has no static value.
    pub value: Option<String>,
    /// Tokens of `#{...}` segments, in source order.
    pub nested: Vec<Token>,
    pub space_before: bool,
    pub newline_before: bool,
}

impl Token {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == punct
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Identifier && self.text == name
    }

    pub fn span(&self) -> Span {
        Span {
            offset: self.offset,
            length: self.text.len(),
            line: self.pos.line,
            column: self.pos.column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("unterminated {kind} starting at line {line}, column {column}")]
    UnterminatedLiteral {
        kind: &'static str,
        line: usize,
        column: usize,
    },
    #[error("unbalanced '{open}' starting at line {line}, column {column}")]
    UnbalancedDelimiter {
        open: String,
        offset: usize,
        line: usize,
        column: usize,
    },
    #[error("expected {expected} at byte offset {offset}")]
    ExpectedOpener { expected: String, offset: usize },
    #[error("interpolation nested deeper than {limit} levels at line {line}")]
    NestingTooDeep { limit: usize, line: usize },
}

/// Tokenize the whole document, failing on the first malformed literal.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ScanError> {
    Scanner::new(source).collect()
}

/// Tokenize the whole document without ever failing. Malformed literals are
/// reported in the returned error list and their opener becomes `Other`.
pub fn tokenize_lossy(source: &str) -> (Vec<Token>, Vec<ScanError>) {
    let mut scanner = Scanner::lossy(source);
    let tokens = scanner.by_ref().filter_map(Result::ok).collect();
    (tokens, scanner.into_errors())
}

/// Returns the span from `start` (which must hold `open`) through the
/// matching `close`, respecting nesting, strings, escapes and comments.
pub fn extract_delimited(
    source: &str,
    start: usize,
    open: char,
    close: char,
) -> Result<Span, ScanError> {
    if !source.get(start..).is_some_and(|rest| rest.starts_with(open)) {
        return Err(ScanError::ExpectedOpener {
            expected: format!("'{open}'"),
            offset: start,
        });
    }
    let mut scanner = Scanner::lossy_at(source, start);
    let origin = scanner.position();
    let mut depth = 0usize;
    for token in scanner.by_ref().flatten() {
        if is_delimiter(&token, open) {
            depth += 1;
        } else if is_delimiter(&token, close) {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Ok(span_between(start, token.end(), origin));
            }
        }
    }
    Err(ScanError::UnbalancedDelimiter {
        open: open.to_string(),
        offset: start,
        line: origin.line,
        column: origin.column,
    })
}

/// Returns the span of a callable block starting at `start`: an optional
/// `lambda`/`proc`/`Proc.new`/`->(...)` head followed by either a
/// `do ... end` body (nesting-aware over every block keyword) or a `{ ... }`
/// body. A bare block keyword at `start` is matched with its `end`.
pub fn extract_block(source: &str, start: usize) -> Result<Span, ScanError> {
    if source.get(start..).is_none() {
        return Err(ScanError::ExpectedOpener {
            expected: "block".to_string(),
            offset: start,
        });
    }
    let mut scanner = Scanner::lossy_at(source, start);
    let origin = scanner.position();
    let mut tokens = scanner
        .by_ref()
        .flatten()
        .filter(|t| t.kind != TokenKind::Comment)
        .peekable();

    // Skip the callable head.
    while let Some(token) = tokens.peek() {
        let is_head = token.is_ident("lambda")
            || token.is_ident("proc")
            || token.is_ident("Proc")
            || token.is_ident("new")
            || token.is_punct(".")
            || token.is_punct("->");
        if !is_head {
            break;
        }
        tokens.next();
    }
    if tokens.peek().is_some_and(|t| t.is_punct("(")) {
        let mut parens = 0usize;
        for token in tokens.by_ref() {
            if token.is_punct("(") {
                parens += 1;
            } else if token.is_punct(")") {
                parens = parens.saturating_sub(1);
                if parens == 0 {
                    break;
                }
            }
        }
    }
    while tokens
        .peek()
        .is_some_and(|t| t.kind == TokenKind::Identifier && t.text != "do" || t.is_punct(","))
    {
        tokens.next();
    }

    let Some(opener) = tokens.next() else {
        return Err(ScanError::ExpectedOpener {
            expected: "block".to_string(),
            offset: start,
        });
    };
    let (opens, closes): (fn(&Token) -> bool, fn(&Token) -> bool) = match opener.kind {
        TokenKind::BlockStart => (
            |t| t.kind == TokenKind::BlockStart,
            |t| t.kind == TokenKind::BlockEnd,
        ),
        TokenKind::BraceOpen => (
            |t| t.kind == TokenKind::BraceOpen,
            |t| t.kind == TokenKind::BraceClose,
        ),
        _ => {
            return Err(ScanError::ExpectedOpener {
                expected: "'do' or '{'".to_string(),
                offset: opener.offset,
            });
        }
    };
    let mut depth = 1usize;
    for token in tokens {
        if opens(&token) {
            depth += 1;
        } else if closes(&token) {
            depth -= 1;
            if depth == 0 {
                return Ok(span_between(start, token.end(), origin));
            }
        }
    }
    Err(ScanError::UnbalancedDelimiter {
        open: opener.text,
        offset: opener.offset,
        line: opener.pos.line,
        column: opener.pos.column,
    })
}

fn is_delimiter(token: &Token, ch: char) -> bool {
    matches!(
        token.kind,
        TokenKind::BraceOpen | TokenKind::BraceClose | TokenKind::Punctuation
    ) && token.text.len() == ch.len_utf8()
        && token.text.starts_with(ch)
}

fn span_between(start: usize, end: usize, origin: Position) -> Span {
    Span {
        offset: start,
        length: end - start,
        line: origin.line,
        column: origin.column,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || !c.is_ascii()
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        '{' => '}',
        '<' => '>',
        other => other,
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        's' => ' ',
        'e' => '\u{1b}',
        'a' => '\u{7}',
        'b' => '\u{8}',
        'f' => '\u{c}',
        'v' => '\u{b}',
        other => other,
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    pos: usize,
    line: usize,
    line_start: usize,
    /// Characters between `line_start` and `pos`.
    column: usize,
}

/// Where to continue after the line that introduced one or more heredocs.
#[derive(Debug, Clone, Copy)]
struct HeredocJump {
    body_start: usize,
    resume: Cursor,
}

/// How the previous significant token shapes what may follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prev {
    /// A finished value: literal, `)`, `]`, `}`, `end`.
    Value,
    /// A name that may be a variable or a command taking arguments.
    Ident,
    /// `.`, `&.` or `::`; the next word is a method name, never a keyword.
    Dot,
    /// Operator, opener, separator or expression keyword: a value follows.
    Start,
}

struct QuotedBody {
    cooked: String,
    nested: Vec<Token>,
    dynamic: bool,
}

#[derive(Clone)]
pub struct Scanner<'a> {
    src: &'a str,
    cur: Cursor,
    prev: Option<(Prev, usize)>,
    /// The previous significant token was a ternary `?`.
    after_question: bool,
    heredoc: Option<HeredocJump>,
    loop_do_line: Option<usize>,
    depth: usize,
    lossy: bool,
    errors: Vec<ScanError>,
    finished: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            cur: Cursor {
                pos: 0,
                line: 1,
                line_start: 0,
                column: 0,
            },
            prev: None,
            after_question: false,
            heredoc: None,
            loop_do_line: None,
            depth: 0,
            lossy: false,
            errors: Vec::new(),
            finished: false,
        }
    }

    pub fn lossy(src: &'a str) -> Self {
        Self {
            lossy: true,
            ..Self::new(src)
        }
    }

    /// Lossy scanner positioned at byte `start` of `src`.
    fn lossy_at(src: &'a str, start: usize) -> Self {
        let before = &src[..start];
        let line = 1 + before.matches('\n').count();
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        Self {
            cur: Cursor {
                pos: start,
                line,
                line_start,
                column: src[line_start..start].chars().count(),
            },
            ..Self::lossy(src)
        }
    }

    pub fn into_errors(self) -> Vec<ScanError> {
        self.errors
    }

    fn position(&self) -> Position {
        self.position_of(self.cur)
    }

    fn position_of(&self, at: Cursor) -> Position {
        Position {
            line: at.line,
            column: at.column,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.cur.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.cur.pos += c.len_utf8();
        self.cur.column += 1;
        if c == '\n' {
            self.cur.line += 1;
            self.cur.line_start = self.cur.pos;
            self.cur.column = 0;
            if let Some(jump) = self.heredoc
                && jump.body_start == self.cur.pos
            {
                self.cur = jump.resume;
                self.heredoc = None;
            }
        }
        Some(c)
    }

    /// Skips `len` bytes that are known not to contain a newline.
    fn advance(&mut self, len: usize) {
        let end = self.cur.pos + len;
        self.cur.column += self.src[self.cur.pos..end].chars().count();
        self.cur.pos = end;
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek_char().is_some_and(&pred) {
            self.bump_char();
        }
    }

    fn at_line_start(&self) -> bool {
        self.cur.pos == self.cur.line_start
    }

    fn value_expected(&self) -> bool {
        !matches!(
            self.prev,
            Some((Prev::Value | Prev::Ident | Prev::Dot, _))
        )
    }

    /// `foo /x/`, `foo %w[a]`: a command name followed by a spaced-off
    /// literal opener with no space after it.
    fn command_argument_follows(&self, space_before: bool) -> bool {
        matches!(self.prev, Some((Prev::Ident, _)))
            && space_before
            && self
                .peek_nth(1)
                .is_some_and(|c| !c.is_whitespace() && c != '=')
    }

    fn statement_position(&self, line: usize) -> bool {
        match self.prev {
            None => true,
            Some((class, prev_line)) => {
                prev_line != line || !matches!(class, Prev::Value | Prev::Ident)
            }
        }
    }

    /// Skips whitespace, escaped newlines and `__END__` data. Returns the
    /// (space_before, newline_before) flags for the next token.
    fn skip_trivia(&mut self) -> (bool, bool) {
        let mut space = false;
        let mut newline = false;
        while let Some(c) = self.peek_char() {
            match c {
                ' ' | '\t' | '\r' | '\u{c}' => {
                    space = true;
                    self.bump_char();
                }
                '\n' => {
                    space = true;
                    newline = true;
                    self.bump_char();
                }
                '\\' if matches!(self.peek_nth(1), Some('\n')) => {
                    space = true;
                    self.bump_char();
                    self.bump_char();
                }
                '_' if self.at_line_start() && self.rest().starts_with("__END__") => {
                    let after = self.rest()["__END__".len()..].chars().next();
                    if matches!(after, None | Some('\n') | Some('\r')) {
                        self.cur.pos = self.src.len();
                        self.finished = true;
                    }
                    break;
                }
                _ => break,
            }
        }
        (space, newline)
    }

    fn make(
        &self,
        kind: TokenKind,
        start: Cursor,
        value: Option<String>,
        nested: Vec<Token>,
        flags: (bool, bool),
    ) -> Token {
        Token {
            kind,
            text: self.src[start.pos..self.cur.pos].to_string(),
            pos: self.position_of(start),
            offset: start.pos,
            value,
            nested,
            space_before: flags.0,
            newline_before: flags.1,
        }
    }

    fn unterminated(&self, kind: &'static str, start: Cursor) -> ScanError {
        let pos = self.position_of(start);
        ScanError::UnterminatedLiteral {
            kind,
            line: pos.line,
            column: pos.column,
        }
    }

    fn note_prev(&mut self, token: &Token) {
        let class = match token.kind {
            TokenKind::Comment => return,
            TokenKind::Identifier if EXPRESSION_KEYWORDS.contains(&token.text.as_str()) => {
                Prev::Start
            }
            TokenKind::Identifier => Prev::Ident,
            TokenKind::StringLiteral
            | TokenKind::SymbolLiteral
            | TokenKind::CommandLiteral
            | TokenKind::RegexLiteral
            | TokenKind::WordList
            | TokenKind::Numeral
            | TokenKind::BraceClose
            | TokenKind::BlockEnd => Prev::Value,
            TokenKind::Punctuation => match token.text.as_str() {
                ")" | "]" => Prev::Value,
                "." | "&." | "::" => Prev::Dot,
                _ => Prev::Start,
            },
            TokenKind::Label
            | TokenKind::BlockStart
            | TokenKind::BraceOpen
            | TokenKind::Other => Prev::Start,
        };
        self.prev = Some((class, token.pos.line));
        self.after_question = token.is_punct("?");
    }

    fn scan_token(&mut self, flags: (bool, bool)) -> Result<Token, ScanError> {
        let start = self.cur;
        let Some(c) = self.peek_char() else {
            return Err(self.unterminated("input", start));
        };
        match c {
            '#' => {
                self.bump_while(|c| c != '\n');
                Ok(self.make(TokenKind::Comment, start, None, Vec::new(), flags))
            }
            '=' if self.at_line_start() && self.is_block_comment_start() => {
                self.scan_block_comment(start, flags)
            }
            '\'' | '"' | '`' => {
                self.bump_char();
                let interpolate = c != '\'';
                let kind_name = if c == '`' { "command literal" } else { "string" };
                let body = self.scan_quoted(None, c, interpolate, kind_name, start)?;
                if c != '`'
                    && !body.dynamic
                    && !self.after_question
                    && self.peek_char() == Some(':')
                    && self.peek_nth(1) != Some(':')
                {
                    self.bump_char();
                    return Ok(self.make(
                        TokenKind::Label,
                        start,
                        Some(body.cooked),
                        Vec::new(),
                        flags,
                    ));
                }
                let kind = if c == '`' {
                    TokenKind::CommandLiteral
                } else {
                    TokenKind::StringLiteral
                };
                let value = (!body.dynamic).then_some(body.cooked);
                Ok(self.make(kind, start, value, body.nested, flags))
            }
            '{' => {
                self.bump_char();
                Ok(self.make(TokenKind::BraceOpen, start, None, Vec::new(), flags))
            }
            '}' => {
                self.bump_char();
                Ok(self.make(TokenKind::BraceClose, start, None, Vec::new(), flags))
            }
            ':' => self.scan_colon(start, flags),
            '/' if self.value_expected() => self.scan_regex(start, flags),
            '/' if self.command_argument_follows(flags.0) => {
                let saved = (self.cur, self.heredoc);
                match self.scan_regex(start, flags) {
                    Ok(token) if !token.text.contains('\n') => Ok(token),
                    _ => {
                        (self.cur, self.heredoc) = saved;
                        self.scan_punctuation(start, flags)
                    }
                }
            }
            '%' if self.percent_literal_ahead()
                && (self.value_expected() || self.command_argument_follows(flags.0)) =>
            {
                self.scan_percent(start, flags)
            }
            '<' if self.rest().starts_with("<<")
                && (self.value_expected() || self.command_argument_follows(flags.0))
                && self.heredoc_ahead().is_some() =>
            {
                self.scan_heredoc(start, flags)
            }
            '@' | '$' => {
                self.bump_char();
                if c == '@' && self.peek_char() == Some('@') {
                    self.bump_char();
                }
                if self.peek_char().is_some_and(is_ident_char) {
                    self.bump_while(is_ident_char);
                } else if c == '$' {
                    self.bump_char();
                }
                Ok(self.make(TokenKind::Identifier, start, None, Vec::new(), flags))
            }
            c if c.is_ascii_digit() => {
                self.scan_numeral();
                Ok(self.make(TokenKind::Numeral, start, None, Vec::new(), flags))
            }
            c if is_ident_start(c) => self.scan_word(start, flags),
            _ => self.scan_punctuation(start, flags),
        }
    }

    fn is_block_comment_start(&self) -> bool {
        self.rest().starts_with("=begin")
            && self.rest()["=begin".len()..]
                .chars()
                .next()
                .is_none_or(char::is_whitespace)
    }

    fn scan_block_comment(
        &mut self,
        start: Cursor,
        flags: (bool, bool),
    ) -> Result<Token, ScanError> {
        loop {
            self.bump_while(|c| c != '\n');
            if self.bump_char().is_none() {
                return Err(self.unterminated("block comment", start));
            }
            if self.rest().starts_with("=end") {
                self.bump_while(|c| c != '\n');
                return Ok(self.make(TokenKind::Comment, start, None, Vec::new(), flags));
            }
        }
    }

    fn scan_punctuation(&mut self, start: Cursor, flags: (bool, bool)) -> Result<Token, ScanError> {
        let rest = self.rest();
        let kind = match PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                self.advance(p.len());
                TokenKind::Punctuation
            }
            None => {
                self.bump_char();
                TokenKind::Other
            }
        };
        Ok(self.make(kind, start, None, Vec::new(), flags))
    }

    fn scan_numeral(&mut self) {
        if self.peek_char() == Some('0') && matches!(self.peek_nth(1), Some('x' | 'X' | 'b' | 'B' | 'o' | 'O')) {
            self.bump_char();
            self.bump_char();
            self.bump_while(|c| c.is_ascii_hexdigit() || c == '_');
            return;
        }
        self.bump_while(|c| c.is_ascii_digit() || c == '_');
        if self.peek_char() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump_char();
            self.bump_while(|c| c.is_ascii_digit() || c == '_');
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let digit_at = if matches!(self.peek_nth(1), Some('+' | '-')) { 2 } else { 1 };
            if self.peek_nth(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.bump_char();
                }
                self.bump_while(|c| c.is_ascii_digit());
            }
        }
    }

    fn scan_word(&mut self, start: Cursor, flags: (bool, bool)) -> Result<Token, ScanError> {
        self.bump_while(is_ident_char);
        if matches!(self.peek_char(), Some('?' | '!')) && self.peek_nth(1) != Some('=') {
            self.bump_char();
        }
        let src = self.src;
        let name = &src[start.pos..self.cur.pos];
        if self.peek_char() == Some(':')
            && self.peek_nth(1) != Some(':')
            && !self.after_question
        {
            let name = name.to_string();
            self.bump_char();
            return Ok(self.make(TokenKind::Label, start, Some(name), Vec::new(), flags));
        }

        let after_dot = matches!(self.prev, Some((Prev::Dot, _)));
        let line = start.line;
        let kind = match name {
            _ if after_dot => TokenKind::Identifier,
            "end" => TokenKind::BlockEnd,
            "do" => {
                if self.loop_do_line == Some(line) {
                    self.loop_do_line = None;
                    TokenKind::Identifier
                } else {
                    TokenKind::BlockStart
                }
            }
            "begin" | "case" | "def" | "class" | "module" => TokenKind::BlockStart,
            "if" | "unless" if self.statement_position(line) => TokenKind::BlockStart,
            "while" | "until" | "for" if self.statement_position(line) => {
                self.loop_do_line = Some(line);
                TokenKind::BlockStart
            }
            _ => TokenKind::Identifier,
        };
        Ok(self.make(kind, start, None, Vec::new(), flags))
    }

    fn scan_colon(&mut self, start: Cursor, flags: (bool, bool)) -> Result<Token, ScanError> {
        let next = self.peek_nth(1);
        if next == Some(':') {
            return self.scan_punctuation(start, flags);
        }
        if let Some(quote @ ('"' | '\'')) = next {
            self.bump_char();
            self.bump_char();
            let body = self.scan_quoted(None, quote, quote == '"', "symbol", start)?;
            let value = (!body.dynamic).then_some(body.cooked);
            return Ok(self.make(TokenKind::SymbolLiteral, start, value, body.nested, flags));
        }
        if next.is_some_and(is_ident_start) {
            self.bump_char();
            let name_start = self.cur.pos;
            self.bump_while(is_ident_char);
            if matches!(self.peek_char(), Some('?' | '!')) && self.peek_nth(1) != Some('=') {
                self.bump_char();
            }
            let name = self.src[name_start..self.cur.pos].to_string();
            return Ok(self.make(TokenKind::SymbolLiteral, start, Some(name), Vec::new(), flags));
        }
        if self.value_expected() {
            let after = &self.rest()[1..];
            if let Some(op) = OPERATOR_SYMBOLS.iter().find(|op| after.starts_with(**op)) {
                self.advance(1 + op.len());
                let value = Some((*op).to_string());
                return Ok(self.make(TokenKind::SymbolLiteral, start, value, Vec::new(), flags));
            }
        }
        self.scan_punctuation(start, flags)
    }

    fn scan_regex(&mut self, start: Cursor, flags: (bool, bool)) -> Result<Token, ScanError> {
        self.bump_char();
        let body = self.scan_quoted(None, '/', true, "regex", start)?;
        self.bump_while(|c| c.is_ascii_lowercase());
        Ok(self.make(TokenKind::RegexLiteral, start, None, body.nested, flags))
    }

    fn percent_literal_ahead(&self) -> bool {
        let mut chars = self.rest().chars().skip(1);
        match chars.next() {
            Some('w' | 'W' | 'i' | 'I' | 'q' | 'Q' | 'r' | 's' | 'x') => chars
                .next()
                .is_some_and(|d| !d.is_alphanumeric() && !d.is_whitespace()),
            Some('(' | '[' | '{' | '<' | '|' | '!' | '^') => true,
            _ => false,
        }
    }

    fn scan_percent(&mut self, start: Cursor, flags: (bool, bool)) -> Result<Token, ScanError> {
        self.bump_char();
        let kind_char = match self.peek_char() {
            Some(c) if c.is_ascii_alphabetic() => {
                self.bump_char();
                c
            }
            _ => 'Q',
        };
        let Some(open) = self.bump_char() else {
            return Err(self.unterminated("percent literal", start));
        };
        let close = closing_for(open);
        let paired = (open != close).then_some(open);
        let interpolate = matches!(kind_char, 'W' | 'I' | 'Q' | 'r' | 'x');
        let body = self.scan_quoted(paired, close, interpolate, "percent literal", start)?;
        let (kind, value) = match kind_char {
            'w' | 'W' | 'i' | 'I' => (TokenKind::WordList, Some(body.cooked)),
            'r' => {
                self.bump_while(|c| c.is_ascii_lowercase());
                (TokenKind::RegexLiteral, None)
            }
            's' => (TokenKind::SymbolLiteral, Some(body.cooked)),
            'x' => (TokenKind::CommandLiteral, None),
            _ => (TokenKind::StringLiteral, (!body.dynamic).then_some(body.cooked)),
        };
        Ok(self.make(kind, start, value, body.nested, flags))
    }

    /// Returns (marker length, terminator, squiggly_or_dash, interpolate).
    fn heredoc_ahead(&self) -> Option<(usize, String, bool, bool)> {
        let rest = &self.rest()[2..];
        let (indent, rest, mut len) = match rest.chars().next() {
            Some('~' | '-') => (true, &rest[1..], 3),
            _ => (false, rest, 2),
        };
        let (quote, rest) = match rest.chars().next() {
            Some(q @ ('\'' | '"')) => (Some(q), &rest[1..]),
            _ => (None, rest),
        };
        let ident_len = rest
            .char_indices()
            .find(|(_, c)| !is_ident_char(*c))
            .map_or(rest.len(), |(i, _)| i);
        let ident = &rest[..ident_len];
        let first = ident.chars().next()?;
        if !is_ident_start(first) || (!indent && quote.is_none() && !first.is_ascii_uppercase()) {
            return None;
        }
        len += ident_len;
        if let Some(q) = quote {
            if !rest[ident_len..].starts_with(q) {
                return None;
            }
            len += 2;
        }
        Some((len, ident.to_string(), indent, quote != Some('\'')))
    }

    fn scan_heredoc(&mut self, start: Cursor, flags: (bool, bool)) -> Result<Token, ScanError> {
        let Some((marker_len, terminator, indent, interpolate)) = self.heredoc_ahead() else {
            return self.scan_punctuation(start, flags);
        };
        self.advance(marker_len);

        let body_start = match self.heredoc {
            Some(jump) => jump.resume.pos,
            None => match self.rest().find('\n') {
                Some(i) => self.cur.pos + i + 1,
                None => return Err(self.unterminated("heredoc", start)),
            },
        };
        let mut line_start = body_start;
        let (body_end, resume) = loop {
            if line_start >= self.src.len() {
                return Err(self.unterminated("heredoc", start));
            }
            let line_end = self.src[line_start..]
                .find('\n')
                .map_or(self.src.len(), |i| line_start + i);
            let line = self.src[line_start..line_end].trim_end_matches('\r');
            let candidate = if indent { line.trim() } else { line };
            if candidate == terminator {
                break (line_start, (line_end + 1).min(self.src.len()));
            }
            line_start = line_end + 1;
        };

        let skipped = &self.src[self.cur.pos..resume];
        let resume_line_start = self.src[..resume].rfind('\n').map_or(0, |i| i + 1);
        let resume_cursor = Cursor {
            pos: resume,
            line: self.cur.line + skipped.matches('\n').count(),
            line_start: resume_line_start,
            column: self.src[resume_line_start..resume].chars().count(),
        };
        let first_body_start = self.heredoc.map_or(body_start, |jump| jump.body_start);
        self.heredoc = Some(HeredocJump {
            body_start: first_body_start,
            resume: resume_cursor,
        });

        let body = &self.src[body_start..body_end];
        let value = (!(interpolate && body.contains("#{"))).then(|| body.to_string());
        Ok(self.make(TokenKind::StringLiteral, start, value, Vec::new(), flags))
    }

    /// Scans the body of a quoted literal whose opener has been consumed.
    fn scan_quoted(
        &mut self,
        open: Option<char>,
        close: char,
        interpolate: bool,
        kind: &'static str,
        start: Cursor,
    ) -> Result<QuotedBody, ScanError> {
        let mut body = QuotedBody {
            cooked: String::new(),
            nested: Vec::new(),
            dynamic: false,
        };
        let mut depth = 0usize;
        loop {
            let Some(c) = self.bump_char() else {
                return Err(self.unterminated(kind, start));
            };
            if c == '\\' {
                let Some(escaped) = self.bump_char() else {
                    return Err(self.unterminated(kind, start));
                };
                if interpolate {
                    body.cooked.push(unescape(escaped));
                } else if escaped == close || escaped == '\\' || Some(escaped) == open {
                    body.cooked.push(escaped);
                } else {
                    body.cooked.push('\\');
                    body.cooked.push(escaped);
                }
                continue;
            }
            if interpolate && c == '#' {
                match self.peek_char() {
                    Some('{') => {
                        self.bump_char();
                        let nested = self.scan_interpolation(start, kind)?;
                        body.nested.extend(nested);
                        body.dynamic = true;
                        continue;
                    }
                    Some('@' | '$') => body.dynamic = true,
                    _ => {}
                }
            }
            if open == Some(c) {
                depth += 1;
            } else if c == close {
                if depth == 0 {
                    return Ok(body);
                }
                depth -= 1;
            }
            body.cooked.push(c);
        }
    }

    /// Tokenizes the code inside `#{ ... }`; the `#{` has been consumed and
    /// the closing `}` is consumed here.
    fn scan_interpolation(
        &mut self,
        start: Cursor,
        kind: &'static str,
    ) -> Result<Vec<Token>, ScanError> {
        if self.depth >= MAX_INTERPOLATION_DEPTH {
            return Err(ScanError::NestingTooDeep {
                limit: MAX_INTERPOLATION_DEPTH,
                line: self.cur.line,
            });
        }
        self.depth += 1;
        let saved_prev = self.prev.take();
        let saved_question = std::mem::take(&mut self.after_question);
        let saved_loop = self.loop_do_line.take();
        let mut tokens = Vec::new();
        let mut braces = 0usize;
        let result = loop {
            let flags = self.skip_trivia();
            match self.peek_char() {
                None => break Err(self.unterminated(kind, start)),
                Some('}') if braces == 0 => {
                    self.bump_char();
                    break Ok(());
                }
                Some(_) => {}
            }
            let token = match self.scan_token(flags) {
                Ok(token) => token,
                Err(e) => break Err(e),
            };
            match token.kind {
                TokenKind::BraceOpen => braces += 1,
                TokenKind::BraceClose => braces = braces.saturating_sub(1),
                _ => {}
            }
            self.note_prev(&token);
            tokens.push(token);
        };
        self.prev = saved_prev;
        self.after_question = saved_question;
        self.loop_do_line = saved_loop;
        self.depth -= 1;
        result.map(|()| tokens)
    }

    /// Lossy recovery: the first character of the failed literal becomes an
    /// `Other` token and scanning resumes right after it.
    fn degrade(&mut self, start: Cursor, flags: (bool, bool)) -> Token {
        self.bump_char();
        self.make(TokenKind::Other, start, None, Vec::new(), flags)
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Token, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let flags = self.skip_trivia();
        if self.finished || self.peek_char().is_none() {
            self.finished = true;
            return None;
        }

        let snapshot = (self.cur, self.heredoc, self.loop_do_line);
        match self.scan_token(flags) {
            Ok(token) => {
                self.note_prev(&token);
                Some(Ok(token))
            }
            Err(error) if self.lossy => {
                (self.cur, self.heredoc, self.loop_do_line) = snapshot;
                self.errors.push(error);
                let token = self.degrade(snapshot.0, flags);
                self.note_prev(&token);
                Some(Ok(token))
            }
            Err(error) => {
                self.finished = true;
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_tokenisation() {
        use TokenKind::*;
        let test_cases = vec![
            (
                "{ title: 'Demo', actions: {} }",
                vec![
                    (BraceOpen, "{"),
                    (Label, "title:"),
                    (StringLiteral, "'Demo'"),
                    (Punctuation, ","),
                    (Label, "actions:"),
                    (BraceOpen, "{"),
                    (BraceClose, "}"),
                    (BraceClose, "}"),
                ],
            ),
            (
                "call(:fetch, 'x') # trailing {",
                vec![
                    (Identifier, "call"),
                    (Punctuation, "("),
                    (SymbolLiteral, ":fetch"),
                    (Punctuation, ","),
                    (StringLiteral, "'x'"),
                    (Punctuation, ")"),
                    (Comment, "# trailing {"),
                ],
            ),
            (
                "execute: lambda do |a, b| end",
                vec![
                    (Label, "execute:"),
                    (Identifier, "lambda"),
                    (BlockStart, "do"),
                    (Punctuation, "|"),
                    (Identifier, "a"),
                    (Punctuation, ","),
                    (Identifier, "b"),
                    (Punctuation, "|"),
                    (BlockEnd, "end"),
                ],
            ),
            (
                "a = b / 2",
                vec![
                    (Identifier, "a"),
                    (Punctuation, "="),
                    (Identifier, "b"),
                    (Punctuation, "/"),
                    (Numeral, "2"),
                ],
            ),
            (
                "x.gsub(/'\"{/, '')",
                vec![
                    (Identifier, "x"),
                    (Punctuation, "."),
                    (Identifier, "gsub"),
                    (Punctuation, "("),
                    (RegexLiteral, "/'\"{/"),
                    (Punctuation, ","),
                    (StringLiteral, "''"),
                    (Punctuation, ")"),
                ],
            ),
        ];

        for (src, expected) in test_cases {
            let expected: Vec<(TokenKind, String)> = expected
                .into_iter()
                .map(|(k, t)| (k, t.to_string()))
                .collect();
            assert_eq!(kinds(src), expected, "source: {src}");
        }
    }

    #[test]
    fn test_string_escapes_and_labels() {
        let tokens = tokenize(r#"{ 'it\'s': "a\"b", "k": 1 }"#).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Label);
        assert_eq!(tokens[1].value.as_deref(), Some("it's"));
        assert_eq!(tokens[2].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[2].value.as_deref(), Some("a\"b"));
        assert_eq!(tokens[4].kind, TokenKind::Label);
        assert_eq!(tokens[4].value.as_deref(), Some("k"));
    }

    #[test]
    fn test_comment_contents_are_not_structural() {
        let tokens = tokenize("a # } ) ]\nb").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].kind, TokenKind::Comment);
        assert!(tokens[2].newline_before);
        assert_eq!(tokens[2].pos, Position { line: 2, column: 0 });
    }

    #[test]
    fn test_interpolation_is_tokenized() {
        let tokens = tokenize(r##"get("#{base}/v1/#{call('path', "x}")}")"##).unwrap();
        let literal = &tokens[2];
        assert_eq!(literal.kind, TokenKind::StringLiteral);
        assert_eq!(literal.value, None);
        let nested: Vec<&str> = literal.nested.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            nested,
            vec!["base", "call", "(", "'path'", ",", "\"x}\"", ")"]
        );
        assert!(tokens[3].is_punct(")"));
    }

    #[test]
    fn test_keyword_modifiers_are_not_block_starts() {
        let tokens = tokenize("return nil if x\nif y\nend\nwhile z do\nend").unwrap();
        let starts: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::BlockStart)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(starts, vec!["if", "while"]);
        let ends = tokens.iter().filter(|t| t.kind == TokenKind::BlockEnd).count();
        assert_eq!(ends, 2);
    }

    #[test]
    fn test_method_names_after_dot_are_identifiers() {
        let tokens = tokenize("range.end + obj.class.name").unwrap();
        assert!(tokens.iter().all(|t| t.kind != TokenKind::BlockEnd));
        assert!(tokens.iter().all(|t| t.kind != TokenKind::BlockStart));
    }

    #[test]
    fn test_columns_on_long_lines() {
        let line = "a, ".repeat(20_000);
        let tokens = tokenize(&line).unwrap();
        let last = tokens.last().unwrap();
        assert_eq!(last.pos, Position { line: 1, column: 3 * 20_000 - 2 });

        let tokens = tokenize("é日 = 1\n  x = <<~A + 'z'\n  body\n  A\n  y").unwrap();
        let found: Vec<(&str, Position)> = tokens.iter().map(|t| (t.text.as_str(), t.pos)).collect();
        assert_eq!(found[1], ("=", Position { line: 1, column: 3 }));
        assert_eq!(found[7], ("'z'", Position { line: 2, column: 13 }));
        assert_eq!(found[8], ("y", Position { line: 5, column: 2 }));
    }

    #[test]
    fn test_ternary_branches_are_not_labels() {
        use TokenKind::*;
        let test_cases = vec![
            ("ok ? 'yes': 'no'", vec![Identifier, Punctuation, StringLiteral, Punctuation, StringLiteral]),
            ("ok ? yes: no", vec![Identifier, Punctuation, Identifier, Punctuation, Identifier]),
            ("x.nil? ? a : b", vec![Identifier, Punctuation, Identifier, Punctuation, Identifier, Punctuation, Identifier]),
            ("{ a: x ? 1 : 2, b: 3 }", vec![BraceOpen, Label, Identifier, Punctuation, Numeral, Punctuation, Numeral, Punctuation, Label, Numeral, BraceClose]),
        ];
        for (src, expected) in test_cases {
            let found: Vec<TokenKind> = tokenize(src).unwrap().into_iter().map(|t| t.kind).collect();
            assert_eq!(found, expected, "source: {src}");
        }
    }

    #[test]
    fn test_heredoc_body_is_skipped() {
        let src = "x = <<~SQL\n  select { from\n  SQL\ny = 1";
        let tokens = tokenize(src).unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["x", "=", "<<~SQL", "y", "=", "1"]);
        assert_eq!(tokens[2].value.as_deref(), Some("  select { from\n"));
        assert_eq!(tokens[3].pos.line, 4);
    }

    #[test]
    fn test_percent_literals() {
        let tokens = tokenize("%w[a b] + %q(it's (nested))").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::WordList);
        assert_eq!(tokens[0].value.as_deref(), Some("a b"));
        assert_eq!(tokens[2].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[2].value.as_deref(), Some("it's (nested)"));
    }

    #[test]
    fn test_backticks_are_command_literals() {
        let tokens = tokenize("`ls -la`").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::CommandLiteral);
    }

    #[test]
    fn test_unterminated_string_strict_and_lossy() {
        let src = "{ a: 'oops,\n  b: 1 }";
        let err = tokenize(src).unwrap_err();
        assert_eq!(
            err,
            ScanError::UnterminatedLiteral {
                kind: "string",
                line: 1,
                column: 5
            }
        );

        let (tokens, errors) = tokenize_lossy(src);
        assert_eq!(errors.len(), 1);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Other && t.text == "'"));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Label && t.text == "b:"));
    }

    #[test]
    fn test_extract_delimited() {
        let src = "x = { a: '}', b: { c: \"{\" } } # }\nrest";
        let start = src.find('{').unwrap();
        let span = extract_delimited(src, start, '{', '}').unwrap();
        assert_eq!(&src[span.offset..span.offset + span.length], "{ a: '}', b: { c: \"{\" } }");
        assert_eq!((span.line, span.column), (1, 4));

        let unbalanced = "{ a: [1, 2 }";
        assert!(matches!(
            extract_delimited(unbalanced, 5, '[', ']'),
            Err(ScanError::UnbalancedDelimiter { .. })
        ));
        assert!(matches!(
            extract_delimited(src, 0, '{', '}'),
            Err(ScanError::ExpectedOpener { .. })
        ));
    }

    #[test]
    fn test_extract_block() {
        let src = "m: lambda do |x|\n  if x\n    y\n  end\n  [1].each do |i| i end\nend, n: 1";
        let start = src.find("lambda").unwrap();
        let span = extract_block(src, start).unwrap();
        let text = &src[span.offset..span.offset + span.length];
        assert!(text.starts_with("lambda do"));
        assert!(text.ends_with("i end\nend"));

        let braces = "->(a) { { b: a } }.call";
        let span = extract_block(braces, 0).unwrap();
        assert_eq!(span.length, "->(a) { { b: a } }".len());

        let open = "lambda do |x| if x then y end";
        assert!(matches!(
            extract_block(open, 0),
            Err(ScanError::UnbalancedDelimiter { .. })
        ));
    }
}
