//! Lexical recovery for documents the structural parser rejects.
//!
//! Works on the lossy token stream only: finds known section labels near
//! the top level, then collects the immediate entry names of `actions`,
//! `triggers` and `methods`. No bodies are interpreted, so the salvaged
//! bundle carries no call graph.

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::scanner::{self, ScanError, Token, TokenKind};
use super::syntax_parser::ParseFailure;
use crate::model::{
    AnalysisReport, Bundle, Graph, IrKind, IrNode, Issue, Location, Section, Stats,
};

pub const SALVAGED_NAME: &str = "(salvaged)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalvagedEntry {
    pub name: String,
    pub loc: Location,
}

/// What a lexical pass over a broken document could still find.
#[derive(Debug, Clone, Default)]
pub struct SalvageScan {
    /// Known section keys at the top level, first occurrence, as written.
    pub root_keys: IndexMap<String, Location>,
    pub actions: Vec<SalvagedEntry>,
    pub triggers: Vec<SalvagedEntry>,
    pub methods: Vec<SalvagedEntry>,
    pub scan_errors: Vec<ScanError>,
}

pub fn scan(source: &str) -> SalvageScan {
    let (tokens, scan_errors) = scanner::tokenize_lossy(source);
    let tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Comment)
        .collect();
    let mut found = SalvageScan {
        scan_errors,
        ..SalvageScan::default()
    };

    let mut depth = 0usize;
    // Column of the first section label that starts a line.
    let mut root_column = None;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::BraceOpen => depth += 1,
            TokenKind::BraceClose => depth = depth.saturating_sub(1),
            _ => {}
        }
        let Some((key, value_at)) = entry_key(&tokens, i) else {
            continue;
        };
        let Some(section) = Section::from_key(key) else {
            continue;
        };
        // Lined up with the first section: a sibling, even after an
        // earlier section was left unclosed.
        let aligned = token.newline_before && root_column == Some(token.pos.column);
        if depth > 1 && !aligned {
            continue;
        }
        if token.newline_before {
            root_column.get_or_insert(token.pos.column);
        }
        found
            .root_keys
            .entry(key.to_string())
            .or_insert_with(|| token.span().location());
        let (target, callable) = match section {
            Section::Actions => (&mut found.actions, false),
            Section::Triggers => (&mut found.triggers, false),
            Section::Methods => (&mut found.methods, true),
            _ => continue,
        };
        if target.is_empty() {
            let sibling_column = token.newline_before.then_some(token.pos.column);
            *target = section_entries(source, &tokens, value_at, callable, sibling_column);
        }
    }
    found
}

/// `name:` or `'name' =>` at `i`; returns the key and the index of the value token.
fn entry_key(tokens: &[Token], i: usize) -> Option<(&str, usize)> {
    let token = &tokens[i];
    match token.kind {
        TokenKind::Label => Some((token.value.as_deref()?, i + 1)),
        TokenKind::StringLiteral | TokenKind::SymbolLiteral
            if tokens.get(i + 1).is_some_and(|t| t.is_punct("=>")) =>
        {
            Some((token.value.as_deref()?, i + 2))
        }
        _ => None,
    }
}

/// Names directly inside the `{ ... }` that starts at `tokens[open_at]`,
/// up to its closing brace. A section whose value is not an inline hash
/// yields nothing. When the hash is never closed, a known section label
/// starting a line at or left of `sibling_column` ends it instead.
fn section_entries(
    source: &str,
    tokens: &[Token],
    open_at: usize,
    callable: bool,
    sibling_column: Option<usize>,
) -> Vec<SalvagedEntry> {
    if !tokens.get(open_at).is_some_and(|t| t.kind == TokenKind::BraceOpen) {
        return Vec::new();
    }

    let mut entries = Vec::new();
    let (mut braces, mut blocks, mut parens) = (0usize, 0usize, 0usize);
    for (j, token) in tokens.iter().enumerate().skip(open_at + 1) {
        match token.kind {
            TokenKind::BraceOpen => braces += 1,
            TokenKind::BraceClose if braces == 0 => break,
            TokenKind::BraceClose => braces -= 1,
            TokenKind::BlockStart => blocks += 1,
            TokenKind::BlockEnd => blocks = blocks.saturating_sub(1),
            TokenKind::Punctuation => match token.text.as_str() {
                "(" | "[" => parens += 1,
                ")" | "]" => parens = parens.saturating_sub(1),
                _ => {}
            },
            _ => {}
        }
        if braces > 0 || blocks > 0 || parens > 0 {
            continue;
        }
        if let Some((name, value_at)) = entry_key(tokens, j) {
            let sibling = token.newline_before
                && sibling_column.is_some_and(|column| token.pos.column <= column)
                && Section::from_key(name).is_some();
            if sibling {
                break;
            }
            let length = entry_end(source, tokens, value_at, callable)
                .map(|end| end.saturating_sub(token.offset));
            entries.push(SalvagedEntry {
                name: name.to_string(),
                loc: Location {
                    line: Some(token.pos.line),
                    column: Some(token.pos.column),
                    length,
                },
            });
        }
    }
    entries
}

/// End offset of an entry's value when it can be delimited lexically.
fn entry_end(source: &str, tokens: &[Token], value_at: usize, callable: bool) -> Option<usize> {
    let value = tokens.get(value_at)?;
    let span = match value.kind {
        TokenKind::BraceOpen => scanner::extract_delimited(source, value.offset, '{', '}'),
        TokenKind::Identifier | TokenKind::Punctuation if callable => {
            scanner::extract_block(source, value.offset)
        }
        _ => return None,
    };
    span.ok().map(|s| s.end())
}

/// Builds the degraded bundle for a document the parser gave up on.
pub fn recover(source: &str, failure: &ParseFailure, filename: &str) -> Bundle {
    warn!(error = %failure.error, "structural parse failed; salvaging");
    let found = scan(source);

    let mut keys: Vec<&str> = found.root_keys.keys().map(String::as_str).collect();
    keys.sort_unstable();
    let mut root = IrNode::new(IrKind::Connector, SALVAGED_NAME, Location::unknown())
        .with_meta("filename", filename)
        .with_meta("root_keys", keys);

    let mut stats = Stats::new();
    for (section, group_kind, kind, entries) in [
        (Section::Actions, IrKind::Actions, IrKind::Action, &found.actions),
        (Section::Triggers, IrKind::Triggers, IrKind::Trigger, &found.triggers),
        (Section::Methods, IrKind::Methods, IrKind::Method, &found.methods),
    ] {
        let loc = found
            .root_keys
            .get(section.key())
            .copied()
            .unwrap_or_default();
        let mut group = IrNode::new(group_kind, section.key(), loc);
        group.children = entries
            .iter()
            .map(|e| IrNode::new(kind, e.name.as_str(), e.loc))
            .collect();
        stats.insert(section.key().to_string(), entries.len() as u64);
        root.children.push(group);
    }
    stats.insert("suppressed_warnings".into(), 0);

    let mut diagnostics = failure.diagnostics.clone();
    diagnostics.push(failure.error.to_string());
    diagnostics.extend(found.scan_errors.iter().map(ToString::to_string));
    let issue = Issue::error(
        "syntax_error",
        format!("Structural parse failed, salvaged what a lexical scan could find: {}", failure.error),
    )
    .at(failure.error.location())
    .with("diagnostics", diagnostics);

    debug!(
        actions = found.actions.len(),
        triggers = found.triggers.len(),
        methods = found.methods.len(),
        "salvage complete"
    );
    Bundle::new(root, vec![issue], Graph::new(), stats, true, AnalysisReport::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[SalvagedEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[test]
    fn test_scan_sections() {
        let source = r#"
{
  title: 'Broken',
  methods: {
    helper: lambda do |x|
      if x
        { nested: 1 }
      end
    end,
    'other' => lambda { |y| y }
  },
  actions: {
    first: {
      execute: lambda do |connection, input|
        get('/a')
      end
    },
    second: {
      execute: lambda { get("/b) }
    }
  }
}
"#;
        let found = scan(source);
        assert_eq!(names(&found.methods), vec!["helper", "other"]);
        assert_eq!(names(&found.actions), vec!["first", "second"]);
        assert!(found.triggers.is_empty());
        assert!(!found.scan_errors.is_empty());
        assert_eq!(found.methods[0].loc.line, Some(5));
        assert!(found.methods[0].loc.length.is_some());
        let keys: Vec<&str> = found.root_keys.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["title", "methods", "actions"]);
    }

    #[test]
    fn test_section_via_variable_yields_nothing() {
        let found = scan("{ title: 'x', actions: ACTIONS, triggers: { t: {} } }");
        assert!(found.actions.is_empty());
        assert_eq!(names(&found.triggers), vec!["t"]);
    }

    #[test]
    fn test_section_ends_at_its_closing_brace() {
        let source = "{\n  actions: { a: {} }, triggers: { t: { execute: lambda { get('/t) } } }\n}\n";
        let found = scan(source);
        assert_eq!(names(&found.actions), vec!["a"]);
        assert_eq!(names(&found.triggers), vec!["t"]);
        assert!(!found.scan_errors.is_empty());
    }

    #[test]
    fn test_unclosed_section_stops_at_aligned_sibling() {
        let source = r#"
{
  actions: {
    a: { execute: lambda { get('/a') } },
  triggers: {
    t: { execute: lambda { get('/t) } }
  }
}
"#;
        let found = scan(source);
        assert_eq!(names(&found.actions), vec!["a"]);
        assert_eq!(names(&found.triggers), vec!["t"]);
        let keys: Vec<&str> = found.root_keys.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["actions", "triggers"]);
    }

    #[test]
    fn test_nested_labels_ignored() {
        let found = scan("{ actions: { a: { execute: 1, triggers: { b: 2 } } } }");
        assert_eq!(names(&found.actions), vec!["a"]);
        assert!(found.triggers.is_empty());
    }
}
