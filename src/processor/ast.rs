//! Syntax tree produced by the structural parser.
//!
//! The tree is shallow. Hashes, arrays, pairs, calls, callable blocks and
//! literals get their own nodes; operators and control flow are flattened
//! into `Group` nodes that later passes still walk into.

use crate::model::Location;

/// Source extent of a node or token. `line` is 1-based, `column` 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    /// From the start of `self` to the end of `last`.
    pub fn to(&self, last: &Span) -> Span {
        Span {
            length: last.end().saturating_sub(self.offset),
            ..*self
        }
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.offset <= other.offset && other.end() <= self.end()
    }

    pub fn location(&self) -> Location {
        Location::new(self.line, self.column, self.length)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `'text'`, `"text"`, `%q()`, heredocs without interpolation.
    Str(String),
    /// A string with `#{}`; the interpolated code hangs off the node.
    DynamicStr,
    /// `:name`, `:"name"`.
    Symbol(String),
    DynamicSymbol,
    /// Backticks or `%x()`.
    Command,
    Regex,
    Number(String),
    /// `%w[a b]`, `%i[a b]`.
    Words(Vec<String>),
    Nil,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxKind {
    /// Top-level statement list.
    Program,
    /// `{ k => v, k: v }`, also implicit trailing hashes in argument lists.
    /// Children are `Pair`s (plus `**splat` operands).
    Hash,
    Array,
    /// Children: `[key, value]`.
    Pair,
    /// `recv.name(args) { block }`. Children are laid out as
    /// `[receiver?, args..., block?]`.
    Call {
        name: String,
        receiver: bool,
        args: usize,
        block: bool,
    },
    /// `lambda do |a| ... end`, `proc { }`, `->(a) { }`, `Proc.new { }`.
    /// Children are the body statements.
    CallableBlock { params: Vec<String> },
    /// A block attached to a call; children are the body statements.
    Block { params: Vec<String> },
    Literal(Literal),
    /// Bare name: local variable, constant path, keyword like `self`.
    Identifier(String),
    /// Anything else: operator chains, parenthesised and keyword bodies.
    Group,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub kind: SyntaxKind,
    pub span: Span,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: SyntaxKind, span: Span, children: Vec<SyntaxNode>) -> Self {
        Self {
            kind,
            span,
            children,
        }
    }

    pub fn leaf(kind: SyntaxKind, span: Span) -> Self {
        Self::new(kind, span, Vec::new())
    }

    /// Pre-order walk over this node and every descendant.
    pub fn preorder(&self) -> Preorder<'_> {
        Preorder { stack: vec![self] }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self.kind, SyntaxKind::CallableBlock { .. })
    }

    /// The statically known string value of a string or symbol literal.
    pub fn literal_name(&self) -> Option<&str> {
        match &self.kind {
            SyntaxKind::Literal(Literal::Str(s) | Literal::Symbol(s)) => Some(s),
            _ => None,
        }
    }

    pub fn call_name(&self) -> Option<&str> {
        match &self.kind {
            SyntaxKind::Call { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn receiver(&self) -> Option<&SyntaxNode> {
        match self.kind {
            SyntaxKind::Call { receiver: true, .. } => self.children.first(),
            _ => None,
        }
    }

    pub fn args(&self) -> &[SyntaxNode] {
        match self.kind {
            SyntaxKind::Call { receiver, args, .. } => {
                let first = usize::from(receiver);
                &self.children[first..first + args]
            }
            _ => &[],
        }
    }

    pub fn block(&self) -> Option<&SyntaxNode> {
        match self.kind {
            SyntaxKind::Call { block: true, .. } => self.children.last(),
            _ => None,
        }
    }

    /// `(key, value)` for each pair of a hash node, in source order.
    pub fn pairs(&self) -> impl Iterator<Item = (&SyntaxNode, &SyntaxNode)> {
        let children: &[SyntaxNode] = match self.kind {
            SyntaxKind::Hash => &self.children,
            _ => &[],
        };
        children.iter().filter_map(|pair| match (&pair.kind, pair.children.as_slice()) {
            (SyntaxKind::Pair, [key, value]) => Some((key, value)),
            _ => None,
        })
    }

    /// Literal keys of a hash node, in source order, duplicates included.
    pub fn hash_keys(&self) -> Vec<&str> {
        self.pairs().filter_map(|(k, _)| k.literal_name()).collect()
    }

    /// First pair whose literal key equals `key`.
    pub fn pair(&self, key: &str) -> Option<(&SyntaxNode, &SyntaxNode)> {
        self.pairs().find(|(k, _)| k.literal_name() == Some(key))
    }

    pub fn value_of(&self, key: &str) -> Option<&SyntaxNode> {
        self.pair(key).map(|(_, v)| v)
    }
}

pub struct Preorder<'a> {
    stack: Vec<&'a SyntaxNode>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = &'a SyntaxNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, offset: usize) -> SyntaxNode {
        SyntaxNode::leaf(
            SyntaxKind::Literal(Literal::Symbol(name.to_string())),
            Span {
                offset,
                length: name.len(),
                line: 1,
                column: offset,
            },
        )
    }

    #[test]
    fn test_call_layout_accessors() {
        let span = Span::default();
        let call = SyntaxNode::new(
            SyntaxKind::Call {
                name: "call".into(),
                receiver: true,
                args: 2,
                block: true,
            },
            span,
            vec![
                SyntaxNode::leaf(SyntaxKind::Identifier("obj".into()), span),
                sym("a", 0),
                sym("b", 0),
                SyntaxNode::leaf(SyntaxKind::Block { params: vec![] }, span),
            ],
        );
        assert_eq!(call.receiver().unwrap().kind, SyntaxKind::Identifier("obj".into()));
        assert_eq!(call.args().len(), 2);
        assert_eq!(call.args()[1].literal_name(), Some("b"));
        assert!(call.block().is_some());
    }

    #[test]
    fn test_preorder_and_pairs() {
        let span = Span::default();
        let pair = |k: &str| {
            SyntaxNode::new(
                SyntaxKind::Pair,
                span,
                vec![sym(k, 0), SyntaxNode::leaf(SyntaxKind::Hash, span)],
            )
        };
        let hash = SyntaxNode::new(SyntaxKind::Hash, span, vec![pair("a"), pair("b"), pair("a")]);
        assert_eq!(hash.hash_keys(), vec!["a", "b", "a"]);
        assert!(hash.value_of("b").is_some());
        assert!(hash.value_of("c").is_none());
        // hash, 3 pairs, each with key + value
        assert_eq!(hash.preorder().count(), 1 + 3 * 3);
    }

    #[test]
    fn test_span_cover() {
        let a = Span { offset: 4, length: 2, line: 1, column: 4 };
        let b = Span { offset: 10, length: 3, line: 2, column: 1 };
        let joined = a.to(&b);
        assert_eq!(joined.length, 9);
        assert!(joined.contains(&a) && joined.contains(&b));
    }
}
