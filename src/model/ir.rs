use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Free-form, deterministically ordered metadata attached to IR nodes and
/// issues.
pub type Meta = BTreeMap<String, Value>;

/// Name used when a section key is not a literal.
pub const DYNAMIC_NAME: &str = "(dynamic)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IrKind {
    Connector,
    Connection,
    Test,
    Methods,
    Method,
    ObjectDefinitions,
    ObjectDefinition,
    Actions,
    Action,
    Triggers,
    Trigger,
    PickLists,
    PickList,
}

/// Source position. Every field is optional; an unknown location
/// serializes as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
}

impl Location {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
            length: Some(length),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_known(&self) -> bool {
        self.line.is_some()
    }
}

/// One node of the connector's intermediate representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IrNode {
    pub kind: IrKind,
    pub name: String,
    pub loc: Location,
    pub meta: Meta,
    pub children: Vec<IrNode>,
}

impl IrNode {
    pub fn new(kind: IrKind, name: impl Into<String>, loc: Location) -> Self {
        Self {
            kind,
            name: name.into(),
            loc,
            meta: Meta::new(),
            children: Vec::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    pub fn child(&self, kind: IrKind) -> Option<&IrNode> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Every node below (and including) `self` of the given kind, pre-order.
    pub fn descendants(&self, kind: IrKind) -> Vec<&IrNode> {
        let mut found = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.kind == kind {
                found.push(node);
            }
            stack.extend(node.children.iter().rev());
        }
        found
    }

    pub fn names_of(&self, kind: IrKind) -> Vec<&str> {
        self.descendants(kind)
            .into_iter()
            .map(|n| n.name.as_str())
            .collect()
    }
}
