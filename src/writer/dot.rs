//! Graphviz rendering of the call graph.

use std::fmt::{self, Write};

use crate::model::{Graph, NodeKind};

pub fn render(graph: &Graph, name: &str) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "digraph {} {{", graph_id(name))?;
    writeln!(out, "  rankdir=LR;")?;
    for (id, node) in graph.nodes() {
        writeln!(
            out,
            "  {} [label={}, shape={}];",
            quote(id),
            quote(&node.label),
            shape(node.kind)
        )?;
    }
    for edge in graph.edges() {
        match edge.meta.get("label").filter(|l| !l.is_empty()) {
            Some(label) => writeln!(
                out,
                "  {} -> {} [label={}];",
                quote(&edge.from),
                quote(&edge.to),
                quote(label)
            )?,
            None => writeln!(out, "  {} -> {};", quote(&edge.from), quote(&edge.to))?,
        }
    }
    writeln!(out, "}}")?;
    Ok(out)
}

pub fn shape(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Action => "box",
        NodeKind::Trigger => "diamond",
        NodeKind::Method => "oval",
        NodeKind::Lambda => "ellipse",
        NodeKind::Http => "parallelogram",
        NodeKind::Other => "plaintext",
    }
}

/// An unquoted DOT identifier: `[A-Za-z_][A-Za-z0-9_]*`.
fn graph_id(name: &str) -> String {
    let mut id: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if id.is_empty() || id.starts_with(|c: char| c.is_ascii_digit()) {
        id.insert(0, '_');
    }
    id
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
