//! Human readable summary.

use std::fmt::{self, Write};

use crate::model::{Bundle, IrKind, IrNode, Location};

pub fn render(bundle: &Bundle) -> Result<String, fmt::Error> {
    let mut out = String::new();
    let root = bundle.root();

    writeln!(out, "# {}\n", root.name)?;
    if let Some(filename) = root.meta.get("filename").and_then(|v| v.as_str()) {
        writeln!(out, "File: `{filename}`\n")?;
    }
    let root_keys: Vec<&str> = root
        .meta
        .get("root_keys")
        .and_then(|v| v.as_array())
        .map(|keys| keys.iter().filter_map(|k| k.as_str()).collect())
        .unwrap_or_default();
    writeln!(out, "Root keys: {}\n", root_keys.join(", "))?;

    let actions = sorted(root, IrKind::Action);
    let triggers = sorted(root, IrKind::Trigger);
    let methods = sorted(root, IrKind::Method);
    writeln!(
        out,
        "Counts: **{}** actions, **{}** triggers, **{}** methods\n",
        actions.len(),
        triggers.len(),
        methods.len()
    )?;
    if bundle.salvaged() {
        writeln!(
            out,
            "> Structural parsing failed. Names below come from a lexical scan; no call graph was built.\n"
        )?;
    }

    for (title, nodes) in [("Actions", &actions), ("Triggers", &triggers), ("Methods", &methods)] {
        if nodes.is_empty() {
            continue;
        }
        writeln!(out, "## {title}")?;
        for node in nodes.iter() {
            writeln!(out, "- **{}** ({})", node.name, at(&node.loc))?;
        }
        writeln!(out)?;
    }

    if !bundle.issues().is_empty() {
        writeln!(out, "## Issues ({})", bundle.issues().len())?;
        for issue in bundle.issues() {
            writeln!(
                out,
                "- [{}] **{}** at {}: {}",
                issue.severity.as_str(),
                issue.code,
                at(&issue.loc),
                issue.message
            )?;
        }
        writeln!(out)?;
    }

    write_analysis(&mut out, bundle)?;

    writeln!(out, "## Notes")?;
    writeln!(out, "- This summary is generated statically from source; no code was executed.")?;
    Ok(out)
}

fn write_analysis(out: &mut String, bundle: &Bundle) -> fmt::Result {
    let graph = bundle.graph();
    if graph.is_empty() {
        return Ok(());
    }
    let analysis = bundle.analysis();
    writeln!(out, "## Call graph")?;
    writeln!(
        out,
        "{} nodes, {} edges, {} entrypoints\n",
        graph.node_count(),
        graph.edge_count(),
        analysis.entrypoints.len()
    )?;

    if !analysis.cycles.is_empty() {
        writeln!(out, "### Cycles")?;
        for cycle in &analysis.cycles {
            writeln!(out, "- {}", cycle.join(" -> "))?;
        }
        writeln!(out)?;
    }

    if !analysis.hotspots.is_empty() {
        writeln!(out, "### Hotspots")?;
        writeln!(out, "| Node | Fan-in | Fan-out | Score |")?;
        writeln!(out, "|---|---|---|---|")?;
        for hotspot in &analysis.hotspots {
            writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                hotspot.id, hotspot.fan_in, hotspot.fan_out, hotspot.score
            )?;
        }
        writeln!(out)?;
    }

    if !analysis.complexity.is_empty() {
        writeln!(out, "### Complexity")?;
        writeln!(out, "| Entrypoint | Nodes | Edges | Max depth | Paths | HTTP | Truncated |")?;
        writeln!(out, "|---|---|---|---|---|---|---|")?;
        for (entry, c) in &analysis.complexity {
            writeln!(
                out,
                "| `{entry}` | {} | {} | {} | {} | {} | {} |",
                c.nodes,
                c.edges,
                c.max_depth,
                c.paths,
                c.http_nodes,
                if c.truncated { "yes" } else { "no" }
            )?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn sorted(root: &IrNode, kind: IrKind) -> Vec<&IrNode> {
    let mut nodes = root.descendants(kind);
    nodes.sort_by(|a, b| a.name.cmp(&b.name));
    nodes
}

fn at(loc: &Location) -> String {
    match loc.line {
        Some(line) => format!("line {line}"),
        None => "unknown loc".to_string(),
    }
}
