//! The functional core: source text in, [`Bundle`] out.
//!
//! scanner → syntax_parser → ir_builder (+ call_graph) → analytics, or
//! scanner → salvage when the structural parse fails.
pub mod analytics;
pub mod ast;
pub mod call_graph;
pub mod context;
pub mod diagnostics;
pub mod ir_builder;
pub mod salvage;
pub mod scanner;
pub mod syntax_parser;

use tracing::{debug, info};

use crate::model::Bundle;
use analytics::{MAX_PATHS_PER_ENTRYPOINT, PATH_DEPTH_LIMIT, PathLimits};
use context::AnalysisContext;
use syntax_parser::ParsedDocument;

pub const DEFAULT_MAX_WARNINGS: usize = 10_000;

/// Analysis configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Recorded in the root's metadata.
    pub filename: String,
    pub max_warnings: usize,
    pub path_depth_limit: usize,
    pub max_paths_per_entry: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filename: "(input)".to_string(),
            max_warnings: DEFAULT_MAX_WARNINGS,
            path_depth_limit: PATH_DEPTH_LIMIT,
            max_paths_per_entry: MAX_PATHS_PER_ENTRYPOINT,
        }
    }
}

impl Settings {
    fn path_limits(&self) -> PathLimits {
        PathLimits {
            depth: self.path_depth_limit,
            max_paths: self.max_paths_per_entry,
        }
    }
}

/// Runs every pass over `source` and returns a read-only bundle for the
/// writers. Malformed input never fails the run; it degrades to salvage.
pub fn analyze(source: &str, settings: &Settings) -> Bundle {
    let bundle = match syntax_parser::parse(source) {
        Ok(parsed) => analyze_parsed(&parsed, settings),
        Err(failure) => salvage::recover(source, &failure, &settings.filename),
    };
    info!(
        salvaged = bundle.salvaged(),
        issues = bundle.issues().len(),
        nodes = bundle.graph().node_count(),
        edges = bundle.graph().edge_count(),
        "analysis finished"
    );
    bundle
}

fn analyze_parsed(parsed: &ParsedDocument, settings: &Settings) -> Bundle {
    for note in &parsed.diagnostics {
        debug!(%note, "parser note");
    }
    let mut cx = AnalysisContext::new(settings.max_warnings);
    cx.stats.insert("parse_notes".into(), parsed.diagnostics.len() as u64);

    let document = syntax_parser::find_document(&parsed.tree);
    let root = ir_builder::build(&parsed.tree, document, &mut cx, &settings.filename);

    let (report, issues) = analytics::run(
        &cx.graph,
        &cx.declared_methods,
        &cx.call_sites,
        &cx.entrypoints,
        settings.path_limits(),
    );
    cx.diagnostics.extend(issues);

    let AnalysisContext {
        diagnostics,
        graph,
        mut stats,
        ..
    } = cx;
    stats.insert("suppressed_warnings".into(), diagnostics.suppressed());
    Bundle::new(root, diagnostics.into_issues(), graph, stats, false, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{IrKind, Severity};

    #[test]
    fn test_warning_cap_counts_suppressed() {
        let source = "{ title: 'x', actions: { a: {}, b: {}, c: {} } }";
        let settings = Settings {
            max_warnings: 1,
            ..Settings::default()
        };
        let bundle = analyze(source, &settings);
        let warnings = bundle
            .issues()
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        assert_eq!(warnings, 1);
        assert_eq!(bundle.stats()["suppressed_warnings"], 2);
        assert_eq!(bundle.root().names_of(IrKind::Action), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_filename_in_root_meta() {
        let settings = Settings {
            filename: "demo.rb".into(),
            ..Settings::default()
        };
        let bundle = analyze("{ title: 'x', test: lambda { } }", &settings);
        assert_eq!(bundle.root().meta["filename"], "demo.rb");
        assert!(!bundle.salvaged());
        assert_eq!(bundle.analysis().entrypoints, vec!["connector#test"]);
    }
}
