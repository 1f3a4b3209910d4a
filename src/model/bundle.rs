use std::collections::BTreeMap;

use serde::Serialize;

use super::graph::Graph;
use super::ir::IrNode;
use super::issue::{Issue, Severity};

pub type Stats = BTreeMap<String, u64>;

/// Node with unusually many callers or callees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hotspot {
    pub id: String,
    pub fan_in: usize,
    pub fan_out: usize,
    pub score: usize,
}

/// Path statistics for one entrypoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Complexity {
    pub nodes: usize,
    pub edges: usize,
    pub max_depth: usize,
    pub paths: usize,
    pub http_nodes: usize,
    /// Set when the depth ceiling or the path cap cut enumeration short.
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisReport {
    pub entrypoints: Vec<String>,
    pub cycles: Vec<Vec<String>>,
    pub hotspots: Vec<Hotspot>,
    pub unreachable: Vec<String>,
    pub complexity: BTreeMap<String, Complexity>,
}

/// Everything one analysis run produces. Immutable once assembled.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    root: IrNode,
    issues: Vec<Issue>,
    graph: Graph,
    stats: Stats,
    salvaged: bool,
    analysis: AnalysisReport,
}

impl Bundle {
    pub(crate) fn new(
        root: IrNode,
        issues: Vec<Issue>,
        graph: Graph,
        mut stats: Stats,
        salvaged: bool,
        analysis: AnalysisReport,
    ) -> Self {
        for severity in [Severity::Info, Severity::Warning, Severity::Error] {
            let count = issues.iter().filter(|i| i.severity == severity).count();
            stats.insert(format!("issues_{}", severity.as_str()), count as u64);
        }
        stats.insert("graph_nodes".into(), graph.node_count() as u64);
        stats.insert("graph_edges".into(), graph.edge_count() as u64);
        Self {
            root,
            issues,
            graph,
            stats,
            salvaged,
            analysis,
        }
    }

    pub fn root(&self) -> &IrNode {
        &self.root
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn salvaged(&self) -> bool {
        self.salvaged
    }

    pub fn analysis(&self) -> &AnalysisReport {
        &self.analysis
    }

    pub fn issues_with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a Issue> {
        self.issues.iter().filter(move |i| i.code == code)
    }
}
