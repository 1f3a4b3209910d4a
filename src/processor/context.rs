use std::collections::BTreeSet;

use super::diagnostics::Diagnostics;
use crate::model::{Graph, Location, Stats};

/// A `call('name', ...)` site inside a registered callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub owner: String,
    pub method: String,
    pub loc: Location,
}

/// State threaded through one analysis run: the IR builder and the call
/// graph builder append to it, analytics read it.
#[derive(Debug)]
pub struct AnalysisContext {
    pub diagnostics: Diagnostics,
    pub graph: Graph,
    pub stats: Stats,
    pub declared_methods: BTreeSet<String>,
    pub call_sites: Vec<CallSite>,
    pub entrypoints: Vec<String>,
}

impl AnalysisContext {
    pub fn new(max_warnings: usize) -> Self {
        Self {
            diagnostics: Diagnostics::new(max_warnings),
            graph: Graph::new(),
            stats: Stats::new(),
            declared_methods: BTreeSet::new(),
            call_sites: Vec::new(),
            entrypoints: Vec::new(),
        }
    }

    pub fn count(&mut self, stat: &str) {
        *self.stats.entry(stat.to_string()).or_default() += 1;
    }

    pub fn add_entrypoint(&mut self, owner: &str) {
        if !self.entrypoints.iter().any(|e| e == owner) {
            self.entrypoints.push(owner.to_string());
        }
    }
}
