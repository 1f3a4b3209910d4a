//! Read-only data handed from the processor to the writers.
//!
//! Everything here serializes straight into the JSON bundle, so field
//! order and naming are part of the output format.
mod bundle;
mod graph;
mod ir;
mod issue;
mod section;

pub use bundle::{AnalysisReport, Bundle, Complexity, Hotspot, Stats};
pub use graph::{Edge, EdgeMeta, Graph, GraphNode, NodeKind};
pub use ir::{DYNAMIC_NAME, IrKind, IrNode, Location, Meta};
pub use issue::{Issue, Severity};
pub use section::{EXTRA_ROOT_KEYS, Section};
