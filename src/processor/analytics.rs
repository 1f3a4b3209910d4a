//! Read-only analyses over a finished call graph.
//!
//! Everything here is a plain function of the graph, the declared method set
//! and the recorded call sites; nothing mutates shared state, so the
//! per-entrypoint path enumeration can run on rayon's pool.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::debug;

use super::call_graph::method_node_id;
use super::context::CallSite;
use crate::model::{
    AnalysisReport, Complexity, DYNAMIC_NAME, Graph, Hotspot, Issue, NodeKind,
};

pub const PATH_DEPTH_LIMIT: usize = 60;
pub const MAX_PATHS_PER_ENTRYPOINT: usize = 10_000;
/// Hotspots are the nodes scoring at or above this many distinct scores from the top.
pub const HOTSPOT_TIERS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathLimits {
    pub depth: usize,
    pub max_paths: usize,
}

impl Default for PathLimits {
    fn default() -> Self {
        Self {
            depth: PATH_DEPTH_LIMIT,
            max_paths: MAX_PATHS_PER_ENTRYPOINT,
        }
    }
}

/// Terminal paths from one entrypoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    pub paths: Vec<Vec<String>>,
    pub truncated: bool,
}

/// Runs every analysis and returns the report plus the issues it raised,
/// in a fixed order: undefined, unused, cycles, unreachable.
pub fn run(
    graph: &Graph,
    declared: &BTreeSet<String>,
    call_sites: &[CallSite],
    entrypoints: &[String],
    limits: PathLimits,
) -> (AnalysisReport, Vec<Issue>) {
    let mut issues = undefined_methods(declared, call_sites);
    issues.extend(unused_methods(declared, call_sites));

    let cycles = cycles(graph);
    for cycle in &cycles {
        issues.push(
            Issue::warning("method_cycle", format!("Call cycle through {}", cycle.join(" -> ")))
                .with("nodes", cycle.clone()),
        );
    }

    let entrypoints: Vec<String> = entrypoints
        .iter()
        .filter(|e| graph.contains(e))
        .cloned()
        .collect();
    let reachable = reachable_from(graph, &entrypoints);
    issues.extend(unreachable_methods(graph, declared, call_sites, &reachable));
    let unreachable = graph
        .nodes()
        .map(|(id, _)| id)
        .filter(|id| !reachable.contains(*id))
        .map(str::to_string)
        .collect();

    let adjacency = graph.adjacency();
    let complexity: BTreeMap<String, Complexity> = entrypoints
        .par_iter()
        .map(|entry| {
            let paths = walk_paths(&adjacency, entry, limits);
            (entry.clone(), complexity(graph, &paths))
        })
        .collect();
    debug!(
        entrypoints = entrypoints.len(),
        cycles = cycles.len(),
        issues = issues.len(),
        "analytics done"
    );

    let report = AnalysisReport {
        entrypoints,
        cycles,
        hotspots: hotspots(graph),
        unreachable,
        complexity,
    };
    (report, issues)
}

/// One warning per call site of a method that is never declared.
pub fn undefined_methods(declared: &BTreeSet<String>, call_sites: &[CallSite]) -> Vec<Issue> {
    let mut seen = HashSet::new();
    call_sites
        .iter()
        .filter(|site| !declared.contains(&site.method))
        .filter(|site| seen.insert((&site.owner, &site.method, site.loc)))
        .map(|site| {
            Issue::warning(
                "undefined_method",
                format!("Method `{}` is called but not defined", site.method),
            )
            .at(site.loc)
            .with("method", site.method.as_str())
            .with("caller", site.owner.as_str())
        })
        .collect()
}

/// One info per declared method that no call site names.
pub fn unused_methods(declared: &BTreeSet<String>, call_sites: &[CallSite]) -> Vec<Issue> {
    let called: HashSet<&str> = call_sites.iter().map(|s| s.method.as_str()).collect();
    declared
        .iter()
        .filter(|name| name.as_str() != DYNAMIC_NAME && !called.contains(name.as_str()))
        .map(|name| {
            Issue::info("unused_method", format!("Method `{name}` is defined but never called"))
                .with("method", name.as_str())
        })
        .collect()
}

/// Declared methods that have callers, none of which is reachable.
fn unreachable_methods(
    graph: &Graph,
    declared: &BTreeSet<String>,
    call_sites: &[CallSite],
    reachable: &HashSet<String>,
) -> Vec<Issue> {
    let called: HashSet<&str> = call_sites.iter().map(|s| s.method.as_str()).collect();
    declared
        .iter()
        .filter(|name| called.contains(name.as_str()))
        .filter(|name| {
            let id = method_node_id(name);
            graph.contains(&id) && !reachable.contains(&id)
        })
        .map(|name| {
            Issue::info(
                "unreachable_method",
                format!("Method `{name}` is only called from code no entrypoint reaches"),
            )
            .with("method", name.as_str())
        })
        .collect()
}

/// Tarjan's algorithm, iterative. Components come out in reverse
/// topological order, each sorted by id.
pub fn strongly_connected_components(graph: &Graph) -> Vec<Vec<String>> {
    let adjacency = graph.adjacency();
    let ids: Vec<&str> = adjacency.keys().copied().collect();
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let successors: Vec<Vec<usize>> = adjacency
        .values()
        .map(|targets| targets.iter().filter_map(|t| position.get(t).copied()).collect())
        .collect();

    let n = ids.len();
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root].is_some() {
            continue;
        }
        index[root] = Some(next_index);
        low[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        // (node, next successor to visit)
        let mut work = vec![(root, 0usize)];

        while let Some(frame) = work.last_mut() {
            let v = frame.0;
            if let Some(&w) = successors[v].get(frame.1) {
                frame.1 += 1;
                match index[w] {
                    None => {
                        index[w] = Some(next_index);
                        low[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        work.push((w, 0));
                    }
                    Some(w_index) if on_stack[w] => low[v] = low[v].min(w_index),
                    Some(_) => {}
                }
                continue;
            }

            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[v]);
            }
            if index[v] == Some(low[v]) {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(ids[w].to_string());
                    if w == v {
                        break;
                    }
                }
                component.sort();
                components.push(component);
            }
        }
    }
    components
}

/// Components with more than one node, plus single nodes with a self-edge.
pub fn cycles(graph: &Graph) -> Vec<Vec<String>> {
    let self_loops: HashSet<&str> = graph
        .edges()
        .filter(|e| e.from == e.to)
        .map(|e| e.from.as_str())
        .collect();
    let mut cycles: Vec<Vec<String>> = strongly_connected_components(graph)
        .into_iter()
        .filter(|c| c.len() > 1 || self_loops.contains(c[0].as_str()))
        .collect();
    cycles.sort();
    cycles
}

/// Breadth-first reachability from the seeds that exist in the graph.
pub fn reachable_from(graph: &Graph, seeds: &[String]) -> HashSet<String> {
    let adjacency = graph.adjacency();
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = seeds
        .iter()
        .filter_map(|s| adjacency.get_key_value(s.as_str()).map(|(k, _)| *k))
        .collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(targets) = adjacency.get(id) {
            queue.extend(targets.iter().filter(|t| !seen.contains(*t)));
        }
    }
    seen.into_iter().map(str::to_string).collect()
}

/// Nodes whose `max(fan_in, fan_out)` is among the top distinct scores.
pub fn hotspots(graph: &Graph) -> Vec<Hotspot> {
    let adjacency = graph.adjacency();
    let mut fan_in: HashMap<&str, usize> = HashMap::new();
    for targets in adjacency.values() {
        for target in targets {
            *fan_in.entry(*target).or_default() += 1;
        }
    }

    let mut scored: Vec<Hotspot> = adjacency
        .iter()
        .map(|(id, targets)| {
            let fan_in = fan_in.get(id).copied().unwrap_or(0);
            Hotspot {
                id: id.to_string(),
                fan_in,
                fan_out: targets.len(),
                score: fan_in.max(targets.len()),
            }
        })
        .filter(|h| h.score > 0)
        .collect();

    let distinct: BTreeSet<usize> = scored.iter().map(|h| h.score).collect();
    let Some(&cutoff) = distinct.iter().rev().take(HOTSPOT_TIERS).last() else {
        return Vec::new();
    };
    scored.retain(|h| h.score >= cutoff);
    scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored
}

/// Depth-first enumeration of terminal paths from `entry`.
pub fn enumerate_paths(graph: &Graph, entry: &str, limits: PathLimits) -> PathSet {
    walk_paths(&graph.adjacency(), entry, limits)
}

fn walk_paths(adjacency: &IndexMap<&str, Vec<&str>>, entry: &str, limits: PathLimits) -> PathSet {
    let Some((&entry, _)) = adjacency.get_key_value(entry) else {
        return PathSet::default();
    };
    let mut walk = PathWalk {
        adjacency,
        limits,
        path: Vec::new(),
        on_path: HashSet::new(),
        found: PathSet::default(),
    };
    walk.visit(entry, 0);
    walk.found
}

struct PathWalk<'g> {
    adjacency: &'g IndexMap<&'g str, Vec<&'g str>>,
    limits: PathLimits,
    path: Vec<&'g str>,
    on_path: HashSet<&'g str>,
    found: PathSet,
}

impl<'g> PathWalk<'g> {
    fn full(&self) -> bool {
        self.found.paths.len() >= self.limits.max_paths
    }

    fn record(&mut self) {
        self.found
            .paths
            .push(self.path.iter().map(|s| s.to_string()).collect());
    }

    /// A path ends on a revisit, a sink, or at the depth ceiling; the node
    /// that ends it is included.
    fn visit(&mut self, node: &'g str, depth: usize) {
        if self.full() {
            self.found.truncated = true;
            return;
        }
        let adjacency = self.adjacency;
        let successors = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
        self.path.push(node);

        if self.on_path.contains(node) || successors.is_empty() {
            self.record();
        } else if depth >= self.limits.depth {
            self.found.truncated = true;
            self.record();
        } else {
            self.on_path.insert(node);
            for &next in successors {
                self.visit(next, depth + 1);
            }
            self.on_path.remove(node);
        }
        self.path.pop();
    }
}

pub fn complexity(graph: &Graph, paths: &PathSet) -> Complexity {
    let mut nodes: HashSet<&str> = HashSet::new();
    let mut edges: HashSet<(&str, &str)> = HashSet::new();
    for path in &paths.paths {
        nodes.extend(path.iter().map(String::as_str));
        edges.extend(path.windows(2).map(|w| (w[0].as_str(), w[1].as_str())));
    }
    Complexity {
        nodes: nodes.len(),
        edges: edges.len(),
        max_depth: paths.paths.iter().map(|p| p.len().saturating_sub(1)).max().unwrap_or(0),
        paths: paths.paths.len(),
        http_nodes: nodes
            .iter()
            .filter(|id| graph.node(id).is_some_and(|n| n.kind == NodeKind::Http))
            .count(),
        truncated: paths.truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EdgeMeta, Location};

    fn graph(edges: &[(&str, &str)]) -> Graph {
        let mut graph = Graph::new();
        for (from, to) in edges {
            graph.add_edge(from, to, EdgeMeta::new());
        }
        graph
    }

    fn site(owner: &str, method: &str, line: usize) -> CallSite {
        CallSite {
            owner: owner.into(),
            method: method.into(),
            loc: Location::new(line, 0, 4),
        }
    }

    #[test]
    fn test_scc_cycle_and_chain() {
        let cyclic = graph(&[("a", "b"), ("b", "c"), ("c", "a")]);
        assert_eq!(cycles(&cyclic), vec![vec!["a", "b", "c"]]);

        let chain = graph(&[("a", "b"), ("b", "c")]);
        assert!(cycles(&chain).is_empty());
        assert_eq!(strongly_connected_components(&chain).len(), 3);

        let self_loop = graph(&[("a", "a"), ("a", "b")]);
        assert_eq!(cycles(&self_loop), vec![vec!["a"]]);

        assert!(cycles(&Graph::new()).is_empty());
    }

    #[test]
    fn test_undefined_and_unused() {
        let declared: BTreeSet<String> = ["used", "idle", DYNAMIC_NAME].map(String::from).into();
        let sites = [
            site("action:x#execute", "used", 1),
            site("action:x#execute", "ghost", 2),
            site("action:y#execute", "ghost", 7),
            site("action:y#execute", "ghost", 7),
        ];
        let undefined = undefined_methods(&declared, &sites);
        assert_eq!(undefined.len(), 2);
        assert!(undefined.iter().all(|i| i.context["method"] == "ghost"));

        let unused = unused_methods(&declared, &sites);
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].context["method"], "idle");
    }

    #[test]
    fn test_reachability() {
        let g = graph(&[("entry", "m1"), ("m1", "m2"), ("orphan", "m3")]);
        let reachable = reachable_from(&g, &["entry".to_string(), "absent".to_string()]);
        let mut reached: Vec<&str> = reachable.iter().map(String::as_str).collect();
        reached.sort();
        assert_eq!(reached, vec!["entry", "m1", "m2"]);
    }

    #[test]
    fn test_unreachable_method_issue() {
        let mut g = graph(&[("action:a#execute", "method:live"), ("method:dead_caller", "method:dead")]);
        g.add_node("method:idle", "method:idle", NodeKind::Method);
        let declared: BTreeSet<String> = ["live", "dead", "dead_caller"].map(String::from).into();
        let sites = [
            site("action:a#execute", "live", 1),
            site("method:dead_caller", "dead", 2),
        ];
        let (report, issues) = run(
            &g,
            &declared,
            &sites,
            &["action:a#execute".to_string()],
            PathLimits::default(),
        );
        let unreachable: Vec<&Issue> = issues.iter().filter(|i| i.code == "unreachable_method").collect();
        assert_eq!(unreachable.len(), 1);
        assert_eq!(unreachable[0].context["method"], "dead");
        assert_eq!(report.unreachable, vec!["method:dead_caller", "method:dead", "method:idle"]);
    }

    #[test]
    fn test_hotspots() {
        let g = graph(&[("a", "x"), ("b", "x"), ("c", "x"), ("a", "y")]);
        let found = hotspots(&g);
        let ids: Vec<&str> = found.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "a", "b", "c", "y"]);
        assert_eq!(found[0].fan_in, 3);
        assert_eq!(found[0].score, 3);

        // Twelve distinct scores: only the top ten tiers survive.
        let mut star = Graph::new();
        for hub in 1..=12 {
            for leaf in 0..hub {
                star.add_edge(&format!("hub{hub:02}"), &format!("leaf{hub:02}_{leaf:02}"), EdgeMeta::new());
            }
        }
        let found = hotspots(&star);
        assert!(found.iter().all(|h| h.score >= 3));
        assert_eq!(found.len(), 10);
        assert!(hotspots(&Graph::new()).is_empty());
    }

    #[test]
    fn test_paths_terminate() {
        let test_cases = [
            (vec![("a", "b"), ("b", "c")], vec![vec!["a", "b", "c"]]),
            (vec![("a", "b"), ("b", "a")], vec![vec!["a", "b", "a"]]),
            (
                vec![("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
                vec![vec!["a", "b", "d"], vec!["a", "c", "d"]],
            ),
        ];
        for (edges, expected) in test_cases {
            let found = enumerate_paths(&graph(&edges), "a", PathLimits::default());
            assert_eq!(found.paths, expected);
            assert!(!found.truncated);
        }
        assert_eq!(
            enumerate_paths(&graph(&[]), "missing", PathLimits::default()),
            PathSet::default()
        );
    }

    #[test]
    fn test_depth_ceiling() {
        let names: Vec<String> = (0..200).map(|i| format!("n{i}")).collect();
        let mut chain = Graph::new();
        for pair in names.windows(2) {
            chain.add_edge(&pair[0], &pair[1], EdgeMeta::new());
        }
        let found = enumerate_paths(&chain, "n0", PathLimits::default());
        assert!(found.truncated);
        assert_eq!(found.paths.len(), 1);
        assert_eq!(found.paths[0].len(), PATH_DEPTH_LIMIT + 1);
        let stats = complexity(&chain, &found);
        assert_eq!(stats.max_depth, PATH_DEPTH_LIMIT);
        assert!(stats.truncated);
    }

    #[test]
    fn test_path_cap() {
        // Binary fan-out of depth 6 has 64 leaves.
        let mut g = Graph::new();
        for level in 0..6 {
            for node in 0..(1 << level) {
                let from = format!("{level}:{node}");
                g.add_edge(&from, &format!("{}:{}", level + 1, node * 2), EdgeMeta::new());
                g.add_edge(&from, &format!("{}:{}", level + 1, node * 2 + 1), EdgeMeta::new());
            }
        }
        let limits = PathLimits { depth: 60, max_paths: 10 };
        let found = enumerate_paths(&g, "0:0", limits);
        assert_eq!(found.paths.len(), 10);
        assert!(found.truncated);
        assert_eq!(enumerate_paths(&g, "0:0", PathLimits::default()).paths.len(), 64);
    }
}
