//! Call graph construction.
//!
//! Every callable registered here becomes an owner node. Its body is walked
//! in full and three kinds of receiver-less calls are recorded: HTTP verbs
//! (one node per distinct request), `call('name')` (an edge to the method
//! node) and `eval`/`system` (a warning only).

use tracing::trace;

use super::ast::{Literal, SyntaxKind, SyntaxNode};
use super::context::{AnalysisContext, CallSite};
use crate::model::{EdgeMeta, Issue, NodeKind};

pub const HTTP_VERBS: &[&str] = &["get", "post", "put", "patch", "delete", "options", "head"];

/// Characters of a literal URL kept in an HTTP node id.
pub const URL_ID_CHARS: usize = 50;

const DANGEROUS_CALLS: &[&str] = &["eval", "system"];

pub fn method_node_id(name: &str) -> String {
    format!("method:{name}")
}

fn calls_edge() -> EdgeMeta {
    EdgeMeta::from([("label".to_string(), "calls".to_string())])
}

/// Adds `owner` to the graph and records what its body calls.
pub fn register_callable(cx: &mut AnalysisContext, owner: &str, kind: NodeKind, body: &SyntaxNode) {
    cx.graph.add_node(owner, owner, kind);
    for node in body.preorder() {
        let SyntaxKind::Call {
            name,
            receiver: false,
            ..
        } = &node.kind
        else {
            continue;
        };
        if HTTP_VERBS.contains(&name.as_str()) {
            add_http_call(cx, owner, name, node);
        } else if name == "call" {
            add_method_call(cx, owner, node);
        } else if DANGEROUS_CALLS.contains(&name.as_str()) {
            cx.diagnostics.push(
                Issue::warning("dangerous_call", format!("`{name}` called in {owner}"))
                    .at(node.span.location())
                    .with("owner", owner)
                    .with("call", name.as_str()),
            );
        }
    }
}

fn string_argument(call: &SyntaxNode) -> Option<&str> {
    match &call.args().first()?.kind {
        SyntaxKind::Literal(Literal::Str(s)) => Some(s),
        _ => None,
    }
}

fn add_http_call(cx: &mut AnalysisContext, owner: &str, verb: &str, call: &SyntaxNode) {
    let url = string_argument(call);
    let id_part = match url {
        Some(url) => url.chars().take(URL_ID_CHARS).collect(),
        None => "...".to_string(),
    };
    let id = format!("{owner}::http#{verb}({id_part})");
    let label = format!("{} {}", verb.to_uppercase(), url.unwrap_or("(dynamic)"));
    trace!(%owner, %id, "http call");
    cx.graph.add_node(&id, &label, NodeKind::Http);
    cx.graph.add_edge(owner, &id, calls_edge());
    cx.count(&format!("http_{verb}"));
}

fn add_method_call(cx: &mut AnalysisContext, owner: &str, call: &SyntaxNode) {
    let Some(method) = call.args().first().and_then(SyntaxNode::literal_name) else {
        cx.count("dynamic_method_calls");
        return;
    };
    let target = method_node_id(method);
    cx.graph.add_node(&target, &target, NodeKind::Method);
    cx.graph.add_edge(owner, &target, calls_edge());
    cx.count("method_calls");
    cx.call_sites.push(CallSite {
        owner: owner.to_string(),
        method: method.to_string(),
        loc: call.span.location(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::syntax_parser::parse;

    fn register(src: &str) -> AnalysisContext {
        let tree = parse(src).unwrap().tree;
        let mut cx = AnalysisContext::new(100);
        register_callable(&mut cx, "action:a#execute", NodeKind::Action, &tree);
        cx
    }

    #[test]
    fn test_http_nodes() {
        let long = "x".repeat(80);
        let cx = register(&format!(
            "get('/users')\npost(\"/{long}\")\ndelete(url)\nclient.get('/skipped')"
        ));
        let ids: Vec<&str> = cx.graph.nodes().map(|(id, _)| id).collect();
        assert_eq!(ids[0], "action:a#execute");
        assert_eq!(ids[1], "action:a#execute::http#get(/users)");
        assert_eq!(
            ids[2],
            format!("action:a#execute::http#post(/{})", "x".repeat(49))
        );
        assert_eq!(ids[3], "action:a#execute::http#delete(...)");
        assert_eq!(ids.len(), 4);
        assert_eq!(cx.graph.node(ids[3]).unwrap().label, "DELETE (dynamic)");
        assert_eq!(cx.graph.node(ids[1]).unwrap().kind, NodeKind::Http);
        assert_eq!(cx.stats["http_get"], 1);
        assert_eq!(cx.graph.edge_count(), 3);
    }

    #[test]
    fn test_method_calls_and_sites() {
        let cx = register("call('fetch', 1)\ncall :fetch\ncall(name)\nobj.call('not_a_method')");
        assert_eq!(cx.graph.edge_count(), 1);
        assert!(cx.graph.contains("method:fetch"));
        assert_eq!(cx.call_sites.len(), 2);
        assert_eq!(cx.call_sites[1].loc.line, Some(2));
        assert_eq!(cx.stats["method_calls"], 2);
        assert_eq!(cx.stats["dynamic_method_calls"], 1);
    }

    #[test]
    fn test_dangerous_calls() {
        let cx = register("eval(input['code'])\nsystem 'ls'\nx.system");
        let codes: Vec<&str> = cx.diagnostics.issues().iter().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, vec!["dangerous_call", "dangerous_call"]);
    }
}
