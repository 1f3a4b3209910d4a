//! One JSON event per line: every issue, then every edge into an HTTP node.

use serde::Serialize;

use crate::model::{Bundle, EdgeMeta, Issue, NodeKind};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event<'a> {
    Issue(&'a Issue),
    HttpCall {
        from: &'a str,
        to: &'a str,
        meta: &'a EdgeMeta,
    },
}

pub fn events(bundle: &Bundle) -> impl Iterator<Item = Event<'_>> {
    let graph = bundle.graph();
    let issues = bundle.issues().iter().map(Event::Issue);
    let calls = graph
        .edges()
        .filter(move |e| graph.node(&e.to).is_some_and(|n| n.kind == NodeKind::Http))
        .map(|e| Event::HttpCall {
            from: &e.from,
            to: &e.to,
            meta: &e.meta,
        });
    issues.chain(calls)
}

pub fn render(bundle: &Bundle) -> serde_json::Result<String> {
    let mut out = String::new();
    for event in events(bundle) {
        out.push_str(&serde_json::to_string(&event)?);
        out.push('\n');
    }
    Ok(out)
}
