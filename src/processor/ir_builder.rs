//! Builds the connector IR from the selected document hash.
//!
//! One handler per [`Section`]; handlers append issues and register
//! callables with the call graph through the shared [`AnalysisContext`].

use std::collections::BTreeSet;

use indexmap::IndexMap;
use tracing::debug;

use super::ast::{Literal, SyntaxKind, SyntaxNode};
use super::call_graph::{self, method_node_id};
use super::context::AnalysisContext;
use crate::model::{
    DYNAMIC_NAME, EXTRA_ROOT_KEYS, IrKind, IrNode, Issue, Location, NodeKind, Section,
};

pub const UNTITLED: &str = "(untitled)";
pub const NO_CONNECTOR: &str = "(no connector)";

/// Validation rules shared by actions and triggers.
struct OperationRules {
    section: &'static str,
    singular: &'static str,
    title: &'static str,
    group: IrKind,
    kind: IrKind,
    node_kind: NodeKind,
    required: &'static [&'static str],
    callables: &'static [&'static str],
}

const ACTIONS: OperationRules = OperationRules {
    section: "actions",
    singular: "action",
    title: "Action",
    group: IrKind::Actions,
    kind: IrKind::Action,
    node_kind: NodeKind::Action,
    required: &["input_fields", "execute", "output_fields"],
    callables: &["input_fields", "execute", "output_fields", "sample_output"],
};

const TRIGGERS: OperationRules = OperationRules {
    section: "triggers",
    singular: "trigger",
    title: "Trigger",
    group: IrKind::Triggers,
    kind: IrKind::Trigger,
    node_kind: NodeKind::Trigger,
    required: &["input_fields", "output_fields", "dedup"],
    callables: &[
        "poll",
        "webhook_subscribe",
        "webhook_unsubscribe",
        "webhook_notification",
        "input_fields",
        "output_fields",
        "sample_output",
        "dedup",
    ],
};

const AUTHORIZATION_CALLABLES: &[&str] =
    &["acquire", "apply", "refresh", "refresh_on", "detect_on", "identity"];

/// Sections in the order their IR nodes are appended to the root.
const BUILD_ORDER: [Section; 7] = [
    Section::Connection,
    Section::Test,
    Section::Methods,
    Section::ObjectDefinitions,
    Section::Actions,
    Section::Triggers,
    Section::PickLists,
];

/// Builds the IR root. `tree` is the whole program (scanned for command
/// literals), `document` the hash chosen by `find_document`.
pub fn build(
    tree: &SyntaxNode,
    document: Option<&SyntaxNode>,
    cx: &mut AnalysisContext,
    filename: &str,
) -> IrNode {
    flag_command_literals(tree, cx);

    let Some(document) = document else {
        cx.diagnostics.push(Issue::warning(
            "no_connector_hash",
            "No hash with at least two known connector sections was found",
        ));
        return IrNode::new(IrKind::Connector, NO_CONNECTOR, Location::unknown())
            .with_meta("filename", filename)
            .with_meta("root_keys", Vec::<String>::new());
    };

    let mut seen = BTreeSet::new();
    for (key, _) in document.pairs() {
        let Some(name) = key.literal_name() else {
            continue;
        };
        if seen.insert(name)
            && Section::from_key(name).is_none()
            && !EXTRA_ROOT_KEYS.contains(&name)
        {
            cx.diagnostics.push(
                Issue::info("unknown_root_key", format!("Unknown root key `{name}`"))
                    .at(key.span.location())
                    .with("key", name),
            );
        }
    }

    let title = document.value_of("title").and_then(string_literal).unwrap_or(UNTITLED);
    let mut root = IrNode::new(IrKind::Connector, title, document.span.location())
        .with_meta("filename", filename)
        .with_meta("root_keys", seen.iter().copied().collect::<Vec<_>>());

    for section in BUILD_ORDER {
        if let Some(node) = section_value(document, section).and_then(|v| build_section(section, v, cx)) {
            root.children.push(node);
        }
    }
    cross_reference(document, &root, cx);

    debug!(
        actions = root.names_of(IrKind::Action).len(),
        triggers = root.names_of(IrKind::Trigger).len(),
        methods = root.names_of(IrKind::Method).len(),
        "IR built"
    );
    root
}

fn section_value(document: &SyntaxNode, section: Section) -> Option<&SyntaxNode> {
    match section {
        Section::PickLists => document
            .value_of(section.key())
            .or_else(|| document.value_of("picklists")),
        _ => document.value_of(section.key()),
    }
}

/// Sections without an IR node of their own yield `None`.
fn build_section(section: Section, value: &SyntaxNode, cx: &mut AnalysisContext) -> Option<IrNode> {
    let node = match section {
        Section::Connection => connection(value, cx),
        Section::Test => test(value, cx),
        Section::Methods => methods(value, cx),
        Section::ObjectDefinitions => {
            named_entries(value, cx, IrKind::ObjectDefinitions, IrKind::ObjectDefinition)
        }
        Section::Actions => operations(&ACTIONS, value, cx),
        Section::Triggers => operations(&TRIGGERS, value, cx),
        Section::PickLists => named_entries(value, cx, IrKind::PickLists, IrKind::PickList),
        Section::Title
        | Section::SecureTunnel
        | Section::WebhookKeys
        | Section::Streams
        | Section::CustomAction
        | Section::CustomActionHelp => return None,
    };
    Some(node)
}

fn string_literal(node: &SyntaxNode) -> Option<&str> {
    match &node.kind {
        SyntaxKind::Literal(Literal::Str(s)) => Some(s),
        _ => None,
    }
}

fn is_hash(node: &SyntaxNode) -> bool {
    node.kind == SyntaxKind::Hash
}

fn callable_params(node: &SyntaxNode) -> Vec<String> {
    match &node.kind {
        SyntaxKind::CallableBlock { params } => params.clone(),
        _ => Vec::new(),
    }
}

fn sorted_keys(hash: &SyntaxNode) -> Vec<String> {
    let keys: BTreeSet<&str> = hash.hash_keys().into_iter().collect();
    keys.into_iter().map(str::to_string).collect()
}

fn not_hash(cx: &mut AnalysisContext, code: &str, what: &str, node: &SyntaxNode) {
    cx.diagnostics.push(
        Issue::warning(format!("{code}_not_hash"), format!("{what} is not a hash"))
            .at(node.span.location()),
    );
}

/// Entries of a named section. Later duplicates replace the earlier body but
/// keep its position; dynamic keys never collide.
fn unique_entries<'a>(
    hash: &'a SyntaxNode,
    singular: &str,
    cx: &mut AnalysisContext,
) -> Vec<(String, &'a SyntaxNode)> {
    let mut entries: Vec<(String, &SyntaxNode)> = Vec::new();
    let mut index: IndexMap<&str, usize> = IndexMap::new();
    for (key, value) in hash.pairs() {
        let Some(name) = key.literal_name() else {
            entries.push((DYNAMIC_NAME.to_string(), value));
            continue;
        };
        match index.get(name) {
            Some(&at) => {
                cx.diagnostics.push(
                    Issue::warning(
                        format!("duplicate_{singular}"),
                        format!("Duplicate {singular} `{name}`; the later definition is used"),
                    )
                    .at(key.span.location())
                    .with("name", name),
                );
                entries[at].1 = value;
            }
            None => {
                index.insert(name, entries.len());
                entries.push((name.to_string(), value));
            }
        }
    }
    entries
}

fn connection(value: &SyntaxNode, cx: &mut AnalysisContext) -> IrNode {
    let mut node = IrNode::new(IrKind::Connection, "connection", value.span.location());
    if !is_hash(value) {
        not_hash(cx, "connection", "`connection`", value);
        return node;
    }

    let mut callables = Vec::new();
    if let Some(base_uri) = value.value_of("base_uri") {
        if let Some(literal) = string_literal(base_uri) {
            node = node.with_meta("base_uri_literal", literal);
        } else if base_uri.is_callable() {
            register(cx, "connection#base_uri", NodeKind::Lambda, base_uri);
            callables.push("base_uri".to_string());
        }
    }

    if let Some(authorization) = value.value_of("authorization").filter(|a| is_hash(a)) {
        if let Some(kind) = authorization.value_of("type").and_then(string_literal) {
            node = node.with_meta("authorization_type_literal", kind);
        }
        for key in AUTHORIZATION_CALLABLES {
            if let Some(body) = authorization.value_of(key).filter(|b| b.is_callable()) {
                register(cx, &format!("connection#authorization.{key}"), NodeKind::Lambda, body);
                callables.push(format!("authorization.{key}"));
            }
        }
    }

    node.with_meta("keys", sorted_keys(value)).with_meta("callables", callables)
}

fn test(value: &SyntaxNode, cx: &mut AnalysisContext) -> IrNode {
    let mut node = IrNode::new(IrKind::Test, "test", value.span.location());
    if value.is_callable() {
        register(cx, "connector#test", NodeKind::Lambda, value);
        node = node.with_meta("args", callable_params(value));
    } else {
        cx.diagnostics.push(
            Issue::warning("test_not_lambda", "`test` is present but is not a lambda")
                .at(value.span.location()),
        );
    }
    node
}

fn methods(value: &SyntaxNode, cx: &mut AnalysisContext) -> IrNode {
    let mut group = IrNode::new(IrKind::Methods, "methods", value.span.location());
    if !is_hash(value) {
        not_hash(cx, "methods", "`methods`", value);
        return group;
    }

    for (name, body) in unique_entries(value, "method", cx) {
        cx.declared_methods.insert(name.clone());
        let mut node = IrNode::new(IrKind::Method, name.as_str(), body.span.location());
        if body.is_callable() {
            call_graph::register_callable(cx, &method_node_id(&name), NodeKind::Method, body);
            node = node.with_meta("args", callable_params(body));
        } else {
            cx.diagnostics.push(
                Issue::warning("method_not_lambda", format!("Method `{name}` is not a lambda"))
                    .at(body.span.location())
                    .with("name", name.as_str()),
            );
        }
        group.children.push(node);
    }
    cx.stats.insert("methods".into(), group.children.len() as u64);
    group
}

fn operations(rules: &OperationRules, value: &SyntaxNode, cx: &mut AnalysisContext) -> IrNode {
    let mut group = IrNode::new(rules.group, rules.section, value.span.location());
    if !is_hash(value) {
        not_hash(cx, rules.section, &format!("`{}`", rules.section), value);
        return group;
    }
    for (name, body) in unique_entries(value, rules.singular, cx) {
        group.children.push(operation(rules, &name, body, cx));
    }
    cx.stats.insert(rules.section.into(), group.children.len() as u64);
    group
}

fn operation(rules: &OperationRules, name: &str, body: &SyntaxNode, cx: &mut AnalysisContext) -> IrNode {
    let node = IrNode::new(rules.kind, name, body.span.location());
    if !is_hash(body) {
        not_hash(cx, rules.singular, &format!("{} `{name}`", rules.title), body);
        return node;
    }

    let keys = body.hash_keys();
    let missing: Vec<&str> = rules
        .required
        .iter()
        .copied()
        .filter(|required| !keys.contains(required))
        .collect();
    if !missing.is_empty() {
        cx.diagnostics.push(
            Issue::warning(
                format!("{}_missing_required_keys", rules.singular),
                format!("{} `{name}` is missing keys: {}", rules.title, missing.join(", ")),
            )
            .at(body.span.location())
            .with("name", name)
            .with("missing", missing),
        );
    }

    let mut callables = Vec::new();
    for key in rules.callables {
        let Some(value) = body.value_of(key) else {
            continue;
        };
        let owner = format!("{}:{name}#{key}", rules.singular);
        if value.is_callable() {
            register(cx, &owner, rules.node_kind, value);
            callables.push(*key);
        } else {
            cx.diagnostics.push(
                Issue::warning("not_lambda", format!("{}.{key} of `{name}` is not a lambda", rules.title))
                    .at(value.span.location())
                    .with("owner", owner),
            );
        }
    }

    node.with_meta("keys", sorted_keys(body)).with_meta("callables", callables)
}

/// Object definitions and pick lists: names only. Callable bodies are still
/// registered so that methods they call are not reported as unused.
fn named_entries(value: &SyntaxNode, cx: &mut AnalysisContext, group_kind: IrKind, kind: IrKind) -> IrNode {
    let (section, prefix) = match group_kind {
        IrKind::PickLists => ("pick_lists", "pick_list"),
        _ => ("object_definitions", "object_definition"),
    };
    let mut group = IrNode::new(group_kind, section, value.span.location());
    if !is_hash(value) {
        not_hash(cx, section, &format!("`{section}`"), value);
        return group;
    }

    for (name, body) in unique_entries(value, prefix, cx) {
        if body.is_callable() {
            register(cx, &format!("{prefix}:{name}"), NodeKind::Lambda, body);
        } else {
            for (key, field) in body.pairs().filter(|(_, v)| v.is_callable()) {
                if let Some(key) = key.literal_name() {
                    register(cx, &format!("{prefix}:{name}#{key}"), NodeKind::Lambda, field);
                }
            }
        }
        group.children.push(IrNode::new(kind, name, body.span.location()));
    }
    cx.stats.insert(section.into(), group.children.len() as u64);
    group
}

fn register(cx: &mut AnalysisContext, owner: &str, kind: NodeKind, body: &SyntaxNode) {
    call_graph::register_callable(cx, owner, kind, body);
    cx.add_entrypoint(owner);
}

fn flag_command_literals(tree: &SyntaxNode, cx: &mut AnalysisContext) {
    for node in tree.preorder() {
        if node.kind == SyntaxKind::Literal(Literal::Command) {
            cx.diagnostics.push(
                Issue::warning("dangerous_xstr", "Command substitution literal")
                    .at(node.span.location()),
            );
        }
    }
}

/// `object_definitions['x']` and `pick_list: :x` references to undeclared names.
fn cross_reference(document: &SyntaxNode, root: &IrNode, cx: &mut AnalysisContext) {
    let mut objects: IndexMap<&str, Location> = IndexMap::new();
    let mut pick_lists: IndexMap<&str, Location> = IndexMap::new();
    for node in document.preorder() {
        match &node.kind {
            SyntaxKind::Call { name, .. } if name == "[]" => {
                let is_object_table = node
                    .receiver()
                    .is_some_and(|r| r.kind == SyntaxKind::Identifier("object_definitions".into()));
                if let Some(target) = node.args().first().and_then(SyntaxNode::literal_name)
                    && is_object_table
                {
                    objects.entry(target).or_insert_with(|| node.span.location());
                }
            }
            SyntaxKind::Pair => {
                if let [key, value] = node.children.as_slice()
                    && key.literal_name() == Some("pick_list")
                    && let Some(target) = value.literal_name()
                {
                    pick_lists.entry(target).or_insert_with(|| node.span.location());
                }
            }
            _ => {}
        }
    }

    let declared_objects = root.names_of(IrKind::ObjectDefinition);
    for (name, loc) in objects {
        if !declared_objects.contains(&name) {
            cx.diagnostics.push(
                Issue::warning(
                    "missing_object_definition",
                    format!("Object definition `{name}` is referenced but not declared"),
                )
                .at(loc)
                .with("name", name),
            );
        }
    }
    let declared_lists = root.names_of(IrKind::PickList);
    for (name, loc) in pick_lists {
        if !declared_lists.contains(&name) {
            cx.diagnostics.push(
                Issue::info(
                    "missing_pick_list",
                    format!("Pick list `{name}` is referenced but not declared"),
                )
                .at(loc)
                .with("name", name),
            );
        }
    }
}
