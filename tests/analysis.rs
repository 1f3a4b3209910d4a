use std::collections::BTreeSet;

use connector_inspect::model::{IrKind, NodeKind, Severity};
use connector_inspect::processor::{analyze, salvage, Settings};

const CONNECTOR: &str = r##"
# Demo connector used across the integration tests.
{
  title: 'Records',

  connection: {
    fields: [{ name: 'api_key', control_type: 'password' }],
    authorization: {
      type: 'api_key',
      apply: lambda do |connection|
        headers('X-Api-Key': connection['api_key'])
      end
    },
    base_uri: lambda do |connection|
      "https://#{connection['subdomain']}.example.com"
    end
  },

  test: lambda do |_connection|
    get('/api/v1/me')
  end,

  methods: {
    build_url: lambda do |path|
      "/api/v1/#{path}"
    end,
    ping: lambda do |n|
      call(:pong, n - 1) if n > 0
    end,
    pong: lambda do |n|
      call('ping', n)
    end,
    unused_helper: lambda do
      nil
    end
  },

  object_definitions: {
    record: {
      fields: lambda do |_connection, _config|
        [{ name: 'id' }, { name: 'status', pick_list: :statuses }]
      end
    }
  },

  actions: {
    search_records: {
      title: 'Search records',
      input_fields: lambda do |object_definitions|
        object_definitions['record']
      end,
      execute: lambda do |_connection, input|
        url = call('build_url', 'records')
        response = get(url).params(q: input['query'])
        call('ping', 3)
        { records: response['items'] }
      end,
      output_fields: lambda do |object_definitions|
        object_definitions['record']
      end
    },

    create_record: {
      input_fields: lambda { |object_definitions| object_definitions['record'] },
      execute: lambda do |_connection, input|
        post('/api/v1/records', input).
          after_error_response(/.*/) do |_code, body, _header, message|
            error("#{message}: #{body}")
          end
        call('audit_log', input)
      end,
      output_fields: lambda { |object_definitions| object_definitions['record'] }
    }
  },

  triggers: {
    new_record: {
      input_fields: lambda { [] },
      poll: lambda do |_connection, _input, closure|
        page = get("/api/v1/records?since=#{closure}")
        { events: page['items'], next_poll: page['cursor'] }
      end,
      dedup: lambda { |record| record['id'] },
      output_fields: lambda { |object_definitions| object_definitions['record'] }
    }
  },

  pick_lists: {
    statuses: lambda do
      [%w[Open open], %w[Closed closed]]
    end
  }
}
"##;

fn settings() -> Settings {
    Settings {
        filename: "records.rb".into(),
        ..Settings::default()
    }
}

fn codes<'a>(issues: impl IntoIterator<Item = &'a connector_inspect::model::Issue>) -> Vec<&'a str> {
    issues.into_iter().map(|i| i.code.as_str()).collect()
}

#[test]
fn fixture_ir_shape() {
    let bundle = analyze(CONNECTOR, &settings());
    assert!(!bundle.salvaged());
    let root = bundle.root();
    assert_eq!(root.kind, IrKind::Connector);
    assert_eq!(root.name, "Records");
    assert_eq!(
        root.names_of(IrKind::Action),
        vec!["search_records", "create_record"]
    );
    assert_eq!(root.names_of(IrKind::Trigger), vec!["new_record"]);
    assert_eq!(
        root.names_of(IrKind::Method),
        vec!["build_url", "ping", "pong", "unused_helper"]
    );
    assert_eq!(root.names_of(IrKind::ObjectDefinition), vec!["record"]);
    assert_eq!(root.names_of(IrKind::PickList), vec!["statuses"]);

    let connection = root.child(IrKind::Connection).unwrap();
    assert_eq!(connection.meta["authorization_type_literal"], "api_key");

    let action = &root.child(IrKind::Actions).unwrap().children[0];
    assert_eq!(
        action.meta["keys"],
        serde_json::json!(["execute", "input_fields", "output_fields", "title"])
    );
    assert!(action.loc.is_known());
}

#[test]
fn fixture_issues() {
    let bundle = analyze(CONNECTOR, &settings());
    let found = codes(bundle.issues());

    let undefined: Vec<_> = bundle.issues_with_code("undefined_method").collect();
    assert_eq!(undefined.len(), 1);
    assert_eq!(undefined[0].context["method"], "audit_log");
    assert_eq!(undefined[0].context["caller"], "action:create_record#execute");

    let unused: Vec<_> = bundle.issues_with_code("unused_method").collect();
    assert_eq!(unused.len(), 1);
    assert_eq!(unused[0].context["method"], "unused_helper");
    assert_eq!(unused[0].severity, Severity::Info);

    let cycles: Vec<_> = bundle.issues_with_code("method_cycle").collect();
    assert_eq!(cycles.len(), 1);
    assert_eq!(
        cycles[0].context["nodes"],
        serde_json::json!(["method:ping", "method:pong"])
    );

    assert!(!found.contains(&"action_missing_required_keys"));
    assert!(!found.contains(&"trigger_missing_required_keys"));
    assert!(!found.contains(&"missing_object_definition"));
    assert!(!found.contains(&"missing_pick_list"));
    assert!(!found.contains(&"not_lambda"));
    assert_eq!(bundle.stats()["issues_error"], 0);
}

#[test]
fn fixture_graph() {
    let bundle = analyze(CONNECTOR, &settings());
    let graph = bundle.graph();
    assert!(graph.dangling_edges().is_empty());

    for id in [
        "connector#test",
        "connector#test::http#get(/api/v1/me)",
        "action:search_records#execute",
        "action:search_records#execute::http#get(...)",
        "action:create_record#execute::http#post(/api/v1/records)",
        "trigger:new_record#poll::http#get(...)",
        "connection#authorization.apply",
        "method:build_url",
        "method:audit_log",
    ] {
        assert!(graph.contains(id), "{id} missing");
    }
    assert_eq!(
        graph.node("trigger:new_record#poll").unwrap().kind,
        NodeKind::Trigger
    );
    assert_eq!(
        graph.node("action:search_records#execute::http#get(...)").unwrap().label,
        "GET (dynamic)"
    );
    assert_eq!(bundle.stats()["http_get"], 3);
    assert_eq!(bundle.stats()["http_post"], 1);
    assert_eq!(bundle.stats()["actions"], 2);

    let analysis = bundle.analysis();
    assert!(analysis.entrypoints.contains(&"connector#test".to_string()));
    assert!(!analysis.unreachable.contains(&"method:build_url".to_string()));
    assert!(analysis.unreachable.contains(&"method:unused_helper".to_string()));

    let execute = &analysis.complexity["action:search_records#execute"];
    assert_eq!(execute.http_nodes, 1);
    assert!(!execute.truncated);
    // execute -> ping -> pong -> ping closes the longest path.
    assert_eq!(execute.max_depth, 3);
    assert_eq!(analysis.hotspots[0].id, "action:search_records#execute");
}

#[test]
fn undefined_and_unused_are_disjoint_from_their_sources() {
    let bundle = analyze(CONNECTOR, &settings());
    let declared: BTreeSet<&str> = bundle.root().names_of(IrKind::Method).into_iter().collect();
    let called: BTreeSet<&str> = bundle
        .graph()
        .edges()
        .filter(|e| e.to.starts_with("method:"))
        .map(|e| &e.to["method:".len()..])
        .collect();

    for issue in bundle.issues_with_code("undefined_method") {
        let name = issue.context["method"].as_str().unwrap();
        assert!(!declared.contains(name));
    }
    for issue in bundle.issues_with_code("unused_method") {
        let name = issue.context["method"].as_str().unwrap();
        assert!(!called.contains(name));
    }
}

#[test]
fn analysis_is_idempotent() {
    let first = serde_json::to_value(analyze(CONNECTOR, &settings())).unwrap();
    let second = serde_json::to_value(analyze(CONNECTOR, &settings())).unwrap();
    assert_eq!(first, second);
}

#[test]
fn salvage_names_match_full_parse() {
    let bundle = analyze(CONNECTOR, &settings());
    let scan = salvage::scan(CONNECTOR);
    fn names(entries: &[salvage::SalvagedEntry]) -> Vec<String> {
        entries.iter().map(|e| e.name.clone()).collect()
    }
    assert_eq!(names(&scan.actions), bundle.root().names_of(IrKind::Action));
    assert_eq!(names(&scan.triggers), bundle.root().names_of(IrKind::Trigger));
    assert_eq!(names(&scan.methods), bundle.root().names_of(IrKind::Method));
    assert!(scan.scan_errors.is_empty());
}

#[test]
fn unterminated_string_salvages() {
    let source = r#"
{
  title: 'Broken',
  actions: {
    first_action: {
      execute: lambda do |connection, input|
        get('/ok')
      end
    },
    second_action: {
      execute: lambda do |connection, input|
        get("/never/closed)
      end
    }
  },
  methods: {
    helper: lambda { |x| x }
  }
}
"#;
    let bundle = analyze(source, &settings());
    assert!(bundle.salvaged());
    let errors: Vec<_> = bundle
        .issues()
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, "syntax_error");
    assert!(errors[0].context["diagnostics"].as_array().is_some_and(|d| !d.is_empty()));

    let root = bundle.root();
    assert_eq!(root.name, salvage::SALVAGED_NAME);
    assert_eq!(
        root.names_of(IrKind::Action),
        vec!["first_action", "second_action"]
    );
    let kinds: Vec<IrKind> = root.children.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, vec![IrKind::Actions, IrKind::Triggers, IrKind::Methods]);
    assert!(bundle.graph().is_empty());
}

#[test]
fn missing_execute_is_reported_once() {
    let source = r#"
{
  title: 'Partial',
  actions: {
    no_execute: {
      input_fields: lambda { [] },
      output_fields: lambda { [] }
    }
  }
}
"#;
    let bundle = analyze(source, &settings());
    let missing: Vec<_> = bundle.issues_with_code("action_missing_required_keys").collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Warning);
    let keys = missing[0].context["missing"].as_array().unwrap();
    assert!(keys.iter().any(|k| k == "execute"));
    assert_eq!(bundle.root().names_of(IrKind::Action), vec!["no_execute"]);
}

#[test]
fn three_method_cycle_versus_chain() {
    let cyclic = r#"
{
  title: 'Cycle',
  methods: {
    a: lambda { call('b') },
    b: lambda { call('c') },
    c: lambda { call('a') }
  },
  actions: { run: { execute: lambda { call('a') } } }
}
"#;
    let bundle = analyze(cyclic, &settings());
    assert_eq!(
        bundle.analysis().cycles,
        vec![vec!["method:a", "method:b", "method:c"]]
    );

    let chain = cyclic.replace("c: lambda { call('a') }", "c: lambda { nil }");
    let bundle = analyze(&chain, &settings());
    assert!(bundle.analysis().cycles.is_empty());
    assert_eq!(bundle.issues_with_code("method_cycle").count(), 0);
}

#[test]
fn long_chain_truncates_at_depth_ceiling() {
    let mut source = String::from("{\n  title: 'Chain',\n  methods: {\n");
    for i in 0..200 {
        source.push_str(&format!("    m{i}: lambda {{ call('m{}') }},\n", i + 1));
    }
    source.push_str("    m200: lambda { nil }\n  },\n");
    source.push_str("  actions: { walk: { execute: lambda { call('m0') } } }\n}\n");

    let bundle = analyze(&source, &settings());
    assert!(!bundle.salvaged());
    let walk = &bundle.analysis().complexity["action:walk#execute"];
    assert!(walk.truncated);
    assert_eq!(walk.max_depth, 60);
    assert_eq!(walk.paths, 1);
    assert_eq!(walk.nodes, 61);
}

#[test]
fn document_found_behind_leading_statements() {
    let source = r#"
require 'json'
VERSION = '1.0'
helper = { title: 'Decoy', test: 1 }
{
  title: 'Real',
  connection: {},
  actions: {},
  triggers: {}
}
"#;
    let bundle = analyze(source, &settings());
    assert_eq!(bundle.root().name, "Real");
}

#[test]
fn no_connector_gives_placeholder() {
    let bundle = analyze("puts 'nothing to see'\n", &settings());
    assert!(!bundle.salvaged());
    assert_eq!(bundle.root().name, "(no connector)");
    assert_eq!(codes(bundle.issues()), vec!["no_connector_hash"]);
}

#[test]
fn dangerous_patterns() {
    let source = r#"
{
  title: 'Risky',
  actions: {
    run: {
      input_fields: lambda { [] },
      output_fields: lambda { [] },
      execute: lambda do |_c, input|
        eval(input['code'])
        system("ls #{input['dir']}")
        `whoami`
      end
    }
  }
}
"#;
    let bundle = analyze(source, &settings());
    assert_eq!(bundle.issues_with_code("dangerous_call").count(), 2);
    assert_eq!(bundle.issues_with_code("dangerous_xstr").count(), 1);
    assert!(bundle.graph().edges().all(|e| !e.to.contains("eval")));
}
