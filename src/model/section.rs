/// Known top-level sections of a connector document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    Title,
    Connection,
    Test,
    Actions,
    Triggers,
    ObjectDefinitions,
    PickLists,
    Methods,
    SecureTunnel,
    WebhookKeys,
    Streams,
    CustomAction,
    CustomActionHelp,
}

/// Top-level keys that are accepted without an `unknown_root_key` note but
/// do not count towards recognising a document.
pub const EXTRA_ROOT_KEYS: &[&str] = &["description"];

impl Section {
    pub const ALL: [Section; 13] = [
        Section::Title,
        Section::Connection,
        Section::Test,
        Section::Actions,
        Section::Triggers,
        Section::ObjectDefinitions,
        Section::PickLists,
        Section::Methods,
        Section::SecureTunnel,
        Section::WebhookKeys,
        Section::Streams,
        Section::CustomAction,
        Section::CustomActionHelp,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Section::Title => "title",
            Section::Connection => "connection",
            Section::Test => "test",
            Section::Actions => "actions",
            Section::Triggers => "triggers",
            Section::ObjectDefinitions => "object_definitions",
            Section::PickLists => "pick_lists",
            Section::Methods => "methods",
            Section::SecureTunnel => "secure_tunnel",
            Section::WebhookKeys => "webhook_keys",
            Section::Streams => "streams",
            Section::CustomAction => "custom_action",
            Section::CustomActionHelp => "custom_action_help",
        }
    }

    /// `picklists` is accepted as an alias of `pick_lists`.
    pub fn from_key(key: &str) -> Option<Section> {
        match key {
            "picklists" => Some(Section::PickLists),
            _ => Section::ALL.into_iter().find(|s| s.key() == key),
        }
    }
}
