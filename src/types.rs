use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who authored a turn in the model-facing conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A message in the conversation history sent to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Select,
    Scroll,
    Navigate,
    Hover,
    Keypress,
    Copy,
    Wait,
    Extract,
    Done,
    TabOpen,
    TabSwitch,
    TabList,
    TabClose,
}

impl ActionKind {
    pub const ALL: [ActionKind; 15] = [
        ActionKind::Click,
        ActionKind::Type,
        ActionKind::Select,
        ActionKind::Scroll,
        ActionKind::Navigate,
        ActionKind::Hover,
        ActionKind::Keypress,
        ActionKind::Copy,
        ActionKind::Wait,
        ActionKind::Extract,
        ActionKind::Done,
        ActionKind::TabOpen,
        ActionKind::TabSwitch,
        ActionKind::TabList,
        ActionKind::TabClose,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Select => "select",
            ActionKind::Scroll => "scroll",
            ActionKind::Navigate => "navigate",
            ActionKind::Hover => "hover",
            ActionKind::Keypress => "keypress",
            ActionKind::Copy => "copy",
            ActionKind::Wait => "wait",
            ActionKind::Extract => "extract",
            ActionKind::Done => "done",
            ActionKind::TabOpen => "tab_open",
            ActionKind::TabSwitch => "tab_switch",
            ActionKind::TabList => "tab_list",
            ActionKind::TabClose => "tab_close",
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|kind| kind.as_str() == lower)
    }

    /// Kinds that never change anything the user would care about.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            ActionKind::Scroll
                | ActionKind::Wait
                | ActionKind::Extract
                | ActionKind::Done
                | ActionKind::Hover
                | ActionKind::Keypress
                | ActionKind::TabList
                | ActionKind::Copy
        )
    }

    /// Kinds dispatched to the navigation/tab collaborator instead of the executor.
    pub fn is_navigation(self) -> bool {
        matches!(
            self,
            ActionKind::Navigate
                | ActionKind::TabOpen
                | ActionKind::TabSwitch
                | ActionKind::TabList
                | ActionKind::TabClose
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single validated step the LLM asks the agent to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "action")]
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub reasoning: String,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            params: Map::new(),
            reasoning: String::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key).filter(|value| !value.is_null())
    }

    /// String or number param rendered as text.
    pub fn param_text(&self, key: &str) -> Option<String> {
        match self.param(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.param(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
            _ => false,
        }
    }

    /// Wire form used for the assistant turn.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"action\":\"{}\"}}", self.kind))
    }
}

/// One interactive element from a perception snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractiveElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl InteractiveElement {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            label: label.into(),
            ..Default::default()
        }
    }

    /// `[id] type "label" value="…" checked=… [disabled] href="…"`
    pub fn render_line(&self) -> String {
        let mut line = format!("[{}] {} \"{}\"", self.id, self.kind, self.label);
        if let Some(value) = self.value.as_deref().filter(|v| !v.is_empty()) {
            line.push_str(&format!(" value=\"{value}\""));
        }
        if let Some(checked) = self.checked {
            line.push_str(&format!(" checked={checked}"));
        }
        if self.disabled == Some(true) {
            line.push_str(" [disabled]");
        }
        if let Some(href) = self.href.as_deref().filter(|h| !h.is_empty()) {
            line.push_str(&format!(" href=\"{href}\""));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
    pub max_y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub url: String,
    pub active: bool,
}

/// What the agent observes about the environment at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub interactive_elements: Vec<InteractiveElement>,
    #[serde(default)]
    pub page_text: String,
    #[serde(default)]
    pub scroll_position: ScrollPosition,
    #[serde(default)]
    pub tabs: Vec<TabInfo>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Built from the tab listing because capture kept failing.
    #[serde(default)]
    pub degraded: bool,
}

impl PageState {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            interactive_elements: Vec::new(),
            page_text: String::new(),
            scroll_position: ScrollPosition::default(),
            tabs: Vec::new(),
            timestamp: Utc::now(),
            degraded: false,
        }
    }

    /// Minimal state derived from the tab listing alone.
    pub fn degraded_from_tabs(tabs: Vec<TabInfo>) -> Self {
        let active = tabs.iter().find(|t| t.active).or_else(|| tabs.first());
        let url = active
            .map(|t| t.url.clone())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let title = active
            .map(|t| t.title.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let mut state = Self::new(url, title);
        state.tabs = tabs;
        state.degraded = true;
        state
    }

    pub fn find_element(&self, id: &str) -> Option<&InteractiveElement> {
        self.interactive_elements.iter().find(|el| el.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Confirm,
    Block,
}

impl SafetyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyLevel::Safe => "safe",
            SafetyLevel::Confirm => "confirm",
            SafetyLevel::Block => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub level: SafetyLevel,
    pub reason: String,
}

impl SafetyVerdict {
    pub fn safe() -> Self {
        Self {
            level: SafetyLevel::Safe,
            reason: String::new(),
        }
    }
}

/// Minimum number of sent messages a conversational task implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRequirement {
    pub required_count: u32,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Outcome reported by the action executor. Failures are values, never panics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl ExecutionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabSelector {
    Index(usize),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchedTab {
    pub tab_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub max_text_chars: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_text_chars: 3000,
        }
    }
}
