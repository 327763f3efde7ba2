use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::page_state::DEFAULT_TEXT_BUDGET;
use crate::prompts::SYSTEM_PROMPT;

/// Controller tunables. Immutable once handed to [`crate::Agent`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_steps: u32,
    /// Upper bound on conversation turns, task turn included.
    pub max_history_turns: usize,
    pub poll_interval: Duration,
    pub capture_retry_backoff: Duration,
    pub capture_failure_limit: u32,
    pub error_backoff: Duration,
    pub navigate_settle: Duration,
    pub tab_open_settle: Duration,
    pub tab_switch_settle: Duration,
    pub tab_close_settle: Duration,
    pub action_settle: Duration,
    pub use_screenshots: bool,
    pub debug_log_capacity: usize,
    pub max_page_text_chars: usize,
    pub blocked_keywords: Vec<String>,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_history_turns: 40,
            poll_interval: Duration::from_millis(200),
            capture_retry_backoff: Duration::from_secs(2),
            capture_failure_limit: 2,
            error_backoff: Duration::from_secs(1),
            navigate_settle: Duration::from_secs(2),
            tab_open_settle: Duration::from_millis(1500),
            tab_switch_settle: Duration::from_secs(1),
            tab_close_settle: Duration::from_millis(500),
            action_settle: Duration::from_millis(800),
            use_screenshots: false,
            debug_log_capacity: 200,
            max_page_text_chars: DEFAULT_TEXT_BUDGET,
            blocked_keywords: Vec::new(),
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }
}

impl AgentConfig {
    /// Defaults overridden by `AGENT_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    pub fn apply_env(&mut self) {
        set_parsed(&mut self.max_steps, "AGENT_MAX_STEPS");
        set_parsed(&mut self.max_history_turns, "AGENT_MAX_HISTORY_TURNS");
        set_parsed(&mut self.use_screenshots, "AGENT_USE_SCREENSHOTS");
        if let Some(raw) = env_value("AGENT_BLOCKED_KEYWORDS") {
            self.blocked_keywords = split_list(&raw);
        }
        self.max_steps = self.max_steps.max(1);
        self.max_history_turns = self.max_history_turns.max(3);
    }

    /// Zero-delay variant for tests and scripted runs.
    pub fn without_delays(mut self) -> Self {
        self.poll_interval = Duration::from_millis(1);
        self.capture_retry_backoff = Duration::ZERO;
        self.error_backoff = Duration::ZERO;
        self.navigate_settle = Duration::ZERO;
        self.tab_open_settle = Duration::ZERO;
        self.tab_switch_settle = Duration::ZERO;
        self.tab_close_settle = Duration::ZERO;
        self.action_settle = Duration::ZERO;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Xai,
    Google,
    DeepSeek,
    Ollama,
    LmStudio,
    Custom,
}

impl ProviderKind {
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::OpenAi | ProviderKind::Custom => "https://api.openai.com/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Xai => "https://api.x.ai/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::DeepSeek => "https://api.deepseek.com/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
            ProviderKind::LmStudio => "http://localhost:1234/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderKind::OpenAi | ProviderKind::Custom => "gpt-4o",
            ProviderKind::Anthropic => "claude-sonnet-4-20250514",
            ProviderKind::Xai => "grok-2",
            ProviderKind::Google => "gemini-2.0-flash",
            ProviderKind::DeepSeek => "deepseek-chat",
            ProviderKind::Ollama => "llama3.1",
            ProviderKind::LmStudio => "loaded-model",
        }
    }

    /// Provider-specific variable consulted when `LLM_API_KEY` is unset.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi | ProviderKind::Custom => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::Xai => Some("XAI_API_KEY"),
            ProviderKind::Google => Some("GEMINI_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::Ollama | ProviderKind::LmStudio => None,
        }
    }

    pub fn requires_api_key(self) -> bool {
        self.api_key_env().is_some()
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "xai" | "grok" => Ok(Self::Xai),
            "google" | "gemini" => Ok(Self::Google),
            "deepseek" => Ok(Self::DeepSeek),
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::LmStudio),
            "custom" => Ok(Self::Custom),
            other => Err(AgentError::Config(format!("unknown provider: {other}"))),
        }
    }
}

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * self.output_per_million
    }

    /// Known price for `model`, falling back to the provider's typical tier.
    pub fn for_model(provider: ProviderKind, model: &str) -> Self {
        const KNOWN: &[(&str, ModelPricing)] = &[
            ("gpt-4o-mini", ModelPricing::new(0.15, 0.60)),
            ("gpt-4o", ModelPricing::new(2.50, 10.00)),
            ("gpt-4-turbo", ModelPricing::new(10.00, 30.00)),
            ("grok-2", ModelPricing::new(2.00, 10.00)),
            ("claude-sonnet-4-20250514", ModelPricing::new(3.00, 15.00)),
            ("claude-haiku-4-5-20251001", ModelPricing::new(0.80, 4.00)),
        ];
        if let Some((_, pricing)) = KNOWN.iter().find(|(name, _)| *name == model) {
            return *pricing;
        }
        match provider {
            ProviderKind::Anthropic => ModelPricing::new(3.00, 15.00),
            ProviderKind::Ollama | ProviderKind::LmStudio => ModelPricing::new(0.0, 0.0),
            _ => ModelPricing::new(2.50, 10.00),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub pricing: ModelPricing,
}

impl ProviderConfig {
    pub fn new(provider: ProviderKind) -> Self {
        let model = provider.default_model().to_string();
        Self {
            provider,
            pricing: ModelPricing::for_model(provider, &model),
            model,
            base_url: provider.default_base_url().to_string(),
            api_key: String::new(),
            temperature: 0.2,
            max_tokens: 1000,
            request_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self.pricing = ModelPricing::for_model(self.provider, &self.model);
        self
    }

    /// Reads `LLM_*` variables plus the provider's own key variable.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_env_with(None)
    }

    /// Like [`ProviderConfig::from_env`], with `provider` taking precedence over `LLM_PROVIDER`.
    pub fn from_env_with(provider: Option<ProviderKind>) -> Result<Self, AgentError> {
        let provider = match (provider, env_value("LLM_PROVIDER")) {
            (Some(kind), _) => kind,
            (None, Some(raw)) => raw.parse()?,
            (None, None) => ProviderKind::OpenAi,
        };
        let mut cfg = Self::new(provider);
        if let Some(model) = env_value("LLM_MODEL") {
            cfg = cfg.with_model(model);
        }
        if let Some(url) = env_value("LLM_BASE_URL") {
            cfg.base_url = url.trim_end_matches('/').to_string();
        }
        cfg.api_key = env_value("LLM_API_KEY")
            .or_else(|| provider.api_key_env().and_then(env_value))
            .unwrap_or_default();
        set_parsed(&mut cfg.temperature, "LLM_TEMPERATURE");
        set_parsed(&mut cfg.max_tokens, "LLM_MAX_TOKENS");
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".into()));
        }
        if self.provider.requires_api_key() && self.api_key.is_empty() {
            return Err(AgentError::Config(format!(
                "no API key for {:?}; set LLM_API_KEY or {}",
                self.provider,
                self.provider.api_key_env().unwrap_or("LLM_API_KEY")
            )));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn set_parsed<T: FromStr>(slot: &mut T, name: &str) {
    if let Some(value) = env_value(name).and_then(|raw| raw.parse().ok()) {
        *slot = value;
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
