//! Seams between the controller and the outside world.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::types::{
    Action, CaptureOptions, ConversationTurn, ExecutionResult, LlmResponse, PageState,
    SwitchedTab, TabInfo, TabSelector, Usage,
};

/// Captures the live environment. Must not change it.
#[async_trait]
pub trait Perception: Send + Sync {
    async fn capture(&self, options: &CaptureOptions) -> Result<PageState, AgentError>;

    /// Base64 image of the visible viewport, when the backend can take one.
    async fn screenshot(&self) -> Result<Option<String>, AgentError> {
        Ok(None)
    }
}

/// Performs element-targeted actions. Every failure is reported in the result.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action) -> ExecutionResult;
}

#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), AgentError>;

    /// Returns the new tab's id.
    async fn open_tab(&self, url: Option<&str>, activate: bool) -> Result<String, AgentError>;

    async fn switch_tab(&self, selector: &TabSelector) -> Result<SwitchedTab, AgentError>;

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, AgentError>;

    /// Closes `tab_id`, or the active tab when `None`.
    async fn close_tab(&self, tab_id: Option<&str>) -> Result<(), AgentError>;
}

/// One provider's chat endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn send(
        &self,
        system_prompt: &str,
        conversation: &[ConversationTurn],
        screenshot: Option<&str>,
    ) -> Result<LlmResponse, AgentError>;

    fn supports_vision(&self) -> bool {
        false
    }

    /// Estimated USD cost of one call.
    fn estimate_cost(&self, usage: &Usage) -> f64 {
        let _ = usage;
        0.0
    }
}
