use thiserror::Error;

/// Failures surfaced by the controller and its collaborators.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The perception layer could not produce a snapshot.
    #[error("page capture failed: {0}")]
    Perception(String),

    /// The LLM call failed or returned an unusable payload.
    #[error("model call failed: {0}")]
    ModelCall(String),

    #[error("action execution failed: {0}")]
    Execution(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    /// The request/response channel to a collaborator is gone.
    #[error("collaborator transport closed: {0}")]
    Transport(String),

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: String, millis: u128 },

    /// Terminal: the run used every step it was allowed.
    #[error("max steps ({max_steps}) reached")]
    StepCeilingExceeded { max_steps: u32 },

    #[error("confirmation was already resolved")]
    ConfirmationAlreadyResolved,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AgentError {
    pub fn perception(message: impl Into<String>) -> Self {
        Self::Perception(message.into())
    }

    pub fn model_call(message: impl Into<String>) -> Self {
        Self::ModelCall(message.into())
    }

    pub fn navigation(message: impl Into<String>) -> Self {
        Self::Navigation(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StepCeilingExceeded { .. })
    }
}
