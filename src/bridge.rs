//! Request/response transport between the controller and an environment backend.
//!
//! The backend usually lives on its own thread (a blocking browser driver) and
//! answers [`EnvRequest`]s one at a time. Each request carries a oneshot reply
//! channel and is bounded by a timeout on the client side.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::AgentError;
use crate::interfaces::{ActionExecutor, Navigator, Perception};
use crate::types::{
    Action, CaptureOptions, ExecutionResult, PageState, SwitchedTab, TabInfo, TabSelector,
};

#[derive(Debug, Clone)]
pub enum EnvRequest {
    Capture(CaptureOptions),
    Screenshot,
    Execute(Action),
    Navigate(String),
    OpenTab { url: Option<String>, activate: bool },
    SwitchTab(TabSelector),
    ListTabs,
    CloseTab(Option<String>),
}

impl EnvRequest {
    pub fn name(&self) -> &'static str {
        match self {
            EnvRequest::Capture(_) => "capture",
            EnvRequest::Screenshot => "screenshot",
            EnvRequest::Execute(_) => "execute",
            EnvRequest::Navigate(_) => "navigate",
            EnvRequest::OpenTab { .. } => "tab_open",
            EnvRequest::SwitchTab(_) => "tab_switch",
            EnvRequest::ListTabs => "tab_list",
            EnvRequest::CloseTab(_) => "tab_close",
        }
    }

    fn error(&self, message: String) -> AgentError {
        match self {
            EnvRequest::Capture(_) | EnvRequest::Screenshot => AgentError::Perception(message),
            EnvRequest::Execute(_) => AgentError::Execution(message),
            _ => AgentError::Navigation(message),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EnvResponse {
    Page(Box<PageState>),
    Screenshot(Option<String>),
    Executed(ExecutionResult),
    Navigated,
    TabOpened(String),
    Switched(SwitchedTab),
    Tabs(Vec<TabInfo>),
    Closed,
}

/// Serves environment requests. Errors are plain messages; the client maps them.
pub trait EnvironmentBackend {
    fn handle(&mut self, request: EnvRequest) -> Result<EnvResponse, String>;
}

struct Envelope {
    request: EnvRequest,
    reply: oneshot::Sender<Result<EnvResponse, String>>,
}

pub fn channel(capacity: usize, timeout: Duration) -> (BridgeClient, BridgeServer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BridgeClient { tx, timeout }, BridgeServer { rx })
}

#[derive(Clone)]
pub struct BridgeClient {
    tx: mpsc::Sender<Envelope>,
    timeout: Duration,
}

impl BridgeClient {
    pub async fn request(&self, request: EnvRequest) -> Result<EnvResponse, AgentError> {
        let op = request.name();
        let on_error = request.clone();
        let (reply, reply_rx) = oneshot::channel();

        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| AgentError::transport(format!("{op}: backend is gone")))?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Err(_) => Err(AgentError::Timeout {
                operation: op.to_string(),
                millis: self.timeout.as_millis(),
            }),
            Ok(Err(_)) => Err(AgentError::transport(format!(
                "{op}: backend dropped the request"
            ))),
            Ok(Ok(result)) => result.map_err(|message| on_error.error(message)),
        }
    }
}

fn unexpected(op: &str, response: &EnvResponse) -> AgentError {
    AgentError::transport(format!("{op}: unexpected response {response:?}"))
}

#[async_trait]
impl Perception for BridgeClient {
    async fn capture(&self, options: &CaptureOptions) -> Result<PageState, AgentError> {
        match self.request(EnvRequest::Capture(*options)).await? {
            EnvResponse::Page(page) => Ok(*page),
            other => Err(unexpected("capture", &other)),
        }
    }

    async fn screenshot(&self) -> Result<Option<String>, AgentError> {
        match self.request(EnvRequest::Screenshot).await? {
            EnvResponse::Screenshot(shot) => Ok(shot),
            other => Err(unexpected("screenshot", &other)),
        }
    }
}

#[async_trait]
impl ActionExecutor for BridgeClient {
    async fn execute(&self, action: &Action) -> ExecutionResult {
        match self.request(EnvRequest::Execute(action.clone())).await {
            Ok(EnvResponse::Executed(result)) => result,
            Ok(other) => ExecutionResult::failed(unexpected("execute", &other).to_string()),
            Err(err) => ExecutionResult::failed(err.to_string()),
        }
    }
}

#[async_trait]
impl Navigator for BridgeClient {
    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        match self.request(EnvRequest::Navigate(url.to_string())).await? {
            EnvResponse::Navigated => Ok(()),
            other => Err(unexpected("navigate", &other)),
        }
    }

    async fn open_tab(&self, url: Option<&str>, activate: bool) -> Result<String, AgentError> {
        let request = EnvRequest::OpenTab {
            url: url.map(str::to_string),
            activate,
        };
        match self.request(request).await? {
            EnvResponse::TabOpened(id) => Ok(id),
            other => Err(unexpected("tab_open", &other)),
        }
    }

    async fn switch_tab(&self, selector: &TabSelector) -> Result<SwitchedTab, AgentError> {
        match self.request(EnvRequest::SwitchTab(selector.clone())).await? {
            EnvResponse::Switched(tab) => Ok(tab),
            other => Err(unexpected("tab_switch", &other)),
        }
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, AgentError> {
        match self.request(EnvRequest::ListTabs).await? {
            EnvResponse::Tabs(tabs) => Ok(tabs),
            other => Err(unexpected("tab_list", &other)),
        }
    }

    async fn close_tab(&self, tab_id: Option<&str>) -> Result<(), AgentError> {
        match self
            .request(EnvRequest::CloseTab(tab_id.map(str::to_string)))
            .await?
        {
            EnvResponse::Closed => Ok(()),
            other => Err(unexpected("tab_close", &other)),
        }
    }
}

pub struct BridgeServer {
    rx: mpsc::Receiver<Envelope>,
}

impl BridgeServer {
    /// Answers requests on the current (non-async) thread until every client is dropped.
    pub fn serve_blocking<B: EnvironmentBackend>(mut self, backend: &mut B) {
        while let Some(envelope) = self.rx.blocking_recv() {
            Self::answer(backend, envelope);
        }
        debug!("bridge closed");
    }

    pub async fn serve<B: EnvironmentBackend>(mut self, backend: &mut B) {
        while let Some(envelope) = self.rx.recv().await {
            Self::answer(backend, envelope);
        }
        debug!("bridge closed");
    }

    fn answer<B: EnvironmentBackend>(backend: &mut B, envelope: Envelope) {
        let op = envelope.request.name();
        let result = backend.handle(envelope.request);
        if envelope.reply.send(result).is_err() {
            debug!(op, "requester gave up before the reply");
        }
    }
}
