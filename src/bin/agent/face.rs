use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use webpilot::session::DebugEntry;
use webpilot::types::Action;
use webpilot::{AgentControl, AgentEvent, ConfirmationResolver};

/// Events streamed to the browser via SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Started { task: String },
    Requirement { required: u32, topic: Option<String> },
    Status { step: u32, message: String },
    Action { step: u32, action: Action },
    Blocked { action: Action, reason: String },
    Confirm { action: Action, reason: String },
    Error { message: String },
    Done {
        result: String,
        steps: u32,
        tokens: u64,
        cost: f64,
        incomplete: bool,
    },
    Stopped { steps: u32 },
    Ready,
}

impl UiEvent {
    fn name(&self) -> &'static str {
        match self {
            UiEvent::Started { .. } => "started",
            UiEvent::Requirement { .. } => "requirement",
            UiEvent::Status { .. } => "status",
            UiEvent::Action { .. } => "action",
            UiEvent::Blocked { .. } => "blocked",
            UiEvent::Confirm { .. } => "confirm",
            UiEvent::Error { .. } => "error",
            UiEvent::Done { .. } => "done",
            UiEvent::Stopped { .. } => "stopped",
            UiEvent::Ready => "ready",
        }
    }

    fn to_sse_event(&self) -> Event {
        Event::default()
            .event(self.name())
            .data(serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string()))
    }
}

impl From<&AgentEvent> for UiEvent {
    fn from(event: &AgentEvent) -> Self {
        match event {
            AgentEvent::Started { task } => UiEvent::Started { task: task.clone() },
            AgentEvent::RequirementDetected {
                required_count,
                topic,
            } => UiEvent::Requirement {
                required: *required_count,
                topic: topic.clone(),
            },
            AgentEvent::Status { step, message } => UiEvent::Status {
                step: *step,
                message: message.clone(),
            },
            AgentEvent::Action { step, action } => UiEvent::Action {
                step: *step,
                action: action.clone(),
            },
            AgentEvent::Blocked { action, reason } => UiEvent::Blocked {
                action: action.clone(),
                reason: reason.clone(),
            },
            AgentEvent::ConfirmationRequested { action, reason, .. } => UiEvent::Confirm {
                action: action.clone(),
                reason: reason.clone(),
            },
            AgentEvent::Error { message } => UiEvent::Error {
                message: message.clone(),
            },
            AgentEvent::Done {
                result,
                steps,
                tokens,
                cost,
                incomplete,
            } => UiEvent::Done {
                result: result.clone(),
                steps: *steps,
                tokens: *tokens,
                cost: *cost,
                incomplete: *incomplete,
            },
            AgentEvent::Stopped { steps } => UiEvent::Stopped { steps: *steps },
        }
    }
}

/// Shared between the HTTP handlers and the agent driver.
#[derive(Clone)]
pub struct FaceHandle {
    event_tx: broadcast::Sender<UiEvent>,
    pending: Arc<Mutex<Option<ConfirmationResolver>>>,
    debug_log: Arc<Mutex<Vec<DebugEntry>>>,
}

impl FaceHandle {
    pub fn ready(&self) {
        let _ = self.event_tx.send(UiEvent::Ready);
    }

    pub fn error(&self, message: String) {
        let _ = self.event_tx.send(UiEvent::Error { message });
    }

    pub fn store_debug_log(&self, entries: &[DebugEntry]) {
        if let Ok(mut slot) = self.debug_log.lock() {
            *slot = entries.to_vec();
        }
    }

    /// Relays agent events to SSE subscribers, holding on to the pending confirmation.
    pub async fn forward(self, mut events: mpsc::UnboundedReceiver<AgentEvent>) {
        while let Some(event) = events.recv().await {
            if let AgentEvent::ConfirmationRequested { resolver, .. } = &event {
                if let Ok(mut slot) = self.pending.lock() {
                    *slot = Some(resolver.clone());
                }
            }
            let _ = self.event_tx.send(UiEvent::from(&event));
        }
    }
}

struct AppState {
    cmd_tx: mpsc::Sender<String>,
    control: AgentControl,
    face: FaceHandle,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

#[derive(Deserialize)]
struct ConfirmPayload {
    approved: bool,
}

/// Start the web server on localhost, trying `port` then the next nine.
pub async fn start_server(
    port: u16,
    control: AgentControl,
) -> Result<(mpsc::Receiver<String>, FaceHandle)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<UiEvent>(128);

    let face = FaceHandle {
        event_tx,
        pending: Arc::new(Mutex::new(None)),
        debug_log: Arc::new(Mutex::new(Vec::new())),
    };
    let state = Arc::new(AppState {
        cmd_tx,
        control,
        face: face.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/confirm", post(confirm_handler))
        .route("/pause", post(pause_handler))
        .route("/resume", post(resume_handler))
        .route("/stop", post(stop_handler))
        .route("/debug", get(debug_handler))
        .route("/events", get(sse_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        if let Ok(l) = tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            bound = Some((l, p));
            break;
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!("could not bind to any port {port}-{}", port.saturating_add(9))
    })?;

    info!("web UI running at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "web UI server stopped");
        }
    });

    Ok((cmd_rx, face))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    info!(command = %payload.command, "task received from UI");
    match state.cmd_tx.try_send(payload.command) {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(_) => (StatusCode::CONFLICT, "agent is busy"),
    }
}

async fn confirm_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfirmPayload>,
) -> (StatusCode, String) {
    let resolver = state
        .face
        .pending
        .lock()
        .ok()
        .and_then(|mut slot| slot.take());
    let Some(resolver) = resolver else {
        return (StatusCode::NOT_FOUND, "no confirmation pending".to_string());
    };
    match resolver.resolve(payload.approved) {
        Ok(()) => {
            debug!(approved = payload.approved, "confirmation resolved");
            (StatusCode::OK, "ok".to_string())
        }
        Err(e) => {
            warn!(error = %e, "confirmation rejected");
            (StatusCode::CONFLICT, e.to_string())
        }
    }
}

async fn pause_handler(State(state): State<Arc<AppState>>) -> &'static str {
    state.control.pause();
    "ok"
}

async fn resume_handler(State(state): State<Arc<AppState>>) -> &'static str {
    state.control.resume();
    "ok"
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> &'static str {
    state.control.stop();
    "ok"
}

async fn debug_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DebugEntry>> {
    let entries = state
        .face
        .debug_log
        .lock()
        .map(|log| log.clone())
        .unwrap_or_default();
    Json(entries)
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.face.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result: Result<UiEvent, _>| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>webpilot</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0f1115; color: #dde1e7; font-family: system-ui, sans-serif; height: 100vh; display: flex; flex-direction: column; }
  header { padding: 18px 28px; border-bottom: 1px solid #1f2430; display: flex; align-items: center; gap: 12px; }
  header h1 { font-size: 18px; font-weight: 600; flex: 1; }
  .dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  .dot.busy { background: #f59e0b; }
  .main { flex: 1; display: flex; flex-direction: column; max-width: 820px; width: 100%; margin: 0 auto; padding: 20px 28px; gap: 14px; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; line-height: 1.45; border-left: 3px solid #3b82f6; background: #151922; }
  .entry.user { border-color: #8b5cf6; }
  .entry.action { font-family: ui-monospace, monospace; font-size: 13px; }
  .entry.status { border-color: #475569; color: #94a3b8; }
  .entry.error, .entry.blocked { border-color: #ef4444; color: #fca5a5; }
  .entry.done { border-color: #22c55e; color: #86efac; }
  #confirm { display: none; padding: 12px; border: 1px solid #f59e0b; border-radius: 6px; background: #1c1710; gap: 8px; align-items: center; }
  #confirm span { flex: 1; }
  .input-area { display: flex; gap: 8px; }
  #cmd { flex: 1; background: #151922; border: 1px solid #252b38; border-radius: 6px; padding: 10px 14px; color: #fff; font-size: 15px; }
  button { background: #3b82f6; color: #fff; border: none; border-radius: 6px; padding: 10px 16px; font-weight: 600; cursor: pointer; }
  button.secondary { background: #252b38; }
  button:disabled { background: #252b38; color: #666; cursor: not-allowed; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>webpilot</h1>
    <button class="secondary" onclick="post('/pause')">Pause</button>
    <button class="secondary" onclick="post('/resume')">Resume</button>
    <button class="secondary" onclick="post('/stop')">Stop</button>
  </header>
  <div class="main">
    <div id="log"></div>
    <div id="confirm">
      <span id="confirm-text"></span>
      <button onclick="confirmAction(true)">Approve</button>
      <button class="secondary" onclick="confirmAction(false)">Deny</button>
    </div>
    <div class="input-area">
      <input type="text" id="cmd" placeholder="Describe a task..." autofocus />
      <button id="send" onclick="send()">Run</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const sendBtn = document.getElementById('send');
  const dot = document.getElementById('status-dot');
  const confirmBox = document.getElementById('confirm');
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');

  function addEntry(cls, html) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.innerHTML = html;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    cmd.disabled = b;
    sendBtn.disabled = b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) cmd.focus();
  }

  function post(path, body) {
    return fetch(path, {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify(body || {}),
    });
  }

  async function send() {
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    addEntry('user', '<strong>You:</strong> ' + esc(text));
    setBusy(true);
    const res = await post('/command', {command: text});
    if (!res.ok) { addEntry('error', esc(await res.text())); setBusy(false); }
  }

  async function confirmAction(approved) {
    confirmBox.style.display = 'none';
    await post('/confirm', {approved});
  }

  cmd.addEventListener('keydown', e => { if (e.key === 'Enter') send(); });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));

  on('started', () => setBusy(true));
  on('requirement', d => addEntry('status', 'Conversation: ' + d.required + ' messages' + (d.topic ? ' about ' + esc(d.topic) : '')));
  on('status', d => addEntry('status', 'Step ' + d.step + ': ' + esc(d.message)));
  on('action', d => addEntry('action', 'Step ' + d.step + ' ' + esc(d.action.action) + ' ' + esc(JSON.stringify(d.action.params)) + (d.action.reasoning ? '<br>' + esc(d.action.reasoning) : '')));
  on('blocked', d => addEntry('blocked', '<strong>Blocked:</strong> ' + esc(d.reason)));
  on('confirm', d => {
    document.getElementById('confirm-text').textContent = d.reason + ' (' + d.action.action + ')';
    confirmBox.style.display = 'flex';
  });
  on('error', d => addEntry('error', '<strong>Error:</strong> ' + esc(d.message)));
  on('done', d => {
    confirmBox.style.display = 'none';
    addEntry('done', '<strong>Done' + (d.incomplete ? ' (incomplete)' : '') + ':</strong> ' + esc(d.result) +
      '<br>' + d.steps + ' steps, ' + d.tokens + ' tokens, $' + d.cost.toFixed(4));
  });
  on('stopped', d => { confirmBox.style.display = 'none'; addEntry('status', 'Stopped after ' + d.steps + ' steps.'); });
  on('ready', () => setBusy(false));

  addEntry('done', 'Agent ready. Describe a task to begin.');
</script>
</body>
</html>
"##;
