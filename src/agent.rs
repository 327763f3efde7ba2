//! The capture → decide → act loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::interfaces::{ActionExecutor, LlmClient, Navigator, Perception};
use crate::page_state::format_page_state;
use crate::parser;
use crate::prompts;
use crate::requirement::{self, DoneDecision};
use crate::safety::SafetyClassifier;
use crate::session::{AgentSession, DebugEntry};
use crate::types::{
    Action, ActionKind, CaptureOptions, ExecutionResult, PageState, SafetyLevel, TabSelector,
};

/// Stop/pause flags shared between the running loop and whoever drives it.
#[derive(Debug, Clone, Default)]
pub struct AgentControl {
    inner: Arc<ControlFlags>,
}

#[derive(Debug, Default)]
struct ControlFlags {
    running: AtomicBool,
    paused: AtomicBool,
    confirming: AtomicBool,
}

impl AgentControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes effect within one poll interval.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.confirming.store(false, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Paused by the user or held on a pending confirmation.
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst) || self.is_confirming()
    }

    pub fn is_confirming(&self) -> bool {
        self.inner.confirming.load(Ordering::SeqCst)
    }

    fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.confirming.store(false, Ordering::SeqCst);
    }

    /// Holds the run on a confirmation without touching the user's own pause.
    fn set_confirming(&self, confirming: bool) {
        self.inner.confirming.store(confirming, Ordering::SeqCst);
    }
}

/// Answers one confirmation request. Only the first resolution counts.
#[derive(Clone)]
pub struct ConfirmationResolver {
    tx: Arc<Mutex<Option<oneshot::Sender<bool>>>>,
}

impl ConfirmationResolver {
    fn new() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    pub fn resolve(&self, approved: bool) -> Result<(), AgentError> {
        let sender = self
            .tx
            .lock()
            .map_err(|_| AgentError::ConfirmationAlreadyResolved)?
            .take()
            .ok_or(AgentError::ConfirmationAlreadyResolved)?;
        sender
            .send(approved)
            .map_err(|_| AgentError::transport("controller is no longer waiting for confirmation"))
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }
}

impl fmt::Debug for ConfirmationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationResolver")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Progress notifications emitted while a run is in flight.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Started {
        task: String,
    },
    RequirementDetected {
        required_count: u32,
        topic: Option<String>,
    },
    Status {
        step: u32,
        message: String,
    },
    Action {
        step: u32,
        action: Action,
    },
    Blocked {
        action: Action,
        reason: String,
    },
    ConfirmationRequested {
        action: Action,
        reason: String,
        resolver: ConfirmationResolver,
    },
    Error {
        message: String,
    },
    Done {
        result: String,
        steps: u32,
        tokens: u64,
        cost: f64,
        incomplete: bool,
    },
    Stopped {
        steps: u32,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed {
        result: String,
        steps: u32,
        tokens: u64,
        cost: f64,
        /// `done` was force-accepted before the conversation requirement was met.
        incomplete: bool,
    },
    Stopped {
        steps: u32,
    },
}

enum StepFlow {
    Continue,
    Finished(RunOutcome),
    Stopped,
}

enum Confirmation {
    Approved,
    Denied,
    Stopped,
}

pub struct Agent {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    perception: Arc<dyn Perception>,
    executor: Arc<dyn ActionExecutor>,
    navigator: Arc<dyn Navigator>,
    safety: SafetyClassifier,
    control: AgentControl,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    last_debug_log: Vec<DebugEntry>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        llm: Arc<dyn LlmClient>,
        perception: Arc<dyn Perception>,
        executor: Arc<dyn ActionExecutor>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        let safety = SafetyClassifier::with_blocked_keywords(&config.blocked_keywords);
        Self {
            config,
            llm,
            perception,
            executor,
            navigator,
            safety,
            control: AgentControl::new(),
            events: None,
            last_debug_log: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn control(&self) -> AgentControl {
        self.control.clone()
    }

    /// Debug log of the most recent run.
    pub fn debug_log(&self) -> &[DebugEntry] {
        &self.last_debug_log
    }

    /// Drives one task to completion, stop, or the step ceiling.
    pub async fn run(&mut self, task: &str) -> Result<RunOutcome, AgentError> {
        self.control.start();

        let requirement = requirement::derive(task);
        let mut session = AgentSession::new(
            task,
            prompts::task_turn(task),
            requirement.clone(),
            self.config.debug_log_capacity,
        );

        if let Some(req) = &requirement {
            info!(required = req.required_count, topic = ?req.topic, "conversation requirement detected");
            session.log(
                "conv_tracking",
                json!({ "required": req.required_count, "topic": req.topic }),
            );
            self.emit(AgentEvent::RequirementDetected {
                required_count: req.required_count,
                topic: req.topic.clone(),
            });
        }
        info!(max_steps = self.config.max_steps, "run started");
        self.emit(AgentEvent::Started {
            task: task.to_string(),
        });

        let result = self.drive(&mut session).await;

        self.control.stop();
        self.last_debug_log = session.debug_log.into_vec();
        result
    }

    async fn drive(&self, session: &mut AgentSession) -> Result<RunOutcome, AgentError> {
        let max_steps = self.config.max_steps;

        while self.control.is_running() && session.step_count < max_steps {
            if !self.wait_while_paused().await {
                break;
            }
            session.step_count += 1;

            let flow = match self.step(session).await {
                Ok(flow) => flow,
                Err(err) => {
                    warn!(step = session.step_count, error = %err, "step failed");
                    session.log("error", json!({ "message": err.to_string() }));
                    self.emit(AgentEvent::Error {
                        message: err.to_string(),
                    });
                    self.sleep(self.config.error_backoff).await;
                    StepFlow::Continue
                }
            };

            match flow {
                StepFlow::Continue => {}
                StepFlow::Finished(outcome) => return Ok(outcome),
                StepFlow::Stopped => break,
            }

            session.conversation.trim(self.config.max_history_turns);
        }

        if self.control.is_running() && session.step_count >= max_steps {
            let err = AgentError::StepCeilingExceeded { max_steps };
            warn!(max_steps, "step ceiling reached");
            self.emit(AgentEvent::Error {
                message: err.to_string(),
            });
            return Err(err);
        }

        info!(steps = session.step_count, "run stopped");
        self.emit(AgentEvent::Stopped {
            steps: session.step_count,
        });
        Ok(RunOutcome::Stopped {
            steps: session.step_count,
        })
    }

    async fn step(&self, session: &mut AgentSession) -> Result<StepFlow, AgentError> {
        let step = session.step_count;

        self.status(step, "Capturing page...");
        let Some(page) = self.perceive(session).await else {
            return Ok(StepFlow::Continue);
        };

        let snapshot = format_page_state(&page, &session.task, self.config.max_page_text_chars);
        session.conversation.set_snapshot(&snapshot);
        session.log(
            "capture",
            json!({
                "url": page.url,
                "elements": page.interactive_elements.len(),
                "has_text": !page.page_text.is_empty(),
                "tabs": page.tabs.len(),
                "degraded": page.degraded,
            }),
        );

        let screenshot = self.screenshot().await;

        self.status(step, "Thinking...");
        let response = self
            .llm
            .send(
                &self.config.system_prompt,
                session.conversation.turns(),
                screenshot.as_deref(),
            )
            .await?;
        session.total_tokens += response.usage.total();
        session.total_cost += self.llm.estimate_cost(&response.usage);
        session.log(
            "llm_response",
            json!({
                "raw": response.text,
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
                "finish_reason": response.finish_reason,
            }),
        );

        let action = match parser::parse(&response.text) {
            Ok(action) => action,
            Err(failure) => {
                warn!(step, reason = %failure.reason, "unparseable model response");
                session.log(
                    "parsed_action",
                    json!({ "error": failure.reason, "raw": failure.raw_text }),
                );
                self.emit(AgentEvent::Error {
                    message: format!("Parse error: {}", failure.reason),
                });
                let reply = if failure.raw_text.trim().is_empty() {
                    prompts::EMPTY_REPLY.to_string()
                } else {
                    failure.raw_text
                };
                session.conversation.push_assistant(reply);
                session.conversation.push_user(prompts::PARSE_RETRY);
                return Ok(StepFlow::Continue);
            }
        };
        debug!(step, kind = %action.kind, "parsed action");
        session.log(
            "parsed_action",
            serde_json::to_value(&action).unwrap_or(Value::Null),
        );
        session.conversation.push_assistant(action.to_json());

        if action.kind == ActionKind::Done {
            return Ok(self.handle_done(session, &action));
        }

        if action.kind.is_navigation() {
            self.emit(AgentEvent::Action {
                step,
                action: action.clone(),
            });
            let (feedback, settle) = self.dispatch_navigation(&action).await;
            session.conversation.push_user(feedback);
            self.sleep(settle).await;
            return Ok(StepFlow::Continue);
        }

        let verdict = self.safety.classify(&action, &page);
        session.log(
            "safety_check",
            json!({ "level": verdict.level.as_str(), "reason": verdict.reason }),
        );
        match verdict.level {
            SafetyLevel::Safe => {}
            SafetyLevel::Block => {
                warn!(step, kind = %action.kind, reason = %verdict.reason, "action blocked");
                self.emit(AgentEvent::Blocked {
                    action,
                    reason: verdict.reason.clone(),
                });
                session.conversation.push_user(format!(
                    "BLOCKED: {} Try a different approach.",
                    verdict.reason
                ));
                return Ok(StepFlow::Continue);
            }
            SafetyLevel::Confirm => match self.await_confirmation(&action, &verdict.reason).await {
                Confirmation::Approved => info!(step, kind = %action.kind, "action approved"),
                Confirmation::Denied => {
                    info!(step, kind = %action.kind, "action declined");
                    session
                        .conversation
                        .push_user("User declined this action. Try a different approach.");
                    return Ok(StepFlow::Continue);
                }
                Confirmation::Stopped => return Ok(StepFlow::Stopped),
            },
        }

        self.emit(AgentEvent::Action {
            step,
            action: action.clone(),
        });
        let result = self.executor.execute(&action).await;
        session.log(
            "action_result",
            serde_json::to_value(&result).unwrap_or(Value::Null),
        );
        let feedback = self.execution_feedback(session, &action, &result);
        session.conversation.push_user(feedback);
        self.sleep(self.config.action_settle).await;

        Ok(StepFlow::Continue)
    }

    /// Captures the page, retrying once and then degrading to the tab listing.
    async fn perceive(&self, session: &mut AgentSession) -> Option<PageState> {
        let options = CaptureOptions {
            max_text_chars: self.config.max_page_text_chars,
        };

        match self.perception.capture(&options).await {
            Ok(mut page) => {
                session.capture_failure_streak = 0;
                if page.tabs.is_empty() {
                    if let Ok(tabs) = self.navigator.list_tabs().await {
                        page.tabs = tabs;
                    }
                }
                Some(page)
            }
            Err(err) => {
                session.capture_failure_streak += 1;
                let streak = session.capture_failure_streak;
                warn!(step = session.step_count, streak, error = %err, "capture failed");
                session.log(
                    "error",
                    json!({ "capture": err.to_string(), "streak": streak }),
                );
                self.emit(AgentEvent::Error {
                    message: format!("Capture failed: {err}"),
                });

                if streak < self.config.capture_failure_limit.max(1) {
                    self.sleep(self.config.capture_retry_backoff).await;
                    return None;
                }

                let tabs = match self.navigator.list_tabs().await {
                    Ok(tabs) => tabs,
                    Err(err) => {
                        warn!(error = %err, "tab listing fallback failed");
                        Vec::new()
                    }
                };
                session.capture_failure_streak = 0;
                self.status(session.step_count, "Using minimal context...");
                Some(PageState::degraded_from_tabs(tabs))
            }
        }
    }

    async fn screenshot(&self) -> Option<String> {
        if !self.config.use_screenshots || !self.llm.supports_vision() {
            return None;
        }
        match self.perception.screenshot().await {
            Ok(shot) => shot,
            Err(err) => {
                debug!(error = %err, "screenshot skipped");
                None
            }
        }
    }

    fn handle_done(&self, session: &mut AgentSession, action: &Action) -> StepFlow {
        let result = action
            .param_text("result")
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| action.reasoning.clone());

        let decision = requirement::gate_done(
            session.requirement.as_ref(),
            session.messages_sent,
            &mut session.done_rejections,
        );
        match decision {
            DoneDecision::Accept => self.finish(session, result, false),
            DoneDecision::ForceAccept { note } => {
                warn!(rejections = session.done_rejections, "accepting done with unmet requirement");
                session.log(
                    "done_forced",
                    json!({ "reason": "rejection limit reached", "sent": session.messages_sent }),
                );
                self.finish(session, format!("{result} ({note})"), true)
            }
            DoneDecision::Reject { feedback } => {
                let required = session
                    .requirement
                    .as_ref()
                    .map(|r| r.required_count)
                    .unwrap_or_default();
                session.log(
                    "done_rejected",
                    json!({
                        "sent": session.messages_sent,
                        "required": required,
                        "rejections": session.done_rejections,
                    }),
                );
                session.conversation.push_user(feedback);
                self.status(
                    session.step_count,
                    &format!("{}/{required} messages, continuing...", session.messages_sent),
                );
                StepFlow::Continue
            }
        }
    }

    fn finish(&self, session: &AgentSession, result: String, incomplete: bool) -> StepFlow {
        info!(steps = session.step_count, tokens = session.total_tokens, incomplete, "task done");
        self.emit(AgentEvent::Done {
            result: result.clone(),
            steps: session.step_count,
            tokens: session.total_tokens,
            cost: session.total_cost,
            incomplete,
        });
        StepFlow::Finished(RunOutcome::Completed {
            result,
            steps: session.step_count,
            tokens: session.total_tokens,
            cost: session.total_cost,
            incomplete,
        })
    }

    /// Runs a navigation or tab action and returns the feedback text plus the settle delay.
    async fn dispatch_navigation(&self, action: &Action) -> (String, Duration) {
        let cfg = &self.config;
        match action.kind {
            ActionKind::Navigate => {
                let url = action.param_text("url").unwrap_or_default();
                match self.navigator.navigate(&url).await {
                    Ok(()) => (
                        format!("Navigated to {url}. Waiting for page load..."),
                        cfg.navigate_settle,
                    ),
                    Err(err) => (format!("Navigation to {url} failed: {err}"), Duration::ZERO),
                }
            }
            ActionKind::TabOpen => {
                let url = action.param_text("url").filter(|u| !u.is_empty());
                let activate = action
                    .param("active")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                match self.navigator.open_tab(url.as_deref(), activate).await {
                    Ok(tab_id) => {
                        let target = url.map(|u| format!(": {u}")).unwrap_or_default();
                        (
                            format!("Opened new tab{target}. Tab ID: {tab_id}"),
                            cfg.tab_open_settle,
                        )
                    }
                    Err(err) => (format!("Opening tab failed: {err}"), Duration::ZERO),
                }
            }
            ActionKind::TabSwitch => {
                let Some(selector) = tab_selector(action) else {
                    return (
                        "Tab switch failed: provide tabId or index".to_string(),
                        Duration::ZERO,
                    );
                };
                match self.navigator.switch_tab(&selector).await {
                    Ok(tab) => (
                        format!("Switched to tab: {}", non_empty_or(&tab.url, "unknown")),
                        cfg.tab_switch_settle,
                    ),
                    Err(err) => (format!("Tab switch failed: {err}"), Duration::ZERO),
                }
            }
            ActionKind::TabList => match self.navigator.list_tabs().await {
                Ok(tabs) => {
                    let lines: Vec<String> = tabs
                        .iter()
                        .map(|t| {
                            format!(
                                "{}[{}] {} ({})",
                                if t.active { "→ " } else { "  " },
                                t.index,
                                t.title,
                                t.url
                            )
                        })
                        .collect();
                    (format!("Open tabs:\n{}", lines.join("\n")), Duration::ZERO)
                }
                Err(err) => (format!("Listing tabs failed: {err}"), Duration::ZERO),
            },
            ActionKind::TabClose => {
                let tab_id = action.param_text("tabId").filter(|id| !id.is_empty());
                match self.navigator.close_tab(tab_id.as_deref()).await {
                    Ok(()) => ("Tab closed.".to_string(), cfg.tab_close_settle),
                    Err(err) => (format!("Tab close failed: {err}"), Duration::ZERO),
                }
            }
            other => (
                format!("{other} is not a navigation action"),
                Duration::ZERO,
            ),
        }
    }

    fn execution_feedback(
        &self,
        session: &mut AgentSession,
        action: &Action,
        result: &ExecutionResult,
    ) -> String {
        if let Some(err) = &result.error {
            return format!("Action {} failed: {err}", action.kind);
        }

        if action.kind == ActionKind::Type && action.flag("pressEnter") && result.success {
            session.messages_sent += 1;
            let text = action.param_text("text").unwrap_or_default();
            let mut feedback = format!("Typed \"{text}\" and pressed Enter: message sent.");
            let progress =
                requirement::progress_note(session.requirement.as_ref(), session.messages_sent);
            if let Some(note) = progress {
                session.log(
                    "message_sent",
                    json!({ "count": session.messages_sent, "text": text }),
                );
                feedback.push(' ');
                feedback.push_str(&note);
            }
            return feedback;
        }

        let mut feedback = if result.success {
            format!("Action {} completed.", action.kind)
        } else {
            format!("Action {} did not succeed.", action.kind)
        };
        if let Some(actual) = &result.actual_text {
            feedback.push_str(&format!(" Text in field: \"{actual}\""));
        }
        if let Some(data) = result.data.as_deref().filter(|d| !d.is_empty()) {
            let excerpt: String = data.chars().take(2000).collect();
            feedback.push_str(&format!("\nExtracted:\n{excerpt}"));
        }
        feedback
    }

    async fn await_confirmation(&self, action: &Action, reason: &str) -> Confirmation {
        let (resolver, mut rx) = ConfirmationResolver::new();
        self.control.set_confirming(true);
        info!(kind = %action.kind, reason, "awaiting confirmation");
        self.emit(AgentEvent::ConfirmationRequested {
            action: action.clone(),
            reason: reason.to_string(),
            resolver,
        });

        let decision = loop {
            if !self.control.is_running() {
                break Confirmation::Stopped;
            }
            match rx.try_recv() {
                Ok(true) => break Confirmation::Approved,
                Ok(false) => break Confirmation::Denied,
                Err(oneshot::error::TryRecvError::Empty) => {
                    tokio::time::sleep(self.poll_interval()).await;
                }
                Err(oneshot::error::TryRecvError::Closed) => break Confirmation::Denied,
            }
        };
        self.control.set_confirming(false);
        decision
    }

    /// Returns `false` when the run was stopped while paused.
    async fn wait_while_paused(&self) -> bool {
        while self.control.is_paused() && self.control.is_running() {
            tokio::time::sleep(self.poll_interval()).await;
        }
        self.control.is_running()
    }

    /// Sleeps in poll-sized slices so a stop cuts the wait short.
    async fn sleep(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() && self.control.is_running() {
            let slice = remaining.min(self.poll_interval());
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval.max(Duration::from_millis(1))
    }

    fn status(&self, step: u32, message: &str) {
        debug!(step, message, "status");
        self.emit(AgentEvent::Status {
            step,
            message: message.to_string(),
        });
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn tab_selector(action: &Action) -> Option<TabSelector> {
    if let Some(id) = action.param_text("tabId").filter(|id| !id.is_empty()) {
        return Some(TabSelector::Id(id));
    }
    action
        .param_text("index")
        .and_then(|raw| raw.parse::<usize>().ok())
        .map(TabSelector::Index)
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_accepts_exactly_one_answer() {
        let (resolver, mut rx) = ConfirmationResolver::new();
        let clone = resolver.clone();
        assert!(resolver.resolve(true).is_ok());
        assert!(matches!(
            clone.resolve(false),
            Err(AgentError::ConfirmationAlreadyResolved)
        ));
        assert!(clone.is_resolved());
        assert_eq!(rx.try_recv().unwrap(), true);
    }

    #[test]
    fn tab_selector_prefers_id() {
        let both = Action::new(ActionKind::TabSwitch)
            .with_param("tabId", "T9")
            .with_param("index", 1);
        assert_eq!(tab_selector(&both), Some(TabSelector::Id("T9".into())));
        let index = Action::new(ActionKind::TabSwitch).with_param("index", 0);
        assert_eq!(tab_selector(&index), Some(TabSelector::Index(0)));
    }

    #[test]
    fn control_flags() {
        let control = AgentControl::new();
        assert!(!control.is_running());
        control.start();
        control.pause();
        assert!(control.is_paused());
        control.stop();
        assert!(!control.is_running());
        assert!(!control.is_paused());
    }

    #[test]
    fn pause_survives_the_end_of_a_confirmation() {
        let control = AgentControl::new();
        control.start();
        control.set_confirming(true);
        assert!(control.is_paused());
        control.pause();
        control.set_confirming(false);
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());

        control.set_confirming(true);
        control.resume();
        assert!(control.is_paused());
        control.set_confirming(false);
        assert!(!control.is_paused());
    }
}
