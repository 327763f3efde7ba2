use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use webpilot::interfaces::{ActionExecutor, LlmClient, Navigator, Perception};
use webpilot::prompts::{EMPTY_REPLY, PARSE_RETRY};
use webpilot::types::{
    CaptureOptions, ExecutionResult, InteractiveElement, LlmResponse, SwitchedTab, TabInfo,
    TabSelector, Usage,
};
use webpilot::{
    Action, ActionKind, Agent, AgentConfig, AgentControl, AgentError, AgentEvent,
    ConversationTurn, PageState, Role, RunOutcome,
};

const WAIT: &str = r#"{"action":"wait","params":{"ms":1}}"#;

struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, AgentError>>>,
    calls: Mutex<Vec<Vec<ConversationTurn>>>,
    screenshots: Mutex<Vec<Option<String>>>,
    vision: bool,
}

impl ScriptedLlm {
    fn build(replies: Vec<Result<String, AgentError>>, vision: bool) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            screenshots: Mutex::new(Vec::new()),
            vision,
        })
    }

    fn new(replies: Vec<Result<String, AgentError>>) -> Arc<Self> {
        Self::build(replies, false)
    }

    fn replying(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    fn seeing(replies: &[&str]) -> Arc<Self> {
        Self::build(replies.iter().map(|r| Ok(r.to_string())).collect(), true)
    }

    fn calls(&self) -> Vec<Vec<ConversationTurn>> {
        self.calls.lock().unwrap().clone()
    }

    fn screenshots(&self) -> Vec<Option<String>> {
        self.screenshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn send(
        &self,
        _system_prompt: &str,
        conversation: &[ConversationTurn],
        screenshot: Option<&str>,
    ) -> Result<LlmResponse, AgentError> {
        self.calls.lock().unwrap().push(conversation.to_vec());
        self.screenshots
            .lock()
            .unwrap()
            .push(screenshot.map(str::to_string));
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(WAIT.to_string()))?;
        Ok(LlmResponse {
            text: reply,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 20,
            },
            finish_reason: Some("stop".into()),
        })
    }

    fn supports_vision(&self) -> bool {
        self.vision
    }

    fn estimate_cost(&self, usage: &Usage) -> f64 {
        usage.total() as f64 * 0.001
    }
}

struct FixedPage {
    page: Option<PageState>,
    shot: Option<String>,
    captures: AtomicU32,
}

impl FixedPage {
    fn new(page: PageState) -> Arc<Self> {
        Arc::new(Self {
            page: Some(page),
            shot: None,
            captures: AtomicU32::new(0),
        })
    }

    fn with_screenshot(page: PageState, shot: &str) -> Arc<Self> {
        Arc::new(Self {
            page: Some(page),
            shot: Some(shot.to_string()),
            captures: AtomicU32::new(0),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            page: None,
            shot: None,
            captures: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Perception for FixedPage {
    async fn capture(&self, _options: &CaptureOptions) -> Result<PageState, AgentError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        self.page
            .clone()
            .ok_or_else(|| AgentError::perception("content script unreachable"))
    }

    async fn screenshot(&self) -> Result<Option<String>, AgentError> {
        Ok(self.shot.clone())
    }
}

/// Pauses the run from inside the first capture, the way a user pressing Pause mid-step would.
struct PausingPage {
    control: Mutex<Option<AgentControl>>,
    fired: AtomicBool,
}

#[async_trait]
impl Perception for PausingPage {
    async fn capture(&self, _options: &CaptureOptions) -> Result<PageState, AgentError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            if let Some(control) = self.control.lock().unwrap().as_ref() {
                control.pause();
            }
        }
        Ok(chat_page())
    }
}

#[derive(Default)]
struct RecordingEnv {
    executed: Mutex<Vec<Action>>,
    results: Mutex<VecDeque<ExecutionResult>>,
    navigated: Mutex<Vec<String>>,
    switched: Mutex<Vec<TabSelector>>,
    closed: Mutex<Vec<Option<String>>>,
    tabs_down: bool,
}

impl RecordingEnv {
    fn returning(results: Vec<ExecutionResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            ..Default::default()
        })
    }

    fn without_tabs() -> Arc<Self> {
        Arc::new(Self {
            tabs_down: true,
            ..Default::default()
        })
    }

    fn executed(&self) -> Vec<Action> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingEnv {
    async fn execute(&self, action: &Action) -> ExecutionResult {
        self.executed.lock().unwrap().push(action.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(ExecutionResult::ok)
    }
}

#[async_trait]
impl Navigator for RecordingEnv {
    async fn navigate(&self, url: &str) -> Result<(), AgentError> {
        self.navigated.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn open_tab(&self, _url: Option<&str>, _activate: bool) -> Result<String, AgentError> {
        Ok("tab-2".into())
    }

    async fn switch_tab(&self, selector: &TabSelector) -> Result<SwitchedTab, AgentError> {
        self.switched.lock().unwrap().push(selector.clone());
        Ok(SwitchedTab {
            tab_id: "tab-1".into(),
            url: "https://chat.example/".into(),
        })
    }

    async fn list_tabs(&self) -> Result<Vec<TabInfo>, AgentError> {
        if self.tabs_down {
            return Err(AgentError::transport("browser unreachable"));
        }
        Ok(vec![TabInfo {
            index: 0,
            id: "tab-1".into(),
            title: "Chat".into(),
            url: "https://chat.example/".into(),
            active: true,
        }])
    }

    async fn close_tab(&self, tab_id: Option<&str>) -> Result<(), AgentError> {
        self.closed.lock().unwrap().push(tab_id.map(str::to_string));
        Ok(())
    }
}

fn chat_page() -> PageState {
    let mut page = PageState::new("https://chat.example/", "Chat");
    page.interactive_elements = vec![
        InteractiveElement::new("e0", "textarea", "Message"),
        InteractiveElement::new("e1", "button", "Delete account"),
        InteractiveElement::new("e2", "submit-button", "Place order"),
    ];
    page.page_text = "[h1] Chat".into();
    page
}

fn send_message(text: &str) -> String {
    format!(r#"{{"action":"type","params":{{"id":"e0","text":"{text}","pressEnter":true}}}}"#)
}

struct Harness {
    agent: Agent,
    llm: Arc<ScriptedLlm>,
    env: Arc<RecordingEnv>,
    events: mpsc::UnboundedReceiver<AgentEvent>,
}

fn harness(config: AgentConfig, llm: Arc<ScriptedLlm>, perception: Arc<FixedPage>) -> Harness {
    harness_with(config, llm, perception, Arc::new(RecordingEnv::default()))
}

fn harness_with(
    config: AgentConfig,
    llm: Arc<ScriptedLlm>,
    perception: Arc<dyn Perception>,
    env: Arc<RecordingEnv>,
) -> Harness {
    let (tx, events) = mpsc::unbounded_channel();
    let agent = Agent::new(config, llm.clone(), perception, env.clone(), env.clone())
        .with_events(tx);
    Harness {
        agent,
        llm,
        env,
        events,
    }
}

fn config() -> AgentConfig {
    AgentConfig::default().without_delays()
}

fn drain(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn last_user_turn(turns: &[ConversationTurn]) -> &str {
    turns
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
        .unwrap_or_default()
}

#[tokio::test]
async fn conversation_task_completes_after_required_messages() {
    let llm = ScriptedLlm::replying(&[
        send_message("Hi").as_str(),
        send_message("How are you?").as_str(),
        send_message("Bye").as_str(),
        r#"{"action":"done","params":{"result":"Had a short chat"}}"#,
    ]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    let outcome = h.agent.run("send 3 messages to the chatbot").await.unwrap();

    let RunOutcome::Completed {
        result,
        steps,
        tokens,
        cost,
        incomplete,
    } = outcome
    else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(result, "Had a short chat");
    assert_eq!((steps, tokens, incomplete), (4, 480, false));
    assert!((cost - 0.48).abs() < 1e-9);
    let executed = h.env.executed();
    assert_eq!(executed.len(), 3);
    assert!(executed.iter().all(|a| a.kind == ActionKind::Type));

    let calls = h.llm.calls();
    assert!(last_user_turn(&calls[3]).contains("[Message 3 of 3 sent]"));

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::RequirementDetected {
            required_count: 3,
            ..
        }
    )));
    assert!(matches!(events.last(), Some(AgentEvent::Done { steps: 4, .. })));
    assert!(
        h.agent
            .debug_log()
            .iter()
            .any(|entry| entry.kind == "message_sent")
    );
}

#[tokio::test]
async fn premature_done_is_force_accepted_on_third_rejection() {
    let done = r#"{"action":"done","params":{"result":"Finished"}}"#;
    let llm = ScriptedLlm::replying(&[done, done, done]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    let outcome = h.agent.run("send 3 messages to the chatbot").await.unwrap();

    let RunOutcome::Completed {
        result,
        steps,
        incomplete,
        ..
    } = outcome
    else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(incomplete);
    assert_eq!(steps, 3);
    assert!(result.starts_with("Finished"));
    assert!(result.contains("0/3"));

    let calls = h.llm.calls();
    assert!(last_user_turn(&calls[1]).starts_with("CONVERSATION NOT COMPLETE"));
    let rejected = h
        .agent
        .debug_log()
        .iter()
        .filter(|entry| entry.kind == "done_rejected")
        .count();
    assert_eq!(rejected, 2);
    assert!(h.agent.debug_log().iter().any(|e| e.kind == "done_forced"));
}

#[tokio::test]
async fn failing_capture_degrades_then_hits_step_ceiling() {
    let mut cfg = config();
    cfg.max_steps = 5;
    let perception = FixedPage::broken();
    let mut h = harness(cfg, ScriptedLlm::replying(&[]), perception.clone());

    let err = h.agent.run("summarize this page").await.unwrap_err();

    assert!(matches!(err, AgentError::StepCeilingExceeded { max_steps: 5 }));
    assert_eq!(perception.captures.load(Ordering::SeqCst), 5);

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(call[0].content.contains("URL: https://chat.example/"));
        assert!(call[0].content.contains("Title: Chat"));
    }

    let events = drain(&mut h.events);
    let errors = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Error { .. }))
        .count();
    // One per failed capture plus the ceiling itself.
    assert_eq!(errors, 6);
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Stopped { .. })));
}

#[tokio::test]
async fn unparseable_reply_gets_corrective_turn() {
    let llm = ScriptedLlm::replying(&[
        "hmm, let me think about this",
        r#"{"action":"done","params":{"result":"ok"}}"#,
    ]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    let outcome = h.agent.run("look around").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { steps: 2, .. }));

    let calls = h.llm.calls();
    let second = &calls[1];
    let n = second.len();
    assert_eq!(second[n - 2].role, Role::Assistant);
    assert_eq!(second[n - 2].content, "hmm, let me think about this");
    assert_eq!(second[n - 1].content, PARSE_RETRY);
    assert!(h.env.executed().is_empty());
}

#[tokio::test]
async fn blocked_keyword_never_reaches_executor() {
    let mut cfg = config();
    cfg.blocked_keywords = vec!["delete".into()];
    let llm = ScriptedLlm::replying(&[
        r#"{"action":"click","params":{"id":"e1"}}"#,
        r#"{"action":"done","params":{"result":"gave up"}}"#,
    ]);
    let mut h = harness(cfg, llm, FixedPage::new(chat_page()));

    h.agent.run("tidy up my account").await.unwrap();

    assert!(h.env.executed().is_empty());
    assert!(last_user_turn(&h.llm.calls()[1]).starts_with("BLOCKED:"));
    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Blocked { .. })));
}

async fn run_with_confirmation(approve: bool) -> (RunOutcome, Vec<Action>, Vec<ConversationTurn>) {
    let llm = ScriptedLlm::replying(&[
        r#"{"action":"click","params":{"id":"e2"},"reasoning":"place it"}"#,
        r#"{"action":"done","params":{"result":"finished"}}"#,
    ]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    let mut events = h.events;
    let responder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let AgentEvent::ConfirmationRequested { resolver, reason, .. } = event {
                assert!(reason.contains("Place order"));
                resolver.resolve(approve).unwrap();
                let again = resolver.resolve(!approve).unwrap_err();
                assert!(matches!(again, AgentError::ConfirmationAlreadyResolved));
            }
        }
    });

    let outcome = h.agent.run("order the cart").await.unwrap();
    drop(h.agent);
    responder.await.unwrap();

    let calls = h.llm.calls();
    (outcome, h.env.executed(), calls[1].clone())
}

#[tokio::test]
async fn approved_confirmation_executes_action() {
    let (outcome, executed, second_call) = run_with_confirmation(true).await;
    assert!(matches!(outcome, RunOutcome::Completed { steps: 2, .. }));
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].param_text("id").as_deref(), Some("e2"));
    assert!(last_user_turn(&second_call).starts_with("Action click completed"));
}

#[tokio::test]
async fn denied_confirmation_skips_action() {
    let (outcome, executed, second_call) = run_with_confirmation(false).await;
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(executed.is_empty());
    assert!(last_user_turn(&second_call).starts_with("User declined"));
}

#[tokio::test]
async fn stop_while_awaiting_confirmation_ends_run() {
    let llm = ScriptedLlm::replying(&[r#"{"action":"click","params":{"id":"e2"}}"#]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));
    let control = h.agent.control();

    let mut events = h.events;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event, AgentEvent::ConfirmationRequested { .. }) {
                control.stop();
            }
        }
    });

    let outcome = h.agent.run("buy the thing").await.unwrap();
    assert_eq!(outcome, RunOutcome::Stopped { steps: 1 });
    assert!(h.env.executed().is_empty());
    assert!(!h.agent.control().is_running());
}

#[tokio::test]
async fn model_error_is_reported_and_loop_continues() {
    let llm = ScriptedLlm::new(vec![
        Err(AgentError::model_call("429 rate limited")),
        Ok(r#"{"action":"done","params":{"result":"recovered"}}"#.to_string()),
    ]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    let outcome = h.agent.run("check the inbox").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { steps: 2, .. }));

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::Error { message } if message.contains("rate limited")
    )));
}

#[tokio::test]
async fn navigation_goes_to_navigator_with_feedback() {
    let llm = ScriptedLlm::replying(&[
        r#"{"action":"navigate","params":{"url":"https://example.com"}}"#,
        r#"{"action":"tab_list","params":{}}"#,
        r#"{"action":"done","params":{"result":"there"}}"#,
    ]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    h.agent.run("open example.com").await.unwrap();

    assert_eq!(
        *h.env.navigated.lock().unwrap(),
        vec!["https://example.com".to_string()]
    );
    assert!(h.env.executed().is_empty());
    let calls = h.llm.calls();
    assert_eq!(
        last_user_turn(&calls[1]),
        "Navigated to https://example.com. Waiting for page load..."
    );
    assert!(last_user_turn(&calls[2]).contains("[0] Chat (https://chat.example/)"));
}

#[tokio::test]
async fn history_stays_bounded() {
    let mut cfg = config();
    cfg.max_history_turns = 7;
    cfg.max_steps = 30;
    let mut replies = vec![WAIT; 20];
    replies.push(r#"{"action":"done","params":{"result":"waited"}}"#);
    let mut h = harness(cfg, ScriptedLlm::replying(&replies), FixedPage::new(chat_page()));

    h.agent.run("wait a while").await.unwrap();

    for call in h.llm.calls() {
        assert!(call.len() <= 7);
        assert!(call[0].content.contains("Task: wait a while"));
    }
}

const DONE: &str = r#"{"action":"done","params":{"result":"finished"}}"#;

#[tokio::test]
async fn empty_reply_never_leaves_a_blank_assistant_turn() {
    let llm = ScriptedLlm::replying(&["", WAIT, WAIT, DONE]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    let outcome = h.agent.run("look around").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { steps: 4, .. }));

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 4);
    for call in &calls {
        assert!(
            call.iter()
                .all(|t| t.role != Role::Assistant || !t.content.trim().is_empty())
        );
    }
    let second = &calls[1];
    let n = second.len();
    assert_eq!(second[n - 2].content, EMPTY_REPLY);
    assert_eq!(second[n - 1].content, PARSE_RETRY);
}

#[tokio::test]
async fn pause_holds_the_next_step_until_resumed() {
    let llm = ScriptedLlm::replying(&[WAIT, DONE]);
    let page = Arc::new(PausingPage {
        control: Mutex::new(None),
        fired: AtomicBool::new(false),
    });
    let mut h = harness_with(
        config(),
        llm.clone(),
        page.clone(),
        Arc::new(RecordingEnv::default()),
    );
    let control = h.agent.control();
    *page.control.lock().unwrap() = Some(control.clone());

    let watcher = tokio::spawn(async move {
        while !control.is_paused() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        let calls_while_paused = llm.calls().len();
        control.resume();
        calls_while_paused
    });

    let outcome = h.agent.run("wait, then finish").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { steps: 2, .. }));
    assert_eq!(watcher.await.unwrap(), 1);
    assert_eq!(h.env.executed().len(), 1);
}

#[tokio::test]
async fn pause_pressed_during_confirmation_outlasts_it() {
    let llm = ScriptedLlm::replying(&[r#"{"action":"click","params":{"id":"e2"}}"#, DONE]);
    let mut h = harness(config(), llm.clone(), FixedPage::new(chat_page()));
    let control = h.agent.control();

    let mut events = h.events;
    let responder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let AgentEvent::ConfirmationRequested { resolver, .. } = event {
                control.pause();
                resolver.resolve(true).unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
                let held = (llm.calls().len(), control.is_paused());
                control.resume();
                return held;
            }
        }
        (0, false)
    });

    let outcome = h.agent.run("order the cart").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { steps: 2, .. }));
    assert_eq!(responder.await.unwrap(), (1, true));
    assert_eq!(h.env.executed().len(), 1);
}

#[tokio::test]
async fn failed_executions_come_back_as_feedback() {
    let env = RecordingEnv::returning(vec![
        ExecutionResult::failed("element e0 not found"),
        ExecutionResult::default(),
    ]);
    let hi = send_message("Hi");
    let hi = hi.as_str();
    let llm = ScriptedLlm::replying(&[hi, hi, hi, DONE, DONE, DONE]);
    let mut h = harness_with(config(), llm, FixedPage::new(chat_page()), env);

    let outcome = h.agent.run("send 3 messages to the chatbot").await.unwrap();

    let calls = h.llm.calls();
    assert_eq!(
        last_user_turn(&calls[1]),
        "Action type failed: element e0 not found"
    );
    assert_eq!(last_user_turn(&calls[2]), "Action type did not succeed.");
    assert!(last_user_turn(&calls[3]).ends_with("[Message 1 of 3 sent]"));

    let RunOutcome::Completed {
        result, incomplete, ..
    } = outcome
    else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(incomplete);
    assert!(result.contains("1/3"));
    let sent = h
        .agent
        .debug_log()
        .iter()
        .filter(|entry| entry.kind == "message_sent")
        .count();
    assert_eq!(sent, 1);
}

#[tokio::test]
async fn tab_actions_report_back() {
    let llm = ScriptedLlm::replying(&[
        r#"{"action":"tab_open","params":{"url":"https://b.example"}}"#,
        r#"{"action":"tab_switch","params":{"index":"last"}}"#,
        r#"{"action":"tab_switch","params":{"index":0}}"#,
        r#"{"action":"tab_close","params":{"tabId":"tab-2"}}"#,
        DONE,
    ]);
    let mut h = harness(config(), llm, FixedPage::new(chat_page()));

    h.agent.run("compare the two tabs").await.unwrap();

    let calls = h.llm.calls();
    assert_eq!(
        last_user_turn(&calls[1]),
        "Opened new tab: https://b.example. Tab ID: tab-2"
    );
    assert_eq!(
        last_user_turn(&calls[2]),
        "Tab switch failed: provide tabId or index"
    );
    assert_eq!(
        last_user_turn(&calls[3]),
        "Switched to tab: https://chat.example/"
    );
    assert_eq!(last_user_turn(&calls[4]), "Tab closed.");

    assert_eq!(*h.env.switched.lock().unwrap(), vec![TabSelector::Index(0)]);
    assert_eq!(*h.env.closed.lock().unwrap(), vec![Some("tab-2".to_string())]);
    assert!(h.env.executed().is_empty());
}

#[tokio::test]
async fn degraded_page_is_unknown_when_tabs_are_unreachable() {
    let llm = ScriptedLlm::replying(&[DONE]);
    let mut h = harness_with(
        config(),
        llm,
        FixedPage::broken(),
        RecordingEnv::without_tabs(),
    );

    let outcome = h.agent.run("summarize this page").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { steps: 2, .. }));

    let calls = h.llm.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0][0].content.contains("URL: unknown\nTitle: unknown"));
    assert!(
        h.agent
            .debug_log()
            .iter()
            .any(|entry| entry.kind == "capture" && entry.data["degraded"] == true)
    );
}

#[tokio::test]
async fn screenshot_only_goes_to_vision_models_when_enabled() {
    let shot = "data:image/jpeg;base64,QUJD";
    for (enabled, vision, expected) in [
        (true, true, Some(shot)),
        (true, false, None),
        (false, true, None),
    ] {
        let mut cfg = config();
        cfg.use_screenshots = enabled;
        let llm = if vision {
            ScriptedLlm::seeing(&[DONE])
        } else {
            ScriptedLlm::replying(&[DONE])
        };
        let mut h = harness(cfg, llm, FixedPage::with_screenshot(chat_page(), shot));

        h.agent.run("describe the page").await.unwrap();

        assert_eq!(
            h.llm.screenshots(),
            vec![expected.map(str::to_string)],
            "enabled={enabled} vision={vision}"
        );
    }
}
