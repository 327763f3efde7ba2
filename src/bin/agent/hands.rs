use anyhow::{Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use webpilot::bridge::{EnvRequest, EnvResponse, EnvironmentBackend};
use webpilot::types::{
    Action, ActionKind, ExecutionResult, PageState, SwitchedTab, TabInfo, TabSelector,
};

use crate::dom;

const MAX_WAIT: Duration = Duration::from_secs(10);

pub struct LaunchConfig {
    /// DevTools endpoint of an already running Chrome.
    pub attach_url: String,
    pub headless: bool,
    pub profile_dir: Option<PathBuf>,
}

/// Persistent browser session. Created once, reused for all tasks.
pub struct BrowserSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        info!(url = %config.attach_url, "attempting to attach to existing Chrome");
        if let Ok(browser) = Browser::connect(config.attach_url.clone()) {
            let existing = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow!("tab list lock poisoned"))?
                .first()
                .cloned();
            let tab = match existing {
                Some(tab) => tab,
                None => browser.new_tab()?,
            };
            info!("attached to existing Chrome");
            return Ok(Self { browser, tab });
        }

        let profile = match &config.profile_dir {
            Some(dir) => dir.clone(),
            None => default_profile_dir()?,
        };
        std::fs::create_dir_all(&profile)?;
        warn!(profile = %profile.display(), "could not attach, launching a dedicated profile");

        let options = LaunchOptions {
            headless: config.headless,
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        let browser =
            Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self { browser, tab })
    }

    fn tabs(&self) -> Result<Vec<Arc<Tab>>, String> {
        self.browser
            .get_tabs()
            .lock()
            .map(|tabs| tabs.clone())
            .map_err(|_| "tab list lock poisoned".to_string())
    }

    fn tab_infos(&self) -> Result<Vec<TabInfo>, String> {
        let active = self.tab.get_target_id().clone();
        Ok(self
            .tabs()?
            .iter()
            .enumerate()
            .map(|(index, tab)| TabInfo {
                index,
                id: tab.get_target_id().clone(),
                title: dom::get_page_title(tab).unwrap_or_default(),
                url: tab.get_url(),
                active: *tab.get_target_id() == active,
            })
            .collect())
    }

    fn capture(&self, text_budget: usize) -> Result<PageState, String> {
        let mut page = dom::capture_page(&self.tab, text_budget).map_err(|e| format!("{e:#}"))?;
        page.tabs = self.tab_infos()?;
        Ok(page)
    }

    fn screenshot(&self) -> Result<Option<String>, String> {
        let bytes = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Jpeg, Some(60), None, true)
            .map_err(|e| format!("{e:#}"))?;
        Ok(Some(format!(
            "data:image/jpeg;base64,{}",
            STANDARD.encode(bytes)
        )))
    }

    fn execute(&self, action: &Action) -> ExecutionResult {
        let outcome = match action.kind {
            kind if dom::is_script_action(kind) => self.script_action(action),
            ActionKind::Keypress => self.keypress(action),
            ActionKind::Wait => {
                let ms = action
                    .param_text("ms")
                    .and_then(|ms| ms.parse::<u64>().ok())
                    .unwrap_or(1000);
                std::thread::sleep(Duration::from_millis(ms).min(MAX_WAIT));
                Ok(ExecutionResult::ok())
            }
            other => Ok(ExecutionResult::failed(format!(
                "{other} is not handled by the executor"
            ))),
        };
        outcome.unwrap_or_else(|e| ExecutionResult::failed(format!("{e:#}")))
    }

    fn script_action(&self, action: &Action) -> Result<ExecutionResult> {
        let result = dom::run_action(&self.tab, action)?;
        if action.kind == ActionKind::Type && action.flag("pressEnter") && result.success {
            std::thread::sleep(Duration::from_millis(150));
            self.tab.press_key("Enter")?;
        }
        Ok(result)
    }

    fn keypress(&self, action: &Action) -> Result<ExecutionResult> {
        if let Some(id) = action.param_text("id").filter(|id| !id.is_empty()) {
            let focused = dom::focus(&self.tab, &id)?;
            if !focused.success {
                return Ok(focused);
            }
        }
        let key = action
            .param_text("key")
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "Escape".to_string());
        self.tab.press_key(&key)?;
        Ok(ExecutionResult::ok())
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_for_element("body")?;
        Ok(())
    }

    fn open_tab(&mut self, url: Option<&str>, activate: bool) -> Result<String> {
        let tab = self.browser.new_tab()?;
        if let Some(url) = url {
            tab.navigate_to(url)?;
        }
        let id = tab.get_target_id().clone();
        if activate {
            tab.activate()?;
            self.tab = tab;
        }
        Ok(id)
    }

    fn switch_tab(&mut self, selector: &TabSelector) -> Result<SwitchedTab, String> {
        let tabs = self.tabs()?;
        let tab = match selector {
            TabSelector::Index(index) => tabs.get(*index),
            TabSelector::Id(id) => tabs.iter().find(|t| t.get_target_id() == id),
        }
        .cloned()
        .ok_or_else(|| format!("no tab matches {selector:?}"))?;

        tab.activate().map_err(|e| format!("{e:#}"))?;
        self.tab = tab;
        Ok(SwitchedTab {
            tab_id: self.tab.get_target_id().clone(),
            url: self.tab.get_url(),
        })
    }

    fn close_tab(&mut self, tab_id: Option<&str>) -> Result<(), String> {
        let tabs = self.tabs()?;
        let target = match tab_id {
            Some(id) => tabs
                .iter()
                .find(|t| t.get_target_id() == id)
                .cloned()
                .ok_or_else(|| format!("no tab with id {id}"))?,
            None => self.tab.clone(),
        };
        let was_active = target.get_target_id() == self.tab.get_target_id();
        target.close(true).map_err(|e| format!("{e:#}"))?;

        if was_active {
            let fallback = tabs
                .into_iter()
                .find(|t| t.get_target_id() != target.get_target_id());
            match fallback {
                Some(tab) => {
                    let _ = tab.activate();
                    self.tab = tab;
                }
                None => {
                    self.tab = self.browser.new_tab().map_err(|e| format!("{e:#}"))?;
                }
            }
        }
        Ok(())
    }
}

impl EnvironmentBackend for BrowserSession {
    fn handle(&mut self, request: EnvRequest) -> Result<EnvResponse, String> {
        debug!(op = request.name(), "backend request");
        match request {
            EnvRequest::Capture(options) => self
                .capture(options.max_text_chars)
                .map(|page| EnvResponse::Page(Box::new(page))),
            EnvRequest::Screenshot => self.screenshot().map(EnvResponse::Screenshot),
            EnvRequest::Execute(action) => Ok(EnvResponse::Executed(self.execute(&action))),
            EnvRequest::Navigate(url) => self
                .navigate(&url)
                .map(|()| EnvResponse::Navigated)
                .map_err(|e| format!("{e:#}")),
            EnvRequest::OpenTab { url, activate } => self
                .open_tab(url.as_deref(), activate)
                .map(EnvResponse::TabOpened)
                .map_err(|e| format!("{e:#}")),
            EnvRequest::SwitchTab(selector) => {
                self.switch_tab(&selector).map(EnvResponse::Switched)
            }
            EnvRequest::ListTabs => self.tab_infos().map(EnvResponse::Tabs),
            EnvRequest::CloseTab(id) => self.close_tab(id.as_deref()).map(|()| EnvResponse::Closed),
        }
    }
}

fn default_profile_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().ok_or_else(|| anyhow!("no local data directory"))?;
    Ok(base.join("webpilot").join("chrome-profile"))
}
