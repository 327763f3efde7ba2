mod dom;
mod face;
mod hands;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use webpilot::bridge::{self, BridgeClient};
use webpilot::config::ProviderKind;
use webpilot::interfaces::LlmClient;
use webpilot::{Agent, AgentConfig, AgentEvent, ProviderConfig, RunOutcome};

const BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "agent", about = "Complete browser tasks with an LLM in the loop")]
struct Args {
    /// Run this task once and exit instead of serving the web UI.
    task: Option<String>,

    /// openai, anthropic, xai, google, deepseek, ollama, lmstudio or custom.
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_steps: Option<u32>,

    /// Attach a screenshot to each model call when the model supports vision.
    #[arg(long)]
    screenshots: bool,

    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// DevTools endpoint of a running Chrome to attach to.
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    attach: String,

    #[arg(long)]
    headless: bool,

    /// Chrome profile used when no running browser can be attached.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Approve every confirmation without asking (task mode only).
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let provider_kind = args
        .provider
        .as_deref()
        .map(str::parse::<ProviderKind>)
        .transpose()?;
    let mut provider = ProviderConfig::from_env_with(provider_kind)?;
    if let Some(model) = &args.model {
        provider = provider.with_model(model.clone());
    }
    info!(provider = ?provider.provider, model = %provider.model, "model configured");
    let llm = webpilot::brain::client_for(provider).context("invalid model configuration")?;

    let mut config = AgentConfig::from_env();
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps.max(1);
    }
    config.use_screenshots |= args.screenshots;

    let launch = hands::LaunchConfig {
        attach_url: args.attach.clone(),
        headless: args.headless,
        profile_dir: args.profile.clone(),
    };
    info!("launching Chrome");
    let mut session = tokio::task::spawn_blocking(move || hands::BrowserSession::launch(&launch))
        .await
        .map_err(|e| anyhow!("Browser launch panicked: {e}"))?
        .context("could not start Chrome")?;

    let (client, server) = bridge::channel(16, BRIDGE_TIMEOUT);
    std::thread::Builder::new()
        .name("hands".into())
        .spawn(move || server.serve_blocking(&mut session))
        .context("failed to spawn browser thread")?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let mut agent = new_agent(config, llm, client).with_events(event_tx);

    match args.task {
        Some(task) => run_once(&mut agent, &task, event_rx, args.yes).await,
        None => serve_ui(&mut agent, args.port, event_rx).await,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn new_agent(
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    client: BridgeClient,
) -> Agent {
    let env = Arc::new(client);
    Agent::new(config, llm, env.clone(), env.clone(), env)
}

async fn serve_ui(
    agent: &mut Agent,
    port: u16,
    events: mpsc::UnboundedReceiver<AgentEvent>,
) -> Result<()> {
    let (mut cmd_rx, face) = face::start_server(port, agent.control()).await?;
    tokio::spawn(face.clone().forward(events));
    info!("waiting for commands");

    while let Some(task) = cmd_rx.recv().await {
        info!(%task, "running task");
        match agent.run(&task).await {
            Ok(outcome) => info!(?outcome, "task finished"),
            Err(e) => {
                error!(error = %e, "task failed");
                face.error(e.to_string());
            }
        }
        face.store_debug_log(agent.debug_log());
        face.ready();
    }
    Ok(())
}

async fn run_once(
    agent: &mut Agent,
    task: &str,
    mut events: mpsc::UnboundedReceiver<AgentEvent>,
    auto_approve: bool,
) -> Result<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Action { step, action } => {
                    info!(step, action = %action.to_json(), "action")
                }
                AgentEvent::Status { step, message } => info!(step, %message, "status"),
                AgentEvent::Blocked { reason, .. } => warn!(%reason, "blocked"),
                AgentEvent::Error { message } => warn!(%message, "error"),
                AgentEvent::ConfirmationRequested {
                    action,
                    reason,
                    resolver,
                } => {
                    let approved = auto_approve
                        || tokio::task::spawn_blocking(move || ask(&reason, &action.to_json()))
                            .await
                            .unwrap_or(false);
                    if let Err(e) = resolver.resolve(approved) {
                        warn!(error = %e, "confirmation not delivered");
                    }
                }
                _ => {}
            }
        }
    });

    match agent.run(task).await? {
        RunOutcome::Completed {
            result,
            steps,
            tokens,
            cost,
            incomplete,
        } => {
            println!("{result}");
            info!(steps, tokens, cost, incomplete, "done");
        }
        RunOutcome::Stopped { steps } => info!(steps, "stopped"),
    }
    Ok(())
}

fn ask(reason: &str, action: &str) -> bool {
    eprint!("{reason}\n  {action}\nApprove? [y/N] ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
