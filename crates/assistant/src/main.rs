//! The `valet` binary: wire the services, start the scheduler, run
//! missed-task recovery, then drive the runtime from a console REPL.
//!
//! Chat transports (Telegram, Slack, SMS) live outside this crate and
//! plug into the same `Services` + `CallbackDispatcher` surface the
//! console uses here.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use valet_assistant::notify::{ConsoleChannel, NotificationRouter};
use valet_assistant::runtime::confirm::ConfirmationBroker;
use valet_assistant::scheduler::{
    MissedTaskRecovery, Responder, SchedulerEngine, TaskExecutor, TaskStore,
};
use valet_assistant::tools::register_builtin_tools;
use valet_assistant::{generate_response, handle_user_message, CallbackDispatcher, Services, TurnOptions};
use valet_domain::config::Config;
use valet_domain::context::MessageContext;
use valet_providers::AnthropicProvider;
use valet_sessions::SessionStore;
use valet_tools::{ConfirmationPolicy, ScratchSpace, ToolRegistry};

#[derive(Parser)]
#[command(name = "valet", about = "Personal assistant runtime")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "valet.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(Config::load(&cli.config)?);

    // ── LLM provider ──────────────────────────────────────────────
    let api_key = std::env::var(&config.llm.api_key_env).map_err(|_| {
        anyhow::anyhow!(
            "missing API key: set the {} environment variable",
            config.llm.api_key_env
        )
    })?;
    let llm = Arc::new(AnthropicProvider::new(&config.llm, api_key)?);

    // ── Services ──────────────────────────────────────────────────
    let registry = Arc::new(ToolRegistry::new(ConfirmationPolicy::new(
        config.confirmation_policy_path(),
    )));
    let router = Arc::new(NotificationRouter::new(
        config.notifications.default_channel.clone(),
    ));
    router.register_channel(Arc::new(ConsoleChannel::new()))?;
    let broker = Arc::new(ConfirmationBroker::new(
        router.clone(),
        Duration::from_secs(config.confirmations.timeout_secs),
    ));
    let task_store = Arc::new(TaskStore::new(config.database_path()));
    let scheduler = Arc::new(SchedulerEngine::new(
        task_store.clone(),
        &config.scheduler.timezone,
        Duration::from_secs(config.scheduler.tick_interval_secs),
    ));
    let scratch = Arc::new(ScratchSpace::new(config.scratch_root())?);
    let sessions = Arc::new(SessionStore::new(config.sessions.window_size));

    let services = Services {
        config: config.clone(),
        llm,
        registry,
        router: router.clone(),
        sessions,
        broker: broker.clone(),
        task_store: task_store.clone(),
        scheduler: scheduler.clone(),
        scratch,
        memory: None,
    };
    register_builtin_tools(&services);

    // ── Scheduler + missed-task recovery ──────────────────────────
    // Unattended turns reuse the same loop without streaming or
    // confirmation hooks.
    let responder_services = services.clone();
    let responder: Responder = Arc::new(move |history, model| {
        let services = responder_services.clone();
        Box::pin(async move {
            let opts = TurnOptions {
                model,
                ..Default::default()
            };
            generate_response(&services, history, &opts).await
        })
    });
    let executor = Arc::new(TaskExecutor::new(
        task_store.clone(),
        router.clone(),
        responder,
        config.owner_user_id.clone(),
    ));
    scheduler.clone().start(executor.clone()).await?;

    let missed = Arc::new(MissedTaskRecovery::new(
        task_store,
        scheduler.clone(),
        executor,
        router,
        config.owner_user_id.clone(),
    ));
    let found = missed.scan().await?;
    if found > 0 {
        tracing::info!(count = found, "missed one-shot tasks need a decision");
    }

    let dispatcher = Arc::new(CallbackDispatcher::new(broker, missed));

    // ── Console loop ──────────────────────────────────────────────
    run_console(services, dispatcher).await;
    scheduler.stop();
    Ok(())
}

/// Minimal inbound transport: one line per user turn. Lines that look
/// like button payloads (`cfm:...`, `mst:...`) go to the callback
/// dispatcher, which lets confirmations resolve while a turn is
/// suspended on them.
async fn run_console(services: Services, dispatcher: Arc<CallbackDispatcher>) {
    let owner = if services.config.owner_user_id.is_empty() {
        "owner".to_string()
    } else {
        services.config.owner_user_id.clone()
    };
    println!("valet ready. /quit exits, /clear resets the conversation.");

    let turn_gate = Arc::new(tokio::sync::Mutex::new(()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }

        match line.as_str() {
            "/quit" | "/exit" => break,
            "/clear" => {
                let removed = services.sessions.clear(&owner);
                println!("cleared {removed} messages");
                continue;
            }
            _ => {}
        }

        if line.starts_with("cfm:") || line.starts_with("mst:") {
            let answer = dispatcher.dispatch(&line).await;
            println!("{answer}");
            continue;
        }

        // One turn at a time per conversation; a turn blocked on a
        // confirmation still lets callback lines through above.
        let Ok(_guard) = turn_gate.clone().try_lock_owned() else {
            println!("(still working on the previous message)");
            continue;
        };
        let ctx = MessageContext::new(owner.clone(), "console");
        let on_delta: valet_assistant::runtime::TextDeltaFn = Arc::new(|text: &str| {
            print!("{text}");
            let _ = std::io::stdout().flush();
        });

        let services = services.clone();
        tokio::spawn(async move {
            let _guard = _guard;
            match handle_user_message(&services, &ctx, &line, Some(on_delta)).await {
                Ok(_) => println!(),
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    println!("\n[valet] Something went wrong on my end. Try again in a moment.");
                }
            }
        });
    }
}
