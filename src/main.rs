use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parley_core::{AlertSink, Generator, Guardrail};
use parley_engine::{CoordinatorConfig, GenerationOptions, KeywordGuardrail, ResponderRegistry, StreamCoordinator};
use parley_llm::{EchoGenerator, OpenAiConfig, OpenAiGenerator, ReliableConfig, ReliableGenerator};
use parley_settings::{data_dir, GeneratorSettings, ParleySettings};
use parley_store::{Database, DatabaseConfig, SqliteConversationStore, SqliteSessionStore};
use parley_telemetry::{init_telemetry, TelemetryConfig, TracingAlertSink};
use parley_server::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Routed, streamed tutoring conversations over WebSocket")]
struct Cli {
    /// Settings file (defaults to ~/.parley/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path, or `:memory:`.
    #[arg(long)]
    db: Option<String>,

    /// Answer with the local echo generator instead of a remote model.
    #[arg(long)]
    mock: bool,

    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => parley_settings::load_settings_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => parley_settings::load_settings().context("loading settings")?,
    };
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = &cli.db {
        settings.store.db_path = db.clone();
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    settings.validate().context("invalid settings")?;

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: settings.logging.level.clone(),
        json: settings.logging.json,
        alert_db_path: Some(data_dir().join("alerts.db")),
        ..Default::default()
    });

    tracing::info!("starting parley");

    let db = open_database(&settings)?;
    let sessions = Arc::new(SqliteSessionStore::new(db.clone()));
    let turns = Arc::new(SqliteConversationStore::new(db));

    let generator = build_generator(&settings, cli.mock)?;
    let guardrail: Option<Arc<dyn Guardrail>> = if settings.guardrail.enabled {
        Some(Arc::new(
            KeywordGuardrail::from_settings(&settings.guardrail).context("building guardrail")?,
        ))
    } else {
        None
    };
    let options = GenerationOptions {
        max_tokens: Some(settings.generator.max_tokens),
        temperature: Some(settings.generator.temperature),
    };
    let registry = ResponderRegistry::build(&settings.responders, generator, guardrail, options)
        .context("building responder registry")?;

    let alerts: Arc<dyn AlertSink> = match telemetry.alerts() {
        Some(sink) => sink,
        None => Arc::new(TracingAlertSink),
    };

    let coordinator = Arc::new(StreamCoordinator::new(
        Arc::new(registry),
        sessions,
        turns,
        alerts,
        CoordinatorConfig::from_settings(&settings),
    ));

    let handle = parley_server::start(ServerConfig::from_settings(&settings), coordinator)
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "parley ready");

    tokio::signal::ctrl_c().await.context("listening for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn open_database(settings: &ParleySettings) -> anyhow::Result<Database> {
    if settings.store.db_path == ":memory:" {
        tracing::warn!("using an in-memory database, conversations will not survive a restart");
        return Database::in_memory().context("opening in-memory database");
    }
    let path = settings.resolved_db_path();
    let config = DatabaseConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
        ..Default::default()
    };
    let db = Database::open(&path, &config).with_context(|| format!("opening database {}", path.display()))?;
    tracing::info!(path = %path.display(), "database opened");
    Ok(db)
}

fn build_generator(settings: &ParleySettings, mock: bool) -> anyhow::Result<Arc<dyn Generator>> {
    let reliable = reliable_config(&settings.generator);
    if mock {
        tracing::info!("using echo generator");
        return Ok(Arc::new(ReliableGenerator::new(EchoGenerator::default(), reliable)));
    }

    let cfg = &settings.generator;
    let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.trim().is_empty());
    if api_key.is_none() {
        tracing::warn!(env = %cfg.api_key_env, "no API key set, requests go out unauthenticated");
    }
    let openai = OpenAiGenerator::new(OpenAiConfig {
        base_url: cfg.base_url.clone(),
        model: cfg.model.clone(),
        api_key,
        max_tokens: Some(cfg.max_tokens),
        temperature: Some(cfg.temperature),
        request_timeout: Duration::from_secs(cfg.request_timeout_secs),
    })
    .context("building generator client")?;
    Ok(Arc::new(ReliableGenerator::new(openai, reliable)))
}

fn reliable_config(cfg: &GeneratorSettings) -> ReliableConfig {
    let retry = &cfg.retry;
    ReliableConfig {
        max_retries: retry.max_attempts.saturating_sub(1),
        base_delay: Duration::from_millis(retry.base_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        circuit_breaker_threshold: cfg.circuit_breaker_threshold,
        circuit_breaker_cooldown: Duration::from_secs(cfg.circuit_breaker_cooldown_secs),
        ..Default::default()
    }
}
