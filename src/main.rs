//! issuebot: debounced Ruby issue tracker summaries for Discord.

use anyhow::Context as _;
use clap::Parser;
use issuebot::config::Config;
use issuebot::cycle::{CycleRunner, DownstreamTask};
use issuebot::db::Db;
use issuebot::debounce::{DebounceRegistry, DebounceStore};
use issuebot::discord::DiscordPresenter;
use issuebot::dispatch::EmailDispatcher;
use issuebot::forward::{ForwardTask, WebhookForwarder};
use issuebot::server::{self, AppState};
use issuebot::summarize::{LlmSummarizer, SummarizeTask};
use issuebot::trace::{LangfuseSink, NoopSink, TraceSink};
use issuebot::tracker::RestIssueRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(
    name = "issuebot",
    version,
    about = "Debounced Ruby issue tracker summaries for Discord"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = Config::load(cli.config.as_deref())?;

    let db = Db::connect(&config.database_path).await?;
    tracing::info!(database = %config.database_path, "database ready");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build http client")?;

    let sink: Arc<dyn TraceSink> =
        match (&config.langfuse.public_key, &config.langfuse.secret_key) {
            (Some(public_key), Some(secret_key)) => {
                tracing::info!(base_url = %config.langfuse.base_url, "langfuse tracing enabled");
                Arc::new(LangfuseSink::new(
                    client.clone(),
                    &config.langfuse.base_url,
                    public_key,
                    secret_key,
                ))
            }
            _ => {
                tracing::info!("langfuse keys absent, cycle tracing disabled");
                Arc::new(NoopSink)
            }
        };

    let repository = Arc::new(RestIssueRepository::new(client.clone()));
    let summarizer = Arc::new(LlmSummarizer::new(
        &config.openai_api_key,
        config.openai_base_url.as_deref(),
        config.summary_model.clone(),
    ));
    let presenter = Arc::new(DiscordPresenter::new(
        client.clone(),
        config.discord_webhook.clone(),
    ));
    let forwarder = Arc::new(WebhookForwarder::new(
        client.clone(),
        config.forward_webhook_urls.clone(),
    ));

    let tasks: Vec<Arc<dyn DownstreamTask>> = vec![
        Arc::new(SummarizeTask::new(repository, summarizer, presenter)),
        Arc::new(ForwardTask::new(forwarder)),
    ];
    let runner = Arc::new(CycleRunner::new(tasks, Arc::clone(&sink)));

    let store = DebounceStore::new(db.pool.clone());
    let registry = DebounceRegistry::new(store, runner, config.debounce_delay());

    let replayed = registry.replay().await?;
    if replayed > 0 {
        tracing::info!(replayed, "resumed debounce windows from a previous run");
    }

    let state = Arc::new(AppState {
        dispatcher: EmailDispatcher::new(config.admin_email.clone()),
        registry,
    });
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(address = %config.listen_addr, "issuebot listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    db.close().await;
    tracing::info!("issuebot shut down");
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if !directives.is_empty() => {
            tracing_subscriber::EnvFilter::new(directives)
        }
        _ => build_env_filter(debug),
    };
    let fmt_layer = tracing_subscriber::fmt::layer().compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::new("info")
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
