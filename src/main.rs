use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheet_relay::channel::{Deliverer, MessageTemplate, TelegramChannel};
use sheet_relay::config::{Cli, Commands, RelayConfig, StoreLocation};
use sheet_relay::resolve::Resolver;
use sheet_relay::scheduler::{PollConfig, Scheduler};
use sheet_relay::server::{self, AppState};
use sheet_relay::source::CsvHttpSource;
use sheet_relay::store::{DeliveryStateStore, FileStore, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheet_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    match &config.store {
        StoreLocation::Directory(dir) => {
            let store = FileStore::open(dir)
                .with_context(|| format!("opening delivery store at {}", dir.display()))?;
            run(&cli.command, &config, store, cancel).await
        }
        StoreLocation::Memory => {
            warn!("Running with an in-memory store; a restart will redeliver every row");
            run(&cli.command, &config, MemoryStore::new(), cancel).await
        }
    }
}

async fn run<St: DeliveryStateStore>(
    command: &Commands,
    config: &RelayConfig,
    store: St,
    cancel: CancellationToken,
) -> anyhow::Result<ExitCode> {
    let interval = command.interval()?;

    let source = CsvHttpSource::new(config.source_url.clone(), config.request_timeout)
        .context("building source client")?;
    let resolver = Resolver::new(&config.columns, config.identity.clone());
    let channel = TelegramChannel::new(
        &config.api_base,
        &config.bot_token,
        &config.chat_id,
        config.request_timeout,
    )
    .context("building Telegram client")?;
    let deliverer = Deliverer::new(
        channel,
        MessageTemplate::for_columns(&config.columns),
        config.policy,
    )
    .with_max_chunk_chars(config.max_chunk_chars);

    let poll = interval.map(PollConfig::with_interval).unwrap_or_default();
    let mut scheduler = Scheduler::new(source, resolver, store, deliverer, poll);

    info!(
        source = %config.source_url,
        chat_id = %config.chat_id,
        identity = %config.identity,
        "Starting relay"
    );

    match command {
        Commands::RunOnce => {
            let report = scheduler.run_once(&cancel).await?;
            if report.ingest_failed() {
                error!(error = ?report.error, "Cycle failed");
                return Ok(ExitCode::FAILURE);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Watch { status_addr, .. } => {
            let server = status_addr.map(|addr| {
                let state = AppState::new(scheduler.status());
                tokio::spawn(server::serve(addr, state, cancel.clone()))
            });

            let result = scheduler.watch(&cancel).await;
            // The server must stop even when the scheduler ended on an error.
            cancel.cancel();

            if let Some(handle) = server {
                handle.await?.context("status server failed")?;
            }
            result?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown requested");
    cancel.cancel();
}
