mod config;

use clap::{Args, Parser, Subcommand};
use config::{Config, LoggingConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const STATSD_PREFIX: &str = "upgrade_responder";

#[derive(Parser)]
#[command(name = "upgrade-responder", version, about = "Answers application version checks")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve version checks until interrupted
    Serve(ConfigArgs),
    /// Load the configuration, validate it and precompute every decision
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (CliCommand::Serve(args) | CliCommand::CheckConfig(args)) = &cli.command;

    let config = match Config::from_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", args.config_file.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_logging(config.common.logging.as_ref());

    if let Some(metrics) = &config.common.metrics {
        if let Err(e) =
            shared::metrics::init_statsd(&metrics.statsd_host, metrics.statsd_port, STATSD_PREFIX)
        {
            tracing::error!(error = %e, "Failed to initialize metrics");
            return ExitCode::FAILURE;
        }
    }

    match cli.command {
        CliCommand::Serve(_) => serve(config.responder),
        CliCommand::CheckConfig(_) => check_config(config.responder),
    }
}

/// Logs to stderr, filtered by `RUST_LOG` (default `info`). With a Sentry DSN
/// configured, error events are also reported to Sentry. The returned guard
/// flushes pending events when dropped.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let mut dsn_error = None;
    let guard = logging.and_then(|logging| match logging.sentry_dsn.parse::<sentry::types::Dsn>() {
        Ok(dsn) => Some(sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            release: sentry::release_name!(),
            ..Default::default()
        })),
        Err(e) => {
            dsn_error = Some(e);
            None
        }
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    if let Some(e) = dsn_error {
        tracing::warn!(error = %e, "Invalid Sentry DSN, error reporting is disabled");
    }

    guard
}

fn serve(config: responder::config::Config) -> ExitCode {
    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    rt.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(cancel_on_signal(shutdown.clone()));

        tracing::info!("Starting upgrade responder");
        match responder::run(config, shutdown).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Upgrade responder failed");
                ExitCode::FAILURE
            }
        }
    })
}

fn check_config(config: responder::config::Config) -> ExitCode {
    let result = config
        .validate()
        .and_then(|()| responder::load_engine(&config));

    match result {
        Ok(engine) => {
            println!(
                "{}: {} rules, {} versions",
                config.response_config.display(),
                engine.precomputed().len(),
                engine.default_versions().len()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            ExitCode::FAILURE
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}
