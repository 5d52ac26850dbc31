//! Discode CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use discode::config::Config;
use discode::daemon::{self, DaemonPaths, IpcCommand, IpcResponse};
use discode::messaging::{DiscordAdapter, MessagingManager, SlackAdapter};
use discode::pipeline::{Deps, Pipeline, TimerRegistry};
use discode::runtime::NullRuntime;
use discode::state::StateStore;
use discode::streaming::StreamingUpdater;
use discode::tracker::Tracker;

use std::sync::Arc;

#[derive(Parser)]
#[command(name = "discode", version)]
#[command(about = "Bridges AI coding-assistant CLIs to Slack/Discord")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand is given)
    Start {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Restart the daemon (stop + start)
    Restart {
        /// Run in the foreground instead of daemonizing
        #[arg(short, long)]
        foreground: bool,
    },
    /// Show status of the running daemon
    Status,
}

fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Start { foreground: false });

    match command {
        Command::Start { foreground } => cmd_start(cli.debug, foreground),
        Command::Stop => cmd_stop(),
        Command::Restart { foreground } => {
            cmd_stop_if_running();
            cmd_start(cli.debug, foreground)
        }
        Command::Status => cmd_status(),
    }
}

fn cmd_start(debug: bool, foreground: bool) -> anyhow::Result<()> {
    let default_paths = DaemonPaths::from_default().context("failed to resolve home directory")?;

    if let Some(pid) = daemon::is_running(&default_paths) {
        eprintln!("discode is already running (pid {pid})");
        std::process::exit(1);
    }

    // Validate config loads successfully before forking.
    let config = Config::load().context("failed to load configuration")?;

    if !foreground {
        // Fork before creating any Tokio runtime — Tokio's I/O driver and
        // thread pool don't survive fork, so tracing init happens after this.
        let paths = DaemonPaths::from_config(&config);
        daemon::daemonize(&paths)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        let paths = DaemonPaths::from_config(&config);
        if foreground {
            daemon::init_foreground_tracing(debug);
        } else {
            daemon::init_background_tracing(&paths, debug);
        }

        run(config, paths).await
    })
}

#[tokio::main]
async fn cmd_stop() -> anyhow::Result<()> {
    let paths = DaemonPaths::from_default().context("failed to resolve home directory")?;

    let Some(pid) = daemon::is_running(&paths) else {
        eprintln!("discode is not running");
        std::process::exit(1);
    };

    match daemon::send_command(&paths, IpcCommand::Shutdown).await {
        Ok(IpcResponse::Ok) => eprintln!("stopping discode (pid {pid})..."),
        Ok(IpcResponse::Error { message }) => {
            eprintln!("shutdown failed: {message}");
            std::process::exit(1);
        }
        Ok(_) => {
            eprintln!("unexpected response from daemon");
            std::process::exit(1);
        }
        Err(error) => {
            eprintln!("failed to send shutdown command: {error}");
            std::process::exit(1);
        }
    }

    if daemon::wait_for_exit(pid) {
        eprintln!("discode stopped");
    } else {
        eprintln!("discode did not stop within 10 seconds (pid {pid})");
        std::process::exit(1);
    }

    Ok(())
}

/// Stop if running, don't error if not — used by `restart` before starting again.
fn cmd_stop_if_running() {
    let Ok(paths) = DaemonPaths::from_default() else {
        return;
    };

    let Some(pid) = daemon::is_running(&paths) else {
        return;
    };

    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return;
    };

    runtime.block_on(async {
        if let Ok(IpcResponse::Ok) = daemon::send_command(&paths, IpcCommand::Shutdown).await {
            eprintln!("stopping discode (pid {pid})...");
            daemon::wait_for_exit(pid);
        }
    });
}

fn cmd_status() -> anyhow::Result<()> {
    let paths = DaemonPaths::from_default().context("failed to resolve home directory")?;

    let Some(_pid) = daemon::is_running(&paths) else {
        eprintln!("discode is not running");
        std::process::exit(1);
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    runtime.block_on(async {
        match daemon::send_command(&paths, IpcCommand::Status).await {
            Ok(IpcResponse::Status { pid, uptime_seconds }) => {
                let hours = uptime_seconds / 3600;
                let minutes = (uptime_seconds % 3600) / 60;
                let seconds = uptime_seconds % 60;
                eprintln!("discode is running");
                eprintln!("  pid:    {pid}");
                eprintln!("  uptime: {hours}h {minutes}m {seconds}s");
            }
            Ok(IpcResponse::Error { message }) => {
                eprintln!("status query failed: {message}");
                std::process::exit(1);
            }
            Ok(_) => {
                eprintln!("unexpected response from daemon");
                std::process::exit(1);
            }
            Err(error) => {
                eprintln!("failed to query daemon status: {error}");
                std::process::exit(1);
            }
        }
    });

    Ok(())
}

/// Build every long-lived subsystem and drive the daemon until a shutdown
/// signal arrives, then tear everything down in reverse order.
async fn run(config: Config, paths: DaemonPaths) -> anyhow::Result<()> {
    tracing::info!("starting discode");
    tracing::info!(home_dir = %config.home_dir.display(), "configuration loaded");

    let (mut shutdown_rx, _ipc_handle) = daemon::start_ipc_server(&paths)
        .await
        .context("failed to start IPC server")?;

    let token = discode::hooks::auth::generate_and_write(&config.hook_token_path())
        .context("failed to generate hook token")?;

    let state = Arc::new(
        StateStore::load(config.projects_state_path()).context("failed to load project bindings")?,
    );

    let mut messaging = MessagingManager::new();
    if let Some(discord) = &config.discord {
        messaging.register(DiscordAdapter::new(discord.bot_token.clone()));
    }
    if let Some(slack) = &config.slack {
        let adapter = SlackAdapter::new(slack.bot_token.clone(), slack.app_token.clone())
            .context("failed to build slack adapter")?;
        messaging.register(adapter);
    }
    let messaging = Arc::new(messaging);

    let config = Arc::new(config);
    let deps = Deps {
        config: config.clone(),
        messaging: messaging.clone(),
        tracker: Arc::new(Tracker::new()),
        streaming: Arc::new(StreamingUpdater::new(config.streaming.min_edit_interval)),
        timers: Arc::new(TimerRegistry::new()),
        state: state.clone(),
        runtime: Arc::new(NullRuntime),
    };

    let pipeline = Pipeline::new(deps.clone());

    let inbound_deps = deps.clone();
    messaging.on_message_all(Arc::new(move |message| {
        let deps = inbound_deps.clone();
        Box::pin(async move {
            discode::router::handle_inbound(&deps, message).await;
        })
    }));

    messaging
        .start_all()
        .await
        .context("failed to start messaging adapters")?;

    let _hook_handle = discode::hooks::serve(&config, pipeline, state, token, shutdown_rx.clone())
        .await
        .context("failed to start hook ingestion server")?;

    #[cfg(feature = "metrics")]
    let _metrics_handle = if let Some(port) = config.telemetry.metrics_port {
        Some(
            discode::telemetry::start_metrics_server(port, shutdown_rx.clone())
                .await
                .context("failed to start metrics server")?,
        )
    } else {
        None
    };

    tracing::info!("discode ready");

    tokio::select! {
        _ = shutdown_rx.wait_for(|shutdown| *shutdown) => {
            tracing::info!("shutdown signal received via IPC");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    deps.timers.cancel_all();
    if let Err(error) = messaging.shutdown_all().await {
        tracing::warn!(%error, "error shutting down messaging adapters");
    }

    tracing::info!("discode stopped");
    daemon::cleanup(&paths);

    // Force exit — detached tasks (e.g. the serenity gateway client) may keep
    // the tokio runtime alive after all owned resources have been cleaned up.
    std::process::exit(0);
}
