//! Botkeeper CLI - Main entry point

mod signals;

use anyhow::Context;
use clap::Parser;
use keeper_foundation::config::LOG_DIR;
use keeper_foundation::{logging, preflight, KeeperConfig, LogSettings};
use keeper_task::{Daemon, ExitReason};
use signals::{signal_name, ShutdownSignals};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

/// Botkeeper - keeps the MCP daemon container and the bot's agent session alive
#[derive(Parser, Debug)]
#[command(name = "botkeeper")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plugin / working directory (defaults to the current directory)
    #[arg(long, env = "BOTKEEPER_PLUGIN_DIR")]
    plugin_dir: Option<PathBuf>,

    /// Env file to load (defaults to <plugin-dir>/.env)
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_file = match load_environment(&args) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("botkeeper: {:#}", e);
            return ExitCode::from(1);
        }
    };

    // Resolved once, after `.env`, so logging and the daemon share a plugin dir
    let config = load_config(&args);
    let settings = match &config {
        Ok(config) => log_settings(&args, config),
        Err(_) => fallback_log_settings(&args),
    };
    if let Err(e) = logging::init(settings) {
        eprintln!("botkeeper: {}", e);
        return ExitCode::from(1);
    }
    if let Some(file) = &env_file {
        debug!(file = %file.display(), "Loaded env file");
    }

    let config = match config.and_then(|config| preflight(&config).map(|()| config)) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Startup checks failed");
            return ExitCode::from(1);
        }
    };

    // Installed before any child process exists
    let mut signals = match ShutdownSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!(error = %e, "Failed to install signal handlers");
            return ExitCode::from(1);
        }
    };

    info!(
        plugin_dir = %config.plugin_dir.display(),
        container = %config.container_name,
        poll_timeout_secs = config.poll_timeout_secs,
        max_failures = config.max_failures,
        "Starting Botkeeper"
    );

    let daemon = Daemon::from_config(config);
    let lifecycle = daemon.lifecycle();

    let run = daemon.run();
    tokio::pin!(run);

    let mut reason = tokio::select! {
        result = &mut run => match result {
            Ok(()) => ExitReason::Completed,
            Err(e) => {
                error!(error = %e, "Botkeeper stopped on fatal error");
                ExitReason::Fatal
            }
        },
        signum = signals.recv() => {
            info!(signal = signal_name(signum), "Received signal, shutting down");
            ExitReason::Signal(signum)
        }
    };

    // After a signal the daemon future is still alive: keep driving it so the
    // in-flight agent can react to the stop request while teardown runs.
    let interrupted = matches!(reason, ExitReason::Signal(_));
    let shutdown = lifecycle.shutdown();
    tokio::pin!(shutdown);
    let teardown = async {
        if interrupted {
            tokio::select! {
                _ = &mut shutdown => return,
                result = &mut run => debug!(ok = result.is_ok(), "Daemon wound down"),
            }
        }
        (&mut shutdown).await;
    };

    tokio::select! {
        _ = teardown => {}
        signum = signals.recv() => {
            warn!(signal = signal_name(signum), "Second signal during shutdown, exiting now");
            reason = ExitReason::Signal(signum);
        }
    }

    info!(exit_code = reason.exit_code(), "Exiting");
    ExitCode::from(reason.exit_code() as u8)
}

/// Plugin dir as known before `.env` is applied
fn initial_plugin_dir(args: &Args) -> anyhow::Result<PathBuf> {
    match &args.plugin_dir {
        Some(dir) => Ok(dir.clone()),
        None => std::env::current_dir().context("Cannot determine current directory"),
    }
}

/// Apply the env file. Returns its path when one was loaded.
fn load_environment(args: &Args) -> anyhow::Result<Option<PathBuf>> {
    let env_file = match &args.env_file {
        Some(path) => path.clone(),
        None => initial_plugin_dir(args)?.join(".env"),
    };
    let loaded = load_env_file(&env_file, args.env_file.is_some())?;
    Ok(loaded.then_some(env_file))
}

/// Missing file is fine unless it was named explicitly
fn load_env_file(path: &Path, required: bool) -> anyhow::Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(dotenvy::Error::Io(e)) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("Cannot load env file {}", path.display())),
    }
}

fn load_config(args: &Args) -> keeper_foundation::Result<KeeperConfig> {
    let mut config = KeeperConfig::from_env(std::env::current_dir()?)?;
    // An explicit flag beats the env file
    if let Some(dir) = &args.plugin_dir {
        config.plugin_dir = dir.clone();
    }
    Ok(config)
}

fn log_settings(args: &Args, config: &KeeperConfig) -> LogSettings {
    let level = if args.debug { "DEBUG" } else { config.log_level.as_str() };
    LogSettings::new(level).with_log_dir(config.log_dir())
}

/// Used only to report a configuration error
fn fallback_log_settings(args: &Args) -> LogSettings {
    let settings = LogSettings::new(if args.debug { "DEBUG" } else { "INFO" });
    match initial_plugin_dir(args) {
        Ok(dir) => settings.with_log_dir(dir.join(LOG_DIR)),
        Err(_) => settings,
    }
}
