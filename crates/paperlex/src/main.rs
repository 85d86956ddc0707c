//! paperlex - moves tagged paperless-ngx documents into lexoffice.
//!
//! Runs a polling loop by default. `--once` runs a single cycle, which
//! suits cron-style scheduling.

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use paperlex_core::{credentials, Config, Synchronizer};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: paperlex [OPTIONS]

Options:
  --once                      Run a single sync cycle and exit
  --store-password <USER>     Store the lexoffice password for USER in the OS keychain
  --forget-password <USER>    Remove the stored lexoffice password for USER
  -h, --help                  Show this help

Configuration is read from ~/.config/paperlex/config.json, a .env file
and the environment (PAPERLESS_URL, PAPERLESS_TOKEN, INBOX_TAG_ID,
LEXOFFICE_TAG_ID, LEXOFFICE_USERNAME, ...). Use RUST_LOG to set the log level.";

enum Command {
    Run { once: bool },
    StorePassword(String),
    ForgetPassword(String),
    Help,
}

fn parse_args(args: &[String]) -> Result<Command> {
    let mut once = false;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" => once = true,
            "-h" | "--help" => return Ok(Command::Help),
            "--store-password" => {
                let user = iter.next().context("--store-password needs a username")?;
                return Ok(Command::StorePassword(user.clone()));
            }
            "--forget-password" => {
                let user = iter.next().context("--forget-password needs a username")?;
                return Ok(Command::ForgetPassword(user.clone()));
            }
            other => bail!("Unknown argument: {}\n\n{}", other, USAGE),
        }
    }
    Ok(Command::Run { once })
}

/// Initialize the tracing subscriber for logging.
/// With a log directory, a daily rotated file receives the same events;
/// the returned guard must live until exit so buffered lines are flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "paperlex.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Flip `tx` to true on Ctrl-C or SIGTERM.
fn spawn_shutdown_listener(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Could not install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown requested, finishing in-flight uploads");
        let _ = tx.send(true);
    });
}

fn store_password(username: &str) -> Result<()> {
    let password = rpassword::prompt_password(format!("lexoffice password for {}: ", username))
        .context("Failed to read password")?;
    credentials::save_password(username, &password)?;
    eprintln!("Password stored in the OS keychain.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let once = match parse_args(&args)? {
        Command::Help => {
            println!("{}", USAGE);
            return Ok(());
        }
        Command::StorePassword(user) => return store_password(&user),
        Command::ForgetPassword(user) => {
            if credentials::forget_password(&user)? {
                eprintln!("Password removed from the OS keychain.");
            } else {
                eprintln!("No password stored for {}.", user);
            }
            return Ok(());
        }
        Command::Run { once } => once,
    };

    let config = Config::load()?;
    let _guard = init_tracing(config.log_dir.as_deref());
    info!("paperlex starting");

    let synchronizer = Synchronizer::from_config(&config)?;

    let (tx, rx) = watch::channel(false);
    spawn_shutdown_listener(tx);

    if once {
        match synchronizer.run_cycle(&rx).await {
            Ok(Some(report)) => info!(
                found = report.found,
                uploaded = report.uploaded,
                failed = report.failed,
                skipped = report.skipped,
                "Sync cycle complete"
            ),
            Ok(None) => {}
            Err(e) => {
                error!("Sync cycle failed: {:#}", e);
                return Err(e);
            }
        }
    } else {
        synchronizer.run(config.polling_interval(), rx).await;
    }

    info!("paperlex shutting down");
    Ok(())
}
