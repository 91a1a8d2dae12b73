//! sessionward - sign in to a token-authenticated API and make requests
//! with automatic credential refresh.

mod app;

use std::io;

use anyhow::Result;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, Command, USAGE};
use sessionward_core::Config;

/// Initialize the tracing subscriber for logging.
///
/// Console output goes to stderr (default level `warn`, override with
/// RUST_LOG). When the cache directory is available a daily log file is
/// written as well; the returned guard must live until exit.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = config.cache_dir().ok().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir.join("logs"), "sessionward.log");
        tracing_appender::non_blocking(appender)
    });

    match file {
        Some((writer, guard)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    let guard = init_tracing(&config);
    info!(api = %config.api_base_url, "sessionward starting");

    let mut app = App::new(config)?;
    if let Some(claims) = app.session().hydrate() {
        info!(subject = %claims.subject, "Existing session found");
    }

    let mut ended = app.session().subscribe();
    tokio::spawn(async move {
        loop {
            match ended.recv().await {
                Ok(_) => eprintln!("\nSession ended - sign in again with `sessionward login`."),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session notices dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let result = app.run(command).await;
    if let Err(ref e) = result {
        eprintln!("Error: {}", e);
    }

    info!("sessionward shutting down");
    // Flush the log file before a non-zero exit skips destructors.
    drop(guard);
    if result.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
