//! Resume analysis command line client
//!
//! Single-binary client that:
//! 1. Loads config and the persisted session
//! 2. Sends API calls through the session orchestrator (one renewal per
//!    expiry, replayed requests)
//! 3. Polls long-running analyses until they finish

mod api;
mod commands;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use orchestrator::{Orchestrator, SessionLost};
use session::{FileStore, SessionStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::HttpTransport;

use crate::commands::USAGE;
use crate::config::Config;

/// Initialize tracing on stderr with LOG_LEVEL / RUST_LOG support.
///
/// LOG_FORMAT=json switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }
    let invocation = match commands::parse(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    // Install before any metric is emitted
    let prometheus = if invocation.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(invocation.config_path.as_deref());
    info!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!("configuration loaded");

    let backend = FileStore::open(&config.session.store_path).with_context(|| {
        format!(
            "failed to open session file {}",
            config.session.store_path.display()
        )
    })?;
    info!(path = %backend.path().display(), "session store opened");
    let store = Arc::new(SessionStore::new(Arc::new(backend)));

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let transport = Arc::new(HttpTransport::new(
        http,
        &config.api.base_url,
        config.api.timeout(),
    ));
    info!(base_url = %transport.base_url(), "API transport ready");

    let session_lost: Arc<dyn SessionLost> = Arc::new(|| {
        warn!("session lost, log in again with `resume-cli login <email>`");
    });
    let client = Orchestrator::new(store, transport, session_lost);

    let name = invocation.command.name();
    let started = Instant::now();
    let outcome = commands::run(invocation.command, &client, &config).await;
    metrics::record_command(name, outcome.is_ok(), started.elapsed().as_secs_f64());

    if let Some(handle) = prometheus {
        eprintln!("{}", handle.render());
    }

    outcome.with_context(|| format!("{name} failed"))
}
