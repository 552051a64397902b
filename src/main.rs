//! # spark
//!
//! SiteSpark hub binary: wires storage, the completion source and the
//! credential verifier into the realtime server.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use spark_llm::{KimiConfig, provider_from_config};
use spark_server::{JwtVerifier, ServerDeps};
use spark_store::{ChatRepo, Database, WebsiteRepo};
use spark_telemetry::{TelemetryConfig, init_telemetry, parse_level};
use tracing::{info, warn};

use crate::settings::SparkSettings;

/// SiteSpark realtime chat hub.
#[derive(Parser, Debug)]
#[command(name = "spark", about = "SiteSpark realtime chat hub")]
struct Cli {
    /// JSON settings file, merged over built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn apply(&self, settings: &mut SparkSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path.clone_from(path);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = SparkSettings::load(cli.config.as_deref()).context("Failed to load settings")?;
    cli.apply(&mut settings);

    init_telemetry(&TelemetryConfig {
        log_level: parse_level(&settings.logging.level)?,
        json: settings.logging.json,
        ..TelemetryConfig::default()
    })?;

    if settings.uses_default_jwt_secret() {
        warn!("JWT_SECRET not set, using the built-in development secret");
    }

    let db_path = settings.database.path.clone();
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    info!(path = %db_path.display(), "Database ready");

    let kimi = KimiConfig::new(settings.kimi.api_key)
        .with_base_url(settings.kimi.base_url)
        .with_model(settings.kimi.model);
    let provider = provider_from_config(kimi).context("Failed to build completion source")?;

    let deps = ServerDeps {
        verifier: Arc::new(JwtVerifier::new(&settings.auth.jwt_secret)),
        provider,
        ownership: Arc::new(WebsiteRepo::new(db.clone())),
        turns: Arc::new(ChatRepo::new(db)),
    };

    let server = spark_server::start(settings.server, deps)
        .await
        .context("Failed to start server")?;
    info!(port = server.port(), "Ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    server.shutdown(None).await;
    Ok(())
}
