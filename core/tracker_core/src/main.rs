mod analytics;
mod backup;
mod model;
mod provider;
mod routes;
mod store;
mod suggest;

use clap::Parser;
use provider::{GeminiConfig, GeminiProvider, SuggestionProvider};
use routes::AppState;
use rusqlite::Connection;
use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "tracker_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    /// - localhost or localhost:port
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/tracker.db")]
    db: PathBuf,

    /// Owner key for every log and history row written by this instance.
    #[arg(long, env = "TRACKER_OWNER", default_value = "local")]
    owner: String,

    /// How many recent history entries per topic are shown to the provider.
    #[arg(long, default_value_t = 3)]
    history_window: usize,

    /// Gemini API key. Without it suggestions answer "API Key missing."
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, default_value = "gemini-flash-latest")]
    gemini_model: String,

    #[arg(long, default_value = "https://generativelanguage.googleapis.com")]
    gemini_base_url: String,

    /// Timeout for a single provider call (seconds).
    #[arg(long, default_value_t = 30)]
    provider_timeout_seconds: u64,

    /// Directory for daily database snapshots. Backups are off when unset.
    #[arg(long)]
    backup_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 24)]
    backup_interval_hours: u64,

    /// Number of snapshots to retain.
    #[arg(long, default_value_t = 7)]
    backup_keep: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&args.db)?;
    store::init_db(&conn)?;

    let provider = GeminiProvider::new(GeminiConfig {
        api_key: args.gemini_api_key.clone(),
        model: args.gemini_model.clone(),
        base_url: args.gemini_base_url.clone(),
        timeout: Duration::from_secs(args.provider_timeout_seconds.max(1)),
    })?;
    if let Err(err) = provider.check_configured() {
        warn!("{err}; suggestions are disabled until GEMINI_API_KEY is set");
    }

    let owner = args.owner.trim();
    if owner.is_empty() {
        anyhow::bail!("--owner must not be empty");
    }

    let state = AppState {
        conn: Arc::new(Mutex::new(conn)),
        provider: Arc::new(provider),
        owner: Arc::from(owner),
        history_window: args.history_window.clamp(1, 50),
    };

    if let Some(dir) = args.backup_dir.clone() {
        let cfg = backup::BackupConfig {
            db: args.db.clone(),
            dir,
            interval: Duration::from_secs(args.backup_interval_hours.max(1) * 60 * 60),
            keep: args.backup_keep,
        };
        info!("Backups: every {}h into {}", args.backup_interval_hours.max(1), cfg.dir.display());
        tokio::spawn(backup::backup_loop(cfg));
    }

    let app = routes::router(state);

    let addr = parse_listen(&args.listen)?;
    info!("Tracker listening on http://{addr}");
    info!("DB: {}", args.db.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        let bad_port = || {
            anyhow::anyhow!(
                "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                input,
                DEFAULT_PORT
            )
        };
        if host == "localhost" {
            let port: u16 = port_str.parse().map_err(|_| bad_port())?;
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
        }

        // IPv6 without brackets: ::1:17700
        if let Ok(ip) = host.parse::<IpAddr>() {
            let port: u16 = port_str.parse().map_err(|_| bad_port())?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
