//! hAIveMind MCP Server — exposes the memory, confidence, sync, and
//! agent-registry engines over the Model Context Protocol (stdio + HTTP/SSE).

mod protocol;
mod server;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use haivemind_core::{AgentRegistry, Config, EventBus, Storage};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::tools::format_guide::FormatGuideTracker;

/// Event bus backlog; a slow subscriber can fall this far behind before
/// events start dropping.
const EVENT_BUS_CAPACITY: usize = 1024;
/// How often the soft-delete TTL sweep and the agent staleness sweep run.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(name = "haivemind-mcp", version, about = "hAIveMind MCP server")]
struct Cli {
    /// SQLite database path; defaults to the platform data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Config file path; `HAIVEMIND_CONFIG` takes precedence if set.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// A node's identity in vector clocks, audit records, and task delegation.
/// `HAIVEMIND_MACHINE_ID` wins if set; otherwise we fall back to whatever
/// the OS calls this host, and finally to a fresh id so the server still
/// starts on a host with neither.
fn resolve_machine_id() -> String {
    if let Ok(id) = std::env::var("HAIVEMIND_MACHINE_ID") {
        if !id.is_empty() {
            return id;
        }
    }
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.is_empty() {
            return host;
        }
    }
    if let Ok(host) = std::env::var("COMPUTERNAME") {
        if !host.is_empty() {
            return host;
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    warn!(machine_id = %id, "no HAIVEMIND_MACHINE_ID or hostname env var found, generated a random machine id");
    id
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("hAIveMind MCP server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let machine_id = resolve_machine_id();
    info!(machine_id = %machine_id, "resolved node identity");

    let storage = match Storage::new(cli.data_dir, machine_id) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to initialize storage: {}", e);
            std::process::exit(1);
        }
    };
    info!("storage initialized");

    let registry = Arc::new(AgentRegistry::new());
    let bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
    let format_guide = Arc::new(FormatGuideTracker::new());

    if !config.sync.peers.is_empty() {
        info!(
            peers = config.sync.peers.len(),
            "sync peers configured; peer-to-peer replication is not wired up in this build, \
             configured peers are accepted but inert"
        );
    }

    // Soft-delete TTL sweep and agent staleness sweep both run on the same
    // cadence; neither needs to be more responsive than an hour.
    {
        let storage = storage.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                match storage.cleanup_expired() {
                    Ok(ids) if !ids.is_empty() => {
                        info!(count = ids.len(), "soft-delete sweep hard-deleted expired memories");
                    }
                    Ok(_) => {}
                    Err(e) => warn!("soft-delete sweep failed: {}", e),
                }
                let stale = registry.sweep_stale(chrono::Utc::now());
                if !stale.is_empty() {
                    info!(count = stale.len(), agents = ?stale, "marked agents stale");
                }
                let reoffered = registry.retry_pending(chrono::Utc::now());
                if !reoffered.is_empty() {
                    info!(count = reoffered.len(), tasks = ?reoffered, "re-offered backed-off tasks");
                }
            }
        });
    }

    #[cfg(feature = "http")]
    {
        let http_config = protocol::http::HttpTransportConfig::from_config(&config);
        let storage = storage.clone();
        let registry = registry.clone();
        let bus = bus.clone();
        let format_guide = format_guide.clone();
        let peer_count = config.sync.peers.len();
        tokio::spawn(async move {
            let transport = protocol::http::HttpTransport::new(http_config);
            if let Err(e) = transport.run(storage, registry, bus, format_guide, peer_count).await {
                error!("HTTP transport error: {}", e);
            }
        });
    }

    let server = McpServer::new(storage, registry, bus, format_guide);
    let transport = StdioTransport::new();

    info!("serving MCP over stdio");
    if let Err(e) = transport.run(server).await {
        error!("stdio transport error: {}", e);
        std::process::exit(1);
    }

    info!("hAIveMind MCP server shutting down");
}
