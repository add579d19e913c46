//! CLI entry point for the netwarden presence monitor.

use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use netwarden_audit::{AuditLog, AuditQuery, FileAuditLog, DEFAULT_QUERY_LIMIT};
use netwarden_core::{config as layered, EventKind, HardwareId, SystemClock};
use netwarden_store::{DeviceStore, GraphClient, MemoryDeviceStore, Neo4jConfig};

use netwarden_discover::config::{DiscoverConfig, IdentityConfig, StoreBackend};
use netwarden_discover::{
    HttpSignaler, Monitor, MonitorParts, NmapProber, NoopSignaler, Signaler, StaticIdentity,
};

#[derive(Parser)]
#[command(name = "netwarden")]
#[command(about = "LAN presence monitor: device discovery, authorization, and audit trail")]
struct Cli {
    /// Config file prefix (default: netwarden).
    #[arg(short, long, default_value = "netwarden", global = true)]
    config: String,

    /// Bearer token identifying the operator.
    #[arg(long, env = "NETWARDEN_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor until interrupted.
    Daemon,
    /// Run one sweep now and print its summary.
    Sweep,
    /// List devices (connected only unless --all).
    Devices {
        #[arg(long)]
        all: bool,
    },
    /// Print the network security status.
    Status,
    /// Authorize a device, or revoke it with --revoke.
    Authorize {
        hardware_id: String,
        #[arg(long)]
        revoke: bool,
    },
    /// Set a device's display name.
    Rename { hardware_id: String, name: String },
    /// Query the audit trail, newest first.
    Audit {
        #[arg(long)]
        device: Option<HardwareId>,
        #[arg(long)]
        kind: Option<EventKind>,
        /// First day included (YYYY-MM-DD).
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day included (YYYY-MM-DD).
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long, default_value_t = DEFAULT_QUERY_LIMIT)]
        limit: usize,
    },
    /// Verify the audit hash chain.
    VerifyAudit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let cfg = layered::load(&cli.config)?;
    let discover: DiscoverConfig = layered::section(&cfg, "discover")?;
    let identity: IdentityConfig = layered::section(&cfg, "identity")?;

    let monitor = build_monitor(&cfg, &discover, &identity).await?;
    let token = cli.token.as_deref();
    let console = monitor.console();

    match cli.command {
        Command::Daemon => {
            if discover.auto_start {
                monitor.scanner().start().await;
            }
            tracing::info!(
                range = %discover.network_range,
                auto_start = discover.auto_start,
                "Monitor running; press Ctrl-C to stop"
            );
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
        }
        Command::Sweep => print_json(&console.sweep_now(token).await?)?,
        Command::Devices { all } => {
            let devices = if all {
                console.list_history(token).await?
            } else {
                console.list_devices(token).await?
            };
            print_json(&devices)?;
        }
        Command::Status => print_json(&console.network_status(token).await?)?,
        Command::Authorize {
            hardware_id,
            revoke,
        } => print_json(&console.set_authorized(token, &hardware_id, !revoke).await?)?,
        Command::Rename { hardware_id, name } => {
            print_json(&console.rename(token, &hardware_id, &name).await?)?
        }
        Command::Audit {
            device,
            kind,
            from,
            to,
            limit,
        } => {
            let query = AuditQuery {
                limit,
                hardware_id: device,
                kind,
                ..Default::default()
            }
            .for_dates(from, to);
            print_json(&console.audit_log(token, &query)?)?;
        }
        Command::VerifyAudit => {
            let verified = console.verify_audit(token)?;
            print_json(&serde_json::json!({ "verified_records": verified }))?;
        }
    }

    monitor.shutdown().await;
    Ok(())
}

async fn build_monitor(
    cfg: &config::Config,
    discover: &DiscoverConfig,
    identity: &IdentityConfig,
) -> anyhow::Result<Monitor> {
    let range = discover.range()?;

    let store: Arc<dyn DeviceStore> = match discover.store {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory device store; device state is lost on exit");
            Arc::new(MemoryDeviceStore::new())
        }
        StoreBackend::Neo4j => {
            let neo4j: Neo4jConfig = layered::section(cfg, "neo4j")?;
            let client = GraphClient::connect(&neo4j).await?;
            client.ensure_schema().await?;
            Arc::new(client)
        }
    };

    let audit = FileAuditLog::open(&discover.audit_dir)
        .with_context(|| format!("failed to open audit log at {}", discover.audit_dir))?;
    let audit: Arc<dyn AuditLog> = Arc::new(audit);

    let prober = NmapProber::new(discover);
    match prober.verify_installation().await {
        Ok(version) => tracing::info!(nmap_version = %version.lines().next().unwrap_or("").trim(), "Nmap verified"),
        Err(e) => tracing::warn!(error = %e, "Nmap unavailable; sweeps will fail"),
    }

    let signaler: Arc<dyn Signaler> = match &discover.signal_url {
        Some(url) => Arc::new(HttpSignaler::new(url, discover.signal_timeout())?),
        None => Arc::new(NoopSignaler),
    };

    let identity = StaticIdentity::from_config(identity);
    if identity.is_empty() {
        tracing::warn!("No identity tokens configured; every console call will be rejected");
    }

    let parts = MonitorParts {
        prober: Arc::new(prober),
        store,
        audit,
        signaler,
        identity: Arc::new(identity),
        clock: Arc::new(SystemClock),
    };
    Ok(Monitor::new(parts, range, discover.scan_interval()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
