//! Coordinator binary

use clap::{Parser, Subcommand};
use minimrc::common::{parse_duration, Config};
use minimrc::Coordinator;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minimrc-coord")]
#[command(about = "minimrc replica set reconfiguration coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Node ID
        #[arg(long)]
        id: Option<String>,

        /// Bind address for the admin HTTP API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,

        /// Secret used to sign capabilities
        #[arg(long)]
        secret: Option<String>,

        /// Upper bound on the wait for the primary (e.g. 15s, 500ms)
        #[arg(long)]
        lease_timeout: Option<String>,

        /// Metadata master to redirect writes to
        #[arg(long)]
        master: Option<String>,

        /// OSD address, as UUID=ADDRESS (repeatable)
        #[arg(long = "osd", value_parser = parse_osd)]
        osds: Vec<(String, String)>,
    },
}

fn parse_osd(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((uuid, address)) if !uuid.is_empty() && !address.is_empty() => {
            Ok((uuid.to_string(), address.to_string()))
        }
        _ => Err(format!("expected UUID=ADDRESS, got '{}'", s)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            db,
            secret,
            lease_timeout,
            master,
            osds,
        } => {
            // Load config from file, then override with CLI arguments
            let config = Config::load();
            let node_id = id.unwrap_or(config.node_id);
            let mut coord_config = config.coordinator.unwrap_or_default();

            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(db) = db {
                coord_config.db_path = db;
            }
            if let Some(secret) = secret {
                coord_config.capability_secret = secret;
            }
            if let Some(lease_timeout) = lease_timeout {
                coord_config.lease_timeout_ms = parse_duration(&lease_timeout)?.as_millis() as u64;
            }
            if master.is_some() {
                coord_config.metadata_master = master;
            }
            coord_config.osds.extend(osds);

            let coord = Coordinator::new(coord_config, node_id);
            coord.serve().await?;
        }
    }

    Ok(())
}
