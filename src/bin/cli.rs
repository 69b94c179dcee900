//! CLI for replica set administration

use clap::{Parser, Subcommand};
use minimrc::coordinator::http::{CreateFileRequest, ReplicaSpec};
use minimrc::coordinator::xloc::REPL_FLAG_FULL_REPLICA;
use minimrc::ops::AdminClient;

#[derive(Parser)]
#[command(name = "minimrc")]
#[command(about = "minimrc replica set administration CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:32636")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a file with its initial replicas
    Create {
        /// File ID
        file_id: String,

        /// Replica update policy (none, read_only, quorum, primary_backup_quorum)
        #[arg(long, default_value = "quorum")]
        policy: String,

        /// Head OSD of a replica (repeatable)
        #[arg(long = "replica", required = true)]
        replicas: Vec<String>,

        /// Mark the replicas as partial instead of full
        #[arg(long)]
        partial: bool,
    },

    /// Show a file's replica set and lock state
    Show {
        /// File ID
        file_id: String,
    },

    /// Add a replica and wait for the new replica set to be installed
    AddReplica {
        /// File ID
        file_id: String,

        /// OSD UUIDs of the new replica (the first is its head)
        #[arg(required = true)]
        osd_uuids: Vec<String>,

        /// Mark the replica as partial instead of full
        #[arg(long)]
        partial: bool,
    },

    /// Remove the replica headed by an OSD
    RemoveReplica {
        /// File ID
        file_id: String,

        /// Head OSD of the replica
        osd_uuid: String,
    },

    /// Recover a file left locked by a crashed coordinator
    Revalidate {
        /// File ID
        file_id: String,
    },
}

fn replica_flags(partial: bool) -> u32 {
    if partial {
        0
    } else {
        REPL_FLAG_FULL_REPLICA
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = AdminClient::new(&cli.coordinator);

    let response = match cli.command {
        Commands::Create {
            file_id,
            policy,
            replicas,
            partial,
        } => {
            let request = CreateFileRequest {
                file_id,
                update_policy: policy,
                replicas: replicas
                    .into_iter()
                    .map(|osd| ReplicaSpec {
                        osd_uuids: vec![osd],
                        striping: None,
                        flags: replica_flags(partial),
                    })
                    .collect(),
                read_only_file_size: 0,
            };
            client.create_file(&request).await?
        }

        Commands::Show { file_id } => client.show_file(&file_id).await?,

        Commands::AddReplica {
            file_id,
            osd_uuids,
            partial,
        } => {
            let replica = ReplicaSpec {
                osd_uuids,
                striping: None,
                flags: replica_flags(partial),
            };
            client.add_replicas(&file_id, vec![replica]).await?
        }

        Commands::RemoveReplica { file_id, osd_uuid } => {
            client.remove_replica(&file_id, &osd_uuid).await?
        }

        Commands::Revalidate { file_id } => client.revalidate(&file_id).await?,
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
