//! Coordinator server

use crate::common::{CoordinatorConfig, Result};
use crate::coordinator::classify::ErrorClassifier;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::lock::LockManager;
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::operations::ReplicaOperations;
use crate::coordinator::osd_client::GrpcTransport;
use crate::coordinator::reconcile::LatestVersionReconciler;
use crate::coordinator::stage::ProcessingStage;
use crate::coordinator::xloc_coordinator::XLocSetCoordinator;
use std::sync::Arc;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        self.config.validate()?;

        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", self.config.bind_addr);
        tracing::info!("  DB path: {}", self.config.db_path.display());
        tracing::info!("  Lease timeout: {:?}", self.config.lease_timeout());
        tracing::info!("  Known OSDs: {}", self.config.osds.len());
        if let Some(master) = &self.config.metadata_master {
            tracing::info!("  Metadata master: {} (writes are redirected)", master);
        }

        // Metadata store and the stage that owns it
        let store = Arc::new(
            MetadataStore::open(&self.config.db_path)?
                .with_master(self.config.metadata_master.clone()),
        );
        let (stage, stage_task) = ProcessingStage::start(store.clone());

        // Reconfiguration runner
        let transport = Arc::new(GrpcTransport::from_config(&self.config));
        let (coordinator, runner_task) = XLocSetCoordinator::new(
            &self.config,
            transport,
            Arc::new(LatestVersionReconciler),
            stage.clone(),
        )
        .start();

        let locks = Arc::new(LockManager::new());
        tracing::info!("  Lock owner tag: {}", locks.owner_tag());
        let operations = ReplicaOperations::new(
            locks,
            coordinator,
            ErrorClassifier::new(self.config.metadata_master.clone()),
        );

        let router = create_router(CoordState::new(self.node_id.clone(), stage, operations));
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        tracing::info!("✓ Coordinator ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // The router held the last stage and runner handles
        if let Err(e) = runner_task.await {
            tracing::error!("Reconfiguration runner failed: {}", e);
        }
        if let Err(e) = stage_task.await {
            tracing::error!("Metadata stage failed: {}", e);
        }
        store.flush()?;
        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
