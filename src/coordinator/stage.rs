//! Metadata processing stage
//!
//! Every metadata mutation runs on one task that owns the [`MetadataStore`]
//! handle, in the order it was enqueued. Other components hand work to the stage
//! as callbacks through a [`StageHandle`].

use crate::common::{Error, Result};
use crate::coordinator::metadata::MetadataStore;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type InternalCallback = Box<dyn FnOnce(&MetadataStore) + Send + 'static>;

pub enum StageCommand {
    Callback {
        file_id: String,
        callback: InternalCallback,
    },
}

#[derive(Clone)]
pub struct StageHandle {
    tx: mpsc::UnboundedSender<StageCommand>,
}

impl StageHandle {
    /// Queue `callback` to run on the stage against the metadata store
    pub fn enqueue_internal_callback<F>(&self, file_id: impl Into<String>, callback: F) -> Result<()>
    where
        F: FnOnce(&MetadataStore) + Send + 'static,
    {
        self.tx
            .send(StageCommand::Callback {
                file_id: file_id.into(),
                callback: Box::new(callback),
            })
            .map_err(|_| Error::Internal("metadata stage is not running".into()))
    }

    /// Run `f` on the stage and wait for its result
    pub async fn call<R, F>(&self, file_id: impl Into<String>, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&MetadataStore) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue_internal_callback(file_id, move |store| {
            let _ = tx.send(f(store));
        })?;
        rx.await
            .map_err(|_| Error::Internal("metadata stage dropped the request".into()))
    }
}

pub struct ProcessingStage {
    store: Arc<MetadataStore>,
    rx: mpsc::UnboundedReceiver<StageCommand>,
}

impl ProcessingStage {
    /// Spawn the stage; it stops once every handle is dropped.
    pub fn start(store: Arc<MetadataStore>) -> (StageHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stage = ProcessingStage { store, rx };
        let task = tokio::spawn(stage.run());
        (StageHandle { tx }, task)
    }

    async fn run(mut self) {
        tracing::debug!("Metadata stage started");
        while let Some(command) = self.rx.recv().await {
            match command {
                StageCommand::Callback { file_id, callback } => {
                    tracing::trace!("Running internal callback for {}", file_id);
                    callback(&self.store);
                }
            }
        }
        tracing::debug!("Metadata stage stopped");
    }
}
