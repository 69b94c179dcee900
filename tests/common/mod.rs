//! Shared harness: a coordinator stack on a temporary RocksDB with scripted OSDs

#![allow(dead_code)]

use minimrc::common::{CoordinatorConfig, Result};
use minimrc::coordinator::classify::ErrorClassifier;
use minimrc::coordinator::lock::{LockManager, ReconfigurationLock};
use minimrc::coordinator::metadata::{FileMetadata, MetadataStore, MetadataUpdate};
use minimrc::coordinator::operations::ReplicaOperations;
use minimrc::coordinator::reconcile::LatestVersionReconciler;
use minimrc::coordinator::stage::{ProcessingStage, StageHandle};
use minimrc::coordinator::transport::{
    AuthoritativeState, FileCredentials, InvalidateResponse, ObjectVersion, ReplicaStatus,
    ReplicaTransport,
};
use minimrc::coordinator::xloc::{Replica, ReplicaSet, UpdatePolicy, REPL_FLAG_FULL_REPLICA};
use minimrc::coordinator::xloc_coordinator::{Completion, JobOutcome, XLocSetCoordinator};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::task::JoinHandle;

/// How a scripted OSD answers an invalidate
#[derive(Debug, Clone)]
pub enum Invalidate {
    Reply {
        primary: bool,
        versions: Vec<(u64, u64)>,
    },
    Fail,
    Deny,
    Hang,
}

/// What a fetch-invalidated call carried
#[derive(Debug, Clone)]
pub struct FetchCall {
    pub osd: String,
    pub state: AuthoritativeState,
    pub xloc_heads: Vec<String>,
}

/// OSDs keyed by `host:port`; unscripted OSDs reply as an empty backup
#[derive(Default)]
pub struct ScriptedOsds {
    invalidate: Mutex<HashMap<String, Invalidate>>,
    failing_fetches: Mutex<HashSet<String>>,
    invalidated: Mutex<Vec<String>>,
    fetched: Mutex<Vec<FetchCall>>,
}

impl ScriptedOsds {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, osd: &str, behaviour: Invalidate) {
        self.invalidate
            .lock()
            .unwrap()
            .insert(osd.to_string(), behaviour);
    }

    pub fn reply(&self, osd: &str, primary: bool, versions: &[(u64, u64)]) {
        self.script(
            osd,
            Invalidate::Reply {
                primary,
                versions: versions.to_vec(),
            },
        );
    }

    pub fn fail_fetches(&self, osd: &str) {
        self.failing_fetches.lock().unwrap().insert(osd.to_string());
    }

    pub fn invalidated(&self) -> Vec<String> {
        let mut osds = self.invalidated.lock().unwrap().clone();
        osds.sort();
        osds
    }

    /// OSDs in the order they were invalidated
    pub fn invalidation_order(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<FetchCall> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn fetched_osds(&self) -> Vec<String> {
        let mut osds: Vec<String> = self.fetched().into_iter().map(|c| c.osd).collect();
        osds.sort();
        osds
    }
}

fn osd_of(address: &str) -> String {
    address.trim_start_matches("http://").to_string()
}

#[tonic::async_trait]
impl ReplicaTransport for ScriptedOsds {
    async fn invalidate(
        &self,
        address: &str,
        _credentials: &FileCredentials,
        _file_id: &str,
    ) -> Result<InvalidateResponse> {
        let osd = osd_of(address);
        self.invalidated.lock().unwrap().push(osd.clone());
        let behaviour = self
            .invalidate
            .lock()
            .unwrap()
            .get(&osd)
            .cloned()
            .unwrap_or(Invalidate::Reply {
                primary: false,
                versions: Vec::new(),
            });

        match behaviour {
            Invalidate::Reply { primary, versions } => Ok(InvalidateResponse {
                is_primary: primary,
                status: Some(ReplicaStatus {
                    max_object_version: versions.iter().map(|&(_, v)| v).max().unwrap_or(0),
                    object_versions: versions
                        .into_iter()
                        .map(|(object_number, version)| ObjectVersion {
                            object_number,
                            version,
                        })
                        .collect(),
                    ..Default::default()
                }),
            }),
            Invalidate::Fail => Err(tonic::Status::unavailable("OSD down").into()),
            Invalidate::Deny => Err(tonic::Status::permission_denied("invalid capability").into()),
            Invalidate::Hang => std::future::pending().await,
        }
    }

    async fn fetch_invalidated(
        &self,
        address: &str,
        credentials: &FileCredentials,
        _file_id: &str,
        state: &AuthoritativeState,
    ) -> Result<()> {
        let osd = osd_of(address);
        self.fetched.lock().unwrap().push(FetchCall {
            osd: osd.clone(),
            state: state.clone(),
            xloc_heads: credentials.xlocs.head_osds(),
        });
        if self.failing_fetches.lock().unwrap().contains(&osd) {
            return Err(tonic::Status::unavailable("OSD down").into());
        }
        Ok(())
    }
}

pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        lease_timeout_ms: 200,
        rpc_timeout_ms: 500,
        ..Default::default()
    }
}

pub fn replica(osd: &str) -> Replica {
    Replica::single(osd, REPL_FLAG_FULL_REPLICA).unwrap()
}

pub fn replica_set(osds: &[&str], policy: UpdatePolicy) -> ReplicaSet {
    ReplicaSet::new(osds.iter().map(|o| replica(o)).collect(), 1, policy).unwrap()
}

pub struct Harness {
    pub dir: TempDir,
    pub stage: StageHandle,
    pub ops: Arc<ReplicaOperations>,
    pub osds: Arc<ScriptedOsds>,
    runner_task: JoinHandle<()>,
    stage_task: JoinHandle<()>,
}

impl Harness {
    pub fn start(osds: Arc<ScriptedOsds>) -> Self {
        Self::start_in(tempfile::tempdir().unwrap(), osds, LockManager::new())
    }

    /// Start on an existing database directory with the given lock owner
    pub fn start_in(dir: TempDir, osds: Arc<ScriptedOsds>, locks: LockManager) -> Self {
        let store = Arc::new(MetadataStore::open(dir.path()).unwrap());
        let (stage, stage_task) = ProcessingStage::start(store);
        let (coordinator, runner_task) = XLocSetCoordinator::new(
            &test_config(),
            osds.clone(),
            Arc::new(LatestVersionReconciler),
            stage.clone(),
        )
        .start();
        let ops = ReplicaOperations::new(Arc::new(locks), coordinator, ErrorClassifier::default());
        Self {
            dir,
            stage,
            ops,
            osds,
            runner_task,
            stage_task,
        }
    }

    /// Stop every task and close the database, as a process exit would
    pub async fn shutdown(self) -> TempDir {
        let Harness {
            dir,
            stage,
            ops,
            runner_task,
            stage_task,
            ..
        } = self;
        drop(ops);
        runner_task.await.unwrap();
        drop(stage);
        stage_task.await.unwrap();
        dir
    }

    pub async fn create(&self, file_id: &str, osds: &[&str], policy: UpdatePolicy) -> FileMetadata {
        let ops = self.ops.clone();
        let id = file_id.to_string();
        let xloc = replica_set(osds, policy);
        self.stage
            .call(file_id, move |store| ops.create_file(store, &id, xloc))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn add(&self, file_id: &str, osds: &[&str]) -> JobOutcome {
        let (completion, rx) = Completion::channel();
        let ops = self.ops.clone();
        let id = file_id.to_string();
        let replicas: Vec<Replica> = osds.iter().map(|o| replica(o)).collect();
        self.stage
            .enqueue_internal_callback(file_id, move |store| {
                ops.add_replicas(store, &id, replicas, completion)
            })
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn remove(&self, file_id: &str, osd: &str) -> JobOutcome {
        let (completion, rx) = Completion::channel();
        let ops = self.ops.clone();
        let id = file_id.to_string();
        let osd = osd.to_string();
        self.stage
            .enqueue_internal_callback(file_id, move |store| {
                ops.remove_replica(store, &id, &osd, completion)
            })
            .unwrap();
        rx.await.unwrap()
    }

    pub async fn revalidate(&self, file_id: &str) -> Result<FileMetadata> {
        let ops = self.ops.clone();
        let id = file_id.to_string();
        self.stage
            .call(file_id, move |store| ops.revalidate(store, &id))
            .await
            .unwrap()
    }

    pub async fn file(&self, file_id: &str) -> FileMetadata {
        let id = file_id.to_string();
        self.stage
            .call(file_id, move |store| store.require_file(&id))
            .await
            .unwrap()
            .unwrap()
    }

    /// Take the reconfiguration lock as this harness's process, outside of any job
    pub async fn hold_lock(&self, file_id: &str) {
        let ops = self.ops.clone();
        let id = file_id.to_string();
        self.stage
            .call(file_id, move |store| {
                let mut update = MetadataUpdate::new();
                ops.locks().acquire(store, &id, &mut update)?;
                store.apply(update)
            })
            .await
            .unwrap()
            .unwrap();
    }

    pub async fn lock(&self, file_id: &str) -> ReconfigurationLock {
        let ops = self.ops.clone();
        let id = file_id.to_string();
        self.stage
            .call(file_id, move |store| ops.locks().inspect(store, &id))
            .await
            .unwrap()
            .unwrap()
    }
}
