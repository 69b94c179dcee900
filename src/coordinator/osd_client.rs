//! gRPC transport to OSDs

use crate::common::{CoordinatorConfig, Error, Result};
use crate::coordinator::capability::Capability;
use crate::coordinator::transport::{
    AuthoritativeState, FileCredentials, InvalidateResponse, ObjectVersion, ReplicaStatus,
    ReplicaTransport, TruncateRecord,
};
use crate::coordinator::xloc::{Replica, ReplicaSet};
use crate::proto;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::IntoRequest;

const INVALIDATE_PATH: &str = "/minimrc.OsdReplication/XLocSetInvalidate";
const FETCH_INVALIDATED_PATH: &str = "/minimrc.OsdReplication/FetchInvalidated";

/// Client for the `minimrc.OsdReplication` service
#[derive(Debug, Clone)]
pub struct OsdReplicationClient {
    inner: tonic::client::Grpc<Channel>,
}

impl OsdReplicationClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    pub async fn xloc_set_invalidate(
        &mut self,
        request: impl IntoRequest<proto::XLocSetInvalidateRequest>,
    ) -> std::result::Result<tonic::Response<proto::XLocSetInvalidateResponse>, tonic::Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        self.inner
            .unary(
                request.into_request(),
                PathAndQuery::from_static(INVALIDATE_PATH),
                codec,
            )
            .await
    }

    pub async fn fetch_invalidated(
        &mut self,
        request: impl IntoRequest<proto::FetchInvalidatedRequest>,
    ) -> std::result::Result<tonic::Response<proto::EmptyResponse>, tonic::Status> {
        self.ready().await?;
        let codec = tonic::codec::ProstCodec::default();
        self.inner
            .unary(
                request.into_request(),
                PathAndQuery::from_static(FETCH_INVALIDATED_PATH),
                codec,
            )
            .await
    }

    async fn ready(&mut self) -> std::result::Result<(), tonic::Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| tonic::Status::unavailable(format!("OSD connection not ready: {}", e)))
    }
}

/// [`ReplicaTransport`] over gRPC, one lazily connected channel per OSD address
pub struct GrpcTransport {
    channels: Mutex<HashMap<String, Channel>>,
    connect_timeout: Duration,
    rpc_timeout: Duration,
}

impl GrpcTransport {
    pub fn new(connect_timeout: Duration, rpc_timeout: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            connect_timeout,
            rpc_timeout,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.rpc_timeout(), config.rpc_timeout())
    }

    fn client(&self, address: &str) -> Result<OsdReplicationClient> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| Error::Internal("OSD channel cache poisoned".into()))?;
        if let Some(channel) = channels.get(address) {
            return Ok(OsdReplicationClient::new(channel.clone()));
        }

        let channel = Endpoint::from_shared(address.to_string())
            .map_err(|e| Error::ConnectionFailed(format!("invalid OSD address {}: {}", address, e)))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.rpc_timeout)
            .connect_lazy();
        channels.insert(address.to_string(), channel.clone());
        Ok(OsdReplicationClient::new(channel))
    }
}

#[tonic::async_trait]
impl ReplicaTransport for GrpcTransport {
    async fn invalidate(
        &self,
        address: &str,
        credentials: &FileCredentials,
        file_id: &str,
    ) -> Result<InvalidateResponse> {
        let request = proto::XLocSetInvalidateRequest {
            file_credentials: Some(credentials.into()),
            file_id: file_id.to_string(),
        };
        let response = self
            .client(address)?
            .xloc_set_invalidate(request)
            .await
            .map_err(status_error)?
            .into_inner();

        Ok(InvalidateResponse {
            is_primary: response.is_primary,
            status: response.status.map(ReplicaStatus::from),
        })
    }

    async fn fetch_invalidated(
        &self,
        address: &str,
        credentials: &FileCredentials,
        file_id: &str,
        state: &AuthoritativeState,
    ) -> Result<()> {
        let request = proto::FetchInvalidatedRequest {
            file_credentials: Some(credentials.into()),
            file_id: file_id.to_string(),
            state: Some(state.into()),
        };
        self.client(address)?
            .fetch_invalidated(request)
            .await
            .map_err(status_error)?;
        Ok(())
    }
}

fn status_error(status: tonic::Status) -> Error {
    match status.code() {
        tonic::Code::PermissionDenied | tonic::Code::Unauthenticated => {
            Error::PermissionDenied(status.message().to_string())
        }
        _ => Error::Grpc(status),
    }
}

// === Conversions ===

impl From<&Capability> for proto::XCap {
    fn from(cap: &Capability) -> Self {
        proto::XCap {
            file_id: cap.file_id.clone(),
            access_mode: cap.access_mode,
            issued_at_ms: cap.issued_at_ms,
            expires_at_ms: cap.expires_at_ms,
            client_identity: cap.client_identity.clone(),
            epoch: cap.epoch,
            signature: cap.signature.clone(),
        }
    }
}

impl From<&Replica> for proto::Replica {
    fn from(replica: &Replica) -> Self {
        let striping = replica.striping();
        proto::Replica {
            osd_uuids: replica.osd_uuids().to_vec(),
            striping_policy: Some(proto::StripingPolicy {
                stripe_size_kb: striping.stripe_size_kb,
                width: striping.width,
            }),
            replication_flags: replica.flags(),
        }
    }
}

impl From<&ReplicaSet> for proto::XLocSet {
    fn from(set: &ReplicaSet) -> Self {
        proto::XLocSet {
            replicas: set.replicas().iter().map(proto::Replica::from).collect(),
            version: set.version(),
            replica_update_policy: set.update_policy().to_string(),
            read_only_file_size: set.read_only_file_size(),
        }
    }
}

impl From<&FileCredentials> for proto::FileCredentials {
    fn from(credentials: &FileCredentials) -> Self {
        proto::FileCredentials {
            xcap: Some((&credentials.capability).into()),
            xlocs: Some((&credentials.xlocs).into()),
        }
    }
}

impl From<proto::TruncateRecord> for TruncateRecord {
    fn from(record: proto::TruncateRecord) -> Self {
        TruncateRecord {
            version: record.version,
            last_object_number: record.last_object_number,
        }
    }
}

impl From<&TruncateRecord> for proto::TruncateRecord {
    fn from(record: &TruncateRecord) -> Self {
        proto::TruncateRecord {
            version: record.version,
            last_object_number: record.last_object_number,
        }
    }
}

impl From<proto::ReplicaStatus> for ReplicaStatus {
    fn from(status: proto::ReplicaStatus) -> Self {
        ReplicaStatus {
            truncate_epoch: status.truncate_epoch,
            file_size: status.file_size,
            max_object_version: status.max_obj_version,
            primary_epoch: status.primary_epoch,
            object_versions: status
                .object_versions
                .into_iter()
                .map(|v| ObjectVersion {
                    object_number: v.object_number,
                    version: v.object_version,
                })
                .collect(),
            truncate_log: status
                .truncate_log
                .into_iter()
                .map(TruncateRecord::from)
                .collect(),
        }
    }
}

impl From<&AuthoritativeState> for proto::AuthoritativeReplicaState {
    fn from(state: &AuthoritativeState) -> Self {
        proto::AuthoritativeReplicaState {
            truncate_epoch: state.truncate_epoch,
            max_obj_version: state.max_object_version,
            object_versions: state
                .object_versions
                .iter()
                .map(|m| proto::ObjectVersionMapping {
                    object_number: m.object_number,
                    object_version: m.version,
                    osd_uuids: m.osd_uuids.clone(),
                })
                .collect(),
            truncate_log: state.truncate_log.iter().map(proto::TruncateRecord::from).collect(),
        }
    }
}
