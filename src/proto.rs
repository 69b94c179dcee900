//! Wire messages of the OSD replication service (`minimrc.OsdReplication`)

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct XCap {
    #[prost(string, tag = "1")]
    pub file_id: String,
    #[prost(uint32, tag = "2")]
    pub access_mode: u32,
    #[prost(uint64, tag = "3")]
    pub issued_at_ms: u64,
    #[prost(uint64, tag = "4")]
    pub expires_at_ms: u64,
    #[prost(string, tag = "5")]
    pub client_identity: String,
    #[prost(uint32, tag = "6")]
    pub epoch: u32,
    #[prost(string, tag = "7")]
    pub signature: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StripingPolicy {
    #[prost(uint32, tag = "1")]
    pub stripe_size_kb: u32,
    #[prost(uint32, tag = "2")]
    pub width: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Replica {
    #[prost(string, repeated, tag = "1")]
    pub osd_uuids: Vec<String>,
    #[prost(message, optional, tag = "2")]
    pub striping_policy: Option<StripingPolicy>,
    #[prost(uint32, tag = "3")]
    pub replication_flags: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct XLocSet {
    #[prost(message, repeated, tag = "1")]
    pub replicas: Vec<Replica>,
    #[prost(uint32, tag = "2")]
    pub version: u32,
    #[prost(string, tag = "3")]
    pub replica_update_policy: String,
    #[prost(uint64, tag = "4")]
    pub read_only_file_size: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileCredentials {
    #[prost(message, optional, tag = "1")]
    pub xcap: Option<XCap>,
    #[prost(message, optional, tag = "2")]
    pub xlocs: Option<XLocSet>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ObjectVersion {
    #[prost(uint64, tag = "1")]
    pub object_number: u64,
    #[prost(uint64, tag = "2")]
    pub object_version: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TruncateRecord {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(uint64, tag = "2")]
    pub last_object_number: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicaStatus {
    #[prost(uint64, tag = "1")]
    pub truncate_epoch: u64,
    #[prost(uint64, tag = "2")]
    pub file_size: u64,
    #[prost(uint64, tag = "3")]
    pub max_obj_version: u64,
    #[prost(uint32, tag = "4")]
    pub primary_epoch: u32,
    #[prost(message, repeated, tag = "5")]
    pub object_versions: Vec<ObjectVersion>,
    #[prost(message, repeated, tag = "6")]
    pub truncate_log: Vec<TruncateRecord>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct XLocSetInvalidateRequest {
    #[prost(message, optional, tag = "1")]
    pub file_credentials: Option<FileCredentials>,
    #[prost(string, tag = "2")]
    pub file_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct XLocSetInvalidateResponse {
    #[prost(bool, tag = "1")]
    pub is_primary: bool,
    #[prost(message, optional, tag = "2")]
    pub status: Option<ReplicaStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectVersionMapping {
    #[prost(uint64, tag = "1")]
    pub object_number: u64,
    #[prost(uint64, tag = "2")]
    pub object_version: u64,
    #[prost(string, repeated, tag = "3")]
    pub osd_uuids: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthoritativeReplicaState {
    #[prost(uint64, tag = "1")]
    pub truncate_epoch: u64,
    #[prost(uint64, tag = "2")]
    pub max_obj_version: u64,
    #[prost(message, repeated, tag = "3")]
    pub object_versions: Vec<ObjectVersionMapping>,
    #[prost(message, repeated, tag = "4")]
    pub truncate_log: Vec<TruncateRecord>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchInvalidatedRequest {
    #[prost(message, optional, tag = "1")]
    pub file_credentials: Option<FileCredentials>,
    #[prost(string, tag = "2")]
    pub file_id: String,
    #[prost(message, optional, tag = "3")]
    pub state: Option<AuthoritativeReplicaState>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct EmptyResponse {}
