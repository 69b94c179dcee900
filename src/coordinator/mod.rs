//! Replica set reconfiguration coordinator
//!
//! The coordinator is responsible for:
//! - Serializing replica set changes per process (one job at a time, FIFO)
//! - Invalidating the old replicas and reconciling their object versions
//! - Bringing a quorum of the new replica set up to date
//! - Installing the new replica set through the metadata stage
//! - Recovering files whose change was interrupted by a crash

pub mod capability;
pub mod classify;
pub mod fanout;
pub mod http;
pub mod lock;
pub mod metadata;
pub mod operations;
pub mod osd_client;
pub mod reconcile;
pub mod server;
pub mod stage;
pub mod transport;
pub mod xloc;
pub mod xloc_coordinator;

pub use operations::ReplicaOperations;
pub use server::Coordinator;
pub use xloc::{Replica, ReplicaSet, UpdatePolicy};
pub use xloc_coordinator::{CoordinatorHandle, XLocSetCoordinator};
