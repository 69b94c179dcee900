//! # minimrc
//!
//! Replica set reconfiguration for a metadata server:
//! - Per-file lock persisted as an extended attribute, with crash detection
//! - Invalidate / reconcile / update phases fanned out to OSDs over gRPC
//! - Majority quorums, with a bounded wait for the primary's lease to expire
//! - New replica sets installed through a single metadata processing stage
//! - HTTP admin API and CLI
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//! ┌──────────────┐  HTTP   ┌────────────────────────────────────────┐
//! │ minimrc CLI  ├────────►│ Coordinator                            │
//! └──────────────┘         │  ReplicaOperations ─► ProcessingStage  │
//!                          │        │               (RocksDB)       │
//!                          │        ▼                   ▲           │
//!                          │  XLocSetCoordinator ───────┘ install   │
//!                          └────────┬───────────────────────────────┘
//!                                   │ gRPC (invalidate, fetch)
//!                    ┌──────────────┼──────────────┐
//!                  ┌─▼────┐      ┌──▼───┐      ┌───▼──┐
//!                  │ OSD 1│      │ OSD 2│      │ OSD 3│
//!                  └──────┘      └──────┘      └──────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! minimrc-coord serve \
//!   --id mrc-1 \
//!   --bind 0.0.0.0:32636 \
//!   --db ./mrc-data \
//!   --osd osd-1=http://10.0.0.1:32640 --osd osd-2=http://10.0.0.2:32640
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minimrc create vol:1 --policy quorum --replica osd-1 --replica osd-2
//! minimrc add-replica vol:1 osd-3
//! minimrc remove-replica vol:1 osd-1
//! minimrc show vol:1
//! minimrc revalidate vol:1
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;
pub mod proto;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, ReplicaOperations, XLocSetCoordinator};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
