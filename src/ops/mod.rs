//! Ops commands against a running coordinator

pub mod admin;

pub use admin::AdminClient;
