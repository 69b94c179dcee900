//! Common utilities and types shared across minimrc

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{Config, CoordinatorConfig};
pub use error::{Error, Result};
pub use utils::{encode_path_segment, parse_duration, timestamp_now, timestamp_now_millis};
