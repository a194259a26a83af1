//! StreamScope core types.
//!
//! Leaf crate shared by the cluster and SQL layers: the [`Record`] unit of
//! data and the configuration structs that describe clusters and query
//! execution limits. No I/O lives here.

pub mod config;
pub mod record;

pub use config::{ClusterConfig, QueryConfig, RetryConfig};
pub use record::Record;
