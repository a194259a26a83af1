//! Cluster access layer for StreamScope.
//!
//! Everything that talks to a cluster lives here:
//!
//! - [`wire`]: length-prefixed JSON frame codec for the broker and
//!   coordination-service protocol
//! - [`pool`]: per-broker connection pool with bounded connection counts
//! - [`retry`]: bounded exponential backoff for transient transport failures
//! - [`protocol`]: the [`ClusterProtocol`] capability trait and the legacy /
//!   modern implementations behind it
//! - [`resolver`]: the TTL-cached, single-flight metadata snapshot cache and
//!   the metadata read surface built on top of it
//! - [`registry`]: alias -> cluster handle lookup, built once from config
//!
//! The SQL layer depends only on [`ClusterProtocol`], [`MetadataResolver`],
//! and [`ClusterRegistry`]; the protocol generation of a cluster is decided
//! once when the registry is built and is invisible afterwards.

pub mod error;
pub mod legacy;
pub mod modern;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod resolver;
mod route;
pub mod retry;
pub mod types;
pub mod wire;

pub use error::{ClusterError, Result};
pub use legacy::LegacyProtocol;
pub use modern::ModernProtocol;
pub use pool::BrokerPool;
pub use protocol::ClusterProtocol;
pub use registry::{ClusterHandle, ClusterRegistry};
pub use resolver::MetadataResolver;
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::{
    Broker, MetadataSnapshot, PartitionMetadata, TopicMetadata, CONSUMER_OFFSETS_TOPIC,
};
