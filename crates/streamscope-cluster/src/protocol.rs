//! Protocol-generation seam.
//!
//! Everything above this trait is generation-agnostic: the resolver, planner,
//! and scanner speak only in these four operations. Legacy and modern
//! clusters differ in where metadata lives and how offsets are resolved, but
//! both answer the same questions.

use async_trait::async_trait;

use streamscope_core::record::Record;

use crate::error::{ClusterError, Result};
use crate::types::{Broker, TopicMetadata};
use crate::wire::Response;

/// Capability surface a cluster generation must provide.
#[async_trait]
pub trait ClusterProtocol: Send + Sync {
    /// Live brokers, from the registry (legacy) or a broker round trip
    /// (modern).
    async fn discover_brokers(&self) -> Result<Vec<Broker>>;

    /// Full topic metadata including per-partition watermarks.
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>>;

    /// Earliest offset at or after `timestamp` in a partition, or `None`
    /// when every record is older.
    async fn offset_for_timestamp(
        &self,
        topic: &str,
        partition: u32,
        timestamp: i64,
    ) -> Result<Option<u64>>;

    /// Up to `max_records` records from `offset` onward. An empty batch means
    /// the partition has nothing more below its high watermark right now.
    async fn fetch_records(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max_records: usize,
    ) -> Result<Vec<Record>>;
}

/// A well-formed response of the wrong kind. Indicates a broker bug, not a
/// transient condition.
pub(crate) fn unexpected(cluster: &str, expected: &str, got: &Response) -> ClusterError {
    ClusterError::Protocol {
        addr: cluster.to_string(),
        message: format!("expected {expected} response, got {got:?}"),
    }
}
