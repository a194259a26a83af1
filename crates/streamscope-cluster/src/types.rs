//! Cluster topology types.
//!
//! A [`MetadataSnapshot`] is an immutable bundle of everything the resolver
//! learned about a cluster in one refresh. Snapshots are handed out as
//! `Arc<MetadataSnapshot>` and replaced wholesale; readers never observe a
//! half-updated topology.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Reserved internal topic holding committed consumer offsets. Excluded from
/// all user-facing topic listings.
pub const CONSUMER_OFFSETS_TOPIC: &str = "__consumer_offsets";

/// One broker in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broker {
    pub id: i32,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub rack: Option<String>,
}

impl Broker {
    /// "host:port" address for the connection pool.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One partition of a topic.
///
/// `leader` is a broker id, resolved against the snapshot's broker list on
/// use; the resolver owns the authoritative list. Watermarks only ever move
/// forward between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub index: u32,
    pub leader: i32,
    pub low_watermark: u64,
    pub high_watermark: u64,
}

/// A topic and its partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub name: String,
    pub replication_factor: u16,
    #[serde(default)]
    pub config: HashMap<String, String>,
    pub partitions: Vec<PartitionMetadata>,
}

impl TopicMetadata {
    pub fn partition(&self, index: u32) -> Option<&PartitionMetadata> {
        self.partitions.iter().find(|p| p.index == index)
    }
}

/// Immutable topology snapshot for one cluster.
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    pub brokers: Vec<Broker>,
    pub topics: HashMap<String, TopicMetadata>,
    /// When this snapshot was fetched; freshness is judged against this.
    pub fetched_at: Instant,
    /// True when discovery succeeded only partially (some brokers or leaders
    /// unreachable). Queries still run; the degradation is surfaced through
    /// `warnings`.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

impl MetadataSnapshot {
    pub fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }

    pub fn broker(&self, id: i32) -> Option<&Broker> {
        self.brokers.iter().find(|b| b.id == id)
    }

    pub fn topic(&self, name: &str) -> Option<&TopicMetadata> {
        self.topics.get(name)
    }

    /// Topic names visible to users: sorted, with the reserved offsets topic
    /// filtered out.
    pub fn user_topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .keys()
            .filter(|name| name.as_str() != CONSUMER_OFFSETS_TOPIC)
            .cloned()
            .collect();
        names.sort();
        names
    }
}
