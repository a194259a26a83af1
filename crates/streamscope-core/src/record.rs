//! Record Data Structure
//!
//! A record is a single message in one partition of a topic:
//! - **partition**: the partition index the record was read from
//! - **offset**: unique, monotonically increasing position within the partition
//! - **timestamp**: broker-assigned creation time (milliseconds since epoch)
//! - **key**: optional grouping identifier
//! - **value**: the payload (arbitrary bytes, frequently JSON text)
//!
//! Uses `bytes::Bytes` for key and value so batches fetched off the wire can
//! be sliced without copying.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single record read from a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Partition the record belongs to
    pub partition: u32,

    /// Offset of this record within the partition
    pub offset: u64,

    /// Timestamp in milliseconds since epoch
    pub timestamp: i64,

    /// Optional key
    pub key: Option<Bytes>,

    /// Value (payload)
    pub value: Bytes,
}

impl Record {
    pub fn new(
        partition: u32,
        offset: u64,
        timestamp: i64,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            partition,
            offset,
            timestamp,
            key,
            value,
        }
    }

    /// Estimate the size of this record in bytes.
    pub fn estimated_size(&self) -> usize {
        4 + // partition
        8 + // offset
        8 + // timestamp
        self.key.as_ref().map(|k| k.len()).unwrap_or(0) +
        self.value.len()
    }
}
