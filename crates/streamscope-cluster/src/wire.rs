//! Wire protocol: length-prefixed JSON frames.
//!
//! Both broker generations and the legacy coordination service speak the
//! same framing: a `u32` big-endian payload length followed by one
//! JSON-encoded [`Request`] or [`Response`]. The codec is generic over
//! `AsyncRead`/`AsyncWrite` so tests can run it over an in-memory duplex
//! pipe instead of a TCP socket.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use streamscope_core::Record;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ClusterError, Result};

/// Upper bound on a single frame. A fetch response of `fetch_batch_size`
/// records stays far below this.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Requests understood by brokers (and, for `BrokerRegistry` and `Metadata`,
/// by the legacy coordination service).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Full topology: brokers plus topics with partitions and watermarks.
    Metadata,
    /// Broker registry only. Answered by the coordination service in legacy
    /// clusters.
    BrokerRegistry,
    /// Earliest offset at or after the given timestamp (ms since epoch).
    ListOffsets {
        topic: String,
        partition: u32,
        timestamp: i64,
    },
    /// Sequential read starting at `offset`, at most `max_records` records.
    Fetch {
        topic: String,
        partition: u32,
        offset: u64,
        max_records: usize,
    },
}

/// A record as carried on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRecord {
    pub offset: u64,
    pub timestamp: i64,
    #[serde(default)]
    pub key: Option<String>,
    pub value: String,
}

impl WireRecord {
    pub fn into_record(self, partition: u32) -> Record {
        Record::new(
            partition,
            self.offset,
            self.timestamp,
            self.key.map(Bytes::from),
            Bytes::from(self.value),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Metadata {
        brokers: Vec<crate::types::Broker>,
        topics: Vec<crate::types::TopicMetadata>,
    },
    BrokerRegistry {
        brokers: Vec<crate::types::Broker>,
    },
    ListOffsets {
        /// None when no record at or after the timestamp exists.
        offset: Option<u64>,
    },
    Fetch {
        records: Vec<WireRecord>,
    },
    Error {
        message: String,
    },
}

/// Serialize and write one frame.
pub async fn write_frame<W, T>(writer: &mut W, addr: &str, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message).map_err(|e| ClusterError::Protocol {
        addr: addr.to_string(),
        message: format!("encode failed: {e}"),
    })?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ClusterError::FrameTooLarge {
            addr: addr.to_string(),
            size: payload.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    let wrap = |source| ClusterError::Transport {
        addr: addr.to_string(),
        source,
    };
    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(wrap)?;
    writer.write_all(&payload).await.map_err(wrap)?;
    writer.flush().await.map_err(wrap)?;
    Ok(())
}

/// Read and decode one frame.
pub async fn read_frame<R, T>(reader: &mut R, addr: &str) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let wrap = |source| ClusterError::Transport {
        addr: addr.to_string(),
        source,
    };
    let len = reader.read_u32().await.map_err(wrap)? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ClusterError::FrameTooLarge {
            addr: addr.to_string(),
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(wrap)?;
    serde_json::from_slice(&payload).map_err(|e| ClusterError::Protocol {
        addr: addr.to_string(),
        message: format!("decode failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let request = Request::Fetch {
            topic: "orders".into(),
            partition: 2,
            offset: 100,
            max_records: 50,
        };
        write_frame(&mut client, "test", &request).await.unwrap();

        let decoded: Request = read_frame(&mut server, "test").await.unwrap();
        match decoded {
            Request::Fetch {
                topic,
                partition,
                offset,
                max_records,
            } => {
                assert_eq!(topic, "orders");
                assert_eq!(partition, 2);
                assert_eq!(offset, 100);
                assert_eq!(max_records, 50);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn response_roundtrip_preserves_records() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let response = Response::Fetch {
            records: vec![WireRecord {
                offset: 7,
                timestamp: 1_700_000_000_000,
                key: Some("k".into()),
                value: r#"{"x":3}"#.into(),
            }],
        };
        write_frame(&mut server, "test", &response).await.unwrap();

        let decoded: Response = read_frame(&mut client, "test").await.unwrap();
        match decoded {
            Response::Fetch { records } => {
                assert_eq!(records.len(), 1);
                let record = records[0].clone().into_record(4);
                assert_eq!(record.partition, 4);
                assert_eq!(record.offset, 7);
                assert_eq!(record.key.as_deref(), Some(b"k".as_ref()));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_frame_is_a_transport_error() {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_u32(64).await.unwrap();
        client.write_all(b"short").await.unwrap();
        drop(client);

        let mut server = server;
        let result: Result<Request> = read_frame(&mut server, "test").await;
        assert!(matches!(result, Err(ClusterError::Transport { .. })));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_read() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_u32((MAX_FRAME_SIZE + 1) as u32).await.unwrap();

        let result: Result<Request> = read_frame(&mut server, "test").await;
        assert!(matches!(result, Err(ClusterError::FrameTooLarge { .. })));
    }
}
