//! Cluster error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// No bootstrap endpoint responded within the connect timeout.
    #[error("cluster '{cluster}' unreachable: {detail}")]
    Unreachable { cluster: String, detail: String },

    /// The cluster declares a protocol generation this build cannot speak.
    #[error("unsupported protocol generation '{generation}' for cluster '{cluster}'")]
    UnsupportedProtocol { cluster: String, generation: String },

    /// No cluster is configured under this alias.
    #[error("unknown cluster alias '{0}'")]
    UnknownCluster(String),

    /// Connection-level failure (connect, read, write). Transient.
    #[error("transport error talking to {addr}: {source}")]
    Transport {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Endpoint did not answer within the connect timeout. Transient.
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// Endpoint accepted the connection but no response arrived within the
    /// request timeout. Transient.
    #[error("request to {addr} timed out")]
    RequestTimeout { addr: String },

    /// The remote side answered with a protocol-level error or a frame we
    /// could not decode. Not transient.
    #[error("protocol error from {addr}: {message}")]
    Protocol { addr: String, message: String },

    /// A frame exceeded the maximum allowed size. Not transient.
    #[error("frame of {size} bytes from {addr} exceeds limit of {limit}")]
    FrameTooLarge {
        addr: String,
        size: usize,
        limit: usize,
    },

    /// Topic or partition is not known to the broker that was asked.
    #[error("unknown topic or partition: {topic}/{partition}")]
    UnknownTopicPartition { topic: String, partition: u32 },
}

impl ClusterError {
    /// Whether a retry with backoff is worth attempting.
    ///
    /// Only connection-level failures qualify; protocol errors and topology
    /// errors will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClusterError::Transport { .. }
                | ClusterError::ConnectTimeout { .. }
                | ClusterError::RequestTimeout { .. }
        )
    }
}
