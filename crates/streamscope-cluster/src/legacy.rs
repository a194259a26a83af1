//! Legacy protocol generation: coordination-service based discovery.
//!
//! Older clusters keep their broker registry and topic metadata in a
//! separate coordination service; the bootstrap endpoints of a legacy
//! cluster point at that service, not at brokers. Offsets and record
//! fetches still go to the partition leaders, whose addresses come from
//! the registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use streamscope_core::record::Record;

use crate::error::{ClusterError, Result};
use crate::pool::BrokerPool;
use crate::protocol::{unexpected, ClusterProtocol};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::route::RouteTable;
use crate::types::{Broker, TopicMetadata};
use crate::wire::{Request, Response};

pub struct LegacyProtocol {
    cluster: String,
    coordinators: Vec<String>,
    pool: Arc<BrokerPool>,
    retry: RetryPolicy,
    request_timeout: Duration,
    routes: RouteTable,
}

impl LegacyProtocol {
    pub fn new(
        cluster: impl Into<String>,
        coordinators: Vec<String>,
        pool: Arc<BrokerPool>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            coordinators,
            pool,
            retry,
            request_timeout,
            routes: RouteTable::new(),
        }
    }

    /// One bounded round trip; see `ModernProtocol::round_trip`.
    async fn round_trip(&self, addr: &str, request: &Request) -> Result<Response> {
        let mut conn = self.pool.checkout(addr).await?;
        let response = tokio::time::timeout(self.request_timeout, conn.request(request))
            .await
            .map_err(|_| ClusterError::RequestTimeout {
                addr: addr.to_string(),
            })??;
        match response {
            Response::Error { message } => Err(ClusterError::Protocol {
                addr: addr.to_string(),
                message,
            }),
            response => Ok(response),
        }
    }

    /// Asks the coordination service, trying each configured endpoint.
    async fn coordinator_request(&self, operation: &str, request: &Request) -> Result<Response> {
        let this = self;
        retry_with_backoff(&self.retry, operation, || async move {
            let mut last_err = None;
            for addr in &this.coordinators {
                match this.round_trip(addr, request).await {
                    Ok(response) => return Ok(response),
                    Err(err) if err.is_transient() => {
                        debug!(addr, error = %err, "coordinator endpoint unavailable");
                        last_err = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }
            Err(last_err.unwrap_or_else(|| ClusterError::Unreachable {
                cluster: this.cluster.clone(),
                detail: "no coordinator endpoints configured".to_string(),
            }))
        })
        .await
    }

    /// Leader address for a partition. Routes come from the registry and
    /// coordinator metadata; a miss refreshes both once.
    async fn leader_for(&self, topic: &str, partition: u32) -> Result<String> {
        if let Some(addr) = self.routes.leader_addr(topic, partition).await {
            return Ok(addr);
        }
        warn!(topic, partition, "no route to partition leader, refreshing registry");
        self.discover_brokers().await?;
        self.list_topics().await?;
        self.routes
            .leader_addr(topic, partition)
            .await
            .ok_or_else(|| ClusterError::UnknownTopicPartition {
                topic: topic.to_string(),
                partition,
            })
    }

    async fn leader_request(
        &self,
        operation: &str,
        topic: &str,
        partition: u32,
        request: &Request,
    ) -> Result<Response> {
        let addr = self.leader_for(topic, partition).await?;
        let this = self;
        let addr_ref = addr.as_str();
        retry_with_backoff(&self.retry, operation, || async move {
            this.round_trip(addr_ref, request).await
        })
        .await
    }
}

#[async_trait]
impl ClusterProtocol for LegacyProtocol {
    async fn discover_brokers(&self) -> Result<Vec<Broker>> {
        match self
            .coordinator_request("discover_brokers", &Request::BrokerRegistry)
            .await?
        {
            Response::BrokerRegistry { brokers } => {
                self.routes.record_brokers(&brokers).await;
                Ok(brokers)
            }
            other => Err(unexpected(&self.cluster, "broker_registry", &other)),
        }
    }

    async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
        match self.coordinator_request("list_topics", &Request::Metadata).await? {
            Response::Metadata { brokers, topics } => {
                // The coordinator may or may not echo the registry; take it
                // when present.
                if !brokers.is_empty() {
                    self.routes.record_brokers(&brokers).await;
                }
                self.routes.record_topics(&topics).await;
                Ok(topics)
            }
            other => Err(unexpected(&self.cluster, "metadata", &other)),
        }
    }

    async fn offset_for_timestamp(
        &self,
        topic: &str,
        partition: u32,
        timestamp: i64,
    ) -> Result<Option<u64>> {
        let request = Request::ListOffsets {
            topic: topic.to_string(),
            partition,
            timestamp,
        };
        match self
            .leader_request("offset_for_timestamp", topic, partition, &request)
            .await?
        {
            Response::ListOffsets { offset } => Ok(offset),
            other => Err(unexpected(&self.cluster, "list_offsets", &other)),
        }
    }

    async fn fetch_records(
        &self,
        topic: &str,
        partition: u32,
        offset: u64,
        max_records: usize,
    ) -> Result<Vec<Record>> {
        let request = Request::Fetch {
            topic: topic.to_string(),
            partition,
            offset,
            max_records,
        };
        match self
            .leader_request("fetch_records", topic, partition, &request)
            .await?
        {
            Response::Fetch { records } => Ok(records
                .into_iter()
                .map(|record| record.into_record(partition))
                .collect()),
            other => Err(unexpected(&self.cluster, "fetch", &other)),
        }
    }
}
