//! Query engine: the external entry point.
//!
//! Drives parse -> plan -> bounded fan-out -> merge for one query, and
//! exposes the metadata read surface the embedding layer serves from. Every
//! query gets a fresh full bounded scan; there are no cursors and no
//! subscriptions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use streamscope_cluster::{ClusterRegistry, PartitionMetadata};
use streamscope_core::QueryConfig;

use crate::error::Result;
use crate::merger;
use crate::parser::parse_query;
use crate::planner;
use crate::scanner::{scan, ScanContext};
use crate::types::{ExecuteResponse, ResponseStatus, ScanResult, ScanStatus};

pub struct QueryEngine {
    registry: Arc<ClusterRegistry>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(registry: Arc<ClusterRegistry>, config: QueryConfig) -> Self {
        Self { registry, config }
    }

    /// Executes one query against one cluster.
    ///
    /// Never fails outright: parse, plan, and cluster errors come back as
    /// `status: error` with an `error_message`, and scan-phase degradation
    /// (timeout, partial failure, limit truncation) as `status: truncated`
    /// with warnings. Timeouts are degradation, not errors.
    pub async fn execute(&self, cluster: &str, sql: &str) -> ExecuteResponse {
        match self.run(cluster, sql).await {
            Ok(response) => response,
            Err(err) => {
                warn!(cluster, error = %err, "query failed before scanning");
                ExecuteResponse {
                    status: ResponseStatus::Error,
                    rows: Vec::new(),
                    warnings: Vec::new(),
                    error_message: Some(err.to_string()),
                }
            }
        }
    }

    async fn run(&self, cluster: &str, sql: &str) -> Result<ExecuteResponse> {
        // Parse before touching the cluster: a malformed query costs zero
        // network calls.
        let query = Arc::new(parse_query(sql)?);

        let handle = self.registry.get(cluster)?;
        let snapshot = handle.resolver.resolve().await?;
        let plan = planner::plan(&snapshot, handle.protocol.as_ref(), &query).await?;

        let mut warnings = snapshot.warnings.clone();
        warnings.extend(plan.warnings.iter().cloned());

        let deadline = Instant::now() + self.config.query_timeout();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_scans.max(1)));
        let topic = Arc::new(plan.topic);

        let mut scans = JoinSet::new();
        for task in plan.tasks {
            let protocol = handle.protocol.clone();
            let query = query.clone();
            let topic = topic.clone();
            let limiter = limiter.clone();
            let cancel = cancel_rx.clone();
            let batch_size = self.config.fetch_batch_size;
            scans.spawn(async move {
                // Queue behind the concurrency bound; the deadline still
                // applies while waiting.
                let _permit = limiter.acquire_owned().await.ok();
                let ctx = ScanContext {
                    protocol,
                    batch_size,
                    deadline,
                    cancel,
                };
                scan(ctx, &topic, task, &query).await
            });
        }

        // Broadcast cancellation at the deadline so scanners stop between
        // records instead of being torn down mid-batch.
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = cancel_tx.send(true);
        });

        // Scanners observe the deadline between fetches; one blocked inside
        // a fetch cannot, so after a short grace the remaining tasks are
        // aborted and the merge proceeds with whatever exists.
        let join_deadline = deadline + Duration::from_millis(250);
        let mut results = Vec::new();
        loop {
            let joined = match tokio::time::timeout_at(join_deadline, scans.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    warn!(cluster, "aborting partition scans still in flight past the deadline");
                    scans.abort_all();
                    results.push(ScanResult {
                        partition: u32::MAX,
                        rows: Vec::new(),
                        aggregate: None,
                        skipped: 0,
                        status: ScanStatus::TruncatedByTimeout,
                        warnings: vec![
                            "query deadline passed with partition scans still in flight"
                                .to_string(),
                        ],
                    });
                    // Aborted tasks join with a cancellation error; anything
                    // that finished in time still counts.
                    while let Some(joined) = scans.join_next().await {
                        if let Ok(result) = joined {
                            results.push(result);
                        }
                    }
                    break;
                }
            };
            match joined {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(cluster, error = %err, "scan task aborted");
                    results.push(ScanResult {
                        partition: u32::MAX,
                        rows: Vec::new(),
                        aggregate: None,
                        skipped: 0,
                        status: ScanStatus::PartialFailure,
                        warnings: vec![format!("a partition scan aborted: {err}")],
                    });
                }
            }
        }
        watchdog.abort();

        let merged = merger::merge(results, &query, self.config.max_rows);
        warnings.extend(merged.warnings);

        let status = match merged.status {
            ScanStatus::Complete => ResponseStatus::Ok,
            _ => ResponseStatus::Truncated,
        };

        info!(
            cluster,
            topic = %topic,
            rows = merged.rows.len(),
            status = ?status,
            "query finished"
        );

        Ok(ExecuteResponse {
            status,
            rows: merged.rows,
            warnings,
            error_message: None,
        })
    }

    // ------------------------------------------------------------------
    // Metadata read surface
    // ------------------------------------------------------------------

    pub async fn topic_exists(&self, cluster: &str, topic: &str) -> Result<bool> {
        let handle = self.registry.get(cluster)?;
        Ok(handle.resolver.topic_exists(topic).await?)
    }

    /// User-visible topics of a cluster, sorted; the reserved offsets topic
    /// is excluded.
    pub async fn list_topics(&self, cluster: &str) -> Result<Vec<String>> {
        let handle = self.registry.get(cluster)?;
        Ok(handle.resolver.list_topics().await?)
    }

    pub async fn topic_count(&self, cluster: &str) -> Result<usize> {
        let handle = self.registry.get(cluster)?;
        Ok(handle.resolver.topic_count().await?)
    }

    pub async fn partition_count(&self, cluster: &str, topic: &str) -> Result<Option<usize>> {
        let handle = self.registry.get(cluster)?;
        Ok(handle.resolver.partition_count(topic).await?)
    }

    /// A page of a topic's partitions; paging is the caller's concern.
    pub async fn partition_metadata(
        &self,
        cluster: &str,
        topic: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PartitionMetadata>> {
        let handle = self.registry.get(cluster)?;
        Ok(handle.resolver.partition_metadata(topic, offset, limit).await?)
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }
}
