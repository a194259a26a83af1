//! Query planner.
//!
//! Turns a parsed query plus the current metadata snapshot into one
//! [`ScanTask`] per partition. The high watermark at plan time is the
//! scan ceiling; writes that land mid-scan are out of scope for this query.
//! LIMIT is never pushed down: a per-partition limit would skew results
//! toward low-index partitions, so the merger applies it globally.

use streamscope_cluster::{ClusterProtocol, MetadataSnapshot};
use tracing::{debug, warn};

use crate::error::{Result, SqlError};
use crate::types::{ExecutionPlan, Query, ScanTask};

/// Plans one scan task per partition of the query's topic.
///
/// Partitions where timestamp resolution fails are dropped from the plan
/// with a warning rather than failing the query. A topic with no partitions
/// yields an empty plan.
pub async fn plan(
    snapshot: &MetadataSnapshot,
    protocol: &dyn ClusterProtocol,
    query: &Query,
) -> Result<ExecutionPlan> {
    let topic = snapshot
        .topic(&query.topic)
        .ok_or_else(|| SqlError::TopicNotFound {
            topic: query.topic.clone(),
        })?;

    let mut partitions = topic.partitions.clone();
    partitions.sort_by_key(|p| p.index);

    let mut tasks = Vec::with_capacity(partitions.len());
    let mut warnings = Vec::new();

    for partition in &partitions {
        let start_offset = match query.start_timestamp {
            None => partition.low_watermark,
            Some(timestamp) => {
                match protocol
                    .offset_for_timestamp(&query.topic, partition.index, timestamp)
                    .await
                {
                    // The watermark still floors the start in case the
                    // broker answers below it.
                    Ok(Some(offset)) => offset.max(partition.low_watermark),
                    // Every record is older than the bound; nothing to scan.
                    Ok(None) => continue,
                    Err(err) => {
                        warn!(
                            topic = %query.topic,
                            partition = partition.index,
                            error = %err,
                            "timestamp resolution failed, dropping partition from plan"
                        );
                        warnings.push(format!(
                            "partition {} dropped: offset-for-timestamp failed: {err}",
                            partition.index
                        ));
                        continue;
                    }
                }
            }
        };

        if start_offset < partition.high_watermark {
            tasks.push(ScanTask {
                partition: partition.index,
                start_offset,
                end_offset: partition.high_watermark,
            });
        }
    }

    debug!(
        topic = %query.topic,
        tasks = tasks.len(),
        dropped = warnings.len(),
        "plan built"
    );

    Ok(ExecutionPlan {
        topic: query.topic.clone(),
        tasks,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Projection;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Instant;
    use streamscope_cluster::error::ClusterError;
    use streamscope_cluster::types::{Broker, PartitionMetadata, TopicMetadata};
    use streamscope_core::Record;

    struct PlanMock {
        /// partition -> offset answer; absent partitions error.
        offsets: HashMap<u32, Option<u64>>,
    }

    #[async_trait]
    impl ClusterProtocol for PlanMock {
        async fn discover_brokers(&self) -> streamscope_cluster::Result<Vec<Broker>> {
            Ok(vec![])
        }
        async fn list_topics(&self) -> streamscope_cluster::Result<Vec<TopicMetadata>> {
            Ok(vec![])
        }
        async fn offset_for_timestamp(
            &self,
            topic: &str,
            partition: u32,
            _timestamp: i64,
        ) -> streamscope_cluster::Result<Option<u64>> {
            self.offsets.get(&partition).copied().ok_or_else(|| {
                ClusterError::UnknownTopicPartition {
                    topic: topic.to_string(),
                    partition,
                }
            })
        }
        async fn fetch_records(
            &self,
            _: &str,
            _: u32,
            _: u64,
            _: usize,
        ) -> streamscope_cluster::Result<Vec<Record>> {
            Ok(vec![])
        }
    }

    fn snapshot(partitions: Vec<PartitionMetadata>) -> MetadataSnapshot {
        let mut topics = HashMap::new();
        topics.insert(
            "orders".to_string(),
            TopicMetadata {
                name: "orders".into(),
                replication_factor: 1,
                config: HashMap::new(),
                partitions,
            },
        );
        MetadataSnapshot {
            brokers: vec![],
            topics,
            fetched_at: Instant::now(),
            degraded: false,
            warnings: vec![],
        }
    }

    fn partition(index: u32, low: u64, high: u64) -> PartitionMetadata {
        PartitionMetadata {
            index,
            leader: 1,
            low_watermark: low,
            high_watermark: high,
        }
    }

    fn query(start_timestamp: Option<i64>) -> Query {
        Query {
            topic: "orders".into(),
            projection: Projection::All,
            predicate: None,
            limit: None,
            start_timestamp,
        }
    }

    #[tokio::test]
    async fn plans_from_low_watermarks_without_time_bound() {
        let snapshot = snapshot(vec![partition(1, 5, 20), partition(0, 0, 10)]);
        let mock = PlanMock {
            offsets: HashMap::new(),
        };

        let plan = plan(&snapshot, &mock, &query(None)).await.unwrap();
        // sorted by partition index
        assert_eq!(
            plan.tasks,
            vec![
                ScanTask {
                    partition: 0,
                    start_offset: 0,
                    end_offset: 10
                },
                ScanTask {
                    partition: 1,
                    start_offset: 5,
                    end_offset: 20
                },
            ]
        );
        assert!(plan.warnings.is_empty());
    }

    #[tokio::test]
    async fn unknown_topic_fails() {
        let snapshot = snapshot(vec![]);
        let mock = PlanMock {
            offsets: HashMap::new(),
        };
        let mut q = query(None);
        q.topic = "missing".into();

        let err = plan(&snapshot, &mock, &q).await.unwrap_err();
        assert!(matches!(err, SqlError::TopicNotFound { topic } if topic == "missing"));
    }

    #[tokio::test]
    async fn zero_partitions_is_an_empty_plan() {
        let snapshot = snapshot(vec![]);
        let mock = PlanMock {
            offsets: HashMap::new(),
        };
        let plan = plan(&snapshot, &mock, &query(None)).await.unwrap();
        assert!(plan.tasks.is_empty());
        assert!(plan.warnings.is_empty());
    }

    #[tokio::test]
    async fn drained_partition_yields_no_task() {
        let snapshot = snapshot(vec![partition(0, 10, 10)]);
        let mock = PlanMock {
            offsets: HashMap::new(),
        };
        let plan = plan(&snapshot, &mock, &query(None)).await.unwrap();
        assert!(plan.tasks.is_empty());
    }

    #[tokio::test]
    async fn time_bound_resolves_per_partition_and_drops_failures() {
        let snapshot = snapshot(vec![
            partition(0, 0, 10),
            partition(1, 0, 10),
            partition(2, 0, 10),
        ]);
        let mut offsets = HashMap::new();
        offsets.insert(0, Some(4));
        offsets.insert(1, None); // everything older than the bound
                                 // partition 2 answers with an error
        let mock = PlanMock { offsets };

        let plan = plan(&snapshot, &mock, &query(Some(1_000))).await.unwrap();
        assert_eq!(
            plan.tasks,
            vec![ScanTask {
                partition: 0,
                start_offset: 4,
                end_offset: 10
            }]
        );
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.warnings[0].contains("partition 2"));
    }

    #[tokio::test]
    async fn resolved_offset_is_floored_at_the_low_watermark() {
        let snapshot = snapshot(vec![partition(0, 5, 10)]);
        let mut offsets = HashMap::new();
        offsets.insert(0, Some(1));
        let mock = PlanMock { offsets };

        let plan = plan(&snapshot, &mock, &query(Some(1_000))).await.unwrap();
        assert_eq!(plan.tasks[0].start_offset, 5);
    }
}
