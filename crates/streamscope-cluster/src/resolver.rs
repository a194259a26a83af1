//! TTL-cached metadata resolver.
//!
//! Holds at most one current [`MetadataSnapshot`] per cluster and replaces
//! it wholesale on refresh. A snapshot younger than the TTL is served as-is;
//! an older one triggers a synchronous refresh before returning, so callers
//! never see topology older than the TTL. Concurrent callers during a
//! refresh share the one in-flight refresh (single-flight) instead of
//! stampeding the cluster.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ClusterError, Result};
use crate::protocol::ClusterProtocol;
use crate::types::{MetadataSnapshot, PartitionMetadata};

pub struct MetadataResolver {
    cluster: String,
    protocol: Arc<dyn ClusterProtocol>,
    ttl: Duration,
    current: RwLock<Option<Arc<MetadataSnapshot>>>,
    refresh_lock: Mutex<()>,
}

impl MetadataResolver {
    pub fn new(cluster: impl Into<String>, protocol: Arc<dyn ClusterProtocol>, ttl: Duration) -> Self {
        Self {
            cluster: cluster.into(),
            protocol,
            ttl,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn protocol(&self) -> Arc<dyn ClusterProtocol> {
        self.protocol.clone()
    }

    /// Current snapshot, refreshed first if older than the TTL.
    pub async fn resolve(&self) -> Result<Arc<MetadataSnapshot>> {
        // Fast path: fresh snapshot under the read lock.
        {
            let current = self.current.read().await;
            if let Some(snapshot) = current.as_ref() {
                if snapshot.age() < self.ttl {
                    return Ok(snapshot.clone());
                }
            }
        }

        // Slow path: one refresh at a time. Whoever loses the race to the
        // lock re-checks and rides the winner's snapshot.
        let _guard = self.refresh_lock.lock().await;
        {
            let current = self.current.read().await;
            if let Some(snapshot) = current.as_ref() {
                if snapshot.age() < self.ttl {
                    debug!(cluster = %self.cluster, "refresh already done by concurrent caller");
                    return Ok(snapshot.clone());
                }
            }
        }

        let snapshot = Arc::new(self.refresh().await?);
        *self.current.write().await = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn refresh(&self) -> Result<MetadataSnapshot> {
        debug!(cluster = %self.cluster, "refreshing cluster metadata");
        let (topics_result, brokers_result) =
            tokio::join!(self.protocol.list_topics(), self.protocol.discover_brokers());

        // Topic metadata is what queries plan against; without it the
        // refresh has failed. A missing broker view only degrades it.
        let topics = match topics_result {
            Ok(topics) => topics,
            Err(err) if err.is_transient() => {
                return Err(ClusterError::Unreachable {
                    cluster: self.cluster.clone(),
                    detail: err.to_string(),
                })
            }
            Err(err) => return Err(err),
        };

        let mut degraded = false;
        let mut warnings = Vec::new();

        let brokers = match brokers_result {
            Ok(brokers) => brokers,
            Err(err) => {
                warn!(cluster = %self.cluster, error = %err, "broker discovery failed, snapshot degraded");
                degraded = true;
                warnings.push(format!("broker discovery failed: {err}"));
                Vec::new()
            }
        };

        let known: HashSet<i32> = brokers.iter().map(|b| b.id).collect();
        if !brokers.is_empty() {
            for topic in &topics {
                for partition in &topic.partitions {
                    if !known.contains(&partition.leader) {
                        degraded = true;
                        warnings.push(format!(
                            "leader {} of {}/{} not in broker registry",
                            partition.leader, topic.name, partition.index
                        ));
                    }
                }
            }
        }

        info!(
            cluster = %self.cluster,
            brokers = brokers.len(),
            topics = topics.len(),
            degraded,
            "metadata refreshed"
        );

        Ok(MetadataSnapshot {
            brokers,
            topics: topics
                .into_iter()
                .map(|topic| (topic.name.clone(), topic))
                .collect(),
            fetched_at: Instant::now(),
            degraded,
            warnings,
        })
    }

    // ------------------------------------------------------------------
    // Metadata read surface
    // ------------------------------------------------------------------

    pub async fn topic_exists(&self, name: &str) -> Result<bool> {
        Ok(self.resolve().await?.topic(name).is_some())
    }

    /// User-visible topic names, sorted, internal topics excluded.
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        Ok(self.resolve().await?.user_topics())
    }

    pub async fn topic_count(&self) -> Result<usize> {
        Ok(self.resolve().await?.user_topics().len())
    }

    pub async fn partition_count(&self, topic: &str) -> Result<Option<usize>> {
        Ok(self
            .resolve()
            .await?
            .topic(topic)
            .map(|t| t.partitions.len()))
    }

    /// A page of a topic's partitions, ordered by index. An unknown topic or
    /// an offset past the end yields an empty page.
    pub async fn partition_metadata(
        &self,
        topic: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<PartitionMetadata>> {
        let snapshot = self.resolve().await?;
        let Some(topic) = snapshot.topic(topic) else {
            return Ok(Vec::new());
        };
        let mut partitions = topic.partitions.clone();
        partitions.sort_by_key(|p| p.index);
        Ok(partitions.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Broker, TopicMetadata};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use streamscope_core::record::Record;

    struct MockProtocol {
        brokers: Vec<Broker>,
        topics: Vec<TopicMetadata>,
        fail_brokers: bool,
        fail_topics: bool,
        refresh_delay: Duration,
        topic_calls: AtomicUsize,
    }

    impl MockProtocol {
        fn new(topics: Vec<TopicMetadata>) -> Self {
            Self {
                brokers: vec![Broker {
                    id: 1,
                    host: "b1".into(),
                    port: 9092,
                    rack: None,
                }],
                topics,
                fail_brokers: false,
                fail_topics: false,
                refresh_delay: Duration::ZERO,
                topic_calls: AtomicUsize::new(0),
            }
        }
    }

    fn topic(name: &str, leader: i32) -> TopicMetadata {
        TopicMetadata {
            name: name.into(),
            replication_factor: 1,
            config: HashMap::new(),
            partitions: vec![PartitionMetadata {
                index: 0,
                leader,
                low_watermark: 0,
                high_watermark: 100,
            }],
        }
    }

    fn transient() -> ClusterError {
        ClusterError::ConnectTimeout {
            addr: "b1:9092".into(),
        }
    }

    #[async_trait]
    impl ClusterProtocol for MockProtocol {
        async fn discover_brokers(&self) -> Result<Vec<Broker>> {
            if self.fail_brokers {
                return Err(transient());
            }
            Ok(self.brokers.clone())
        }

        async fn list_topics(&self) -> Result<Vec<TopicMetadata>> {
            self.topic_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.refresh_delay).await;
            if self.fail_topics {
                return Err(transient());
            }
            Ok(self.topics.clone())
        }

        async fn offset_for_timestamp(&self, _: &str, _: u32, _: i64) -> Result<Option<u64>> {
            Ok(None)
        }

        async fn fetch_records(&self, _: &str, _: u32, _: u64, _: usize) -> Result<Vec<Record>> {
            Ok(vec![])
        }
    }

    fn resolver(mock: MockProtocol, ttl: Duration) -> Arc<MetadataResolver> {
        Arc::new(MetadataResolver::new("local", Arc::new(mock), ttl))
    }

    #[tokio::test]
    async fn snapshot_within_ttl_is_a_cache_hit() {
        let resolver = resolver(
            MockProtocol::new(vec![topic("orders", 1)]),
            Duration::from_secs(60),
        );

        let first = resolver.resolve().await.unwrap();
        let second = resolver.resolve().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn expired_snapshot_triggers_refresh() {
        let mock = Arc::new(MockProtocol::new(vec![topic("orders", 1)]));
        let resolver = Arc::new(MetadataResolver::new("local", mock.clone(), Duration::ZERO));

        resolver.resolve().await.unwrap();
        resolver.resolve().await.unwrap();

        assert_eq!(mock.topic_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_refresh() {
        let mut mock = MockProtocol::new(vec![topic("orders", 1)]);
        mock.refresh_delay = Duration::from_millis(50);
        let mock = Arc::new(mock);
        let resolver = Arc::new(MetadataResolver::new(
            "local",
            mock.clone(),
            Duration::from_secs(60),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            handles.push(tokio::spawn(async move { resolver.resolve().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(mock.topic_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broker_discovery_failure_degrades_but_succeeds() {
        let mut mock = MockProtocol::new(vec![topic("orders", 1)]);
        mock.fail_brokers = true;
        let resolver = resolver(mock, Duration::from_secs(60));

        let snapshot = resolver.resolve().await.unwrap();
        assert!(snapshot.degraded);
        assert!(!snapshot.warnings.is_empty());
        assert_eq!(snapshot.user_topics(), vec!["orders"]);
    }

    #[tokio::test]
    async fn topic_metadata_failure_is_unreachable() {
        let mut mock = MockProtocol::new(vec![topic("orders", 1)]);
        mock.fail_topics = true;
        let resolver = resolver(mock, Duration::from_secs(60));

        let result = resolver.resolve().await;
        assert!(matches!(result, Err(ClusterError::Unreachable { .. })));
    }

    #[tokio::test]
    async fn unknown_leader_marks_snapshot_degraded() {
        let resolver = resolver(
            MockProtocol::new(vec![topic("orders", 9)]),
            Duration::from_secs(60),
        );

        let snapshot = resolver.resolve().await.unwrap();
        assert!(snapshot.degraded);
    }

    #[tokio::test]
    async fn read_surface_pages_partitions() {
        let mut meta = topic("orders", 1);
        meta.partitions = (0..5)
            .map(|index| PartitionMetadata {
                index,
                leader: 1,
                low_watermark: 0,
                high_watermark: 10,
            })
            .collect();
        let resolver = resolver(MockProtocol::new(vec![meta]), Duration::from_secs(60));

        assert!(resolver.topic_exists("orders").await.unwrap());
        assert!(!resolver.topic_exists("missing").await.unwrap());
        assert_eq!(resolver.topic_count().await.unwrap(), 1);
        assert_eq!(resolver.partition_count("orders").await.unwrap(), Some(5));

        let page = resolver.partition_metadata("orders", 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].index, 2);
        assert_eq!(page[1].index, 3);

        assert!(resolver
            .partition_metadata("orders", 10, 2)
            .await
            .unwrap()
            .is_empty());
        assert!(resolver
            .partition_metadata("missing", 0, 2)
            .await
            .unwrap()
            .is_empty());
    }
}
