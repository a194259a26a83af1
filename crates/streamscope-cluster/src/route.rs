//! Leader routing shared by the protocol implementations.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::types::{Broker, TopicMetadata};

/// Maps partitions to leader broker addresses, refreshed from the last
/// metadata round trip.
pub(crate) struct RouteTable {
    inner: RwLock<Routes>,
}

#[derive(Default)]
struct Routes {
    brokers: HashMap<i32, String>,
    leaders: HashMap<(String, u32), i32>,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Routes::default()),
        }
    }

    pub(crate) async fn record_brokers(&self, brokers: &[Broker]) {
        let mut routes = self.inner.write().await;
        routes.brokers = brokers
            .iter()
            .map(|broker| (broker.id, broker.address()))
            .collect();
    }

    pub(crate) async fn record_topics(&self, topics: &[TopicMetadata]) {
        let mut routes = self.inner.write().await;
        routes.leaders = topics
            .iter()
            .flat_map(|topic| {
                topic.partitions.iter().map(|partition| {
                    ((topic.name.clone(), partition.index), partition.leader)
                })
            })
            .collect();
    }

    pub(crate) async fn leader_addr(&self, topic: &str, partition: u32) -> Option<String> {
        let routes = self.inner.read().await;
        let leader = routes.leaders.get(&(topic.to_string(), partition))?;
        routes.brokers.get(leader).cloned()
    }
}
