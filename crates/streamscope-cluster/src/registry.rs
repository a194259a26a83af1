//! Cluster registry: alias -> handle.
//!
//! Built once from configuration. Protocol generation dispatch happens here
//! and nowhere else; everything handed out is behind [`ClusterProtocol`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use streamscope_core::{ClusterConfig, QueryConfig};

use crate::error::{ClusterError, Result};
use crate::legacy::LegacyProtocol;
use crate::modern::ModernProtocol;
use crate::pool::BrokerPool;
use crate::protocol::ClusterProtocol;
use crate::resolver::MetadataResolver;
use crate::retry::RetryPolicy;

/// Everything the query engine needs to talk to one cluster.
pub struct ClusterHandle {
    pub config: ClusterConfig,
    pub protocol: Arc<dyn ClusterProtocol>,
    pub resolver: Arc<MetadataResolver>,
}

pub struct ClusterRegistry {
    clusters: HashMap<String, Arc<ClusterHandle>>,
}

impl ClusterRegistry {
    /// Builds handles for every configured cluster. Fails on the first
    /// unrecognized generation tag rather than deferring to query time.
    pub fn new(configs: Vec<ClusterConfig>, query: &QueryConfig) -> Result<Self> {
        let retry = RetryPolicy::from_config(&query.retry);
        let mut clusters = HashMap::new();

        for config in configs {
            let pool = Arc::new(BrokerPool::new(
                query.max_connections_per_broker,
                config.connect_timeout(),
                query.pool_idle_timeout(),
            ));

            let protocol: Arc<dyn ClusterProtocol> =
                match config.generation.to_ascii_lowercase().as_str() {
                    "modern" => Arc::new(ModernProtocol::new(
                        config.alias.clone(),
                        config.bootstrap.clone(),
                        pool,
                        retry.clone(),
                        query.request_timeout(),
                    )),
                    "legacy" => Arc::new(LegacyProtocol::new(
                        config.alias.clone(),
                        config.bootstrap.clone(),
                        pool,
                        retry.clone(),
                        query.request_timeout(),
                    )),
                    _ => {
                        return Err(ClusterError::UnsupportedProtocol {
                            cluster: config.alias.clone(),
                            generation: config.generation.clone(),
                        })
                    }
                };

            let resolver = Arc::new(MetadataResolver::new(
                config.alias.clone(),
                protocol.clone(),
                query.metadata_ttl(),
            ));

            info!(
                cluster = %config.alias,
                generation = %config.generation,
                endpoints = config.bootstrap.len(),
                "registered cluster"
            );
            clusters.insert(
                config.alias.clone(),
                Arc::new(ClusterHandle {
                    config,
                    protocol,
                    resolver,
                }),
            );
        }

        Ok(Self { clusters })
    }

    pub fn empty() -> Self {
        Self {
            clusters: HashMap::new(),
        }
    }

    /// Registers a cluster with an externally built protocol. Used by
    /// embeddings (and tests) that bring their own transport.
    pub fn register(
        &mut self,
        config: ClusterConfig,
        protocol: Arc<dyn ClusterProtocol>,
        metadata_ttl: std::time::Duration,
    ) {
        let resolver = Arc::new(MetadataResolver::new(
            config.alias.clone(),
            protocol.clone(),
            metadata_ttl,
        ));
        self.clusters.insert(
            config.alias.clone(),
            Arc::new(ClusterHandle {
                config,
                protocol,
                resolver,
            }),
        );
    }

    pub fn get(&self, alias: &str) -> Result<Arc<ClusterHandle>> {
        self.clusters
            .get(alias)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownCluster(alias.to_string()))
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.clusters.keys().cloned().collect();
        aliases.sort();
        aliases
    }
}
