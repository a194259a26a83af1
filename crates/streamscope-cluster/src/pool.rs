//! Broker connection pool.
//!
//! One pool per cluster, shared by the resolver and every partition scan.
//! Connections are keyed by broker address and reused across requests; each
//! address has a bounded connection count enforced by a semaphore, so pool
//! exhaustion makes callers wait rather than fail. A checked-out connection
//! returns to the pool on drop unless a transport error poisoned it or a
//! round trip was cancelled with the response unread; either way the broker
//! slot is released promptly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, warn};

use crate::error::{ClusterError, Result};
use crate::wire::{read_frame, write_frame, Request, Response};

struct IdleConn {
    stream: TcpStream,
    last_used: Instant,
}

struct Endpoint {
    limit: Arc<Semaphore>,
    idle: StdMutex<Vec<IdleConn>>,
}

/// Pool of framed TCP connections to a cluster's brokers.
pub struct BrokerPool {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    max_per_broker: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
}

impl BrokerPool {
    pub fn new(max_per_broker: usize, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            max_per_broker: max_per_broker.max(1),
            connect_timeout,
            idle_timeout,
        }
    }

    async fn endpoint(&self, addr: &str) -> Arc<Endpoint> {
        {
            let endpoints = self.endpoints.read().await;
            if let Some(endpoint) = endpoints.get(addr) {
                return endpoint.clone();
            }
        }
        let mut endpoints = self.endpoints.write().await;
        endpoints
            .entry(addr.to_string())
            .or_insert_with(|| {
                Arc::new(Endpoint {
                    limit: Arc::new(Semaphore::new(self.max_per_broker)),
                    idle: StdMutex::new(Vec::new()),
                })
            })
            .clone()
    }

    /// Check out a connection to `addr`, reusing an idle one when possible.
    ///
    /// Waits if all connections to the broker are in use; the caller's
    /// deadline bounds the wait.
    pub async fn checkout(&self, addr: &str) -> Result<PooledConn> {
        let endpoint = self.endpoint(addr).await;
        let permit = endpoint
            .limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ClusterError::Protocol {
                addr: addr.to_string(),
                message: "connection pool closed".to_string(),
            })?;

        // Reuse the most recently used idle connection; drop stale ones.
        let reused = {
            let mut idle = endpoint
                .idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            loop {
                match idle.pop() {
                    Some(conn) if conn.last_used.elapsed() < self.idle_timeout => {
                        break Some(conn.stream)
                    }
                    Some(_) => continue, // stale, closed on drop
                    None => break None,
                }
            }
        };

        let stream = match reused {
            Some(stream) => {
                debug!(addr, "reusing pooled connection");
                stream
            }
            None => self.connect(addr).await?,
        };

        Ok(PooledConn {
            addr: addr.to_string(),
            stream: Some(stream),
            in_flight: false,
            endpoint,
            _permit: permit,
        })
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream> {
        debug!(addr, timeout_ms = self.connect_timeout.as_millis() as u64, "opening connection");
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ClusterError::Transport {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(ClusterError::ConnectTimeout {
                addr: addr.to_string(),
            }),
        }
    }
}

/// A connection checked out of the pool. Returned on drop unless a round
/// trip failed or is still in flight.
pub struct PooledConn {
    addr: String,
    stream: Option<TcpStream>,
    in_flight: bool,
    endpoint: Arc<Endpoint>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConn {
    /// One request/response round trip. A transport failure poisons the
    /// connection so it is not returned to the pool.
    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        let addr = self.addr.clone();
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => {
                return Err(ClusterError::Protocol {
                    addr,
                    message: "connection already failed".to_string(),
                })
            }
        };

        // Cleared only when the response has been fully read; a future
        // dropped at either await leaves the flag set so the connection is
        // closed instead of handing the unread response to the next caller.
        self.in_flight = true;
        let result = async {
            write_frame(stream, &addr, request).await?;
            read_frame::<_, Response>(stream, &addr).await
        }
        .await;

        match &result {
            Ok(_) => self.in_flight = false,
            Err(err) => {
                warn!(addr = %self.addr, error = %err, "dropping poisoned connection");
                self.stream = None;
            }
        }
        result
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if self.in_flight {
            // Cancelled mid round trip: the stream may carry a stale
            // response, so it must not go back in the pool.
            return;
        }
        if let Some(stream) = self.stream.take() {
            let mut idle = self
                .endpoint
                .idle
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            idle.push(IdleConn {
                stream,
                last_used: Instant::now(),
            });
        }
        // permit drops last, freeing the slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn stub_broker() -> (String, Arc<AtomicUsize>) {
        stub_broker_with_delay(Duration::ZERO).await
    }

    /// Spawns a broker stub answering each request with an empty response of
    /// the matching kind, after `delay`. Returns its address and a counter
    /// of accepted connections.
    async fn stub_broker_with_delay(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    while let Ok(request) = read_frame::<_, Request>(&mut socket, "stub").await {
                        tokio::time::sleep(delay).await;
                        let response = match request {
                            Request::Metadata => Response::Metadata {
                                brokers: vec![],
                                topics: vec![],
                            },
                            Request::BrokerRegistry => Response::BrokerRegistry { brokers: vec![] },
                            _ => Response::Fetch { records: vec![] },
                        };
                        if write_frame(&mut socket, "stub", &response).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });
        (addr, accepted)
    }

    #[tokio::test]
    async fn connections_are_reused_across_checkouts() {
        let (addr, accepted) = stub_broker().await;
        let pool = BrokerPool::new(4, Duration::from_secs(1), Duration::from_secs(60));

        for _ in 0..3 {
            let mut conn = pool.checkout(&addr).await.unwrap();
            let response = conn.request(&Request::Metadata).await.unwrap();
            assert!(matches!(response, Response::Metadata { .. }));
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn aborted_round_trip_closes_instead_of_repooling() {
        let (addr, accepted) = stub_broker_with_delay(Duration::from_millis(200)).await;
        let pool = Arc::new(BrokerPool::new(
            4,
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));

        let cancelled_pool = pool.clone();
        let cancelled_addr = addr.clone();
        let cancelled = tokio::spawn(async move {
            let mut conn = cancelled_pool.checkout(&cancelled_addr).await.unwrap();
            let _ = conn.request(&Request::Metadata).await;
        });
        // Let the request reach the wire, then tear the task down with the
        // response still pending.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancelled.abort();
        let _ = cancelled.await;

        // The next checkout must get a fresh connection, never the stale
        // metadata response left behind by the cancelled round trip.
        let mut conn = pool.checkout(&addr).await.unwrap();
        let response = conn.request(&Request::BrokerRegistry).await.unwrap();
        assert!(
            matches!(response, Response::BrokerRegistry { .. }),
            "stale response from a cancelled round trip: {response:?}"
        );
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn checkout_waits_at_the_connection_bound() {
        let (addr, _) = stub_broker().await;
        let pool = Arc::new(BrokerPool::new(
            1,
            Duration::from_secs(1),
            Duration::from_secs(60),
        ));

        let held = pool.checkout(&addr).await.unwrap();

        // Second checkout must block while the single slot is held.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), pool.checkout(&addr)).await;
        assert!(blocked.is_err());

        drop(held);
        let freed = tokio::time::timeout(Duration::from_millis(200), pool.checkout(&addr)).await;
        assert!(freed.is_ok());
    }

    #[tokio::test]
    async fn unreachable_address_times_out_or_errors() {
        // Reserved TEST-NET address, nothing listens there.
        let pool = BrokerPool::new(1, Duration::from_millis(100), Duration::from_secs(60));
        let result = pool.checkout("192.0.2.1:9092").await;
        assert!(matches!(
            result,
            Err(ClusterError::ConnectTimeout { .. }) | Err(ClusterError::Transport { .. })
        ));
    }
}
