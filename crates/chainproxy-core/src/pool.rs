//! Reusable forwarder instances.
//!
//! The pool owns nothing per-request: an acquired forwarder is handed back
//! on drop, reset, and made available to the next request. When the pool is
//! empty a fresh forwarder is built; when it is full the returned one is
//! dropped.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::chain_manager::ChainManager;
use crate::error::ProxyError;
use crate::forwarder::Forwarder;
use crate::transport::{UpstreamResponse, UpstreamTransport};
use crate::types::NetworkId;

/// Counters exposed on the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub idle: usize,
}

pub struct ForwarderPool {
    manager: Arc<ChainManager>,
    transport: Arc<dyn UpstreamTransport>,
    attempt_timeout: Duration,
    max_idle: usize,
    idle: Mutex<Vec<Forwarder>>,
    created: AtomicU64,
    reused: AtomicU64,
}

impl ForwarderPool {
    pub fn new(
        manager: Arc<ChainManager>,
        transport: Arc<dyn UpstreamTransport>,
        attempt_timeout: Duration,
        max_idle: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            transport,
            attempt_timeout,
            max_idle,
            idle: Mutex::new(Vec::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        })
    }

    /// Take an idle forwarder, or build one if none is idle.
    ///
    /// The free-list lock is held only for the pop, never across a request.
    pub fn acquire(self: &Arc<Self>) -> PooledForwarder {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        let forwarder = match idle {
            Some(f) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                f
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Forwarder::new(
                    Arc::clone(&self.manager),
                    Arc::clone(&self.transport),
                    self.attempt_timeout,
                )
            }
        };
        PooledForwarder {
            forwarder: Some(forwarder),
            pool: Arc::clone(self),
        }
    }

    /// Acquire, forward, and release in one call.
    pub async fn forward(
        self: &Arc<Self>,
        network_id: NetworkId,
        payload: Bytes,
    ) -> Result<UpstreamResponse, ProxyError> {
        self.acquire().forward(network_id, payload).await
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            idle: self.idle_count(),
        }
    }

    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, mut forwarder: Forwarder) {
        forwarder.reset();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(forwarder);
        }
    }
}

impl std::fmt::Debug for ForwarderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderPool")
            .field("max_idle", &self.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}

/// A forwarder on loan from a [`ForwarderPool`]; returned when dropped,
/// including when the request future is cancelled mid-flight.
pub struct PooledForwarder {
    forwarder: Option<Forwarder>,
    pool: Arc<ForwarderPool>,
}

impl Deref for PooledForwarder {
    type Target = Forwarder;

    fn deref(&self) -> &Forwarder {
        self.forwarder.as_ref().expect("forwarder present until drop")
    }
}

impl DerefMut for PooledForwarder {
    fn deref_mut(&mut self) -> &mut Forwarder {
        self.forwarder.as_mut().expect("forwarder present until drop")
    }
}

impl Drop for PooledForwarder {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            self.pool.release(forwarder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forwarder::tests::{ranked_manager, Behavior, MockUpstreams};

    const OK_BODY: &str = r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#;

    fn stats(created: u64, reused: u64, idle: usize) -> PoolStats {
        PoolStats {
            created,
            reused,
            idle,
        }
    }

    async fn pool_with(
        behaviors: &[(&str, Behavior)],
        max_idle: usize,
    ) -> (Arc<ForwarderPool>, Arc<MockUpstreams>) {
        let urls: Vec<&str> = behaviors.iter().map(|(u, _)| *u).collect();
        let latencies: Vec<(&str, u64)> = urls
            .iter()
            .enumerate()
            .map(|(i, u)| (*u, i as u64 + 1))
            .collect();
        let manager = ranked_manager(&urls, &latencies).await;
        let upstreams = MockUpstreams::new(behaviors);
        let pool = ForwarderPool::new(
            manager,
            upstreams.clone(),
            Duration::from_millis(100),
            max_idle,
        );
        (pool, upstreams)
    }

    #[tokio::test]
    async fn empty_pool_builds_then_reuses() {
        let (pool, _) = pool_with(&[("http://a", Behavior::Respond(200, OK_BODY))], 4).await;

        pool.forward(NetworkId(1), Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(pool.stats(), stats(1, 0, 1));

        pool.forward(NetworkId(1), Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(pool.stats(), stats(1, 1, 1));
    }

    #[tokio::test]
    async fn concurrent_loans_get_distinct_forwarders() {
        let (pool, _) = pool_with(&[("http://a", Behavior::Respond(200, OK_BODY))], 4).await;
        let first = pool.acquire();
        let second = pool.acquire();
        assert_eq!(pool.stats().created, 2);
        drop(first);
        drop(second);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn surplus_forwarders_are_discarded() {
        let (pool, _) = pool_with(&[("http://a", Behavior::Respond(200, OK_BODY))], 1).await;
        let loans: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        drop(loans);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_request_returns_a_clean_forwarder() {
        let (pool, upstreams) = pool_with(
            &[("http://a", Behavior::Refuse), ("http://b", Behavior::Hang)],
            4,
        )
        .await;

        // Give up while the second endpoint hangs: one failure is recorded
        // and the future is dropped mid-walk.
        let pending = pool.forward(NetworkId(1), Bytes::from_static(b"{}"));
        assert!(tokio::time::timeout(Duration::from_millis(30), pending).await.is_err());
        assert_eq!(upstreams.attempted_urls(), ["http://a", "http://b"]);
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.acquire();
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(reused.pending_failures(), 0);
    }

    #[tokio::test]
    async fn exhaustion_is_not_carried_into_the_next_request() {
        let (pool, _) = pool_with(&[("http://a", Behavior::Refuse)], 4).await;

        let err = pool
            .forward(NetworkId(1), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::AllEndpointsExhausted { ref failures, .. } if failures.len() == 1
        ));

        let err = pool
            .forward(NetworkId(1), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProxyError::AllEndpointsExhausted { ref failures, .. } if failures.len() == 1
        ));
        assert_eq!(pool.stats().reused, 1);
    }

    #[tokio::test]
    async fn poisoned_free_list_keeps_serving() {
        let (pool, upstreams) =
            pool_with(&[("http://a", Behavior::Respond(200, OK_BODY))], 4).await;
        drop(pool.acquire());
        assert_eq!(pool.idle_count(), 1);

        let holder = Arc::clone(&pool);
        let crashed = std::thread::spawn(move || {
            let _guard = holder.idle.lock().unwrap();
            panic!("crashed while holding the free list");
        })
        .join();
        assert!(crashed.is_err());
        assert!(pool.idle.is_poisoned());

        let loan = pool.acquire();
        assert_eq!(pool.stats(), stats(1, 1, 0));
        drop(loan);
        assert_eq!(pool.idle_count(), 1);

        let response = pool
            .forward(NetworkId(1), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(upstreams.attempted_urls(), ["http://a"]);
        assert_eq!(pool.stats(), stats(1, 2, 1));
    }
}
