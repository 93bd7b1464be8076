//! Background refresh loop.
//!
//! ```text
//!   Idle ──timer──▶ Scanning ──all networks joined──▶ Idle
//!     │
//!     └──cancelled──▶ Terminated
//! ```
//!
//! The first round starts immediately. Cancellation is only observed while
//! Idle, so a round that has started always drains and publishes.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::chain_manager::ChainManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    Terminated,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Scanning,
            _ => Self::Terminated,
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

pub struct RefreshScheduler {
    manager: Arc<ChainManager>,
    interval: Duration,
    state: AtomicU8,
    rounds: AtomicU64,
}

impl RefreshScheduler {
    pub fn new(manager: Arc<ChainManager>, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            manager,
            interval,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            rounds: AtomicU64::new(0),
        })
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of fully completed rounds.
    pub fn rounds_completed(&self) -> u64 {
        self.rounds.load(Ordering::Acquire)
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run the loop on its own task until `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run(shutdown).await })
    }

    /// Run the loop on the current task until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            networks = self.manager.network_ids().len(),
            "refresh scheduler started"
        );
        // TODO: add optional jitter to the wait between rounds so several
        // proxies sharing upstreams do not probe them in lockstep.
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            self.set_state(SchedulerState::Scanning);
            self.run_round().await;
            self.set_state(SchedulerState::Idle);
            self.rounds.fetch_add(1, Ordering::AcqRel);

            wait = self.interval;
        }

        self.set_state(SchedulerState::Terminated);
        info!(rounds = self.rounds_completed(), "refresh scheduler stopped");
    }

    /// One refresh task per network, all in parallel; returns once every
    /// task has finished.
    async fn run_round(&self) {
        let mut tasks = JoinSet::new();
        for network_id in self.manager.network_ids() {
            let manager = Arc::clone(&self.manager);
            tasks.spawn(async move { manager.refresh_ranking(network_id).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(ranking)) => debug!(
                    network_id = %ranking.network_id(),
                    round = ranking.round(),
                    "network refreshed"
                ),
                // Only reachable for a network that vanished from the manager.
                Ok(Err(e)) => error!(error = %e, "refresh rejected"),
                Err(e) => error!(error = %e, "refresh task panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::prober::LatencyProber;
    use crate::registry::EndpointRegistry;
    use crate::types::{Endpoint, NetworkId};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Records when each probe started; sleeps `delay` per probe.
    struct SlowProber {
        delay: Duration,
        started: Mutex<Vec<(String, Instant)>>,
    }

    #[async_trait]
    impl LatencyProber for SlowProber {
        async fn probe(&self, endpoint: &Endpoint) -> Result<Duration, TransportError> {
            self.started
                .lock()
                .unwrap()
                .push((endpoint.url.clone(), Instant::now()));
            tokio::time::sleep(self.delay).await;
            if endpoint.url.contains("down") {
                Err(TransportError::ConnectionRefused("refused".into()))
            } else {
                Ok(self.delay)
            }
        }
    }

    fn setup(
        delay: Duration,
        interval: Duration,
    ) -> (Arc<RefreshScheduler>, Arc<ChainManager>, Arc<SlowProber>) {
        let mut registry = EndpointRegistry::default();
        registry.insert(NetworkId(1), ["http://one", "http://down-one"]).unwrap();
        registry.insert(NetworkId(2), ["http://two"]).unwrap();
        registry.insert(NetworkId(3), ["http://three"]).unwrap();

        let prober = Arc::new(SlowProber {
            delay,
            started: Mutex::new(Vec::new()),
        });
        let manager = Arc::new(ChainManager::new(
            &registry,
            prober.clone(),
            Duration::from_secs(5),
        ));
        let scheduler = RefreshScheduler::new(manager.clone(), interval);
        (scheduler, manager, prober)
    }

    /// Panics for every endpoint whose url contains "bad".
    struct PanickingProber;

    #[async_trait]
    impl LatencyProber for PanickingProber {
        async fn probe(&self, endpoint: &Endpoint) -> Result<Duration, TransportError> {
            if endpoint.url.contains("bad") {
                panic!("prober blew up on {}", endpoint.url);
            }
            Ok(Duration::from_millis(1))
        }
    }

    #[tokio::test]
    async fn first_round_runs_immediately_and_probe_failures_are_absorbed() {
        let (scheduler, manager, _) = setup(Duration::from_millis(5), Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.rounds_completed() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first round should not wait for the interval");

        assert_eq!(scheduler.state(), SchedulerState::Idle);
        for id in [1, 2, 3] {
            assert_eq!(manager.ranking(NetworkId(id)).unwrap().round(), 1);
        }
        let one = manager.ranking(NetworkId(1)).unwrap();
        assert_eq!(one.healthy_count(), 1);

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        assert_eq!(scheduler.rounds_completed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn networks_are_probed_in_parallel() {
        let delay = Duration::from_millis(200);
        let (scheduler, _, prober) = setup(delay, Duration::from_secs(3600));
        let shutdown = CancellationToken::new();

        let start = Instant::now();
        let handle = scheduler.spawn(shutdown.clone());
        while scheduler.rounds_completed() < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let elapsed = start.elapsed();
        shutdown.cancel();
        handle.await.unwrap();

        // Serial probing of 4 endpoints would take at least 800ms.
        assert!(elapsed < delay * 3, "round took {elapsed:?}");
        assert_eq!(prober.started.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn repeats_on_the_interval() {
        let (scheduler, manager, _) = setup(Duration::ZERO, Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.rounds_completed() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        assert!(manager.ranking(NetworkId(2)).unwrap().round() >= 3);
    }

    #[tokio::test]
    async fn cancellation_drains_the_round_in_progress() {
        let (scheduler, manager, _) = setup(Duration::from_millis(150), Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.state() != SchedulerState::Scanning {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        assert_eq!(scheduler.rounds_completed(), 1);
        for id in [1, 2, 3] {
            assert_eq!(manager.ranking(NetworkId(id)).unwrap().round(), 1);
        }
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_no_round() {
        let (scheduler, _, prober) = setup(Duration::ZERO, Duration::from_secs(1));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        scheduler.run(shutdown).await;

        assert_eq!(scheduler.rounds_completed(), 0);
        assert!(prober.started.lock().unwrap().is_empty());
        assert_eq!(scheduler.state(), SchedulerState::Terminated);
    }

    #[tokio::test]
    async fn panicking_refresh_keeps_previous_snapshot_and_rounds_continue() {
        let mut registry = EndpointRegistry::default();
        registry.insert(NetworkId(1), ["http://bad-a", "http://bad-b"]).unwrap();
        registry.insert(NetworkId(2), ["http://good"]).unwrap();
        let manager = Arc::new(ChainManager::new(
            &registry,
            Arc::new(PanickingProber),
            Duration::from_secs(5),
        ));
        let scheduler = RefreshScheduler::new(manager.clone(), Duration::from_millis(20));
        let shutdown = CancellationToken::new();
        let handle = scheduler.spawn(shutdown.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.rounds_completed() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("rounds should keep completing after a refresh task panics");
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(scheduler.state(), SchedulerState::Terminated);
        assert!(manager.ranking(NetworkId(2)).unwrap().round() >= 2);

        let stuck = manager.ranking(NetworkId(1)).unwrap();
        assert_eq!(stuck.round(), 0);
        let urls: Vec<&str> = stuck.endpoints().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, ["http://bad-a", "http://bad-b"]);
    }
}
