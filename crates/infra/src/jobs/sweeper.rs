//! Deadline sweeper: fails request/response invocations nobody answered.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use ets_core::EtsError;
use ets_invocations::CompleteInvocationInput;
use ets_observability::{MetricsRegistry, metrics};

use crate::publisher::EventPublisher;
use crate::service::{INVOCATION_COMPLETED_METRIC, INVOCATION_DURATION_METRIC};
use crate::status::InvocationStatusTracker;
use crate::store::InvocationRepo;

pub const EXPIRED_METRIC: &str = "ets_invocation_expired";

/// Reason carried by the failure event of an expired invocation.
pub const TIMED_OUT: &str = "invocation timed out";

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub poll_interval: Duration,
    /// Upper bound on invocations expired per pass.
    pub batch_size: usize,
    pub name: String,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 2000,
            name: "ets-deadline-sweeper".to_string(),
        }
    }
}

impl SweeperConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweeperStats {
    pub passes: u64,
    pub expired: u64,
    pub purged_statuses: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

/// Handle to a running sweeper thread.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for the current pass to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

pub struct DeadlineSweeper {
    invocations: Arc<dyn InvocationRepo>,
    publisher: Arc<dyn EventPublisher>,
    tracker: Arc<InvocationStatusTracker>,
    batch_size: usize,
    metrics: &'static MetricsRegistry,
}

impl core::fmt::Debug for DeadlineSweeper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeadlineSweeper")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl DeadlineSweeper {
    pub fn new(
        invocations: Arc<dyn InvocationRepo>,
        publisher: Arc<dyn EventPublisher>,
        tracker: Arc<InvocationStatusTracker>,
    ) -> Self {
        Self {
            invocations,
            publisher,
            tracker,
            batch_size: SweeperConfig::default().batch_size,
            metrics: metrics::global(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_metrics(mut self, metrics: &'static MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    /// Expire one page of invocations whose deadline is before `now`,
    /// earliest first. Returns how many were expired.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, EtsError> {
        let overdue = self
            .invocations
            .find_by_deadline_before(now, self.batch_size)?;

        let mut expired = 0;
        for invocation in &overdue {
            // A callback that already removed the invocation owns the outcome.
            if !self.invocations.delete(invocation.id)? {
                debug!(invocation_id = %invocation.id, "overdue invocation already completed");
                continue;
            }

            let event = invocation
                .failed_event(TIMED_OUT)
                .into_envelope(invocation.tenant_id.clone(), None, BTreeMap::new());
            self.publisher.publish(event)?;

            // The status is failed here as well as by the ack consumer; the
            // second completion is a no-op.
            self.tracker.complete(
                &invocation.tenant_id,
                invocation.id,
                CompleteInvocationInput::failed(TIMED_OUT),
            )?;
            expired += 1;

            let labels = [
                ("trigger_id", invocation.trigger_id.as_str()),
                ("outcome", "failed"),
            ];
            self.metrics.increment(INVOCATION_COMPLETED_METRIC, &labels);
            self.metrics
                .record_duration(INVOCATION_DURATION_METRIC, &labels, invocation.elapsed(now));
            self.metrics
                .increment(EXPIRED_METRIC, &[("trigger_id", invocation.trigger_id.as_str())]);
            error!(
                invocation_id = %invocation.id,
                tenant_id = %invocation.tenant_id,
                trigger_id = %invocation.trigger_id,
                deadline = %invocation.deadline,
                "invocation timed out"
            );
        }

        if expired > 0 {
            info!(expired, "deadline sweep expired invocations");
        }
        Ok(expired)
    }

    /// Run [`Self::sweep_once`] and the status TTL purge every
    /// `poll_interval` on a background thread.
    pub fn spawn(self, config: SweeperConfig) -> io::Result<SweeperHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(SweeperStats::default()));
        let stats_clone = stats.clone();

        let join = thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || sweeper_loop(self, config, shutdown_rx, stats_clone))?;

        Ok(SweeperHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }
}

fn sweeper_loop(
    sweeper: DeadlineSweeper,
    config: SweeperConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<SweeperStats>>,
) {
    let started = Instant::now();
    info!(sweeper = %config.name, interval_secs = config.poll_interval.as_secs(), "deadline sweeper started");

    loop {
        match shutdown_rx.recv_timeout(config.poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let now = Utc::now();
        let swept = sweeper.sweep_once(now);
        let purged = sweeper.tracker.purge_expired(now);

        let Ok(mut s) = stats.lock() else {
            warn!(sweeper = %config.name, "sweeper stats lock poisoned");
            continue;
        };
        s.passes += 1;
        s.uptime_secs = started.elapsed().as_secs();
        match swept {
            Ok(n) => s.expired += n as u64,
            Err(err) => {
                s.errors += 1;
                warn!(sweeper = %config.name, error = %err, "deadline sweep failed");
            }
        }
        match purged {
            Ok(n) => s.purged_statuses += n as u64,
            Err(err) => {
                s.errors += 1;
                warn!(sweeper = %config.name, error = %err, "status purge failed");
            }
        }
    }

    debug!(sweeper = %config.name, "deadline sweeper stopped");
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use serde_json::Map;

    use ets_core::{InvocationId, Secret, SubscriptionId, TenantId, TriggerId};
    use ets_events::{BusSubscription, EventBus, InMemoryEventBus};
    use ets_invocations::{EtsEvent, EtsEventEnvelope, Invocation, InvocationType};

    use super::*;
    use crate::store::{InMemoryInvocationRepo, InMemoryStatusStore};

    fn test_tenant() -> TenantId {
        TenantId::new("dev:acme").unwrap()
    }

    fn invocation(deadline: DateTime<Utc>) -> Invocation {
        Invocation {
            id: InvocationId::new(),
            created: deadline - ChronoDuration::minutes(5),
            tenant_id: test_tenant(),
            trigger_id: TriggerId::new("idn:access-request-pre-approval").unwrap(),
            subscription_id: SubscriptionId::new(),
            context: Map::new(),
            deadline,
            secret: Secret::new("hash"),
            invocation_type: InvocationType::RealTime,
        }
    }

    struct Fixture {
        sweeper: DeadlineSweeper,
        repo: Arc<InMemoryInvocationRepo>,
        events: BusSubscription<EtsEventEnvelope>,
    }

    fn fixture(batch_size: usize) -> Fixture {
        let metrics: &'static MetricsRegistry = Box::leak(Box::default());
        let repo = Arc::new(InMemoryInvocationRepo::new());
        let bus: Arc<InMemoryEventBus<EtsEventEnvelope>> = Arc::new(InMemoryEventBus::new());
        let events = bus.subscribe();
        let tracker = Arc::new(
            InvocationStatusTracker::new(Arc::new(InMemoryStatusStore::new())).with_metrics(metrics),
        );
        let sweeper = DeadlineSweeper::new(repo.clone(), bus, tracker)
            .with_batch_size(batch_size)
            .with_metrics(metrics);
        Fixture { sweeper, repo, events }
    }

    #[test]
    fn expires_exactly_the_overdue_invocation() {
        let f = fixture(2000);
        let now = Utc::now();
        let overdue = invocation(now - ChronoDuration::seconds(1));
        let pending = invocation(now + ChronoDuration::minutes(5));
        f.repo.save(overdue.clone()).unwrap();
        f.repo.save(pending.clone()).unwrap();

        assert_eq!(f.sweeper.sweep_once(now).unwrap(), 1);

        assert!(f.repo.find_by_id(overdue.id).unwrap().is_none());
        assert!(f.repo.find_by_id(pending.id).unwrap().is_some());
        let events = f.events.drain();
        assert_eq!(events.len(), 1);
        match events[0].payload() {
            EtsEvent::InvocationFailed(e) => {
                assert_eq!(e.invocation_id, overdue.id);
                assert_eq!(e.reason, TIMED_OUT);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(f.sweeper.metrics.counter_total(EXPIRED_METRIC), 1);

        assert_eq!(f.sweeper.sweep_once(now).unwrap(), 0);
    }

    #[test]
    fn pages_are_bounded_and_earliest_first() {
        let f = fixture(2);
        let now = Utc::now();
        let oldest = invocation(now - ChronoDuration::minutes(3));
        let older = invocation(now - ChronoDuration::minutes(2));
        let old = invocation(now - ChronoDuration::minutes(1));
        for inv in [&old, &oldest, &older] {
            f.repo.save(inv.clone()).unwrap();
        }

        assert_eq!(f.sweeper.sweep_once(now).unwrap(), 2);
        assert!(f.repo.find_by_id(old.id).unwrap().is_some());
        assert_eq!(f.sweeper.sweep_once(now).unwrap(), 1);
        assert!(f.repo.is_empty());
    }

    /// Lists overdue invocations, then lets a callback remove them before
    /// the sweeper gets to delete.
    struct CompletedMeanwhile(Arc<InMemoryInvocationRepo>);

    impl InvocationRepo for CompletedMeanwhile {
        fn save(&self, invocation: Invocation) -> Result<(), crate::store::StoreError> {
            self.0.save(invocation)
        }

        fn find_by_id(&self, id: InvocationId) -> Result<Option<Invocation>, crate::store::StoreError> {
            self.0.find_by_id(id)
        }

        fn delete(&self, id: InvocationId) -> Result<bool, crate::store::StoreError> {
            self.0.delete(id)
        }

        fn find_by_deadline_before(
            &self,
            instant: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<Invocation>, crate::store::StoreError> {
            let listed = self.0.find_by_deadline_before(instant, limit)?;
            for invocation in &listed {
                self.0.delete(invocation.id)?;
            }
            Ok(listed)
        }

        fn find_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Invocation>, crate::store::StoreError> {
            self.0.find_by_tenant(tenant_id)
        }
    }

    #[test]
    fn invocation_completed_after_listing_is_not_expired() {
        let metrics: &'static MetricsRegistry = Box::leak(Box::default());
        let inner = Arc::new(InMemoryInvocationRepo::new());
        let bus: Arc<InMemoryEventBus<EtsEventEnvelope>> = Arc::new(InMemoryEventBus::new());
        let events = bus.subscribe();
        let tracker = Arc::new(InvocationStatusTracker::new(Arc::new(InMemoryStatusStore::new())));
        let sweeper = DeadlineSweeper::new(Arc::new(CompletedMeanwhile(inner.clone())), bus, tracker)
            .with_metrics(metrics);

        let now = Utc::now();
        inner.save(invocation(now - ChronoDuration::seconds(1))).unwrap();

        assert_eq!(sweeper.sweep_once(now).unwrap(), 0);
        assert!(events.drain().is_empty());
        assert_eq!(metrics.counter_total(EXPIRED_METRIC), 0);
    }

    #[test]
    fn spawned_sweeper_runs_and_shuts_down() {
        let f = fixture(2000);
        f.repo
            .save(invocation(Utc::now() - ChronoDuration::seconds(1)))
            .unwrap();

        let handle = f
            .sweeper
            .spawn(SweeperConfig::default().with_poll_interval(Duration::from_millis(10)))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().expired == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.stats().expired, 1);
        handle.shutdown();
        assert!(f.repo.is_empty());
    }
}
