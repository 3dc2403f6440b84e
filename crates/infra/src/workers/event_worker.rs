use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use ets_core::TenantId;
use ets_events::{BusSubscription, EventBus, EventHandler, TenantScoped};

const TICK: Duration = Duration::from_millis(250);

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub handled: u64,
    pub failed: u64,
    /// Messages for other tenants.
    pub skipped: u64,
}

/// Bus consumer loop.
///
/// - Subscribes to an event bus at spawn time
/// - Hands every message to an idempotent handler; failures are logged
/// - Calls an idle hook on every quiet tick
/// - Optional tenant pinning
#[derive(Debug)]
pub struct EventWorker;

impl EventWorker {
    pub fn spawn<M, B, H>(name: &str, bus: &B, handler: H) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M> + ?Sized,
        H: EventHandler<M> + 'static,
    {
        Self::spawn_with_idle(name, bus, handler, || {})
    }

    /// Like [`Self::spawn`], with `idle` run whenever no message arrived
    /// within a tick.
    pub fn spawn_with_idle<M, B, H, I>(name: &str, bus: &B, handler: H, idle: I) -> io::Result<WorkerHandle>
    where
        M: Send + 'static,
        B: EventBus<M> + ?Sized,
        H: EventHandler<M> + 'static,
        I: FnMut() + Send + 'static,
    {
        spawn_loop(name, bus.subscribe(), |_: &M| true, handler, idle)
    }

    /// Messages for tenants other than `tenant_id` are counted and dropped.
    pub fn spawn_for_tenant<M, B, H>(
        name: &str,
        bus: &B,
        tenant_id: TenantId,
        handler: H,
    ) -> io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M> + ?Sized,
        H: EventHandler<M> + 'static,
    {
        spawn_loop(
            name,
            bus.subscribe(),
            move |m: &M| m.tenant_id() == &tenant_id,
            handler,
            || {},
        )
    }
}

fn spawn_loop<M, F, H, I>(
    name: &str,
    sub: BusSubscription<M>,
    accept: F,
    handler: H,
    mut idle: I,
) -> io::Result<WorkerHandle>
where
    M: Send + 'static,
    F: Fn(&M) -> bool + Send + 'static,
    H: EventHandler<M> + 'static,
    I: FnMut() + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let stats = Arc::new(Mutex::new(WorkerStats::default()));
    let stats_clone = stats.clone();
    let worker = name.to_string();

    let join = thread::Builder::new().name(worker.clone()).spawn(move || {
        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match sub.recv_timeout(TICK) {
                Ok(msg) => {
                    let accepted = accept(&msg);
                    let result = if accepted { handler.handle(&msg) } else { Ok(()) };
                    if let Err(err) = &result {
                        warn!(worker = %worker, error = ?err, "event handler failed");
                    }
                    if let Ok(mut s) = stats_clone.lock() {
                        match (accepted, result.is_ok()) {
                            (false, _) => s.skipped += 1,
                            (true, true) => s.handled += 1,
                            (true, false) => s.failed += 1,
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => idle(),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!(worker = %worker, "event worker stopped");
    })?;

    Ok(WorkerHandle {
        shutdown: shutdown_tx,
        join: Some(join),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use ets_events::{EventEnvelope, InMemoryEventBus};

    use super::*;

    #[derive(Default)]
    struct Counting {
        seen: AtomicUsize,
    }

    impl EventHandler<EventEnvelope<u32>> for Counting {
        type Error = String;

        fn handle(&self, message: &EventEnvelope<u32>) -> Result<(), Self::Error> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if *message.payload() == 0 {
                return Err("zero".into());
            }
            Ok(())
        }
    }

    fn envelope(tenant: &str, n: u32) -> EventEnvelope<u32> {
        EventEnvelope::new(TenantId::new(tenant).unwrap(), "t", "e", n)
    }

    fn wait_for(handle: &WorkerHandle, total: u64) -> WorkerStats {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let s = handle.stats();
            if s.handled + s.failed + s.skipped >= total || Instant::now() > deadline {
                return s;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn handles_messages_and_counts_failures() {
        let bus: InMemoryEventBus<EventEnvelope<u32>> = InMemoryEventBus::new();
        let handler = Arc::new(Counting::default());
        let handle = EventWorker::spawn("test-worker", &bus, handler.clone()).unwrap();

        bus.publish(envelope("dev:acme", 1)).unwrap();
        bus.publish(envelope("dev:acme", 0)).unwrap();

        let stats = wait_for(&handle, 2);
        assert_eq!(stats, WorkerStats { handled: 1, failed: 1, skipped: 0 });
        handle.shutdown();
        assert_eq!(handler.seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tenant_pinned_worker_skips_other_tenants() {
        let bus: InMemoryEventBus<EventEnvelope<u32>> = InMemoryEventBus::new();
        let handler = Arc::new(Counting::default());
        let handle = EventWorker::spawn_for_tenant(
            "pinned-worker",
            &bus,
            TenantId::new("dev:acme").unwrap(),
            handler.clone(),
        )
        .unwrap();

        bus.publish(envelope("dev:other", 1)).unwrap();
        bus.publish(envelope("dev:acme", 2)).unwrap();

        let stats = wait_for(&handle, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.handled, 1);
        handle.shutdown();
    }

    #[test]
    fn idle_hook_runs_without_traffic() {
        let bus: InMemoryEventBus<EventEnvelope<u32>> = InMemoryEventBus::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let handle = EventWorker::spawn_with_idle("idle-worker", &bus, Arc::new(Counting::default()), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        handle.shutdown();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}
