//! Composition root: stores, buses, the trigger service and its background
//! workers, wired from [`EtsConfig`].

use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::info;

use ets_breaker::{BreakerTransition, CircuitBreakerRegistry};
use ets_core::{EtsError, SecretHasher};
use ets_events::{EventBus, InMemoryEventBus};
use ets_infra::EtsConfig;
use ets_infra::delivery::{Deliverer, HttpDeliverer};
use ets_infra::jobs::{DeadlineSweeper, SweeperHandle};
use ets_infra::service::TriggerService;
use ets_infra::status::InvocationStatusTracker;
use ets_infra::store::{InMemoryInvocationRepo, InMemoryStatusStore, InMemorySubscriptionStore};
use ets_infra::workers::{
    DomainEvent, DomainEventHandler, EventWorker, InvocationEventHandler, WorkerHandle, spawn_breaker_sync,
};
use ets_invocations::{EtsEventEnvelope, InvocationEngine};
use ets_observability::{MetricsRegistry, metrics};
use ets_triggers::{InMemoryFeatureStore, TriggerCatalog};

/// Catalog used when `ETS_TRIGGERS_PATH` is not set.
const DEFAULT_TRIGGERS: &str = include_str!("../../triggers.json");

#[cfg(feature = "redis")]
const EVENTS_CHANNEL: &str = "ets.events";
#[cfg(feature = "redis")]
const BREAKERS_CHANNEL: &str = "ets.breakers";

pub struct AppServices {
    pub service: Arc<TriggerService>,
    pub tracker: Arc<InvocationStatusTracker>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub metrics: &'static MetricsRegistry,
    domain_events: Arc<InMemoryEventBus<DomainEvent>>,
    background: Mutex<Option<Background>>,
}

struct Background {
    workers: Vec<WorkerHandle>,
    sweeper: SweeperHandle,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl AppServices {
    /// Hand a platform domain event to the trigger pipeline.
    pub fn publish_domain_event(&self, event: DomainEvent) -> Result<(), EtsError> {
        self.domain_events
            .publish(event)
            .map_err(|e| EtsError::store(format!("domain event publish failed: {e}")))
    }

    /// Stop the workers and the sweeper. Safe to call more than once.
    pub fn shutdown(&self) {
        let background = self.background.lock().ok().and_then(|mut b| b.take());
        if let Some(bg) = background {
            for worker in bg.workers {
                worker.shutdown();
            }
            bg.sweeper.shutdown();
            info!("background workers stopped");
        }
    }
}

/// Production wiring: HTTP delivery, Redis transport when configured.
///
/// Must run outside an async context; the blocking HTTP client owns its own
/// runtime.
pub fn build_services(config: &EtsConfig) -> anyhow::Result<AppServices> {
    let mut deliverer = HttpDeliverer::new(config.delivery_timeout).context("building http deliverer")?;
    if let Some(url) = &config.script_runner_url {
        deliverer = deliverer.with_script_runner(url.clone());
    }
    build_services_with(config, Arc::new(deliverer))
}

/// Same wiring with a caller-chosen deliverer.
pub fn build_services_with(config: &EtsConfig, deliverer: Arc<dyn Deliverer>) -> anyhow::Result<AppServices> {
    if let Some(url) = &config.redis_url {
        return wire_redis(config, deliverer, url);
    }
    wire_in_memory(config, deliverer)
}

fn wire_in_memory(config: &EtsConfig, deliverer: Arc<dyn Deliverer>) -> anyhow::Result<AppServices> {
    let events: Arc<InMemoryEventBus<EtsEventEnvelope>> = Arc::new(InMemoryEventBus::new());
    let transitions: Arc<InMemoryEventBus<BreakerTransition>> = Arc::new(InMemoryEventBus::new());
    wire(config, deliverer, events, transitions)
}

#[cfg(feature = "redis")]
fn wire_redis(config: &EtsConfig, deliverer: Arc<dyn Deliverer>, url: &str) -> anyhow::Result<AppServices> {
    use ets_infra::event_bus::RedisPubSubEventBus;

    let events: Arc<RedisPubSubEventBus<EtsEventEnvelope>> =
        Arc::new(RedisPubSubEventBus::new(url, EVENTS_CHANNEL).context("connecting event bus")?);
    let transitions: Arc<RedisPubSubEventBus<BreakerTransition>> =
        Arc::new(RedisPubSubEventBus::new(url, BREAKERS_CHANNEL).context("connecting breaker bus")?);
    info!(channel = EVENTS_CHANNEL, "using redis pub/sub transport");
    wire(config, deliverer, events, transitions)
}

#[cfg(not(feature = "redis"))]
fn wire_redis(config: &EtsConfig, deliverer: Arc<dyn Deliverer>, _url: &str) -> anyhow::Result<AppServices> {
    tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-memory buses");
    wire_in_memory(config, deliverer)
}

fn wire<E, T>(
    config: &EtsConfig,
    deliverer: Arc<dyn Deliverer>,
    events: Arc<E>,
    transitions: Arc<T>,
) -> anyhow::Result<AppServices>
where
    E: EventBus<EtsEventEnvelope> + 'static,
    T: EventBus<BreakerTransition> + 'static,
{
    let metrics = metrics::global();
    let features = Arc::new(InMemoryFeatureStore::all_enabled());
    let catalog = match &config.triggers_path {
        Some(path) => TriggerCatalog::from_path(path, features)
            .with_context(|| format!("loading triggers from {}", path.display()))?,
        None => TriggerCatalog::from_json_str(DEFAULT_TRIGGERS, features).context("loading built-in triggers")?,
    };
    info!(triggers = catalog.len(), "trigger catalog loaded");

    let mut registry = CircuitBreakerRegistry::new(config.breaker.clone(), transitions.clone()).with_metrics(metrics);
    if let Some(id) = &config.instance_id {
        registry = registry.with_instance_id(id.clone());
    }
    let breakers = Arc::new(registry);

    let invocations = Arc::new(InMemoryInvocationRepo::new());
    let service = Arc::new(
        TriggerService::new(
            Arc::new(catalog),
            Arc::new(InMemorySubscriptionStore::new()),
            invocations.clone(),
            events.clone(),
            deliverer,
            breakers.clone(),
        )
        .with_engine(InvocationEngine::default().with_max_deadline(config.max_deadline))
        .with_hasher(SecretHasher::new(config.secret_hash_key.clone()))
        .with_limits(config.limits)
        .with_callback_base_url(config.callback_base_url.clone())
        .with_partner_event_source_prefix(config.partner_event_source_prefix.clone())
        .with_metrics(metrics),
    );
    let tracker = Arc::new(InvocationStatusTracker::new(Arc::new(InMemoryStatusStore::new())).with_metrics(metrics));

    let domain_bus: Arc<InMemoryEventBus<DomainEvent>> = Arc::new(InMemoryEventBus::new());
    let workers = vec![
        EventWorker::spawn(
            "ets-invocation-worker",
            &events,
            InvocationEventHandler::new(service.clone(), tracker.clone()),
        )
        .context("spawning invocation worker")?,
        EventWorker::spawn("ets-domain-worker", &domain_bus, DomainEventHandler::new(service.clone()))
            .context("spawning domain event worker")?,
        spawn_breaker_sync(&transitions, breakers.clone()).context("spawning breaker sync")?,
    ];
    let sweeper = DeadlineSweeper::new(invocations, events, tracker.clone())
        .with_batch_size(config.sweeper.batch_size)
        .with_metrics(metrics)
        .spawn(config.sweeper.clone())
        .context("spawning deadline sweeper")?;

    Ok(AppServices {
        service,
        tracker,
        breakers,
        metrics,
        domain_events: domain_bus,
        background: Mutex::new(Some(Background { workers, sweeper })),
    })
}
