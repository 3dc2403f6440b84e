//! Runtime configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, anyhow};

use ets_breaker::{BreakerConfig, SlidingWindowType};
use ets_subscriptions::SubscriptionLimits;

use crate::jobs::SweeperConfig;

/// Load `.env` (silently ignored if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

#[derive(Debug, Clone)]
pub struct EtsConfig {
    /// Cap on an explicit deadline override.
    pub max_deadline: Duration,
    pub limits: SubscriptionLimits,
    pub callback_base_url: String,
    /// Trigger descriptors; the built-in catalog is used when unset.
    pub triggers_path: Option<PathBuf>,
    pub sweeper: SweeperConfig,
    pub breaker: BreakerConfig,
    pub secret_hash_key: String,
    pub partner_event_source_prefix: String,
    pub delivery_timeout: Duration,
    pub script_runner_url: Option<String>,
    pub instance_id: Option<String>,
    pub redis_url: Option<String>,
    pub bind_addr: String,
}

impl Default for EtsConfig {
    fn default() -> Self {
        Self {
            max_deadline: Duration::from_secs(60 * 60),
            limits: SubscriptionLimits::default(),
            callback_base_url: "http://localhost:8080".to_string(),
            triggers_path: None,
            sweeper: SweeperConfig::default(),
            breaker: BreakerConfig::default(),
            secret_hash_key: "ets-dev-key".to_string(),
            partner_event_source_prefix: "aws.partner/ets".to_string(),
            delivery_timeout: Duration::from_secs(30),
            script_runner_url: None,
            instance_id: None,
            redis_url: None,
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl EtsConfig {
    /// Build from process environment variables (call [`load_dotenv`] first).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(Box::new(move |key| lookup(key).filter(|v| !v.trim().is_empty())));
        let d = Self::default();

        let limits = SubscriptionLimits {
            subscription_limit: env.parse("ETS_SUBSCRIPTION_LIMIT", d.limits.subscription_limit)?,
            script_subscription_limit: env
                .parse("ETS_SCRIPT_SUBSCRIPTION_LIMIT", d.limits.script_subscription_limit)?,
            script_byte_size_limit: env
                .parse("ETS_SCRIPT_BYTE_SIZE_LIMIT", d.limits.script_byte_size_limit)?,
        };

        let sweeper = SweeperConfig::default()
            .with_poll_interval(Duration::from_secs(
                env.parse("ETS_SWEEP_INTERVAL_SECS", d.sweeper.poll_interval.as_secs())?,
            ))
            .with_batch_size(env.parse("ETS_SWEEP_BATCH_SIZE", d.sweeper.batch_size)?);

        let window_type = match env.get("ETS_BREAKER_SLIDING_WINDOW_TYPE") {
            Some(raw) => SlidingWindowType::from_str(&raw)
                .map_err(|e| anyhow!(e))
                .context("ETS_BREAKER_SLIDING_WINDOW_TYPE")?,
            None => d.breaker.sliding_window_type,
        };
        let threshold: f32 = env.parse(
            "ETS_BREAKER_FAILURE_RATE_THRESHOLD",
            d.breaker.failure_rate_threshold,
        )?;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(anyhow!(
                "ETS_BREAKER_FAILURE_RATE_THRESHOLD must be within 0..=100, got {threshold}"
            ));
        }
        let half_open_calls: u32 = env.parse(
            "ETS_BREAKER_PERMITTED_CALLS_IN_HALF_OPEN",
            d.breaker.permitted_calls_in_half_open,
        )?;
        if half_open_calls == 0 {
            return Err(anyhow!("ETS_BREAKER_PERMITTED_CALLS_IN_HALF_OPEN must be at least 1"));
        }
        let breaker = BreakerConfig::default()
            .with_failure_rate_threshold(threshold)
            .with_sliding_window(
                window_type,
                env.parse("ETS_BREAKER_SLIDING_WINDOW_SIZE", d.breaker.sliding_window_size)?,
            )
            .with_minimum_number_of_calls(env.parse(
                "ETS_BREAKER_MINIMUM_NUMBER_OF_CALLS",
                d.breaker.minimum_number_of_calls,
            )?)
            .with_permitted_calls_in_half_open(half_open_calls)
            .with_wait_duration(Duration::from_secs(env.parse(
                "ETS_BREAKER_WAIT_DURATION_SECS",
                d.breaker.wait_duration_in_open_state.as_secs(),
            )?))
            .with_automatic_transition(env.parse(
                "ETS_BREAKER_AUTOMATIC_TRANSITION",
                d.breaker.automatic_transition_from_open_to_half_open,
            )?);

        let secret_hash_key = match env.get("ETS_SECRET_HASH_KEY") {
            Some(key) => key,
            None => {
                tracing::warn!("ETS_SECRET_HASH_KEY not set; using insecure dev default");
                d.secret_hash_key
            }
        };

        Ok(Self {
            max_deadline: Duration::from_secs(
                60 * env.parse("ETS_MAX_DEADLINE_MINUTES", d.max_deadline.as_secs() / 60)?,
            ),
            limits,
            callback_base_url: env.get("ETS_CALLBACK_BASE_URL").unwrap_or(d.callback_base_url),
            triggers_path: env.get("ETS_TRIGGERS_PATH").map(PathBuf::from),
            sweeper,
            breaker,
            secret_hash_key,
            partner_event_source_prefix: env
                .get("ETS_EVENTBRIDGE_PARTNER_PREFIX")
                .unwrap_or(d.partner_event_source_prefix),
            delivery_timeout: Duration::from_secs(
                env.parse("ETS_DELIVERY_TIMEOUT_SECS", d.delivery_timeout.as_secs())?,
            ),
            script_runner_url: env.get("ETS_SCRIPT_RUNNER_URL"),
            instance_id: env.get("ETS_INSTANCE_ID"),
            redis_url: env.get("REDIS_URL"),
            bind_addr: env.get("ETS_BIND_ADDR").unwrap_or(d.bind_addr),
        })
    }
}

type Lookup<'a> = Box<dyn Fn(&str) -> Option<String> + 'a>;

struct Env<'a>(Lookup<'a>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T>(&self, key: &str, default: T) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid value for {key}: '{raw}'")),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<EtsConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EtsConfig::from_lookup(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let c = config(&[]).unwrap();
        assert_eq!(c.max_deadline, Duration::from_secs(3600));
        assert_eq!(c.limits, SubscriptionLimits::default());
        assert_eq!(c.sweeper.batch_size, 2000);
        assert_eq!(c.sweeper.poll_interval, Duration::from_secs(30));
        assert_eq!(c.breaker, BreakerConfig::default());
        assert_eq!(c.bind_addr, "0.0.0.0:8080");
        assert!(c.redis_url.is_none());
    }

    #[test]
    fn reads_overrides() {
        let c = config(&[
            ("ETS_MAX_DEADLINE_MINUTES", "15"),
            ("ETS_SUBSCRIPTION_LIMIT", "3"),
            ("ETS_SWEEP_BATCH_SIZE", "10"),
            ("ETS_BREAKER_SLIDING_WINDOW_TYPE", "TIME_BASED"),
            ("ETS_BREAKER_SLIDING_WINDOW_SIZE", "20"),
            ("ETS_BREAKER_AUTOMATIC_TRANSITION", "true"),
            ("ETS_CALLBACK_BASE_URL", "https://ets.example.com"),
            ("ETS_BIND_ADDR", ""),
        ])
        .unwrap();
        assert_eq!(c.max_deadline, Duration::from_secs(15 * 60));
        assert_eq!(c.limits.subscription_limit, 3);
        assert_eq!(c.sweeper.batch_size, 10);
        assert_eq!(c.breaker.sliding_window_type, SlidingWindowType::TimeBased);
        assert_eq!(c.breaker.sliding_window_size, 20);
        assert!(c.breaker.automatic_transition_from_open_to_half_open);
        assert_eq!(c.callback_base_url, "https://ets.example.com");
        assert_eq!(c.bind_addr, "0.0.0.0:8080");
    }

    #[test]
    fn rejects_malformed_values() {
        let err = config(&[("ETS_SWEEP_BATCH_SIZE", "lots")]).unwrap_err();
        assert!(err.to_string().contains("ETS_SWEEP_BATCH_SIZE"));

        assert!(config(&[("ETS_BREAKER_SLIDING_WINDOW_TYPE", "HOURLY")]).is_err());
        assert!(config(&[("ETS_BREAKER_FAILURE_RATE_THRESHOLD", "150")]).is_err());
    }

    #[test]
    fn half_open_needs_at_least_one_permitted_call() {
        let err = config(&[("ETS_BREAKER_PERMITTED_CALLS_IN_HALF_OPEN", "0")]).unwrap_err();
        assert!(err.to_string().contains("ETS_BREAKER_PERMITTED_CALLS_IN_HALF_OPEN"));

        let c = config(&[("ETS_BREAKER_PERMITTED_CALLS_IN_HALF_OPEN", "3")]).unwrap();
        assert_eq!(c.breaker.permitted_calls_in_half_open, 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

        #[test]
        fn numeric_settings_tolerate_surrounding_whitespace(minutes in 1u64..100_000, batch in 1usize..100_000) {
            let minutes_raw = format!(" {minutes} ");
            let batch_raw = format!("{batch}\n");
            let c = config(&[
                ("ETS_MAX_DEADLINE_MINUTES", minutes_raw.as_str()),
                ("ETS_SWEEP_BATCH_SIZE", batch_raw.as_str()),
            ])
            .unwrap();
            prop_assert_eq!(c.max_deadline, Duration::from_secs(minutes * 60));
            prop_assert_eq!(c.sweeper.batch_size, batch);
        }

        #[test]
        fn threshold_outside_percent_range_is_rejected(t in 100.01f32..10_000.0) {
            let raw = t.to_string();
            prop_assert!(config(&[("ETS_BREAKER_FAILURE_RATE_THRESHOLD", raw.as_str())]).is_err());
        }
    }
}
