//! Redis pub/sub-backed event bus.
//!
//! Pub/sub is not durable: messages published while a replica is offline are
//! lost to it. The deadline sweeper bounds the damage for invocations, and
//! breaker state converges on the next transition.

use std::marker::PhantomData;
use std::sync::mpsc;
use std::thread;

use redis::Commands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use ets_events::{BusSubscription, EventBus};

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// JSON-over-Redis bus for one message type on one channel.
pub struct RedisPubSubEventBus<M> {
    client: redis::Client,
    channel: String,
    _message: PhantomData<fn() -> M>,
}

impl<M> Clone for RedisPubSubEventBus<M> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            channel: self.channel.clone(),
            _message: PhantomData,
        }
    }
}

impl<M> core::fmt::Debug for RedisPubSubEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisPubSubEventBus")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl<M> RedisPubSubEventBus<M> {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self {
            client,
            channel: channel.into(),
            _message: PhantomData,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl<M> EventBus<M> for RedisPubSubEventBus<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    type Error = RedisBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)?;
        let mut conn = self.client.get_connection()?;
        let _: i64 = conn.publish(&self.channel, payload)?;
        Ok(())
    }

    fn subscribe(&self) -> BusSubscription<M> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let channel = self.channel.clone();

        let spawned = thread::Builder::new()
            .name(format!("redis-sub-{channel}"))
            .spawn(move || {
                let mut conn = match client.get_connection() {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(channel = %channel, error = %err, "redis subscribe connection failed");
                        return;
                    }
                };
                let mut pubsub = conn.as_pubsub();
                if let Err(err) = pubsub.subscribe(&channel) {
                    warn!(channel = %channel, error = %err, "redis subscribe failed");
                    return;
                }

                loop {
                    let msg = match pubsub.get_message() {
                        Ok(m) => m,
                        Err(err) => {
                            warn!(channel = %channel, error = %err, "redis subscription closed");
                            return;
                        }
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let message: M = match serde_json::from_str(&payload) {
                        Ok(m) => m,
                        Err(err) => {
                            debug!(channel = %channel, error = %err, "skipping undecodable message");
                            continue;
                        }
                    };
                    // Receiver dropped.
                    if tx.send(message).is_err() {
                        return;
                    }
                }
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn redis subscriber thread");
        }

        BusSubscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use ets_events::EventEnvelope;

    use super::*;

    #[test]
    fn rejects_malformed_url() {
        let bus = RedisPubSubEventBus::<EventEnvelope<u32>>::new("not a url", "ets");
        assert!(matches!(bus, Err(RedisBusError::Redis(_))));
    }

    #[test]
    fn keeps_channel_name() {
        let bus = RedisPubSubEventBus::<EventEnvelope<u32>>::new("redis://127.0.0.1:6379", "ets.breakers").unwrap();
        assert_eq!(bus.channel(), "ets.breakers");
    }
}
