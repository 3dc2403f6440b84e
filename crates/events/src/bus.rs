//! Pub/sub seam shared by the in-memory and Redis transports.
//!
//! ETS runs three streams over it: platform domain events feeding the
//! event-source lookup, invocation lifecycle events (`TriggerInvoked`,
//! `InvocationCompleted`, ...) consumed by the status tracker and the
//! dispatch worker, and circuit-breaker transitions broadcast to the fleet.
//!
//! Delivery is at-least-once with no ordering guarantee across publishers, so
//! every consumer must be idempotent. Breaker transitions are applied only
//! when the local state differs from the target, and status completion is a
//! no-op on an already completed record.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end of one bus subscription.
///
/// Sees every message published after `subscribe()` returned. Workers poll
/// it with [`Self::recv_timeout`] so they can notice shutdown between
/// messages; tests use [`Self::drain`].
#[derive(Debug)]
pub struct BusSubscription<M> {
    receiver: Receiver<M>,
}

impl<M> BusSubscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything buffered right now, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Pub/sub transport for one message type.
///
/// A failed publish is returned to the caller. The trigger service maps it
/// into `EtsError::Store`; breaker broadcasts only log it.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> BusSubscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> BusSubscription<M> {
        (**self).subscribe()
    }
}
