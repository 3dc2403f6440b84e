/// Handles a message received from an event bus.
///
/// Implementations must be idempotent: the bus delivers at least once and
/// gives no ordering guarantee across publishers.
pub trait EventHandler<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn handle(&self, message: &M) -> Result<(), Self::Error>;
}

impl<M, H> EventHandler<M> for std::sync::Arc<H>
where
    H: EventHandler<M> + ?Sized,
{
    type Error = H::Error;

    fn handle(&self, message: &M) -> Result<(), Self::Error> {
        (**self).handle(message)
    }
}
