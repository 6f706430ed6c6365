//! Typed batch callbacks.

use async_trait::async_trait;

use crate::models::Notification;

/// Receives each batch a [`Listener`](super::Listener) drains
///
/// Returning an error aborts the session: the batch is not credited to the cursor, the lease
/// is released and `listen` fails with `CallbackFailed` wrapping the error.
///
/// Plain closures implement this trait:
///
/// ```rust
/// use notifier_core::listener::BatchHandler;
/// use notifier_core::models::Notification;
///
/// fn assert_handler<H: BatchHandler>(_: H) {}
///
/// let mut seen = Vec::new();
/// assert_handler(move |batch: &[Notification]| -> anyhow::Result<()> {
///     seen.extend(batch.iter().map(|n| n.id));
///     Ok(())
/// });
/// ```
#[async_trait]
pub trait BatchHandler: Send {
    async fn handle(&mut self, batch: &[Notification]) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> BatchHandler for F
where
    F: FnMut(&[Notification]) -> anyhow::Result<()> + Send,
{
    async fn handle(&mut self, batch: &[Notification]) -> anyhow::Result<()> {
        self(batch)
    }
}
