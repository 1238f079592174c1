//! Subscriber handler trait

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::Message;

/// A bus subscriber
///
/// Invoked once per message published on the subscribed topic. Returning an
/// error (or panicking) is logged and counted by the bus; it never affects
/// delivery to other subscribers.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, message: Arc<Message>) -> eyre::Result<()>;
}

/// Adapter turning an async closure into a [`Handler`]
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Arc<Message>) -> eyre::Result<()> {
        (self.f)(message).await
    }
}

/// Wrap an async closure as a shareable handler
///
/// ```rust,ignore
/// bus.subscribe("task_result", handler_fn(|msg| async move {
///     println!("{}", msg.id);
///     Ok(())
/// }))?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handler = handler_fn(move |_msg| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let msg = Arc::new(Message::new("t", Payload::new()));
        handler.handle(msg.clone()).await.unwrap();
        handler.handle(msg).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn(|_msg| async { Err(eyre::eyre!("boom")) });
        let result = handler.handle(Arc::new(Message::new("t", Payload::new()))).await;
        assert!(result.unwrap_err().to_string().contains("boom"));
    }
}
