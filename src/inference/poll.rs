//! Fixed-interval polling
//!
//! Completion is only observable by asking. `poll_until` probes immediately,
//! then once per interval, and resolves with the first `Some`. Dropping the
//! future cancels the wait.

use std::future::Future;
use std::time::Duration;

pub async fn poll_until<F, Fut, T>(interval: Duration, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        if let Some(value) = probe().await {
            tracing::trace!("poll settled after {} probes", attempts);
            return value;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_probes_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value = poll_until(Duration::from_secs(60), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(42)
            }
        })
        .await;

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_polls_until_predicate_holds() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value = poll_until(Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                (n == 3).then_some(n)
            }
        })
        .await;

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dropping_cancels_the_wait() {
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            poll_until(Duration::from_millis(1), || async { None::<()> }),
        )
        .await;
        assert!(result.is_err());
    }
}
