use std::future::Future;
use std::time::Duration;

/// 轮询直到条件成立或超时，返回条件最终是否成立
pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_for_eventually_true() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let ok = wait_for(
            move || async move { calls.fetch_add(1, Ordering::SeqCst) >= 2 },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        assert!(!wait_for(|| async { false }, Duration::from_millis(30)).await);
    }
}
