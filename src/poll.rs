//! Generic polling primitive (§5, §9): `poll(timeout, interval, desc, checkFn) -> ok|Timeout`.
//!
//! Every wait in this crate (registry health, Kubernetes API readiness, Flux `Instance`
//! readiness) is built on this instead of a hand-rolled `loop { sleep().await }` — there are
//! no busy loops, and every wait has a deadline.

use std::time::Duration;

use tokio::time::{interval, Instant};

#[derive(Debug, thiserror::Error)]
#[error("timed out after {elapsed:?} waiting for {description}")]
pub struct PollTimeout {
    pub description: String,
    pub elapsed: Duration,
}

/// Poll `check` on a steady ticker of `interval` until it returns `true` or `timeout` elapses.
pub async fn poll<F, Fut>(
    timeout: Duration,
    interval_duration: Duration,
    description: &str,
    mut check: F,
) -> Result<(), PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    let deadline = start + timeout;
    let mut ticker = interval(interval_duration);

    loop {
        if check().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(PollTimeout {
                description: description.to_string(),
                elapsed: start.elapsed(),
            });
        }
        ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn converges_once_check_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = poll(
            Duration::from_secs(1),
            Duration::from_millis(1),
            "test condition",
            move || {
                let calls = calls_clone.clone();
                async move { calls.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
        )
        .await;
        assert!(result.is_ok());
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn times_out_when_check_never_succeeds() {
        let result = poll(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "never true",
            || async { false },
        )
        .await;
        assert!(result.is_err());
    }
}
