use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Runs `action` up to `max_attempts` times total, sleeping a fixed `delay`
/// between attempts. The final error is re-thrown, never swallowed, so the
/// caller can tell exhaustion apart from success on a later attempt.
///
/// No backoff growth and no business logic here; both retry tiers of the
/// reconciliation engine share this helper.
pub async fn with_retries<T, E, F, Fut>(
    mut action: F,
    max_attempts: usize,
    delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                warn!(attempt, max_attempts, %err, "attempt failed, retrying after delay");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn always_failing_action_runs_exactly_max_attempts_then_rethrows() {
        let calls = AtomicUsize::new(0);
        let result = with_retries(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test]
    async fn succeeding_on_second_attempt_stops_retrying() {
        let calls = AtomicUsize::new(0);
        let result = with_retries(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(n)
                }
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn immediate_success_runs_once() {
        let calls = AtomicUsize::new(0);
        let result = with_retries(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(42)
            },
            3,
            Duration::from_millis(1),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
