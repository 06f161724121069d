//! Async test helpers
//!
//! Replication is asynchronous, so most assertions about a peer's state
//! have to poll until it settles or a deadline passes.

use crate::events::{ChangeEvent, Subscription};
use std::future::Future;
use tokio::time::{timeout, Duration};

/// Default deadline for state to settle across replicas
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Assert a future completes within `duration`
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Assert a future does NOT complete within `duration`
pub async fn assert_times_out<F, T>(duration: Duration, future: F)
where
    F: Future<Output = T>,
{
    if timeout(duration, future).await.is_ok() {
        panic!("Expected future to time out, but it completed within {:?}", duration);
    }
}

/// Poll `check` until it holds, panicking after `deadline`
pub async fn eventually_within(deadline: Duration, mut check: impl FnMut() -> bool) {
    let polled = timeout(deadline, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if polled.is_err() {
        panic!("Condition not met within {:?}", deadline);
    }
}

pub async fn eventually(check: impl FnMut() -> bool) {
    eventually_within(SETTLE_TIMEOUT, check).await
}

/// Next event matching `pred`, skipping the rest
pub async fn next_matching(
    sub: &mut Subscription,
    mut pred: impl FnMut(&ChangeEvent) -> bool,
) -> ChangeEvent {
    assert_completes_within(SETTLE_TIMEOUT, async {
        loop {
            match sub.next().await {
                Some(event) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("Subscription closed while waiting for an event"),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_eventually_polls_until_true() {
        let counter = Arc::new(AtomicUsize::new(0));
        let bump = counter.clone();
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                bump.fetch_add(1, Ordering::SeqCst);
            }
        });

        eventually(|| counter.load(Ordering::SeqCst) == 3).await;
    }

    #[tokio::test]
    #[should_panic(expected = "Condition not met")]
    async fn test_eventually_panics_on_deadline() {
        eventually_within(Duration::from_millis(30), || false).await;
    }

    #[tokio::test]
    async fn test_assert_times_out() {
        assert_times_out(Duration::from_millis(10), tokio::time::sleep(Duration::from_secs(1))).await;
    }
}
