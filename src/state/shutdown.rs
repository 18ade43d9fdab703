use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless cancelled first
///
/// Returns `false` if the token was cancelled before or during the sleep.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    pause_until(Instant::now() + duration, cancel).await
}

/// Sleeps until `deadline` unless cancelled first
pub async fn pause_until(deadline: Instant, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if deadline <= Instant::now() {
        return true;
    }

    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_completes() {
        let cancel = CancellationToken::new();
        assert!(pause(Duration::from_millis(5), &cancel).await);
    }

    #[tokio::test]
    async fn test_pause_interrupted() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        assert!(!pause(Duration::from_secs(30), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_pause_already_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!pause(Duration::ZERO, &cancel).await);
    }
}
