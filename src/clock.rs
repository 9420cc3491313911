//! Sleeping as an injectable capability.
//!
//! The poller waits `poll_interval` between status checks and the scheduler
//! waits `inter_batch_delay` between groups. Both go through [`Sleeper`] so
//! tests can record the requested pauses instead of spending real time.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Something that can suspend the current task for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping via `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Shared handle type used throughout the pipeline.
pub type SharedSleeper = Arc<dyn Sleeper>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn zero_duration_returns_immediately() {
        let start = Instant::now();
        TokioSleeper.sleep(Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_sleeper_respects_virtual_time() {
        let before = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(30)).await;
        assert!(before.elapsed() >= Duration::from_secs(30));
    }
}
