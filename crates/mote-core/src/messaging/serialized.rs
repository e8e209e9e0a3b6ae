use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{messaging::port::StatusPort, Result};

#[derive(Clone, Copy, Debug)]
pub struct SerializeConfig {
    /// Minimum spacing between two outbound status publications.
    pub min_interval: Duration,
}

impl Default for SerializeConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// StatusPort decorator that makes the wrapped connection single-writer.
///
/// The update ticker and the transport's own loop may both write to the same
/// connection. Every call (connect, disconnect, publish) holds one lock for
/// its whole duration, so writes never interleave.
pub struct SerializedStatus {
    inner: Arc<dyn StatusPort>,
    writer: Mutex<IntervalLimiter>,
}

impl SerializedStatus {
    pub fn new(inner: Arc<dyn StatusPort>, cfg: SerializeConfig) -> Self {
        Self {
            inner,
            writer: Mutex::new(IntervalLimiter::new(cfg.min_interval)),
        }
    }
}

#[async_trait::async_trait]
impl StatusPort for SerializedStatus {
    async fn connect(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.inner.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.inner.disconnect().await
    }

    async fn publish_status(&self, text: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let wait = guard.reserve();
        if wait > Duration::from_millis(0) {
            sleep(wait).await;
        }
        self.inner.publish_status(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the maximum number of concurrent calls observed.
    #[derive(Default)]
    struct OverlapProbe {
        active: AtomicUsize,
        max_active: AtomicUsize,
        published: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StatusPort for OverlapProbe {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn publish_status(&self, text: &str) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            sleep(Duration::from_millis(5)).await;
            self.published.lock().unwrap().push(text.to_string());
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_publications_never_overlap() {
        let probe = Arc::new(OverlapProbe::default());
        let status = Arc::new(SerializedStatus::new(
            probe.clone(),
            SerializeConfig {
                min_interval: Duration::from_millis(0),
            },
        ));

        let mut handles = Vec::new();
        for i in 0..8 {
            let status = status.clone();
            handles.push(tokio::spawn(async move {
                status.publish_status(&format!("status {i}")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(probe.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(probe.published.lock().unwrap().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn publications_are_spaced_by_min_interval() {
        let probe = Arc::new(OverlapProbe::default());
        let status = SerializedStatus::new(
            probe,
            SerializeConfig {
                min_interval: Duration::from_secs(1),
            },
        );

        let started = Instant::now();
        status.publish_status("one").await.unwrap();
        status.publish_status("two").await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
