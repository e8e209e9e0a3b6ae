//! Periodic update polling with edge-triggered status publication.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{UpdateAction, UpdateConfig},
    messaging::port::StatusPort,
};

use super::UpdateCheck;

const SHORT_HASH_LEN: usize = 7;
/// Shortest polling period; `interval_at` rejects a zero period.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Mutated only by the tick handler; never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationState {
    pub has_update: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub notifications: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotifierStatus {
    pub running: bool,
    pub has_update: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub notifications: u64,
}

#[derive(Clone)]
pub struct UpdateNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    checker: Arc<dyn UpdateCheck>,
    status: Arc<dyn StatusPort>,
    interval: Duration,
    action: UpdateAction,
    // Held for a whole tick so manual and scheduled ticks never interleave.
    tick: tokio::sync::Mutex<()>,
    state: std::sync::Mutex<NotificationState>,
    ticker: tokio::sync::Mutex<Option<Ticker>>,
}

struct Ticker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl UpdateNotifier {
    pub fn new(
        checker: Arc<dyn UpdateCheck>,
        status: Arc<dyn StatusPort>,
        interval: Duration,
        action: UpdateAction,
    ) -> Self {
        let interval = if interval < MIN_INTERVAL {
            tracing::warn!(
                requested = ?interval,
                using = ?MIN_INTERVAL,
                "update interval too short; clamping"
            );
            MIN_INTERVAL
        } else {
            interval
        };
        Self {
            inner: Arc::new(NotifierInner {
                checker,
                status,
                interval,
                action,
                tick: tokio::sync::Mutex::new(()),
                state: std::sync::Mutex::new(NotificationState::default()),
                ticker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn from_config(
        cfg: &UpdateConfig,
        checker: Arc<dyn UpdateCheck>,
        status: Arc<dyn StatusPort>,
    ) -> Self {
        Self::new(checker, status, cfg.interval, cfg.action)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Start the repeating ticker. The first tick fires one interval from now.
    /// Calling `start` while already running is a no-op.
    pub async fn start(&self) {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let tok = cancel.clone();
        let notifier = self.clone();
        let period = self.interval();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                  _ = tok.cancelled() => break,
                  _ = tick.tick() => notifier.timeout().await,
                }
            }
        });

        *ticker = Some(Ticker { cancel, handle });
        tracing::info!(
            interval = ?period,
            model = ?self.inner.checker.model(),
            "update notifier started"
        );
    }

    /// Cancel the ticker. A tick already in progress runs to completion.
    pub async fn stop(&self) {
        let Some(ticker) = self.inner.ticker.lock().await.take() else {
            return;
        };
        ticker.cancel.cancel();
        tracing::info!("update notifier stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .ticker
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// One polling step: check, publish on a rising edge, optionally apply.
    pub async fn timeout(&self) {
        let _tick = self.inner.tick.lock().await;

        let result = self.inner.checker.check().await;
        let previous = self.update_state(|st| {
            let previous = st.has_update;
            st.has_update = result.update_available;
            st.last_checked = Some(Utc::now());
            previous
        });

        if previous || !result.update_available {
            return;
        }

        match self.inner.checker.update_version() {
            Some(descriptor) => {
                let text = format!(
                    "software update available: {}",
                    self.display_descriptor(&descriptor)
                );
                match self.inner.status.publish_status(&text).await {
                    Ok(()) => {
                        self.update_state(|st| st.notifications += 1);
                        tracing::info!(%descriptor, "published update status");
                    }
                    Err(e) => tracing::warn!(error = %e, "publishing update status failed"),
                }
            }
            None => tracing::debug!("update reported without a descriptor; nothing to publish"),
        }

        if self.inner.action == UpdateAction::Apply {
            match self.inner.checker.download_update().await {
                Ok(true) => tracing::info!("update applied"),
                Ok(false) => tracing::warn!("update could not be applied"),
                Err(e) => tracing::error!(error = %e, "update cannot be applied with this model"),
            }
        }
    }

    pub async fn status(&self) -> NotifierStatus {
        let running = self.is_running().await;
        let st = self.snapshot();
        NotifierStatus {
            running,
            has_update: st.has_update,
            last_checked: st.last_checked,
            notifications: st.notifications,
        }
    }

    fn display_descriptor(&self, descriptor: &str) -> String {
        if self.inner.checker.model().is_bleeding_edge() {
            descriptor.chars().take(SHORT_HASH_LEN).collect()
        } else {
            descriptor.to_string()
        }
    }

    fn snapshot(&self) -> NotificationState {
        self.inner
            .state
            .lock()
            .map(|st| st.clone())
            .unwrap_or_default()
    }

    fn update_state<T: Default>(&self, f: impl FnOnce(&mut NotificationState) -> T) -> T {
        match self.inner.state.lock() {
            Ok(mut st) => f(&mut st),
            Err(_) => T::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::UpdateModel,
        errors::Error,
        update::CheckResult,
        Result,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);

    struct ScriptedChecker {
        model: UpdateModel,
        script: std::sync::Mutex<VecDeque<bool>>,
        descriptor: Option<&'static str>,
        checks: AtomicUsize,
        downloads: AtomicUsize,
    }

    impl ScriptedChecker {
        fn new(script: &[bool]) -> Self {
            Self {
                model: UpdateModel::Stable,
                script: std::sync::Mutex::new(script.iter().copied().collect()),
                descriptor: Some("1.3.3.7"),
                checks: AtomicUsize::new(0),
                downloads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UpdateCheck for ScriptedChecker {
        fn model(&self) -> UpdateModel {
            self.model
        }

        async fn check(&self) -> CheckResult {
            self.checks.fetch_add(1, Ordering::SeqCst);
            let update_available = self.script.lock().unwrap().pop_front().unwrap_or(false);
            CheckResult {
                update_available,
                remote_version: self.descriptor.map(str::to_string),
            }
        }

        fn update_version(&self) -> Option<String> {
            self.descriptor.map(str::to_string)
        }

        async fn download_update(&self) -> Result<bool> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[derive(Default)]
    struct FakeStatus {
        published: std::sync::Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl StatusPort for FakeStatus {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn publish_status(&self, text: &str) -> Result<()> {
            self.published.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(Error::External("transport down".to_string()));
            }
            Ok(())
        }
    }

    fn notifier(
        checker: Arc<ScriptedChecker>,
        status: Arc<FakeStatus>,
        action: UpdateAction,
    ) -> UpdateNotifier {
        UpdateNotifier::new(checker, status, HOUR, action)
    }

    #[tokio::test]
    async fn publishes_once_per_rising_edge() {
        let checker = Arc::new(ScriptedChecker::new(&[false, true, true, true]));
        let status = Arc::new(FakeStatus::default());
        let n = notifier(checker, status.clone(), UpdateAction::Notify);

        for _ in 0..4 {
            n.timeout().await;
        }

        assert_eq!(
            *status.published.lock().unwrap(),
            vec!["software update available: 1.3.3.7".to_string()]
        );
        let st = n.status().await;
        assert!(st.has_update);
        assert_eq!(st.notifications, 1);
        assert!(st.last_checked.is_some());
        assert!(!st.running);
    }

    #[tokio::test]
    async fn falling_edge_rearms_notification() {
        let checker = Arc::new(ScriptedChecker::new(&[true, false, true]));
        let status = Arc::new(FakeStatus::default());
        let n = notifier(checker, status.clone(), UpdateAction::Notify);

        for _ in 0..3 {
            n.timeout().await;
        }
        assert_eq!(status.published.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bleeding_edge_descriptor_is_shortened() {
        let mut checker = ScriptedChecker::new(&[true]);
        checker.model = UpdateModel::Bleeding;
        checker.descriptor = Some("0123456789abcdef0123456789abcdef01234567");
        let status = Arc::new(FakeStatus::default());
        let n = notifier(Arc::new(checker), status.clone(), UpdateAction::Notify);

        n.timeout().await;
        assert_eq!(
            *status.published.lock().unwrap(),
            vec!["software update available: 0123456".to_string()]
        );
    }

    #[tokio::test]
    async fn missing_descriptor_publishes_nothing() {
        let mut checker = ScriptedChecker::new(&[true]);
        checker.descriptor = None;
        let status = Arc::new(FakeStatus::default());
        let n = notifier(Arc::new(checker), status.clone(), UpdateAction::Notify);

        n.timeout().await;
        assert!(status.published.lock().unwrap().is_empty());
        assert!(n.status().await.has_update);
    }

    #[tokio::test]
    async fn publish_failure_is_absorbed() {
        let checker = Arc::new(ScriptedChecker::new(&[true, false, true]));
        let status = Arc::new(FakeStatus {
            fail: true,
            ..Default::default()
        });
        let n = notifier(checker, status.clone(), UpdateAction::Notify);

        for _ in 0..3 {
            n.timeout().await;
        }
        assert_eq!(status.published.lock().unwrap().len(), 2);
        assert_eq!(n.status().await.notifications, 0);
    }

    #[tokio::test]
    async fn apply_downloads_on_rising_edge_only() {
        let checker = Arc::new(ScriptedChecker::new(&[true, true, false, true]));
        let n = notifier(checker.clone(), Arc::default(), UpdateAction::Apply);

        for _ in 0..4 {
            n.timeout().await;
        }
        assert_eq!(checker.downloads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn notify_never_downloads() {
        let checker = Arc::new(ScriptedChecker::new(&[true]));
        let n = notifier(checker.clone(), Arc::default(), UpdateAction::Notify);
        n.timeout().await;
        assert_eq!(checker.downloads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_fires_every_interval_until_stopped() {
        let checker = Arc::new(ScriptedChecker::new(&[false, true, true]));
        let status = Arc::new(FakeStatus::default());
        let n = notifier(checker.clone(), status.clone(), UpdateAction::Notify);

        n.start().await;
        n.start().await;
        assert!(n.is_running().await);

        tokio::time::sleep(HOUR - Duration::from_secs(1)).await;
        assert_eq!(checker.checks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(HOUR * 2 + Duration::from_secs(2)).await;
        assert_eq!(checker.checks.load(Ordering::SeqCst), 3);
        assert_eq!(status.published.lock().unwrap().len(), 1);

        n.stop().await;
        tokio::time::sleep(HOUR * 3).await;
        assert_eq!(checker.checks.load(Ordering::SeqCst), 3);
        assert!(!n.status().await.running);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_raised_to_minimum() {
        let checker = Arc::new(ScriptedChecker::new(&[]));
        let n = UpdateNotifier::new(
            checker.clone(),
            Arc::new(FakeStatus::default()),
            Duration::ZERO,
            UpdateAction::Notify,
        );
        assert_eq!(n.interval(), MIN_INTERVAL);

        n.start().await;
        tokio::time::sleep(MIN_INTERVAL + Duration::from_millis(500)).await;
        assert_eq!(checker.checks.load(Ordering::SeqCst), 1);
        assert!(n.is_running().await);
        n.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_resumes_polling() {
        let checker = Arc::new(ScriptedChecker::new(&[]));
        let n = notifier(checker.clone(), Arc::default(), UpdateAction::Notify);

        n.start().await;
        n.stop().await;
        n.start().await;
        tokio::time::sleep(HOUR + Duration::from_secs(1)).await;
        assert_eq!(checker.checks.load(Ordering::SeqCst), 1);
        n.stop().await;
    }
}
