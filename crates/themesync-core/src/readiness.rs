//! Waits for a remote theme to finish provisioning.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::ThemeApi;
use crate::error::{NotReadyReason, Result, SyncError};
use crate::types::Theme;

pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Polls a theme until the remote finishes processing it. Only one status
/// request is outstanding at a time.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    interval: Duration,
    timeout: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            timeout: READY_TIMEOUT,
        }
    }
}

impl ReadinessGate {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Poll until the theme stops processing.
    ///
    /// Polls never overlap: the next status request is only sent after the
    /// previous one returned and `interval` elapsed. Fails with
    /// [`SyncError::ThemeNotReady`] when the theme is gone or `timeout` has
    /// passed since `start` while it is still processing.
    pub async fn await_ready(
        &self,
        api: &dyn ThemeApi,
        theme_id: u64,
        start: Instant,
    ) -> Result<Theme> {
        loop {
            let Some(theme) = api.fetch_theme(theme_id).await? else {
                return Err(SyncError::ThemeNotReady {
                    theme_id,
                    reason: NotReadyReason::Missing,
                    hint: "Check the theme id, or omit it to create a development theme".into(),
                });
            };

            if !theme.processing {
                return Ok(theme);
            }

            let waited = start.elapsed();
            if waited >= self.timeout {
                return Err(SyncError::ThemeNotReady {
                    theme_id,
                    reason: NotReadyReason::StillProcessing(waited),
                    hint: "The remote store is still preparing this theme. Try again in a few minutes".into(),
                });
            }

            tracing::debug!(theme_id, waited_secs = waited.as_secs(), "theme still processing");
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ApiCall, FakeThemeApi};
    use crate::types::ThemeRole;

    fn theme(processing: bool) -> Theme {
        Theme {
            id: 9,
            name: "Dev".into(),
            role: ThemeRole::Development,
            processing,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_once_processing_clears() {
        let api = FakeThemeApi::new().with_theme(theme(true));
        api.finish_processing_after(3);

        let ready = ReadinessGate::default()
            .await_ready(&api, 9, Instant::now())
            .await
            .unwrap();

        assert!(!ready.processing);
        let polls = api
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::FetchTheme(9)))
            .count();
        assert_eq!(polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_while_processing() {
        let api = FakeThemeApi::new().with_theme(theme(true));
        let start = Instant::now();

        let err = ReadinessGate::default()
            .await_ready(&api, 9, start)
            .await
            .unwrap_err();

        match err {
            SyncError::ThemeNotReady {
                reason: NotReadyReason::StillProcessing(waited),
                ..
            } => assert!(waited >= READY_TIMEOUT),
            other => panic!("unexpected error: {other}"),
        }
        assert!(start.elapsed() >= READY_TIMEOUT);
        assert!(start.elapsed() < READY_TIMEOUT + POLL_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_theme_fails_immediately() {
        let api = FakeThemeApi::new();
        let err = ReadinessGate::default()
            .await_ready(&api, 404, Instant::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::ThemeNotReady {
                reason: NotReadyReason::Missing,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_theme_needs_one_poll() {
        let api = FakeThemeApi::new().with_theme(theme(false));
        let gate = ReadinessGate::new(Duration::from_millis(10), Duration::from_secs(1));
        gate.await_ready(&api, 9, Instant::now()).await.unwrap();
        assert_eq!(api.calls(), vec![ApiCall::FetchTheme(9)]);
    }
}
