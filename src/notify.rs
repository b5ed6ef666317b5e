//! Completion notifications.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        info!(%title, %message, "notification");
        Ok(())
    }
}

/// Desktop notifications via notify-rust.
#[cfg(feature = "desktop-notifications")]
#[derive(Debug, Clone, Copy, Default)]
pub struct DesktopNotifier;

#[cfg(feature = "desktop-notifications")]
#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let title = title.to_string();
        let message = message.to_string();
        // `show()` blocks on some platforms; keep it off the async workers.
        tokio::task::spawn_blocking(move || {
            match notify_rust::Notification::new()
                .appname("ralph")
                .summary(&title)
                .body(&message)
                .show()
            {
                Ok(_) => tracing::debug!(%title, "desktop notification sent"),
                Err(e) => tracing::warn!(%title, error = %e, "desktop notification failed"),
            }
        });
        Ok(())
    }
}

/// Desktop notifications when compiled in and requested, the log otherwise.
pub fn default_notifier(desktop: bool) -> Arc<dyn Notifier> {
    #[cfg(feature = "desktop-notifications")]
    {
        if desktop {
            return Arc::new(DesktopNotifier);
        }
    }
    #[cfg(not(feature = "desktop-notifications"))]
    {
        if desktop {
            tracing::warn!("built without desktop-notifications; logging notifications instead");
        }
    }
    Arc::new(TracingNotifier)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Keeps every notification in memory; for tests and embedding callers.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        sent.push(Notification {
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}
