//! The platform surface a worker calls back into.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Url;
use uuid::Uuid;

use crate::error::Result;
use crate::push::Notification;

/// Callbacks into the hosting platform.
///
/// All methods have default no-op implementations for convenience.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Lets a freshly installed worker activate without waiting for every
    /// client of the previous version to go away.
    async fn skip_waiting(&self) -> Result<()> {
        Ok(())
    }

    /// Takes control of every open client. Returns how many were claimed.
    async fn claim_clients(&self) -> Result<usize> {
        Ok(0)
    }

    async fn show_notification(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }

    async fn close_notification(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }

    /// Opens a new window or tab at `url`.
    async fn open_window(&self, _url: &Url) -> Result<()> {
        Ok(())
    }
}

/// A host that ignores all callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHost;

impl WorkerHost for NoHost {}

/// A host that logs every callback and tracks which notifications are
/// still on screen. Opened windows are only logged.
#[derive(Debug, Default)]
pub struct LoggingHost {
    notifications: Mutex<Vec<Notification>>,
}

impl LoggingHost {
    /// Notifications kept on screen at most; the oldest is dropped first.
    pub const MAX_SHOWN: usize = 32;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications currently shown.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl WorkerHost for LoggingHost {
    async fn skip_waiting(&self) -> Result<()> {
        log::info!("Skipping waiting period");
        Ok(())
    }

    async fn claim_clients(&self) -> Result<usize> {
        log::info!("Claiming clients");
        Ok(0)
    }

    async fn show_notification(&self, notification: &Notification) -> Result<()> {
        log::info!("Notification: {} - {}", notification.title, notification.body);
        let mut shown = self
            .notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if shown.len() >= Self::MAX_SHOWN {
            shown.remove(0);
        }
        shown.push(notification.clone());
        Ok(())
    }

    async fn close_notification(&self, id: Uuid) -> Result<()> {
        self.notifications
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|n| n.id != id);
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> Result<()> {
        log::info!("Opening window at {url}");
        Ok(())
    }
}
