//! Push notifications and click routing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{PushConfig, WorkerConfig};
use crate::error::Result;
use crate::host::WorkerHost;

/// Action id that opens the portfolio view.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    pub date_of_arrival: DateTime<Utc>,
    pub primary_key: u32,
}

/// A system notification as handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Builds the notification shown for a push with the given body.
    #[must_use]
    pub fn build(config: &PushConfig, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: Utc::now(),
                primary_key: 1,
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_EXPLORE.to_string(),
                    title: config.explore_title.clone(),
                    icon: config.action_icon.clone(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: config.close_title.clone(),
                    icon: config.action_icon.clone(),
                },
            ],
        }
    }
}

/// What a notification click resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    /// Open a window at this URL.
    Open(Url),
    /// Only close the notification.
    Dismiss,
}

/// Turns push payloads into notifications and routes clicks on them.
pub struct PushPresenter {
    config: PushConfig,
    root: Url,
    explore: Url,
    host: Arc<dyn WorkerHost>,
}

impl PushPresenter {
    /// Creates a presenter for the site described by `worker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root or explore URL does not resolve.
    pub fn new(config: PushConfig, worker: &WorkerConfig, host: Arc<dyn WorkerHost>) -> Result<Self> {
        let root = worker.resolve(&worker.root_url)?;
        let explore = worker.resolve(&config.explore_url)?;
        Ok(Self {
            config,
            root,
            explore,
            host,
        })
    }

    /// Body text for a push payload. Absent, empty or whitespace-only
    /// payloads fall back to the configured default.
    #[must_use]
    pub fn body_for(&self, payload: Option<&[u8]>) -> String {
        payload
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| self.config.default_body.clone())
    }

    /// Shows a notification for an inbound push.
    ///
    /// # Errors
    ///
    /// Returns the host's error if it cannot display the notification.
    pub async fn handle_push(&self, payload: Option<&[u8]>) -> Result<Notification> {
        let notification = Notification::build(&self.config, self.body_for(payload));
        if let Err(e) = self.host.show_notification(&notification).await {
            log::error!("Failed to show notification: {e}");
            return Err(e);
        }
        Ok(notification)
    }

    /// Resolves a clicked action to its target.
    #[must_use]
    pub fn target_for(&self, action: Option<&str>) -> ClickTarget {
        match action {
            Some(ACTION_EXPLORE) => ClickTarget::Open(self.explore.clone()),
            Some(ACTION_CLOSE) => ClickTarget::Dismiss,
            _ => ClickTarget::Open(self.root.clone()),
        }
    }

    /// Closes the clicked notification and opens at most one window.
    /// Returns the URL opened, if any.
    ///
    /// # Errors
    ///
    /// Returns the host's error if the window cannot be opened. A failure to
    /// close the notification is only logged.
    pub async fn handle_notification_click(
        &self,
        notification_id: Uuid,
        action: Option<&str>,
    ) -> Result<Option<Url>> {
        if let Err(e) = self.host.close_notification(notification_id).await {
            log::warn!("Failed to close notification {notification_id}: {e}");
        }
        match self.target_for(action) {
            ClickTarget::Open(url) => {
                self.host.open_window(&url).await?;
                Ok(Some(url))
            }
            ClickTarget::Dismiss => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingHost;

    fn presenter(host: Arc<RecordingHost>) -> PushPresenter {
        let worker = WorkerConfig::new().with_origin("https://site.test");
        PushPresenter::new(PushConfig::default(), &worker, host).unwrap()
    }

    #[tokio::test]
    async fn push_with_payload_uses_payload() {
        let host = Arc::new(RecordingHost::new());
        let p = presenter(Arc::clone(&host));
        let n = p.handle_push(Some(b"  New project published ".as_slice())).await.unwrap();

        assert_eq!(n.body, "New project published");
        assert_eq!(n.title, "Milewska Design");
        assert_eq!(n.vibrate, vec![100, 50, 100]);
        assert_eq!(n.data.primary_key, 1);
        let actions: Vec<_> = n.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["explore", "close"]);
        assert_eq!(host.notifications().len(), 1);
    }

    #[tokio::test]
    async fn push_without_payload_uses_default_body() {
        let host = Arc::new(RecordingHost::new());
        let p = presenter(Arc::clone(&host));
        assert_eq!(
            p.handle_push(None).await.unwrap().body,
            "Nowa wiadomość od Milewska Design"
        );
        assert_eq!(
            p.handle_push(Some(b"   ".as_slice())).await.unwrap().body,
            "Nowa wiadomość od Milewska Design"
        );
        assert_eq!(host.notifications().len(), 2);
    }

    #[tokio::test]
    async fn push_with_invalid_utf8_still_shows() {
        let host = Arc::new(RecordingHost::new());
        let p = presenter(Arc::clone(&host));
        let n = p.handle_push(Some([0xff, b'h', b'i'].as_slice())).await.unwrap();
        assert!(n.body.ends_with("hi"));
    }

    #[tokio::test]
    async fn explore_opens_portfolio() {
        let host = Arc::new(RecordingHost::new());
        let p = presenter(Arc::clone(&host));
        let id = Uuid::new_v4();
        let opened = p.handle_notification_click(id, Some("explore")).await.unwrap();

        assert_eq!(opened.unwrap().as_str(), "https://site.test/#portfolio");
        assert_eq!(host.closed(), vec![id]);
        assert_eq!(host.windows().len(), 1);
    }

    #[tokio::test]
    async fn close_opens_nothing() {
        let host = Arc::new(RecordingHost::new());
        let p = presenter(Arc::clone(&host));
        let id = Uuid::new_v4();
        assert!(p.handle_notification_click(id, Some("close")).await.unwrap().is_none());
        assert_eq!(host.closed(), vec![id]);
        assert!(host.windows().is_empty());
    }

    #[tokio::test]
    async fn unknown_or_missing_action_opens_root() {
        let host = Arc::new(RecordingHost::new());
        let p = presenter(Arc::clone(&host));
        let a = p
            .handle_notification_click(Uuid::new_v4(), Some("archive"))
            .await
            .unwrap();
        let b = p.handle_notification_click(Uuid::new_v4(), None).await.unwrap();

        assert_eq!(a.unwrap().as_str(), "https://site.test/");
        assert_eq!(b.unwrap().as_str(), "https://site.test/");
        assert_eq!(host.windows().len(), 2);
    }
}
