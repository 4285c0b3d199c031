//! Push notification rendering and click routing.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::config::NotificationsConfig;
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
  /// Open the app
  Explore,
  Close,
}

impl NotificationAction {
  pub fn parse(action: &str) -> Option<Self> {
    match action {
      "explore" => Some(NotificationAction::Explore),
      "close" => Some(NotificationAction::Close),
      _ => None,
    }
  }

  pub fn id(&self) -> &'static str {
    match self {
      NotificationAction::Explore => "explore",
      NotificationAction::Close => "close",
    }
  }

  pub fn title(&self) -> &'static str {
    match self {
      NotificationAction::Explore => "View workshops",
      NotificationAction::Close => "Close",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionButton {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u64,
}

/// A rendered notification ready for the host to display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
  pub tag: String,
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub actions: Vec<ActionButton>,
  pub data: NotificationData,
}

pub struct NotificationDispatcher<H: Host> {
  settings: NotificationsConfig,
  origin: Url,
  host: Arc<H>,
  next_key: AtomicU64,
}

impl<H: Host> NotificationDispatcher<H> {
  pub fn new(settings: NotificationsConfig, origin: Url, host: Arc<H>) -> Self {
    Self {
      settings,
      origin,
      host,
      next_key: AtomicU64::new(1),
    }
  }

  /// Render an inbound push and hand it to the host.
  ///
  /// The payload is plain text; a missing or blank one uses the default body.
  pub fn on_push(&self, data: Option<&[u8]>) -> Result<NotificationPayload> {
    let body = data
      .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
      .filter(|text| !text.is_empty())
      .unwrap_or_else(|| self.settings.default_body.clone());

    let primary_key = self.next_key.fetch_add(1, Ordering::Relaxed);
    let actions = [NotificationAction::Explore, NotificationAction::Close]
      .iter()
      .map(|action| ActionButton {
        action: action.id().to_string(),
        title: action.title().to_string(),
        icon: self.settings.icon.clone(),
      })
      .collect();

    let payload = NotificationPayload {
      tag: format!("push-{}", primary_key),
      title: self.settings.title.clone(),
      body,
      icon: self.settings.icon.clone(),
      badge: self.settings.badge.clone(),
      vibrate: self.settings.vibrate.clone(),
      actions,
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key,
      },
    };

    self.host.show_notification(&payload)?;
    Ok(payload)
  }

  /// Close the notification; only the explore action navigates.
  pub fn on_click(&self, tag: &str, action: Option<&str>) -> Result<()> {
    self.host.close_notification(tag);

    match action.and_then(NotificationAction::parse) {
      Some(NotificationAction::Explore) => {
        let url = self
          .origin
          .join(&self.settings.open_path)
          .map_err(|e| eyre!("Invalid notification path {}: {}", self.settings.open_path, e))?;
        self.host.open_window(&url)
      }
      other => {
        debug!(tag, action = ?other, "Notification dismissed");
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{HostEvent, RecordingHost};

  fn dispatcher(host: &Arc<RecordingHost>) -> NotificationDispatcher<RecordingHost> {
    NotificationDispatcher::new(
      NotificationsConfig::default(),
      Url::parse("https://app.test/").unwrap(),
      Arc::clone(host),
    )
  }

  #[test]
  fn test_push_with_text_body() {
    let host = Arc::new(RecordingHost::new());
    let payload = dispatcher(&host)
      .on_push(Some(b"Cello masterclass opens tomorrow".as_slice()))
      .unwrap();

    assert_eq!(payload.body, "Cello masterclass opens tomorrow");
    assert_eq!(payload.vibrate, vec![100, 50, 100]);
    let actions: Vec<&str> = payload.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["explore", "close"]);
    assert_eq!(host.events(), vec![HostEvent::Shown(payload)]);
  }

  #[test]
  fn test_push_without_body_uses_default() {
    let host = Arc::new(RecordingHost::new());
    let dispatcher = dispatcher(&host);

    let empty = dispatcher.on_push(None).unwrap();
    assert_eq!(empty.body, NotificationsConfig::default().default_body);

    let blank = dispatcher.on_push(Some(b"  \n".as_slice())).unwrap();
    assert_eq!(blank.body, NotificationsConfig::default().default_body);
    assert_ne!(empty.data.primary_key, blank.data.primary_key);
  }

  #[test]
  fn test_explore_click_opens_root() {
    let host = Arc::new(RecordingHost::new());
    dispatcher(&host).on_click("push-1", Some("explore")).unwrap();

    assert_eq!(
      host.events(),
      vec![
        HostEvent::Closed("push-1".into()),
        HostEvent::Opened("https://app.test/".into()),
      ]
    );
  }

  #[test]
  fn test_other_clicks_only_close() {
    let host = Arc::new(RecordingHost::new());
    let dispatcher = dispatcher(&host);
    dispatcher.on_click("push-1", Some("close")).unwrap();
    dispatcher.on_click("push-2", None).unwrap();
    dispatcher.on_click("push-3", Some("snooze")).unwrap();

    assert_eq!(
      host.events(),
      vec![
        HostEvent::Closed("push-1".into()),
        HostEvent::Closed("push-2".into()),
        HostEvent::Closed("push-3".into()),
      ]
    );
  }
}
