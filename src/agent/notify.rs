//! Push-triggered notifications.

use serde::Serialize;

use crate::config::NotificationConfig;

/// Vibration pattern in milliseconds (on, off, on).
const VIBRATE_PATTERN: [u32; 3] = [200, 100, 200];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
  /// Navigation target of the `open` action
  pub url: String,
}

/// A display request handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  /// Build the notification for a push, using `payload` as body when present.
  pub fn for_push(config: &NotificationConfig, payload: Option<&str>) -> Self {
    Self {
      title: config.title.clone(),
      body: payload.unwrap_or(&config.default_body).to_string(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: VIBRATE_PATTERN.to_vec(),
      data: NotificationData {
        url: config.url.clone(),
      },
      actions: vec![
        NotificationAction {
          action: "open".to_string(),
          title: "Open".to_string(),
          icon: config.icon.clone(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "Close".to_string(),
          icon: config.badge.clone(),
        },
      ],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_payload_becomes_body() {
    let config = NotificationConfig::default();
    let notification = Notification::for_push(&config, Some("New post: Rust"));
    assert_eq!(notification.body, "New post: Rust");
    assert_eq!(notification.icon, "/logo.png");
    assert_eq!(notification.badge, "/favicon.ico");
    assert_eq!(notification.vibrate, vec![200, 100, 200]);
    assert_eq!(notification.data.url, "/");

    let actions: Vec<&str> = notification
      .actions
      .iter()
      .map(|a| a.action.as_str())
      .collect();
    assert_eq!(actions, vec!["open", "close"]);
  }

  #[test]
  fn test_default_body_without_payload() {
    let config = NotificationConfig::default();
    let notification = Notification::for_push(&config, None);
    assert_eq!(notification.body, config.default_body);
  }
}
