//! The client host: whatever runs the application's windows.

use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use url::Url;

use crate::agent::Notification;

/// Requests the agent makes of its host.
pub trait ClientHost: Send + Sync {
  /// Make `generation` authoritative for clients already in flight.
  fn claim(&self, generation: &str) -> Result<()>;

  /// Display a notification to the user.
  fn show_notification(&self, notification: &Notification) -> Result<()>;

  /// Focus or open a client window at `url`.
  fn open_window(&self, url: &Url) -> Result<()>;
}

/// Host for the command line: every request is printed to stdout as a JSON
/// line so callers can script against it.
pub struct ConsoleHost;

impl ConsoleHost {
  fn emit(&self, event: serde_json::Value) -> Result<()> {
    let line =
      serde_json::to_string(&event).map_err(|e| eyre!("Failed to encode host event: {}", e))?;
    println!("{}", line);
    Ok(())
  }
}

impl ClientHost for ConsoleHost {
  fn claim(&self, generation: &str) -> Result<()> {
    self.emit(json!({ "event": "claim", "generation": generation }))
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self.emit(json!({ "event": "notification", "notification": notification }))
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self.emit(json!({ "event": "open-window", "url": url.as_str() }))
  }
}
