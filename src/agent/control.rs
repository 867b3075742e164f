//! Out-of-band commands from the application.
//!
//! Messages are JSON objects with a `type` field. Both the kebab-case names
//! (`skip-wait`, `get-version`, `clear-cache`) and the upper-case names older
//! clients send (`SKIP_WAITING`, `GET_VERSION`, `CLEAR_CACHE`) are accepted.
//! Anything else is ignored without a reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ControlCommand {
  /// Activate a waiting instance now
  #[serde(rename = "skip-wait", alias = "SKIP_WAITING")]
  SkipWait,
  /// Reply with the current generation
  #[serde(rename = "get-version", alias = "GET_VERSION")]
  GetVersion,
  /// Delete every partition in the namespace, then acknowledge
  #[serde(rename = "clear-cache", alias = "CLEAR_CACHE")]
  ClearCache,
}

#[derive(Deserialize)]
struct Envelope {
  #[serde(rename = "type")]
  command: ControlCommand,
}

impl ControlCommand {
  /// Parse a message; `None` for anything malformed or unknown.
  pub fn parse(message: &Value) -> Option<Self> {
    match Envelope::deserialize(message) {
      Ok(envelope) => Some(envelope.command),
      Err(e) => {
        debug!(error = %e, "Ignoring control message");
        None
      }
    }
  }
}

/// Reply sent back over a message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
  Version { version: String },
  Cleared { success: bool },
}

/// One-shot reply destination; a message can be answered at most once.
pub type ReplyChannel = oneshot::Sender<Reply>;

/// Send `reply` if the message carried a reply channel.
pub fn send_reply(reply_to: Option<ReplyChannel>, reply: Reply) {
  let Some(channel) = reply_to else {
    return;
  };
  if channel.send(reply).is_err() {
    debug!("Reply channel closed before reply was sent");
  }
}
