//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::ResponseKind;

/// Identity of a cached request (method + URL, GET only).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
  /// Key for a GET of the given URL. Fragments never reach the network, so
  /// they are not part of the identity.
  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("GET {}", url))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.0.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Immutable copy of a network response as written to a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub status_text: String,
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

/// A snapshot read back from storage.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
  pub snapshot: ResponseSnapshot,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
  /// Fresh response from network
  Network,
  /// Cached entry for the request itself
  Cache,
  /// Network unavailable, serving the cached root document instead
  RootFallback,
  /// Nothing available, serving the synthesized offline page
  Offline,
}
