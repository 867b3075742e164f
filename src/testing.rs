//! Test doubles for the agent's collaborators.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::agent::Notification;
use crate::cache::{CacheStore, CachedSnapshot, RequestKey, ResponseSnapshot};
use crate::host::ClientHost;
use crate::http::{Network, Request, Response, ResponseKind};

/// In-memory cache store with fault injection.
#[derive(Default)]
pub struct MemoryStorage {
  partitions: Mutex<BTreeMap<String, HashMap<RequestKey, CachedSnapshot>>>,
  failing_deletes: Mutex<HashSet<String>>,
  fail_writes: AtomicBool,
  fail_opens: AtomicBool,
}

impl MemoryStorage {
  pub fn fail_writes(&self, fail: bool) {
    self.fail_writes.store(fail, Ordering::SeqCst);
  }

  pub fn fail_opens(&self, fail: bool) {
    self.fail_opens.store(fail, Ordering::SeqCst);
  }

  pub fn fail_delete_of(&self, partition: &str) {
    self.failing_deletes.lock().unwrap().insert(partition.to_string());
  }

  pub fn entry_count(&self, partition: &str) -> usize {
    self
      .partitions
      .lock()
      .unwrap()
      .get(partition)
      .map_or(0, HashMap::len)
  }
}

impl CacheStore for MemoryStorage {
  fn open(&self, partition: &str) -> Result<()> {
    if self.fail_opens.load(Ordering::SeqCst) {
      return Err(eyre!("store unavailable"));
    }
    self
      .partitions
      .lock()
      .unwrap()
      .entry(partition.to_string())
      .or_default();
    Ok(())
  }

  fn put(&self, partition: &str, key: &RequestKey, snapshot: &ResponseSnapshot) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    self
      .partitions
      .lock()
      .unwrap()
      .entry(partition.to_string())
      .or_default()
      .insert(
        key.clone(),
        CachedSnapshot {
          snapshot: snapshot.clone(),
          cached_at: Utc::now(),
        },
      );
    Ok(())
  }

  fn put_all(&self, partition: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    let mut partitions = self.partitions.lock().unwrap();
    let target = partitions.entry(partition.to_string()).or_default();
    for (key, snapshot) in entries {
      target.insert(
        key.clone(),
        CachedSnapshot {
          snapshot: snapshot.clone(),
          cached_at: Utc::now(),
        },
      );
    }
    Ok(())
  }

  fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedSnapshot>> {
    Ok(
      self
        .partitions
        .lock()
        .unwrap()
        .get(partition)
        .and_then(|entries| entries.get(key))
        .cloned(),
    )
  }

  fn list_names(&self) -> Result<Vec<String>> {
    Ok(self.partitions.lock().unwrap().keys().cloned().collect())
  }

  fn delete(&self, partition: &str) -> Result<bool> {
    if self.failing_deletes.lock().unwrap().contains(partition) {
      return Err(eyre!("partition {} is locked", partition));
    }
    Ok(self.partitions.lock().unwrap().remove(partition).is_some())
  }
}

/// Scripted network. Unknown URLs answer 404; `set_offline(true)` makes
/// every fetch fail.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, Response>>,
  calls: Mutex<Vec<String>>,
  offline: AtomicBool,
}

impl FakeNetwork {
  pub fn route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// URLs fetched so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Network fetch failed for {}: offline", url));
    }

    let found = self.routes.lock().unwrap().get(&url).cloned();
    Ok(found.unwrap_or_else(|| Response {
      status: 404,
      status_text: "Not Found".to_string(),
      headers: Vec::new(),
      body: Vec::new(),
      kind: ResponseKind::Basic,
    }))
  }
}

/// Something the agent asked the host to do.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
  Claim(String),
  Notification(Notification),
  OpenWindow(String),
}

/// Host that records every request.
#[derive(Default)]
pub struct RecordingHost {
  events: Mutex<Vec<HostEvent>>,
  fail_claim: AtomicBool,
}

impl RecordingHost {
  pub fn events(&self) -> Vec<HostEvent> {
    self.events.lock().unwrap().clone()
  }

  pub fn fail_claim(&self, fail: bool) {
    self.fail_claim.store(fail, Ordering::SeqCst);
  }
}

impl ClientHost for RecordingHost {
  fn claim(&self, generation: &str) -> Result<()> {
    if self.fail_claim.load(Ordering::SeqCst) {
      return Err(eyre!("no clients"));
    }
    self
      .events
      .lock()
      .unwrap()
      .push(HostEvent::Claim(generation.to_string()));
    Ok(())
  }

  fn show_notification(&self, notification: &Notification) -> Result<()> {
    self
      .events
      .lock()
      .unwrap()
      .push(HostEvent::Notification(notification.clone()));
    Ok(())
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self
      .events
      .lock()
      .unwrap()
      .push(HostEvent::OpenWindow(url.to_string()));
    Ok(())
  }
}

/// A 200 same-origin response with a content type.
pub fn ok_response(content_type: &str, body: &str) -> Response {
  Response {
    status: 200,
    status_text: "OK".to_string(),
    headers: vec![("content-type".to_string(), content_type.as_bytes().to_vec())],
    body: body.as_bytes().to_vec(),
    kind: ResponseKind::Basic,
  }
}
