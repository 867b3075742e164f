//! Partition manager: names, opens, reads, writes and deletes generation
//! stamped partitions on top of a [`CacheStore`].

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::storage::CacheStore;
use super::traits::{RequestKey, ResponseSnapshot};

/// Role of a partition within one generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
  /// Manifest entries, documents and static assets
  Static,
  /// Everything else fetched at runtime
  Dynamic,
}

impl PartitionRole {
  pub const ALL: [PartitionRole; 2] = [PartitionRole::Static, PartitionRole::Dynamic];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Static => "static",
      Self::Dynamic => "dynamic",
    }
  }
}

/// A parsed partition name: `{namespace}{role}-{generation}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionName {
  pub role: PartitionRole,
  pub generation: String,
}

impl PartitionName {
  pub fn format(namespace: &str, role: PartitionRole, generation: &str) -> String {
    format!("{}{}-{}", namespace, role.as_str(), generation)
  }

  /// Parse a store name. Returns `None` for names outside the namespace or
  /// not following the naming scheme.
  pub fn parse(namespace: &str, name: &str) -> Option<Self> {
    let rest = name.strip_prefix(namespace)?;
    PartitionRole::ALL.into_iter().find_map(|role| {
      let generation = rest.strip_prefix(role.as_str())?.strip_prefix('-')?;
      (!generation.is_empty()).then(|| Self {
        role,
        generation: generation.to_string(),
      })
    })
  }
}

impl fmt::Display for PartitionName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.role.as_str(), self.generation)
  }
}

/// Manages the partitions of one namespace on behalf of the current
/// generation.
///
/// Cheap to clone; clones share the underlying store.
pub struct PartitionManager<S: CacheStore> {
  store: Arc<S>,
  namespace: String,
  generation: String,
}

impl<S: CacheStore + 'static> PartitionManager<S> {
  pub fn new(store: Arc<S>, namespace: impl Into<String>, generation: impl Into<String>) -> Self {
    Self {
      store,
      namespace: namespace.into(),
      generation: generation.into(),
    }
  }

  /// Store name of the current generation's partition for `role`.
  pub fn name_for(&self, role: PartitionRole) -> String {
    PartitionName::format(&self.namespace, role, &self.generation)
  }

  /// Parse a store name within this manager's namespace.
  pub fn parse_name(&self, name: &str) -> Option<PartitionName> {
    PartitionName::parse(&self.namespace, name)
  }

  /// Whether a namespaced partition belongs to a superseded generation.
  /// Names that do not follow the scheme count as stale.
  pub fn is_stale(&self, name: &str) -> bool {
    self
      .parse_name(name)
      .map_or(true, |parsed| parsed.generation != self.generation)
  }

  /// Run a store operation on the blocking pool.
  async fn blocking<T, F>(&self, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T> + Send + 'static,
  {
    let store = Arc::clone(&self.store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
      .await
      .map_err(|e| eyre!("Cache store task failed: {}", e))?
  }

  /// Open (creating if absent) the current partition for `role`.
  pub async fn open(&self, role: PartitionRole) -> Result<String> {
    let name = self.name_for(role);
    let partition = name.clone();
    self.blocking(move |store| store.open(&partition)).await?;
    Ok(name)
  }

  /// Best-effort write. Failures are logged, never returned.
  pub async fn put(&self, role: PartitionRole, key: RequestKey, snapshot: ResponseSnapshot) {
    let partition = self.name_for(role);
    let target = partition.clone();
    let logged_key = key.clone();
    match self
      .blocking(move |store| store.put(&target, &key, &snapshot))
      .await
    {
      Ok(()) => debug!(partition = %partition, key = %logged_key, "Cached response"),
      Err(e) => warn!(partition = %partition, key = %logged_key, error = %e, "Cache write failed"),
    }
  }

  /// Submit a best-effort write as a background task and return at once.
  ///
  /// The handle resolves when the write has settled; nothing on the response
  /// path waits for it.
  pub fn put_detached(
    &self,
    role: PartitionRole,
    key: RequestKey,
    snapshot: ResponseSnapshot,
  ) -> JoinHandle<()> {
    let manager = self.clone();
    tokio::spawn(async move { manager.put(role, key, snapshot).await })
  }

  /// Atomically write a batch into the current partition for `role`.
  pub async fn populate(
    &self,
    role: PartitionRole,
    entries: Vec<(RequestKey, ResponseSnapshot)>,
  ) -> Result<()> {
    let partition = self.name_for(role);
    self
      .blocking(move |store| store.put_all(&partition, &entries))
      .await
  }

  /// Look up `key` in a single partition. Read failures count as a miss.
  pub async fn get(&self, partition: &str, key: &RequestKey) -> Option<ResponseSnapshot> {
    let target = partition.to_string();
    let lookup = key.clone();
    match self
      .blocking(move |store| store.get(&target, &lookup))
      .await
    {
      Ok(Some(cached)) => {
        debug!(partition = %partition, key = %key, cached_at = %cached.cached_at, "Cache hit");
        Some(cached.snapshot)
      }
      Ok(None) => None,
      Err(e) => {
        warn!(partition = %partition, key = %key, error = %e, "Cache read failed");
        None
      }
    }
  }

  /// Look up `key` across partitions: the current static and dynamic ones
  /// first, then any older namespaced partitions still awaiting reaping.
  pub async fn match_any(&self, key: &RequestKey) -> Option<ResponseSnapshot> {
    let current: Vec<String> = PartitionRole::ALL
      .into_iter()
      .map(|role| self.name_for(role))
      .collect();

    for partition in &current {
      if let Some(found) = self.get(partition, key).await {
        return Some(found);
      }
    }

    let others = match self.list_all().await {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate partitions");
        return None;
      }
    };

    for partition in others.iter().filter(|name| !current.contains(name)) {
      if let Some(found) = self.get(partition, key).await {
        debug!(partition = %partition, key = %key, "Served from superseded partition");
        return Some(found);
      }
    }

    None
  }

  /// Every partition under this namespace, any generation.
  pub async fn list_all(&self) -> Result<Vec<String>> {
    let namespace = self.namespace.clone();
    let names = self.blocking(|store| store.list_names()).await?;
    Ok(
      names
        .into_iter()
        .filter(|name| name.starts_with(&namespace))
        .collect(),
    )
  }

  /// Delete a partition and all of its entries.
  pub async fn delete(&self, name: &str) -> Result<bool> {
    let partition = name.to_string();
    self.blocking(move |store| store.delete(&partition)).await
  }
}

impl<S: CacheStore> Clone for PartitionManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      namespace: self.namespace.clone(),
      generation: self.generation.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::ResponseKind;
  use crate::testing::MemoryStorage;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    RequestKey::for_url(&Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  fn snapshot(body: &str) -> ResponseSnapshot {
    ResponseSnapshot {
      status: 200,
      status_text: "OK".to_string(),
      headers: Vec::new(),
      body: body.as_bytes().to_vec(),
      kind: ResponseKind::Basic,
    }
  }

  #[test]
  fn test_partition_name_round_trip() {
    let name = PartitionName::format("app-", PartitionRole::Dynamic, "v2");
    assert_eq!(name, "app-dynamic-v2");
    assert_eq!(
      PartitionName::parse("app-", &name),
      Some(PartitionName {
        role: PartitionRole::Dynamic,
        generation: "v2".to_string(),
      })
    );
  }

  #[test]
  fn test_partition_name_rejects_foreign_names() {
    assert_eq!(PartitionName::parse("app-", "other-static-v1"), None);
    assert_eq!(PartitionName::parse("app-", "app-images-v1"), None);
    assert_eq!(PartitionName::parse("app-", "app-static-"), None);
  }

  #[test]
  fn test_is_stale_compares_whole_generation() {
    let manager = PartitionManager::new(Arc::new(MemoryStorage::default()), "app-", "v1");
    assert!(!manager.is_stale("app-static-v1"));
    assert!(manager.is_stale("app-static-v10"));
    assert!(manager.is_stale("app-dynamic-v0"));
    assert!(manager.is_stale("app-legacy"));
  }

  #[tokio::test]
  async fn test_list_all_filters_namespace() {
    let store = Arc::new(MemoryStorage::default());
    store.open("app-static-v1").unwrap();
    store.open("someone-else").unwrap();
    let manager = PartitionManager::new(store, "app-", "v1");

    manager.open(PartitionRole::Dynamic).await.unwrap();

    assert_eq!(
      manager.list_all().await.unwrap(),
      vec!["app-dynamic-v1", "app-static-v1"]
    );
  }

  #[tokio::test]
  async fn test_put_detached_round_trip() {
    let store = Arc::new(MemoryStorage::default());
    let manager = PartitionManager::new(store, "app-", "v1");

    manager
      .put_detached(PartitionRole::Static, key("/a.css"), snapshot("css"))
      .await
      .unwrap();

    let found = manager.get("app-static-v1", &key("/a.css")).await;
    assert_eq!(found, Some(snapshot("css")));
  }

  #[tokio::test]
  async fn test_put_failure_is_swallowed() {
    let store = Arc::new(MemoryStorage::default());
    store.fail_writes(true);
    let manager = PartitionManager::new(Arc::clone(&store), "app-", "v1");

    manager
      .put(PartitionRole::Dynamic, key("/api"), snapshot("{}"))
      .await;

    assert!(manager.match_any(&key("/api")).await.is_none());
  }

  #[tokio::test]
  async fn test_match_any_prefers_current_generation() {
    let store = Arc::new(MemoryStorage::default());
    store.put("app-static-v1", &key("/"), &snapshot("old")).unwrap();
    let manager = PartitionManager::new(Arc::clone(&store), "app-", "v2");

    // Only the superseded generation has it
    assert_eq!(manager.match_any(&key("/")).await, Some(snapshot("old")));

    manager
      .put(PartitionRole::Static, key("/"), snapshot("new"))
      .await;
    assert_eq!(manager.match_any(&key("/")).await, Some(snapshot("new")));
  }

  #[tokio::test]
  async fn test_match_any_ignores_foreign_partitions() {
    let store = Arc::new(MemoryStorage::default());
    store.put("elsewhere", &key("/"), &snapshot("x")).unwrap();
    let manager = PartitionManager::new(store, "app-", "v1");

    assert!(manager.match_any(&key("/")).await.is_none());
  }
}
