//! Deletion of partitions left behind by superseded generations.

use color_eyre::Result;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CacheStore, PartitionManager};

/// What a reaping pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReapReport {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
}

/// Delete every namespaced partition not stamped with the current generation.
///
/// Deletions run concurrently. A failed deletion is logged and recorded in
/// the report; it never stops the others.
pub async fn reap_stale<S: CacheStore + 'static>(
  partitions: &PartitionManager<S>,
) -> Result<ReapReport> {
  let stale: Vec<String> = partitions
    .list_all()
    .await?
    .into_iter()
    .filter(|name| partitions.is_stale(name))
    .collect();

  let results = delete_all(partitions, &stale).await;

  let mut report = ReapReport::default();
  for (name, deleted) in stale.into_iter().zip(results) {
    if deleted {
      info!(partition = %name, "Deleted stale partition");
      report.deleted.push(name);
    } else {
      report.failed.push(name);
    }
  }

  Ok(report)
}

/// Delete `names` concurrently; one flag per name, true when it is gone.
pub(crate) async fn delete_all<S: CacheStore + 'static>(
  partitions: &PartitionManager<S>,
  names: &[String],
) -> Vec<bool> {
  join_all(names.iter().map(|name| async move {
    match partitions.delete(name).await {
      Ok(_) => true,
      Err(e) => {
        warn!(partition = %name, error = %e, "Failed to delete partition");
        false
      }
    }
  }))
  .await
}
