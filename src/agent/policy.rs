//! Retrieval policy: decides, per intercepted request, whether the answer
//! comes from the network or from the cache, and what gets cached.

use color_eyre::{Report, Result};
use reqwest::Method;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::classify::{AssetClass, AssetClassifier};
use super::offline::offline_response;
use crate::cache::{CacheStore, PartitionManager, PartitionRole, RequestKey, ResponseSource};
use crate::http::{Network, Request, Response};

/// Outcome of handing a request to the agent.
#[derive(Debug)]
pub enum FetchDecision {
  /// Not intercepted; the host should perform the request itself.
  Passthrough,
  /// Answered by the agent.
  Respond(Retrieval),
}

/// A response produced by the agent.
#[derive(Debug)]
pub struct Retrieval {
  pub response: Response,
  pub source: ResponseSource,
  /// Background cache write started for this response, if any. Its result
  /// is only logged.
  pub pending_write: Option<JoinHandle<()>>,
}

impl Retrieval {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      pending_write: None,
    }
  }

  /// Wait for the background write, if any, to settle.
  pub async fn flush(&mut self) {
    if let Some(handle) = self.pending_write.take() {
      if let Err(e) = handle.await {
        warn!(error = %e, "Cache write task did not complete");
      }
    }
  }
}

/// Network-first for documents, cache-first for everything else.
pub struct RetrievalPolicy<S: CacheStore, N: Network> {
  partitions: PartitionManager<S>,
  network: Arc<N>,
  classifier: AssetClassifier,
  origin: Url,
  offline_html: String,
}

impl<S: CacheStore + 'static, N: Network> RetrievalPolicy<S, N> {
  pub fn new(
    partitions: PartitionManager<S>,
    network: Arc<N>,
    classifier: AssetClassifier,
    origin: Url,
    offline_html: String,
  ) -> Self {
    Self {
      partitions,
      network,
      classifier,
      origin,
      offline_html,
    }
  }

  /// Handle one request. An error is a failed fetch surfaced to the caller.
  pub async fn handle(&self, request: &Request) -> Result<FetchDecision> {
    if request.method != Method::GET || !request.is_same_origin(&self.origin) {
      debug!(method = %request.method, url = %request.url, "Passing request through");
      return Ok(FetchDecision::Passthrough);
    }

    let retrieval = if request.expects_document() {
      self.network_first(request).await?
    } else {
      self.cache_first(request).await?
    };

    Ok(FetchDecision::Respond(retrieval))
  }

  async fn network_first(&self, request: &Request) -> Result<Retrieval> {
    match self.network.fetch(request).await {
      Ok(response) => Ok(self.from_network(request, response, PartitionRole::Static)),
      Err(error) => self.recover_document(request, error).await,
    }
  }

  async fn cache_first(&self, request: &Request) -> Result<Retrieval> {
    let key = request.cache_key();
    if let Some(snapshot) = self.partitions.match_any(&key).await {
      debug!(url = %request.url, "Serving from cache");
      return Ok(Retrieval::new(snapshot.into(), ResponseSource::Cache));
    }

    debug!(url = %request.url, "Fetching from network");
    match self.network.fetch(request).await {
      Ok(response) => {
        let role = match self.classifier.classify(&request.url) {
          AssetClass::StaticAsset => PartitionRole::Static,
          AssetClass::Other => PartitionRole::Dynamic,
        };
        Ok(self.from_network(request, response, role))
      }
      Err(error) => {
        warn!(url = %request.url, error = %error, "Network fetch failed");
        Err(error)
      }
    }
  }

  /// Return a network response, caching a copy in the background when it is
  /// cacheable.
  fn from_network(&self, request: &Request, response: Response, role: PartitionRole) -> Retrieval {
    let mut retrieval = Retrieval::new(response, ResponseSource::Network);
    if retrieval.response.is_cacheable() {
      let snapshot = retrieval.response.snapshot();
      retrieval.pending_write = Some(
        self
          .partitions
          .put_detached(role, request.cache_key(), snapshot),
      );
    } else {
      debug!(
        url = %request.url,
        status = retrieval.response.status,
        kind = retrieval.response.kind.as_str(),
        "Response not cacheable"
      );
    }
    retrieval
  }

  /// Fallback chain for a document whose network fetch failed: the cached
  /// request, then the cached root document, then the offline page.
  async fn recover_document(&self, request: &Request, error: Report) -> Result<Retrieval> {
    warn!(url = %request.url, error = %error, "Network fetch failed");

    if let Some(snapshot) = self.partitions.match_any(&request.cache_key()).await {
      return Ok(Retrieval::new(snapshot.into(), ResponseSource::Cache));
    }

    let root = RequestKey::for_url(&self.origin.join("/")?);
    if let Some(snapshot) = self.partitions.match_any(&root).await {
      debug!(url = %request.url, "Serving cached root document");
      return Ok(Retrieval::new(snapshot.into(), ResponseSource::RootFallback));
    }

    Ok(Retrieval::new(
      offline_response(&self.offline_html),
      ResponseSource::Offline,
    ))
  }
}
