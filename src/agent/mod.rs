//! The interception agent.
//!
//! [`Agent`] exposes one method per event the host delivers:
//! - lifecycle: [`Agent::on_install`], [`Agent::on_activate`]
//! - requests: [`Agent::on_fetch`]
//! - control messages: [`Agent::on_message`]
//! - push: [`Agent::on_push`], [`Agent::on_notification_click`], [`Agent::on_sync`]
//!
//! Collaborators (cache store, network, client host) are injected, so the
//! whole agent can be driven without a host runtime.

mod classify;
mod control;
mod lifecycle;
mod notify;
mod offline;
mod policy;
mod reaper;

pub use classify::{AssetClassifier, DEFAULT_EXTENSIONS, DEFAULT_PATH_MARKERS};
pub use control::{Reply, ReplyChannel};
pub use lifecycle::Phase;
pub use notify::Notification;
pub use offline::DEFAULT_OFFLINE_HTML;
pub use policy::FetchDecision;
pub use reaper::ReapReport;

use control::ControlCommand;
use lifecycle::Lifecycle;
use policy::RetrievalPolicy;

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, PartitionManager, PartitionRole, RequestKey, ResponseSnapshot};
use crate::config::AgentConfig;
use crate::host::ClientHost;
use crate::http::{Network, Request};

/// Paths cached at install time unless configured otherwise.
pub const DEFAULT_MANIFEST: &[&str] = &[
  "/",
  "/favicon.ico",
  "/apple-touch-icon.png",
  "/logo.png",
  "/og-image.jpg",
];

/// Tag of the background sync the agent acknowledges.
const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Result of a completed install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
  /// Number of manifest entries written to the static partition
  pub cached: usize,
  /// Set when activation followed immediately
  pub activation: Option<ReapReport>,
  pub phase: Phase,
}

pub struct Agent<S: CacheStore, N: Network, H: ClientHost> {
  config: AgentConfig,
  partitions: PartitionManager<S>,
  policy: RetrievalPolicy<S, N>,
  network: Arc<N>,
  host: Arc<H>,
  lifecycle: Mutex<Lifecycle>,
}

impl<S, N, H> Agent<S, N, H>
where
  S: CacheStore + 'static,
  N: Network,
  H: ClientHost,
{
  pub fn new(config: AgentConfig, store: Arc<S>, network: Arc<N>, host: Arc<H>) -> Self {
    let partitions = PartitionManager::new(store, &config.namespace, &config.generation);
    let policy = RetrievalPolicy::new(
      partitions.clone(),
      Arc::clone(&network),
      AssetClassifier::new(&config.assets),
      config.origin.clone(),
      config.offline_html.clone(),
    );
    let lifecycle = Mutex::new(Lifecycle::new(config.skip_waiting));

    Self {
      config,
      partitions,
      policy,
      network,
      host,
      lifecycle,
    }
  }

  /// Continue from a phase reached by an earlier process.
  pub fn resume(self, phase: Phase) -> Self {
    let skip_waiting = self.config.skip_waiting;
    Self {
      lifecycle: Mutex::new(Lifecycle::resume(phase, skip_waiting)),
      ..self
    }
  }

  pub fn config(&self) -> &AgentConfig {
    &self.config
  }

  pub fn generation(&self) -> &str {
    &self.config.generation
  }

  pub fn partitions(&self) -> &PartitionManager<S> {
    &self.partitions
  }

  pub fn phase(&self) -> Result<Phase> {
    Ok(self.lifecycle()?.phase())
  }

  fn lifecycle(&self) -> Result<MutexGuard<'_, Lifecycle>> {
    self
      .lifecycle
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Populate the static partition from the manifest.
  ///
  /// Every manifest entry must be fetched successfully before anything is
  /// written, and the write is a single batch. On failure nothing is cached
  /// and the instance becomes redundant.
  pub async fn on_install(&self) -> Result<InstallOutcome> {
    self.lifecycle()?.begin_install()?;
    info!(generation = %self.config.generation, "Installing");

    let cached = match self.precache().await {
      Ok(cached) => cached,
      Err(e) => {
        error!(error = %e, "Failed to cache static files");
        self.lifecycle()?.finish_install(false);
        return Err(e);
      }
    };
    info!(count = cached, "Static files cached");

    let activate_now = self.lifecycle()?.finish_install(true);
    let activation = if activate_now {
      Some(self.on_activate().await?)
    } else {
      None
    };

    Ok(InstallOutcome {
      cached,
      activation,
      phase: self.phase()?,
    })
  }

  async fn precache(&self) -> Result<usize> {
    self.partitions.open(PartitionRole::Static).await?;

    let requests = self
      .config
      .manifest
      .iter()
      .map(|path| self.config.resolve(path).map(Request::get))
      .collect::<Result<Vec<_>>>()?;

    let entries: Vec<(RequestKey, ResponseSnapshot)> =
      try_join_all(requests.iter().map(|request| async move {
        let response = self.network.fetch(request).await?;
        if !response.is_ok() {
          return Err(eyre!(
            "Manifest entry {} returned status {}",
            request.url,
            response.status
          ));
        }
        Ok::<_, Report>((request.cache_key(), response.snapshot()))
      }))
      .await?;

    let count = entries.len();
    self
      .partitions
      .populate(PartitionRole::Static, entries)
      .await?;
    Ok(count)
  }

  /// Reap stale generations, then claim clients.
  ///
  /// Neither a failed enumeration nor a failed deletion prevents the claim.
  pub async fn on_activate(&self) -> Result<ReapReport> {
    self.lifecycle()?.begin_activate()?;
    info!(generation = %self.config.generation, "Activating");

    let report = match reaper::reap_stale(&self.partitions).await {
      Ok(report) => report,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate partitions for reaping");
        ReapReport::default()
      }
    };

    if let Err(e) = self.host.claim(&self.config.generation) {
      warn!(error = %e, "Failed to claim clients");
    }

    self.lifecycle()?.finish_activate();
    info!(
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      "Activated"
    );
    Ok(report)
  }

  /// Handle an intercepted request.
  pub async fn on_fetch(&self, request: &Request) -> Result<FetchDecision> {
    self.policy.handle(request).await
  }

  /// Handle a control message. Malformed messages are ignored.
  pub async fn on_message(&self, message: &Value, reply_to: Option<ReplyChannel>) -> Result<()> {
    let Some(command) = ControlCommand::parse(message) else {
      return Ok(());
    };
    debug!(?command, "Control message received");

    match command {
      ControlCommand::SkipWait => {
        let activate_now = self.lifecycle()?.skip_waiting();
        if activate_now {
          self.on_activate().await?;
        }
      }
      ControlCommand::GetVersion => {
        control::send_reply(
          reply_to,
          Reply::Version {
            version: self.config.generation.clone(),
          },
        );
      }
      ControlCommand::ClearCache => {
        let success = self.clear_all().await;
        control::send_reply(reply_to, Reply::Cleared { success });
      }
    }

    Ok(())
  }

  /// Delete every partition in the namespace, all generations included.
  async fn clear_all(&self) -> bool {
    let names = match self.partitions.list_all().await {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate partitions for purge");
        return false;
      }
    };

    let results = reaper::delete_all(&self.partitions, &names).await;
    info!(count = names.len(), "Cleared cache partitions");
    results.into_iter().all(|deleted| deleted)
  }

  /// Show a notification for a push message.
  pub fn on_push(&self, payload: Option<&str>) -> Result<Notification> {
    info!("Push notification received");
    let notification = Notification::for_push(&self.config.notification, payload);
    self.host.show_notification(&notification)?;
    Ok(notification)
  }

  /// Handle a click on a shown notification. Only the `open` action
  /// navigates; returns whether a window was opened.
  pub fn on_notification_click(&self, action: Option<&str>, url: Option<&str>) -> Result<bool> {
    if action != Some("open") {
      debug!(?action, "Notification dismissed");
      return Ok(false);
    }

    let target = self
      .config
      .resolve(url.unwrap_or(&self.config.notification.url))?;
    self.host.open_window(&target)?;
    Ok(true)
  }

  /// Handle a background sync. Returns whether the tag was recognised.
  pub fn on_sync(&self, tag: &str) -> bool {
    if tag == BACKGROUND_SYNC_TAG {
      info!(tag, "Performing background sync");
      true
    } else {
      debug!(tag, "Ignoring unknown sync tag");
      false
    }
  }
}
