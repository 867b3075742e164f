use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::agent::{
  DEFAULT_EXTENSIONS, DEFAULT_MANIFEST, DEFAULT_OFFLINE_HTML, DEFAULT_PATH_MARKERS,
};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin whose requests are intercepted (e.g. https://blog.example)
  pub origin: Url,
  /// Current deployment tag; may also come from --generation or the environment
  pub generation: Option<String>,
  /// Prefix shared by every partition this agent owns
  #[serde(default = "default_namespace")]
  pub namespace: String,
  /// Paths cached at install time, in order
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  #[serde(default)]
  pub assets: AssetsConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub notification: NotificationConfig,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub log: LogConfig,
}

fn default_namespace() -> String {
  "cachewarden-".to_string()
}

fn default_manifest() -> Vec<String> {
  to_strings(DEFAULT_MANIFEST)
}

fn to_strings(items: &[&str]) -> Vec<String> {
  items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetsConfig {
  /// File extensions treated as static assets (case-insensitive)
  #[serde(default = "default_extensions")]
  pub extensions: Vec<String>,
  /// Path substrings treated as static assets (case-insensitive)
  #[serde(default = "default_path_markers")]
  pub path_markers: Vec<String>,
}

impl Default for AssetsConfig {
  fn default() -> Self {
    Self {
      extensions: default_extensions(),
      path_markers: default_path_markers(),
    }
  }
}

fn default_extensions() -> Vec<String> {
  to_strings(DEFAULT_EXTENSIONS)
}

fn default_path_markers() -> Vec<String> {
  to_strings(DEFAULT_PATH_MARKERS)
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfflineConfig {
  /// Body of the page served when a document is unavailable offline
  #[serde(default = "default_offline_html")]
  pub html: String,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      html: default_offline_html(),
    }
  }
}

fn default_offline_html() -> String {
  DEFAULT_OFFLINE_HTML.to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  /// Body used when a push carries no payload
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Where the `open` action navigates
  pub url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "Update available".to_string(),
      default_body: "New content is available.".to_string(),
      icon: "/logo.png".to_string(),
      badge: "/favicon.ico".to_string(),
      url: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
  /// Activate right after install instead of waiting for the old instance
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self { skip_waiting: true }
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  /// Filter directive, overridden by CACHEWARDEN_LOG
  #[serde(default = "default_log_filter")]
  pub filter: String,
  /// Directory for daily rolling log files; stderr only when unset
  pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: default_log_filter(),
      dir: None,
    }
  }
}

fn default_log_filter() -> String {
  "info".to_string()
}

/// Settings the agent runs with, resolved from file, environment and flags.
#[derive(Debug, Clone)]
pub struct AgentConfig {
  pub origin: Url,
  pub generation: String,
  pub namespace: String,
  pub manifest: Vec<String>,
  pub assets: AssetsConfig,
  pub offline_html: String,
  pub notification: NotificationConfig,
  pub skip_waiting: bool,
}

impl AgentConfig {
  /// Defaults for everything but origin and generation.
  #[cfg(test)]
  pub fn new(origin: Url, generation: impl Into<String>) -> Self {
    Self {
      origin,
      generation: generation.into(),
      namespace: default_namespace(),
      manifest: default_manifest(),
      assets: AssetsConfig::default(),
      offline_html: default_offline_html(),
      notification: NotificationConfig::default(),
      skip_waiting: true,
    }
  }

  /// Resolve an origin-relative path to an absolute URL.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}' for origin {}: {}", path, self.origin, e))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachewarden.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachewarden/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cachewarden/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachewarden.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachewarden").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))
  }

  /// Resolve the agent settings.
  ///
  /// The generation is taken from `generation_override`, then
  /// CACHEWARDEN_GENERATION, then the config file.
  pub fn into_agent_config(self, generation_override: Option<String>) -> Result<AgentConfig> {
    let generation = generation_override
      .or_else(|| std::env::var("CACHEWARDEN_GENERATION").ok())
      .or(self.generation)
      .filter(|g| !g.trim().is_empty())
      .ok_or_else(|| {
        eyre!(
          "No cache generation configured. Set `generation` in the config file, \
           CACHEWARDEN_GENERATION, or pass --generation."
        )
      })?;

    Ok(AgentConfig {
      origin: self.origin,
      generation,
      namespace: self.namespace,
      manifest: self.manifest,
      assets: self.assets,
      offline_html: self.offline.html,
      notification: self.notification,
      skip_waiting: self.lifecycle.skip_waiting,
    })
  }
}
