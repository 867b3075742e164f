//! Static asset detection by URL.

use url::Url;

use crate::config::AssetsConfig;

pub const DEFAULT_EXTENSIONS: &[&str] = &[
  "png", "jpg", "jpeg", "gif", "svg", "ico", "css", "js", "woff", "woff2", "ttf",
];

pub const DEFAULT_PATH_MARKERS: &[&str] = &["/favicon", "/logo", "/apple-touch-icon"];

/// Content class of a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
  StaticAsset,
  Other,
}

/// Classifies URLs by path extension and well-known path substrings.
#[derive(Debug, Clone)]
pub struct AssetClassifier {
  /// Lowercased, each with a leading dot
  suffixes: Vec<String>,
  /// Lowercased
  markers: Vec<String>,
}

impl AssetClassifier {
  pub fn new(config: &AssetsConfig) -> Self {
    Self {
      suffixes: config
        .extensions
        .iter()
        .map(|ext| format!(".{}", ext.trim_start_matches('.').to_lowercase()))
        .collect(),
      markers: config
        .path_markers
        .iter()
        .map(|marker| marker.to_lowercase())
        .collect(),
    }
  }

  pub fn classify(&self, url: &Url) -> AssetClass {
    let path = url.path().to_lowercase();
    let is_static = self.suffixes.iter().any(|suffix| path.ends_with(suffix))
      || self.markers.iter().any(|marker| path.contains(marker));

    if is_static {
      AssetClass::StaticAsset
    } else {
      AssetClass::Other
    }
  }
}

impl Default for AssetClassifier {
  fn default() -> Self {
    Self::new(&AssetsConfig::default())
  }
}
