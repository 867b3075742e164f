//! Substitute page for documents that cannot be served at all.

use crate::http::{Response, ResponseKind};

pub const DEFAULT_OFFLINE_HTML: &str =
  "<h1>Offline</h1><p>This page is not available while offline. Please try again later.</p>";

/// 503 HTML response carrying `html` as its body.
pub fn offline_response(html: &str) -> Response {
  Response {
    status: 503,
    status_text: "Service Unavailable".to_string(),
    headers: vec![("Content-Type".to_string(), b"text/html".to_vec())],
    body: html.as_bytes().to_vec(),
    kind: ResponseKind::Basic,
  }
}
