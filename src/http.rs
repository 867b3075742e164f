//! Request/response model and the network collaborator.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::future::Future;
use url::Url;

use crate::cache::{RequestKey, ResponseSnapshot};

/// Media type that marks a request as expecting a document.
const DOCUMENT_MEDIA_TYPE: &str = "text/html";

/// An intercepted request. Never persisted.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  /// Raw `Accept` header, if the client sent one
  pub accept: Option<String>,
}

impl Request {
  /// Create a GET request for the given URL.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      accept: None,
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
    self.accept = Some(accept.into());
    self
  }

  /// Whether the client declared it accepts document (HTML) content.
  pub fn expects_document(&self) -> bool {
    self
      .accept
      .as_deref()
      .is_some_and(|accept| accept.contains(DOCUMENT_MEDIA_TYPE))
  }

  pub fn is_same_origin(&self, origin: &Url) -> bool {
    self.url.origin() == origin.origin()
  }

  /// Key under which responses to this request are cached.
  pub fn cache_key(&self) -> RequestKey {
    RequestKey::for_url(&self.url)
  }
}

/// How a response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin response
  Basic,
  /// Cross-origin response with readable body
  Cors,
  /// Cross-origin response without readable body
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      other => Err(eyre!("Unknown response kind '{}'", other)),
    }
  }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  /// Header values as received; they need not be valid UTF-8
  pub headers: Vec<(String, Vec<u8>)>,
  pub body: Vec<u8>,
  pub kind: ResponseKind,
}

impl Response {
  /// Case-insensitive header lookup. Values that are not UTF-8 read as absent.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .and_then(|(_, v)| std::str::from_utf8(v).ok())
  }

  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only complete same-origin responses are written to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic
  }

  /// Clone into an immutable snapshot suitable for storage.
  pub fn snapshot(&self) -> ResponseSnapshot {
    ResponseSnapshot {
      status: self.status,
      status_text: self.status_text.clone(),
      headers: self.headers.clone(),
      body: self.body.clone(),
      kind: self.kind,
    }
  }
}

impl From<ResponseSnapshot> for Response {
  fn from(snapshot: ResponseSnapshot) -> Self {
    Self {
      status: snapshot.status,
      status_text: snapshot.status_text,
      headers: snapshot.headers,
      body: snapshot.body,
      kind: snapshot.kind,
    }
  }
}

/// The network, as seen by the agent.
///
/// A returned error means the request never produced a response (e.g. lost
/// connectivity). Error statuses are successful fetches.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// Network backed by a reqwest client.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("cachewarden/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());
    if let Some(accept) = &request.accept {
      builder = builder.header(reqwest::header::ACCEPT, accept);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network fetch failed for {}: {}", request.url, e))?;

    let status = response.status();
    // Redirects may land on another origin
    let kind = if response.url().origin() == request.url.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body for {}: {}", request.url, e))?;

    Ok(Response {
      status: status.as_u16(),
      status_text: status.canonical_reason().unwrap_or_default().to_string(),
      headers,
      body: body.to_vec(),
      kind,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_expects_document() {
    let request = Request::get(url("https://app.test/"))
      .with_accept("text/html,application/xhtml+xml,*/*;q=0.8");
    assert!(request.expects_document());

    let request = Request::get(url("https://app.test/api")).with_accept("application/json");
    assert!(!request.expects_document());

    assert!(!Request::get(url("https://app.test/")).expects_document());
  }

  #[test]
  fn test_same_origin() {
    let origin = url("https://app.test");
    assert!(Request::get(url("https://app.test/a/b?c=d")).is_same_origin(&origin));
    assert!(!Request::get(url("https://cdn.test/a")).is_same_origin(&origin));
    assert!(!Request::get(url("http://app.test/a")).is_same_origin(&origin));
  }

  #[test]
  fn test_cacheable_requires_ok_basic() {
    let mut response = Response {
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("Content-Type".to_string(), b"text/css".to_vec())],
      body: b"body{}".to_vec(),
      kind: ResponseKind::Basic,
    };
    assert!(response.is_cacheable());
    assert_eq!(response.header("content-type"), Some("text/css"));

    response.kind = ResponseKind::Opaque;
    assert!(!response.is_cacheable());

    response.kind = ResponseKind::Basic;
    response.status = 206;
    assert!(response.is_ok());
    assert!(!response.is_cacheable());
  }

  #[test]
  fn test_header_lookup_skips_non_utf8() {
    let response = Response {
      status: 200,
      status_text: "OK".to_string(),
      headers: vec![("X-Name".to_string(), b"caf\xE9".to_vec())],
      body: Vec::new(),
      kind: ResponseKind::Basic,
    };
    assert_eq!(response.header("x-name"), None);
    assert_eq!(response.snapshot().headers, response.headers);
  }

  #[tokio::test]
  async fn test_fetch_keeps_raw_header_bytes() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
      let (mut socket, _) = listener.accept().await.unwrap();
      let mut buf = [0u8; 1024];
      let _ = socket.read(&mut buf).await.unwrap();
      socket
        .write_all(b"HTTP/1.1 200 OK\r\nX-Name: caf\xE9\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
        .await
        .unwrap();
    });

    let network = HttpNetwork::new().unwrap();
    let request = Request::get(url(&format!("http://{}/", addr)));
    let response = network.fetch(&request).await.unwrap();
    server.await.unwrap();

    let name = response
      .headers
      .iter()
      .find(|(k, _)| k == "x-name")
      .map(|(_, v)| v.clone());
    assert_eq!(name, Some(b"caf\xE9".to_vec()));
    assert_eq!(response.body, b"ok");
    assert_eq!(response.kind, ResponseKind::Basic);
  }

  #[test]
  fn test_response_kind_parse() {
    for kind in [ResponseKind::Basic, ResponseKind::Cors, ResponseKind::Opaque] {
      assert_eq!(ResponseKind::parse(kind.as_str()).unwrap(), kind);
    }
    assert!(ResponseKind::parse("error").is_err());
  }
}
