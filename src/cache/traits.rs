//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::http::{Method, Request, Response};

/// Identity of a cache entry within a generation: method, URL and request variance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub method: Method,
  /// URL with the fragment removed
  pub url: String,
  /// Request header values selected by the response's `Vary` header
  pub variance: String,
}

impl CacheKey {
  /// Key under which `response` is stored for `request`.
  pub fn for_entry(request: &Request, response: &Response) -> Self {
    Self {
      method: request.method,
      url: normalize_url(request),
      variance: variance(&response.vary(), request),
    }
  }

  /// SHA256 hash for stable, fixed-length keys
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hasher.update(b"\n");
    hasher.update(self.variance.as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// URL used for matching: fragments never reach the server, so they never distinguish entries.
pub fn normalize_url(request: &Request) -> String {
  let mut url = request.url.clone();
  url.set_fragment(None);
  url.to_string()
}

/// Render the request's values for the given header names.
pub fn variance(vary: &[String], request: &Request) -> String {
  vary
    .iter()
    .map(|name| format!("{}={}", name, request.header(name).unwrap_or("")))
    .collect::<Vec<_>>()
    .join("\n")
}

/// A response read back from a generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Named key-value stores of request/response entries.
///
/// Every write is an independent upsert (last write wins), so implementations
/// never need read-modify-write sequences.
pub trait CacheStorage: Send + Sync {
  /// Create the named generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  fn has(&self, generation: &str) -> Result<bool>;

  /// All existing generation names, oldest first.
  fn names(&self) -> Result<Vec<String>>;

  /// Delete a generation and everything in it. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// Store `response` for `request`, replacing any entry with the same key.
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()>;

  /// Find the entry for `request` in one generation.
  fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>>;

  fn entry_count(&self, generation: &str) -> Result<usize>;
}

/// Result from a proxy decision, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Network failed and the cache answered instead.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// A navigation answered with the cached root document.
  pub fn root_fallback(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::RootFallback,
      cached_at: Some(cached_at),
    }
  }

  pub fn synthetic(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthetic,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit served without touching the network
  Cache,
  /// Network unavailable, serving a cached entry
  Offline,
  /// Network and cache both missed, serving the cached root document
  RootFallback,
  /// Fabricated offline response
  Synthetic,
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn request(url: &str) -> Request {
    Request::get(Url::parse(url).unwrap())
  }

  #[test]
  fn test_key_ignores_fragment() {
    let response = Response::new(200, "");
    let a = CacheKey::for_entry(&request("https://app.test/page#top"), &response);
    let b = CacheKey::for_entry(&request("https://app.test/page"), &response);
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
  }

  #[test]
  fn test_key_includes_vary_values() {
    let response = Response::new(200, "").with_header("vary", "Accept");
    let json = request("https://app.test/api/x").with_header("Accept", "application/json");
    let html = request("https://app.test/api/x").with_header("Accept", "text/html");

    let a = CacheKey::for_entry(&json, &response);
    let b = CacheKey::for_entry(&html, &response);
    assert_ne!(a.hash(), b.hash());
    assert_eq!(a.variance, "accept=application/json");
  }

  #[test]
  fn test_key_distinguishes_method() {
    let response = Response::new(200, "");
    let get = request("https://app.test/a");
    let head = get.clone().with_method(Method::Head);
    assert_ne!(
      CacheKey::for_entry(&get, &response).hash(),
      CacheKey::for_entry(&head, &response).hash()
    );
  }
}
