//! Request classification: decides which caching strategy handles a request.

use color_eyre::{eyre::eyre, Result};
use url::Url;

use crate::http::Request;

/// Category assigned to an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyClass {
  /// Cache first, populate the static generation on miss
  StaticAsset,
  /// Network first, synthetic offline response as last resort
  ApiCall,
  /// Network first, cache fallback
  Default,
}

/// Root-relative paths that must be cached at install time.
#[derive(Debug, Clone)]
pub struct AssetManifest {
  origin: Url,
  paths: Vec<String>,
}

impl AssetManifest {
  pub fn new(origin: Url, paths: Vec<String>) -> Self {
    Self { origin, paths }
  }

  pub fn paths(&self) -> &[String] {
    &self.paths
  }

  /// Absolute URLs of every manifest entry, in manifest order.
  pub fn urls(&self) -> Result<Vec<Url>> {
    self
      .paths
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map_err(|e| eyre!("Invalid manifest entry {}: {}", path, e))
      })
      .collect()
  }

  /// A same-origin URL whose path equals an entry, or falls under a
  /// non-root entry as a prefix. The root entry `/` only matches itself.
  pub fn matches(&self, url: &Url) -> bool {
    if url.origin() != self.origin.origin() {
      return false;
    }

    let path = url.path();
    self
      .paths
      .iter()
      .any(|entry| path == entry || (entry != "/" && path.starts_with(entry.as_str())))
  }
}

/// URL prefixes that identify backend API calls.
#[derive(Debug, Clone, Default)]
pub struct ApiAllowList {
  prefixes: Vec<String>,
}

impl ApiAllowList {
  /// Root-relative entries are resolved against `origin`.
  pub fn new(origin: &Url, entries: &[String]) -> Result<Self> {
    let prefixes = entries
      .iter()
      .map(|entry| {
        let url = match Url::parse(entry) {
          Ok(url) => url,
          Err(url::ParseError::RelativeUrlWithoutBase) => origin
            .join(entry)
            .map_err(|e| eyre!("Invalid API origin {}: {}", entry, e))?,
          Err(e) => return Err(eyre!("Invalid API origin {}: {}", entry, e)),
        };
        Ok(url.to_string())
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { prefixes })
  }

  pub fn matches(&self, url: &Url) -> bool {
    self
      .prefixes
      .iter()
      .any(|prefix| url.as_str().starts_with(prefix.as_str()))
  }
}

/// Pure, total mapping from request to policy class.
#[derive(Debug, Clone)]
pub struct Classifier {
  manifest: AssetManifest,
  api: ApiAllowList,
}

impl Classifier {
  pub fn new(manifest: AssetManifest, api: ApiAllowList) -> Self {
    Self { manifest, api }
  }

  pub fn manifest(&self) -> &AssetManifest {
    &self.manifest
  }

  /// Classify `request`, or `None` when it is not http(s) and must pass through.
  ///
  /// Priority: manifest or static resource kind, then API prefix, then default.
  pub fn classify(&self, request: &Request) -> Option<PolicyClass> {
    if !request.is_http() {
      return None;
    }

    let class = if self.manifest.matches(&request.url) || request.destination.is_static_kind() {
      PolicyClass::StaticAsset
    } else if self.api.matches(&request.url) {
      PolicyClass::ApiCall
    } else {
      PolicyClass::Default
    };

    Some(class)
  }
}
