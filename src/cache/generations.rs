//! Versioned cache generations and the rules for writing to and purging them.

use color_eyre::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use super::traits::{CacheStorage, CachedEntry};
use crate::error::ProxyError;
use crate::http::{Method, Request, Response};

/// What a generation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
  /// Install manifest and cache-first assets
  Static,
  /// Network-first responses
  Dynamic,
  /// Names left behind by earlier layouts; purged at the next activation
  Legacy,
}

/// A generation name such as `static-v3` or `dynamic-v3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationName {
  pub purpose: Purpose,
  pub version: Option<String>,
  raw: String,
}

impl GenerationName {
  pub fn static_for(version: &str) -> Self {
    Self::parse(&format!("static-{}", version))
  }

  pub fn dynamic_for(version: &str) -> Self {
    Self::parse(&format!("dynamic-{}", version))
  }

  /// Classify an existing generation name. Anything not in the
  /// `static-<version>` / `dynamic-<version>` layout is legacy.
  pub fn parse(name: &str) -> Self {
    let (purpose, version) = match name.split_once('-') {
      Some(("static", v)) if !v.is_empty() => (Purpose::Static, Some(v.to_string())),
      Some(("dynamic", v)) if !v.is_empty() => (Purpose::Dynamic, Some(v.to_string())),
      _ => (Purpose::Legacy, None),
    };

    Self {
      purpose,
      version,
      raw: name.to_string(),
    }
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }
}

impl fmt::Display for GenerationName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

/// Owns the active static and dynamic generations of one deployed version.
pub struct GenerationManager<S: CacheStorage> {
  storage: Arc<S>,
  static_name: GenerationName,
  dynamic_name: GenerationName,
}

impl<S: CacheStorage> GenerationManager<S> {
  pub fn new(storage: Arc<S>, version: &str) -> Self {
    Self {
      storage,
      static_name: GenerationName::static_for(version),
      dynamic_name: GenerationName::dynamic_for(version),
    }
  }

  pub fn static_name(&self) -> &str {
    self.static_name.as_str()
  }

  pub fn dynamic_name(&self) -> &str {
    self.dynamic_name.as_str()
  }

  /// Names that survive activation of this version.
  pub fn allow_list(&self) -> Vec<String> {
    vec![
      self.static_name.as_str().to_string(),
      self.dynamic_name.as_str().to_string(),
    ]
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Acquire-or-create a named generation.
  pub fn open(&self, name: &str) -> Result<()> {
    self.storage.open(name)
  }

  /// Store `response` under `request` in `generation` if it qualifies.
  ///
  /// Only exact 200s of type basic are kept; cross-origin and opaque
  /// responses would hide auth and CORS failures behind a cached success.
  /// Returns whether an entry was written.
  pub fn populate(&self, generation: &str, request: &Request, response: &Response) -> Result<bool> {
    if !response.is_cacheable() {
      debug!(
        url = %request.url,
        status = response.status,
        response_type = response.response_type.as_str(),
        "Response does not qualify for caching"
      );
      return Ok(false);
    }

    if request.method != Method::Get {
      return Err(
        ProxyError::CachePopulation {
          generation: generation.to_string(),
          reason: format!("{} requests cannot be cached", request.method),
        }
        .into(),
      );
    }

    if response.vary().iter().any(|name| name == "*") {
      return Err(
        ProxyError::CachePopulation {
          generation: generation.to_string(),
          reason: "responses with Vary: * cannot be cached".to_string(),
        }
        .into(),
      );
    }

    self
      .storage
      .put(generation, request, response)
      .map_err(|e| ProxyError::CachePopulation {
        generation: generation.to_string(),
        reason: e.to_string(),
      })?;

    debug!(url = %request.url, generation, "Cached response");
    Ok(true)
  }

  /// Look `request` up in the active generations only, static first.
  pub fn lookup(&self, request: &Request) -> Result<Option<CachedEntry>> {
    for name in [&self.static_name, &self.dynamic_name] {
      if let Some(entry) = self.storage.match_in(name.as_str(), request)? {
        debug!(url = %request.url, generation = %name, "Cache hit");
        return Ok(Some(entry));
      }
    }

    debug!(url = %request.url, "Cache miss");
    Ok(None)
  }

  /// Delete every generation whose name is not in `except`.
  ///
  /// Kept generations are never touched. Returns the deleted names.
  pub fn purge(&self, except: &[String]) -> Result<Vec<String>> {
    let mut deleted = Vec::new();

    for name in self.storage.names()? {
      if except.contains(&name) {
        continue;
      }

      let generation = GenerationName::parse(&name);
      info!(generation = %generation, purpose = ?generation.purpose, "Deleting generation");
      if self.storage.delete(&name)? {
        deleted.push(name);
      }
    }

    Ok(deleted)
  }
}

impl<S: CacheStorage> Clone for GenerationManager<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      static_name: self.static_name.clone(),
      dynamic_name: self.dynamic_name.clone(),
    }
  }
}
