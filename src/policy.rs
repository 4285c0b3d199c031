//! Caching strategies applied to intercepted requests.
//!
//! One parameterized strategy covers the three observable behaviours:
//!
//! | class       | cache_first | fallback             |
//! |-------------|-------------|----------------------|
//! | StaticAsset | yes         | cache only           |
//! | Default     | no          | cache only           |
//! | ApiCall     | no          | cache, then synthetic|
//!
//! Network and cache are consulted one after the other, never raced.

use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStorage, CachedEntry, GenerationManager};
use crate::classify::PolicyClass;
use crate::error::ProxyError;
use crate::http::{Request, Response};
use crate::net::Fetcher;

/// What to do once the network has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
  /// Cached entry, then the root document for navigations, then give up.
  CacheOnly,
  /// Cached entry, then the synthetic offline response. Non-200 counts as a failure.
  CacheThenSynthetic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strategy {
  pub cache_first: bool,
  pub fallback: Fallback,
}

impl Strategy {
  pub fn for_class(class: PolicyClass) -> Self {
    match class {
      PolicyClass::StaticAsset => Self {
        cache_first: true,
        fallback: Fallback::CacheOnly,
      },
      PolicyClass::Default => Self {
        cache_first: false,
        fallback: Fallback::CacheOnly,
      },
      PolicyClass::ApiCall => Self {
        cache_first: false,
        fallback: Fallback::CacheThenSynthetic,
      },
    }
  }

  /// Whether a response that made it over the wire counts as a success.
  fn accepts(&self, response: &Response) -> bool {
    match self.fallback {
      Fallback::CacheOnly => true,
      Fallback::CacheThenSynthetic => response.status == 200,
    }
  }
}

/// The response chosen for the caller, plus the cache write started after it.
#[derive(Debug)]
pub struct Decision {
  pub response: CacheResult<Response>,
  /// Detached population task. It starts only once `response` is final and
  /// may never complete if the runtime shuts down first; nobody has to await it.
  pub population: Option<JoinHandle<()>>,
}

impl Decision {
  fn settled(response: CacheResult<Response>) -> Self {
    Self {
      response,
      population: None,
    }
  }
}

/// Runs the strategy for each classified request.
pub struct PolicyExecutor<S: CacheStorage, F: Fetcher> {
  generations: GenerationManager<S>,
  fetcher: Arc<F>,
  root: Url,
  offline_message: String,
}

impl<S, F> PolicyExecutor<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher,
{
  /// `root` is the document served to navigations that nothing else can answer.
  pub fn new(
    generations: GenerationManager<S>,
    fetcher: Arc<F>,
    root: Url,
    offline_message: impl Into<String>,
  ) -> Self {
    Self {
      generations,
      fetcher,
      root,
      offline_message: offline_message.into(),
    }
  }

  pub fn generations(&self) -> &GenerationManager<S> {
    &self.generations
  }

  /// Handle `request` with the strategy for its class.
  ///
  /// An `Err` means no response could be produced and the caller sees the network error.
  pub async fn execute(&self, class: PolicyClass, request: &Request) -> Result<Decision> {
    self.run(Strategy::for_class(class), request).await
  }

  pub async fn run(&self, strategy: Strategy, request: &Request) -> Result<Decision> {
    if strategy.cache_first {
      if let Some(entry) = self.lookup(request) {
        // Indefinite: a hit is never revalidated against the network
        return Ok(Decision::settled(CacheResult::from_cache(
          entry.response,
          entry.cached_at,
        )));
      }
    }

    let generation = if strategy.cache_first {
      self.generations.static_name()
    } else {
      self.generations.dynamic_name()
    };

    let failure = match self.fetcher.fetch(request).await {
      Ok(response) if strategy.accepts(&response) => {
        let population = self.spawn_populate(generation, request, &response);
        return Ok(Decision {
          response: CacheResult::from_network(response),
          population,
        });
      }
      Ok(response) => color_eyre::Report::new(ProxyError::UnexpectedStatus {
        url: request.url.to_string(),
        status: response.status,
      }),
      Err(e) => e,
    };

    debug!(url = %request.url, error = %failure, "Network unavailable, falling back");

    // Cache-first already missed above
    if !strategy.cache_first {
      if let Some(entry) = self.lookup(request) {
        return Ok(Decision::settled(CacheResult::offline(
          entry.response,
          entry.cached_at,
        )));
      }
    }

    match strategy.fallback {
      Fallback::CacheThenSynthetic => Ok(Decision::settled(CacheResult::synthetic(
        Response::offline(&self.offline_message),
      ))),
      Fallback::CacheOnly => {
        if request.is_navigation() {
          if let Some(root) = self.lookup(&Request::get(self.root.clone())) {
            return Ok(Decision::settled(CacheResult::root_fallback(
              root.response,
              root.cached_at,
            )));
          }
        }
        Err(failure)
      }
    }
  }

  /// Cache lookup where a storage error is treated as a miss.
  fn lookup(&self, request: &Request) -> Option<CachedEntry> {
    match self.generations.lookup(request) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(url = %request.url, error = %e, "Cache lookup failed");
        None
      }
    }
  }

  /// Start a detached write of `response`. Failures are logged and dropped.
  fn spawn_populate(
    &self,
    generation: &str,
    request: &Request,
    response: &Response,
  ) -> Option<JoinHandle<()>> {
    if !response.is_cacheable() {
      return None;
    }

    let generations = self.generations.clone();
    let generation = generation.to_string();
    let request = request.clone();
    let response = response.clone();

    Some(tokio::task::spawn_blocking(move || {
      if let Err(e) = generations.populate(&generation, &request, &response) {
        warn!(url = %request.url, error = %e, "Cache population failed");
      }
    }))
  }
}
