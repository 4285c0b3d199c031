//! Install, activate and claim for one deployed version.

use color_eyre::Result;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheStorage, GenerationManager};
use crate::classify::AssetManifest;
use crate::error::ProxyError;
use crate::host::Host;
use crate::http::{Request, Response};
use crate::net::Fetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Installed, waiting for clients of the previous version to go away
  Waiting,
  Activating,
  /// Serving requests
  Active,
  /// Failed to install or superseded by a newer version
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LifecycleState::Installing => "installing",
      LifecycleState::Waiting => "waiting",
      LifecycleState::Activating => "activating",
      LifecycleState::Active => "active",
      LifecycleState::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Messages clients can post to the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
  /// Activate now instead of waiting for old clients to close
  SkipWaiting,
  Unknown(String),
}

impl ControlMessage {
  pub fn parse(message: &str) -> Self {
    match message.trim() {
      "SKIP_WAITING" => ControlMessage::SkipWaiting,
      other => ControlMessage::Unknown(other.to_string()),
    }
  }
}

/// Drives one version through its lifecycle.
pub struct LifecycleController<S: CacheStorage, F: Fetcher, H: Host> {
  version: String,
  state: LifecycleState,
  generations: GenerationManager<S>,
  manifest: AssetManifest,
  fetcher: Arc<F>,
  host: Arc<H>,
}

impl<S, F, H> LifecycleController<S, F, H>
where
  S: CacheStorage,
  F: Fetcher,
  H: Host,
{
  pub fn new(
    version: &str,
    generations: GenerationManager<S>,
    manifest: AssetManifest,
    fetcher: Arc<F>,
    host: Arc<H>,
  ) -> Self {
    Self {
      version: version.to_string(),
      state: LifecycleState::Installing,
      generations,
      manifest,
      fetcher,
      host,
    }
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Only an active instance handles requests.
  pub fn is_ready(&self) -> bool {
    self.state == LifecycleState::Active
  }

  fn transition(&mut self, state: LifecycleState) {
    info!(version = %self.version, from = %self.state, to = %state, "Lifecycle transition");
    self.state = state;
    self.host.lifecycle_changed(&self.version, state);
  }

  fn require(&self, state: LifecycleState, action: &'static str) -> Result<()> {
    if self.state != state {
      return Err(
        ProxyError::InvalidTransition {
          from: self.state.to_string(),
          action,
        }
        .into(),
      );
    }
    Ok(())
  }

  /// Fetch every manifest asset and publish them as the static generation.
  ///
  /// All or nothing: every asset is fetched before anything is written, and
  /// a single failure leaves this instance redundant with nothing published.
  pub async fn install(&mut self) -> Result<()> {
    self.require(LifecycleState::Installing, "install")?;
    info!(version = %self.version, assets = self.manifest.paths().len(), "Installing");

    let assets = match self.fetch_manifest().await {
      Ok(assets) => assets,
      Err(e) => {
        warn!(version = %self.version, error = %e, "Install failed");
        self.transition(LifecycleState::Redundant);
        return Err(e);
      }
    };

    if let Err(e) = self.publish(&assets) {
      warn!(version = %self.version, error = %e, "Install failed while storing assets");
      if let Err(cleanup) = self.generations.storage().delete(self.generations.static_name()) {
        warn!(error = %cleanup, "Failed to remove partial static generation");
      }
      self.transition(LifecycleState::Redundant);
      return Err(e);
    }

    self.transition(LifecycleState::Waiting);
    Ok(())
  }

  /// Fetch assets one at a time, in manifest order.
  async fn fetch_manifest(&self) -> Result<Vec<(Request, Response)>> {
    let mut assets = Vec::new();

    for url in self.manifest.urls()? {
      let request = Request::get(url);
      let asset_error = |reason: String| ProxyError::AssetFetch {
        url: request.url.to_string(),
        reason,
      };

      let response = self
        .fetcher
        .fetch(&request)
        .await
        .map_err(|e| asset_error(e.to_string()))?;

      if !(200..300).contains(&response.status) {
        return Err(asset_error(format!("status {}", response.status)).into());
      }

      debug!(url = %request.url, "Fetched manifest asset");
      assets.push((request, response));
    }

    Ok(assets)
  }

  fn publish(&self, assets: &[(Request, Response)]) -> Result<()> {
    let generation = self.generations.static_name();
    self.generations.open(generation)?;

    for (request, response) in assets {
      self.generations.storage().put(generation, request, response)?;
    }

    Ok(())
  }

  /// Waiting ends on its own once clients of the previous version are gone.
  pub fn clients_released(&mut self) -> Result<()> {
    if self.state == LifecycleState::Waiting {
      self.activate()?;
    }
    Ok(())
  }

  pub fn on_message(&mut self, message: &ControlMessage) -> Result<()> {
    match message {
      ControlMessage::SkipWaiting if self.state == LifecycleState::Waiting => self.activate(),
      ControlMessage::SkipWaiting => {
        debug!(state = %self.state, "Ignoring SKIP_WAITING");
        Ok(())
      }
      ControlMessage::Unknown(other) => {
        debug!(message = %other, "Ignoring unknown control message");
        Ok(())
      }
    }
  }

  /// Purge generations outside this version's allow-list, then claim clients.
  ///
  /// The instance only becomes active once both have happened, in that order.
  /// A failed purge returns the instance to `Waiting`.
  pub fn activate(&mut self) -> Result<()> {
    self.require(LifecycleState::Waiting, "activate")?;
    self.transition(LifecycleState::Activating);

    let deleted = match self.generations.purge(&self.generations.allow_list()) {
      Ok(deleted) => deleted,
      Err(e) => {
        // Back to waiting so activation can be retried
        warn!(version = %self.version, error = %e, "Purge failed");
        self.transition(LifecycleState::Waiting);
        return Err(e);
      }
    };
    info!(version = %self.version, deleted = deleted.len(), "Purged old generations");

    self.host.claim_clients();
    self.transition(LifecycleState::Active);
    Ok(())
  }

  /// Pick up a version that finished installing in an earlier process.
  ///
  /// Returns whether the static generation was found and the instance is now active.
  pub fn restore(&mut self) -> Result<bool> {
    self.require(LifecycleState::Installing, "restore")?;

    if !self
      .generations
      .storage()
      .has(self.generations.static_name())?
    {
      return Ok(false);
    }

    self.transition(LifecycleState::Active);
    Ok(true)
  }

  /// A newer version has taken over.
  pub fn supersede(&mut self) {
    if self.state != LifecycleState::Redundant {
      self.transition(LifecycleState::Redundant);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CachedEntry, MemoryStorage};
  use crate::testing::{HostEvent, RecordingHost, StubFetcher};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicBool, Ordering};
  use url::Url;

  const ORIGIN: &str = "https://app.test/";

  type Controller = LifecycleController<MemoryStorage, StubFetcher, RecordingHost>;

  fn controller(
    storage: &Arc<MemoryStorage>,
    fetcher: &Arc<StubFetcher>,
    host: &Arc<RecordingHost>,
    version: &str,
    manifest: &[&str],
  ) -> Controller {
    let origin = Url::parse(ORIGIN).unwrap();
    LifecycleController::new(
      version,
      GenerationManager::new(Arc::clone(storage), version),
      AssetManifest::new(origin, manifest.iter().map(|p| p.to_string()).collect()),
      Arc::clone(fetcher),
      Arc::clone(host),
    )
  }

  fn serve(fetcher: &StubFetcher, path: &str, body: &str) {
    let url = Url::parse(ORIGIN).unwrap().join(path).unwrap();
    fetcher.respond(url.as_str(), Response::new(200, body));
  }

  #[test]
  fn test_parse_control_message() {
    assert_eq!(ControlMessage::parse("SKIP_WAITING"), ControlMessage::SkipWaiting);
    assert_eq!(
      ControlMessage::parse("PING"),
      ControlMessage::Unknown("PING".to_string())
    );
  }

  #[tokio::test]
  async fn test_install_success_reaches_waiting() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    serve(&fetcher, "/", "<html>");
    serve(&fetcher, "/a.png", "png");

    let mut lifecycle = controller(&storage, &fetcher, &host, "v1", &["/", "/a.png"]);
    lifecycle.install().await.unwrap();

    assert_eq!(lifecycle.state(), LifecycleState::Waiting);
    assert_eq!(storage.entry_count("static-v1").unwrap(), 2);
    assert_eq!(
      host.events(),
      vec![HostEvent::Lifecycle("v1".into(), LifecycleState::Waiting)]
    );
  }

  #[tokio::test]
  async fn test_install_failure_publishes_nothing() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    serve(&fetcher, "/", "<html>");

    let mut lifecycle = controller(&storage, &fetcher, &host, "v1", &["/", "/missing.png"]);
    let err = lifecycle.install().await.unwrap_err();

    assert!(matches!(
      err.downcast_ref::<ProxyError>(),
      Some(ProxyError::AssetFetch { url, .. }) if url == "https://app.test/missing.png"
    ));
    assert_eq!(lifecycle.state(), LifecycleState::Redundant);
    assert!(!storage.has("static-v1").unwrap());
    assert!(lifecycle.activate().is_err());
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    fetcher.respond("https://app.test/", Response::new(404, "not found"));

    let mut lifecycle = controller(&storage, &fetcher, &host, "v1", &["/"]);
    assert!(lifecycle.install().await.is_err());
    assert!(storage.names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_fetches_sequentially_in_manifest_order() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    serve(&fetcher, "/", "<html>");

    let manifest = ["/", "/gone.js", "/never.css"];
    let mut lifecycle = controller(&storage, &fetcher, &host, "v1", &manifest);
    assert!(lifecycle.install().await.is_err());

    // Stops at the first failure
    assert_eq!(
      fetcher.calls(),
      vec!["https://app.test/", "https://app.test/gone.js"]
    );
  }

  #[tokio::test]
  async fn test_activation_purges_then_claims() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    serve(&fetcher, "/", "<html>");
    storage.open("static-v0").unwrap();
    storage.open("workshop-cache").unwrap();

    let mut lifecycle = controller(&storage, &fetcher, &host, "v1", &["/"]);
    lifecycle.install().await.unwrap();
    lifecycle.activate().unwrap();

    assert!(lifecycle.is_ready());
    assert_eq!(storage.names().unwrap(), vec!["static-v1"]);
    assert_eq!(
      host.events(),
      vec![
        HostEvent::Lifecycle("v1".into(), LifecycleState::Waiting),
        HostEvent::Lifecycle("v1".into(), LifecycleState::Activating),
        HostEvent::Claimed,
        HostEvent::Lifecycle("v1".into(), LifecycleState::Active),
      ]
    );
  }

  #[tokio::test]
  async fn test_skip_waiting_and_clients_released() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    serve(&fetcher, "/", "<html>");

    let mut lifecycle = controller(&storage, &fetcher, &host, "v1", &["/"]);
    // Ignored before install completes
    lifecycle.on_message(&ControlMessage::SkipWaiting).unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Installing);

    lifecycle.install().await.unwrap();
    lifecycle.on_message(&ControlMessage::Unknown("PING".into())).unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Waiting);

    lifecycle.on_message(&ControlMessage::SkipWaiting).unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Active);

    let mut second = controller(&storage, &fetcher, &host, "v2", &["/"]);
    second.install().await.unwrap();
    second.clients_released().unwrap();
    assert_eq!(second.state(), LifecycleState::Active);

    lifecycle.supersede();
    assert_eq!(lifecycle.state(), LifecycleState::Redundant);
    assert_eq!(storage.names().unwrap(), vec!["static-v2"]);
  }

  /// Memory storage whose first `delete` fails.
  #[derive(Default)]
  struct BusyOnceStorage {
    inner: MemoryStorage,
    failed: AtomicBool,
  }

  impl CacheStorage for BusyOnceStorage {
    fn open(&self, generation: &str) -> Result<()> {
      self.inner.open(generation)
    }

    fn has(&self, generation: &str) -> Result<bool> {
      self.inner.has(generation)
    }

    fn names(&self) -> Result<Vec<String>> {
      self.inner.names()
    }

    fn delete(&self, generation: &str) -> Result<bool> {
      if !self.failed.swap(true, Ordering::SeqCst) {
        return Err(eyre!("disk busy"));
      }
      self.inner.delete(generation)
    }

    fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
      self.inner.put(generation, request, response)
    }

    fn match_in(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>> {
      self.inner.match_in(generation, request)
    }

    fn entry_count(&self, generation: &str) -> Result<usize> {
      self.inner.entry_count(generation)
    }
  }

  #[tokio::test]
  async fn test_failed_purge_can_be_retried() {
    let storage = Arc::new(BusyOnceStorage::default());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());
    serve(&fetcher, "/", "<html>");
    storage.open("static-v0").unwrap();

    let mut lifecycle = LifecycleController::new(
      "v1",
      GenerationManager::new(Arc::clone(&storage), "v1"),
      AssetManifest::new(Url::parse(ORIGIN).unwrap(), vec!["/".to_string()]),
      Arc::clone(&fetcher),
      Arc::clone(&host),
    );
    lifecycle.install().await.unwrap();

    let err = lifecycle.activate().unwrap_err();
    assert_eq!(err.to_string(), "disk busy");
    assert_eq!(lifecycle.state(), LifecycleState::Waiting);
    assert!(!host.events().contains(&HostEvent::Claimed));

    lifecycle.on_message(&ControlMessage::SkipWaiting).unwrap();
    assert!(lifecycle.is_ready());
    assert_eq!(storage.names().unwrap(), vec!["static-v1"]);
  }

  #[tokio::test]
  async fn test_restore_requires_installed_static_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let fetcher = Arc::new(StubFetcher::new());
    let host = Arc::new(RecordingHost::new());

    let mut fresh = controller(&storage, &fetcher, &host, "v1", &["/"]);
    assert!(!fresh.restore().unwrap());
    assert_eq!(fresh.state(), LifecycleState::Installing);

    storage.open("static-v1").unwrap();
    let mut resumed = controller(&storage, &fetcher, &host, "v1", &["/"]);
    assert!(resumed.restore().unwrap());
    assert!(resumed.is_ready());
  }
}
