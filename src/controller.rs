//! Single entry point for every event the host delivers to the proxy.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::background::BackgroundTaskHook;
use crate::cache::{CacheStorage, GenerationManager};
use crate::classify::{Classifier, PolicyClass};
use crate::config::Config;
use crate::host::Host;
use crate::http::Request;
use crate::lifecycle::{ControlMessage, LifecycleController, LifecycleState};
use crate::net::Fetcher;
use crate::notify::{NotificationDispatcher, NotificationPayload};
use crate::policy::{Decision, PolicyExecutor};

/// One deployed version of the offline proxy, wired to its collaborators.
pub struct InterceptionController<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher,
  H: Host,
{
  classifier: Classifier,
  executor: PolicyExecutor<S, F>,
  lifecycle: LifecycleController<S, F, H>,
  notifications: NotificationDispatcher<H>,
  background: BackgroundTaskHook<H>,
}

impl<S, F, H> InterceptionController<S, F, H>
where
  S: CacheStorage + 'static,
  F: Fetcher,
  H: Host,
{
  pub fn new(config: &Config, storage: Arc<S>, fetcher: Arc<F>, host: Arc<H>) -> Result<Self> {
    let origin = config.origin_url()?;
    let classifier = config.classifier()?;
    let generations = GenerationManager::new(storage, &config.version);

    let executor = PolicyExecutor::new(
      generations.clone(),
      Arc::clone(&fetcher),
      config.root_url()?,
      config.offline_message.clone(),
    );
    let lifecycle = LifecycleController::new(
      &config.version,
      generations,
      classifier.manifest().clone(),
      fetcher,
      Arc::clone(&host),
    );
    let notifications =
      NotificationDispatcher::new(config.notifications.clone(), origin, Arc::clone(&host));
    let background = BackgroundTaskHook::new(host);

    Ok(Self {
      classifier,
      executor,
      lifecycle,
      notifications,
      background,
    })
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  pub fn generations(&self) -> &GenerationManager<S> {
    self.executor.generations()
  }

  pub fn classify(&self, request: &Request) -> Option<PolicyClass> {
    self.classifier.classify(request)
  }

  pub async fn install(&mut self) -> Result<()> {
    self.lifecycle.install().await
  }

  pub fn activate(&mut self) -> Result<()> {
    self.lifecycle.activate()
  }

  /// Resume a version installed by an earlier process.
  pub fn restore(&mut self) -> Result<bool> {
    self.lifecycle.restore()
  }

  pub fn clients_released(&mut self) -> Result<()> {
    self.lifecycle.clients_released()
  }

  pub fn supersede(&mut self) {
    self.lifecycle.supersede()
  }

  /// Handle an outgoing request.
  ///
  /// `Ok(None)` means the request is not intercepted and goes to the network
  /// untouched: either it is not http(s), or this version is not active yet.
  pub async fn fetch(&self, request: &Request) -> Result<Option<Decision>> {
    if !self.lifecycle.is_ready() {
      debug!(url = %request.url, state = %self.lifecycle.state(), "Not controlling requests yet");
      return Ok(None);
    }

    let Some(class) = self.classifier.classify(request) else {
      debug!(url = %request.url, "Passing through non-http request");
      return Ok(None);
    };

    debug!(url = %request.url, class = ?class, "Classified request");
    self.executor.execute(class, request).await.map(Some)
  }

  pub fn message(&mut self, message: &str) -> Result<()> {
    self.lifecycle.on_message(&ControlMessage::parse(message))
  }

  pub fn push(&self, data: Option<&[u8]>) -> Result<NotificationPayload> {
    self.notifications.on_push(data)
  }

  pub fn notification_click(&self, tag: &str, action: Option<&str>) -> Result<()> {
    self.notifications.on_click(tag, action)
  }

  pub fn sync(&self, tag: &str) -> Result<bool> {
    self.background.on_sync(tag)
  }
}
