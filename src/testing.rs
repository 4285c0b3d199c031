//! Test doubles for the network and the host.

use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Mutex;
use url::Url;

use crate::error::ProxyError;
use crate::host::Host;
use crate::http::{Request, Response};
use crate::lifecycle::LifecycleState;
use crate::net::Fetcher;
use crate::notify::NotificationPayload;

/// Scripted network: routed URLs answer with their response, everything else fails.
#[derive(Default)]
pub struct StubFetcher {
  routes: Mutex<HashMap<String, Response>>,
  calls: Mutex<Vec<String>>,
}

impl StubFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), response);
  }

  /// Drop the route so the URL fails again.
  pub fn disconnect(&self, url: &str) {
    self.routes.lock().unwrap().remove(url);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Fetcher for StubFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let url = request.url.to_string();
    self.calls.lock().unwrap().push(url.clone());

    let routed = self.routes.lock().unwrap().get(&url).cloned();
    routed.ok_or_else(|| {
      ProxyError::Network {
        url,
        reason: "connection refused".to_string(),
      }
      .into()
    })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
  Claimed,
  Lifecycle(String, LifecycleState),
  Shown(NotificationPayload),
  Closed(String),
  Opened(String),
  Background(String),
}

/// Host that records every call in order.
#[derive(Default)]
pub struct RecordingHost {
  events: Mutex<Vec<HostEvent>>,
}

impl RecordingHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<HostEvent> {
    self.events.lock().unwrap().clone()
  }

  fn record(&self, event: HostEvent) {
    self.events.lock().unwrap().push(event);
  }
}

impl Host for RecordingHost {
  fn claim_clients(&self) {
    self.record(HostEvent::Claimed);
  }

  fn lifecycle_changed(&self, version: &str, state: LifecycleState) {
    self.record(HostEvent::Lifecycle(version.to_string(), state));
  }

  fn show_notification(&self, notification: &NotificationPayload) -> Result<()> {
    self.record(HostEvent::Shown(notification.clone()));
    Ok(())
  }

  fn close_notification(&self, tag: &str) {
    self.record(HostEvent::Closed(tag.to_string()));
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    self.record(HostEvent::Opened(url.to_string()));
    Ok(())
  }

  fn run_background_task(&self, tag: &str) -> Result<()> {
    self.record(HostEvent::Background(tag.to_string()));
    Ok(())
  }
}
