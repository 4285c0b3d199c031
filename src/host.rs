//! The host application the proxy runs inside.

use color_eyre::Result;
use tracing::info;
use url::Url;

use crate::lifecycle::LifecycleState;
use crate::notify::NotificationPayload;

/// Capabilities the proxy needs from its host runtime.
pub trait Host: Send + Sync {
  /// Make this instance responsible for every open client window.
  fn claim_clients(&self);

  /// Observable lifecycle progress, e.g. to prompt "reload to update".
  fn lifecycle_changed(&self, version: &str, state: LifecycleState);

  fn show_notification(&self, notification: &NotificationPayload) -> Result<()>;

  fn close_notification(&self, tag: &str);

  /// Focus an existing window at `url`, or open a new one.
  fn open_window(&self, url: &Url) -> Result<()>;

  /// Deferred work signalled by the runtime.
  fn run_background_task(&self, tag: &str) -> Result<()>;
}

/// Host for the command line: there are no windows, so everything is logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl Host for LoggingHost {
  fn claim_clients(&self) {
    info!("Claimed open clients");
  }

  fn lifecycle_changed(&self, version: &str, state: LifecycleState) {
    info!(version, state = ?state, "Lifecycle changed");
  }

  fn show_notification(&self, notification: &NotificationPayload) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      tag = %notification.tag,
      "Showing notification"
    );
    Ok(())
  }

  fn close_notification(&self, tag: &str) {
    info!(tag, "Closing notification");
  }

  fn open_window(&self, url: &Url) -> Result<()> {
    info!(url = %url, "Opening window");
    Ok(())
  }

  fn run_background_task(&self, tag: &str) -> Result<()> {
    info!(tag, "Running background task");
    Ok(())
  }
}
