//! Deferred work signals from the runtime.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::host::Host;

/// Tags the host knows how to run.
pub const KNOWN_TASKS: &[&str] = &["background-sync"];

/// Hands recognised background tasks to the host. The work itself lives there.
pub struct BackgroundTaskHook<H: Host> {
  host: Arc<H>,
}

impl<H: Host> BackgroundTaskHook<H> {
  pub fn new(host: Arc<H>) -> Self {
    Self { host }
  }

  /// Returns whether the tag was delegated.
  pub fn on_sync(&self, tag: &str) -> Result<bool> {
    if !KNOWN_TASKS.contains(&tag) {
      debug!(tag, "Ignoring unknown background task");
      return Ok(false);
    }

    self.host.run_background_task(tag)?;
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{HostEvent, RecordingHost};

  #[test]
  fn test_known_tag_is_delegated() {
    let host = Arc::new(RecordingHost::new());
    let hook = BackgroundTaskHook::new(Arc::clone(&host));

    assert!(hook.on_sync("background-sync").unwrap());
    assert!(!hook.on_sync("refresh-avatars").unwrap());
    assert_eq!(
      host.events(),
      vec![HostEvent::Background("background-sync".into())]
    );
  }
}
