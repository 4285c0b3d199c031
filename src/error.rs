use thiserror::Error;

/// Failures the proxy distinguishes between.
///
/// These are raised inside `color_eyre` reports; callers that care about the
/// kind use `report.downcast_ref::<ProxyError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
  /// A manifest asset could not be fetched during install. Fatal to that install.
  #[error("Failed to fetch manifest asset {url}: {reason}")]
  AssetFetch { url: String, reason: String },

  #[error("Network request to {url} failed: {reason}")]
  Network { url: String, reason: String },

  /// The transport succeeded but the status is not acceptable for the request class.
  #[error("Request to {url} returned status {status}")]
  UnexpectedStatus { url: String, status: u16 },

  #[error("Cache write to {generation} failed: {reason}")]
  CachePopulation { generation: String, reason: String },

  #[error("Cannot {action} while {from}")]
  InvalidTransition { from: String, action: &'static str },
}
