use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::classify::{ApiAllowList, AssetManifest, Classifier};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Deployed version; names the `static-<version>` and `dynamic-<version>` generations
  pub version: String,
  /// Origin the app is served from
  pub origin: String,
  /// Root-relative paths that must be cached at install
  #[serde(default = "default_manifest")]
  pub manifest: Vec<String>,
  /// URL prefixes of backend API calls (root-relative entries resolve against `origin`)
  #[serde(default)]
  pub api_origins: Vec<String>,
  #[serde(default = "default_offline_message")]
  pub offline_message: String,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

fn default_manifest() -> Vec<String> {
  vec!["/".to_string()]
}

fn default_offline_message() -> String {
  "You appear to be offline. Please check your connection.".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationsConfig {
  pub title: String,
  /// Used when a push arrives without text
  pub default_body: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds
  pub vibrate: Vec<u32>,
  /// Where the explore action navigates
  pub open_path: String,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      title: "Encore Workshops".to_string(),
      default_body: "New workshop updates are available".to_string(),
      icon: "/icons/icon-192x192.png".to_string(),
      badge: "/icons/badge-72x72.png".to_string(),
      vibrate: vec![100, 50, 100],
      open_path: "/".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/encore-offline/cache.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./encore-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/encore-offline/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/encore-offline/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("encore-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("encore-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.manifest.iter().any(|p| !p.starts_with('/')) {
      return Err(eyre!("manifest entries must be root-relative paths"));
    }
    self.classifier()?;
    Ok(())
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    if !matches!(url.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https: {}", self.origin));
    }
    Ok(url)
  }

  /// The app's root document, served to offline navigations.
  pub fn root_url(&self) -> Result<Url> {
    self
      .origin_url()?
      .join("/")
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn manifest(&self) -> Result<AssetManifest> {
    Ok(AssetManifest::new(self.origin_url()?, self.manifest.clone()))
  }

  pub fn classifier(&self) -> Result<Classifier> {
    let origin = self.origin_url()?;
    let api = ApiAllowList::new(&origin, &self.api_origins)?;
    Ok(Classifier::new(self.manifest()?, api))
  }

  /// Cache database location.
  pub fn storage_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}
