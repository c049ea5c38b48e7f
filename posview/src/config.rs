// posview/src/config.rs
//! Configuration for the position history view.
//!
//! Values come from defaults, then an optional JSON file, then environment
//! overrides:
//! - `POSVIEW_VIEW_MODE`: `open` or `closed`
//! - `POSVIEW_EVENT_CAPACITY`: bound of the feed event channel, `0` or empty for unbounded
//! - `POSVIEW_LOG`: default log filter for binaries

use crate::account::ViewMode;
use crate::base::PosViewError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_VIEW_MODE: &str = "POSVIEW_VIEW_MODE";
pub const ENV_EVENT_CAPACITY: &str = "POSVIEW_EVENT_CAPACITY";
pub const ENV_LOG: &str = "POSVIEW_LOG";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ViewConfig {
  /// Mode the view starts in (default: open)
  pub default_view_mode: ViewMode,
  /// Bound of the feed event channel; `None` means unbounded
  pub event_channel_capacity: Option<usize>,
  /// Default `env_logger` filter (default: "info")
  pub log_level: String,
}

impl Default for ViewConfig {
  fn default() -> Self {
    Self {
      default_view_mode: ViewMode::Open,
      event_channel_capacity: None,
      log_level: "info".to_string(),
    }
  }
}

impl ViewConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PosViewError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
      .map_err(|e| PosViewError::ConfigurationError(format!("Cannot read {}: {}", path.display(), e)))?;
    let config: ViewConfig = serde_json::from_str(&text)
      .map_err(|e| PosViewError::ConfigurationError(format!("Invalid config {}: {}", path.display(), e)))?;
    debug!("Loaded view config from {}: {:?}", path.display(), config);
    Ok(config)
  }

  /// Applies environment overrides on top of `self`.
  pub fn apply_env(mut self) -> Result<Self, PosViewError> {
    if let Ok(mode) = std::env::var(ENV_VIEW_MODE) {
      self.default_view_mode = mode
        .parse()
        .map_err(|_| PosViewError::ConfigurationError(format!("{}={} is not open|closed", ENV_VIEW_MODE, mode)))?;
    }
    if let Ok(capacity) = std::env::var(ENV_EVENT_CAPACITY) {
      self.event_channel_capacity = match capacity.trim() {
        "" | "0" => None,
        n => Some(n.parse::<usize>().map_err(|_| {
          PosViewError::ConfigurationError(format!("{}={} is not a number", ENV_EVENT_CAPACITY, capacity))
        })?),
      };
    }
    if let Ok(level) = std::env::var(ENV_LOG) {
      if !level.trim().is_empty() {
        self.log_level = level;
      }
    }
    Ok(self)
  }

  /// File (or defaults when `path` is `None`), then environment.
  pub fn load(path: Option<&Path>) -> Result<Self, PosViewError> {
    let base = match path {
      Some(p) => Self::from_file(p)?,
      None => Self::default(),
    };
    base.apply_env()
  }
}
