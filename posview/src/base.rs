// posview/src/base.rs
// Base error definitions for the position view

use thiserror::Error;

/// Errors that can occur in the position view
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PosViewError {
  #[error("Configuration error: {0}")]
  ConfigurationError(String),

  #[error("Connection failed: {0}")]
  ConnectionFailed(String),

  #[error("Not connected to the position feed")]
  NotConnected,

  #[error("Message parse error: {0}")]
  ParseError(String),

  #[error("Closed position fetch failed: {0}")]
  FetchFailed(String),

  #[error("Invalid parameter: {0}")]
  InvalidParameter(String),

  #[error("Internal error: {0}")]
  InternalError(String),

  #[error("I/O error: {0}")]
  Io(String),
}

impl From<std::io::Error> for PosViewError {
  fn from(e: std::io::Error) -> Self {
    PosViewError::Io(e.to_string())
  }
}

impl From<serde_json::Error> for PosViewError {
  fn from(e: serde_json::Error) -> Self {
    PosViewError::ParseError(e.to_string())
  }
}
