//! Commands accepted from front-ends and notifications sent back to them.
//!
//! Wire format is JSON, tagged by a single field:
//!
//! ```text
//! -> {"action": "verifyCache"}
//! <- {"message": "offlineReady"}
//! <- {"message": "offlineNotReady", "error": "..."}
//! ```

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::CacheError;

/// Inbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Command {
  /// Check the current generation against the manifest and repair gaps
  #[serde(rename = "verifyCache")]
  VerifyCache,
}

impl FromStr for Command {
  type Err = CacheError;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    serde_json::from_str(raw).map_err(|e| CacheError::InvalidCommand {
      message: e.to_string(),
    })
  }
}

/// Outbound readiness notification, broadcast to every observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum Notification {
  #[serde(rename = "offlineReady")]
  OfflineReady,
  #[serde(rename = "offlineNotReady")]
  OfflineNotReady { error: String },
}

impl Notification {
  pub fn not_ready(error: impl ToString) -> Self {
    Notification::OfflineNotReady {
      error: error.to_string(),
    }
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, Notification::OfflineReady)
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      Notification::OfflineReady => None,
      Notification::OfflineNotReady { error } => Some(error),
    }
  }
}
