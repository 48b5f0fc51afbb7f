//! Device allow-list file.
//!
//! A JSON object whose optional `"gateways"` key maps gateway ids to their
//! configured passwords, and whose every other key maps a device id to a
//! display name:
//!
//! ```json
//! {
//!   "gateways": { "34ce0088db36": "0123456789abcdef" },
//!   "34ce0088db36": "Living Room Hub",
//!   "158d0001de8d40": "Front Door"
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Pre-declared devices, loaded once before any traffic is processed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AllowList {
    /// Gateway id -> password.
    #[serde(default)]
    pub gateways: BTreeMap<String, String>,
    /// Device id -> display name (gateways included).
    #[serde(flatten)]
    pub names: BTreeMap<String, String>,
}

impl AllowList {
    /// Parse an allow-list from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Read and parse an allow-list file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::AllowList(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content).map_err(|e| {
            Error::AllowList(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Load the file if it exists; a missing file yields an empty list.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if path.is_file() {
            Self::load(path).map(Some)
        } else if path.exists() {
            Err(Error::AllowList(format!("{} is not a file", path.display())))
        } else {
            debug!(path = %path.display(), "Allow-list file not found");
            Ok(None)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty() && self.names.is_empty()
    }
}
