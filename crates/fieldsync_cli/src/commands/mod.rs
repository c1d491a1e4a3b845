//! CLI command implementations.

pub mod build;
pub mod hash;
pub mod simulate;
pub mod verify;

use serde::de::DeserializeOwned;
use std::path::Path;

/// Reads and decodes a JSON file.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    serde_json::from_str(&data).map_err(|e| format!("Invalid JSON in {}: {e}", path.display()).into())
}
