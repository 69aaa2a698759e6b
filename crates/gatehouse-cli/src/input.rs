use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Read a file, or stdin when no path is given.
pub fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

pub fn read_json<T: DeserializeOwned>(path: Option<&Path>) -> Result<T> {
    let raw = read_input(path)?;
    let source = path.map_or_else(|| "stdin".to_string(), |p| p.display().to_string());
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {source}"))
}
