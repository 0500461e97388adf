//! Loading the providers document from disk.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use eogate_util::{eogate_config_dir, expand_tilde};

use super::model::ProvidersDocument;
use super::validation::validate_document;

/// Overrides the default providers document location.
pub const PROVIDERS_PATH_ENV: &str = "EOGATE_PROVIDERS_PATH";

/// Returns the default path for the providers document.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(PROVIDERS_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    eogate_config_dir().join("providers.yaml")
}

/// Loads the providers document from the default path.
pub fn load_config() -> Result<ProvidersDocument> {
    load_config_from_path(&default_config_path())
}

/// Loads and parses the providers document at `path`.
pub fn load_config_from_path(path: &Path) -> Result<ProvidersDocument> {
    let content =
        fs::read_to_string(path).with_context(|| format!("read providers document {}", path.display()))?;
    load_config_from_str(&content).with_context(|| format!("load providers document {}", path.display()))
}

/// Parses a providers document and checks document-level settings.
pub fn load_config_from_str(content: &str) -> Result<ProvidersDocument> {
    let document: ProvidersDocument = serde_yaml::from_str(content).context("parse providers YAML")?;
    validate_document(&document)?;
    Ok(document)
}
