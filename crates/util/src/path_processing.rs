use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Per-user configuration directory for eogate, falling back to
/// `~/.config/eogate` when the platform reports none.
pub fn eogate_config_dir() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| expand_tilde("~/.config"))
        .join("eogate")
}
