// src/settings.rs
//
// Persisted user settings (JSON in the platform config directory) and the
// bitrate text grammar.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bitrates offered by the `bitrate` command; any `<int>[M|K]` text is accepted
pub const BITRATE_PRESETS: [&str; 9] = [
    "10k", "20k", "50k", "100k", "125k", "250k", "500k", "800k", "1000k",
];

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("No config directory available on this platform")]
    NoConfigDir,

    #[error("Failed to access settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid bitrate '{0}' (expected e.g. 500k, 1M or 250000)")]
    InvalidBitrate(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Last-used bitrate text, as typed ("1M", "500k", "250000")
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
}

fn default_bitrate() -> String {
    "1M".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            bitrate: default_bitrate(),
        }
    }
}

/// Parse bitrate text: `<integer>[M|K]`, suffix case-insensitive.
///
/// `"1M"` is 1,000,000, `"500k"` is 500,000 and `"250000"` is taken literally.
pub fn parse_bitrate(text: &str) -> Result<u32, SettingsError> {
    let invalid = || SettingsError::InvalidBitrate(text.to_string());
    let trimmed = text.trim();

    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((i, 'M' | 'm')) => (&trimmed[..i], 1_000_000u32),
        Some((i, 'K' | 'k')) => (&trimmed[..i], 1_000u32),
        Some(_) => (trimmed, 1u32),
        None => return Err(invalid()),
    };

    digits
        .parse::<u32>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|&n| n > 0)
        .ok_or_else(invalid)
}

/// Default settings location: `<config dir>/canviewer/settings.json`
pub fn settings_path() -> Result<PathBuf, SettingsError> {
    dirs::config_dir()
        .map(|dir| dir.join("canviewer").join("settings.json"))
        .ok_or(SettingsError::NoConfigDir)
}

/// Load settings. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<AppSettings, SettingsError> {
    if !path.exists() {
        return Ok(AppSettings::default());
    }

    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Save settings, creating the parent directory as needed.
pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("canviewer-settings-{}-{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_parse_bitrate_suffixes() {
        assert_eq!(parse_bitrate("1M").unwrap(), 1_000_000);
        assert_eq!(parse_bitrate("1m").unwrap(), 1_000_000);
        assert_eq!(parse_bitrate("500k").unwrap(), 500_000);
        assert_eq!(parse_bitrate("125K").unwrap(), 125_000);
        assert_eq!(parse_bitrate("250000").unwrap(), 250_000);
        assert_eq!(parse_bitrate(" 800k ").unwrap(), 800_000);
    }

    #[test]
    fn test_parse_bitrate_presets() {
        let parsed: Vec<u32> = BITRATE_PRESETS
            .iter()
            .map(|p| parse_bitrate(p).unwrap())
            .collect();
        assert_eq!(parsed[0], 10_000);
        assert_eq!(parsed[8], 1_000_000);
    }

    #[test]
    fn test_parse_bitrate_rejects_garbage() {
        for text in ["", "M", "fast", "1.5M", "-500k", "0", "5000M"] {
            assert!(
                matches!(parse_bitrate(text), Err(SettingsError::InvalidBitrate(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let path = temp_settings_path("missing");
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.bitrate, "1M");
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_settings_path("saved");
        let settings = AppSettings {
            bitrate: "500k".to_string(),
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_tolerates_missing_fields() {
        let path = temp_settings_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{}").unwrap();
        assert_eq!(load_settings(&path).unwrap().bitrate, "1M");

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_settings(&path), Err(SettingsError::Parse(_))));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
