//! Configuration management

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{CatalogConfig, DEFAULT_CATALOG_URL};
use crate::liveness::ProbeConfig;
use crate::sniffer::SniffConfig;

const APP_DIR: &str = "streamhunter";

/// Desktop Chrome; used for the directory download, probes and the sniffing browser
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// Predefined user agents
pub const USER_AGENTS: &[(&str, &str)] = &[
    ("Chrome (Windows)", DEFAULT_USER_AGENT),
    ("Firefox (Windows)", "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:140.0) Gecko/20100101 Firefox/140.0"),
    ("Safari (macOS)", "Mozilla/5.0 (Macintosh; Intel Mac OS X 15_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.4 Safari/605.1.15"),
    ("Edge (Windows)", "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36 Edg/138.0.3351.83"),
    ("Firefox (Ubuntu)", "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0"),
    ("VLC", "VLC/3.0.16 LibVLC/3.0.16"),
    ("Lavf (FFmpeg)", "Lavf/60.3.100"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    #[serde(default = "default_catalog_timeout")]
    pub catalog_timeout_secs: u64,
    // Liveness probing
    #[serde(default = "default_head_timeout")]
    pub head_timeout_ms: u64,
    #[serde(default = "default_get_timeout")]
    pub get_timeout_ms: u64,
    #[serde(default = "default_probe_workers")]
    pub probe_workers: usize,
    // Page sniffing
    #[serde(default = "default_sniff_window")]
    pub sniff_window_secs: u64,
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,
    #[serde(default)]
    pub chrome_executable: String,
    // User agent settings
    #[serde(default)]
    pub selected_user_agent: usize,
    #[serde(default)]
    pub custom_user_agent: String,
    #[serde(default)]
    pub use_custom_user_agent: bool,
    // Playback
    #[serde(default)]
    pub external_player: String,
    // Empty means the default location next to config.json
    #[serde(default)]
    pub favorites_path: String,
}

fn default_catalog_url() -> String { DEFAULT_CATALOG_URL.to_string() }
fn default_catalog_timeout() -> u64 { 15 }
fn default_head_timeout() -> u64 { 2500 }
fn default_get_timeout() -> u64 { 3500 }
fn default_probe_workers() -> usize { 20 }
fn default_sniff_window() -> u64 { 15 }
fn default_navigation_timeout() -> u64 { 30 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            catalog_timeout_secs: default_catalog_timeout(),
            head_timeout_ms: default_head_timeout(),
            get_timeout_ms: default_get_timeout(),
            probe_workers: default_probe_workers(),
            sniff_window_secs: default_sniff_window(),
            navigation_timeout_secs: default_navigation_timeout(),
            chrome_executable: String::new(),
            selected_user_agent: 0,
            custom_user_agent: String::new(),
            use_custom_user_agent: false,
            external_player: String::new(),
            favorites_path: String::new(),
        }
    }
}

/// `<config dir>/streamhunter`, created on demand
pub fn app_dir() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    fs::create_dir_all(&path).ok();
    path
}

impl AppConfig {
    pub fn config_path() -> PathBuf {
        app_dir().join("config.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Missing or unreadable files yield the defaults
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring invalid config {}: {}", path.display(), e),
                }
            }
        }

        Self::default()
    }

    pub fn save(&self) {
        self.save_to(&Self::config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Ok(content) = serde_json::to_string_pretty(self) {
            if let Err(e) = fs::write(path, content) {
                log::warn!("Failed to save config {}: {}", path.display(), e);
            }
        }
    }

    /// Custom agent if enabled, else the selected preset
    pub fn user_agent(&self) -> String {
        if self.use_custom_user_agent && !self.custom_user_agent.trim().is_empty() {
            return self.custom_user_agent.trim().to_string();
        }
        USER_AGENTS
            .get(self.selected_user_agent)
            .map(|(_, ua)| ua.to_string())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn favorites_file(&self) -> PathBuf {
        if self.favorites_path.trim().is_empty() {
            app_dir().join("favorites.json")
        } else {
            PathBuf::from(self.favorites_path.trim())
        }
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            url: self.catalog_url.clone(),
            timeout: Duration::from_secs(self.catalog_timeout_secs),
            user_agent: self.user_agent(),
        }
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            head_timeout: Duration::from_millis(self.head_timeout_ms),
            get_timeout: Duration::from_millis(self.get_timeout_ms),
            workers: self.probe_workers.max(1),
            user_agent: self.user_agent(),
        }
    }

    pub fn sniff_config(&self) -> SniffConfig {
        SniffConfig {
            user_agent: self.user_agent(),
            window: Duration::from_secs(self.sniff_window_secs),
            navigation_timeout: Duration::from_secs(self.navigation_timeout_secs),
            chrome_executable: match self.chrome_executable.trim() {
                "" => None,
                path => Some(PathBuf::from(path)),
            },
            ..SniffConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_probe_policy() {
        let config = AppConfig::default();
        let probe = config.probe_config();
        assert_eq!(probe.head_timeout, Duration::from_millis(2500));
        assert_eq!(probe.get_timeout, Duration::from_millis(3500));
        assert_eq!(probe.workers, 20);
        assert_eq!(config.catalog_config().timeout, Duration::from_secs(15));
        assert_eq!(config.sniff_config().window, Duration::from_secs(15));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"probe_workers": 4, "use_custom_user_agent": true, "custom_user_agent": " Test/1.0 "}"#).unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.probe_workers, 4);
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.user_agent(), "Test/1.0");
    }

    #[test]
    fn test_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(AppConfig::load_from(&path).probe_workers, 20);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = AppConfig {
            external_player: "mpv".to_string(),
            selected_user_agent: 2,
            ..AppConfig::default()
        };
        config.save_to(&path);

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.external_player, "mpv");
        assert_eq!(loaded.user_agent(), USER_AGENTS[2].1);
    }

    #[test]
    fn test_out_of_range_preset_uses_default_agent() {
        let config = AppConfig {
            selected_user_agent: 999,
            ..AppConfig::default()
        };
        assert_eq!(config.user_agent(), DEFAULT_USER_AGENT);
    }
}
