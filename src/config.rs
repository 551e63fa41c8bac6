use std::path::{Path, PathBuf};

use iced::Theme;
use serde::{Deserialize, Serialize};

use crate::api::DEFAULT_ENDPOINT;

const SETTINGS_DIR: &str = ".localchat";
const SETTINGS_FILE: &str = "settings.json";
/// Overrides the stored endpoint for one run.
pub const ENDPOINT_ENV: &str = "OLLAMA_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(with = "theme_name")]
    pub theme: Theme,
    pub endpoint: String,
    pub stream_responses: bool,
    pub show_metrics: bool,
    #[serde(skip)]
    pub settings_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            stream_responses: true,
            show_metrics: false,
            settings_file: Self::settings_file_path(),
        }
    }
}

impl Config {
    /// Reads `~/.localchat/settings.json`, then applies `OLLAMA_URL`.
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::settings_file_path());
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                log::info!("Using endpoint {} from {}", endpoint, ENDPOINT_ENV);
                config.endpoint = endpoint;
            }
        }
        config
    }

    /// Missing or broken files give the defaults; nothing is written here.
    pub fn load_from(path: &Path) -> Self {
        let defaults = Self {
            settings_file: path.to_path_buf(),
            ..Self::default()
        };
        if !path.exists() {
            log::info!("No settings at {}, using defaults", path.display());
            return defaults;
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|json| serde_json::from_str::<Self>(&json).map_err(anyhow::Error::from));
        match parsed {
            Ok(config) => Self {
                settings_file: path.to_path_buf(),
                ..config
            },
            Err(err) => {
                log::warn!("Ignoring unreadable settings at {}: {}", path.display(), err);
                defaults
            }
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_file.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let settings_json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.settings_file, settings_json)?;
        log::info!("Saved settings to {}", self.settings_file.display());
        Ok(())
    }

    pub fn update_settings(&self) {
        if let Err(err) = self.save() {
            log::error!("Failed to write settings file: {}", err);
        }
    }

    fn settings_file_path() -> PathBuf {
        home::home_dir()
            .map(|path| path.join(SETTINGS_DIR))
            .unwrap_or_else(|| SETTINGS_DIR.into())
            .join(SETTINGS_FILE)
    }
}

/// Themes are stored by their display name.
mod theme_name {
    use iced::Theme;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(theme: &Theme, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&theme.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Theme, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Theme::ALL
            .iter()
            .find(|theme| theme.to_string() == name)
            .cloned()
            .unwrap_or(Theme::Light))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("localchat-test-{}-{}", std::process::id(), name))
            .join(SETTINGS_FILE)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.theme, Theme::Light);
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert!(config.stream_responses);
        assert!(!config.show_metrics);
        assert!(config.settings_file.ends_with(".localchat/settings.json"));
    }

    #[test]
    fn test_serialize_config() {
        let config = Config {
            theme: Theme::Dark,
            ..Config::default()
        };
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["theme"], "Dark");
        assert_eq!(json["endpoint"], "http://localhost:11434");
        assert_eq!(json["stream_responses"], true);
        assert_eq!(json["show_metrics"], false);
        assert!(json.get("settings_file").is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: Config = serde_json::from_str(r#"{"theme":"Light"}"#).unwrap();
        assert_eq!(config.theme, Theme::Light);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert!(config.stream_responses);
    }

    #[test]
    fn test_deserialize_named_theme() {
        let config: Config =
            serde_json::from_str(r#"{"theme":"Tokyo Night","stream_responses":false}"#).unwrap();
        assert_eq!(config.theme, Theme::TokyoNight);
        assert!(!config.stream_responses);
    }

    #[test]
    fn test_deserialize_unknown_theme() {
        let config: Config = serde_json::from_str(r#"{"theme":"Neon"}"#).unwrap();
        assert_eq!(config.theme, Theme::Light);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_settings("roundtrip");
        let config = Config {
            theme: Theme::Dracula,
            endpoint: "http://gpu-box:11434".to_string(),
            stream_responses: false,
            show_metrics: true,
            settings_file: path.clone(),
        };
        config.save().unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_load_missing_file() {
        let path = temp_settings("missing");
        let config = Config::load_from(&path);

        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.settings_file, path);
        assert!(!path.exists());
    }

    #[test]
    fn test_load_broken_file() {
        let path = temp_settings("broken");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.theme, Theme::Light);
        assert_eq!(config.settings_file, path);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
