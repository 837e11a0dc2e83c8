use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSettings {
    /// Path to the adb binary; empty means "adb" from PATH.
    pub adb_path: String,
    /// Path to the aapt binary; empty means "aapt" from PATH.
    pub aapt_path: String,
    pub command_timeout_secs: u64,
    /// Installs push the whole APK over the transport and can take far longer
    /// than the chatty one-shot commands.
    pub install_timeout_secs: u64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            adb_path: String::new(),
            aapt_path: String::new(),
            command_timeout_secs: 10,
            install_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSettings {
    /// Per-phase budget for the log watcher, in device-clock seconds.
    pub budget_secs: i64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { budget_secs: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepackageSettings {
    /// External rebuild command line. `{input}` and `{output}` tokens are
    /// replaced with the original and rebuilt APK paths. The command is
    /// expected to leave an installable (signed, aligned) APK at `{output}`.
    pub command: String,
    pub output_dir: String,
    pub timeout_secs: u64,
}

impl Default for RepackageSettings {
    fn default() -> Self {
        Self {
            command: String::new(),
            output_dir: String::new(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSettings {
    /// Where the run summary, summary log and failure bundles are written;
    /// empty resolves to a temp directory at startup.
    pub output_dir: String,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub repackage: RepackageSettings,
    #[serde(default)]
    pub report: ReportSettings,
    /// Directory scanned for `*.apk` files when no paths are given on the
    /// command line.
    #[serde(default)]
    pub apk_dir: String,
    /// Optional JSON file (array of file names) extending the built-in
    /// known-failure set.
    #[serde(default)]
    pub known_failures_file: String,
    #[serde(default)]
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tools: ToolSettings::default(),
            watch: WatchSettings::default(),
            repackage: RepackageSettings::default(),
            report: ReportSettings::default(),
            apk_dir: "./apks".to_string(),
            known_failures_file: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("APK_REGRESS_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".apk_regress_config.json")
}

pub fn backup_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".apk_regress_config.backup.json")
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    if config.watch.budget_secs < 1 {
        config.watch.budget_secs = 10;
    }
    if config.tools.command_timeout_secs < 1 {
        config.tools.command_timeout_secs = 10;
    }
    if config.tools.install_timeout_secs < config.tools.command_timeout_secs {
        config.tools.install_timeout_secs = 120;
    }
    if config.repackage.timeout_secs < 1 {
        config.repackage.timeout_secs = 600;
    }
    if config.apk_dir.trim().is_empty() {
        config.apk_dir = "./apks".to_string();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("tmp");
        let config = load_config_from_path(&dir.path().join("absent.json")).expect("config");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.watch.budget_secs, 10);
    }

    #[test]
    fn partial_file_fills_remaining_sections() {
        let dir = TempDir::new().expect("tmp");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            serde_json::json!({
                "watch": { "budget_secs": 25 },
                "apk_dir": "/data/apks"
            })
            .to_string(),
        )
        .expect("write config");

        let config = load_config_from_path(&path).expect("config");
        assert_eq!(config.watch.budget_secs, 25);
        assert_eq!(config.apk_dir, "/data/apks");
        assert_eq!(config.tools.command_timeout_secs, 10);
        assert_eq!(config.repackage.timeout_secs, 600);
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.watch.budget_secs = 0;
        config.tools.command_timeout_secs = 0;
        config.tools.install_timeout_secs = 1;
        config.apk_dir = "  ".to_string();
        let validated = validate_config(config);
        assert_eq!(validated.watch.budget_secs, 10);
        assert_eq!(validated.tools.command_timeout_secs, 10);
        assert_eq!(validated.tools.install_timeout_secs, 120);
        assert_eq!(validated.apk_dir, "./apks");
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = TempDir::new().expect("tmp");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let mut config = AppConfig::default();
        config.repackage.command = "./rebuild.sh {input} {output}".to_string();
        save_config_to_path(&config, &path, &backup).expect("save");
        let reloaded = load_config_from_path(&path).expect("reload");
        assert_eq!(reloaded.repackage.command, "./rebuild.sh {input} {output}");

        save_config_to_path(&reloaded, &path, &backup).expect("save again");
        assert!(backup.exists());
    }
}
