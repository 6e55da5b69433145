//! Persisted defaults (`settings.json`) and path helpers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const DEFAULT_OVPN_PATH: &str = "./config.ovpn";
pub const DEFAULT_OPENVPN_BINARY: &str = "openvpn";
pub const DEFAULT_ELEVATE: &str = "sudo";

/// Values remembered between runs. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openvpn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
}

// ── Persistence ───────────────────────────────────────────────────────────────

pub fn settings_path() -> PathBuf {
    let base = dirs::config_dir()
        .unwrap_or_else(|| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/root".into()))
                .join(".config")
        });
    base.join("aws-saml-vpn").join("settings.json")
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::Settings(format!("Bad {}: {}", path.display(), e)))
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, &json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Expands a leading `~` or `~/` to the current user's home directory.
/// Anything else, including `~user`, is returned untouched.
pub fn expand_home(path: &str) -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
    if path == "~" {
        return home();
    }
    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_handles_tilde_forms() {
        let home = dirs::home_dir().expect("home dir");
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/vpn/aws.ovpn"), home.join("vpn/aws.ovpn"));
        assert_eq!(expand_home("/etc/aws.ovpn"), PathBuf::from("/etc/aws.ovpn"));
        assert_eq!(expand_home("~other/x"), PathBuf::from("~other/x"));
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn settings_survive_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            config: Some("~/aws.ovpn".into()),
            openvpn: Some("/opt/awsvpnclient/openvpn".into()),
            elevate: None,
            browser: Some("firefox".into()),
        };
        save_settings(&path, &settings).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("elevate"));
        assert_eq!(load_settings(&path).unwrap(), settings);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn malformed_settings_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings(&path), Err(AppError::Settings(_))));
    }
}
