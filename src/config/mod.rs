//! Configuration file management
//!
//! Loads TOML configuration files and provides bridge settings.
//! Default config path: ~/.config/a11y-input-bridge/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::{COSMIC_ATSPI_MANAGER_VERSION, EI_CLIENT_NAME};
use crate::device::Backend;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend selection
    pub bridge: BridgeConfig,
    /// Session transport settings
    pub session: SessionConfig,
    /// Injection channel settings
    pub injection: InjectionConfig,
    /// Logging settings
    pub log: LogConfig,
    /// Accessibility bus settings
    pub a11y: A11yConfig,
    /// Key grabs registered at startup
    #[serde(rename = "grab")]
    pub grabs: Vec<GrabConfig>,
}

/// Backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// "cosmic"
    pub backend: Backend,
}

/// Session transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Highest `cosmic_atspi_manager_v1` version to bind
    pub version: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: COSMIC_ATSPI_MANAGER_VERSION,
        }
    }
}

/// Injection channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Client name announced in the libei handshake
    pub client_name: String,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            client_name: EI_CLIENT_NAME.to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Accessibility bus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct A11yConfig {
    /// Connect to the AT-SPI bus for mouse event synthesis
    pub enabled: bool,
}

impl Default for A11yConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One key grab
///
/// ```toml
/// [[grab]]
/// key_code = 28          # XKB key code of "t"
/// modifiers = 0x4        # Control
/// modifier_keys = [118]  # Insert acts as an extra modifier
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrabConfig {
    /// XKB key code
    pub key_code: u32,
    /// Hardware modifier mask
    pub modifiers: u32,
    /// XKB key codes used as virtual modifiers
    pub modifier_keys: Vec<u32>,
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/a11y-input-bridge/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<PathBuf> {
        // 1. A11Y_BRIDGE_CONFIG environment variable
        if let Ok(path) = std::env::var("A11Y_BRIDGE_CONFIG") {
            let p = Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/a11y-input-bridge/config.toml
        if let Some(path) = Self::user_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        // 3. System config
        let system_config = Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("a11y-input-bridge").join("config.toml"))
    }

    /// Load configuration with priority:
    /// 1. A11Y_BRIDGE_CONFIG environment variable
    /// 2. ~/.config/a11y-input-bridge/config.toml (user config)
    /// 3. /etc/a11y-input-bridge/config.toml (system config)
    /// 4. Built-in defaults
    ///
    /// A file that exists but cannot be read or parsed is an error, so the
    /// caller can report it once logging is up.
    pub fn load() -> Result<Self> {
        Self::load_at(Self::config_path().as_deref())
    }

    fn load_at(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Load settings from specified path
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the default template to the user config path
    ///
    /// An existing file is only replaced when `force` is set.
    pub fn write_default_config(force: bool) -> Result<PathBuf> {
        let path = Self::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Config directory not found"))?;
        Self::write_template(&path, force)?;
        Ok(path)
    }

    fn write_template(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        std::fs::write(path, DEFAULT_TEMPLATE)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

const DEFAULT_TEMPLATE: &str = r#"# a11y-input-bridge configuration

[bridge]
# Compositor backend: "cosmic"
backend = "cosmic"

[session]
# Highest cosmic_atspi_manager_v1 version to bind
version = 1

[injection]
# Name announced to the compositor's libei server
client_name = "a11y-input-bridge"

[log]
# Used when RUST_LOG is not set: error | warn | info | debug | trace
level = "warn"

[a11y]
# Connect to the AT-SPI bus (needed for synthetic mouse events)
enabled = true

# Key grabs registered at startup. Key codes are XKB key codes
# (evdev + 8). modifier_keys turns ordinary keys into modifiers.
#
# [[grab]]
# key_code = 28
# modifiers = 0x4
# modifier_keys = [118]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bridge.backend, Backend::Cosmic);
        assert_eq!(config.session.version, 1);
        assert_eq!(config.injection.client_name, "a11y-input-bridge");
        assert_eq!(config.log.level, "warn");
        assert!(config.a11y.enabled);
        assert!(config.grabs.is_empty());
    }

    #[test]
    fn test_template_parses_to_defaults() {
        let config = Config::parse(DEFAULT_TEMPLATE).unwrap();
        let defaults = Config::default();
        assert_eq!(config.session.version, defaults.session.version);
        assert_eq!(config.injection.client_name, defaults.injection.client_name);
        assert_eq!(config.log.level, defaults.log.level);
        assert!(config.grabs.is_empty());
    }

    #[test]
    fn test_partial_config() {
        let config = Config::parse(
            r#"
            [log]
            level = "debug"

            [[grab]]
            key_code = 28
            modifiers = 4
            modifier_keys = [118]

            [[grab]]
            key_code = 38
            "#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.injection.client_name, "a11y-input-bridge");
        assert_eq!(config.grabs.len(), 2);
        assert_eq!(config.grabs[0].modifier_keys, vec![118]);
        assert_eq!(config.grabs[1].modifiers, 0);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::parse("[bridge]\nbackend = \"gnome\"").is_err());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("a11y-input-bridge-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[grab]]\nkey_code = \"t\"\n").unwrap();

        let err = Config::load_at(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
        assert!(Config::load_from_file(&path).is_err());

        let missing = dir.join("missing.toml");
        assert!(Config::load_from_file(&missing).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_no_file_gives_defaults() {
        let config = Config::load_at(None).unwrap();
        assert!(config.grabs.is_empty());
        assert_eq!(config.log.level, LogConfig::default().level);
    }

    #[test]
    fn test_write_template_respects_force() {
        let path = std::env::temp_dir()
            .join(format!("a11y-input-bridge-config-{}", std::process::id()))
            .join("config.toml");
        let _ = std::fs::remove_file(&path);

        Config::write_template(&path, false).unwrap();
        assert!(Config::write_template(&path, false).is_err());
        Config::write_template(&path, true).unwrap();
        assert!(Config::load_from_file(&path).is_ok());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
