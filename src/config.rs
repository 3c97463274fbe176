//! Configuration system for ringwm
//!
//! Loads the key binding table from TOML at `~/.config/ringwm/config.toml`.
//! Auto-generates the default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::wm::keyboard::{Action, KeyBinding, Modifiers, keysym_from_name};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub keybindings: Vec<KeybindingConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let alt = || vec!["Mod1".to_string()];
        Self {
            keybindings: vec![
                KeybindingConfig::new("q", alt(), Action::Quit),
                KeybindingConfig::new("Tab", alt(), Action::Cycle),
                KeybindingConfig::new("p", alt(), Action::Spawn(vec!["dmenu_run".into()])),
                KeybindingConfig::new("Return", alt(), Action::Spawn(vec!["st".into()])),
                KeybindingConfig::new(
                    "c",
                    vec!["Mod1".into(), "Shift".into()],
                    Action::CloseCurrent,
                ),
            ],
        }
    }
}

impl Config {
    /// Load configuration from file, or use defaults if it is missing or broken
    pub fn load() -> Self {
        let config_path = match Self::config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("{:#}, using default configuration", e);
                return Self::default();
            }
        };

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {:#}", e);
            }
            return Self::default();
        }

        match Self::load_from(&config_path) {
            Ok(config) => {
                info!("Configuration loaded from {:?}", config_path);
                debug!("Config: {:?}", config);
                config
            }
            Err(e) => {
                warn!("{:#}, using default configuration", e);
                Self::default()
            }
        }
    }

    /// Read and parse a specific config file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Build the ordered binding table, skipping entries that do not resolve
    pub fn key_bindings(&self) -> Vec<KeyBinding> {
        self.keybindings
            .iter()
            .filter_map(|entry| match entry.resolve() {
                Ok(binding) => Some(binding),
                Err(e) => {
                    warn!("Skipping key binding {:?}: {:#}", entry.key, e);
                    None
                }
            })
            .collect()
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(env!("CARGO_PKG_NAME"));

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// One `[[keybindings]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeybindingConfig {
    /// Key name: a single character, "Return", "Tab", "F1".."F12", ...
    pub key: String,
    /// Modifier names: "Shift", "Control", "Mod1".."Mod5"
    #[serde(default)]
    pub modifiers: Vec<String>,
    pub action: Action,
}

impl KeybindingConfig {
    pub fn new(key: &str, modifiers: Vec<String>, action: Action) -> Self {
        Self {
            key: key.to_string(),
            modifiers,
            action,
        }
    }

    fn resolve(&self) -> Result<KeyBinding> {
        let keysym = keysym_from_name(&self.key)
            .with_context(|| format!("unknown key {:?}", self.key))?;

        let mut modifiers = Modifiers::empty();
        for name in &self.modifiers {
            modifiers |= Modifiers::from_config_name(name)
                .with_context(|| format!("unknown modifier {:?}", name))?;
        }

        if let Action::Spawn(argv) = &self.action {
            anyhow::ensure!(!argv.is_empty(), "spawn needs a command");
        }

        Ok(KeyBinding::new(keysym, modifiers, self.action.clone()))
    }
}
