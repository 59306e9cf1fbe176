use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
    pub settings: Settings,
}

/// Contents of the optional `config.toml` in the data directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    /// User id the CLI acts as, and the server uses under `--no-auth`.
    pub default_user: String,
    /// Seeded into the user's settings when they have no offset yet.
    pub default_utc_offset_minutes: Option<i32>,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            default_user: "local".into(),
            default_utc_offset_minutes: None,
            server: ServerSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl Settings {
    /// Read settings from `path`; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "planner").context("Could not determine home directory")?;
        Self::load_from(proj_dirs.data_dir())
    }

    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let data_dir = data_dir.to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let settings = Settings::from_file(&data_dir.join("config.toml"))?;
        let db_path = data_dir.join("planner.db");

        Ok(Config {
            db_path,
            data_dir,
            settings,
        })
    }
}

/// Generate a random 256-bit API token, hex encoded.
pub fn generate_token() -> String {
    use rand::Rng;
    use std::fmt::Write;

    let bytes: [u8; 32] = rand::rng().random();
    bytes
        .iter()
        .fold(String::with_capacity(64), |mut acc: String, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        })
}
