use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub db_path: PathBuf,

    /// User the commands run as. Written by `login` and `register`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,

    #[serde(default)]
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "gator".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine the config directory"))?;
        Ok(dir.join("gator").join("config.toml"))
    }

    fn with_default_db() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine the data directory"))?;
        Ok(Self {
            db_path: dir.join("gator").join("gator.db"),
            current_user_name: None,
            fetch: FetchConfig::default(),
        })
    }

    /// Read the config file, writing a default one first if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::with_default_db()?;
            config.save(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn set_user(&mut self, name: &str) {
        self.current_user_name = Some(name.to_string());
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(AppError::Config("'db_path' must not be empty".to_string()));
        }
        if self.current_user_name.as_deref() == Some("") {
            return Err(AppError::Config(
                "'current_user_name' must not be empty if provided".to_string(),
            ));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::Config(
                "'fetch.timeout_secs' must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
