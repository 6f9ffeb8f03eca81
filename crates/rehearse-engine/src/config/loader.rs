use super::schema::RehearseConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./rehearse.yaml
    /// 2. ~/.rehearse/config.yaml
    /// 3. Default configuration
    ///
    /// Environment overrides are applied on top.
    pub async fn load_default() -> Result<RehearseConfig, ConfigError> {
        let mut config = Self::load_file_default().await?;
        Self::apply_env(&mut config);
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    async fn load_file_default() -> Result<RehearseConfig, ConfigError> {
        let local_config = PathBuf::from("./rehearse.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".rehearse").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(RehearseConfig::default())
    }

    pub async fn load_from(path: &Path) -> Result<RehearseConfig, ConfigError> {
        debug!("Loading config from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        let config: RehearseConfig = serde_yaml::from_str(&content)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    pub fn apply_env(config: &mut RehearseConfig) {
        Self::apply_env_from(config, |key| std::env::var(key).ok());
    }

    /// Apply overrides from any variable source. Unparseable values are ignored
    /// with a warning.
    pub fn apply_env_from<F>(config: &mut RehearseConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(user) = get("REHEARSE_EMAIL") {
            config.user = Some(user);
        }
        if let Some(password) = get("REHEARSE_PASSWORD") {
            config.password = Some(password);
        }
        if let Some(hours) = get("REHEARSE_TARGET_HOURS") {
            match hours.trim().parse::<f64>() {
                Ok(h) if h > 0.0 => config.target_hours = h,
                _ => warn!("Ignoring REHEARSE_TARGET_HOURS={:?}", hours),
            }
        }
        if let Some(mode) = get("REHEARSE_MODE") {
            match mode.parse() {
                Ok(m) => config.mode = m,
                Err(e) => warn!("Ignoring REHEARSE_MODE: {}", e),
            }
        }
        if let Some(dir) = get("REHEARSE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = get("REHEARSE_HEADLESS") {
            match parse_flag(&flag) {
                Some(b) => config.browser.headless = b,
                None => warn!("Ignoring REHEARSE_HEADLESS={:?}", flag),
            }
        }
        if let Some(flag) = get("REHEARSE_DEBUG") {
            match parse_flag(&flag) {
                Some(b) => config.debug.enabled = b,
                None => warn!("Ignoring REHEARSE_DEBUG={:?}", flag),
            }
        }
        if let Some(bin) = get("CHROME_BIN") {
            config.browser.chrome_bin = Some(PathBuf::from(bin));
        }
        if let Some(dir) = get("REHEARSE_USER_DATA_DIR") {
            config.browser.user_data_dir = Some(PathBuf::from(dir));
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
