use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_API_URL: &str = "http://localhost:8787";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_LIST_PAGE_SIZE: usize = 100;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
    #[error("Could not determine a home directory for the data directory")]
    NoHomeDir,
}

/// Application configuration
/// Loaded from an optional .env file, then from SNAPVAULT_* environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the photo backend
    pub api_url: String,
    /// Base URL of the Nominatim-compatible geocoder
    pub geocoder_url: String,
    /// Where preferences live (default ~/.snapvault)
    pub data_dir: PathBuf,
    /// Overrides the keychain token when set
    pub upload_token: Option<String>,
    /// Parse worker budget; `None` derives it from the CPU count
    pub parse_workers: Option<usize>,
    pub thumbnail_edge: u32,
    pub list_page_size: usize,
}

impl Config {
    /// Load .env (if any) and read the environment
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        } else {
            debug!("Config: no .env file found");
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_url = get("SNAPVAULT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let geocoder_url =
            get("SNAPVAULT_GEOCODER_URL").unwrap_or_else(|| DEFAULT_GEOCODER_URL.to_string());

        let data_dir = match get("SNAPVAULT_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join(".snapvault"),
        };

        let parse_workers = parse_positive("SNAPVAULT_PARSE_WORKERS", get("SNAPVAULT_PARSE_WORKERS"))?;
        let thumbnail_edge: Option<u32> =
            parse_positive("SNAPVAULT_THUMBNAIL_EDGE", get("SNAPVAULT_THUMBNAIL_EDGE"))?;
        let list_page_size =
            parse_positive("SNAPVAULT_LIST_PAGE_SIZE", get("SNAPVAULT_LIST_PAGE_SIZE"))?;

        let config = Self {
            api_url,
            geocoder_url,
            data_dir,
            upload_token: get("SNAPVAULT_UPLOAD_TOKEN"),
            parse_workers,
            thumbnail_edge: thumbnail_edge.unwrap_or(crate::extract::DEFAULT_THUMBNAIL_EDGE),
            list_page_size: list_page_size.unwrap_or(DEFAULT_LIST_PAGE_SIZE),
        };

        debug!(
            "Config: api={} geocoder={} data_dir={}",
            config.api_url,
            config.geocoder_url,
            config.data_dir.display()
        );
        Ok(config)
    }

    pub fn preferences_dir(&self) -> PathBuf {
        self.data_dir.join("prefs")
    }
}

fn parse_positive<T>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(value) = value else {
        return Ok(None);
    };
    match value.parse::<T>() {
        Ok(n) if n > T::default() => Ok(Some(n)),
        _ => Err(ConfigError::InvalidNumber { var, value }),
    }
}
