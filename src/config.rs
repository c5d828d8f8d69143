/// Runtime configuration from environment variables.
///
/// | Variable         | Default                      |
/// |------------------|------------------------------|
/// | `WSV_BIND`       | `127.0.0.1:3000`             |
/// | `WSV_DATA_DIR`   | `$HOME/.whysoviral`          |
/// | `RAPIDAPI_KEY`   | none (required for scraping) |
/// | `RAPIDAPI_HOST`  | `tiktok-scraper7.p.rapidapi.com` |
/// | `WSV_API_BASE`   | `https://<RAPIDAPI_HOST>`    |
/// | `WSV_MAX_POSTS`  | `100`                        |
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

use crate::scraper::{ScraperConfig, DEFAULT_HOST};

pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Posts pulled from the provider per profile scrape.
pub const DEFAULT_MAX_POSTS: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub data_dir: PathBuf,
    pub rapidapi_key: Option<String>,
    pub rapidapi_host: String,
    pub api_base: Option<String>,
    pub max_posts: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match var("WSV_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(var("HOME")),
        };

        Ok(Self {
            bind: var("WSV_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            data_dir,
            rapidapi_key: var("RAPIDAPI_KEY"),
            rapidapi_host: var("RAPIDAPI_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            api_base: var("WSV_API_BASE"),
            max_posts: parse_or("WSV_MAX_POSTS", var("WSV_MAX_POSTS"), DEFAULT_MAX_POSTS)?,
        })
    }

    /// Scraper settings; fails when no API key is configured.
    pub fn scraper_config(&self) -> Result<ScraperConfig> {
        let Some(key) = self.rapidapi_key.as_deref() else {
            bail!("RAPIDAPI_KEY is not set; it is required to fetch TikTok data");
        };
        let mut config = ScraperConfig::new(key);
        config.host = self.rapidapi_host.clone();
        config.base_url = self
            .api_base
            .clone()
            .unwrap_or_else(|| format!("https://{}", self.rapidapi_host));
        Ok(config)
    }
}

fn default_data_dir(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(".whysoviral"),
        None => {
            tracing::warn!("HOME not set, using ./.whysoviral as data directory");
            PathBuf::from(".whysoviral")
        }
    }
}

fn parse_or<T>(key: &str, value: Option<String>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        None => Ok(default),
    }
}
