use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::{bail, Context};
use log::info;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};

use crate::catalog::CatalogError;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub body_limit_bytes: usize,
    pub catalog_path: PathBuf,
    pub catalog_url: Option<String>,
    pub static_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Config {
    /// Reads the environment, after loading a `.env` file when one exists.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let body_limit_mb: usize = parse_var(&lookup, "BODY_LIMIT_MB", 5)?;
        let path = |key: &str, default: &str| {
            PathBuf::from(lookup(key).unwrap_or_else(|| default.to_string()))
        };

        Ok(Self {
            port: parse_var(&lookup, "PORT", 5000)?,
            body_limit_bytes: body_limit_mb * 1024 * 1024,
            catalog_path: path("CLASS_JSON", "class.json"),
            catalog_url: lookup("CATALOG_URL").filter(|url| !url.is_empty()),
            static_dir: path("STATIC_DIR", "static"),
            models_dir: path("MODELS_DIR", "."),
        })
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.static_dir.join("uploads")
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a valid number, got {raw:?}")),
        None => Ok(default),
    }
}

async fn download_file(url: &str, path: &Path) -> anyhow::Result<()> {
    info!("Downloading {} from {}", path.display(), url);

    let mut header_map = HeaderMap::new();

    if let Ok(token) = env::var("GITHUB_TOKEN") {
        let auth_value = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("Invalid GITHUB_TOKEN format")?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .headers(header_map)
        .send()
        .await
        .with_context(|| format!("Failed to send request to {url}"))?;

    if !response.status().is_success() {
        bail!("Failed to download {}: {}", url, response.status());
    }

    let bytes = response.bytes().await.context("Failed to read bytes")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Fetches the catalog from `CATALOG_URL` when it is not on disk yet.
pub async fn ensure_catalog_exists(config: &Config) -> anyhow::Result<()> {
    info!("Checking nutrition catalog...");
    if config.catalog_path.exists() {
        return Ok(());
    }

    match &config.catalog_url {
        Some(url) => download_file(url, &config.catalog_path).await,
        None => Err(CatalogError::Missing {
            path: config.catalog_path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "file not found and CATALOG_URL is not set",
            ),
        }
        .into()),
    }
}
