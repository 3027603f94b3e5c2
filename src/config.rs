//! TOML configuration with environment overrides.
//!
//! The file is optional: every section has defaults, so `pgen serve` works
//! with nothing but `STABILITY_API_KEY` in the environment. After the file
//! is parsed, `PORT` replaces the port of `[server].bind` and the provider
//! credential is resolved from the variable named by `[provider].api_key_env`.
//! The resulting [`Config`] is passed explicitly to everything that needs it.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Absolute base prepended to returned image URLs. When unset the
    /// endpoint answers with a root-relative path.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_url: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5001".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            image_dir: default_image_dir(),
            url_prefix: default_url_prefix(),
        }
    }
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("./public/images")
}
fn default_url_prefix() -> String {
    "/images".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Resolved from the environment by [`load_config`]; never read from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            endpoint: default_endpoint(),
            output_format: default_output_format(),
            api_key_env: default_api_key_env(),
            api_key: None,
        }
    }
}

fn default_provider_kind() -> String {
    "stability".to_string()
}
fn default_endpoint() -> String {
    "https://api.stability.ai/v2beta/stable-image/generate/ultra".to_string()
}
fn default_output_format() -> String {
    "webp".to_string()
}
fn default_api_key_env() -> String {
    "STABILITY_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:5001".to_string()
}

impl ProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.kind != "disabled"
    }
}

impl Config {
    /// The socket address the server binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("server.bind is not a socket address: {}", self.server.bind))
    }
}

/// Load configuration from `path`, falling back to defaults when the file
/// does not exist, then apply environment overrides and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Apply `PORT` and the provider credential. `lookup` is injected so tests
/// don't have to mutate the process environment.
pub fn apply_env<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("PORT is not a valid port number: {}", port))?;
        let mut addr = config.bind_addr()?;
        addr.set_port(port);
        config.server.bind = addr.to_string();
    }

    config.provider.api_key = lookup(&config.provider.api_key_env).filter(|k| !k.is_empty());
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    config.bind_addr()?;

    match config.provider.kind.as_str() {
        "stability" | "disabled" => {}
        other => bail!(
            "Unknown provider kind: '{}'. Must be stability or disabled.",
            other
        ),
    }

    match config.provider.output_format.as_str() {
        "webp" | "png" | "jpeg" => {}
        other => bail!(
            "provider.output_format must be webp, png, or jpeg (got '{}')",
            other
        ),
    }

    if !config.storage.url_prefix.starts_with('/') || config.storage.url_prefix.trim_matches('/').is_empty() {
        bail!("storage.url_prefix must be a path below '/', e.g. \"/images\"");
    }

    Ok(())
}
