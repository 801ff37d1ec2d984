//! Uploader configuration.
//!
//! Stored as TOML:
//! - Linux: `~/.config/fastdl-upload/config.toml`
//! - Windows: `%APPDATA%/fastdl-upload/config.toml`
//!
//! Command line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cli::Args;

/// Contents of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upload page URL, e.g. `https://fastdl.example/upload`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Fixed anti-forgery token. Usually left unset so it is scraped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,

    /// Session cookie of a logged-in user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,

    /// Seconds a tracking card stays open after the last progress update.
    #[serde(default = "default_linger")]
    pub linger_secs: u64,

    /// Follow server-side processing over the progress socket.
    #[serde(default = "default_true")]
    pub track_progress: bool,
}

fn default_linger() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            csrf_token: None,
            cookie: None,
            linger_secs: default_linger(),
            track_progress: default_true(),
        }
    }
}

impl Config {
    /// Loads the config from its default location, creating it with
    /// defaults if it does not exist yet.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // May hold a session cookie.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
            .join("fastdl-upload")
            .join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("fastdl-upload")
            .join("config.toml")
    }
}

/// Effective settings after merging the config file with the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub url: Url,
    pub csrf_token: Option<String>,
    pub cookie: Option<String>,
    pub linger: Duration,
    pub track_progress: bool,
}

impl Settings {
    pub fn resolve(config: Config, args: &Args) -> anyhow::Result<Self> {
        let url = match (&args.url, &config.url) {
            (Some(url), _) => url.clone(),
            (None, Some(raw)) => {
                Url::parse(raw).with_context(|| format!("invalid upload URL in config: {raw}"))?
            }
            (None, None) => anyhow::bail!("no upload URL: pass --url or set `url` in the config"),
        };
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("upload URL must be http or https, got {url}");
        }

        Ok(Self {
            url,
            csrf_token: non_blank(args.csrf_token.clone().or(config.csrf_token)),
            cookie: non_blank(args.cookie.clone().or(config.cookie)),
            linger: Duration::from_secs(args.linger.unwrap_or(config.linger_secs)),
            track_progress: config.track_progress && !args.no_tracking,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
