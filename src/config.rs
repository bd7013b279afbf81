use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use directories::BaseDirs;
use log::{debug, warn};
use serde::Deserialize;

use crate::actions::Action;
use crate::credentials::Credentials;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_NAME: &str = "carddav-util";

/// How requests are authenticated when a user is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthScheme {
    #[default]
    Basic,
    Digest,
}

impl AuthScheme {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(AuthScheme::Basic),
            "digest" => Some(AuthScheme::Digest),
            _ => None,
        }
    }
}

/// Everything needed to open a session against the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
    pub auth: AuthScheme,
    pub verify_certificates: bool,
}

/// The resolved, immutable configuration of one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub file: PathBuf,
    pub action: Action,
}

/// Validated options, before the password has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub url: String,
    pub file: PathBuf,
    pub user: Option<String>,
    pub passwd: Option<String>,
    pub auth: AuthScheme,
    pub verify_certificates: bool,
    pub action: Action,
}

impl Config {
    pub fn new(options: Options, credentials: Option<Credentials>) -> Self {
        Config {
            server: ServerConfig {
                url: options.url,
                credentials,
                auth: options.auth,
                verify_certificates: options.verify_certificates,
            },
            file: options.file,
            action: options.action,
        }
    }
}

// =============================================================================
// Defaults file
// =============================================================================

/// Values read from the optional configuration file.
///
/// Every field is optional; command-line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Defaults {
    pub url: Option<String>,
    pub user: Option<String>,
    pub auth: Option<AuthScheme>,
    pub verify_certificates: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DefaultsFile {
    url: Option<String>,
    user: Option<String>,
    auth: Option<String>,
    verify_certificates: Option<bool>,
}

impl DefaultsFile {
    fn into_defaults(self) -> Result<Defaults> {
        let auth = match self.auth {
            Some(raw) => Some(AuthScheme::from_str(&raw).ok_or_else(|| {
                anyhow!("invalid auth `{raw}`, expected \"basic\" or \"digest\"")
            })?),
            None => None,
        };

        let non_empty = |value: Option<String>| {
            value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Ok(Defaults {
            url: non_empty(self.url),
            user: non_empty(self.user),
            auth,
            verify_certificates: self.verify_certificates,
        })
    }
}

fn config_root() -> Result<PathBuf> {
    let base = BaseDirs::new().context("unable to determine base directories")?;
    Ok(base.config_dir().join(APP_NAME))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_root()?.join(CONFIG_FILE_NAME))
}

/// Load defaults from `explicit`, or from the per-user config file if it exists.
///
/// An explicit path that does not exist is an error; a missing per-user file
/// is not.
pub fn load_defaults(explicit: Option<&Path>) -> Result<Defaults> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("configuration file not found at {}", path.display());
            }
            path.to_path_buf()
        }
        None => {
            let path = config_path()?;
            if !path.exists() {
                debug!("no configuration file at {}", path.display());
                return Ok(Defaults::default());
            }
            path
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read configuration file at {}", path.display()))?;
    parse_defaults(&raw).with_context(|| format!("invalid configuration in {}", path.display()))
}

pub fn parse_defaults(raw: &str) -> Result<Defaults> {
    let value: toml::Value = toml::from_str(raw).context("failed to parse as TOML")?;

    warn_unknown_keys(&value);

    let file: DefaultsFile = value
        .try_into()
        .context("failed to deserialize configuration")?;
    file.into_defaults()
}

fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };

    let known = HashSet::from(["url", "user", "auth", "verify_certificates"]);

    for key in table.keys() {
        if key == "password" || key == "passwd" {
            warn!("ignoring `{key}` in configuration; passwords are never read from the file");
        } else if !known.contains(key.as_str()) {
            warn!("unknown configuration key `{key}`");
        }
    }
}
