//! Configuration management for the server.

use importer_engine::{Capabilities, ImportOptions};
use reqwest::Url;
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Base URL of the remote record store
    pub store_url: Url,
    /// Bearer token sent to the remote store
    pub store_token: Option<String>,
    /// Bulk verbs the remote store declares
    pub store_bulk: Capabilities,
    /// Token clients must present; anonymous access when unset
    pub auth_secret: Option<String>,
    /// Switches applied to every import
    pub import: ImportFlags,
    /// How long an unanswered import is kept
    pub session_ttl: Duration,
}

/// Import switches shared by every session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportFlags {
    pub disable_bulk_create: bool,
    pub disable_bulk_update: bool,
    pub disable_bulk_lookup: bool,
    pub disable_add_new: bool,
    pub disable_replace: bool,
    pub logging: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let session_ttl = lookup("SESSION_TTL_SECS")
            .unwrap_or_else(|| "1800".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or(ConfigError::InvalidSessionTtl)?;

        let store_url = lookup("STORE_URL").ok_or(ConfigError::MissingStoreUrl)?;
        let store_url = Url::parse(&store_url).map_err(|_| ConfigError::InvalidStoreUrl(store_url))?;
        if store_url.cannot_be_a_base() {
            return Err(ConfigError::InvalidStoreUrl(store_url.to_string()));
        }

        let store_bulk = match lookup("STORE_BULK") {
            Some(list) => Capabilities::parse_list(&list).map_err(ConfigError::UnknownBulkVerb)?,
            None => Capabilities::none(),
        };

        let flag = |name: &'static str| -> Result<bool, ConfigError> {
            match lookup(name) {
                None => Ok(false),
                Some(value) => parse_flag(&value).ok_or(ConfigError::InvalidFlag { name, value }),
            }
        };
        let import = ImportFlags {
            disable_bulk_create: flag("DISABLE_BULK_CREATE")?,
            disable_bulk_update: flag("DISABLE_BULK_UPDATE")?,
            disable_bulk_lookup: flag("DISABLE_BULK_LOOKUP")?,
            disable_add_new: flag("DISABLE_ADD_NEW")?,
            disable_replace: flag("DISABLE_REPLACE")?,
            logging: flag("IMPORT_LOGGING")?,
        };

        Ok(Self {
            host,
            port,
            store_url,
            store_token: lookup("STORE_TOKEN").filter(|t| !t.is_empty()),
            store_bulk,
            auth_secret: lookup("AUTH_SECRET").filter(|s| !s.is_empty()),
            import,
            session_ttl,
        })
    }

    /// Options for a new import session.
    pub fn import_options(&self) -> ImportOptions {
        let flags = self.import;
        ImportOptions {
            disable_bulk_create: flags.disable_bulk_create,
            disable_bulk_update: flags.disable_bulk_update,
            disable_bulk_lookup: flags.disable_bulk_lookup,
            disable_add_new: flags.disable_add_new,
            disable_replace: flags.disable_replace,
            logging_enabled: flags.logging,
            ..ImportOptions::default()
        }
        .with_refresh(|summary| {
            tracing::info!(
                resource = %summary.resource,
                succeeded = summary.succeeded(),
                skipped = summary.skipped,
                "Import finished"
            );
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STORE_URL environment variable is required")]
    MissingStoreUrl,

    #[error("Invalid STORE_URL value: {0}")]
    InvalidStoreUrl(String),

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid SESSION_TTL_SECS value, expected a positive number of seconds")]
    InvalidSessionTtl,

    #[error("Unknown bulk verb in STORE_BULK: {0}")]
    UnknownBulkVerb(String),

    #[error("Invalid {name} value: {value}")]
    InvalidFlag { name: &'static str, value: String },
}
