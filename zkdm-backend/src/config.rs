//! Service configuration.

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_RECORD_DB: &str = "data/records.db";
const DEFAULT_ASSET_DB: &str = "data/assets.db";
const DEFAULT_VK_SERVICE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRANSITION_ATTEMPTS: u32 = 3;

/// Where request and dataset records live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordBackendKind {
    Memory,
    Sled,
}

impl FromStr for RecordBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sled" => Ok(Self::Sled),
            other => bail!("unknown record backend '{other}', expected 'sled' or 'memory'"),
        }
    }
}

/// Where commitments, bundles, reference strings and notebooks live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetBackendKind {
    Memory,
    Sled,
    Remote,
}

impl FromStr for AssetBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sled" => Ok(Self::Sled),
            "remote" => Ok(Self::Remote),
            other => bail!("unknown asset backend '{other}', expected 'sled', 'memory' or 'remote'"),
        }
    }
}

/// Service configuration.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Socket address the HTTP server binds.
    pub listen_addr: String,
    pub record_backend: RecordBackendKind,
    /// Path of the sled database holding records.
    pub record_db: PathBuf,
    pub asset_backend: AssetBackendKind,
    /// Path of the sled database holding assets.
    pub asset_db: PathBuf,
    /// Base URL of the remote object store.
    pub storage_url: Option<String>,
    /// Service key for the remote object store.
    pub storage_key: Option<String>,
    /// Verification-key derivation service. Keys are derived locally when unset.
    pub vk_service_url: Option<String>,
    pub vk_service_timeout: Duration,
    /// Run full verification before accepting an approval.
    pub require_verified_approval: bool,
    /// Compare-and-swap attempts per lifecycle transition.
    pub transition_attempts: u32,
    pub enable_cors: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            record_backend: RecordBackendKind::Sled,
            record_db: PathBuf::from(DEFAULT_RECORD_DB),
            asset_backend: AssetBackendKind::Sled,
            asset_db: PathBuf::from(DEFAULT_ASSET_DB),
            storage_url: None,
            storage_key: None,
            vk_service_url: None,
            vk_service_timeout: Duration::from_secs(DEFAULT_VK_SERVICE_TIMEOUT_SECS),
            require_verified_approval: false,
            transition_attempts: DEFAULT_TRANSITION_ATTEMPTS,
            enable_cors: true,
        }
    }
}

impl ServiceConfig {
    /// Everything in memory, keys derived locally.
    pub fn in_memory() -> Self {
        Self {
            record_backend: RecordBackendKind::Memory,
            asset_backend: AssetBackendKind::Memory,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let record_backend = match env::var("ZKDM_RECORD_BACKEND") {
            Ok(value) => value.parse().context("invalid ZKDM_RECORD_BACKEND")?,
            Err(_) => defaults.record_backend,
        };
        let asset_backend = match env::var("ZKDM_ASSET_BACKEND") {
            Ok(value) => value.parse().context("invalid ZKDM_ASSET_BACKEND")?,
            Err(_) => defaults.asset_backend,
        };

        let storage_url = non_empty_var("ZKDM_STORAGE_URL");
        let storage_key = non_empty_var("ZKDM_STORAGE_KEY");
        if asset_backend == AssetBackendKind::Remote && storage_url.is_none() {
            bail!("ZKDM_STORAGE_URL must be set when ZKDM_ASSET_BACKEND=remote");
        }

        let vk_service_timeout_secs: u64 = env::var("ZKDM_VK_SERVICE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_VK_SERVICE_TIMEOUT_SECS);

        let transition_attempts: u32 = env::var("ZKDM_TRANSITION_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|attempts| *attempts > 0)
            .unwrap_or(DEFAULT_TRANSITION_ATTEMPTS);

        Ok(Self {
            listen_addr: env::var("ZKDM_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            record_backend,
            record_db: env::var("ZKDM_RECORD_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.record_db),
            asset_backend,
            asset_db: env::var("ZKDM_ASSET_DB")
                .map(PathBuf::from)
                .unwrap_or(defaults.asset_db),
            storage_url,
            storage_key,
            vk_service_url: non_empty_var("ZKDM_VK_SERVICE_URL"),
            vk_service_timeout: Duration::from_secs(vk_service_timeout_secs),
            require_verified_approval: flag("ZKDM_REQUIRE_VERIFIED_APPROVAL", false),
            transition_attempts,
            enable_cors: flag("ZKDM_ENABLE_CORS", true),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|value| parse_flag(&value))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("Sled".parse::<RecordBackendKind>().unwrap(), RecordBackendKind::Sled);
        assert_eq!(" memory ".parse::<AssetBackendKind>().unwrap(), AssetBackendKind::Memory);
        assert_eq!("remote".parse::<AssetBackendKind>().unwrap(), AssetBackendKind::Remote);
        assert!("postgres".parse::<RecordBackendKind>().is_err());
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn in_memory_config_keeps_defaults() {
        let config = ServiceConfig::in_memory();
        assert_eq!(config.record_backend, RecordBackendKind::Memory);
        assert_eq!(config.asset_backend, AssetBackendKind::Memory);
        assert_eq!(config.transition_attempts, 3);
        assert!(!config.require_verified_approval);
    }
}
