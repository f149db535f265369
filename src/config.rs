//! Runtime configuration: an optional `slasshy.toml` overlaid with
//! environment variables, promoted to a typed struct validated at load time
//! rather than coerced silently.

use crate::vault::keys;
use crate::vault::types::CarrierType;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

const CONFIG_FILE: &str = "slasshy.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse {CONFIG_FILE}: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported preferred_carrier '{0}': only png is implemented")]
    UnsupportedCarrier(String),

    #[error(
        "kdf params weaker than the required floor (time_cost>={time_cost}, memory_cost_kib>={memory_cost_kib}, parallelism>={parallelism})"
    )]
    WeakKdfParams {
        time_cost: u32,
        memory_cost_kib: u32,
        parallelism: u32,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
struct RawConfig {
    vault_dir: String,
    auto_lock_timeout_ms: u64,
    preferred_carrier: String,
    decoy_ratio: u32,
    kdf_time_cost: u32,
    kdf_memory_cost_kib: u32,
    kdf_parallelism: u32,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            vault_dir: "vault".to_string(),
            auto_lock_timeout_ms: 5 * 60 * 1000,
            preferred_carrier: "png".to_string(),
            decoy_ratio: 0,
            kdf_time_cost: keys::ARGON2_TIME_COST,
            kdf_memory_cost_kib: keys::ARGON2_MEMORY_COST_KIB,
            kdf_parallelism: keys::ARGON2_PARALLELISM,
        }
    }
}

/// Validated application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub vault_dir: PathBuf,
    pub auto_lock_timeout_ms: u64,
    pub preferred_carrier: CarrierType,
    pub decoy_ratio: u32,
    pub kdf_time_cost: u32,
    pub kdf_memory_cost_kib: u32,
    pub kdf_parallelism: u32,
}

impl Config {
    /// Reads `slasshy.toml` from the current directory if present, then
    /// applies `SLASSHY_*` environment overrides, then validates. Missing
    /// file is not an error — the defaults are a usable vault on disk at
    /// `./vault`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut raw = match std::fs::read_to_string(CONFIG_FILE) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(_) => RawConfig::default(),
        };

        apply_env_overrides(&mut raw);
        Config::try_from(raw)
    }
}

fn apply_env_overrides(raw: &mut RawConfig) {
    if let Ok(v) = std::env::var("SLASSHY_VAULT_DIR") {
        raw.vault_dir = v;
    }
    if let Ok(v) = std::env::var("SLASSHY_AUTO_LOCK_TIMEOUT_MS") {
        if let Ok(parsed) = v.parse() {
            raw.auto_lock_timeout_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("SLASSHY_PREFERRED_CARRIER") {
        raw.preferred_carrier = v;
    }
    if let Ok(v) = std::env::var("SLASSHY_DECOY_RATIO") {
        if let Ok(parsed) = v.parse() {
            raw.decoy_ratio = parsed;
        }
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, ConfigError> {
        let preferred_carrier = match raw.preferred_carrier.to_lowercase().as_str() {
            "png" => CarrierType::Png,
            other => return Err(ConfigError::UnsupportedCarrier(other.to_string())),
        };

        if !keys::validate_kdf_params(raw.kdf_time_cost, raw.kdf_memory_cost_kib, raw.kdf_parallelism) {
            return Err(ConfigError::WeakKdfParams {
                time_cost: raw.kdf_time_cost,
                memory_cost_kib: raw.kdf_memory_cost_kib,
                parallelism: raw.kdf_parallelism,
            });
        }

        Ok(Config {
            vault_dir: PathBuf::from(raw.vault_dir),
            auto_lock_timeout_ms: raw.auto_lock_timeout_ms,
            preferred_carrier,
            decoy_ratio: raw.decoy_ratio,
            kdf_time_cost: raw.kdf_time_cost,
            kdf_memory_cost_kib: raw.kdf_memory_cost_kib,
            kdf_parallelism: raw.kdf_parallelism,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::try_from(RawConfig::default()).unwrap();
        assert_eq!(cfg.vault_dir, PathBuf::from("vault"));
        assert!(matches!(cfg.preferred_carrier, CarrierType::Png));
    }

    #[test]
    fn weak_kdf_params_are_rejected() {
        let mut raw = RawConfig::default();
        raw.kdf_time_cost = 1;
        assert!(Config::try_from(raw).is_err());
    }

    #[test]
    fn unsupported_carrier_is_rejected() {
        let mut raw = RawConfig::default();
        raw.preferred_carrier = "jpg".to_string();
        assert!(Config::try_from(raw).is_err());
    }
}
