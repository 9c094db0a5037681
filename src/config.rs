//! Configuration for the mirroring client.
//!
//! Configuration arrives as flat string properties (the way the host
//! store's client configuration is usually carried) and is split into
//! three parts: the primary backend's settings, the secondary backend's
//! settings, and the mirroring options themselves.
//!
//! When both backends use the same driver their settings would collide,
//! so a per-backend key prefix disambiguates: with
//! `mirroring.primary.prefix = "a"`, the key `a.quorum` reaches the
//! primary backend as `quorum`.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use mirror_engine::config::{self, MirroringConfig};
//!
//! let mut props = HashMap::new();
//! props.insert(config::PRIMARY_CONNECTION_IMPL_KEY.into(), "default".into());
//! props.insert(config::SECONDARY_CONNECTION_IMPL_KEY.into(), "widestore".into());
//! props.insert(config::READ_VERIFICATION_RATE_PERCENT_KEY.into(), "25".into());
//!
//! let config = MirroringConfig::from_map(&props).unwrap();
//! assert_eq!(config.secondary.impl_name, "widestore");
//! assert_eq!(config.options.read_verification_rate_percent, 25);
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

/// Driver selector for the primary backend. `default` means the
/// ecosystem default driver.
pub const PRIMARY_CONNECTION_IMPL_KEY: &str = "mirroring.primary.connection.impl";
/// Driver selector for the secondary backend.
pub const SECONDARY_CONNECTION_IMPL_KEY: &str = "mirroring.secondary.connection.impl";
/// Key prefix for settings that belong only to the primary backend.
/// Prefixes never end in a separator.
pub const PRIMARY_PREFIX_KEY: &str = "mirroring.primary.prefix";
/// Key prefix for settings that belong only to the secondary backend.
pub const SECONDARY_PREFIX_KEY: &str = "mirroring.secondary.prefix";
/// Pluggable mismatch-detector selector.
pub const MISMATCH_DETECTOR_IMPL_KEY: &str = "mirroring.mismatch-detector.impl";
/// Pluggable flow-controller selector.
pub const FLOW_CONTROLLER_IMPL_KEY: &str = "mirroring.flow-controller.impl";
/// Pluggable write-error consumer selector.
pub const WRITE_ERROR_CONSUMER_IMPL_KEY: &str = "mirroring.write-error-consumer.impl";
/// Bound on outstanding secondary operations.
pub const FLOW_CONTROLLER_MAX_OUTSTANDING_REQUESTS_KEY: &str =
    "mirroring.flow-controller.max-outstanding-requests";
/// Bound on bytes held by outstanding secondary operations.
pub const FLOW_CONTROLLER_MAX_USED_BYTES_KEY: &str = "mirroring.flow-controller.max-used-bytes";
/// Bytes buffered by the buffered-writer layer before it flushes the
/// primary and mirrors the flushed writes.
pub const BUFFERED_MUTATOR_BYTES_TO_FLUSH_KEY: &str = "mirroring.buffered-mutator.bytes-to-flush";
/// Percentage of reads that are mirrored for verification (0-100).
pub const READ_VERIFICATION_RATE_PERCENT_KEY: &str = "mirroring.read-verification-rate-percent";
/// Opt-in to concurrent batch mode for all-write batches.
pub const CONCURRENT_WRITES_KEY: &str = "mirroring.concurrent-writes";

const PREFIX_SEPARATOR: char = '.';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required key `{0}`")]
    MissingKey(&'static str),

    #[error(
        "backends share a driver; set `{PRIMARY_PREFIX_KEY}` or `{SECONDARY_PREFIX_KEY}` \
         to separate their settings"
    )]
    PrefixRequired,

    #[error("`{PRIMARY_PREFIX_KEY}` and `{SECONDARY_PREFIX_KEY}` must differ")]
    SamePrefix,

    #[error("prefix `{0}` must not end with `{PREFIX_SEPARATOR}`")]
    PrefixTrailingSeparator(String),

    #[error("invalid value `{value}` for `{key}`: {reason}")]
    InvalidValue { key: &'static str, value: String, reason: String },
}

/// Tunables of the mirroring layer itself.
///
/// All fields have defaults, so `MirroringOptions::default()` yields a
/// usable configuration: verify every read, bound outstanding secondary
/// work, sequential batches.
#[derive(Debug, Clone, Deserialize)]
pub struct MirroringOptions {
    #[serde(default = "default_impl")]
    pub mismatch_detector_impl: String,

    #[serde(default = "default_impl")]
    pub flow_controller_impl: String,

    #[serde(default = "default_impl")]
    pub write_error_consumer_impl: String,

    /// Bound on outstanding secondary operations.
    #[serde(default = "default_max_outstanding_requests")]
    pub max_outstanding_requests: usize,

    /// Bound on bytes held by outstanding secondary operations.
    #[serde(default = "default_max_used_bytes")]
    pub max_used_bytes: usize,

    /// Buffered-writer flush threshold in bytes.
    #[serde(default = "default_bytes_to_flush")]
    pub buffered_mutator_bytes_to_flush: usize,

    /// Percentage of reads mirrored for verification (0-100).
    #[serde(default = "default_read_verification_rate_percent")]
    pub read_verification_rate_percent: u32,

    /// Concurrent batch mode for all-write batches.
    #[serde(default)]
    pub concurrent_writes: bool,
}

fn default_impl() -> String {
    "default".to_string()
}
fn default_max_outstanding_requests() -> usize {
    500
}
fn default_max_used_bytes() -> usize {
    256 * 1024 * 1024 // 256 MB
}
fn default_bytes_to_flush() -> usize {
    2 * 1024 * 1024 // 2 MB
}
fn default_read_verification_rate_percent() -> u32 {
    100
}

impl Default for MirroringOptions {
    fn default() -> Self {
        Self {
            mismatch_detector_impl: default_impl(),
            flow_controller_impl: default_impl(),
            write_error_consumer_impl: default_impl(),
            max_outstanding_requests: default_max_outstanding_requests(),
            max_used_bytes: default_max_used_bytes(),
            buffered_mutator_bytes_to_flush: default_bytes_to_flush(),
            read_verification_rate_percent: default_read_verification_rate_percent(),
            concurrent_writes: false,
        }
    }
}

impl MirroringOptions {
    /// Reads the options out of flat string properties; keys that are
    /// absent keep their defaults.
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();
        if let Some(value) = properties.get(MISMATCH_DETECTOR_IMPL_KEY) {
            options.mismatch_detector_impl = value.clone();
        }
        if let Some(value) = properties.get(FLOW_CONTROLLER_IMPL_KEY) {
            options.flow_controller_impl = value.clone();
        }
        if let Some(value) = properties.get(WRITE_ERROR_CONSUMER_IMPL_KEY) {
            options.write_error_consumer_impl = value.clone();
        }
        options.max_outstanding_requests = parse_or(
            properties,
            FLOW_CONTROLLER_MAX_OUTSTANDING_REQUESTS_KEY,
            options.max_outstanding_requests,
        )?;
        options.max_used_bytes =
            parse_or(properties, FLOW_CONTROLLER_MAX_USED_BYTES_KEY, options.max_used_bytes)?;
        options.buffered_mutator_bytes_to_flush = parse_or(
            properties,
            BUFFERED_MUTATOR_BYTES_TO_FLUSH_KEY,
            options.buffered_mutator_bytes_to_flush,
        )?;
        options.read_verification_rate_percent = parse_or(
            properties,
            READ_VERIFICATION_RATE_PERCENT_KEY,
            options.read_verification_rate_percent,
        )?;
        if options.read_verification_rate_percent > 100 {
            return Err(ConfigError::InvalidValue {
                key: READ_VERIFICATION_RATE_PERCENT_KEY,
                value: options.read_verification_rate_percent.to_string(),
                reason: "must be between 0 and 100".into(),
            });
        }
        options.concurrent_writes =
            parse_or(properties, CONCURRENT_WRITES_KEY, options.concurrent_writes)?;
        Ok(options)
    }
}

fn parse_or<T: std::str::FromStr>(
    properties: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match properties.get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Settings of one backend: the driver selector plus the prefix-stripped
/// properties that belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Driver name, or `default` for the ecosystem default.
    pub impl_name: String,
    pub settings: HashMap<String, String>,
}

impl BackendConfig {
    /// Whether the ecosystem default driver should be used.
    #[must_use]
    pub fn is_default_impl(&self) -> bool {
        self.impl_name.eq_ignore_ascii_case("default")
    }
}

/// The full mirroring configuration: two backend configs plus options.
#[derive(Debug, Clone)]
pub struct MirroringConfig {
    pub primary: BackendConfig,
    pub secondary: BackendConfig,
    pub options: MirroringOptions,
}

impl MirroringConfig {
    /// Builds and validates the configuration from flat properties.
    ///
    /// Both driver keys must be set. When both backends name the same
    /// driver, at least one prefix must be set and the prefixes must
    /// differ — otherwise the two backends would read identical settings
    /// and mirror a store onto itself.
    pub fn from_map(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let primary_impl = properties
            .get(PRIMARY_CONNECTION_IMPL_KEY)
            .ok_or(ConfigError::MissingKey(PRIMARY_CONNECTION_IMPL_KEY))?;
        let secondary_impl = properties
            .get(SECONDARY_CONNECTION_IMPL_KEY)
            .ok_or(ConfigError::MissingKey(SECONDARY_CONNECTION_IMPL_KEY))?;
        let primary_prefix = properties.get(PRIMARY_PREFIX_KEY).cloned().unwrap_or_default();
        let secondary_prefix =
            properties.get(SECONDARY_PREFIX_KEY).cloned().unwrap_or_default();

        for prefix in [&primary_prefix, &secondary_prefix] {
            if prefix.ends_with(PREFIX_SEPARATOR) {
                return Err(ConfigError::PrefixTrailingSeparator(prefix.clone()));
            }
        }
        if primary_impl == secondary_impl && primary_prefix == secondary_prefix {
            if primary_prefix.is_empty() {
                return Err(ConfigError::PrefixRequired);
            }
            return Err(ConfigError::SamePrefix);
        }

        Ok(Self {
            primary: backend_config(properties, primary_impl, &primary_prefix),
            secondary: backend_config(properties, secondary_impl, &secondary_prefix),
            options: MirroringOptions::from_map(properties)?,
        })
    }
}

fn backend_config(
    properties: &HashMap<String, String>,
    impl_name: &str,
    prefix: &str,
) -> BackendConfig {
    let settings = if prefix.is_empty() {
        properties.clone()
    } else {
        let full_prefix = format!("{prefix}{PREFIX_SEPARATOR}");
        properties
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&full_prefix)
                    .map(|stripped| (stripped.to_string(), value.clone()))
            })
            .collect()
    };
    BackendConfig { impl_name: impl_name.to_string(), settings }
}
