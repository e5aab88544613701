//! Gateway configuration options and the dataset catalog file.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    chunk_store::StoreOptions,
    dataset::{DatasetHandle, FROM_TAPE_ATTRIBUTE, SOURCE_ATTRIBUTE},
};

/// The prefix of environment variables overriding [`GatewayConfig`] options.
pub const ENV_PREFIX: &str = "ZARRS_GATEWAY_";

/// A configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds an invalid value.
    #[error("invalid value {value:?} for {name}")]
    InvalidVariable {
        /// The variable name.
        name: String,
        /// The invalid value.
        value: String,
    },
    /// The catalog file could not be read.
    #[error("failed to read catalog {0}")]
    IOError(#[from] std::io::Error),
    /// The catalog file is not valid.
    #[error("invalid catalog: {0}")]
    InvalidCatalog(#[from] serde_json::Error),
}

/// Configuration options of a [`ChunkGateway`](crate::gateway::ChunkGateway).
///
/// Every option can be overridden from the environment with [`GatewayConfig::from_env`].
/// The variable of an option is its name in upper case prefixed with `ZARRS_GATEWAY_`, e.g. `ZARRS_GATEWAY_GC_LIMIT`.
/// Durations are given in seconds and lists are comma separated.
///
/// ## GC Limit
/// > default: `500`
///
/// The number of served requests after which a reclamation pass runs.
///
/// ## Tape Retry After
/// > default: 3 hours
///
/// The `Retry-After` hint of responses for tape-backed values which are not staged yet.
///
/// ## Cache Control Max Age
/// > default: 7 days
///
/// The `max-age` of the `Cache-Control` header of every response.
///
/// ## Metadata Cache Capacity
/// > default: `4096`
///
/// The number of rendered metadata documents held by the metadata cache.
///
/// ## Metadata Cache TTL
/// > default: 24 hours
///
/// The time to live of rendered metadata documents.
///
/// ## Probe Timeout
/// > default: 10 seconds
///
/// The time a tape ordering probe may take before it is abandoned.
///
/// ## Tape Order Allow List
/// > default: `time`, `lat`, `lon`, `latitude`, `longitude`
///
/// The variables which the tape ordering endpoint delivers in full instead of probing.
///
/// ## Promote To Async
/// > default: [`true`]
///
/// If enabled, a synchronous chunk store is replaced by its asynchronous form on the first data request.
///
/// ## Allow Origin
/// > default: `*`
///
/// The `Access-Control-Allow-Origin` header of every response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
    gc_limit: u64,
    tape_retry_after: Duration,
    cache_control_max_age: Duration,
    metadata_cache_capacity: u64,
    metadata_cache_ttl: Duration,
    probe_timeout: Duration,
    tape_order_allow_list: Vec<String>,
    promote_to_async: bool,
    allow_origin: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gc_limit: 500,
            tape_retry_after: Duration::from_secs(3 * 60 * 60),
            cache_control_max_age: Duration::from_secs(7 * 24 * 60 * 60),
            metadata_cache_capacity: 4096,
            metadata_cache_ttl: Duration::from_secs(24 * 60 * 60),
            probe_timeout: Duration::from_secs(10),
            tape_order_allow_list: ["time", "lat", "lon", "latitude", "longitude"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            promote_to_async: true,
            allow_origin: "*".to_string(),
        }
    }
}

fn parse_variable<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidVariable {
            name: name.to_string(),
            value: value.to_string(),
        })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVariable {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

impl GatewayConfig {
    /// Create the default configuration overridden by `ZARRS_GATEWAY_*` environment variables.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidVariable`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create the default configuration overridden by the variables returned by `lookup`.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidVariable`] if a variable cannot be parsed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |option: &str| {
            let name = format!("{ENV_PREFIX}{option}");
            lookup(&name).map(|value| (name, value))
        };
        let seconds = |name: &str, value: &str| parse_variable(name, value).map(Duration::from_secs);

        if let Some((name, value)) = var("GC_LIMIT") {
            config.set_gc_limit(parse_variable(&name, &value)?);
        }
        if let Some((name, value)) = var("TAPE_RETRY_AFTER") {
            config.set_tape_retry_after(seconds(&name, &value)?);
        }
        if let Some((name, value)) = var("CACHE_CONTROL_MAX_AGE") {
            config.set_cache_control_max_age(seconds(&name, &value)?);
        }
        if let Some((name, value)) = var("METADATA_CACHE_CAPACITY") {
            config.set_metadata_cache_capacity(parse_variable(&name, &value)?);
        }
        if let Some((name, value)) = var("METADATA_CACHE_TTL") {
            config.set_metadata_cache_ttl(seconds(&name, &value)?);
        }
        if let Some((name, value)) = var("PROBE_TIMEOUT") {
            config.set_probe_timeout(seconds(&name, &value)?);
        }
        if let Some((_, value)) = var("TAPE_ORDER_ALLOW_LIST") {
            config.set_tape_order_allow_list(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some((name, value)) = var("PROMOTE_TO_ASYNC") {
            config.set_promote_to_async(parse_bool(&name, &value)?);
        }
        if let Some((_, value)) = var("ALLOW_ORIGIN") {
            config.set_allow_origin(value);
        }
        Ok(config)
    }

    /// Get the [GC limit](#gc-limit) configuration.
    #[must_use]
    pub fn gc_limit(&self) -> u64 {
        self.gc_limit
    }

    /// Set the [GC limit](#gc-limit) configuration.
    pub fn set_gc_limit(&mut self, gc_limit: u64) -> &mut Self {
        self.gc_limit = gc_limit;
        self
    }

    /// Get the [tape retry after](#tape-retry-after) configuration.
    #[must_use]
    pub fn tape_retry_after(&self) -> Duration {
        self.tape_retry_after
    }

    /// Set the [tape retry after](#tape-retry-after) configuration.
    pub fn set_tape_retry_after(&mut self, tape_retry_after: Duration) -> &mut Self {
        self.tape_retry_after = tape_retry_after;
        self
    }

    /// Get the [cache control max age](#cache-control-max-age) configuration.
    #[must_use]
    pub fn cache_control_max_age(&self) -> Duration {
        self.cache_control_max_age
    }

    /// Set the [cache control max age](#cache-control-max-age) configuration.
    pub fn set_cache_control_max_age(&mut self, cache_control_max_age: Duration) -> &mut Self {
        self.cache_control_max_age = cache_control_max_age;
        self
    }

    /// Get the [metadata cache capacity](#metadata-cache-capacity) configuration.
    #[must_use]
    pub fn metadata_cache_capacity(&self) -> u64 {
        self.metadata_cache_capacity
    }

    /// Set the [metadata cache capacity](#metadata-cache-capacity) configuration.
    pub fn set_metadata_cache_capacity(&mut self, metadata_cache_capacity: u64) -> &mut Self {
        self.metadata_cache_capacity = metadata_cache_capacity;
        self
    }

    /// Get the [metadata cache TTL](#metadata-cache-ttl) configuration.
    #[must_use]
    pub fn metadata_cache_ttl(&self) -> Duration {
        self.metadata_cache_ttl
    }

    /// Set the [metadata cache TTL](#metadata-cache-ttl) configuration.
    pub fn set_metadata_cache_ttl(&mut self, metadata_cache_ttl: Duration) -> &mut Self {
        self.metadata_cache_ttl = metadata_cache_ttl;
        self
    }

    /// Get the [probe timeout](#probe-timeout) configuration.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Set the [probe timeout](#probe-timeout) configuration.
    pub fn set_probe_timeout(&mut self, probe_timeout: Duration) -> &mut Self {
        self.probe_timeout = probe_timeout;
        self
    }

    /// Get the [tape order allow list](#tape-order-allow-list) configuration.
    #[must_use]
    pub fn tape_order_allow_list(&self) -> &[String] {
        &self.tape_order_allow_list
    }

    /// Set the [tape order allow list](#tape-order-allow-list) configuration.
    pub fn set_tape_order_allow_list(&mut self, tape_order_allow_list: Vec<String>) -> &mut Self {
        self.tape_order_allow_list = tape_order_allow_list;
        self
    }

    /// Get the [promote to async](#promote-to-async) configuration.
    #[must_use]
    pub fn promote_to_async(&self) -> bool {
        self.promote_to_async
    }

    /// Set the [promote to async](#promote-to-async) configuration.
    pub fn set_promote_to_async(&mut self, promote_to_async: bool) -> &mut Self {
        self.promote_to_async = promote_to_async;
        self
    }

    /// Get the [allow origin](#allow-origin) configuration.
    #[must_use]
    pub fn allow_origin(&self) -> &str {
        &self.allow_origin
    }

    /// Set the [allow origin](#allow-origin) configuration.
    pub fn set_allow_origin(&mut self, allow_origin: impl Into<String>) -> &mut Self {
        self.allow_origin = allow_origin.into();
        self
    }
}

/// A dataset catalog file.
///
/// ```json
/// {
///   "datasets": [
///     {
///       "id": "d1",
///       "source": "reference::/pool/refs/d1.json",
///       "from_tape": false,
///       "attrs": {"title": "d1"},
///       "storage_options": {"remote_protocol": "file", "lazy": true}
///     }
///   ]
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    /// The served datasets.
    #[serde(default)]
    pub datasets: Vec<CatalogEntry>,
}

/// A dataset of a [`CatalogFile`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// The dataset identifier.
    pub id: String,
    /// The source of the chunk store of the dataset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Whether the dataset is backed by a tape archive.
    #[serde(default)]
    pub from_tape: bool,
    /// The dataset attributes.
    #[serde(default)]
    pub attrs: Map<String, Value>,
    /// The options of the chunk store of the dataset.
    #[serde(default)]
    pub storage_options: StoreOptions,
}

impl CatalogFile {
    /// Parse a catalog from JSON.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidCatalog`] if `json` is not a valid catalog.
    pub fn from_json(json: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(json)?)
    }

    /// Read a catalog from the file at `path`.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or is not a valid catalog.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&std::fs::read(path)?)
    }
}

impl CatalogEntry {
    /// Return the dataset handle of this entry.
    ///
    /// The `source` and `from_tape` fields take precedence over the same attributes.
    #[must_use]
    pub fn to_handle(&self) -> DatasetHandle {
        let mut attrs = self.attrs.clone();
        if let Some(source) = &self.source {
            attrs.insert(SOURCE_ATTRIBUTE.to_string(), Value::from(source.as_str()));
        }
        if self.from_tape {
            attrs.insert(FROM_TAPE_ATTRIBUTE.to_string(), Value::Bool(true));
        }
        DatasetHandle::from_attrs(self.id.clone(), attrs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.gc_limit(), 500);
        assert_eq!(config.tape_retry_after(), Duration::from_secs(10800));
        assert_eq!(config.cache_control_max_age(), Duration::from_secs(604_800));
        assert!(config.tape_order_allow_list().iter().any(|name| name == "time"));
        assert!(config.promote_to_async());
        assert_eq!(config.allow_origin(), "*");
    }

    #[test]
    fn config_from_lookup() {
        let variables: HashMap<&str, &str> = [
            ("ZARRS_GATEWAY_GC_LIMIT", "10"),
            ("ZARRS_GATEWAY_TAPE_RETRY_AFTER", "60"),
            ("ZARRS_GATEWAY_TAPE_ORDER_ALLOW_LIST", "time, depth,"),
            ("ZARRS_GATEWAY_PROMOTE_TO_ASYNC", "no"),
            ("ZARRS_GATEWAY_ALLOW_ORIGIN", "https://swift.dkrz.de"),
        ]
        .into_iter()
        .collect();
        let config =
            GatewayConfig::from_lookup(|name| variables.get(name).map(|v| (*v).to_string()))
                .unwrap();
        assert_eq!(config.gc_limit(), 10);
        assert_eq!(config.tape_retry_after(), Duration::from_secs(60));
        assert_eq!(config.tape_order_allow_list(), ["time", "depth"]);
        assert!(!config.promote_to_async());
        assert_eq!(config.allow_origin(), "https://swift.dkrz.de");
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));

        let invalid = GatewayConfig::from_lookup(|name| {
            (name == "ZARRS_GATEWAY_GC_LIMIT").then(|| "many".to_string())
        });
        assert!(matches!(
            invalid,
            Err(ConfigError::InvalidVariable { name, .. }) if name == "ZARRS_GATEWAY_GC_LIMIT"
        ));
    }

    #[test]
    fn catalog_file() {
        let catalog = CatalogFile::from_json(
            br#"{"datasets": [
                {"id": "d1", "source": "reference::/refs/d1.json", "attrs": {"title": "one"}},
                {"id": "d2", "source": "/refs/d2.json", "from_tape": true,
                 "storage_options": {"remote_protocol": "slk", "remote_options": {"slk_cache": "/scratch"}}},
                {"id": "d3"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(catalog.datasets.len(), 3);

        let d1 = catalog.datasets[0].to_handle();
        assert_eq!(d1.source.as_deref(), Some("reference::/refs/d1.json"));
        assert_eq!(d1.attrs["title"], "one");
        assert!(!d1.from_tape);

        let d2 = &catalog.datasets[1];
        assert!(d2.to_handle().from_tape);
        assert_eq!(d2.storage_options.remote_protocol.as_deref(), Some("slk"));

        assert!(catalog.datasets[2].to_handle().source.is_none());
        assert!(CatalogFile::from_json(b"{\"datasets\": [{}]}").is_err());
    }
}
