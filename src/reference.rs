//! Kerchunk reference manifests.
//!
//! A reference manifest maps Zarr keys to either inline values or byte windows of target files.
//! Both the flat version 0 layout and the version 1 layout (`{"version": 1, "templates": {..}, "refs": {..}}`) are supported.
//!
//! A reference value is one of:
//! - a string, holding the value inline (prefixed with `base64:` for binary values),
//! - `[url]`, referring to a whole target file,
//! - `[url, offset, length]`, referring to a byte window of a target file.
//!
//! [`ReferenceStore`] serves a manifest through the storage traits by resolving references against a target store.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
    sync::Arc,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    byte_range::{extract_byte_ranges, ByteLength, ByteOffset, ByteRange},
    metadata::parse_json_lenient,
    storage::{
        AsyncReadableStorageTraits, Bytes, ByteStream, ReadableStorageTraits, StorageError,
        StoreKey, StoreKeyError,
    },
};

const BASE64_PREFIX: &str = "base64:";

/// A single reference of a manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkReference {
    /// A value held inline in the manifest.
    Inline(Bytes),
    /// A byte window of a target file.
    Range {
        /// The target URL or path.
        url: String,
        /// The offset of the window.
        offset: ByteOffset,
        /// The length of the window.
        length: ByteLength,
    },
    /// A whole target file.
    Whole {
        /// The target URL or path.
        url: String,
    },
}

impl ChunkReference {
    /// Return the target URL of the reference, if it is not inline.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Inline(_) => None,
            Self::Range { url, .. } | Self::Whole { url } => Some(url),
        }
    }
}

/// A reference manifest error.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// An IO error reading the manifest.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// The manifest is not valid JSON.
    #[error("reference manifest is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The manifest is not a JSON object of references.
    #[error("reference manifest is not an object of references")]
    InvalidManifest,
    /// A reference is malformed.
    #[error("invalid reference for {key}: {reason}")]
    InvalidReference {
        /// The key of the reference.
        key: String,
        /// Why the reference is invalid.
        reason: String,
    },
    /// A reference target cannot be mapped to a store key.
    #[error("invalid reference target {0}")]
    InvalidTarget(#[from] StoreKeyError),
}

/// A parsed reference manifest.
#[derive(Clone, Debug, Default)]
pub struct ReferenceManifest {
    refs: BTreeMap<String, ChunkReference>,
}

impl ReferenceManifest {
    /// Parse a reference manifest from JSON.
    ///
    /// Bare `NaN` and `Infinity` tokens are tolerated.
    ///
    /// # Errors
    /// Returns a [`ReferenceError`] if the manifest or any of its references is malformed.
    pub fn from_json(json: &[u8]) -> Result<Self, ReferenceError> {
        let Value::Object(mut root) = parse_json_lenient(json)? else {
            return Err(ReferenceError::InvalidManifest);
        };

        let (refs, templates) = if root.get("version").and_then(Value::as_u64) == Some(1) {
            let Some(Value::Object(refs)) = root.remove("refs") else {
                return Err(ReferenceError::InvalidManifest);
            };
            let templates = match root.remove("templates") {
                Some(Value::Object(templates)) => templates
                    .into_iter()
                    .filter_map(|(name, value)| {
                        value.as_str().map(|value| (name, value.to_string()))
                    })
                    .collect(),
                _ => Vec::new(),
            };
            (refs, templates)
        } else {
            (root, Vec::new())
        };

        let refs = refs
            .into_iter()
            .map(|(key, value)| {
                let reference = parse_reference(&key, value, &templates)?;
                Ok((key, reference))
            })
            .collect::<Result<_, ReferenceError>>()?;
        Ok(Self { refs })
    }

    /// Read and parse a reference manifest from the local filesystem.
    ///
    /// # Errors
    /// Returns a [`ReferenceError`] if the file cannot be read or the manifest is malformed.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ReferenceError> {
        Self::from_json(&std::fs::read(path)?)
    }

    /// Return the reference for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ChunkReference> {
        self.refs.get(key)
    }

    /// Return all keys of the manifest in lexicographical order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.refs.keys().map(String::as_str)
    }

    /// Return the distinct target URLs of the manifest.
    #[must_use]
    pub fn target_urls(&self) -> BTreeSet<&str> {
        self.refs.values().filter_map(ChunkReference::url).collect()
    }

    /// Return the number of references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns true if the manifest holds no references.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl FromIterator<(String, ChunkReference)> for ReferenceManifest {
    fn from_iter<T: IntoIterator<Item = (String, ChunkReference)>>(iter: T) -> Self {
        Self {
            refs: iter.into_iter().collect(),
        }
    }
}

fn expand_templates(url: &str, templates: &[(String, String)]) -> String {
    if !url.contains("{{") {
        return url.to_string();
    }
    templates
        .iter()
        .fold(url.to_string(), |url, (name, value)| {
            url.replace(&format!("{{{{{name}}}}}"), value)
        })
}

fn parse_reference(
    key: &str,
    value: Value,
    templates: &[(String, String)],
) -> Result<ChunkReference, ReferenceError> {
    let invalid = |reason: &str| ReferenceError::InvalidReference {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    match value {
        Value::String(value) => match value.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => Ok(ChunkReference::Inline(
                STANDARD
                    .decode(encoded)
                    .map_err(|err| invalid(&err.to_string()))?
                    .into(),
            )),
            None => Ok(ChunkReference::Inline(value.into_bytes().into())),
        },
        Value::Object(_) => Ok(ChunkReference::Inline(
            serde_json::to_vec(&value)?.into(),
        )),
        Value::Array(parts) => {
            let url = parts
                .first()
                .and_then(Value::as_str)
                .map(|url| expand_templates(url, templates))
                .ok_or_else(|| invalid("missing target url"))?;
            match parts.len() {
                1 => Ok(ChunkReference::Whole { url }),
                3 => {
                    let offset = parts[1]
                        .as_u64()
                        .ok_or_else(|| invalid("offset is not an unsigned integer"))?;
                    let length = parts[2]
                        .as_u64()
                        .ok_or_else(|| invalid("length is not an unsigned integer"))?;
                    Ok(ChunkReference::Range {
                        url,
                        offset,
                        length,
                    })
                }
                _ => Err(invalid("expected [url] or [url, offset, length]")),
            }
        }
        _ => Err(invalid("expected a string or an array")),
    }
}

/// Map a reference target URL or path to a key of its target store.
///
/// The scheme and host of a URL are dropped: `file:///a/b.nc`, `/a/b.nc` and `s3://bucket/a/b.nc` all map to `a/b.nc`.
///
/// # Errors
/// Returns a [`StoreKeyError`] if the path of the target is empty or otherwise not a valid key.
pub fn target_key(target: &str) -> Result<StoreKey, StoreKeyError> {
    let path = match url::Url::parse(target) {
        Ok(url) if url.scheme().len() > 1 => url.path().to_string(),
        _ => target.to_string(),
    };
    StoreKey::new(path.trim_start_matches('/'))
}

/// Return the scheme and authority of a target URL, such as `s3://bucket`.
///
/// Returns [`None`] for plain paths and `file://` URLs.
#[must_use]
pub fn target_origin(target: &str) -> Option<String> {
    let url = url::Url::parse(target).ok()?;
    if url.scheme().len() <= 1 || url.scheme() == "file" {
        return None;
    }
    Some(url[..url::Position::BeforePath].to_string())
}

enum Resolved {
    Inline(Vec<Bytes>),
    Target(StoreKey, Vec<ByteRange>),
}

/// A store serving a [`ReferenceManifest`].
///
/// Inline references are served from the manifest.
/// Other references are read from the target store `TStorage`, which is addressed with [`target_key`].
/// A reference to a target which does not exist reads as a missing key.
#[derive(Debug)]
pub struct ReferenceStore<TStorage: ?Sized> {
    manifest: Arc<ReferenceManifest>,
    target: Arc<TStorage>,
}

impl<TStorage: ?Sized> ReferenceStore<TStorage> {
    /// Create a new reference store.
    #[must_use]
    pub fn new(manifest: Arc<ReferenceManifest>, target: Arc<TStorage>) -> Self {
        Self { manifest, target }
    }

    /// Return the manifest.
    #[must_use]
    pub fn manifest(&self) -> &Arc<ReferenceManifest> {
        &self.manifest
    }

    /// Return the target store.
    #[must_use]
    pub fn target(&self) -> &Arc<TStorage> {
        &self.target
    }

    fn resolve(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Resolved>, StorageError> {
        let Some(reference) = self.manifest.get(key.as_str()) else {
            return Ok(None);
        };
        Ok(Some(match reference {
            ChunkReference::Inline(bytes) => {
                Resolved::Inline(extract_byte_ranges(bytes, byte_ranges)?)
            }
            ChunkReference::Range {
                url,
                offset,
                length,
            } => Resolved::Target(
                target_key(url)?,
                byte_ranges
                    .iter()
                    .map(|byte_range| byte_range.within(*offset, *length))
                    .collect::<Result<_, _>>()?,
            ),
            ChunkReference::Whole { url } => {
                Resolved::Target(target_key(url)?, byte_ranges.to_vec())
            }
        }))
    }

    fn reference_size(&self, key: &StoreKey) -> Result<Option<Result<u64, StoreKey>>, StorageError> {
        Ok(match self.manifest.get(key.as_str()) {
            None => None,
            Some(ChunkReference::Inline(bytes)) => Some(Ok(bytes.len() as u64)),
            Some(ChunkReference::Range { length, .. }) => Some(Ok(*length)),
            Some(ChunkReference::Whole { url }) => Some(Err(target_key(url)?)),
        })
    }
}

impl<TStorage: ?Sized + ReadableStorageTraits> ReadableStorageTraits for ReferenceStore<TStorage> {
    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        match self.resolve(key, byte_ranges)? {
            None => Ok(None),
            Some(Resolved::Inline(values)) => Ok(Some(values)),
            Some(Resolved::Target(target_key, byte_ranges)) => self
                .target
                .get_partial_values_key(&target_key, &byte_ranges),
        }
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match self.reference_size(key)? {
            None => Ok(None),
            Some(Ok(size)) => Ok(Some(size)),
            Some(Err(target_key)) => self.target.size_key(&target_key),
        }
    }

    fn clear_directory_cache(&self) {
        self.target.clear_directory_cache();
    }
}

#[async_trait::async_trait]
impl<TStorage: ?Sized + AsyncReadableStorageTraits> AsyncReadableStorageTraits
    for ReferenceStore<TStorage>
{
    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        match self.resolve(key, byte_ranges)? {
            None => Ok(None),
            Some(Resolved::Inline(values)) => Ok(Some(values)),
            Some(Resolved::Target(target_key, byte_ranges)) => {
                self.target
                    .get_partial_values_key(&target_key, &byte_ranges)
                    .await
            }
        }
    }

    async fn get_stream(
        &self,
        key: &StoreKey,
        byte_range: ByteRange,
    ) -> Result<Option<ByteStream>, StorageError> {
        match self.resolve(key, std::slice::from_ref(&byte_range))? {
            None => Ok(None),
            Some(Resolved::Inline(mut values)) => {
                Ok(values.pop().map(crate::storage::single_part_stream))
            }
            Some(Resolved::Target(target_key, byte_ranges)) => {
                let Some(byte_range) = byte_ranges.first() else {
                    return Ok(None);
                };
                self.target.get_stream(&target_key, *byte_range).await
            }
        }
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        match self.reference_size(key)? {
            None => Ok(None),
            Some(Ok(size)) => Ok(Some(size)),
            Some(Err(target_key)) => self.target.size_key(&target_key).await,
        }
    }

    fn clear_directory_cache(&self) {
        self.target.clear_directory_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::store::MemoryStore;

    const REFS_V0: &str = r#"{
        ".zgroup": "{\"zarr_format\": 2}",
        "tas/.zarray": "{\"chunks\": [2], \"shape\": [4]}",
        "tas/0": ["/data/tas.nc", 2, 3],
        "tas/1": ["/data/tas.nc"],
        "tas/2": "base64:AAEC",
        "tas/3": ["/data/gone.nc", 0, 1]
    }"#;

    fn store() -> ReferenceStore<MemoryStore> {
        let target = MemoryStore::new();
        target.set(
            &StoreKey::new("data/tas.nc").unwrap(),
            vec![0u8, 1, 2, 3, 4, 5, 6, 7],
        );
        ReferenceStore::new(
            Arc::new(ReferenceManifest::from_json(REFS_V0.as_bytes()).unwrap()),
            Arc::new(target),
        )
    }

    #[test]
    fn manifest_v0() {
        let manifest = ReferenceManifest::from_json(REFS_V0.as_bytes()).unwrap();
        assert_eq!(manifest.len(), 6);
        assert_eq!(
            manifest.get("tas/0"),
            Some(&ChunkReference::Range {
                url: "/data/tas.nc".to_string(),
                offset: 2,
                length: 3
            })
        );
        assert_eq!(
            manifest.get("tas/2"),
            Some(&ChunkReference::Inline(Bytes::from_static(&[0, 1, 2])))
        );
        assert_eq!(
            manifest.target_urls().into_iter().collect::<Vec<_>>(),
            vec!["/data/gone.nc", "/data/tas.nc"]
        );
        assert_eq!(manifest.keys().next(), Some(".zgroup"));
    }

    #[test]
    fn manifest_v1_templates() {
        let manifest = ReferenceManifest::from_json(
            br#"{
                "version": 1,
                "templates": {"u": "s3://bucket/run1"},
                "refs": {
                    ".zattrs": {"title": "t"},
                    "pr/0.0": ["{{u}}/pr.nc", 100, 20]
                }
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.get("pr/0.0").and_then(ChunkReference::url),
            Some("s3://bucket/run1/pr.nc")
        );
        assert_eq!(
            manifest.get(".zattrs"),
            Some(&ChunkReference::Inline(Bytes::from_static(
                br#"{"title":"t"}"#
            )))
        );
    }

    #[test]
    fn manifest_invalid() {
        assert!(ReferenceManifest::from_json(b"[]").is_err());
        assert!(ReferenceManifest::from_json(b"{").is_err());
        assert!(ReferenceManifest::from_json(br#"{"a": ["u", 1]}"#).is_err());
        assert!(ReferenceManifest::from_json(br#"{"a": ["u", -1, 2]}"#).is_err());
        assert!(ReferenceManifest::from_json(br#"{"a": 1}"#).is_err());
        assert!(ReferenceManifest::from_json(br#"{"a": "base64:***"}"#).is_err());
        assert!(ReferenceManifest::from_json(br#"{"version": 1}"#).is_err());
    }

    #[test]
    fn target_keys() {
        assert_eq!(target_key("/a/b.nc").unwrap().as_str(), "a/b.nc");
        assert_eq!(target_key("file:///a/b.nc").unwrap().as_str(), "a/b.nc");
        assert_eq!(target_key("s3://bucket/a/b.nc").unwrap().as_str(), "a/b.nc");
        assert_eq!(target_key("a/b.nc").unwrap().as_str(), "a/b.nc");
        assert!(target_key("s3://bucket/").is_err());

        assert_eq!(target_origin("s3://bucket/a/b.nc").as_deref(), Some("s3://bucket"));
        assert_eq!(
            target_origin("https://example.com:8080/a").as_deref(),
            Some("https://example.com:8080")
        );
        assert_eq!(target_origin("file:///a/b.nc"), None);
        assert_eq!(target_origin("/a/b.nc"), None);
    }

    #[test]
    fn reference_store_sync() {
        let store = store();
        let get = |key: &str| ReadableStorageTraits::get(&store, &StoreKey::new(key).unwrap());

        assert_eq!(get("tas/0").unwrap().unwrap().as_ref(), &[2, 3, 4]);
        assert_eq!(get("tas/1").unwrap().unwrap().len(), 8);
        assert_eq!(get("tas/2").unwrap().unwrap().as_ref(), &[0, 1, 2]);
        assert_eq!(get(".zgroup").unwrap().unwrap().as_ref(), br#"{"zarr_format": 2}"#);
        assert!(get("tas/4").unwrap().is_none());
        // The target of the reference is missing
        assert!(get("tas/3").unwrap().is_none());

        let key = StoreKey::new("tas/0").unwrap();
        assert_eq!(
            ReadableStorageTraits::get_partial_values_key(
                &store,
                &key,
                &[ByteRange::FromEnd(0, Some(1))]
            )
            .unwrap()
            .unwrap(),
            vec![Bytes::from_static(&[4])]
        );
        assert!(ReadableStorageTraits::get_partial_values_key(
            &store,
            &key,
            &[ByteRange::FromStart(0, Some(4))]
        )
        .is_err());
        assert_eq!(ReadableStorageTraits::size_key(&store, &key).unwrap(), Some(3));
        assert_eq!(
            ReadableStorageTraits::size_key(&store, &StoreKey::new("tas/1").unwrap()).unwrap(),
            Some(8)
        );
    }

    #[tokio::test]
    async fn reference_store_async() {
        use crate::storage::storage_adapter::SyncToAsyncStorageAdapter;
        use futures::TryStreamExt;

        let store = store();
        let store = ReferenceStore::new(
            store.manifest().clone(),
            Arc::new(SyncToAsyncStorageAdapter::new(store.target().clone())),
        );
        let key = StoreKey::new("tas/0").unwrap();
        assert_eq!(
            AsyncReadableStorageTraits::get(&store, &key)
                .await
                .unwrap()
                .unwrap()
                .as_ref(),
            &[2, 3, 4]
        );
        let stream = store.get_stream(&key, ByteRange::ALL).await.unwrap().unwrap();
        let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(parts.concat(), vec![2, 3, 4]);
        assert!(store
            .get_stream(&StoreKey::new("tas/9").unwrap(), ByteRange::ALL)
            .await
            .unwrap()
            .is_none());
    }
}
