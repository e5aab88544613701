use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::{
    reference::{ChunkReference, ReferenceManifest},
    storage::StoreKey,
};

use super::{
    classify_key,
    key_class::{ZARR_JSON, ZMETADATA},
    parse_json_lenient, sanitize, KeyClass,
};

/// A metadata rendering error.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The root document has no entry for the key.
    #[error("{0} is not in the consolidated metadata")]
    NotFound(StoreKey),
    /// The key is not a metadata key.
    #[error("{0} is not a metadata key")]
    NotMetadata(StoreKey),
    /// The root document is not valid JSON.
    #[error("invalid consolidated metadata: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

/// Zarr V2 consolidated metadata (`.zmetadata`).
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ConsolidatedMetadata {
    /// The consolidated format version. Always 1.
    #[serde(default = "consolidated_format")]
    pub zarr_consolidated_format: u64,
    /// A mapping from metadata key to metadata document.
    pub metadata: Map<String, Value>,
}

const fn consolidated_format() -> u64 {
    1
}

impl Default for ConsolidatedMetadata {
    fn default() -> Self {
        Self {
            zarr_consolidated_format: consolidated_format(),
            metadata: Map::default(),
        }
    }
}

impl ConsolidatedMetadata {
    /// Consolidate the inline group, array and attribute documents of a reference manifest.
    ///
    /// Documents which are not valid JSON are skipped.
    #[must_use]
    pub fn from_references(manifest: &ReferenceManifest) -> Self {
        let mut metadata = Map::default();
        for key in manifest.keys() {
            let Ok(store_key) = StoreKey::new(key) else {
                continue;
            };
            if !matches!(
                classify_key(&store_key),
                KeyClass::GroupRoot | KeyClass::Group | KeyClass::Array | KeyClass::Attributes
            ) {
                continue;
            }
            let Some(ChunkReference::Inline(bytes)) = manifest.get(key) else {
                continue;
            };
            match parse_json_lenient(bytes) {
                Ok(document) => {
                    metadata.insert(key.to_string(), document);
                }
                Err(err) => tracing::warn!(key = %key, error = %err, "skipping invalid metadata document"),
            }
        }
        Self {
            zarr_consolidated_format: consolidated_format(),
            metadata,
        }
    }

    /// Convert to a JSON [`Value`].
    #[must_use]
    pub fn into_value(self) -> Value {
        json!({
            "zarr_consolidated_format": self.zarr_consolidated_format,
            "metadata": Value::Object(self.metadata),
        })
    }
}

/// Return the key of the root document that metadata of class `class` is rendered from.
#[must_use]
pub fn root_key(class: KeyClass) -> &'static str {
    match class {
        KeyClass::NamespacedConsolidated => ZARR_JSON,
        _ => ZMETADATA,
    }
}

/// Render the metadata document for `key` of class `class` from the `root` document.
///
/// - `.zmetadata`: the whole root document, marked as consolidated.
/// - `.zgroup`: a constant Zarr V2 group document.
/// - `a/.zgroup`, `a/.zarray`, `.zattrs` and `a/.zattrs`: the entry for `key` in the `metadata` of the root document.
/// - `zarr.json`: the whole root document.
/// - `a/b/zarr.json`: the entry for `b` in the `consolidated_metadata.metadata` of the root document.
///
/// The rendered document is [sanitised](super::sanitize).
///
/// # Errors
/// Returns [`RenderError::NotFound`] if the root document has no entry for `key`, or [`RenderError::NotMetadata`] for a data key.
pub fn render(root: &Value, key: &StoreKey, class: KeyClass) -> Result<Value, RenderError> {
    let not_found = || RenderError::NotFound(key.clone());
    let mut document = match class {
        KeyClass::Data => return Err(RenderError::NotMetadata(key.clone())),
        KeyClass::Consolidated => {
            let mut document = root.clone();
            let Value::Object(map) = &mut document else {
                return Err(not_found());
            };
            map.insert(
                "zarr_consolidated_format".to_string(),
                Value::from(consolidated_format()),
            );
            document
        }
        KeyClass::GroupRoot => json!({"zarr_format": 2}),
        KeyClass::Group | KeyClass::Array | KeyClass::Attributes => root
            .get("metadata")
            .and_then(|metadata| metadata.get(key.as_str()))
            .cloned()
            .ok_or_else(not_found)?,
        KeyClass::NamespacedConsolidated => match key.parent() {
            None => root.clone(),
            Some(parent) => {
                let node = parent.rsplit('/').next().unwrap_or(parent);
                root.get("consolidated_metadata")
                    .and_then(|consolidated| consolidated.get("metadata"))
                    .and_then(|metadata| metadata.get(node))
                    .cloned()
                    .ok_or_else(not_found)?
            }
        },
    };
    sanitize(&mut document);
    Ok(document)
}
