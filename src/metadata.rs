//! Zarr metadata served from reference manifests.
//!
//! Metadata keys are projections of one root document, the consolidated metadata of the dataset.
//! This module classifies keys ([`classify_key`]), renders the fragment for a metadata key ([`render`]), sanitises documents ([`sanitize`]) and caches rendered documents ([`MetadataCache`]).

mod cache;
mod key_class;
mod render;
mod sanitize;

pub use cache::MetadataCache;
pub use key_class::{classify_key, KeyClass, ZARRAY, ZARR_JSON, ZATTRS, ZGROUP, ZMETADATA};
pub use render::{render, root_key, ConsolidatedMetadata, RenderError};
pub use sanitize::{parse_json_lenient, sanitize, TRANSIENT_ATTRIBUTES};
