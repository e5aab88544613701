//! Served datasets.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// The attribute holding the source of a dataset.
pub const SOURCE_ATTRIBUTE: &str = "source";

/// The attribute flagging a dataset as tape-backed.
pub const FROM_TAPE_ATTRIBUTE: &str = "from_tape";

/// A served dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetHandle {
    /// The stable identifier of the dataset.
    pub dataset_id: String,
    /// The source of the chunk store of the dataset, if it is chunk-servable.
    pub source: Option<String>,
    /// The dataset attributes.
    pub attrs: Map<String, Value>,
    /// Whether the dataset is backed by a tape archive.
    pub from_tape: bool,
}

impl DatasetHandle {
    /// Create a dataset handle from its attributes.
    ///
    /// The source is read from the `source` attribute and the tape flag from the `from_tape` attribute.
    /// Any `from_tape` value other than `false`, `0`, an empty string or one of `"false"`, `"no"` and `"0"` flags the dataset as tape-backed, so `"Yes"` does.
    #[must_use]
    pub fn from_attrs(dataset_id: impl Into<String>, attrs: Map<String, Value>) -> Self {
        let source = attrs
            .get(SOURCE_ATTRIBUTE)
            .and_then(Value::as_str)
            .filter(|source| !source.is_empty())
            .map(str::to_string);
        let from_tape = attrs.get(FROM_TAPE_ATTRIBUTE).is_some_and(is_truthy);
        Self {
            dataset_id: dataset_id.into(),
            source,
            attrs,
            from_tape,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(value) => *value,
        Value::Number(value) => value.as_f64().is_some_and(|value| value != 0.0),
        Value::String(value) => !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "no" | "0"
        ),
        Value::Array(values) => !values.is_empty(),
        Value::Object(values) => !values.is_empty(),
    }
}

/// The datasets currently served.
///
/// The metadata of a dataset never changes while it is registered.
/// A changed dataset is registered under a new identifier.
#[derive(Debug, Default)]
pub struct DatasetCatalog {
    datasets: RwLock<BTreeMap<String, Arc<DatasetHandle>>>,
}

impl DatasetCatalog {
    /// Create a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dataset`, replacing any dataset with the same identifier.
    ///
    /// A dataset without a source is registered too, but is not chunk-servable.
    pub fn register(&self, dataset: DatasetHandle) -> Arc<DatasetHandle> {
        if dataset.source.is_none() {
            tracing::warn!(
                dataset_id = %dataset.dataset_id,
                "dataset has no source and is not chunk-servable"
            );
        }
        let dataset = Arc::new(dataset);
        self.datasets
            .write()
            .insert(dataset.dataset_id.clone(), dataset.clone());
        dataset
    }

    /// Remove the dataset `dataset_id`.
    pub fn deregister(&self, dataset_id: &str) -> Option<Arc<DatasetHandle>> {
        self.datasets.write().remove(dataset_id)
    }

    /// Return the dataset `dataset_id`.
    #[must_use]
    pub fn get(&self, dataset_id: &str) -> Option<Arc<DatasetHandle>> {
        self.datasets.read().get(dataset_id).cloned()
    }

    /// Return the identifiers of all datasets in lexicographical order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.datasets.read().keys().cloned().collect()
    }

    /// Return the sources referenced by any dataset.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self
            .datasets
            .read()
            .values()
            .filter_map(|dataset| dataset.source.clone())
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }

    /// Replace the whole catalog with `datasets`.
    ///
    /// Returns the datasets which are no longer served.
    pub fn replace_all(&self, datasets: Vec<DatasetHandle>) -> Vec<Arc<DatasetHandle>> {
        for dataset in datasets.iter().filter(|dataset| dataset.source.is_none()) {
            tracing::warn!(
                dataset_id = %dataset.dataset_id,
                "dataset has no source and is not chunk-servable"
            );
        }
        let datasets: BTreeMap<String, Arc<DatasetHandle>> = datasets
            .into_iter()
            .map(|dataset| (dataset.dataset_id.clone(), Arc::new(dataset)))
            .collect();
        let previous = std::mem::replace(&mut *self.datasets.write(), datasets);
        let current = self.datasets.read();
        previous
            .into_iter()
            .filter(|(dataset_id, _)| !current.contains_key(dataset_id))
            .map(|(_, dataset)| dataset)
            .collect()
    }
}
