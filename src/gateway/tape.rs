//! Tape ordering: staging tape-backed values ahead of reads.
//!
//! Reading any byte of a tape-backed value schedules its recall.
//! The tape ordering endpoint uses this to warm a dataset: it reads the first byte of a key, discards the result and answers with a fixed not found response.
//! Keys of the allow-listed variables and metadata keys are cheap and needed by clients right away, so they are delivered in full instead.

use std::time::Duration;

use crate::{
    chunk_store::ChunkStore,
    metadata::classify_key,
    storage::StoreKey,
};

use super::{ChunkGateway, Failure, GatewayResponse, RequestGuard};

/// The result of a [`TapeOrder::probe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    /// The value is readable now.
    Readable,
    /// The read failed, e.g. because a recall is in progress.
    Failed,
    /// The read did not complete in time.
    TimedOut,
}

/// Tape ordering probes.
#[derive(Debug)]
pub struct TapeOrder;

impl TapeOrder {
    /// Read the first byte of `key` to trigger its recall, waiting at most `timeout`.
    ///
    /// The read is fire-and-forget: its value is discarded and failures are logged, never returned.
    pub async fn probe(store: &ChunkStore, key: &StoreKey, timeout: Duration) -> ProbeResult {
        match tokio::time::timeout(timeout, store.fetch_async(key, Some(1))).await {
            Ok(Ok(_)) => ProbeResult::Readable,
            Ok(Err(err)) => {
                tracing::warn!(source = store.source(), key = %key, error = %err, "tape order probe failed");
                ProbeResult::Failed
            }
            Err(_) => {
                tracing::warn!(source = store.source(), key = %key, "tape order probe timed out");
                ProbeResult::TimedOut
            }
        }
    }
}

impl Failure {
    const ORDERED: Self = Self {
        outcome: super::Outcome::NotFound,
        message: "ordered from tape",
    };
}

impl ChunkGateway {
    /// Returns true if the tape ordering endpoint delivers `key` in full.
    ///
    /// These are the metadata keys and the keys whose first path segment is in the [tape order allow list](crate::config::GatewayConfig#tape-order-allow-list).
    #[must_use]
    pub fn tape_order_allowed(&self, key: &str) -> bool {
        let first = key.split('/').next().unwrap_or(key);
        self.config
            .tape_order_allow_list()
            .iter()
            .any(|name| name == first)
            || StoreKey::new(key).is_ok_and(|key| classify_key(&key).is_metadata())
    }

    /// Serve `key` of the dataset `dataset_id` through the tape ordering endpoint.
    ///
    /// Allow-listed keys are served as by [`ChunkGateway::serve`].
    /// Any other key is [probed](TapeOrder::probe) and answered with a not found response, whatever the probe result.
    /// The dataset is treated as tape-backed either way.
    pub async fn serve_tape_order(&self, dataset_id: &str, key: &str) -> GatewayResponse {
        let mut guard = RequestGuard {
            gateway: self,
            store: None,
        };
        if self.tape_order_allowed(key) {
            let (_, result) = self.serve_key(&mut guard, dataset_id, key, false).await;
            return self.respond(result, true);
        }

        if let (Ok((_, store)), Ok(key)) = (self.resolve(dataset_id), StoreKey::new(key)) {
            guard.store = Some(store.clone());
            let store = self.promote(store);
            let result = TapeOrder::probe(&store, &key, self.config.probe_timeout()).await;
            tracing::debug!(dataset_id, key = %key, result = ?result, "probed");
        }
        self.respond(Err(Failure::ORDERED), true)
    }
}
