//! An HTTP gateway serving [Zarr](https://zarr.dev) metadata and chunks through virtual reference manifests.
//!
//! A reference manifest (a [kerchunk](https://fsspec.github.io/kerchunk/) reference file) maps the keys of a Zarr hierarchy to inline values or to byte ranges of files which are not Zarr themselves, such as netCDF files on a local disk, an object store or a tape archive.
//! `zarrs_gateway` serves those keys over HTTP, so that any Zarr client can read the files as if they were a Zarr hierarchy.
//!
//! ## Overview
//! - A [`ChunkStore`](chunk_store::ChunkStore) binds a manifest to the storage holding its targets. Chunk stores are held in the [`StoreRegistry`](registry::StoreRegistry), one per `source`.
//! - A [`DatasetHandle`](dataset::DatasetHandle) names the source of a served dataset. Handles are held in the [`DatasetCatalog`](dataset::DatasetCatalog).
//! - The [`ChunkGateway`](gateway::ChunkGateway) serves a key of a dataset.
//!   Metadata keys are rendered from the consolidated metadata of the dataset and cached in the [`MetadataCache`](metadata::MetadataCache).
//!   Data keys are streamed from the chunk store.
//! - Reads from a tape archive fail as [unavailable](gateway::Outcome::Unavailable) with a `Retry-After` hint until the value is staged.
//!   The [tape ordering endpoint](gateway::TapeOrder) stages values without delivering them.
//! - The [`ResourcePressureMonitor`](pressure::ResourcePressureMonitor) runs a reclamation pass every few hundred requests.
//!
//! ## Example
//! ```rust,no_run
//! # use std::sync::Arc;
//! use zarrs_gateway::{config::{CatalogFile, GatewayConfig}, gateway::ChunkGateway, http::build_router};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let gateway = Arc::new(ChunkGateway::new(GatewayConfig::from_env()?));
//! gateway.load_catalog(&CatalogFile::from_path("/path/to/catalog.json")?);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:9000").await?;
//! axum::serve(listener, build_router(gateway)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Features
//! The `s3`, `gcs`, `azure` and `http` features enable references to targets in the corresponding object stores.
//!
//! ## Licence
//! `zarrs_gateway` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![warn(unused_variables)]
#![warn(dead_code)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::missing_panics_doc)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod byte_range;
pub mod chunk_store;
pub mod config;
pub mod dataset;
pub mod gateway;
pub mod http;
pub mod metadata;
pub mod pressure;
pub mod reference;
pub mod registry;
pub mod storage;

pub use chunk_store::{ChunkStore, ChunkStoreError, StoreOptions};
pub use gateway::{ChunkGateway, GatewayResponse, Outcome};
pub use registry::StoreRegistry;
