//! The HTTP surface of the gateway.
//!
//! | Route | |
//! |---|---|
//! | `GET /datasets/{dataset_id}/kerchunk/{key}` | [`ChunkGateway::serve`] |
//! | `GET /datasets/{dataset_id}/kerchunk-tape-order/{key}` | [`ChunkGateway::serve_tape_order`] |
//! | `GET /datasets` | the identifiers of the served datasets |
//! | `GET /healthz` | liveness |
//!
//! `HEAD` is accepted wherever `GET` is.
//! A `HEAD` request for a data key is answered by [`ChunkGateway::serve_head`] without reading the value.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::gateway::{ChunkGateway, GatewayResponse, ResponseBody};

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        let body = match self.body {
            ResponseBody::Message(message) => Body::from(message),
            ResponseBody::Bytes(bytes) => Body::from(bytes),
            ResponseBody::Stream(stream) => Body::from_stream(stream),
            ResponseBody::Empty(_) => Body::empty(),
        };
        (self.outcome.status(), self.headers, body).into_response()
    }
}

/// Build the router serving `gateway`.
pub fn build_router(gateway: Arc<ChunkGateway>) -> Router {
    Router::new()
        .route(
            "/datasets/:dataset_id/kerchunk/*key",
            get(kerchunk).head(kerchunk_head),
        )
        .route(
            "/datasets/:dataset_id/kerchunk-tape-order/*key",
            get(kerchunk_tape_order),
        )
        .route("/datasets", get(datasets))
        .route("/healthz", get(healthz))
        .with_state(gateway)
}

async fn kerchunk(
    State(gateway): State<Arc<ChunkGateway>>,
    Path((dataset_id, key)): Path<(String, String)>,
) -> GatewayResponse {
    gateway.serve(&dataset_id, &key).await
}

async fn kerchunk_head(
    State(gateway): State<Arc<ChunkGateway>>,
    Path((dataset_id, key)): Path<(String, String)>,
) -> GatewayResponse {
    gateway.serve_head(&dataset_id, &key).await
}

async fn kerchunk_tape_order(
    State(gateway): State<Arc<ChunkGateway>>,
    Path((dataset_id, key)): Path<(String, String)>,
) -> GatewayResponse {
    gateway.serve_tape_order(&dataset_id, &key).await
}

async fn datasets(State(gateway): State<Arc<ChunkGateway>>) -> Json<Vec<String>> {
    Json(gateway.catalog().ids())
}

async fn healthz() -> &'static str {
    "ok"
}
