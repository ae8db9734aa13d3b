/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! A stand-in for the lookup API. Answers `GET /api/lookup/:address` with `200` unless the
//! address was configured to fail.

use anyhow::Context;
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use http::StatusCode;
use serde_json::json;
use std::{collections::HashSet, net::Ipv4Addr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

#[derive(Debug, Clone, Default)]
pub struct StubOptions {
    /// Addresses answered with `500`.
    pub fail: HashSet<String>,
    /// Delay applied before every response.
    pub delay: Duration,
}

async fn lookup(
    State(opts): State<Arc<StubOptions>>,
    Path(address): Path<String>,
) -> Response {
    if !opts.delay.is_zero() {
        tokio::time::sleep(opts.delay).await;
    }

    if address.parse::<Ipv4Addr>().is_err() {
        trace!("stub rejected {}", address);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("{} is not an IPv4 address", address) })),
        )
            .into_response();
    }

    if opts.fail.contains(&address) {
        trace!("stub failing {}", address);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "lookup failed" })),
        )
            .into_response();
    }

    (StatusCode::OK, Json(json!({ "ip": address }))).into_response()
}

pub fn router(opts: StubOptions) -> Router {
    Router::new()
        .route("/api/lookup/:address", get(lookup))
        .with_state(Arc::new(opts))
}

/// Serves the stub on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    opts: StubOptions,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("Starting stub lookup server on {}", addr);

    axum::serve(listener, router(opts))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Error serving stub lookup API")
}
