//! HTTP server
//!
//! Serves rounds from a `PublicSource`. Historical rounds are fetched
//! directly and marked immutable; a request for the round right after the
//! latest streamed one is parked on [`RoundSync`] until it is produced.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use beacon_core::{BeaconError, BeaconResult, GroupInfo, PublicSource};

use crate::headers::{self, IMMUTABLE, IMMUTABLE_SECS};
use crate::sync::{run_watcher, RoundSync};
use crate::ServerConfig;

const JSON: &str = "application/json";

struct ServerShared<S> {
    source: Arc<S>,
    sync: Arc<RoundSync>,
    group: RwLock<Option<GroupInfo>>,
    config: ServerConfig,
    shutdown: CancellationToken,
}

impl<S: PublicSource> ServerShared<S> {
    async fn group(&self) -> Option<GroupInfo> {
        let cached = self.group.read().clone();
        if cached.is_some() {
            return cached;
        }

        let timeout = self.config.request_timeout;
        let packet = match tokio::time::timeout(timeout, self.source.group()).await {
            Ok(Ok(packet)) => packet,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "group fetch failed");
                return None;
            }
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "group fetch timed out");
                return None;
            }
        };

        match GroupInfo::from_packet(&packet) {
            Ok(group) => {
                *self.group.write() = Some(group.clone());
                Some(group)
            }
            Err(e) => {
                tracing::warn!(error = %e, "invalid group fetched");
                None
            }
        }
    }

    async fn fetch(&self, round: u64) -> BeaconResult<Bytes> {
        let timeout = self.config.request_timeout;
        let beacon = tokio::time::timeout(timeout, self.source.public_rand(round))
            .await
            .map_err(|_| BeaconError::Timeout(timeout))??;
        Ok(Bytes::from(beacon.to_json()?))
    }

    async fn get_rand(&self, round: u64) -> BeaconResult<Bytes> {
        if let Some(waiter) = self.sync.register(round) {
            return waiter.wait(self.config.next_round_timeout).await;
        }
        self.fetch(round).await
    }
}

/// Public round API backed by a `PublicSource`
pub struct BeaconServer<S> {
    shared: Arc<ServerShared<S>>,
}

impl<S> Clone for BeaconServer<S> {
    fn clone(&self) -> Self {
        BeaconServer {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: PublicSource> BeaconServer<S> {
    /// Create the server and start its upstream watcher
    pub fn new(source: S, config: ServerConfig) -> Self {
        let shared = Arc::new(ServerShared {
            source: Arc::new(source),
            sync: Arc::new(RoundSync::new()),
            group: RwLock::new(None),
            config,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_watcher(
            Arc::clone(&shared.source),
            Arc::clone(&shared.sync),
            shared.config.reconnect_delay,
            shared.shutdown.child_token(),
        ));

        BeaconServer { shared }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/public/latest", get(latest_rand::<S>))
            .route("/public/:round", get(public_rand::<S>))
            .route("/group", get(group::<S>))
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.shared))
    }

    /// Serve on `listener` until [`shutdown`](Self::shutdown)
    pub async fn serve(self, listener: TcpListener) -> BeaconResult<()> {
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(addr = ?addr, "beacon http server listening");

        let shutdown = self.shared.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| BeaconError::Upstream(e.to_string()))
    }

    /// Stop the watcher and the listener; parked requests fail
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }

    pub fn round_sync(&self) -> &Arc<RoundSync> {
        &self.shared.sync
    }

    /// JSON body for `round`, parking if it is the next round
    pub async fn get_rand(&self, round: u64) -> BeaconResult<Bytes> {
        self.shared.get_rand(round).await
    }

    /// Group descriptor, fetched once and kept
    pub async fn group_info(&self) -> Option<GroupInfo> {
        self.shared.group().await
    }
}

impl<S> Drop for ServerShared<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn failure(status: StatusCode, path: &str, error: &BeaconError) -> Response {
    if error.is_cancellation() {
        tracing::debug!(path, error = %error, "request cancelled");
    } else {
        tracing::warn!(path, error = %error, "request failed");
    }
    status.into_response()
}

fn status_of(error: &BeaconError) -> StatusCode {
    match error {
        BeaconError::InvalidRound(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn immutable(body: Bytes, last_modified: i64, request: &HeaderMap) -> Response {
    let expires = headers::http_date(headers::now_millis() / 1000 + IMMUTABLE_SECS);
    let since = request
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok());

    let status = if headers::not_modified(since, last_modified) {
        StatusCode::NOT_MODIFIED
    } else {
        StatusCode::OK
    };
    let body = if status == StatusCode::OK { body } else { Bytes::new() };

    (
        status,
        [
            (header::CACHE_CONTROL, IMMUTABLE.to_string()),
            (header::EXPIRES, expires),
            (header::LAST_MODIFIED, headers::http_date(last_modified)),
            (header::CONTENT_TYPE, JSON.to_string()),
        ],
        body,
    )
        .into_response()
}

async fn public_rand<S: PublicSource>(
    State(shared): State<Arc<ServerShared<S>>>,
    Path(round): Path<String>,
    request: HeaderMap,
) -> Response {
    let path = format!("/public/{}", round);
    let round = match parse_round(&round) {
        Some(0) => return serve_latest(&shared).await,
        Some(round) => round,
        None => {
            let error = BeaconError::InvalidRound(round);
            return failure(status_of(&error), &path, &error);
        }
    };

    let body = match shared.get_rand(round).await {
        Ok(body) => body,
        Err(e) => return failure(status_of(&e), &path, &e),
    };

    let last_modified = match shared.group().await {
        Some(group) => group.time_of_round(round),
        None => headers::now_millis() / 1000,
    };
    immutable(body, last_modified, &request)
}

/// Decimal digits only; `u64::from_str` alone also takes a leading `+`
fn parse_round(round: &str) -> Option<u64> {
    if round.is_empty() || !round.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    round.parse().ok()
}

async fn latest_rand<S: PublicSource>(State(shared): State<Arc<ServerShared<S>>>) -> Response {
    serve_latest(&shared).await
}

/// Round 0 means latest, so `/public/0` is answered here too and never
/// marked immutable.
async fn serve_latest<S: PublicSource>(shared: &ServerShared<S>) -> Response {
    let timeout = shared.config.request_timeout;
    let beacon = match tokio::time::timeout(timeout, shared.source.public_rand(0)).await {
        Ok(Ok(beacon)) => beacon,
        Ok(Err(e)) => return failure(status_of(&e), "/public/latest", &e),
        Err(_) => {
            let error = BeaconError::Timeout(timeout);
            return failure(status_of(&error), "/public/latest", &error);
        }
    };
    let body = match beacon.to_json() {
        Ok(body) => body,
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, "/public/latest", &e),
    };

    let now_ms = headers::now_millis();
    let (round_time, next_time, period) = match shared.group().await {
        Some(group) => (
            group.time_of_round(beacon.round),
            group.time_of_round(beacon.round.saturating_add(1)),
            group.period.as_secs(),
        ),
        None => (now_ms / 1000, now_ms / 1000, 0),
    };

    let mut response = (
        [
            (header::CONTENT_TYPE, JSON.to_string()),
            (header::EXPIRES, headers::http_date(next_time)),
            (header::LAST_MODIFIED, headers::http_date(round_time)),
        ],
        body,
    )
        .into_response();

    match headers::latest_max_age(next_time, now_ms, period) {
        Some(max_age) => {
            if let Ok(value) = HeaderValue::from_str(&max_age) {
                response.headers_mut().insert(header::CACHE_CONTROL, value);
            }
        }
        None => tracing::warn!(
            round = beacon.round,
            remaining_ms = next_time.saturating_mul(1000).saturating_sub(now_ms),
            "latest rand in the past"
        ),
    }

    response
}

async fn group<S: PublicSource>(
    State(shared): State<Arc<ServerShared<S>>>,
    request: HeaderMap,
) -> Response {
    let Some(group) = shared.group().await else {
        tracing::warn!("failed to serve group");
        return StatusCode::NO_CONTENT.into_response();
    };

    match serde_json::to_vec(&group.to_packet()) {
        Ok(body) => immutable(Bytes::from(body), group.genesis_time, &request),
        Err(e) => {
            let error = BeaconError::Decode(e.to_string());
            failure(StatusCode::INTERNAL_SERVER_ERROR, "/group", &error)
        }
    }
}
