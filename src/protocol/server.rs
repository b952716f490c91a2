//! HTTP server for the legacy and extended endpoints
//!
//! Routes:
//!
//! | Path | Body |
//! |---|---|
//! | `/load/storage` | legacy `number[]` |
//! | `/load/storage-extended` | extended object array |
//! | `/load/stream` | server-sent events, both shapes per tick |
//! | `/healthz` | `ok` |
//! | `/metrics` | Prometheus text format |

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{project_legacy, EXTENDED_EVENT, EXTENDED_PATH, LEGACY_EVENT, LEGACY_PATH, STREAM_PATH};
use crate::error::{Error, Result};
use crate::poller::{LoadSnapshot, SnapshotReceiver};
use crate::telemetry;

type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";
const EVENT_STREAM: &str = "text/event-stream";

// =============================================================================
// Server State
// =============================================================================

/// Shared by every connection
#[derive(Clone)]
pub struct ServerState {
    snapshots: SnapshotReceiver,
    storage_enabled: bool,
    max_wait: Duration,
}

impl ServerState {
    /// `storage_enabled = false` makes both load endpoints answer with an empty body.
    pub fn new(snapshots: SnapshotReceiver, storage_enabled: bool, max_wait: Duration) -> Self {
        Self {
            snapshots,
            storage_enabled,
            max_wait,
        }
    }

    /// Latest snapshot, waiting up to `max_wait` for the first one.
    async fn latest(&self) -> Option<Arc<LoadSnapshot>> {
        let mut rx = self.snapshots.clone();
        let waited = timeout(self.max_wait, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(snapshot)) => snapshot.clone(),
            _ => None,
        }
    }
}

// =============================================================================
// Serving
// =============================================================================

/// Bind `addr` and serve until `shutdown` fires.
pub async fn run_server(addr: &str, state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid bind address '{}': {}", addr, e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind server: {}", e)))?;

    info!("Server listening on {}", addr);
    serve(listener, state, shutdown).await
}

/// Serve connections from an already bound listener.
pub async fn serve(listener: TcpListener, state: ServerState, shutdown: CancellationToken) -> Result<()> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted
                .map_err(|e| Error::Internal(format!("Server accept error: {}", e)))?,
        };

        let io = TokioIo::new(stream);
        let state = state.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle(req, state.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Connection from {} ended with error: {}", peer, e);
            }
        });
    }
}

async fn handle(req: Request<Incoming>, state: ServerState) -> std::result::Result<Response<ResponseBody>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
    }

    let response = match req.uri().path() {
        LEGACY_PATH => load_response(&state, |s| project_legacy(&s.entries)).await,
        EXTENDED_PATH => load_response(&state, |s| s.entries.clone()).await,
        STREAM_PATH => stream_response(&state),
        "/healthz" => text(StatusCode::OK, "ok"),
        "/metrics" => metrics_response(),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

async fn load_response<T, F>(state: &ServerState, project: F) -> Response<ResponseBody>
where
    T: Serialize,
    F: FnOnce(&LoadSnapshot) -> T,
{
    if !state.storage_enabled {
        return respond(StatusCode::OK, JSON, Empty::new().boxed_unsync());
    }

    let Some(snapshot) = state.latest().await else {
        return text(StatusCode::SERVICE_UNAVAILABLE, "no data available");
    };

    match serde_json::to_vec(&project(&snapshot)) {
        Ok(body) => respond(StatusCode::OK, JSON, full(body)),
        Err(e) => {
            error!("Failed to encode storage load: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "encoding error")
        }
    }
}

fn stream_response(state: &ServerState) -> Response<ResponseBody> {
    if !state.storage_enabled {
        return respond(StatusCode::OK, EVENT_STREAM, Empty::new().boxed_unsync());
    }

    let events = futures::stream::unfold(state.snapshots.clone(), |mut rx| async move {
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let snapshot = rx.borrow_and_update().clone();
            if let Some(snapshot) = snapshot {
                let frame = Frame::data(Bytes::from(encode_events(&snapshot)));
                return Some((Ok::<_, Infallible>(frame), rx));
            }
        }
    });

    let mut response = respond(StatusCode::OK, EVENT_STREAM, StreamBody::new(events).boxed_unsync());
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Both push events for one snapshot, in SSE wire format.
pub fn encode_events(snapshot: &LoadSnapshot) -> String {
    let legacy = serde_json::to_string(&project_legacy(&snapshot.entries)).unwrap_or_default();
    let extended = serde_json::to_string(&snapshot.entries).unwrap_or_default();
    format!(
        "event: {}\ndata: {}\n\nevent: {}\ndata: {}\n\n",
        LEGACY_EVENT, legacy, EXTENDED_EVENT, extended
    )
}

fn metrics_response() -> Response<ResponseBody> {
    match telemetry::metrics().encode() {
        Ok((body, content_type)) => {
            let mut response = respond(StatusCode::OK, TEXT, full(body));
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!("{}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

// =============================================================================
// Response helpers
// =============================================================================

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into()).boxed_unsync()
}

fn text(status: StatusCode, body: &'static str) -> Response<ResponseBody> {
    respond(status, TEXT, full(body))
}

fn respond(status: StatusCode, content_type: &'static str, body: ResponseBody) -> Response<ResponseBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
