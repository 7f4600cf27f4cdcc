//! HTTP surface adapter (§4.9): accepts connections, builds an
//! [`IncomingRequest`] from the raw hyper plumbing, resolves the route
//! through the live generation, runs the evaluator and response pipeline,
//! and marshals the outcome back as a `hyper::Response`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::evaluator::{self, CandidateResult, IncomingRequest};
use crate::generation::GenerationCell;
use crate::pipeline;
use crate::ratelimiter::RateLimiterStore;
use crate::trace::{RingBuffer, TraceEntry};

/// Request bodies over this size are rejected with 413 before being fully
/// buffered (§4.4 "Body reads are capped at 10 MB").
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// The handles every accepted connection needs; cheap to clone (all `Arc`s).
#[derive(Clone)]
pub struct ServerHandles {
    pub generation: Arc<GenerationCell>,
    pub rate_limiter: Arc<RateLimiterStore>,
    pub trace: Arc<RingBuffer>,
}

/// Per-connection and shutdown-grace timeouts honored by [`serve`] (§6
/// Configuration's `--idle-timeout-secs` / `--shutdown-timeout-secs`).
#[derive(Debug, Clone, Copy)]
pub struct ServerTimeouts {
    pub idle: Duration,
    pub shutdown_grace: Duration,
}

/// Accepts connections on `addr` until `shutdown` fires. Each connection is
/// served on its own spawned task, mirroring the per-socket `tokio::spawn`
/// idiom used for the proxy's listener loop.
pub async fn run(
    addr: SocketAddr,
    handles: ServerHandles,
    shutdown: CancellationToken,
    timeouts: ServerTimeouts,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "mock server listening");
    serve(listener, handles, shutdown, timeouts).await
}

/// Accepts connections on an already-bound listener. Split out from [`run`]
/// so tests can bind an ephemeral port (`127.0.0.1:0`), read back the assigned
/// port, and hand the same listener off without a bind-race against the
/// caller picking a port.
///
/// Each accepted connection is bounded by `timeouts.idle` (the connection is
/// dropped if it has made no progress for that long). After `shutdown` fires,
/// already-accepted connections are given up to `timeouts.shutdown_grace` to
/// finish before `serve` returns, so in-flight requests are not cut off mid-write.
pub async fn serve(
    listener: TcpListener,
    handles: ServerHandles,
    shutdown: CancellationToken,
    timeouts: ServerTimeouts,
) -> std::io::Result<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown signal received, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let io = hyper_util::rt::TokioIo::new(stream);
                let handles = handles.clone();
                let conn_cancel = shutdown.child_token();
                let idle = timeouts.idle;

                connections.spawn(async move {
                    let service = service_fn(move |req| {
                        let handles = handles.clone();
                        let cancel = conn_cancel.child_token();
                        async move { handle(req, handles, cancel, peer).await }
                    });

                    let conn = http1::Builder::new().serve_connection(io, service);
                    match tokio::time::timeout(idle, conn).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => error!(%err, %peer, "connection error"),
                        Err(_) => warn!(%peer, "connection idle timeout elapsed"),
                    }
                });
            }
        }
    }

    if !connections.is_empty() {
        let remaining = connections.len();
        info!(remaining, grace_secs = %timeouts.shutdown_grace.as_secs(), "draining in-flight connections");
        let _ = tokio::time::timeout(timeouts.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        connections.abort_all();
    }

    Ok(())
}

/// A request was cancelled mid-flight; the connection is dropped without a
/// response being written (§5 Cancellation & timeouts).
#[derive(Debug)]
struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request cancelled")
    }
}

impl std::error::Error for Cancelled {}

async fn handle(
    req: Request<Incoming>,
    handles: ServerHandles,
    cancel: CancellationToken,
    peer: SocketAddr,
) -> Result<Response<Full<Bytes>>, Cancelled> {
    let method = req.method().as_str().to_ascii_uppercase();
    let path = req.uri().path().to_string();
    let raw_query = req.uri().query().unwrap_or("").to_string();

    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    let body = match read_body(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => {
            record_trace(&handles.trace, &method, &path, None, Vec::new(), false);
            return Ok(json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "request body exceeded the 10 MB cap",
            ));
        }
    };

    let query_params = parse_query(&raw_query);
    let generation = handles.generation.load();

    let Some((route_key, path_params)) = generation.routes.resolve(&method, &path) else {
        record_trace(&handles.trace, &method, &path, None, Vec::new(), false);
        return Ok(json_response(StatusCode::NOT_FOUND, "no matching scenario"));
    };

    let candidates = generation.index.candidates(&route_key).unwrap_or(&[]);
    let request = IncomingRequest {
        method: method.clone(),
        path: path.clone(),
        query: raw_query,
        headers,
        body,
        peer,
    };

    let (matched, results) = evaluator::evaluate(&request, candidates);

    let Some(scenario) = matched else {
        record_trace(&handles.trace, &method, &path, None, results, false);
        return Ok(json_response(StatusCode::NOT_FOUND, "no matching scenario"));
    };

    let matched_id = scenario.id.clone();
    let outcome = pipeline::run(
        &scenario,
        &request,
        &path_params,
        &query_params,
        &handles.rate_limiter,
        &cancel,
    )
    .await;

    let Some(outcome) = outcome else {
        // Cancelled: no write, no trace mutation beyond what already happened.
        return Err(Cancelled);
    };

    record_trace(
        &handles.trace,
        &method,
        &path,
        Some(&matched_id),
        results,
        outcome.rate_limited,
    );

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK));
    for (name, value) in &outcome.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    Ok(builder.body(Full::new(Bytes::from(outcome.body))).unwrap())
}

async fn read_body(body: Incoming) -> Result<Vec<u8>, ()> {
    let limited = Limited::new(body, MAX_BODY_BYTES);
    match limited.collect().await {
        Ok(collected) => Ok(collected.to_bytes().to_vec()),
        Err(_) => Err(()),
    }
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        };
        let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_default();
        let value = urlencoding::decode(value).map(|c| c.into_owned()).unwrap_or_default();
        if !key.is_empty() {
            params.insert(key, value);
        }
    }
    params
}

fn json_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

fn record_trace(
    trace: &RingBuffer,
    method: &str,
    path: &str,
    matched_id: Option<&str>,
    candidates: Vec<CandidateResult>,
    rate_limited: bool,
) {
    trace.add(TraceEntry {
        timestamp: Utc::now(),
        method: method.to_string(),
        path: path.to_string(),
        matched_id: matched_id.unwrap_or_default().to_string(),
        candidates,
        rate_limited,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_with_percent_encoding() {
        let params = parse_query("page=2&q=hello%20world&empty");
        assert_eq!(params.get("page"), Some(&"2".to_string()));
        assert_eq!(params.get("q"), Some(&"hello world".to_string()));
        assert_eq!(params.get("empty"), Some(&"".to_string()));
    }

    #[test]
    fn empty_query_string_yields_no_params() {
        assert!(parse_query("").is_empty());
    }
}
