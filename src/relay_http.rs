//! The relay-mesh HTTP surface: the mandatory cross-node fallback
//! for transaction lookup, independent of whatever gossip transport a given
//! deployment uses. Built on a low-level hyper idiom — a timeout-polled
//! accept loop over `TcpListener`, `service_fn`, and
//! `hyper::server::conn::http1`.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::relay::RelayCache;

/// Shared state the relay HTTP surface reads from; it never mutates the
/// cache outside of the `POST /relay/tx` and mesh-fallback paths.
pub struct RelayHttpState {
    pub relay_cache: Arc<RelayCache>,
    pub peer_urls: Vec<String>,
    pub started_at: Instant,
    pub shutdown: AtomicBool,
}

impl RelayHttpState {
    pub fn new(relay_cache: Arc<RelayCache>, peer_urls: Vec<String>) -> Self {
        RelayHttpState {
            relay_cache,
            peer_urls,
            started_at: Instant::now(),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// 64 lowercase hex characters.
fn is_valid_txid(txid: &str) -> bool {
    txid.len() == 64 && txid.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn json_response(status: StatusCode, body: Value) -> Response<Full<Bytes>> {
    let bytes = serde_json::to_vec(&body).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap()
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" }))
}

fn bad_request(message: &str) -> Response<Full<Bytes>> {
    json_response(StatusCode::BAD_REQUEST, json!({ "error": message }))
}

/// Strips a leading `/relay/tx/` and any `{txid}/status` suffix, returning
/// `(txid, is_status_path)`.
fn parse_tx_path(path: &str) -> Option<(&str, bool)> {
    let rest = path.strip_prefix("/relay/tx/")?;
    match rest.strip_suffix("/status") {
        Some(txid) => Some((txid, true)),
        None => Some((rest, false)),
    }
}

async fn handle_get_tx(state: &RelayHttpState, txid: &str, nomesh: bool) -> Response<Full<Bytes>> {
    if !is_valid_txid(txid) {
        return bad_request("txid must be 64 lowercase hex characters");
    }

    match state.relay_cache.get(txid) {
        Ok(Some(tx)) => json_response(
            StatusCode::OK,
            json!({
                "txid": tx.txid,
                "raw_hex": tx.raw_hex,
                "confirmed": tx.confirmed,
                "block_hash": tx.block_hash,
            }),
        ),
        Ok(None) if nomesh => not_found(),
        Ok(None) => {
            match crate::relay::mesh::mesh_lookup(
                &reqwest::Client::new(),
                &state.peer_urls,
                txid,
                Duration::from_secs(5),
            )
            .await
            {
                Some(raw_hex) => {
                    let now = now_s();
                    if let Err(e) = state.relay_cache.store(txid, &raw_hex, false, None, None, now) {
                        warn!(error = %e, txid, "failed to cache mesh-fetched transaction");
                    }
                    json_response(
                        StatusCode::OK,
                        json!({
                            "txid": txid,
                            "raw_hex": raw_hex,
                            "confirmed": false,
                            "block_hash": Value::Null,
                        }),
                    )
                }
                None => not_found(),
            }
        }
        Err(e) => {
            error!(error = %e, txid, "relay cache read failed");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "storage error" }))
        }
    }
}

fn handle_tx_status(state: &RelayHttpState, txid: &str) -> Response<Full<Bytes>> {
    if !is_valid_txid(txid) {
        return bad_request("txid must be 64 lowercase hex characters");
    }
    match state.relay_cache.get(txid) {
        Ok(Some(tx)) => json_response(
            StatusCode::OK,
            json!({
                "txid": tx.txid,
                "found": true,
                "confirmed": tx.confirmed,
                "block_hash": tx.block_hash,
            }),
        ),
        Ok(None) => json_response(
            StatusCode::OK,
            json!({ "txid": txid, "found": false, "confirmed": false, "block_hash": Value::Null }),
        ),
        Err(e) => {
            error!(error = %e, txid, "relay cache read failed");
            json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "storage error" }))
        }
    }
}

fn handle_health(state: &RelayHttpState) -> Response<Full<Bytes>> {
    let db_size = state.relay_cache.db_count().unwrap_or_else(|e| {
        error!(error = %e, "relay cache row count failed");
        0
    });
    json_response(
        StatusCode::OK,
        json!({
            "peer_count": state.peer_urls.len(),
            "cache_size": state.relay_cache.memory_len(),
            "db_size": db_size,
            "uptime_ms": state.started_at.elapsed().as_millis() as u64,
        }),
    )
}

async fn handle_post_tx(state: &RelayHttpState, req: Request<Incoming>, nomesh: bool) -> Response<Full<Bytes>> {
    let body = match req.collect().await {
        Ok(b) => b.to_bytes(),
        Err(_) => return bad_request("failed to read request body"),
    };

    #[derive(serde::Deserialize)]
    struct PostTxBody {
        txid: String,
        raw_hex: String,
    }

    let parsed: PostTxBody = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return bad_request("expected { txid, raw_hex }"),
    };

    if !is_valid_txid(&parsed.txid) {
        return bad_request("txid must be 64 lowercase hex characters");
    }

    let now = now_s();
    if let Err(e) = state
        .relay_cache
        .store(&parsed.txid, &parsed.raw_hex, false, None, None, now)
    {
        error!(error = %e, txid = %parsed.txid, "failed to store relayed transaction");
        return json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "storage error" }));
    }

    // Forwarding to the rest of the mesh happens over gossip, attached by
    // the daemon at startup; this module only guards the "nomesh" marker so
    // a peer-originated POST does not get looped back out.
    let _ = nomesh;

    json_response(StatusCode::OK, json!({ "txid": parsed.txid, "stored": true }))
}

async fn handle_request(
    state: Arc<RelayHttpState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let nomesh = req
        .uri()
        .query()
        .map(|q| q.split('&').any(|kv| kv == "nomesh=1"))
        .unwrap_or(false);

    let response = match (req.method().clone(), path.as_str()) {
        (Method::GET, "/relay/health") => handle_health(&state),
        (Method::GET, p) if p.starts_with("/relay/tx/") => match parse_tx_path(p) {
            Some((txid, true)) => handle_tx_status(&state, txid),
            Some((txid, false)) => handle_get_tx(&state, txid, nomesh).await,
            None => not_found(),
        },
        (Method::POST, "/relay/tx") => handle_post_tx(&state, req, nomesh).await,
        _ => not_found(),
    };
    Ok(response)
}

fn now_s() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Accept loop: timeout-polled so the shutdown flag is observed promptly
/// without a separate cancellation channel.
pub async fn serve(
    state: Arc<RelayHttpState>,
    bind: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "relay HTTP surface listening");

    loop {
        if state.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let (stream, _) = match timeout(Duration::from_millis(250), listener.accept()).await {
            Ok(Ok(pair)) => pair,
            _ => continue,
        };
        let s = Arc::clone(&state);
        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let s2 = Arc::clone(&s);
                async move { handle_request(s2, req).await }
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), svc)
                .await
            {
                warn!(error = %e, "relay HTTP connection error");
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_txid_accepts_64_lowercase_hex() {
        let txid = "a".repeat(64);
        assert!(is_valid_txid(&txid));
    }

    #[test]
    fn test_valid_txid_rejects_uppercase_and_short() {
        assert!(!is_valid_txid(&"A".repeat(64)));
        assert!(!is_valid_txid(&"a".repeat(63)));
        assert!(!is_valid_txid("not-hex-at-all"));
    }

    #[test]
    fn test_parse_tx_path_strips_status_suffix() {
        assert_eq!(parse_tx_path("/relay/tx/abcd/status"), Some(("abcd", true)));
        assert_eq!(parse_tx_path("/relay/tx/abcd"), Some(("abcd", false)));
        assert_eq!(parse_tx_path("/relay/health"), None);
    }

    #[tokio::test]
    async fn test_handle_health_reports_real_db_size() {
        let dir = std::env::temp_dir().join(format!("clawminer_relay_http_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let cache = Arc::new(RelayCache::open(&dir, 10, 3600).unwrap());
        cache.store("a", "1", false, None, None, 0).unwrap();
        cache.store("b", "2", false, None, None, 0).unwrap();

        let state = RelayHttpState::new(cache, vec!["http://peer".to_string()]);
        let resp = handle_health(&state);
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let parsed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["db_size"].as_u64(), Some(2));
        assert_eq!(parsed["peer_count"].as_u64(), Some(1));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
