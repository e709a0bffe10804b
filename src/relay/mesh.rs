//! HTTP mesh-peer fallback for transactions not locally cached.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

const NOMESH_QUERY: &str = "?nomesh=1";

#[derive(Deserialize)]
struct MeshTxResponse {
    raw_hex: String,
}

/// Iterates known mesh-peer URLs with a per-peer timeout, returning the raw
/// hex of the first `200` response that contains it. A "no-mesh" marker is
/// attached to the forwarded request so the peer won't cascade the lookup
/// further, preventing infinite forwarding loops across the mesh.
pub async fn mesh_lookup(
    client: &reqwest::Client,
    peer_urls: &[String],
    txid: &str,
    per_peer_timeout: Duration,
) -> Option<String> {
    for base in peer_urls {
        let url = format!("{base}/relay/tx/{txid}{NOMESH_QUERY}");
        let resp = client
            .get(&url)
            .timeout(per_peer_timeout)
            .send()
            .await;

        match resp {
            Ok(r) if r.status().is_success() => {
                if let Ok(body) = r.json::<MeshTxResponse>().await {
                    return Some(body.raw_hex);
                }
            }
            Ok(r) => debug!(peer = %base, status = %r.status(), "mesh peer did not have tx"),
            Err(e) => debug!(peer = %base, error = %e, "mesh peer unreachable"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mesh_lookup_returns_none_for_empty_peer_list() {
        let client = reqwest::Client::new();
        let got = mesh_lookup(&client, &[], "abc", Duration::from_millis(50)).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_mesh_lookup_skips_unreachable_peers() {
        let client = reqwest::Client::new();
        let peers = vec!["http://127.0.0.1:1".to_string()];
        let got = mesh_lookup(&client, &peers, "abc", Duration::from_millis(50)).await;
        assert!(got.is_none());
    }
}
