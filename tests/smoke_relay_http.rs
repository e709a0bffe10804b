use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

fn pick_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

fn start_clawminerd(relay_port: u16, p2p_port: u16, data_dir: &PathBuf) -> Child {
    let bin = env!("CARGO_BIN_EXE_clawminerd");

    std::fs::create_dir_all(data_dir).unwrap();

    Command::new(bin)
        .env("CLAWMINER_MINER_ADDRESS", "test-miner-address")
        .env("CLAWMINER_DATA_DIR", data_dir.to_string_lossy().to_string())
        .env("CLAWMINER_RELAY_HTTP_BIND", "127.0.0.1")
        .env("CLAWMINER_RELAY_HTTP_PORT", relay_port.to_string())
        .env("CLAWMINER_P2P_PORT", p2p_port.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn clawminerd")
}

struct KillOnDrop(Child);
impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

async fn wait_for_health(client: &reqwest::Client, base: &str, timeout: Duration) -> Value {
    let start = Instant::now();
    loop {
        if let Ok(resp) = client.get(format!("{base}/relay/health")).send().await {
            if let Ok(body) = resp.json::<Value>().await {
                return body;
            }
        }
        if start.elapsed() > timeout {
            panic!("relay HTTP surface never came up at {base}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn smoke_relay_http_roundtrip() {
    let relay_port = pick_free_port();
    let p2p_port = pick_free_port();
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("clawminer");

    let child = start_clawminerd(relay_port, p2p_port, &data_dir);
    let _guard = KillOnDrop(child);

    let base = format!("http://127.0.0.1:{relay_port}");
    let client = reqwest::Client::new();

    let health = wait_for_health(&client, &base, Duration::from_secs(20)).await;
    assert_eq!(health["peer_count"].as_u64(), Some(0));
    assert_eq!(health["cache_size"].as_u64(), Some(0));

    let txid = "ab".repeat(32);
    let raw_hex = "deadbeef";

    let post_resp = client
        .post(format!("{base}/relay/tx"))
        .json(&json!({ "txid": txid, "raw_hex": raw_hex }))
        .send()
        .await
        .expect("post tx");
    assert_eq!(post_resp.status(), reqwest::StatusCode::OK);
    let post_body: Value = post_resp.json().await.unwrap();
    assert_eq!(post_body["stored"].as_bool(), Some(true));

    let get_resp = client
        .get(format!("{base}/relay/tx/{txid}?nomesh=1"))
        .send()
        .await
        .expect("get tx");
    assert_eq!(get_resp.status(), reqwest::StatusCode::OK);
    let get_body: Value = get_resp.json().await.unwrap();
    assert_eq!(get_body["raw_hex"].as_str(), Some(raw_hex));
    assert_eq!(get_body["confirmed"].as_bool(), Some(false));

    let status_resp = client
        .get(format!("{base}/relay/tx/{txid}/status"))
        .send()
        .await
        .expect("tx status");
    let status_body: Value = status_resp.json().await.unwrap();
    assert_eq!(status_body["found"].as_bool(), Some(true));

    let missing_txid = "cd".repeat(32);
    let missing_resp = client
        .get(format!("{base}/relay/tx/{missing_txid}?nomesh=1"))
        .send()
        .await
        .expect("get missing tx");
    assert_eq!(missing_resp.status(), reqwest::StatusCode::NOT_FOUND);

    let bad_resp = client
        .get(format!("{base}/relay/tx/not-hex?nomesh=1"))
        .send()
        .await
        .expect("get invalid txid");
    assert_eq!(bad_resp.status(), reqwest::StatusCode::BAD_REQUEST);
}
