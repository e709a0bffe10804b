//! A thin operator CLI against a running daemon's relay-mesh HTTP surface.
//! No wallet, governance, or node-management commands exist here — those
//! subsystems live outside this crate's scope.

use std::env;

use colored::Colorize;

fn usage() -> ! {
    eprintln!("{}", "clawminer-cli".bold());
    eprintln!("usage:");
    eprintln!("  clawminer-cli health [--url <base>]");
    eprintln!("  clawminer-cli tx get <txid> [--url <base>] [--nomesh]");
    eprintln!("  clawminer-cli tx status <txid> [--url <base>]");
    eprintln!("  clawminer-cli tx post <txid> <raw_hex> [--url <base>]");
    std::process::exit(2);
}

fn extract_url(args: &mut Vec<String>) -> String {
    if let Some(pos) = args.iter().position(|a| a == "--url") {
        args.remove(pos);
        if pos < args.len() {
            return args.remove(pos);
        }
    }
    "http://127.0.0.1:9090".to_string()
}

fn extract_flag(args: &mut Vec<String>, flag: &str) -> bool {
    if let Some(pos) = args.iter().position(|a| a == flag) {
        args.remove(pos);
        true
    } else {
        false
    }
}

#[tokio::main]
async fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let base_url = extract_url(&mut args);
    let client = reqwest::Client::new();

    let command = args.remove(0);
    let result = match command.as_str() {
        "health" => run_health(&client, &base_url).await,
        "tx" => {
            if args.is_empty() {
                usage();
            }
            let sub = args.remove(0);
            match sub.as_str() {
                "get" => {
                    if args.is_empty() {
                        usage();
                    }
                    let nomesh = extract_flag(&mut args, "--nomesh");
                    run_tx_get(&client, &base_url, &args[0], nomesh).await
                }
                "status" => {
                    if args.is_empty() {
                        usage();
                    }
                    run_tx_status(&client, &base_url, &args[0]).await
                }
                "post" => {
                    if args.len() < 2 {
                        usage();
                    }
                    run_tx_post(&client, &base_url, &args[0], &args[1]).await
                }
                _ => usage(),
            }
        }
        _ => usage(),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run_health(client: &reqwest::Client, base_url: &str) -> Result<(), reqwest::Error> {
    let resp = client.get(format!("{base_url}/relay/health")).send().await?;
    let body: serde_json::Value = resp.json().await?;
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    Ok(())
}

async fn run_tx_get(
    client: &reqwest::Client,
    base_url: &str,
    txid: &str,
    nomesh: bool,
) -> Result<(), reqwest::Error> {
    let suffix = if nomesh { "?nomesh=1" } else { "" };
    let resp = client
        .get(format!("{base_url}/relay/tx/{txid}{suffix}"))
        .send()
        .await?;
    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        println!("{}", "not found".yellow());
        return Ok(());
    }
    let body: serde_json::Value = resp.json().await?;
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    Ok(())
}

async fn run_tx_status(client: &reqwest::Client, base_url: &str, txid: &str) -> Result<(), reqwest::Error> {
    let resp = client
        .get(format!("{base_url}/relay/tx/{txid}/status"))
        .send()
        .await?;
    let body: serde_json::Value = resp.json().await?;
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    Ok(())
}

async fn run_tx_post(
    client: &reqwest::Client,
    base_url: &str,
    txid: &str,
    raw_hex: &str,
) -> Result<(), reqwest::Error> {
    let resp = client
        .post(format!("{base_url}/relay/tx"))
        .json(&serde_json::json!({ "txid": txid, "raw_hex": raw_hex }))
        .send()
        .await?;
    let body: serde_json::Value = resp.json().await?;
    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    Ok(())
}
