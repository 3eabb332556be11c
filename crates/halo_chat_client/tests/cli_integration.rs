//! Integration tests for the halo-chat binary.
//! Runs the binary with assert_cmd against a real temp config and an
//! in-process WebSocket server. No mocks.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write as _;
use std::net::TcpListener as StdTcpListener;

/// Pick a free port by binding to :0 and extracting the assigned port.
fn free_port() -> u16 {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Write a minimal YAML config pointing at `port`.
fn write_config(dir: &tempfile::TempDir, port: u16) -> std::path::PathBuf {
    let path = dir.path().join("config.yaml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "server:\n  endpoints:\n    - ws://127.0.0.1:{}/halo/ws/1\n  reconnect_delay_ms: 100\nrequest:\n  tenant_name: cli-test.com",
        port
    )
    .unwrap();
    path
}

/// Spawn a WebSocket server that pings, waits for one question, checks its
/// tenant, and answers with a success record.
fn spawn_test_server(port: u16) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            use futures_util::{SinkExt, StreamExt};
            use tokio_tungstenite::tungstenite::Message;

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
                .await
                .unwrap();
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut write, mut read) = ws.split();

            write
                .send(Message::Text(r#"{"type":"ping","timestamp":1700000000}"#.into()))
                .await
                .unwrap();

            let reply = match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
                    format!(
                        r#"{{"status":"success","answer":"Test answer for {}."}}"#,
                        v["tenant_name"].as_str().unwrap_or("?")
                    )
                }
                _ => return,
            };
            write.send(Message::Text(reply)).await.unwrap();

            // Small delay so the client can read before we drop.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });
    })
}

#[test]
fn ask_prints_answer() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port);

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = Command::from(cargo_bin_cmd!("halo-chat"));
    cmd.arg("--config")
        .arg(&config_path)
        .arg("ask")
        .arg("What is the answer?");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer for cli-test.com."));
}

#[test]
fn ask_reads_question_from_stdin() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port);

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = Command::from(cargo_bin_cmd!("halo-chat"));
    cmd.env("HALO_CHAT_CONFIG", &config_path)
        .arg("ask")
        .write_stdin("What is the answer?\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer"));
}

#[test]
fn url_flag_overrides_config() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    // Config points somewhere nothing listens; --url wins.
    let config_path = write_config(&dir, free_port());

    let _server = spawn_test_server(port);
    std::thread::sleep(std::time::Duration::from_millis(100));

    let mut cmd = Command::from(cargo_bin_cmd!("halo-chat"));
    cmd.arg("--config")
        .arg(&config_path)
        .arg("--url")
        .arg(format!("ws://127.0.0.1:{}/halo/ws/1", port))
        .arg("ask")
        .arg("hello");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Test answer for cli-test.com."));
}

#[test]
fn ask_server_down_shows_error() {
    let port = free_port();
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, port);

    let mut cmd = Command::from(cargo_bin_cmd!("halo-chat"));
    cmd.arg("--config")
        .arg(&config_path)
        .arg("ask")
        .arg("--timeout")
        .arg("5")
        .arg("hello");

    cmd.assert()
        .failure()
        .stderr(predicate::str::is_match("(?i)(connect|error|refused)").unwrap());
}

#[test]
fn ask_without_question_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_config(&dir, free_port());

    let mut cmd = Command::from(cargo_bin_cmd!("halo-chat"));
    cmd.arg("--config")
        .arg(&config_path)
        .arg("ask")
        .write_stdin("\n");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("no question"));
}
