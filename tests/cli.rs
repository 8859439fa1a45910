//! End-to-end tests for the `mender` binary.
//!
//! The binary runs as a subprocess against a local mock chat-completions
//! server, so no API keys or network access are needed. Settings are pointed
//! at the mock through `XDG_CONFIG_HOME`, hence Linux only.

#![cfg(target_os = "linux")]

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};

const ANALYSIS_REPLY: &str = "\
greeting.txt says hello to the wrong planet.
<<<FILE_PATH>>>greeting.txt
<<<FIX_START>>>
hello world
<<<FIX_END>>>
";

const APPLY_REPLY: &str = "<updated-code>\nhello world\n</updated-code>";

// ---------------------------------------------------------------------------
// Mock chat-completions server
// ---------------------------------------------------------------------------

/// Answers merge requests (they embed the original file) with the updated
/// file and everything else with the tagged analysis.
async fn start_mock_server() -> (tokio::task::JoinHandle<()>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let body = read_request(&mut stream).await;
                let content = if body.contains("<<<ORIGINAL_FILE_START>>>") {
                    APPLY_REPLY
                } else {
                    ANALYSIS_REPLY
                };
                let api_body = serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": content}}]
                })
                .to_string();
                let resp = format!(
                    "HTTP/1.1 200 OK\r\n\
                     Content-Type: application/json\r\n\
                     Content-Length: {}\r\n\
                     Connection: close\r\n\r\n{}",
                    api_body.len(),
                    api_body
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (handle, port)
}

/// Read headers, then exactly `Content-Length` bytes of body.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf[header_end..]).into_owned()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_settings(config_home: &Path, port: u16) {
    let dir = config_home.join("mender");
    std::fs::create_dir_all(&dir).unwrap();
    let url = format!("http://127.0.0.1:{}/chat/completions", port);
    let settings = serde_json::json!({ "deepseek_url": url, "openrouter_url": url });
    std::fs::write(dir.join("config.json"), settings.to_string()).unwrap();
}

fn spawn_mender(work_dir: &Path, config_home: &Path, extra: &[&str]) -> Child {
    let mut args = vec![
        "--no-ui",
        "--no-stream",
        "--timeout",
        "10",
        "--serialize-command",
        "echo greeting.txt",
    ];
    args.extend_from_slice(extra);
    args.extend_from_slice(&["sh", "-c", "echo 'expected hello world'; exit 1"]);

    Command::new(env!("CARGO_BIN_EXE_mender"))
        .args(&args)
        .current_dir(work_dir)
        .env("XDG_CONFIG_HOME", config_home)
        .env("DEEPSEEK_API_KEY", "test-key")
        .env("OPENROUTER_API_KEY", "test-key")
        .env_remove("RUST_LOG")
        .env_remove("HTTP_PROXY")
        .env_remove("http_proxy")
        .env_remove("ALL_PROXY")
        .env_remove("all_proxy")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_auto_apply_rewrites_file_and_exits_zero() {
    let (_server, port) = start_mock_server().await;
    let work = tempfile::tempdir().unwrap();
    let config_home = tempfile::tempdir().unwrap();
    write_settings(config_home.path(), port);
    std::fs::write(work.path().join("greeting.txt"), "hello mars\n").unwrap();

    let child = spawn_mender(work.path(), config_home.path(), &["--auto-apply"]);
    let output = tokio::time::timeout(Duration::from_secs(30), child.wait_with_output())
        .await
        .expect("mender did not finish")
        .unwrap();

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        std::fs::read_to_string(work.path().join("greeting.txt")).unwrap(),
        "hello world\n"
    );
}

#[tokio::test]
async fn test_interrupt_during_confirmation_exits_promptly() {
    let (_server, port) = start_mock_server().await;
    let work = tempfile::tempdir().unwrap();
    let config_home = tempfile::tempdir().unwrap();
    write_settings(config_home.path(), port);
    std::fs::write(work.path().join("greeting.txt"), "hello mars\n").unwrap();

    let mut child = spawn_mender(work.path(), config_home.path(), &["--fix"]);
    // Held open so the prompt blocks on a read that never completes.
    let _stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let mut seen = Vec::new();
    let mut chunk = [0u8; 1024];
    tokio::time::timeout(Duration::from_secs(30), async {
        while !String::from_utf8_lossy(&seen).contains("Apply changes to greeting.txt?") {
            let n = stdout.read(&mut chunk).await.unwrap();
            assert!(n > 0, "stdout closed before the prompt appeared");
            seen.extend_from_slice(&chunk[..n]);
        }
    })
    .await
    .expect("confirmation prompt never appeared");

    let pid = child.id().unwrap().to_string();
    let killed = std::process::Command::new("kill")
        .args(["-INT", &pid])
        .status()
        .unwrap();
    assert!(killed.success());

    let status = tokio::time::timeout(Duration::from_secs(3), child.wait())
        .await
        .expect("mender kept running after the interrupt")
        .unwrap();
    assert_eq!(status.code(), Some(130));
    assert_eq!(
        std::fs::read_to_string(work.path().join("greeting.txt")).unwrap(),
        "hello mars\n"
    );
}
