//! GitHub environment adapter against a local one-shot HTTP responder.

use envstack_providers::{GithubConfig, GithubEnvironments};
use envstack_state::{EnvironmentHandle, ProviderError, RemoteEnvironmentProvider, SecretValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Accept one connection, capture the request head, answer with `status`.
async fn respond_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];

        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before request head");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        head
    });

    (base, handle)
}

fn client(base: &str) -> GithubEnvironments {
    GithubEnvironments::new(
        GithubConfig::new("acme")
            .with_api_base(base)
            .with_token(SecretValue::new("ghp_test")),
    )
    .unwrap()
}

#[tokio::test]
async fn ensure_environment_puts_to_environment_path() {
    let (base, server) = respond_once("200 OK", r#"{"name":"dev"}"#).await;
    let handle = client(&base)
        .ensure_environment("dev", "widgets", false)
        .await
        .unwrap();

    assert_eq!(handle.repository, "widgets");
    assert_eq!(handle.environment, "dev");

    let head = server.await.unwrap();
    assert!(head.starts_with("PUT /repos/acme/widgets/environments/dev HTTP/1.1"));
    assert!(head.to_ascii_lowercase().contains("authorization: bearer ghp_test"));
}

#[tokio::test]
async fn unauthorized_is_auth_error() {
    let (base, server) = respond_once("401 Unauthorized", r#"{"message":"Bad credentials"}"#).await;
    let err = client(&base)
        .ensure_environment("production", "widgets", true)
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Auth(m) if m.contains("Bad credentials")));
    server.await.unwrap();
}

#[tokio::test]
async fn forbidden_is_auth_error() {
    let (base, server) = respond_once("403 Forbidden", "{}").await;
    let err = client(&base)
        .ensure_environment("dev", "widgets", false)
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Auth(_)));
    server.await.unwrap();
}

#[tokio::test]
async fn delete_of_absent_environment_succeeds() {
    let (base, server) = respond_once("404 Not Found", r#"{"message":"Not Found"}"#).await;
    let handle = EnvironmentHandle {
        repository: "widgets".to_string(),
        environment: "dev".to_string(),
    };
    client(&base).delete_environment(&handle).await.unwrap();

    let head = server.await.unwrap();
    assert!(head.starts_with("DELETE /repos/acme/widgets/environments/dev HTTP/1.1"));
}
