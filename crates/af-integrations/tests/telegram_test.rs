//! Bot API responses mapped onto alert errors, against a local HTTP stub.

use std::time::Duration;

use af_core::notification::{AlertChannel, AlertError, Notification, NotificationKind};
use af_core::types::Priority;
use af_integrations::{TelegramChannel, DEFAULT_RETRY_AFTER};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serve one canned response and hand back the raw request it answered.
async fn serve_once(
    status: &str,
    headers: &[(&str, &str)],
    body: &str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let mut response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        response.push_str(&format!("{name}: {value}\r\n"));
    }
    response.push_str("\r\n");
    response.push_str(body);

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    });
    (base_url, handle)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(split) = text.find("\r\n\r\n") {
            let content_length = text[..split]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= split + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn note() -> Notification {
    Notification::new(
        NotificationKind::FeatureCompleted,
        Priority::Medium,
        "Feature Completed",
        "login page",
    )
}

#[tokio::test]
async fn delivered_message_posts_markdown_to_chat() {
    let (base, server) = serve_once("200 OK", &[], r#"{"ok":true,"result":{}}"#).await;
    let channel = TelegramChannel::new("tok", "42").unwrap().with_base_url(base);

    channel.deliver(&note()).await.unwrap();

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /bottok/sendMessage "));
    assert!(request.contains(r#""chat_id":"42""#));
    assert!(request.contains(r#""parse_mode":"MarkdownV2""#));
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let (base, server) = serve_once(
        "429 Too Many Requests",
        &[("retry-after", "3")],
        r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3"}"#,
    )
    .await;
    let channel = TelegramChannel::new("tok", "42").unwrap().with_base_url(base);

    match channel.deliver(&note()).await {
        Err(AlertError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Duration::from_secs(3))
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn too_many_requests_without_hint_uses_default_wait() {
    let (base, server) = serve_once("429 Too Many Requests", &[], r#"{"ok":false}"#).await;
    let channel = TelegramChannel::new("tok", "42").unwrap().with_base_url(base);

    match channel.deliver(&note()).await {
        Err(AlertError::RateLimited { retry_after }) => assert_eq!(retry_after, DEFAULT_RETRY_AFTER),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn bad_request_is_rejected_with_description() {
    let (base, server) = serve_once(
        "400 Bad Request",
        &[],
        r#"{"ok":false,"error_code":400,"description":"Bad Request: can't parse entities"}"#,
    )
    .await;
    let channel = TelegramChannel::new("tok", "42").unwrap().with_base_url(base);

    match channel.deliver(&note()).await {
        Err(AlertError::Rejected(reason)) => {
            assert_eq!(reason, "Bad Request: can't parse entities")
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn ok_false_on_success_status_is_rejected() {
    let (base, server) =
        serve_once("200 OK", &[], r#"{"ok":false,"description":"chat not found"}"#).await;
    let channel = TelegramChannel::new("tok", "42").unwrap().with_base_url(base);

    assert!(matches!(
        channel.deliver(&note()).await,
        Err(AlertError::Rejected(reason)) if reason == "chat not found"
    ));
    server.await.unwrap();
}
