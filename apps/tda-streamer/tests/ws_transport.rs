//! WebSocket Transport Integration Tests
//!
//! Runs the transport against a local WebSocket server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use tda_streamer::{Transport, TransportError, WsTransport};

const HEARTBEAT: &str = r#"{"notify":[{"heartbeat":"1700000000000"}]}"#;
const DATA: &str = r#"{"data":[{"service":"QUOTE","content":[]}]}"#;
const REQUEST: &str = r#"{"requests":[{"service":"ADMIN","command":"LOGOUT"}]}"#;

#[tokio::test]
async fn test_text_and_binary_frames_are_received_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let request = ws.next().await.unwrap().unwrap();
        ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
        ws.send(Message::Text(HEARTBEAT.into())).await.unwrap();
        ws.send(Message::Binary(DATA.as_bytes().to_vec().into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
        request.into_text().unwrap().as_str().to_owned()
    });

    let mut conn = WsTransport::new()
        .connect(&format!("ws://{addr}"))
        .await
        .unwrap();
    conn.send(REQUEST.to_string()).await.unwrap();

    assert_eq!(conn.receive().await.unwrap(), HEARTBEAT);
    assert_eq!(conn.receive().await.unwrap(), DATA);
    assert!(matches!(conn.receive().await, Err(TransportError::Closed)));

    assert_eq!(server.await.unwrap(), REQUEST);
}

#[tokio::test]
async fn test_refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = WsTransport::new().connect(&format!("ws://{addr}")).await;

    assert!(matches!(result, Err(TransportError::Connect(_))));
}
