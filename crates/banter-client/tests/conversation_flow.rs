//! Conversation facade scenarios against a local streaming endpoint.

use banter_client::{ChatClient, Conversation};
use banter_core::{RenderBody, TurnEngine};
use banter_types::Sender;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal chat endpoint: answers every POST with stream headers and one
/// response frame, then holds the connection open without ever sending
/// `complete`, like a server mid-generation.
async fn spawn_hanging_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = sock.read(&mut buf).await;
                let body = "data: {\"type\":\"response\",\"text\":\"partial\"}\n";
                // Advertised length exceeds what is written, so the client
                // keeps the stream open until the socket drops.
                let head = format!(
                    "HTTP/1.1 200 OK\r\n\
                     x-banter-session: T1\r\n\
                     content-type: text/event-stream\r\n\
                     content-length: 4096\r\n\r\n{body}"
                );
                let _ = sock.write_all(head.as_bytes()).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn overlapping_sends_leave_one_turn_active() {
    let base = spawn_hanging_server().await;
    let conversation = Arc::new(Conversation::new(
        ChatClient::new(base).unwrap(),
        TurnEngine::new(),
    ));

    // Two sends racing for the turn slot. They must serialize: the loser of
    // the race aborts the winner's pump before spawning its own, and no pump
    // is ever left running outside the slot.
    let first = Arc::clone(&conversation);
    let second = Arc::clone(&conversation);
    let (a, b) = tokio::join!(
        first.send("turn a".to_string(), Vec::new()),
        second.send("turn b".to_string(), Vec::new())
    );
    a.unwrap();
    b.unwrap();

    // Exactly one turn is in flight now; cancel winds it down. If the losing
    // pump had been orphaned it would still hold the engine open past this.
    conversation.cancel().await;

    let model = conversation.snapshot();
    let user_turns = model
        .messages
        .iter()
        .filter(|m| m.sender == Sender::User)
        .count();
    assert_eq!(user_turns, 2);
    assert!(!model
        .messages
        .iter()
        .any(|m| matches!(m.body, RenderBody::Error { .. })));
    assert!(model.messages.iter().all(|m| !m.is_streaming));
    assert!(model.connectivity);
    assert_eq!(conversation.session().get(), Some("T1".to_string()));
}
