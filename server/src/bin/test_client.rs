//! Scripted WebSocket client for manual server testing: registers a player,
//! runs a one-player game against the first category, and prints every
//! frame the server sends.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use shared::ServerMessage;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn send(ws: &mut WsStream, value: serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
    println!(">> {}", value);
    ws.send(Message::Text(value.to_string())).await?;
    Ok(())
}

// Wait for the next server envelope, skipping non-text frames
async fn recv(ws: &mut WsStream) -> Option<ServerMessage> {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next()).await.ok()??;
        match frame {
            Ok(Message::Text(text)) => {
                println!("<< {}", text);
                match serde_json::from_str(&text) {
                    Ok(message) => return Some(message),
                    Err(e) => println!("   (unparseable: {})", e),
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn recv_until<F>(ws: &mut WsStream, mut pred: F) -> Option<ServerMessage>
where
    F: FnMut(&ServerMessage) -> bool,
{
    loop {
        let message = recv(ws).await?;
        if pred(&message) {
            return Some(message);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:5000".to_string());
    println!("Connecting to {}", url);

    let (mut ws, _) = connect_async(url.as_str()).await?;
    let username = format!("tester{}", rand::random::<u16>());

    send(
        &mut ws,
        json!({"Type": "Register", "Username": username, "Password": "secret1"}),
    )
    .await?;
    let _ = recv_until(&mut ws, |m| {
        matches!(
            m,
            ServerMessage::LoginSuccess { .. } | ServerMessage::RegisterFailed { .. }
        )
    })
    .await;

    send(
        &mut ws,
        json!({"Type": "CreateGame", "playerCount": 1, "hostName": username}),
    )
    .await?;
    let board = recv_until(&mut ws, |m| matches!(m, ServerMessage::GameData { .. })).await;

    let category_id = match board {
        Some(ServerMessage::GameData { categories, .. }) if !categories.is_empty() => {
            categories[0].id
        }
        _ => {
            println!("No board received, giving up");
            return Ok(());
        }
    };

    send(
        &mut ws,
        json!({"Type": "SelectQuestion", "CategoryId": category_id}),
    )
    .await?;
    let question = recv_until(&mut ws, |m| matches!(m, ServerMessage::Question { .. })).await;

    if let Some(ServerMessage::Question { id, .. }) = question {
        // A deliberately wrong answer exercises the reveal path
        send(
            &mut ws,
            json!({"Type": "Answer", "QuestionId": id, "Answer": "no idea"}),
        )
        .await?;
        let _ = recv_until(&mut ws, |m| {
            matches!(m, ServerMessage::QuestionCompleted { .. })
        })
        .await;
    }

    // Drain whatever else arrives before the window closes
    while let Some(message) = recv(&mut ws).await {
        if matches!(message, ServerMessage::GameOver { .. }) {
            break;
        }
    }

    println!("Done");
    Ok(())
}
