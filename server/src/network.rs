//! WebSocket transport: accept loop, per-connection tasks, and message
//! dispatch.
//!
//! Every client gets two tasks: the reader owns the receive loop and runs
//! the dispatch, the writer drains the handle's outbound queue into the
//! socket. Game state is only ever touched from dispatch (and the question
//! timer), never from the transport layer itself.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::auth::AuthService;
use crate::game::{error_envelope, GameEngine};
use crate::registry::{ClientHandle, SessionRegistry};

/// Shared server dependencies handed to every connection task.
pub struct ServerContext {
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<GameEngine>,
    pub auth: AuthService,
}

/// Accepts connections forever, spawning one handler task per client.
pub async fn run(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_connection(stream, ctx).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: Arc<ServerContext>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut ws_sink, mut ws_source) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = ClientHandle::new(tx);
    ctx.registry.register(handle.clone());

    // Writer task: drains the outbound queue into the socket. A failed
    // write ends the task; the reader notices through the connected flag
    // or its own receive error.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    while let Some(frame) = ws_source.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&ctx, &handle, &text).await,
            Ok(Message::Close(_)) => {
                debug!("Close frame from {}", handle.id());
                break;
            }
            // Binary, ping and pong frames are not part of the protocol
            Ok(_) => {}
            Err(e) => {
                debug!("Receive error on {}: {}", handle.id(), e);
                break;
            }
        }
        if !handle.is_connected() {
            break;
        }
    }

    cleanup(&ctx, &handle);
    writer.abort();
}

/// The one deterministic teardown path for a connection: flag it, pull it
/// out of the registry and the game, and tell everyone else — but only if
/// the player ever had a name.
fn cleanup(ctx: &ServerContext, handle: &Arc<ClientHandle>) {
    handle.mark_disconnected();
    ctx.registry.remove(handle.id());
    ctx.engine.handle_disconnect(handle);

    if let Some(name) = handle.name() {
        info!("{} disconnected", name);
        ctx.registry.broadcast(&ServerMessage::PlayerLeft {
            player_id: handle.id().to_string(),
            player_name: name,
        });
    } else {
        info!("Client {} disconnected", handle.id());
    }
}

/// Decodes and routes one inbound frame. A malformed or unknown envelope is
/// logged and dropped; the connection stays up. Game rejections become
/// typed error envelopes for the caller only.
async fn dispatch(ctx: &ServerContext, handle: &Arc<ClientHandle>, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Unroutable message from {}: {}", handle.id(), e);
            return;
        }
    };

    let result = match message {
        ClientMessage::Login { username, password } => {
            ctx.auth.login(handle, &username, &password).await;
            Ok(())
        }
        ClientMessage::Register { username, password } => {
            ctx.auth.register(handle, &username, &password).await;
            Ok(())
        }
        ClientMessage::CreateGame {
            player_count,
            host_name,
            custom_questions,
        } => ctx
            .engine
            .create_game(handle, player_count, &host_name, custom_questions.as_deref()),
        ClientMessage::JoinGame { player_name } => ctx.engine.join_game(handle, &player_name),
        ClientMessage::StartGame { player_count } => ctx.engine.start_game(handle, player_count),
        ClientMessage::SelectQuestion { category_id } => {
            ctx.engine.select_question(handle, category_id)
        }
        ClientMessage::Answer {
            question_id,
            answer,
        } => ctx.engine.submit_answer(handle, question_id, &answer),
    };

    if let Err(e) = result {
        debug!("Rejected request from {}: {}", handle.id(), e);
        handle.send(&error_envelope(&e));
    }
}
