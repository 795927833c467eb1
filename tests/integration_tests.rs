//! Integration tests for the trivia session server
//!
//! These tests validate the wire protocol shape and real WebSocket behavior
//! across the server and shared crates.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use shared::{ClientMessage, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use server::auth::{ArgonCredentials, AuthService};
use server::game::GameEngine;
use server::network::{self, ServerContext};
use server::questions::QuestionBank;
use server::registry::SessionRegistry;
use server::store::{seed_categories, MemoryStore};

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Client envelopes carry a fixed field casing: PascalCase for the
    /// auth/answer operations, camelCase for the lobby operations.
    #[test]
    fn client_envelope_field_casing() {
        let cases = vec![
            r#"{"Type":"Login","Username":"alice","Password":"secret1"}"#,
            r#"{"Type":"Register","Username":"alice","Password":"secret1"}"#,
            r#"{"Type":"CreateGame","playerCount":2,"hostName":"alice"}"#,
            r#"{"Type":"JoinGame","playerName":"bob"}"#,
            r#"{"Type":"StartGame","playerCount":2}"#,
            r#"{"Type":"SelectQuestion","CategoryId":1}"#,
            r#"{"Type":"Answer","QuestionId":3,"Answer":"Paris"}"#,
        ];

        for case in cases {
            let parsed: Result<ClientMessage, _> = serde_json::from_str(case);
            assert!(parsed.is_ok(), "failed to parse {}", case);
        }
    }

    /// Wrong-case field names must not silently decode.
    #[test]
    fn client_envelope_rejects_wrong_casing() {
        let cases = vec![
            r#"{"Type":"Login","username":"alice","password":"secret1"}"#,
            r#"{"Type":"CreateGame","PlayerCount":2,"HostName":"alice"}"#,
            r#"{"Type":"Answer","questionId":3,"answer":"Paris"}"#,
        ];

        for case in cases {
            let parsed: Result<ClientMessage, _> = serde_json::from_str(case);
            assert!(parsed.is_err(), "should not parse {}", case);
        }
    }

    #[test]
    fn server_envelope_field_names() {
        let message = ServerMessage::AnswerResult {
            player_id: "p1".to_string(),
            player_name: "alice".to_string(),
            question_id: 3,
            is_correct: false,
            new_score: -200,
            correct_answer: Some("Paris".to_string()),
            answer: "London".to_string(),
        };
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["Type"], "AnswerResult");
        assert_eq!(value["PlayerId"], "p1");
        assert_eq!(value["IsCorrect"], false);
        assert_eq!(value["NewScore"], -200);
        assert_eq!(value["CorrectAnswer"], "Paris");
        assert_eq!(value["Answer"], "London");
    }

    #[test]
    fn question_payload_has_no_answer_field() {
        let message = ServerMessage::Question {
            id: 1,
            category_id: 1,
            category_name: "Geography".to_string(),
            text: "What is the capital of France?".to_string(),
            price: 100,
        };
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["Type"], "Question");
        assert_eq!(value["Price"], 100);
        assert!(value.get("Answer").is_none());
        assert!(value.get("CorrectAnswer").is_none());
    }
}

/// SESSION FLOW TESTS over real sockets
mod session_flow_tests {
    use super::*;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Boots a full server on an ephemeral port and returns its ws:// URL.
    async fn start_server() -> String {
        let registry = Arc::new(SessionRegistry::new());
        let store = Arc::new(MemoryStore::new(seed_categories()));
        let bank = QuestionBank::new(seed_categories());
        let engine = GameEngine::new(registry.clone(), store.clone(), bank);
        let auth = AuthService::new(store, Arc::new(ArgonCredentials), registry.clone());
        let ctx = Arc::new(ServerContext {
            registry,
            engine,
            auth,
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(network::run(listener, ctx));
        format!("ws://{}", addr)
    }

    async fn connect(url: &str) -> Ws {
        let (ws, _) = connect_async(url).await.expect("failed to connect");
        ws
    }

    async fn send(ws: &mut Ws, value: serde_json::Value) {
        ws.send(Message::Text(value.to_string()))
            .await
            .expect("send failed");
    }

    /// Reads frames until one matches, skipping everything else.
    async fn recv_until<F>(ws: &mut Ws, mut pred: F) -> ServerMessage
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        loop {
            let frame = timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a server message")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = frame {
                let message: ServerMessage =
                    serde_json::from_str(&text).expect("valid server frame");
                if pred(&message) {
                    return message;
                }
            }
        }
    }

    /// Known answers for the seeded Geography category.
    fn seed_answer(question_text: &str) -> &'static str {
        match question_text {
            "What is the capital of France?" => "Paris",
            "On which continent is the Sahara desert?" => "Africa",
            "What is the longest river in the world?" => "Nile",
            other => panic!("unexpected seed question: {}", other),
        }
    }

    #[tokio::test]
    async fn two_player_lobby_auto_starts_and_scores() {
        let url = start_server().await;
        let mut alice = connect(&url).await;
        let mut bob = connect(&url).await;

        send(
            &mut alice,
            json!({"Type": "CreateGame", "playerCount": 2, "hostName": "alice"}),
        )
        .await;
        recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::GameCreated { max_players: 2 })
        })
        .await;

        send(&mut bob, json!({"Type": "JoinGame", "playerName": "bob"})).await;

        // The full roster auto-starts the round; both players see zeroed
        // scores and the board.
        for ws in [&mut alice, &mut bob] {
            let started =
                recv_until(ws, |m| matches!(m, ServerMessage::GameStarted { .. })).await;
            match started {
                ServerMessage::GameStarted { players } => {
                    assert_eq!(players.len(), 2);
                    assert!(players.iter().all(|p| p.score == 0));
                }
                _ => unreachable!(),
            }
            let board = recv_until(ws, |m| matches!(m, ServerMessage::GameData { .. })).await;
            match board {
                ServerMessage::GameData { categories, .. } => {
                    assert_eq!(categories.len(), 3);
                }
                _ => unreachable!(),
            }
        }

        // Alice opens Geography; the question reaches both players without
        // its answer; bob answers correctly and earns the price.
        send(
            &mut alice,
            json!({"Type": "SelectQuestion", "CategoryId": 1}),
        )
        .await;
        let question = recv_until(&mut bob, |m| {
            matches!(m, ServerMessage::Question { .. })
        })
        .await;
        let (question_id, price, answer) = match question {
            ServerMessage::Question {
                id, price, text, ..
            } => (id, price, seed_answer(&text)),
            _ => unreachable!(),
        };

        send(
            &mut bob,
            json!({"Type": "Answer", "QuestionId": question_id, "Answer": answer}),
        )
        .await;

        let result = recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::AnswerResult { .. })
        })
        .await;
        match result {
            ServerMessage::AnswerResult {
                is_correct,
                new_score,
                correct_answer,
                ..
            } => {
                assert!(is_correct);
                assert_eq!(new_score, price);
                assert!(correct_answer.is_none());
            }
            _ => unreachable!(),
        }
        recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::QuestionCompleted { .. })
        })
        .await;
    }

    #[tokio::test]
    async fn register_login_and_disconnect_notice() {
        let url = start_server().await;
        let mut alice = connect(&url).await;

        send(
            &mut alice,
            json!({"Type": "Register", "Username": "alice", "Password": "secret1"}),
        )
        .await;
        let success = recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::LoginSuccess { .. })
        })
        .await;
        match success {
            ServerMessage::LoginSuccess {
                username,
                total_games,
                ..
            } => {
                assert_eq!(username, "alice");
                assert_eq!(total_games, 0);
            }
            _ => unreachable!(),
        }

        // A second registration of the same name is rejected
        let mut impostor = connect(&url).await;
        send(
            &mut impostor,
            json!({"Type": "Register", "Username": "alice", "Password": "other-1"}),
        )
        .await;
        recv_until(&mut impostor, |m| {
            matches!(m, ServerMessage::RegisterFailed { .. })
        })
        .await;

        // A named player dropping the socket produces a PlayerLeft notice
        let mut bob = connect(&url).await;
        send(
            &mut bob,
            json!({"Type": "Register", "Username": "bobby", "Password": "secret1"}),
        )
        .await;
        recv_until(&mut bob, |m| matches!(m, ServerMessage::LoginSuccess { .. })).await;
        bob.close(None).await.unwrap();

        let left = recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::PlayerLeft { .. })
        })
        .await;
        match left {
            ServerMessage::PlayerLeft { player_name, .. } => assert_eq!(player_name, "bobby"),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn wrong_login_is_rejected_over_the_wire() {
        let url = start_server().await;
        let mut alice = connect(&url).await;

        send(
            &mut alice,
            json!({"Type": "Login", "Username": "nobody", "Password": "whatever1"}),
        )
        .await;
        recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::LoginFailed { .. })
        })
        .await;

        // The connection survives and can still join the protocol
        send(&mut alice, json!({"Type": "JoinGame", "playerName": "alice"})).await;
        recv_until(&mut alice, |m| {
            matches!(m, ServerMessage::NoGameAvailable)
        })
        .await;
    }
}
