use serde::{Deserialize, Serialize};

/// Seconds a question stays open before it times out.
pub const QUESTION_TIME_LIMIT_SECS: u64 = 60;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Envelopes sent by clients. Every frame is one JSON object whose `"Type"`
/// field selects the variant; the remaining field names are part of the wire
/// format and must not change.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "Type")]
pub enum ClientMessage {
    #[serde(rename_all = "PascalCase")]
    Login { username: String, password: String },
    #[serde(rename_all = "PascalCase")]
    Register { username: String, password: String },
    #[serde(rename_all = "camelCase")]
    CreateGame {
        player_count: u8,
        host_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_questions: Option<Vec<CustomCategory>>,
    },
    #[serde(rename_all = "camelCase")]
    JoinGame { player_name: String },
    #[serde(rename_all = "camelCase")]
    StartGame { player_count: u8 },
    #[serde(rename_all = "PascalCase")]
    SelectQuestion { category_id: u32 },
    #[serde(rename_all = "PascalCase")]
    Answer { question_id: u32, answer: String },
}

/// Envelopes sent by the server. The active question's answer text only ever
/// appears after the question is closed (`AnswerResult` on a miss,
/// `QuestionTimeout`).
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "Type")]
pub enum ServerMessage {
    #[serde(rename_all = "PascalCase")]
    LoginSuccess {
        id: String,
        username: String,
        total_games: u32,
        wins: u32,
        total_score: i32,
    },
    #[serde(rename_all = "PascalCase")]
    LoginFailed { message: String },
    #[serde(rename_all = "PascalCase")]
    RegisterFailed { message: String },
    #[serde(rename_all = "PascalCase")]
    Error { message: String },
    #[serde(rename_all = "PascalCase")]
    GameCreated { max_players: u8 },
    NoGameAvailable,
    GameFull,
    /// Broadcast both on login (no counts) and on a lobby join, where the
    /// current and maximum roster sizes ride along.
    #[serde(rename_all = "PascalCase")]
    PlayerJoined {
        player_id: String,
        player_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_count: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_players: Option<u8>,
    },
    #[serde(rename_all = "PascalCase")]
    GameStarted { players: Vec<PlayerInfo> },
    #[serde(rename_all = "PascalCase")]
    GameData {
        categories: Vec<CategoryInfo>,
        players: Vec<PlayerInfo>,
    },
    #[serde(rename_all = "PascalCase")]
    Question {
        id: u32,
        category_id: u32,
        category_name: String,
        text: String,
        price: i32,
    },
    #[serde(rename_all = "PascalCase")]
    AnswerResult {
        player_id: String,
        player_name: String,
        question_id: u32,
        is_correct: bool,
        new_score: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correct_answer: Option<String>,
        answer: String,
    },
    #[serde(rename_all = "PascalCase")]
    QuestionTimeout { correct_answer: String },
    #[serde(rename_all = "PascalCase")]
    QuestionCompleted { question_id: u32 },
    #[serde(rename_all = "PascalCase")]
    GameOver {
        winner: Option<PlayerInfo>,
        players: Vec<PlayerInfo>,
    },
    #[serde(rename_all = "PascalCase")]
    PlayerLeft {
        player_id: String,
        player_name: String,
    },
    #[serde(rename_all = "PascalCase")]
    GameEnded { reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerInfo {
    pub player_id: String,
    pub player_name: String,
    pub score: i32,
}

/// One category on the game board as shown to clients: question ids and
/// prices, never answers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CategoryInfo {
    pub id: u32,
    pub name: String,
    pub questions: Vec<QuestionSummary>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct QuestionSummary {
    pub id: u32,
    pub price: i32,
}

/// Host-supplied question pack carried in `CreateGame.customQuestions`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomCategory {
    pub name: String,
    pub questions: Vec<CustomQuestion>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomQuestion {
    pub text: String,
    pub answer: String,
    pub price: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_envelope_field_names() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"Type":"Login","Username":"alice","Password":"secret1"}"#)
                .unwrap();
        match msg {
            ClientMessage::Login { username, password } => {
                assert_eq!(username, "alice");
                assert_eq!(password, "secret1");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn create_game_uses_camel_case_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"Type":"CreateGame","playerCount":3,"hostName":"alice"}"#)
                .unwrap();
        match msg {
            ClientMessage::CreateGame {
                player_count,
                host_name,
                custom_questions,
            } => {
                assert_eq!(player_count, 3);
                assert_eq!(host_name, "alice");
                assert!(custom_questions.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn create_game_carries_custom_questions() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"Type":"CreateGame","playerCount":2,"hostName":"alice",
                "customQuestions":[{"Name":"Movies","Questions":
                [{"Text":"Who directed Alien?","Answer":"Ridley Scott","Price":100}]}]}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::CreateGame {
                custom_questions: Some(categories),
                ..
            } => {
                assert_eq!(categories.len(), 1);
                assert_eq!(categories[0].name, "Movies");
                assert_eq!(categories[0].questions[0].answer, "Ridley Scott");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn answer_envelope_field_names() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"Type":"Answer","QuestionId":7,"Answer":"Paris"}"#).unwrap();
        match msg {
            ClientMessage::Answer {
                question_id,
                answer,
            } => {
                assert_eq!(question_id, 7);
                assert_eq!(answer, "Paris");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"Type":"Teleport","X":1,"Y":2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn missing_discriminator_is_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"Username":"alice","Password":"secret1"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn question_envelope_never_contains_answer() {
        let msg = ServerMessage::Question {
            id: 3,
            category_id: 1,
            category_name: "Geography".to_string(),
            text: "What is the capital of France?".to_string(),
            price: 200,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""Type":"Question""#));
        assert!(json.contains(r#""CategoryName":"Geography""#));
        assert!(!json.to_lowercase().contains("paris"));
    }

    #[test]
    fn answer_result_omits_correct_answer_when_absent() {
        let msg = ServerMessage::AnswerResult {
            player_id: "p1".to_string(),
            player_name: "alice".to_string(),
            question_id: 7,
            is_correct: true,
            new_score: 200,
            correct_answer: None,
            answer: "Paris".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""IsCorrect":true"#));
        assert!(json.contains(r#""NewScore":200"#));
        assert!(!json.contains("CorrectAnswer"));
    }

    #[test]
    fn unit_variants_serialize_with_bare_tag() {
        let json = serde_json::to_string(&ServerMessage::GameFull).unwrap();
        assert_eq!(json, r#"{"Type":"GameFull"}"#);
        let json = serde_json::to_string(&ServerMessage::NoGameAvailable).unwrap();
        assert_eq!(json, r#"{"Type":"NoGameAvailable"}"#);
    }

    #[test]
    fn login_success_roundtrip() {
        let msg = ServerMessage::LoginSuccess {
            id: "b2c3".to_string(),
            username: "alice".to_string(),
            total_games: 4,
            wins: 2,
            total_score: 1800,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""TotalGames":4"#));
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::LoginSuccess { username, wins, .. } => {
                assert_eq!(username, "alice");
                assert_eq!(wins, 2);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn game_over_roundtrip() {
        let winner = PlayerInfo {
            player_id: "p1".to_string(),
            player_name: "alice".to_string(),
            score: 500,
        };
        let msg = ServerMessage::GameOver {
            winner: Some(winner.clone()),
            players: vec![winner],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        match back {
            ServerMessage::GameOver { winner, players } => {
                assert_eq!(winner.unwrap().score, 500);
                assert_eq!(players.len(), 1);
            }
            _ => panic!("wrong variant"),
        }
    }
}
