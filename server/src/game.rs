//! Lobby and round state machine
//!
//! One `GameEngine` exists per server process and owns the single game slot:
//! `Idle -> Lobby -> Round -> Idle`. Every transition goes through the engine
//! lock; handlers and the question timer all call into the same methods.
//! State is mutated under the lock, outbound messages are collected into an
//! outbox and sent after the lock is released, so a slow client can never
//! stall a transition.
//!
//! Each question carries a generation number. The timeout task remembers the
//! generation it was armed for and re-checks it under the lock before acting,
//! so a timer that fires just after a correct answer (or after its question
//! was otherwise resolved) is a no-op.

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use shared::{CustomCategory, PlayerInfo, ServerMessage, QUESTION_TIME_LIMIT_SECS};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::questions::QuestionBank;
use crate::registry::{ClientHandle, SessionRegistry};
use crate::store::AccountStore;

#[derive(Debug, Error, PartialEq)]
pub enum GameError {
    #[error("a game is already in progress")]
    GameInProgress,
    #[error("no game is available to join")]
    NoGame,
    #[error("the game has already started")]
    GameStarted,
    #[error("the game is full")]
    GameFull,
    #[error("that player has already joined")]
    AlreadyJoined,
    #[error("not enough players to start the game")]
    NotEnoughPlayers,
    #[error("player count must be at least 1")]
    InvalidPlayerCount,
    #[error("no game is currently running")]
    NoActiveRound,
    #[error("you are not part of this game")]
    NotSeated,
    #[error("a question is already active")]
    QuestionActive,
    #[error("no unanswered question in that category")]
    QuestionNotFound,
    #[error("invalid question")]
    WrongQuestion,
    #[error("you already answered this question")]
    AlreadyAnswered,
}

/// Maps a rejection to its wire envelope. A few errors have dedicated
/// message types; the rest travel as a generic `Error`.
pub fn error_envelope(error: &GameError) -> ServerMessage {
    match error {
        GameError::GameFull => ServerMessage::GameFull,
        GameError::NoGame => ServerMessage::NoGameAvailable,
        other => ServerMessage::Error {
            message: other.to_string(),
        },
    }
}

/// Case-insensitive, whitespace-trimmed exact match. No fuzzy matching.
pub fn answers_match(submitted: &str, expected: &str) -> bool {
    submitted.trim().to_lowercase() == expected.trim().to_lowercase()
}

enum Phase {
    Idle,
    Lobby(Lobby),
    Round(Round),
}

/// Pending session collecting players before the round starts.
struct Lobby {
    host_id: Uuid,
    max_players: u8,
    roster: Vec<Arc<ClientHandle>>,
    bank: QuestionBank,
    created_at: Instant,
}

impl Lobby {
    fn new(host: Arc<ClientHandle>, max_players: u8, bank: QuestionBank) -> Self {
        Self {
            host_id: host.id(),
            max_players,
            roster: vec![host],
            bank,
            created_at: Instant::now(),
        }
    }

    /// Adds a player to the roster. The roster can never exceed
    /// `max_players`; the caller decides whether a now-full roster starts
    /// the round.
    fn try_join(&mut self, player: Arc<ClientHandle>, name: &str) -> Result<(), GameError> {
        if self.roster.iter().any(|p| p.id() == player.id())
            || self.roster.iter().any(|p| p.name().as_deref() == Some(name))
        {
            return Err(GameError::AlreadyJoined);
        }
        if self.roster.len() >= self.max_players as usize {
            return Err(GameError::GameFull);
        }
        player.bind_name_if_empty(name);
        self.roster.push(player);
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.roster.len() >= self.max_players as usize
    }
}

struct ActiveQuestion {
    question_id: u32,
    generation: u64,
    answered_by: HashSet<Uuid>,
    timer: Option<JoinHandle<()>>,
}

/// Running game: seated players, the board, and the current question.
struct Round {
    host_id: Uuid,
    players: Vec<Arc<ClientHandle>>,
    bank: QuestionBank,
    answered: HashSet<u32>,
    active: Option<ActiveQuestion>,
    generation: u64,
}

enum Dispatch {
    All(ServerMessage),
    To(Vec<Arc<ClientHandle>>, ServerMessage),
    One(Arc<ClientHandle>, ServerMessage),
}

/// Messages collected under the engine lock, sent after release.
#[derive(Default)]
struct Outbox {
    items: Vec<Dispatch>,
}

impl Outbox {
    fn all(&mut self, message: ServerMessage) {
        self.items.push(Dispatch::All(message));
    }

    fn to(&mut self, recipients: Vec<Arc<ClientHandle>>, message: ServerMessage) {
        self.items.push(Dispatch::To(recipients, message));
    }

    fn one(&mut self, recipient: &Arc<ClientHandle>, message: ServerMessage) {
        self.items.push(Dispatch::One(recipient.clone(), message));
    }
}

struct StatUpdate {
    username: String,
    score: i32,
    won: bool,
}

pub struct GameEngine {
    registry: Arc<SessionRegistry>,
    accounts: Arc<dyn AccountStore>,
    default_bank: QuestionBank,
    question_time: Duration,
    phase: Mutex<Phase>,
    this: Weak<GameEngine>,
}

impl GameEngine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        accounts: Arc<dyn AccountStore>,
        default_bank: QuestionBank,
    ) -> Arc<Self> {
        Self::with_question_time(
            registry,
            accounts,
            default_bank,
            Duration::from_secs(QUESTION_TIME_LIMIT_SECS),
        )
    }

    pub fn with_question_time(
        registry: Arc<SessionRegistry>,
        accounts: Arc<dyn AccountStore>,
        default_bank: QuestionBank,
        question_time: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            accounts,
            default_bank,
            question_time,
            phase: Mutex::new(Phase::Idle),
            this: this.clone(),
        })
    }

    fn lock_phase(&self) -> std::sync::MutexGuard<'_, Phase> {
        self.phase.lock().expect("game state lock poisoned")
    }

    fn flush(&self, outbox: Outbox) {
        for item in outbox.items {
            match item {
                Dispatch::All(message) => self.registry.broadcast(&message),
                Dispatch::To(recipients, message) => {
                    SessionRegistry::send_to(&recipients, &message)
                }
                Dispatch::One(recipient, message) => recipient.send(&message),
            }
        }
    }

    /// Creates the single pending session with the caller as host. A
    /// one-player game starts immediately. A malformed custom pack falls
    /// back to the store bank.
    pub fn create_game(
        &self,
        caller: &Arc<ClientHandle>,
        max_players: u8,
        host_name: &str,
        custom: Option<&[CustomCategory]>,
    ) -> Result<(), GameError> {
        if max_players == 0 {
            return Err(GameError::InvalidPlayerCount);
        }

        let bank = match custom {
            Some(pack) => match QuestionBank::from_custom(pack) {
                Some(bank) => bank,
                None => {
                    warn!("Rejecting malformed custom question pack, using store questions");
                    self.default_bank.clone()
                }
            },
            None => self.default_bank.clone(),
        };

        let mut outbox = Outbox::default();
        {
            let mut phase = self.lock_phase();
            if !matches!(*phase, Phase::Idle) {
                return Err(GameError::GameInProgress);
            }

            caller.bind_name_if_empty(host_name);
            info!(
                "Game created by {} for {} player(s)",
                caller.name().unwrap_or_default(),
                max_players
            );

            outbox.one(caller, ServerMessage::GameCreated { max_players });
            outbox.all(ServerMessage::PlayerJoined {
                player_id: caller.id().to_string(),
                player_name: caller.name().unwrap_or_default(),
                player_count: Some(1),
                max_players: Some(max_players),
            });

            let lobby = Lobby::new(caller.clone(), max_players, bank);
            if lobby.is_full() {
                *phase = self.start_round(lobby, &mut outbox);
            } else {
                *phase = Phase::Lobby(lobby);
            }
        }
        self.flush(outbox);
        Ok(())
    }

    /// Adds the caller to the pending session; a join that fills the roster
    /// starts the round.
    pub fn join_game(&self, caller: &Arc<ClientHandle>, player_name: &str) -> Result<(), GameError> {
        let mut outbox = Outbox::default();
        {
            let mut phase = self.lock_phase();
            let lobby = match &mut *phase {
                Phase::Idle => return Err(GameError::NoGame),
                Phase::Round(_) => return Err(GameError::GameStarted),
                Phase::Lobby(lobby) => lobby,
            };

            lobby.try_join(caller.clone(), player_name)?;
            let player_count = lobby.roster.len() as u8;
            let max_players = lobby.max_players;
            info!(
                "{} joined the lobby ({}/{})",
                player_name, player_count, max_players
            );

            outbox.all(ServerMessage::PlayerJoined {
                player_id: caller.id().to_string(),
                player_name: caller.name().unwrap_or_else(|| player_name.to_string()),
                player_count: Some(player_count),
                max_players: Some(max_players),
            });

            if lobby.is_full() {
                if let Phase::Lobby(lobby) = std::mem::replace(&mut *phase, Phase::Idle) {
                    *phase = self.start_round(lobby, &mut outbox);
                }
            }
        }
        self.flush(outbox);
        Ok(())
    }

    /// Starts the pending lobby early, or — with no lobby — seats every
    /// connected client with a bound name (the legacy direct-start flow).
    pub fn start_game(&self, caller: &Arc<ClientHandle>, player_count: u8) -> Result<(), GameError> {
        // Snapshot before taking the engine lock; the two lock domains are
        // never nested.
        let candidates: Vec<Arc<ClientHandle>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|c| c.is_connected() && c.name().is_some())
            .collect();

        let mut outbox = Outbox::default();
        {
            let mut phase = self.lock_phase();
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::Lobby(lobby) => {
                    if !lobby.roster.iter().any(|p| p.id() == caller.id()) {
                        *phase = Phase::Lobby(lobby);
                        return Err(GameError::NotSeated);
                    }
                    info!("Lobby started early with {} player(s)", lobby.roster.len());
                    *phase = self.start_round(lobby, &mut outbox);
                }
                Phase::Round(round) => {
                    *phase = Phase::Round(round);
                    return Err(GameError::GameInProgress);
                }
                Phase::Idle => {
                    if player_count == 0 {
                        return Err(GameError::InvalidPlayerCount);
                    }
                    if candidates.len() < player_count as usize {
                        return Err(GameError::NotEnoughPlayers);
                    }
                    info!("Direct start with {} connected player(s)", candidates.len());
                    let lobby = Lobby {
                        host_id: caller.id(),
                        max_players: player_count,
                        roster: candidates,
                        bank: self.default_bank.clone(),
                        created_at: Instant::now(),
                    };
                    *phase = self.start_round(lobby, &mut outbox);
                }
            }
        }
        self.flush(outbox);
        Ok(())
    }

    /// Activates a random unanswered question in the category and arms the
    /// question timer.
    pub fn select_question(
        &self,
        caller: &Arc<ClientHandle>,
        category_id: u32,
    ) -> Result<(), GameError> {
        let mut outbox = Outbox::default();
        {
            let mut phase = self.lock_phase();
            let round = match &mut *phase {
                Phase::Round(round) => round,
                _ => return Err(GameError::NoActiveRound),
            };
            if !round.players.iter().any(|p| p.id() == caller.id()) {
                return Err(GameError::NotSeated);
            }
            if round.active.is_some() {
                return Err(GameError::QuestionActive);
            }

            let (question, category_name) = {
                let category = round
                    .bank
                    .category(category_id)
                    .ok_or(GameError::QuestionNotFound)?;
                let candidates: Vec<_> = category
                    .questions
                    .iter()
                    .filter(|q| !round.answered.contains(&q.id))
                    .collect();
                let question = candidates
                    .choose(&mut rand::thread_rng())
                    .ok_or(GameError::QuestionNotFound)?;
                ((*question).clone(), category.name.clone())
            };

            round.generation += 1;
            let generation = round.generation;
            info!(
                "Question {} ({}, {} points) is now active",
                question.id, category_name, question.price
            );
            round.active = Some(ActiveQuestion {
                question_id: question.id,
                generation,
                answered_by: HashSet::new(),
                timer: self.spawn_timer(generation),
            });

            outbox.to(
                round.players.clone(),
                ServerMessage::Question {
                    id: question.id,
                    category_id: question.category_id,
                    category_name,
                    text: question.text,
                    price: question.price,
                },
            );
        }
        self.flush(outbox);
        Ok(())
    }

    /// Arbitrates one answer. First correct answer resolves the question for
    /// everyone; once every connected seated player has missed, the question
    /// resolves without waiting for the timer.
    pub fn submit_answer(
        &self,
        caller: &Arc<ClientHandle>,
        question_id: u32,
        answer_text: &str,
    ) -> Result<(), GameError> {
        let mut outbox = Outbox::default();
        let mut stats = Vec::new();
        {
            let mut phase = self.lock_phase();
            {
                let round = match &mut *phase {
                    Phase::Round(round) => round,
                    _ => return Err(GameError::WrongQuestion),
                };
                if !round.players.iter().any(|p| p.id() == caller.id()) {
                    return Err(GameError::NotSeated);
                }
                let question = match round.bank.question(question_id) {
                    Some(question) => question.clone(),
                    None => return Err(GameError::WrongQuestion),
                };
                let active = match round.active.as_mut() {
                    Some(active) if active.question_id == question_id => active,
                    _ => return Err(GameError::WrongQuestion),
                };
                if !active.answered_by.insert(caller.id()) {
                    return Err(GameError::AlreadyAnswered);
                }

                let is_correct = answers_match(answer_text, &question.answer);
                info!(
                    "{} answered question {}: {}",
                    caller.name().unwrap_or_default(),
                    question_id,
                    if is_correct { "correct" } else { "wrong" }
                );

                if is_correct {
                    let new_score = caller.add_score(question.price);
                    outbox.all(ServerMessage::AnswerResult {
                        player_id: caller.id().to_string(),
                        player_name: caller.name().unwrap_or_default(),
                        question_id,
                        is_correct: true,
                        new_score,
                        correct_answer: None,
                        answer: answer_text.to_string(),
                    });
                    Self::resolve_active(round, &mut outbox);
                } else {
                    let new_score = caller.add_score(-question.price);
                    outbox.all(ServerMessage::AnswerResult {
                        player_id: caller.id().to_string(),
                        player_name: caller.name().unwrap_or_default(),
                        question_id,
                        is_correct: false,
                        new_score,
                        correct_answer: Some(question.answer.clone()),
                        answer: answer_text.to_string(),
                    });

                    let everyone_missed = round
                        .players
                        .iter()
                        .filter(|p| p.is_connected())
                        .all(|p| match &round.active {
                            Some(active) => active.answered_by.contains(&p.id()),
                            None => false,
                        });
                    if everyone_missed {
                        debug!("All seated players missed question {}", question_id);
                        Self::resolve_active(round, &mut outbox);
                    }
                }
            }
            self.finish_if_exhausted(&mut phase, &mut outbox, &mut stats);
        }
        self.flush(outbox);
        self.persist_stats(stats);
        Ok(())
    }

    /// Question timer callback. The generation check makes a stale timer
    /// from an already-resolved question a no-op.
    fn on_question_timeout(&self, generation: u64) {
        let mut outbox = Outbox::default();
        let mut stats = Vec::new();
        {
            let mut phase = self.lock_phase();
            {
                let round = match &mut *phase {
                    Phase::Round(round) => round,
                    _ => return,
                };
                let question_id = match &round.active {
                    Some(active) if active.generation == generation => active.question_id,
                    _ => {
                        debug!("Stale question timer (generation {}) ignored", generation);
                        return;
                    }
                };

                info!("Question {} timed out", question_id);
                let correct_answer = round
                    .bank
                    .question(question_id)
                    .map(|q| q.answer.clone())
                    .unwrap_or_default();
                outbox.all(ServerMessage::QuestionTimeout { correct_answer });
                Self::resolve_active(round, &mut outbox);
            }
            self.finish_if_exhausted(&mut phase, &mut outbox, &mut stats);
        }
        self.flush(outbox);
        self.persist_stats(stats);
    }

    /// Single cleanup entry point for a dropped connection. Removes the
    /// player from the lobby or round; a departing host (or the last
    /// player) tears the session down.
    pub fn handle_disconnect(&self, caller: &Arc<ClientHandle>) {
        let mut outbox = Outbox::default();
        let mut stats = Vec::new();
        {
            let mut phase = self.lock_phase();
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::Idle => {}
                Phase::Lobby(mut lobby) => {
                    let was_member = lobby.roster.iter().any(|p| p.id() == caller.id());
                    lobby.roster.retain(|p| p.id() != caller.id());

                    if was_member && (caller.id() == lobby.host_id || lobby.roster.is_empty()) {
                        info!("Pending game torn down after a player left");
                        outbox.to(
                            lobby.roster.clone(),
                            ServerMessage::GameEnded {
                                reason: "Host disconnected".to_string(),
                            },
                        );
                    } else {
                        *phase = Phase::Lobby(lobby);
                    }
                }
                Phase::Round(mut round) => {
                    let was_member = round.players.iter().any(|p| p.id() == caller.id());
                    round.players.retain(|p| p.id() != caller.id());
                    let none_left = round.players.iter().all(|p| !p.is_connected());

                    if was_member && (caller.id() == round.host_id || none_left) {
                        info!("Active game torn down after a player left");
                        Self::disarm(&mut round);
                        outbox.to(
                            round.players.clone(),
                            ServerMessage::GameEnded {
                                reason: "Host disconnected".to_string(),
                            },
                        );
                    } else {
                        if was_member {
                            // The departed player may have been the last one
                            // holding the all-missed quorum open.
                            let everyone_missed = match &round.active {
                                Some(active) => round
                                    .players
                                    .iter()
                                    .filter(|p| p.is_connected())
                                    .all(|p| active.answered_by.contains(&p.id())),
                                None => false,
                            };
                            if everyone_missed {
                                Self::resolve_active(&mut round, &mut outbox);
                            }
                        }
                        *phase = Phase::Round(round);
                        self.finish_if_exhausted(&mut phase, &mut outbox, &mut stats);
                    }
                }
            }
        }
        self.flush(outbox);
        self.persist_stats(stats);
    }

    /// Resets scores, announces the start, and hands out the board. An empty
    /// question pool ends the round on the spot with no winner.
    fn start_round(&self, lobby: Lobby, outbox: &mut Outbox) -> Phase {
        for player in &lobby.roster {
            player.set_score(0);
        }
        let infos: Vec<PlayerInfo> = lobby.roster.iter().map(|p| p.info()).collect();
        info!(
            "Round started with {} player(s), {} question(s), lobby open {:?}",
            lobby.roster.len(),
            lobby.bank.question_count(),
            lobby.created_at.elapsed()
        );

        outbox.to(
            lobby.roster.clone(),
            ServerMessage::GameStarted {
                players: infos.clone(),
            },
        );
        outbox.to(
            lobby.roster.clone(),
            ServerMessage::GameData {
                categories: lobby.bank.board(),
                players: infos.clone(),
            },
        );

        if lobby.bank.is_empty() {
            warn!("Round started with an empty question pool, ending immediately");
            outbox.to(
                lobby.roster.clone(),
                ServerMessage::GameOver {
                    winner: None,
                    players: infos,
                },
            );
            return Phase::Idle;
        }

        Phase::Round(Round {
            host_id: lobby.host_id,
            players: lobby.roster,
            bank: lobby.bank,
            answered: HashSet::new(),
            active: None,
            generation: 0,
        })
    }

    /// Ends the active question: disarms the timer, marks the question
    /// answered, and announces completion. Idempotent; a second resolution
    /// path finds no active question.
    fn resolve_active(round: &mut Round, outbox: &mut Outbox) {
        if let Some(active) = round.active.take() {
            if let Some(timer) = active.timer {
                timer.abort();
            }
            round.answered.insert(active.question_id);
            outbox.all(ServerMessage::QuestionCompleted {
                question_id: active.question_id,
            });
        }
    }

    fn disarm(round: &mut Round) {
        if let Some(active) = round.active.take() {
            if let Some(timer) = active.timer {
                timer.abort();
            }
        }
    }

    /// When every question has been answered, ranks the connected players,
    /// announces the result, and returns the engine to idle.
    fn finish_if_exhausted(
        &self,
        phase: &mut Phase,
        outbox: &mut Outbox,
        stats: &mut Vec<StatUpdate>,
    ) {
        let exhausted = matches!(
            &*phase,
            Phase::Round(round)
                if round.active.is_none() && round.answered.len() >= round.bank.question_count()
        );
        if !exhausted {
            return;
        }
        if let Phase::Round(round) = std::mem::replace(phase, Phase::Idle) {
            let mut standings: Vec<Arc<ClientHandle>> = round
                .players
                .iter()
                .filter(|p| p.is_connected())
                .cloned()
                .collect();
            // Stable sort: equal scores keep their seating order
            standings.sort_by(|a, b| b.score().cmp(&a.score()));

            let winner = standings.first().cloned();
            let infos: Vec<PlayerInfo> = standings.iter().map(|p| p.info()).collect();
            info!(
                "Game over, winner: {}",
                winner
                    .as_ref()
                    .and_then(|w| w.name())
                    .unwrap_or_else(|| "nobody".to_string())
            );

            outbox.to(
                standings.clone(),
                ServerMessage::GameOver {
                    winner: winner.as_ref().map(|w| w.info()),
                    players: infos,
                },
            );

            let winner_id = winner.map(|w| w.id());
            for player in &standings {
                if player.account_id().is_none() {
                    continue;
                }
                if let Some(username) = player.name() {
                    stats.push(StatUpdate {
                        username,
                        score: player.score(),
                        won: Some(player.id()) == winner_id,
                    });
                }
            }
        }
    }

    fn spawn_timer(&self, generation: u64) -> Option<JoinHandle<()>> {
        let engine = self.this.upgrade()?;
        let delay = self.question_time;
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.on_question_timeout(generation);
        }))
    }

    /// Applies end-of-round stat deltas through the account store. Failures
    /// are logged and never affect the game loop.
    fn persist_stats(&self, updates: Vec<StatUpdate>) {
        if updates.is_empty() {
            return;
        }
        let accounts = Arc::clone(&self.accounts);
        tokio::spawn(async move {
            for update in updates {
                match accounts.find_by_username(&update.username).await {
                    Ok(Some(mut account)) => {
                        account.total_games += 1;
                        if update.won {
                            account.wins += 1;
                        }
                        account.total_score += update.score.max(0);
                        if let Err(e) = accounts.save(&account).await {
                            log::error!("Failed to persist stats for {}: {}", update.username, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => log::error!("Failed to load account {}: {}", update.username, e),
                }
            }
        });
    }
}
