//! Authentication: the credential capability and the login/register flows.
//!
//! A failed login is a strict reject; nothing is created or rebound
//! server-side. Registration is only ever the explicit `Register` operation.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use log::{error, info};
use shared::{ServerMessage, MIN_PASSWORD_LEN, MIN_USERNAME_LEN};
use std::sync::Arc;
use thiserror::Error;

use crate::registry::{ClientHandle, SessionRegistry};
use crate::store::{AccountStore, StoreError, StoredAccount};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// Password hashing capability. Digests are self-describing strings; a
/// digest that fails to parse simply never verifies.
pub trait Credentials: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, CredentialError>;
    fn verify(&self, password: &str, digest: &str) -> bool;
}

/// Argon2id with a random salt.
pub struct ArgonCredentials;

impl Credentials for ArgonCredentials {
    fn hash(&self, password: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| CredentialError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, digest: &str) -> bool {
        match PasswordHash::new(digest) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    credentials: Arc<dyn Credentials>,
    registry: Arc<SessionRegistry>,
}

impl AuthService {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        credentials: Arc<dyn Credentials>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            accounts,
            credentials,
            registry,
        }
    }

    /// Authenticates against the account store. All replies go to the
    /// caller; a success additionally announces the player to everyone
    /// else.
    pub async fn login(&self, handle: &Arc<ClientHandle>, username: &str, password: &str) {
        let account = match self.accounts.find_by_username(username).await {
            Ok(account) => account,
            Err(e) => {
                error!("Account lookup for {} failed: {}", username, e);
                handle.send(&ServerMessage::Error {
                    message: "internal error, try again later".to_string(),
                });
                return;
            }
        };

        let verified = account
            .filter(|account| self.credentials.verify(password, &account.password_hash));
        match verified {
            Some(account) => self.bind(handle, &account),
            None => {
                info!("Failed login attempt for {}", username);
                handle.send(&ServerMessage::LoginFailed {
                    message: "Invalid username or password".to_string(),
                });
            }
        }
    }

    /// Creates an account after validating credential lengths, then behaves
    /// like a successful login.
    pub async fn register(&self, handle: &Arc<ClientHandle>, username: &str, password: &str) {
        let username = username.trim();
        if username.chars().count() < MIN_USERNAME_LEN {
            handle.send(&ServerMessage::RegisterFailed {
                message: format!("username must be at least {} characters", MIN_USERNAME_LEN),
            });
            return;
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            handle.send(&ServerMessage::RegisterFailed {
                message: format!("password must be at least {} characters", MIN_PASSWORD_LEN),
            });
            return;
        }

        let digest = match self.credentials.hash(password) {
            Ok(digest) => digest,
            Err(e) => {
                error!("Password hashing failed: {}", e);
                handle.send(&ServerMessage::Error {
                    message: "internal error, try again later".to_string(),
                });
                return;
            }
        };

        match self.accounts.create(username, &digest).await {
            Ok(account) => self.bind(handle, &account),
            Err(StoreError::DuplicateUsername) => {
                handle.send(&ServerMessage::RegisterFailed {
                    message: "username is already taken".to_string(),
                });
            }
            Err(e) => {
                error!("Account creation for {} failed: {}", username, e);
                handle.send(&ServerMessage::Error {
                    message: "internal error, try again later".to_string(),
                });
            }
        }
    }

    fn bind(&self, handle: &Arc<ClientHandle>, account: &StoredAccount) {
        handle.set_name(&account.username);
        handle.bind_account(account.id);
        info!("{} logged in", account.username);

        handle.send(&ServerMessage::LoginSuccess {
            id: account.id.to_string(),
            username: account.username.clone(),
            total_games: account.total_games,
            wins: account.wins,
            total_score: account.total_score,
        });
        self.registry.broadcast_except(
            &ServerMessage::PlayerJoined {
                player_id: handle.id().to_string(),
                player_name: account.username.clone(),
                player_count: None,
                max_players: None,
            },
            handle,
        );
    }
}
