//! Datastore boundary: account and question persistence live behind traits
//! so the engine never sees a concrete backend. The bundled `MemoryStore`
//! keeps everything in process and ships with the reference question set.

use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::questions::{Category, Question};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    #[error("username is already taken")]
    DuplicateUsername,
    #[error("no such account")]
    NotFound,
}

/// Persisted account row, as opposed to the ephemeral per-connection player.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAccount {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub total_games: u32,
    pub wins: u32,
    pub total_score: i32,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<StoredAccount>, StoreError>;
    async fn create(&self, username: &str, password_hash: &str)
        -> Result<StoredAccount, StoreError>;
    async fn save(&self, account: &StoredAccount) -> Result<(), StoreError>;
}

#[async_trait]
pub trait QuestionStore: Send + Sync {
    async fn load_categories(&self) -> Result<Vec<Category>, StoreError>;
}

/// Retries a store connection a bounded number of times before giving up.
/// An unreachable datastore at startup is fatal to the process once the
/// budget is spent.
pub async fn connect_with_retry<S, F, Fut>(
    attempts: u32,
    delay: Duration,
    connect: F,
) -> Result<S, StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<S, StoreError>>,
{
    let mut last_error = StoreError::Unavailable("no attempts made".to_string());

    for attempt in 1..=attempts {
        match connect().await {
            Ok(store) => {
                info!("Datastore ready after {} attempt(s)", attempt);
                return Ok(store);
            }
            Err(e) => {
                warn!("Datastore attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_error)
}

/// In-process store used by the binary and the test suites.
pub struct MemoryStore {
    accounts: Mutex<HashMap<String, StoredAccount>>,
    categories: Vec<Category>,
}

impl MemoryStore {
    pub fn new(categories: Vec<Category>) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            categories,
        }
    }

    /// Opens the store for the given connection string. Only `memory:`
    /// URLs are recognized; anything else is reported unreachable so the
    /// startup retry loop treats it like a dead database.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        if url.starts_with("memory:") {
            Ok(Self::new(seed_categories()))
        } else {
            Err(StoreError::Unavailable(format!(
                "unsupported connection string: {}",
                url
            )))
        }
    }

    fn lock_accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredAccount>> {
        self.accounts.lock().expect("account table lock poisoned")
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<StoredAccount>, StoreError> {
        Ok(self.lock_accounts().get(username).cloned())
    }

    async fn create(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<StoredAccount, StoreError> {
        let mut accounts = self.lock_accounts();
        if accounts.contains_key(username) {
            return Err(StoreError::DuplicateUsername);
        }

        let account = StoredAccount {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            total_games: 0,
            wins: 0,
            total_score: 0,
        };
        accounts.insert(username.to_string(), account.clone());
        Ok(account)
    }

    async fn save(&self, account: &StoredAccount) -> Result<(), StoreError> {
        let mut accounts = self.lock_accounts();
        match accounts.get_mut(&account.username) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl QuestionStore for MemoryStore {
    async fn load_categories(&self) -> Result<Vec<Category>, StoreError> {
        Ok(self.categories.clone())
    }
}

/// Reference question set, mirroring what the production database is seeded
/// with on first run.
pub fn seed_categories() -> Vec<Category> {
    let mut next_id = 1u32;
    let mut question = |category_id: u32, text: &str, answer: &str, price: i32| {
        let q = Question {
            id: next_id,
            category_id,
            text: text.to_string(),
            answer: answer.to_string(),
            price,
        };
        next_id += 1;
        q
    };

    vec![
        Category {
            id: 1,
            name: "Geography".to_string(),
            questions: vec![
                question(1, "What is the capital of France?", "Paris", 100),
                question(1, "On which continent is the Sahara desert?", "Africa", 200),
                question(1, "What is the longest river in the world?", "Nile", 300),
            ],
        },
        Category {
            id: 2,
            name: "Science".to_string(),
            questions: vec![
                question(2, "What is the chemical symbol for gold?", "Au", 100),
                question(2, "How many planets are in the Solar System?", "8", 200),
                question(2, "What particle carries a negative charge?", "Electron", 300),
            ],
        },
        Category {
            id: 3,
            name: "History".to_string(),
            questions: vec![
                question(3, "In what year did World War II end?", "1945", 100),
                question(3, "Who was the first person in space?", "Yuri Gagarin", 200),
                question(3, "Which empire built the Colosseum?", "Roman", 300),
            ],
        },
    ]
}
