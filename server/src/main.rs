use clap::Parser;
use log::info;
use server::auth::{ArgonCredentials, AuthService};
use server::game::GameEngine;
use server::network::{self, ServerContext};
use server::questions::QuestionBank;
use server::registry::SessionRegistry;
use server::store::{self, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Main-method of the application.
/// Reads configuration, waits for the datastore, then runs the accept loop
/// until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Command line arguments; the environment wins where both are set
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on (SERVER_PORT overrides)
        #[clap(short, long, default_value = "5000")]
        port: u16,
        /// Datastore connection string (DATABASE_URL overrides)
        #[clap(short, long, default_value = "memory://trivia")]
        database_url: String,
    }

    let args = Args::parse();
    let port = std::env::var("SERVER_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(args.port);
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| args.database_url.clone());

    // Bounded retry: a datastore that never comes up is fatal
    let store = store::connect_with_retry(10, Duration::from_secs(2), || {
        let url = database_url.clone();
        async move { MemoryStore::open(&url) }
    })
    .await?;
    let store = Arc::new(store);

    let bank = QuestionBank::load(store.as_ref()).await?;

    let registry = Arc::new(SessionRegistry::new());
    let engine = GameEngine::new(registry.clone(), store.clone(), bank);
    let auth = AuthService::new(store, Arc::new(ArgonCredentials), registry.clone());
    let ctx = Arc::new(ServerContext {
        registry,
        engine,
        auth,
    });

    let address = format!("{}:{}", args.host, port);
    let listener = TcpListener::bind(&address).await?;
    info!("Server listening on {}", address);

    tokio::select! {
        _ = network::run(listener, ctx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
