//! Fables session CLI
//!
//! Holds the Fables API session (access and refresh token) between runs and
//! keeps it fresh before protected calls.

mod api;
mod auth;
mod config;
mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::SessionClient;
use auth::{fresh_token, HttpRefreshTransport, Navigation, SessionGuard, TokenStore};
use config::Config;
use storage::{FileStore, KeyValueStore, MemoryStore};

#[derive(Parser)]
#[command(name = "fables-session")]
#[command(about = "Session token manager for the Fables campaign API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the API base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Keep the session in memory only, ignoring the session file
    #[arg(long, global = true)]
    memory_only: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the token pair returned by the login endpoint
    SetTokens {
        /// Access token (JWT)
        #[arg(long)]
        access_token: String,

        /// Refresh token
        #[arg(long)]
        refresh_token: String,
    },

    /// Show current session status
    Status,

    /// Print the decoded access token claims
    Claims,

    /// Run the protected-route check, refreshing the session if needed
    Ensure,

    /// Log out and clear stored tokens
    Logout,

    /// GET a protected API path
    Get {
        /// Path under the base URL, e.g. /campaigns
        path: String,
    },

    /// POST a JSON body to a protected API path
    Post {
        /// Path under the base URL
        path: String,

        /// JSON request body
        body: String,
    },

    /// Show the effective configuration
    Config {
        /// Write the config file with every setting filled in (overrides are not saved)
        #[arg(long)]
        save: bool,
    },
}

/// Open the persisted session file, or `None` when this environment has
/// nowhere to keep one.
fn open_storage(config: &Config, memory_only: bool) -> Option<Arc<dyn KeyValueStore>> {
    if memory_only || !config.persist {
        tracing::debug!("Session storage is in-process for this run");
        return Some(Arc::new(MemoryStore::new()));
    }

    let Some(path) = Config::session_path() else {
        tracing::debug!("No data directory available, session is memory-only");
        return None;
    };

    match FileStore::open(&path) {
        Ok(store) => {
            tracing::debug!("Session file: {}", store.path().display());
            Some(Arc::new(store) as Arc<dyn KeyValueStore>)
        }
        Err(e) => {
            tracing::warn!("Session file unusable, continuing in memory: {}", e);
            None
        }
    }
}

fn format_exp(exp: i64) -> String {
    match Utc.timestamp_opt(exp, 0).single() {
        Some(at) => at.to_rfc3339(),
        None => exp.to_string(),
    }
}

fn print_status(store: &TokenStore) {
    match store.claims() {
        Some(claims) if !store.is_expired() => {
            println!("Access token:  valid");
            if let Some(sub) = claims.get("sub").and_then(|v| v.as_str()) {
                println!("  subject:    {}", sub);
            }
            if let Some(exp) = claims.exp() {
                println!("  expires_at: {}", format_exp(exp));
            }
        }
        Some(claims) => {
            println!("Access token:  expired");
            match claims.exp() {
                Some(exp) => println!("  expired_at: {}", format_exp(exp)),
                None => println!("  no exp claim"),
            }
        }
        None => println!("Access token:  none"),
    }

    match store.pair().refresh_token {
        Some(_) => println!("Refresh token: present"),
        None => println!("Refresh token: none"),
    }

    if !store.is_authenticated() {
        println!("\nRun 'fables-session set-tokens' after logging in.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let file_config = Config::load_file()?;
    let config = file_config.clone().with_overrides(cli.base_url)?;

    let store = Arc::new(TokenStore::new(open_storage(&config, cli.memory_only)));
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let transport = Arc::new(
        HttpRefreshTransport::new(&config.base_url, config.request_timeout())
            .context("Failed to build refresh client")?,
    );
    let guard = SessionGuard::new(store.clone(), transport);

    match cli.command {
        Commands::SetTokens {
            access_token,
            refresh_token,
        } => {
            match store.sign_in(&access_token, &refresh_token) {
                Ok(()) => println!("Session stored."),
                Err(e) => println!(
                    "Refresh token stored; access token rejected ({}). It will be refreshed on next use.",
                    e
                ),
            }
        }
        Commands::Status => print_status(&store),
        Commands::Claims => {
            let claims = store
                .claims()
                .context("No access token. Run 'fables-session set-tokens' first.")?;
            println!("{}", serde_json::to_string_pretty(&claims.as_json())?);
        }
        Commands::Ensure => match fresh_token(&guard, &config.route_policy()).await {
            Navigation::Proceed => println!("Session valid."),
            Navigation::Redirect(to) => println!("Not signed in, redirect to {}", to),
        },
        Commands::Logout => {
            tracing::info!("Logging out...");
            guard.logout();
            println!("Logged out.");
        }
        Commands::Get { path } => {
            let client = SessionClient::new(http, &config.base_url, guard);
            let body = client.get(&path).await?.text().await?;
            println!("{}", body);
        }
        Commands::Post { path, body } => {
            let body: serde_json::Value =
                serde_json::from_str(&body).context("Request body is not valid JSON")?;
            let client = SessionClient::new(http, &config.base_url, guard);
            let resp = client.post(&path, &body).await?.text().await?;
            println!("{}", resp);
        }
        Commands::Config { save } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if let Some(path) = Config::session_path() {
                println!("# session file: {}", path.display());
            }
            if save {
                let path = file_config.save()?;
                println!("# saved to {}", path.display());
            }
        }
    }

    Ok(())
}
