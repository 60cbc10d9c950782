//! Soundtrail CLI
//!
//! Command-line client for the Soundtrail backend and connected music
//! providers.
//!
//! # Usage
//!
//! ```bash
//! # Start an account session
//! soundtrail login me@example.com
//!
//! # Show session state for every domain
//! soundtrail status
//!
//! # Finish a provider authorization with the code from the browser
//! soundtrail connect spotify AQDx...
//!
//! # Issue an authenticated request
//! soundtrail get pins
//! ```

mod config;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use soundtrail_core::{
    ApiClient, Domain, ProviderId, RequestOptions, Secret, create_store,
};

use config::{CliConfig, load_config};

#[derive(Parser)]
#[command(name = "soundtrail")]
#[command(about = "Soundtrail account and music-provider sessions")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in to a Soundtrail account
    Login {
        /// Account email address
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create a Soundtrail account and log in
    Register {
        /// Account email address
        email: String,

        /// Password (prompted when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Log out of the account and every connected provider
    Logout,

    /// Show session state for every domain
    Status,

    /// Connect a music provider with an authorization code
    Connect {
        /// Provider identifier (e.g., spotify)
        provider: String,

        /// Authorization code from the provider's consent flow
        code: String,
    },

    /// Disconnect a music provider
    Disconnect {
        /// Provider identifier
        provider: String,
    },

    /// Issue a GET request and print the response envelope
    Get {
        /// Request path relative to the domain's base URL
        path: String,

        /// Provider domain to address instead of the account backend
        #[arg(short = 'd', long)]
        provider: Option<String>,

        /// Send the request without an access token
        #[arg(long)]
        anonymous: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config()?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!(config_path = ?config.config_path, "configuration loaded");

    let client = build_client(&config)?;
    client.restore().await?;

    match cli.command {
        Commands::Login { email, password } => {
            let password = resolve_password(password)?;
            client.login(&email, &password).await?;
            println!("Logged in as {}", email);
            Ok(())
        }
        Commands::Register { email, password } => {
            let password = resolve_password(password)?;
            client.register(&email, &password).await?;
            println!("Registered and logged in as {}", email);
            Ok(())
        }
        Commands::Logout => {
            client.logout().await;
            println!("Logged out");
            Ok(())
        }
        Commands::Status => {
            print_status(&client);
            Ok(())
        }
        Commands::Connect { provider, code } => {
            let id = ProviderId::new(provider);
            client.connect(&id, &code).await?;
            println!("Connected {}", id);
            Ok(())
        }
        Commands::Disconnect { provider } => {
            let id = ProviderId::new(provider);
            client.disconnect(&id).await?;
            println!("Disconnected {}", id);
            Ok(())
        }
        Commands::Get {
            path,
            provider,
            anonymous,
        } => run_get(&client, &path, provider.as_deref(), anonymous).await,
    }
}

fn build_client(config: &CliConfig) -> Result<ApiClient> {
    let base_url = Url::parse(&config.api_base_url)
        .with_context(|| format!("Invalid api_base_url: {}", config.api_base_url))?;

    let store = Arc::from(create_store(config.prefer_keyring));
    let mut client = ApiClient::new(base_url, store);

    for entry in &config.providers {
        client = client.with_provider(
            entry.provider.clone(),
            entry.client_id.clone(),
            entry.client_secret.clone().map(Secret::new),
        );
    }

    Ok(client)
}

fn resolve_password(given: Option<String>) -> Result<String> {
    if let Some(password) = given {
        return Ok(password);
    }

    print!("Password: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("Password must not be empty");
    }
    Ok(password)
}

fn print_status(client: &ApiClient) {
    let account_state = client
        .auth_state(&Domain::Account)
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("account: {}", account_state);

    let mut ids = client.provider_ids();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    for id in ids {
        let state = client
            .auth_state(&Domain::Provider(id.clone()))
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{}: {}", id, state);
    }
}

async fn run_get(
    client: &ApiClient,
    path: &str,
    provider: Option<&str>,
    anonymous: bool,
) -> Result<()> {
    let domain = match provider {
        Some(id) => Domain::Provider(ProviderId::new(id)),
        None => Domain::Account,
    };

    let mut opts = RequestOptions::for_domain(domain);
    if anonymous {
        opts = opts.anonymous();
    }

    let envelope = client.get(path, &[], opts).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if envelope.success {
        Ok(())
    } else {
        bail!(
            "request failed: {}",
            envelope.message.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}
