//! Poll Hub Server
//!
//! WebSocket fan-out hub for the polling app. Browser clients connect with a
//! bearer token, join voting groups, and receive poll, vote and comment
//! notifications for those groups.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use poll_hub::auth::JwtAuthenticator;
use poll_hub::config::{Settings, CONFIG_FILE};
use poll_hub::{HubServer, Registry};

/// Poll Hub Server
///
/// Real-time notification hub for voting groups
#[derive(Parser, Debug)]
#[command(name = "poll-hub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML settings file
    #[arg(short, long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Secret used to verify bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a signed token for a user id (for local testing)
    Token {
        /// 24-character hex user id
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    if args.jwt_secret.is_some() {
        settings.auth.jwt_secret = args.jwt_secret;
    }
    settings.validate()?;

    let secret = settings
        .auth
        .jwt_secret
        .clone()
        .context("no JWT secret configured (set JWT_SECRET or auth.jwt_secret)")?;
    let authenticator = Arc::new(JwtAuthenticator::new(secret.as_bytes()));

    if let Some(Command::Token { user_id }) = args.command {
        let token = authenticator.issue(&user_id, settings.auth.token_ttl())?;
        println!("{}", token);
        return Ok(());
    }

    info!("Poll Hub v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(Registry::new());
    let server = Arc::new(HubServer::new(
        settings.server,
        settings.hub,
        registry,
        authenticator,
    ));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Initiating graceful shutdown...");
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
