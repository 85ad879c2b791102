//! anima - command line client for the anima emotion and music service.
//!
//! Signs in, keeps the session alive across runs and exposes the backend
//! operations (analysis, profile, Spotify) as subcommands.

mod commands;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anima_core::{ApiClient, ApiError, Config};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name prefix inside the log directory (rotated daily)
const LOG_FILE_PREFIX: &str = "anima.log";

#[derive(Parser)]
#[command(name = "anima", version, about = "anima emotion and music client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        nombre: String,
    },
    /// Sign out on the server and locally
    Logout {
        /// Also forget the Spotify connection
        #[arg(long)]
        forget_spotify: bool,
    },
    /// Show what is stored for the current session
    Status,
    /// Show the signed-in user
    Whoami,
    /// Force an access token refresh
    Refresh,
    /// Validate the session, refreshing if needed
    Check,
    /// Analyze the emotion in a photo
    Analyze {
        image: PathBuf,
        #[arg(long, env = "TZ", default_value = "UTC")]
        timezone: String,
        /// Save the result to the history
        #[arg(long)]
        save: bool,
    },
    /// Update profile name and/or email
    Profile {
        #[arg(long)]
        nombre: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Change the account password
    Password,
    /// Spotify connection
    Spotify {
        #[command(subcommand)]
        action: SpotifyAction,
    },
    /// Print the claims of the stored access token (not verified)
    DecodeToken,
}

#[derive(Subcommand)]
enum SpotifyAction {
    /// Finish the OAuth flow with the state from the callback URL
    Connect { state: String },
    /// Check whether the stored Spotify token is still accepted
    Status,
    /// Store a Spotify token obtained elsewhere
    Set { jwt: String },
    /// Forget the stored Spotify token
    Clear,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let log_to_file = std::env::var("ANIMA_LOG_FILE").is_ok_and(|v| v == "1");
    let (file_layer, guard) = match Config::log_dir() {
        Ok(dir) if log_to_file => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing();
    info!("anima starting");

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ApiError>() {
                Some(api_error) => {
                    debug!(error = ?api_error, "Command failed");
                    eprintln!("{}", api_error.user_message());
                }
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    let client = ApiClient::from_config(&config)?;

    let result = match command {
        Command::Login { email } => commands::login(&client, &mut config, email).await,
        Command::Register { email, nombre } => commands::register(&client, email, nombre).await,
        Command::Logout { forget_spotify } => commands::logout(&client, forget_spotify).await,
        Command::Status => commands::status(&client),
        Command::Whoami => commands::whoami(&client).await,
        Command::Refresh => commands::refresh(&client).await,
        Command::Check => commands::check(&client).await,
        Command::Analyze {
            image,
            timezone,
            save,
        } => commands::analyze(&client, &image, &timezone, save).await,
        Command::Profile { nombre, email } => commands::profile(&client, nombre, email).await,
        Command::Password => commands::change_password(&client).await,
        Command::Spotify { action } => match action {
            SpotifyAction::Connect { state } => commands::spotify_connect(&client, &state).await,
            SpotifyAction::Status => commands::spotify_status(&client).await,
            SpotifyAction::Set { jwt } => {
                client.store().set_third_party_token(&jwt);
                println!("Token de Spotify guardado.");
                Ok(())
            }
            SpotifyAction::Clear => {
                client.store().clear_third_party_token();
                println!("Token de Spotify eliminado.");
                Ok(())
            }
        },
        Command::DecodeToken => commands::decode_token(&client),
    };

    commands::report_sign_out(&client);
    result
}
