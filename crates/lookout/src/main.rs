//! `lookout` binary: database migrations, the API server plus background
//! workers, and a token-minting helper for local development.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "lookout", about = "URL scanning service", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations.
    Migrate,
    /// Run the API server and background workers until SIGINT/SIGTERM.
    Scan,
    /// Generate a signed bearer token for the given subject.
    Jwt {
        /// Token subject (user id).
        #[arg(long)]
        subject: Uuid,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 86_400)]
        ttl_secs: i64,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lookout=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Migrate => commands::migrate::run().await,
        Command::Scan => commands::scan::run().await,
        Command::Jwt { subject, ttl_secs } => commands::jwt::run(subject, ttl_secs),
    };

    if let Err(e) = outcome {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
