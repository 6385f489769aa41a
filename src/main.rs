mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "calmirror", version)]
#[command(about = "Mirror and back up Google Calendar events using incremental sync tokens")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with Google and store the OAuth token
    Auth,
    /// Remove the stored OAuth token
    Logout,
    /// List the calendars of the signed-in account
    Calendars,
    /// Establish sync tokens without propagating anything
    Init {
        /// Only the job with this source calendar
        #[arg(long)]
        job: Option<String>,
    },
    /// Propagate changes since the last run
    Sync {
        /// Only the job with this source calendar
        #[arg(long)]
        job: Option<String>,

        /// Log writes instead of performing them; the stored token is left alone
        #[arg(long)]
        dry_run: bool,
    },
    /// Forget the sync token of a calendar
    Reset {
        #[arg(long)]
        calendar: String,
    },
    /// Show configuration location and validation problems
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = calmirror_core::init() {
        eprintln!("Failed to initialize logging: {:#}", e);
    }

    let result = match cli.command {
        Commands::Auth => commands::auth::login().await,
        Commands::Logout => commands::auth::logout(),
        Commands::Calendars => commands::calendars::run().await,
        Commands::Init { job } => commands::sync::init(job.as_deref()).await,
        Commands::Sync { job, dry_run } => commands::sync::run(job.as_deref(), dry_run).await,
        Commands::Reset { calendar } => commands::sync::reset(&calendar),
        Commands::Config => commands::config::run(),
    };

    if let Err(err) = result {
        tracing::debug!("{:?}", err);
        eprintln!("Error: {}", commands::user_message(&err));
        std::process::exit(1);
    }
}
