//! CareBridge CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write the default config
//! - `chat`: Interactive or single-message chat
//! - `upload`: Store a medical document and queue it for analysis
//! - `report`: Report status and listings
//! - `session`: Create, list, rename and delete sessions
//! - `summary`: Conversation and medical summaries
//! - `config`: Show, validate or locate the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "carebridge",
    about = "CareBridge — health support assistant",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Config file to use instead of ~/.carebridge/config.toml
    #[arg(long, global = true, env = "CAREBRIDGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Onboard,

    /// Chat with the assistant
    Chat {
        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Owner of a new session; anonymous sessions cannot upload reports
        #[arg(short, long)]
        user: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Attach a document to the single message
        #[arg(short, long, requires = "message")]
        file: Option<PathBuf>,
    },

    /// Upload a document for analysis
    Upload {
        #[arg(short, long)]
        user: String,

        file: PathBuf,

        /// Block until the analysis finishes or the polling budget runs out
        #[arg(short, long)]
        wait: bool,
    },

    /// Inspect analyzed reports
    #[command(subcommand)]
    Report(ReportCommand),

    /// Manage chat sessions
    #[command(subcommand)]
    Session(SessionCommand),

    /// Show session summaries
    #[command(subcommand)]
    Summary(SummaryCommand),

    /// Configuration helpers
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
enum ReportCommand {
    /// Current status and results of one report
    Status { id: String },

    /// A user's reports, newest first
    List {
        #[arg(short, long)]
        user: String,

        /// Restrict to one category (e.g. investigations_reports)
        #[arg(short, long)]
        category: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Start a new session
    New {
        #[arg(short, long)]
        user: Option<String>,
    },

    /// A user's sessions, most recently active first
    List {
        #[arg(short, long)]
        user: String,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Print a session's messages
    Show {
        id: String,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    Rename { id: String, title: String },

    Delete { id: String },
}

#[derive(Subcommand)]
enum SummaryCommand {
    /// The rolling conversation summary
    Show { session: String },

    /// Regenerate the medical summary from the user's completed reports
    Medical {
        session: String,

        /// Only digest these reports
        #[arg(short, long = "report")]
        reports: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    Show,
    Validate,
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Onboard => commands::onboard::run(config_path).await?,
        Commands::Chat {
            session,
            user,
            message,
            file,
        } => commands::chat::run(config_path, session, user, message, file).await?,
        Commands::Upload { user, file, wait } => {
            commands::upload::run(config_path, &user, &file, wait).await?
        }
        Commands::Report(ReportCommand::Status { id }) => {
            commands::report::status(config_path, &id).await?
        }
        Commands::Report(ReportCommand::List {
            user,
            category,
            limit,
            offset,
        }) => commands::report::list(config_path, &user, category.as_deref(), limit, offset).await?,
        Commands::Session(SessionCommand::New { user }) => {
            commands::session::create(config_path, user).await?
        }
        Commands::Session(SessionCommand::List { user, limit }) => {
            commands::session::list(config_path, &user, limit).await?
        }
        Commands::Session(SessionCommand::Show { id, limit }) => {
            commands::session::show(config_path, &id, limit).await?
        }
        Commands::Session(SessionCommand::Rename { id, title }) => {
            commands::session::rename(config_path, &id, &title).await?
        }
        Commands::Session(SessionCommand::Delete { id }) => {
            commands::session::delete(config_path, &id).await?
        }
        Commands::Summary(SummaryCommand::Show { session }) => {
            commands::summary::show(config_path, &session).await?
        }
        Commands::Summary(SummaryCommand::Medical { session, reports }) => {
            commands::summary::medical(config_path, &session, &reports).await?
        }
        Commands::Config(ConfigCommand::Show) => commands::config_cmd::show(config_path)?,
        Commands::Config(ConfigCommand::Validate) => commands::config_cmd::validate(config_path)?,
        Commands::Config(ConfigCommand::Path) => commands::config_cmd::path(config_path),
    }

    Ok(())
}
