//! porthole CLI
//!
//! Talks to a running `ph-engine` over localhost IPC:
//! - Enrollment with the orchestrator
//! - Publishing and sharing local services
//! - Answering invitations from collaborators

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use porthole::commands;
use porthole::ipc::{default_ipc_address, EngineClient};

#[derive(Parser)]
#[command(name = "porthole")]
#[command(author, version, about = "Share local services with collaborators")]
#[command(propagate_version = true)]
struct Cli {
    /// Engine IPC address
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show enrollment, services and invitations
    Status,

    /// Follow state changes and notifications
    Watch,

    /// Enroll with the orchestrator
    Enroll {
        /// Return as soon as enrollment has started
        #[arg(long)]
        no_wait: bool,
    },

    /// Manage local services
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },

    /// Answer invitations from collaborators
    Invite {
        #[command(subcommand)]
        action: InviteAction,
    },

    /// Disconnect and wipe all engine state
    Reset,

    /// Stop the engine
    Stop,
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Publish a local service
    Create {
        /// Service name
        name: String,
        /// Port the service listens on
        port: u16,
        /// Address the service listens on
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        /// Scheme hint for clients (e.g. http)
        #[arg(long)]
        scheme: Option<String>,
    },
    /// Point a service at a new endpoint
    Modify {
        name: String,
        port: u16,
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        #[arg(long)]
        scheme: Option<String>,
    },
    /// Delete a service and revoke its shares
    Delete { name: String },
    /// Share a service with collaborators
    Share {
        name: String,
        /// Collaborator email(s)
        #[arg(required = true)]
        emails: Vec<String>,
    },
}

#[derive(Subcommand)]
enum InviteAction {
    /// Accept an invite and get a local inlet for the service
    Accept {
        /// Email of the collaborator who sent the invite
        email: String,
        /// Invite identifier
        invite_id: String,
    },
    /// Reject an invite
    Reject { email: String, invite_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let address = cli.address.unwrap_or_else(default_ipc_address);
    let mut client = EngineClient::with_address(address);

    match cli.command {
        Commands::Status => commands::status_command(&mut client).await?,
        Commands::Watch => commands::watch_command(&mut client).await?,
        Commands::Enroll { no_wait } => commands::enroll_command(&mut client, !no_wait).await?,
        Commands::Service { action } => match action {
            ServiceAction::Create {
                name,
                port,
                address,
                scheme,
            } => {
                commands::create_command(&mut client, &name, &address, port, scheme.as_deref())
                    .await?
            }
            ServiceAction::Modify {
                name,
                port,
                address,
                scheme,
            } => {
                commands::modify_command(&mut client, &name, &address, port, scheme.as_deref())
                    .await?
            }
            ServiceAction::Delete { name } => commands::delete_command(&mut client, &name).await?,
            ServiceAction::Share { name, emails } => {
                commands::share_command(&mut client, &name, &emails).await?
            }
        },
        Commands::Invite { action } => match action {
            InviteAction::Accept { email, invite_id } => {
                commands::accept_command(&mut client, &email, &invite_id).await?
            }
            InviteAction::Reject { email, invite_id } => {
                commands::reject_command(&mut client, &email, &invite_id).await?
            }
        },
        Commands::Reset => commands::reset_command(&mut client).await?,
        Commands::Stop => commands::stop_command(&mut client).await?,
    }

    Ok(())
}
