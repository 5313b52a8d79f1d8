//! Bazaar CLI - sign in to the Bazaar marketplace from the terminal.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use gatekeeper::Role;

#[derive(Parser)]
#[command(name = "bazaar")]
#[command(author, version, about = "Bazaar marketplace session tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json).
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (overrides the configured level).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with an email or username and password.
    Login {
        /// Email or username; prompted when omitted.
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Create an account and sign in.
    Register {
        #[arg(short, long)]
        username: Option<String>,

        #[arg(short, long)]
        email: Option<String>,

        /// Account kind: client, freelancer, company or admin.
        #[arg(short, long, default_value = "client", value_parser = parse_role)]
        role: Role,
    },

    /// Sign in through the configured identity provider.
    Oauth,

    /// Sign out and forget the stored session.
    Logout,

    /// Show the current session.
    Status,
}

fn parse_role(raw: &str) -> Result<Role, String> {
    Role::parse(raw).ok_or_else(|| {
        format!(
            "unknown role '{}', expected one of: {}",
            raw,
            Role::ALL.map(|role| role.as_str()).join(", ")
        )
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli.command, cli.log_level, &cli.format).await;

    if let Err(e) = result {
        output::print_error(&e.to_string(), &cli.format);
        std::process::exit(1);
    }
}

async fn run(
    command: Commands,
    log_level: Option<String>,
    format: &output::OutputFormat,
) -> anyhow::Result<()> {
    let ctx = commands::Context::load(log_level.as_deref())?;

    match command {
        Commands::Login { identifier } => commands::auth::login(&ctx, identifier, format).await,
        Commands::Register {
            username,
            email,
            role,
        } => commands::auth::register(&ctx, username, email, role, format).await,
        Commands::Oauth => commands::auth::oauth(&ctx, format).await,
        Commands::Logout => commands::auth::logout(&ctx, format).await,
        Commands::Status => commands::auth::status(&ctx, format).await,
    }
}
