mod client;
mod commands;
mod output;

use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

/// gt — Gas Town CLI
#[derive(Debug, Parser)]
#[command(name = "gt", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Attach a hook bead to an agent and get it working
    Sling(commands::sling::SlingCommand),

    /// Batch operations across many agents
    #[command(subcommand)]
    All(commands::all::AllCommand),

    /// Check workspace invariants before a batch run
    Preflight(commands::preflight::PreflightCommand),

    /// Clean up after a batch run
    Postflight(commands::postflight::PostflightCommand),

    /// Scope-resolved configuration beads
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),

    /// Claude hook configuration for the current agent
    #[command(subcommand)]
    Hooks(commands::hooks::HooksCommand),

    /// The per-session prompt-injection queue
    #[command(subcommand)]
    Inject(commands::inject::InjectCommand),

    /// Wait for inbox mail or a pending decision
    Yield(commands::yield_cmd::YieldCommand),

    /// Show the calling agent's current hook
    Hook(commands::hook::HookCommand),

    /// Show the live agent view of the town
    Status(commands::status::StatusCommand),

    /// Show version and build info
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Sling(cmd) => commands::sling::run(cmd).await,
        Command::All(cmd) => commands::all::run(cmd).await,
        Command::Preflight(cmd) => commands::preflight::run(cmd).await,
        Command::Postflight(cmd) => commands::postflight::run(cmd).await,
        Command::Config(cmd) => commands::config::run(cmd).await,
        Command::Hooks(cmd) => commands::hooks::run(cmd).await,
        Command::Inject(cmd) => commands::inject::run(cmd).await,
        Command::Yield(cmd) => commands::yield_cmd::run(cmd).await,
        Command::Hook(cmd) => commands::hook::run(cmd).await,
        Command::Status(cmd) => commands::status::run(cmd).await,
        Command::Version => {
            println!("gt {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_VERSION"));
            println!("built {}", env!("BUILD_DATE"));
            Ok(ExitCode::SUCCESS)
        }
        Command::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "gt", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            output::err(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
