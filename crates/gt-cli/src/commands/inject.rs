use std::process::ExitCode;

use clap::{Args, Subcommand};
use gt_core::mail::InjectQueue;

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Subcommand)]
pub enum InjectCommand {
    /// Print and clear the queued fragments for a session
    Drain(SessionArgs),
    /// Show the queue depth
    Status(SessionArgs),
    /// Discard the queue
    Clear(SessionArgs),
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    /// Session ID (defaults to $CLAUDE_SESSION_ID)
    #[arg(long)]
    pub session: Option<String>,
    #[arg(long)]
    pub json: bool,
}

fn session_id(args: &SessionArgs) -> anyhow::Result<String> {
    if let Some(session) = &args.session {
        return Ok(session.clone());
    }
    std::env::var("CLAUDE_SESSION_ID")
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("no --session and CLAUDE_SESSION_ID is unset"))
}

pub async fn run(cmd: &InjectCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let queue = InjectQueue::new(&ctx.ws.root);
    match cmd {
        InjectCommand::Drain(args) => {
            let session = session_id(args)?;
            let fragments = queue.drain(&session)?;
            if fragments.is_empty() {
                // Empty queue is a silent no-op: exit 1, no output, so the
                // calling hook knows there is nothing to print.
                return Ok(ExitCode::FAILURE);
            }
            if args.json {
                output::emit_json(true, &[], &[], serde_json::json!({"fragments": fragments}));
            } else {
                println!("{}", fragments.join("\n\n"));
            }
            Ok(ExitCode::SUCCESS)
        }
        InjectCommand::Status(args) => {
            let session = session_id(args)?;
            let depth = queue.status(&session)?;
            if args.json {
                output::emit_json(
                    true,
                    &[],
                    &[],
                    serde_json::json!({"session": session, "depth": depth}),
                );
            } else {
                println!("{depth}");
            }
            Ok(ExitCode::SUCCESS)
        }
        InjectCommand::Clear(args) => {
            let session = session_id(args)?;
            queue.clear(&session)?;
            if !args.json {
                output::ok(&format!("cleared inject queue for {session}"));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
