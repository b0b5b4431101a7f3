use std::process::ExitCode;

use clap::Args;
use gt_core::registry::{self, DiscoverOpts};

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Restrict to one rig
    #[arg(long)]
    pub rig: Option<String>,
    /// Probe liveness for agents with no visible session
    #[arg(long)]
    pub check: bool,
    #[arg(long)]
    pub json: bool,
}

pub async fn run(cmd: &StatusCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let (backends, backend_notes) = ctx.backends().await;

    let opts = DiscoverOpts { check_liveness: cmd.check };
    let discovery = match &cmd.rig {
        Some(rig) => registry::discover_rig(&ctx.store, &backends, rig, opts).await,
        None => registry::discover_all(&ctx.store, &backends, opts).await,
    };

    if cmd.json {
        output::emit_json(
            true,
            &discovery.errors,
            &[],
            serde_json::json!({"agents": discovery.agents}),
        );
        return Ok(ExitCode::SUCCESS);
    }

    for note in backend_notes.iter().chain(&discovery.errors) {
        output::warn(note);
    }
    println!("Gas Town — {}", ctx.ws.config.name);
    println!("{:<30} {:<10} {:<7} {}", "SESSION", "STATE", "ALIVE", "TARGET");
    for agent in &discovery.agents {
        let state = agent.state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
        let alive = match agent.alive {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        println!("{:<30} {:<10} {:<7} {}", agent.session, state, alive, agent.target);
    }
    Ok(ExitCode::SUCCESS)
}
