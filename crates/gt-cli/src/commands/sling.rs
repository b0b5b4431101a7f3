use std::process::ExitCode;

use clap::Args;
use gt_core::beads::{ExecutionTarget, MergeStrategy};
use gt_core::dispatch::{Dispatcher, SlingRequest};

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Args)]
pub struct SlingCommand {
    /// Target: role path, rig name, or bare polecat/crew name
    pub target: String,
    /// Hook bead to attach (omit with --formula)
    pub hook: Option<String>,
    /// Instantiate this formula around the hook
    #[arg(long)]
    pub formula: Option<String>,
    /// Extra arguments passed to the agent in the nudge
    #[arg(long)]
    pub args: Option<String>,
    /// Credentials account for a spawned session
    #[arg(long)]
    pub account: Option<String>,
    /// Override the agent command for a spawned session
    #[arg(long = "agent")]
    pub agent_override: Option<String>,
    /// Where the agent runs
    #[arg(long, value_enum)]
    pub execution_target: Option<ExecutionTargetArg>,
    /// Skip the merge queue for this work
    #[arg(long)]
    pub no_merge: bool,
    /// How finished work integrates
    #[arg(long, value_enum)]
    pub merge_strategy: Option<MergeStrategyArg>,
    /// Proceed past conflicts where safe
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ExecutionTargetArg {
    Local,
    K8s,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum MergeStrategyArg {
    Mr,
    Direct,
    Local,
}

pub async fn run(cmd: &SlingCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let (backends, backend_notes) = ctx.backends().await;

    let dispatcher = Dispatcher {
        ws: &ctx.ws,
        store: &ctx.store,
        mail: &ctx.mail,
        ctx: &ctx.role,
        backends: &backends,
    };
    let request = SlingRequest {
        target: cmd.target.clone(),
        hook: cmd.hook.clone(),
        formula: cmd.formula.clone(),
        args: cmd.args.clone(),
        account: cmd.account.clone(),
        agent_override: cmd.agent_override.clone(),
        execution_target: cmd.execution_target.map(|t| match t {
            ExecutionTargetArg::Local => ExecutionTarget::Local,
            ExecutionTargetArg::K8s => ExecutionTarget::K8s,
        }),
        merge_strategy: cmd.merge_strategy.map(|m| match m {
            MergeStrategyArg::Mr => MergeStrategy::Mr,
            MergeStrategyArg::Direct => MergeStrategy::Direct,
            MergeStrategyArg::Local => MergeStrategy::Local,
        }),
        no_merge: cmd.no_merge,
        force: cmd.force,
    };

    let outcome = dispatcher.sling(&request).await?;
    let mut warnings = backend_notes;
    warnings.extend(outcome.warnings.clone());

    if cmd.json {
        output::emit_json(true, &warnings, &[], serde_json::to_value(&outcome)?);
        return Ok(ExitCode::SUCCESS);
    }
    for warning in &warnings {
        output::warn(warning);
    }
    output::ok(&format!(
        "slung {} at {} (agent {}, {})",
        outcome.hook, cmd.target, outcome.agent_bead, outcome.target
    ));
    if outcome.spawned {
        output::ok(&format!("spawned session {}", outcome.session));
    }
    if outcome.mailed {
        output::warn("agent not reachable yet; nudge queued to its mailbox");
    }
    Ok(ExitCode::SUCCESS)
}
