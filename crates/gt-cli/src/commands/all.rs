use std::process::ExitCode;

use clap::{Args, Subcommand};
use futures_util::future::join_all;
use gt_core::backend::{Backend, StartOpts};
use gt_core::identity::Role;
use gt_core::registry::{self, AgentSession, DiscoverOpts};

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Subcommand)]
pub enum AllCommand {
    /// Start sessions for the matched polecats
    Start(SpecArgs),
    /// Stop sessions for the matched polecats
    Stop(StopArgs),
    /// Show status for the matched polecats
    Status(SpecArgs),
    /// Attach to a single matched polecat
    Attach(SpecArgs),
    /// Nudge the matched polecats with a prompt
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct SpecArgs {
    /// Target specs: `*`, `<rig>/*`, `<rig>/<polecat>`, or `<polecat>`
    #[arg(required = true)]
    pub specs: Vec<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct StopArgs {
    #[arg(required = true)]
    pub specs: Vec<String>,
    /// Kill without a graceful window
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(required = true)]
    pub specs: Vec<String>,
    /// Prompt to deliver to each matched agent
    #[arg(long)]
    pub prompt: String,
    #[arg(long)]
    pub json: bool,
}

/// Expand target specs against the discovered polecat population.
/// Duplicates collapse (first mention wins) and the result order is
/// stable: spec order, then session order within a wildcard.
pub fn expand_specs(
    agents: &[AgentSession],
    ctx_rig: Option<&str>,
    specs: &[String],
) -> Result<Vec<AgentSession>, anyhow::Error> {
    let polecats: Vec<&AgentSession> = agents
        .iter()
        .filter(|a| a.identity.as_ref().map(|i| i.role == Role::Polecat).unwrap_or(false))
        .collect();
    let name_of =
        |a: &AgentSession| a.identity.as_ref().and_then(|i| i.name.clone());
    let mut expanded: Vec<AgentSession> = Vec::new();
    let mut push = |agent: &AgentSession, expanded: &mut Vec<AgentSession>| {
        if !expanded.iter().any(|a| a.session == agent.session) {
            expanded.push(agent.clone());
        }
    };
    for spec in specs {
        match spec.split_once('/') {
            Some((rig, "*")) => {
                for agent in polecats.iter().copied().filter(|a| a.rig() == Some(rig)) {
                    push(agent, &mut expanded);
                }
            }
            Some((rig, name)) => {
                let found = polecats
                    .iter()
                    .copied()
                    .find(|a| a.rig() == Some(rig) && name_of(a).as_deref() == Some(name))
                    .ok_or_else(|| anyhow::anyhow!("no polecat {rig}/{name}"))?;
                push(found, &mut expanded);
            }
            None if spec == "*" => {
                for agent in polecats.iter().copied() {
                    push(agent, &mut expanded);
                }
            }
            None => {
                // Bare polecat name: the context rig if set, otherwise
                // unique across rigs.
                let matches: Vec<&AgentSession> = polecats
                    .iter()
                    .copied()
                    .filter(|a| {
                        name_of(a).as_deref() == Some(spec.as_str())
                            && ctx_rig.map(|r| a.rig() == Some(r)).unwrap_or(true)
                    })
                    .collect();
                match matches.as_slice() {
                    [] => anyhow::bail!("no polecat matches '{spec}'"),
                    [one] => push(one, &mut expanded),
                    _ => anyhow::bail!("'{spec}' is ambiguous across rigs; qualify it"),
                }
            }
        }
    }
    Ok(expanded)
}

pub async fn run(cmd: &AllCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let (backends, backend_notes) = ctx.backends().await;
    for note in &backend_notes {
        output::warn(note);
    }

    let discovery = registry::discover_all(
        &ctx.store,
        &backends,
        DiscoverOpts { check_liveness: true },
    )
    .await;

    match cmd {
        AllCommand::Status(args) => {
            let targets = expand_specs(&discovery.agents, ctx.role.rig(), &args.specs)?;
            if args.json {
                output::emit_json(
                    true,
                    &discovery.errors,
                    &[],
                    serde_json::json!({"agents": targets}),
                );
                return Ok(ExitCode::SUCCESS);
            }
            for agent in &targets {
                let alive = match agent.alive {
                    Some(true) => "✓",
                    Some(false) => "✗",
                    None => "?",
                };
                let state =
                    agent.state.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
                println!("{alive} {:<28} {:<9} {}", agent.session, state, agent.target);
            }
            Ok(ExitCode::SUCCESS)
        }
        AllCommand::Start(args) => {
            let targets = expand_specs(&discovery.agents, ctx.role.rig(), &args.specs)?;
            let results = fan_out(&targets, &backends, &BatchOp::Start).await;
            report(args.json, "started", &targets, results)
        }
        AllCommand::Stop(args) => {
            let targets = expand_specs(&discovery.agents, ctx.role.rig(), &args.specs)?;
            let results =
                fan_out(&targets, &backends, &BatchOp::Stop { force: args.force }).await;
            report(args.json, "stopped", &targets, results)
        }
        AllCommand::Run(args) => {
            let targets = expand_specs(&discovery.agents, ctx.role.rig(), &args.specs)?;
            let results =
                fan_out(&targets, &backends, &BatchOp::Nudge { prompt: args.prompt.clone() })
                    .await;
            report(args.json, "nudged", &targets, results)
        }
        AllCommand::Attach(args) => {
            let targets = expand_specs(&discovery.agents, ctx.role.rig(), &args.specs)?;
            let [target] = targets.as_slice() else {
                anyhow::bail!("attach takes exactly one target, got {}", targets.len());
            };
            let backend = backends
                .iter()
                .find(|b| b.target() == target.target)
                .ok_or_else(|| anyhow::anyhow!("no backend for {}", target.target))?;
            backend.attach_session(&target.session).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

enum BatchOp {
    Start,
    Stop { force: bool },
    Nudge { prompt: String },
}

/// One worker per target; ordered results.
async fn fan_out(
    targets: &[AgentSession],
    backends: &[Box<dyn Backend>],
    op: &BatchOp,
) -> Vec<Result<(), gt_core::GtError>> {
    join_all(targets.iter().map(|target| async move {
        let backend = backends
            .iter()
            .find(|b| b.target() == target.target)
            .ok_or_else(|| {
                gt_core::GtError::Backend(format!("no backend for {}", target.target))
            })?;
        match op {
            BatchOp::Start => backend.start_session(&target.session, &StartOpts::default()).await,
            BatchOp::Stop { force } => backend.stop_session(&target.session, *force).await,
            BatchOp::Nudge { prompt } => backend.nudge_session(&target.session, prompt).await,
        }
    }))
    .await
}

/// Batch success means at least one target succeeded; failures are listed.
fn report(
    json: bool,
    verb: &str,
    targets: &[AgentSession],
    results: Vec<Result<(), gt_core::GtError>>,
) -> anyhow::Result<ExitCode> {
    let mut errors = Vec::new();
    let mut succeeded = Vec::new();
    for (target, result) in targets.iter().zip(&results) {
        match result {
            Ok(()) => succeeded.push(target.session.clone()),
            Err(e) => errors.push(format!("{}: {e}", target.session)),
        }
    }
    let ok = !succeeded.is_empty() || targets.is_empty();
    if json {
        output::emit_json(
            ok,
            &[],
            &errors,
            serde_json::json!({ "verb": verb, "succeeded": succeeded }),
        );
    } else {
        for session in &succeeded {
            output::ok(&format!("{verb} {session}"));
        }
        for error in &errors {
            output::err(error);
        }
    }
    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
