use std::process::ExitCode;

use clap::Args;
use gt_core::beads::fields::{AgentFields, AttachmentFields};
use gt_core::beads::Beads;

use crate::client::CliContext;
use crate::output;

/// Show the calling agent's current hook bead.
#[derive(Debug, Args)]
pub struct HookCommand {
    /// Read from the local replica instead of the live database
    #[arg(long)]
    pub stale: bool,
    #[arg(long)]
    pub json: bool,
}

pub async fn run(cmd: &HookCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let identity = ctx
        .role
        .identity
        .clone()
        .ok_or_else(|| anyhow::anyhow!("cannot tell which agent this is (set GT_ROLE)"))?;
    let agent_bead = identity.bead_id(|rig| ctx.ws.rig_prefix(rig));

    let agent = ctx.store.show(&agent_bead, cmd.stale).await?;
    let hook_id = agent
        .as_ref()
        .and_then(|b| AgentFields::parse(&b.description))
        .and_then(|f| f.hook_bead);
    let Some(hook_id) = hook_id else {
        // Nothing slung: silent no-op.
        return Ok(ExitCode::FAILURE);
    };

    let hook = ctx
        .store
        .show(&hook_id, cmd.stale)
        .await?
        .ok_or_else(|| anyhow::anyhow!("hook {hook_id} is slotted but does not exist"))?;
    if cmd.json {
        output::emit_json(true, &[], &[], serde_json::to_value(&hook)?);
        return Ok(ExitCode::SUCCESS);
    }
    let attachment = AttachmentFields::parse(&hook.description);
    println!("{}: {}", hook.id, hook.title);
    if let Some(args) = attachment.attached_args {
        println!("args: {args}");
    }
    if let Some(molecule) = attachment.attached_molecule {
        println!("molecule: {molecule}");
    }
    if let Some(by) = attachment.dispatched_by {
        println!("dispatched by: {by}");
    }
    if !hook.description.is_empty() {
        println!("\n{}", hook.description);
    }
    Ok(ExitCode::SUCCESS)
}
