use std::process::ExitCode;

use clap::Args;
use gt_core::flight::{Flight, FlightOpts, ProcessTable};

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Args)]
pub struct PostflightCommand {
    /// Restrict cleanups to one rig
    #[arg(long)]
    pub rig: Option<String>,
    /// Move already-read mail to each agent's archive
    #[arg(long)]
    pub archive_mail: bool,
    /// Report what would be cleaned without cleaning
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub json: bool,
}

pub async fn run(cmd: &PostflightCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let (backends, backend_notes) = ctx.backends().await;

    let flight = Flight {
        ws: &ctx.ws,
        store: &ctx.store,
        mail: &ctx.mail,
        backends: &backends,
        procs: ProcessTable::read().await?,
    };
    let opts = FlightOpts {
        rig: cmd.rig.clone(),
        dry_run: cmd.dry_run,
        archive_mail: cmd.archive_mail,
    };
    let report = flight.postflight(&opts).await;

    if cmd.json {
        output::emit_json(
            report.ok,
            &report.warnings,
            &report.errors,
            serde_json::json!({"checks": report.checks, "cleaned": report.cleaned}),
        );
    } else {
        for note in &backend_notes {
            output::warn(note);
        }
        super::preflight::print_report("postflight", &report);
    }
    Ok(if report.ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
