use std::process::ExitCode;

use clap::Args;
use gt_core::flight::{Flight, FlightOpts, ProcessTable};

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Args)]
pub struct PreflightCommand {
    /// Restrict rig-scoped checks to one rig
    #[arg(long)]
    pub rig: Option<String>,
    /// Report without cleaning anything
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub json: bool,
}

pub async fn run(cmd: &PreflightCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    let (backends, backend_notes) = ctx.backends().await;

    let flight = Flight {
        ws: &ctx.ws,
        store: &ctx.store,
        mail: &ctx.mail,
        backends: &backends,
        procs: ProcessTable::read().await?,
    };
    let opts = FlightOpts { rig: cmd.rig.clone(), dry_run: cmd.dry_run, archive_mail: false };
    let report = flight.preflight(&opts).await;

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
        print_report("preflight", &report);
    }
    Ok(if report.ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

pub fn print_report(label: &str, report: &gt_core::flight::FlightReport) {
    use gt_core::flight::CheckStatus;
    for check in &report.checks {
        match check.status {
            CheckStatus::Pass => output::ok(&format!("{}: {}", check.name, check.detail)),
            CheckStatus::Info => println!("  {}: {}", check.name, check.detail),
            CheckStatus::Warn => output::warn(&format!("{}: {}", check.name, check.detail)),
            CheckStatus::Fail => output::err(&format!("{}: {}", check.name, check.detail)),
        }
    }
    for cleaned in &report.cleaned {
        output::ok(cleaned);
    }
    if report.ok {
        output::ok(&format!("{label} ok ({} warnings)", report.warnings.len()));
    } else {
        output::err(&format!("{label} failed ({} errors)", report.errors.len()));
    }
}
