use std::process::ExitCode;

use clap::{Args, Subcommand};
use gt_core::beads::fields::ConfigFields;
use gt_core::beads::{BeadKind, Beads};
use gt_core::config::{self, Category, Scope};
use gt_core::identity::Role;

use crate::client::CliContext;
use crate::output;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Resolve the effective configuration for a category and scope
    Resolve(ResolveArgs),
    /// Config bead CRUD
    #[command(subcommand)]
    Bead(BeadCommand),
    /// Check the config-bead population for problems
    Verify(VerifyArgs),
    /// Write a merged category to its well-known file
    Materialize(MaterializeArgs),
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Category slug, e.g. claude-hooks
    pub category: String,
    /// Town name (defaults to the manifest's)
    #[arg(long)]
    pub town: Option<String>,
    #[arg(long)]
    pub rig: Option<String>,
    #[arg(long)]
    pub role: Option<String>,
    #[arg(long)]
    pub agent: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum BeadCommand {
    /// List config beads
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one config bead
    Show { slug: String },
    /// Create a config bead
    Create {
        slug: String,
        #[arg(long)]
        category: String,
        /// Scope: `*`, `<town>`, or `<town>/<rig>`
        #[arg(long, default_value = "*")]
        scope: String,
        /// JSON metadata blob
        #[arg(long, default_value = "{}")]
        metadata: String,
        /// Extra scope labels (`role:<r>`, `agent:<a>`)
        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Update a config bead's metadata or scope
    Update {
        slug: String,
        #[arg(long)]
        scope: Option<String>,
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Hard-delete a config bead
    Delete { slug: String },
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Delete beads that fail verification
    #[arg(long)]
    pub fix: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MaterializeArgs {
    /// Materialize the claude-hooks settings file
    #[arg(long, conflicts_with = "mcp")]
    pub hooks: bool,
    /// Materialize the MCP config file
    #[arg(long)]
    pub mcp: bool,
    /// Scope: `*`, `<town>`, or `<town>/<rig>`
    #[arg(long, default_value = "*")]
    pub scope: String,
}

pub async fn run(cmd: &ConfigCommand) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::load()?;
    match cmd {
        ConfigCommand::Resolve(args) => {
            let category = Category::parse(&args.category)?;
            let scope = Scope {
                town: args.town.clone().unwrap_or_else(|| ctx.ws.config.name.clone()),
                rig: args.rig.clone(),
                role: match &args.role {
                    Some(role) => Some(
                        Role::parse(role)
                            .ok_or_else(|| anyhow::anyhow!("unknown role: {role}"))?,
                    ),
                    None => None,
                },
                agent: args.agent.clone(),
            };
            let resolution = config::resolve(&ctx.store, category, &scope).await?;
            if args.json {
                output::emit_json(true, &[], &[], serde_json::to_value(&resolution)?);
            } else {
                for layer in &resolution.layers {
                    println!("  {} ({})", layer.bead_id, layer.scope);
                }
                println!("{}", serde_json::to_string_pretty(&resolution.merged)?);
            }
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommand::Bead(cmd) => run_bead(&ctx, cmd).await,
        ConfigCommand::Verify(args) => {
            let issues = config::verify(&ctx.store).await?;
            let mut fixed = Vec::new();
            if args.fix {
                for issue in issues.iter().filter_map(|i| i.bead_id.as_ref()) {
                    ctx.store.delete(issue).await?;
                    fixed.push(issue.clone());
                }
            }
            let ok = issues.is_empty() || args.fix;
            if args.json {
                output::emit_json(
                    ok,
                    &issues
                        .iter()
                        .map(|i| match &i.bead_id {
                            Some(id) => format!("{id}: {}", i.problem),
                            None => i.problem.clone(),
                        })
                        .collect::<Vec<_>>(),
                    &[],
                    serde_json::json!({"fixed": fixed}),
                );
            } else {
                for issue in &issues {
                    match &issue.bead_id {
                        Some(id) => output::warn(&format!("{id}: {}", issue.problem)),
                        None => output::warn(&issue.problem),
                    }
                }
                for id in &fixed {
                    output::ok(&format!("deleted {id}"));
                }
                if issues.is_empty() {
                    output::ok("config beads verify clean");
                }
            }
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        ConfigCommand::Materialize(args) => {
            let category = if args.hooks {
                Category::ClaudeHooks
            } else if args.mcp {
                Category::Mcp
            } else {
                anyhow::bail!("materialize needs --hooks or --mcp");
            };
            let scope = parse_scope(&ctx, &args.scope);
            let work_dir = std::env::current_dir()?;
            let path = config::materialize(&ctx.store, &work_dir, category, &scope).await?;
            output::ok(&format!("wrote {}", path.display()));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_bead(ctx: &CliContext, cmd: &BeadCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        BeadCommand::List { json } => {
            let beads = ctx.store.list_by_kind(BeadKind::Config).await?;
            if *json {
                output::emit_json(true, &[], &[], serde_json::json!({"beads": beads}));
            } else {
                for bead in beads.iter().filter(|b| b.is_open()) {
                    let fields = ConfigFields::parse(&bead.description);
                    match fields {
                        Some(f) => println!("{:<24} {:<14} {}", bead.id, f.category, f.rig),
                        None => println!("{:<24} (no config record)", bead.id),
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        BeadCommand::Show { slug } => {
            let id = config::config_bead_id(slug);
            let bead = ctx
                .store
                .show(&id, false)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no config bead {id}"))?;
            println!("{}", bead.description);
            Ok(ExitCode::SUCCESS)
        }
        BeadCommand::Create { slug, category, scope, metadata, labels } => {
            // Reject malformed metadata up front instead of storing it.
            serde_json::from_str::<serde_json::Value>(metadata)
                .map_err(|e| anyhow::anyhow!("--metadata is not valid JSON: {e}"))?;
            let fields = ConfigFields {
                rig: scope.clone(),
                category: category.clone(),
                metadata: metadata.clone(),
            };
            let id =
                config::create_config_bead(&ctx.store, slug, &fields, labels.clone()).await?;
            output::ok(&format!("created {id}"));
            Ok(ExitCode::SUCCESS)
        }
        BeadCommand::Update { slug, scope, metadata } => {
            let id = config::config_bead_id(slug);
            let bead = ctx
                .store
                .show(&id, false)
                .await?
                .ok_or_else(|| anyhow::anyhow!("no config bead {id}"))?;
            let mut fields = ConfigFields::parse(&bead.description)
                .ok_or_else(|| anyhow::anyhow!("{id} carries no config record"))?;
            if let Some(scope) = scope {
                fields.rig = scope.clone();
            }
            if let Some(metadata) = metadata {
                serde_json::from_str::<serde_json::Value>(metadata)
                    .map_err(|e| anyhow::anyhow!("--metadata is not valid JSON: {e}"))?;
                fields.metadata = metadata.clone();
            }
            config::update_config_bead(&ctx.store, slug, &fields).await?;
            output::ok(&format!("updated {id}"));
            Ok(ExitCode::SUCCESS)
        }
        BeadCommand::Delete { slug } => {
            config::delete_config_bead(&ctx.store, slug).await?;
            output::ok(&format!("deleted {}", config::config_bead_id(slug)));
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Parse a `--scope` string against the current town.
fn parse_scope(ctx: &CliContext, scope: &str) -> Scope {
    let town = ctx.ws.config.name.clone();
    match scope {
        "*" => Scope { town, ..Default::default() },
        s => match s.split_once('/') {
            Some((_, rig)) => Scope { town, rig: Some(rig.to_string()), ..Default::default() },
            None => Scope { town, ..Default::default() },
        },
    }
}
