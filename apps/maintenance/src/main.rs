//! Operator tool for form snapshot maintenance.
//!
//! Usage:
//!   edc-maintenance --database <file> counts
//!   edc-maintenance --database <file> verify --subject <id>
//!   edc-maintenance --database <file> repair --subject <id>
//!   edc-maintenance --database <file> rebuild-snapshots [--yes]

mod context;
mod report;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};

use context::ServiceContext;

#[derive(Parser)]
#[command(name = "edc-maintenance")]
#[command(version)]
#[command(about = "Verify, repair and rebuild subject form snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file
    #[arg(long, env = "EDC_DATABASE_PATH")]
    database: String,

    /// User recorded in audit rows
    #[arg(long, env = "EDC_ACTOR", default_value = "system")]
    actor: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print form instance and snapshot counts per subject
    Counts,

    /// Classify a subject's expected forms as consistent, missing or stale
    Verify {
        #[arg(long)]
        subject: String,
    },

    /// Create snapshots for a subject's missing forms
    Repair {
        #[arg(long)]
        subject: String,
    },

    /// Rebuild every active form's snapshot from the current templates
    RebuildSnapshots {
        /// Perform the rebuild; without it only the plan is printed
        #[arg(long)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(LevelFilter::Debug);
    }
    builder.init();
}

async fn rebuild_snapshots(ctx: &ServiceContext, confirmed: bool) -> Result<()> {
    let existing = ctx.snapshot_repository.count_snapshots()?;
    let replaceable = ctx.snapshot_repository.count_replaceable_snapshots()?;
    println!(
        "{} existing snapshot(s) will be discarded; {} of removed forms are kept",
        replaceable,
        existing - replaceable
    );
    report::print_counts("Before:", &ctx.snapshot_repository.instance_snapshot_counts()?);
    if !confirmed {
        println!("Dry run; pass --yes to rebuild");
        return Ok(());
    }

    let summary = ctx
        .reconciliation_service
        .rebuild_all_snapshots(&ctx.actor)
        .await?;
    report::print_rebuild(&summary);
    report::print_counts("After:", &ctx.snapshot_repository.instance_snapshot_counts()?);
    if !summary.failures.is_empty() {
        bail!("{} snapshot(s) could not be rebuilt", summary.failures.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = ServiceContext::initialize(&cli.database, cli.actor)?;
    match cli.command {
        Commands::Counts => {
            report::print_counts("Subjects:", &ctx.snapshot_repository.instance_snapshot_counts()?);
        }
        Commands::Verify { subject } => {
            let Some(report) = ctx.reconciliation_service.verify_form_integrity(&subject)? else {
                bail!("subject '{}' not found", subject);
            };
            report::print_report(&report);
        }
        Commands::Repair { subject } => {
            let Some(outcome) = ctx
                .reconciliation_service
                .repair_missing_snapshots(&subject, &ctx.actor)
                .await?
            else {
                bail!("subject '{}' not found", subject);
            };
            report::print_repair(&subject, &outcome);
        }
        Commands::RebuildSnapshots { yes } => {
            rebuild_snapshots(&ctx, yes).await?;
        }
    }
    info!("Done");
    Ok(())
}
