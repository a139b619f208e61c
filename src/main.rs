use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod audit;
mod backend;
mod cohort;
mod error;
mod models;
mod orchestrator;
mod report;
mod scoring;
mod store;

use models::{FilterScope, Period, PeriodRange, Tier};
use store::EventStore;

#[derive(Parser)]
#[command(name = "engagement-engine")]
#[command(about = "Engagement scoring and dashboard aggregation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one individual's engagement tier
    Score {
        #[arg(long)]
        individual: Uuid,
        /// Earliest month to score, inclusive (YYYY-MM)
        #[arg(long)]
        from: Option<Period>,
        /// Latest month to score, inclusive (YYYY-MM)
        #[arg(long)]
        to: Option<Period>,
    },
    /// Set or clear a manual tier override
    #[command(group(
        ArgGroup::new("target")
            .args(["tier", "clear"])
            .required(true)
    ))]
    Override {
        #[arg(long)]
        individual: Uuid,
        #[arg(long, value_enum)]
        tier: Option<Tier>,
        /// Revert to the computed tier
        #[arg(long)]
        clear: bool,
        #[arg(long, default_value = "")]
        comment: String,
        #[arg(long)]
        actor: String,
    },
    /// Run one dashboard query cycle and print the snapshot
    Dashboard {
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        sector: Option<Uuid>,
        #[arg(long)]
        group: Option<Uuid>,
        /// Promotion period filter (YYYY-MM)
        #[arg(long)]
        period: Option<Period>,
        /// Reference date for presence rates; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run one dashboard query cycle and write a markdown report
    Report {
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        sector: Option<Uuid>,
        #[arg(long)]
        group: Option<Uuid>,
        #[arg(long)]
        period: Option<Period>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let api_url = std::env::var("ENGAGE_API_URL")
        .context("ENGAGE_API_URL must point at the engagement backend")?;
    let api_token = std::env::var("ENGAGE_API_TOKEN")
        .context("ENGAGE_API_TOKEN must carry a backend credential")?;

    let store = Arc::new(backend::ApiClient::new(api_url, &api_token)?);

    match cli.command {
        Commands::Score {
            individual,
            from,
            to,
        } => {
            let range = PeriodRange { from, to };
            let events = store.list_activity_events(individual, &range).await?;
            let manual = store.get_override(individual).await?;
            let assessment = scoring::assess(&events, manual.as_ref());

            let marker = if assessment.is_manual {
                " (manual override)"
            } else {
                ""
            };
            println!(
                "{individual}: {}{} with average score {:.1} across {} scored months",
                assessment.tier, marker, assessment.average_score, assessment.months_count
            );
        }
        Commands::Override {
            individual,
            tier,
            clear,
            comment,
            actor,
        } => {
            let log = audit::OverrideAuditLog::new(store.clone());
            let tier = if clear { None } else { tier };
            let record = log.record(individual, tier, &comment, &actor).await?;
            match record.tier {
                Some(tier) => println!("Override set: {individual} is now {tier}."),
                None => println!("Override cleared: {individual} reverts to the computed tier."),
            }
        }
        Commands::Dashboard {
            city,
            sector,
            group,
            period,
            date,
        } => {
            let scope = build_scope(city, sector, group, period, date);
            let orchestrator = orchestrator::QueryOrchestrator::new(store.clone());
            let snapshot = orchestrator
                .refresh(scope)
                .await?
                .context("query cycle did not complete")?;
            print!("{}", report::build_report(&snapshot));
        }
        Commands::Report {
            city,
            sector,
            group,
            period,
            date,
            out,
        } => {
            let scope = build_scope(city, sector, group, period, date);
            let orchestrator = orchestrator::QueryOrchestrator::new(store.clone());
            let snapshot = orchestrator
                .refresh(scope)
                .await?
                .context("query cycle did not complete")?;
            std::fs::write(&out, report::build_report(&snapshot))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn build_scope(
    city: Option<String>,
    sector: Option<Uuid>,
    group: Option<Uuid>,
    period: Option<Period>,
    date: Option<NaiveDate>,
) -> FilterScope {
    let reference_date = date.unwrap_or_else(|| Utc::now().date_naive());
    let mut scope = FilterScope::for_date(reference_date);
    scope.city = city;
    scope.sector_id = sector;
    scope.family_group_id = group;
    scope.period = period;
    scope
}
