use chrono::Local;
use clap::{Parser, Subcommand};
use leads_core::{CrmClient, GoogleDocsClient, GoogleSheetsClient, LeadsConfig};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use leads_jobs::subsystems::harvest::{self, HarvestSettings};
use leads_jobs::subsystems::report::{self, ReportOutcome, ReportSettings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Harvest recent CRM leads and report them daily", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "leads.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Page through CRM sessions and write today's lead artifact
    Harvest,

    /// Report leads not yet delivered to the document and spreadsheet
    Report {
        /// Report from this artifact instead of the newest one
        #[arg(long)]
        artifact: Option<PathBuf>,
    },

    /// Harvest, then report
    Run,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (credentials usually live there)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match LeadsConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Harvest => harvest_command(&config).await,
        Command::Report { artifact } => report_command(&config, artifact).await,
        Command::Run => {
            harvest_command(&config).await?;
            report_command(&config, None).await
        }
    }
}

async fn harvest_command(config: &LeadsConfig) -> anyhow::Result<()> {
    config.validate_harvest()?;
    let client = CrmClient::new(&config.crm)?;
    let settings = HarvestSettings::from(config);

    let result = harvest::run_harvest(&client, &settings, Local::now()).await?;

    match &result.artifact {
        Some(path) => println!(
            "✅ {} leads exported to {} ({} pages, {} sessions, {} skipped)",
            result.leads,
            path.display(),
            result.pages,
            result.records_fetched,
            result.skipped.total()
        ),
        None => println!(
            "⚠️ No recent leads ({} pages, {} sessions, {} skipped)",
            result.pages,
            result.records_fetched,
            result.skipped.total()
        ),
    }
    Ok(())
}

async fn report_command(config: &LeadsConfig, artifact: Option<PathBuf>) -> anyhow::Result<()> {
    config.validate_report()?;
    let docs = GoogleDocsClient::new(&config.google)?;
    let sheets = GoogleSheetsClient::new(&config.google)?;
    let settings = ReportSettings::from(config);

    let outcome =
        report::run_report(&settings, artifact.as_deref(), &docs, &sheets, Local::now()).await?;

    match outcome {
        ReportOutcome::NoArtifact => println!("⚠️ No leads file found."),
        ReportOutcome::NothingNew { .. } => println!("⚠️ No new leads to include in the report."),
        ReportOutcome::Delivered(delivered) => {
            println!("{}", delivered.summary);
            println!("✅ Report updated in Google Docs and Google Sheets (no duplicates).");
        }
    }
    Ok(())
}
