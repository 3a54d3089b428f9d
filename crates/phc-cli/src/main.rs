use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const MAX_SUMMARY_ERRORS: usize = 5;

#[derive(Debug, Parser)]
#[command(name = "phc-cli")]
#[command(about = "Public Holiday Catalog command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh the holiday catalog for one year.
    UpdateHolidays {
        #[arg(long)]
        year: i32,
        /// Refresh a single country (any identifier form).
        #[arg(long, conflicts_with = "auto")]
        country: Option<String>,
        /// Refresh every country in use per the employee directory.
        #[arg(long)]
        auto: bool,
        /// Keep existing records and only add or retire by identity key.
        #[arg(long)]
        incremental: bool,
    },
    /// Print per-year catalog counts by holiday type and country.
    Stats {
        #[arg(long)]
        year: i32,
    },
    /// Apply catalog database migrations.
    Migrate,
    /// Run the cron-driven refresh until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();

    let cli = Cli::parse();

    match cli.command {
        Commands::UpdateHolidays {
            year,
            country,
            auto,
            incremental,
        } => {
            if country.is_none() && !auto {
                bail!("pass --country <C> or --auto");
            }
            let result =
                phc_sync::run_refresh_from_env(year, !incremental, country.as_deref()).await?;
            println!("{}", result.summary(MAX_SUMMARY_ERRORS));
        }
        Commands::Stats { year } => {
            let stats = phc_sync::run_statistics_from_env(year).await?;
            println!("catalog {}: {} active holidays", stats.year, stats.total);
            for (holiday_type, count) in &stats.by_type {
                println!("  {holiday_type}: {count}");
            }
            for (country, count) in &stats.by_country {
                println!("  {country}: {count}");
            }
        }
        Commands::Migrate => {
            phc_sync::run_migrations_from_env().await?;
            println!("migrations applied");
        }
        Commands::Schedule => {
            let config = phc_sync::EngineConfig::from_env();
            let pipeline = phc_sync::build_pipeline_from_env(&config).await?;
            let Some(mut scheduler) = phc_sync::maybe_build_scheduler(pipeline, &config).await?
            else {
                bail!("set PHC_SCHEDULER_ENABLED=1 to run the scheduler");
            };
            scheduler.start().await?;
            println!("scheduler running; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            scheduler.shutdown().await?;
        }
    }

    Ok(())
}
