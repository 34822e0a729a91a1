use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ubi_reform::api::{AppState, run_http_server};
use ubi_reform::config::AnalysisConfig;
use ubi_reform::scenario::{ScenarioAnalyzer, ScenarioParams, ScenarioSettings, run_scenarios};
use ubi_reform::sim::StylisedEngine;

#[derive(Parser, Debug)]
#[command(name = "ubi-reform")]
#[command(about = "Revenue-neutral UBI reforms and their distributional impact")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the JSON API
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print every scenario of the reform table as JSON
    Table,

    /// Print one scenario's decile band table as JSON
    Bands {
        /// Scenario name, e.g. "Include children"
        #[arg(short, long, default_value = "Baseline")]
        scenario: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = AnalysisConfig::load_or_default(cli.config.as_deref())?;
    let analyzer = build_analyzer(&config)?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.server.port);
            run_http_server(AppState::new(analyzer), port)
                .await
                .context("HTTP server failed")?;
        }
        Commands::Table => {
            let grid = ScenarioParams::default_grid();
            let results = tokio::task::spawn_blocking(move || {
                run_scenarios(&analyzer, &grid)
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
            .context("scenario task failed")??;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Bands { scenario } => {
            let grid = ScenarioParams::default_grid();
            let params = ScenarioParams::find(&grid, &scenario).ok_or_else(|| {
                let names: Vec<&str> = grid.iter().map(|p| p.name.as_str()).collect();
                anyhow!("unknown scenario '{scenario}'; expected one of {names:?}")
            })?;
            let result = analyzer.run(params)?;
            println!("{}", serde_json::to_string_pretty(&result.summary.bands)?);
        }
    }

    Ok(())
}

fn build_analyzer(config: &AnalysisConfig) -> Result<ScenarioAnalyzer<StylisedEngine>> {
    let engine = config.engine()?;
    info!(
        people = engine.population().len(),
        weight = engine.weight(),
        "population loaded"
    );
    let settings = ScenarioSettings {
        calibration: config.calibration_config()?,
        granularity: config.calibration.weeks_per_year,
        bands: config.band_set()?,
    };
    ScenarioAnalyzer::new(engine, settings).context("failed to analyse baseline")
}
