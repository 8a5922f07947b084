use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use barrio_pipeline::config::PipelineSettings;
use barrio_pipeline::error::PipelineError;
use barrio_pipeline::hedonic::artifact::{self, HedonicModelArtifact};
use barrio_pipeline::hedonic::dataset::load_observations;
use barrio_pipeline::hedonic::HedonicTrainer;
use barrio_pipeline::logging;
use barrio_pipeline::metrics;
use barrio_pipeline::pipeline::ingestion::criticality::Criticality;
use barrio_pipeline::pipeline::processing::normalize::NormalizationRegistry;
use barrio_pipeline::pipeline::storage::StarSchemaStore;
use barrio_pipeline::pipeline::{PipelineRunner, RunReport};

#[derive(Parser)]
#[command(name = "barrio_pipeline")]
#[command(about = "Barcelona barrio housing ETL and hedonic price model")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML settings file (defaults to ./pipeline.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every manifest extract and rewrite the fact tables
    Run {
        /// Override the raw extract directory
        #[arg(long)]
        raw_dir: Option<PathBuf>,
    },
    /// Train the hedonic price model from the persisted fact tables
    Train,
    /// List the registered sources and their criticality
    Sources,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match PipelineSettings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Commands::Run { raw_dir: Some(dir) } = &cli.command {
        settings.paths.raw_dir = dir.clone();
    }

    logging::init_logging(&settings.paths.log_dir);
    let recorder = metrics::install_recorder();

    let result = match cli.command {
        Commands::Run { .. } => run(&settings),
        Commands::Train => train(&settings),
        Commands::Sources => sources(&settings),
    };

    if let Some(handle) = recorder {
        let snapshot = metrics_snapshot_path(&settings);
        if let Err(e) = metrics::write_snapshot(&handle, &snapshot) {
            warn!("Failed to write metrics snapshot {}: {}", snapshot.display(), e);
        }
    }

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn metrics_snapshot_path(settings: &PipelineSettings) -> PathBuf {
    settings
        .paths
        .load_log
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("metrics.prom")
}

fn open_store(settings: &PipelineSettings) -> anyhow::Result<StarSchemaStore> {
    StarSchemaStore::open(&settings.paths.database)
        .with_context(|| format!("Failed to open star schema at {}", settings.paths.database.display()))
}

fn run(settings: &PipelineSettings) -> anyhow::Result<ExitCode> {
    let mut store = open_store(settings)?;
    let mut runner = PipelineRunner::from_settings(settings);

    let report = runner
        .run(&mut store)
        .with_context(|| format!("Pipeline run over {} aborted", settings.paths.raw_dir.display()))?;
    print_run_report(&report);
    Ok(ExitCode::SUCCESS)
}

fn print_run_report(report: &RunReport) {
    println!("\n📊 Pipeline run {}", report.run_id);
    println!("   Manifest entries: {} ({} skipped)", report.manifest_entries, report.manifest_skipped.len());
    for source in &report.sources {
        println!(
            "   {} [{}]: {} input rows, {} normalized, {} records ({} null year, {} rejected, {} excluded keys)",
            source.source_name,
            source.dataset_id,
            source.input_rows,
            source.normalized_rows,
            source.records,
            source.dropped_null_year,
            source.rejected_rows,
            source.excluded_keys
        );
    }
    for table in &report.tables {
        println!("   {}: {} rows written from {}", table.table, table.rows_written, table.sources.join(", "));
    }

    let warnings = report.warnings_summary();
    if report.is_degraded() {
        println!("\n⚠️  Run completed degraded");
    } else {
        println!("\n✅ Run completed");
    }
    for warning in warnings {
        println!("   - {}", warning);
    }
}

fn train(settings: &PipelineSettings) -> anyhow::Result<ExitCode> {
    let store = open_store(settings)?;
    let config = settings.hedonic_config();
    let observations = load_observations(&store, &config, &settings.tags.separator)
        .context("Failed to assemble hedonic observations")?;

    let verdict = match HedonicTrainer::new(config).train(&observations) {
        Ok(verdict) => verdict,
        Err(e) => {
            // Nothing is persisted; the previous accepted model stays current
            warn!("Hedonic training stopped: {}", e);
            return Err(PipelineError::from(e)).context("Hedonic training did not produce a model");
        }
    };

    let artifact = HedonicModelArtifact::from_verdict(&verdict);
    let path = artifact::persist(&store, &settings.paths.model_dir, &artifact)
        .context("Failed to persist model artifact")?;

    println!("\n{}", artifact.render_report());
    println!("Artifact: {}", path.display());

    if artifact.is_accepted() {
        info!("Model {} accepted", artifact.model_id);
        return Ok(ExitCode::SUCCESS);
    }

    match artifact::latest_accepted(&store) {
        Ok(Some(current)) => println!("Previous accepted model {} remains current", current.model_id),
        Ok(None) => println!("No accepted model is available"),
        Err(e) => warn!("Could not read the previous accepted model: {}", e),
    }
    Ok(ExitCode::from(2))
}

fn sources(settings: &PipelineSettings) -> anyhow::Result<ExitCode> {
    let registry = NormalizationRegistry::new();
    let policy = settings.criticality_policy();

    println!("Registered sources:");
    for source in registry.list_sources() {
        let kind = registry
            .get_normalizer(source)
            .map(|n| n.kind().to_string())
            .unwrap_or_default();
        let criticality = policy.classify(source);
        let marker = match criticality {
            Criticality::Critical => "!",
            Criticality::Optional => " ",
        };
        println!("  {} {:<16} {:<10} {}", marker, source, criticality, kind);
    }
    Ok(ExitCode::SUCCESS)
}
