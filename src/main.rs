use clap::{Parser, Subcommand};
use offtake_etl::adapter::CsvAdapter;
use offtake_etl::config::Config;
use offtake_etl::domain::AuditStatus;
use offtake_etl::error::{EtlError, Result};
use offtake_etl::logging;
use offtake_etl::pipeline::{BatchOutcome, Pipeline};
use offtake_etl::store::CdmStore;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "offtake_etl")]
#[command(about = "Store-level retail offtake ETL pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate, harmonize and load one file or every *.csv in a directory
    Process {
        /// Input file or directory
        input: PathBuf,
        /// Leave processed files in place instead of archiving them
        #[arg(long)]
        no_archive: bool,
    },
    /// Register or update a retailer SKU -> reference SKU mapping
    MapSku {
        retailer_sku: String,
        reference_sku: String,
    },
}

fn collect_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(input)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
        .collect();
    files.sort();
    Ok(files)
}

fn archive_file(path: &Path, archive_dir: &str) -> Result<()> {
    let Some(name) = path.file_name() else {
        return Ok(());
    };
    std::fs::create_dir_all(archive_dir)?;
    let target = Path::new(archive_dir).join(name);
    std::fs::rename(path, &target)?;
    info!(from = %path.display(), to = %target.display(), "archived");
    Ok(())
}

fn print_outcome(outcome: &BatchOutcome) {
    println!("\n📊 {} — {}", outcome.file_name, outcome.status.as_str());
    println!("   Total records: {}", outcome.records_total);
    println!("   Accepted:      {}", outcome.records_accepted);
    println!("   Rejected:      {}", outcome.records_rejected);
    let failed: Vec<&str> = outcome
        .validations
        .iter()
        .filter(|v| !v.passed)
        .map(|v| v.check_name.as_str())
        .collect();
    if !failed.is_empty() {
        println!("   ⚠️  Checks flagged: {}", failed.join(", "));
    }
}

fn process_path(
    pipeline: &Pipeline,
    store: &mut CdmStore,
    path: &Path,
    archive_dir: Option<&str>,
) -> Result<()> {
    let span = tracing::info_span!("process_file", file = %path.display());
    let _enter = span.enter();

    let (file_name, content, rows) = match CsvAdapter::read_file(path) {
        Ok(parsed) => parsed,
        Err(EtlError::UnreadableContent(reason)) => {
            warn!(file = %path.display(), %reason, "unreadable content");
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("?");
            let content = std::fs::read(path).unwrap_or_default();
            let outcome = pipeline.fail_unreadable(store, file_name, &content, &reason)?;
            print_outcome(&outcome);
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let outcome = pipeline.process_batch(store, &file_name, &content, rows)?;
    print_outcome(&outcome);

    if let Some(dir) = archive_dir {
        // Failures stay in place for correction and resubmission
        if outcome.status != AuditStatus::Failed {
            archive_file(path, dir)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Process { input, no_archive } => {
            let mut store = CdmStore::open(&config.store.db_path)?;
            let pipeline = Pipeline::new(config.clone());
            let archive_dir = if no_archive {
                None
            } else {
                Some(config.store.archive_dir.as_str())
            };

            let files = collect_inputs(&input)?;
            if files.is_empty() {
                println!("No input files found under {}", input.display());
                return Ok(());
            }
            for path in &files {
                if let Err(e) = process_path(&pipeline, &mut store, path, archive_dir) {
                    error!(file = %path.display(), error = %e, "pipeline failed");
                    println!("❌ {}: {}", path.display(), e);
                }
            }
        }
        Commands::MapSku {
            retailer_sku,
            reference_sku,
        } => {
            let store = CdmStore::open(&config.store.db_path)?;
            store.upsert_sku_mapping(&retailer_sku, &reference_sku)?;
            println!("Mapped {} -> {}", retailer_sku, reference_sku);
        }
    }
    Ok(())
}
