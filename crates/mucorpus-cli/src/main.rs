//! MuCorpus CLI
//!
//! Curator and administration interface for the misuse corpus:
//! - Ingesting example records (JSON / JSONL) and benchmark-style directories
//! - Superseding an example with a corrected version
//! - Managing the pattern taxonomy
//! - Exporting the cross-project index, stats and re-validation reports
//!
//! It administers the corpus; browsing detector findings is out of scope.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use mucorpus_ingest::{import_dir, load_records, BatchReport, DatasetCatalog, Ingestor};
use mucorpus_model::{ExampleKey, ExampleRecord};
use mucorpus_query::{parse_filter, revalidate, write_index, QueryEngine};
use mucorpus_store::{ScanFilter, StoreConfig};
use mucorpus_taxonomy::PatternCategory;

mod config;
mod logging;

use config::EngineConfig;

#[derive(Parser)]
#[command(name = "mucorpus")]
#[command(author, version, about = "MuCorpus: API-misuse example corpus")]
struct Cli {
    /// Engine configuration file (JSON). Missing file means defaults.
    #[arg(long, global = true, default_value = "mucorpus.json")]
    config: PathBuf,

    /// Use an append-only log at this path as the store (overrides config;
    /// default `mucorpus.log`).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Taxonomy JSON file (overrides config).
    #[arg(long, global = true)]
    taxonomy: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest records from a JSON array or JSONL file.
    Ingest {
        input: PathBuf,
        /// Exit with an error if any record is rejected.
        #[arg(long)]
        strict: bool,
        /// Print the batch report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Import a `<project>/misuses/<id>/patterns/<Pattern>.<ext>` tree.
    ImportDir {
        root: PathBuf,
        /// Restrict the import to one dataset from the catalog.
        #[arg(long, requires = "datasets")]
        dataset: Option<String>,
        /// Dataset catalog (`datasets.json`).
        #[arg(long)]
        datasets: Option<PathBuf>,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        json: bool,
    },

    /// Commit a corrected record and mark the old example as superseded.
    Supersede {
        /// Old key as `project:misuseId:patternName`.
        old: ExampleKey,
        /// File holding the corrected record (single JSON object).
        corrected: PathBuf,
    },

    /// Print one example as JSON.
    Get { key: ExampleKey },

    /// Print matching examples as JSON lines.
    Query {
        /// Filter mapping, e.g. '{"project": "mqtt", "patternName": "any"}'.
        #[arg(long, default_value = "")]
        filter: String,
    },

    /// Pattern taxonomy administration.
    Taxonomy {
        #[command(subcommand)]
        command: TaxonomyCommands,
    },

    /// Report current examples that no longer classify under the taxonomy.
    Revalidate,

    /// Write the cross-project index (TSV).
    Index {
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long, default_value = "")]
        filter: String,
    },

    /// Print countByPattern and listProjects as JSON.
    Stats,
}

#[derive(Subcommand)]
enum TaxonomyCommands {
    /// List categories with their markers.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Register a new category.
    Register {
        name: String,
        /// Required API marker (repeatable).
        #[arg(short, long = "marker")]
        markers: Vec<String>,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Close a category to new ingestion.
    Deactivate { name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.log_json);

    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(path) = cli.store {
        config.store = StoreConfig::File { path };
    }
    if let Some(path) = cli.taxonomy {
        config.taxonomy_path = Some(path);
    }

    match cli.command {
        Commands::Ingest {
            input,
            strict,
            json,
        } => cmd_ingest(&config, &input, strict, json),
        Commands::ImportDir {
            root,
            dataset,
            datasets,
            strict,
            json,
        } => cmd_import_dir(&config, &root, dataset.as_deref(), datasets.as_deref(), strict, json),
        Commands::Supersede { old, corrected } => cmd_supersede(&config, &old, &corrected),
        Commands::Get { key } => cmd_get(&config, &key),
        Commands::Query { filter } => cmd_query(&config, &filter),
        Commands::Taxonomy { command } => cmd_taxonomy(&config, command),
        Commands::Revalidate => cmd_revalidate(&config),
        Commands::Index { out, filter } => cmd_index(&config, out.as_deref(), &filter),
        Commands::Stats => cmd_stats(&config),
    }
}

// ============================================================================
// Ingestion
// ============================================================================

fn ingestor(config: &EngineConfig) -> Result<Ingestor> {
    Ok(Ingestor::with_config(
        config.open_durable_store()?,
        config.ingest_config(),
    ))
}

fn print_batch(report: &BatchReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "  {} {} committed, {} unchanged, {} rejected",
        "→".cyan(),
        report.committed,
        report.unchanged,
        report.rejected.len()
    );
    for rejection in &report.rejected {
        println!(
            "  {} {} [{}{}] {}",
            "✗".red().bold(),
            rejection.record,
            rejection.kind,
            rejection
                .field
                .as_deref()
                .map(|f| format!(" on {f}"))
                .unwrap_or_default(),
            rejection.message
        );
    }
    Ok(())
}

fn finish_batch(report: &BatchReport, strict: bool) -> Result<()> {
    if strict && !report.rejected.is_empty() {
        bail!("{} record(s) rejected", report.rejected.len());
    }
    Ok(())
}

fn cmd_ingest(config: &EngineConfig, input: &Path, strict: bool, json: bool) -> Result<()> {
    if !json {
        println!("{} records from {}", "Ingesting".green().bold(), input.display());
    }
    let records = load_records(input)?;
    let taxonomy = config.load_taxonomy()?.snapshot();
    let report = ingestor(config)?.ingest_batch(records, &taxonomy);
    print_batch(&report, json)?;
    finish_batch(&report, strict)
}

fn cmd_import_dir(
    config: &EngineConfig,
    root: &Path,
    dataset: Option<&str>,
    datasets: Option<&Path>,
    strict: bool,
    json: bool,
) -> Result<()> {
    let whitelist = match (dataset, datasets) {
        (Some(name), Some(catalog)) => Some(DatasetCatalog::load(catalog)?.whitelist(name)?),
        _ => None,
    };
    if !json {
        println!(
            "{} corpus directory {}{}",
            "Importing".green().bold(),
            root.display(),
            dataset.map(|d| format!(" (dataset {d})")).unwrap_or_default()
        );
    }

    let taxonomy = config.load_taxonomy()?.snapshot();
    let report = import_dir(&ingestor(config)?, root, &taxonomy, whitelist.as_ref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for skipped in &report.skipped {
            println!(
                "  {} {}: {}",
                "skipped".yellow(),
                skipped.path.display(),
                skipped.reason
            );
        }
        print_batch(&report.batch, false)?;
    }
    finish_batch(&report.batch, strict)
}

fn cmd_supersede(config: &EngineConfig, old: &ExampleKey, corrected: &Path) -> Result<()> {
    let text = std::fs::read_to_string(corrected)
        .with_context(|| format!("reading {}", corrected.display()))?;
    let record: ExampleRecord = serde_json::from_str(&text)
        .with_context(|| format!("parsing corrected record {}", corrected.display()))?;
    let taxonomy = config.load_taxonomy()?.snapshot();

    let receipt = ingestor(config)?.supersede(old, record, &taxonomy)?;
    println!(
        "{} {} {} {}",
        "ok".green().bold(),
        old,
        "superseded by".dimmed(),
        receipt.key.to_string().bold()
    );
    Ok(())
}

// ============================================================================
// Queries
// ============================================================================

fn cmd_get(config: &EngineConfig, key: &ExampleKey) -> Result<()> {
    let example = config.open_store()?.get(key)?;
    println!("{}", serde_json::to_string_pretty(&example)?);
    Ok(())
}

fn cmd_query(config: &EngineConfig, filter: &str) -> Result<()> {
    let filter = parse_filter(filter)?;
    let engine = QueryEngine::new(config.open_store()?);
    for example in engine.scan(filter) {
        println!("{}", serde_json::to_string(&example?)?);
    }
    Ok(())
}

fn cmd_index(config: &EngineConfig, out: Option<&Path>, filter: &str) -> Result<()> {
    let filter: ScanFilter = parse_filter(filter)?;
    let store = config.open_store()?;
    match out {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            let lines = write_index(&store, filter, io::BufWriter::new(file))?;
            eprintln!(
                "{} {} ({} lines)",
                "wrote".green().bold(),
                path.display().to_string().bold(),
                lines
            );
        }
        None => {
            write_index(&store, filter, io::stdout().lock())?;
        }
    }
    Ok(())
}

fn cmd_stats(config: &EngineConfig) -> Result<()> {
    let engine = QueryEngine::new(config.open_store()?);
    println!("{}", serde_json::to_string_pretty(&engine.stats()?)?);
    Ok(())
}

fn cmd_revalidate(config: &EngineConfig) -> Result<()> {
    let taxonomy = config.load_taxonomy()?.snapshot();
    let report = revalidate(&config.open_store()?, &taxonomy)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        eprintln!(
            "{} {} of {} examples fail under taxonomy v{}",
            "warning:".yellow().bold(),
            report.failures.len(),
            report.checked,
            report.taxonomy_version
        );
    }
    Ok(())
}

// ============================================================================
// Taxonomy
// ============================================================================

fn cmd_taxonomy(config: &EngineConfig, command: TaxonomyCommands) -> Result<()> {
    let registry = config.load_taxonomy()?;
    match command {
        TaxonomyCommands::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&registry.to_file())?);
                return Ok(());
            }
            let snapshot = registry.snapshot();
            println!("{} v{}", "Taxonomy".bold(), snapshot.version());
            for category in snapshot.categories() {
                let status = if category.active {
                    "active".green()
                } else {
                    "inactive".red()
                };
                println!(
                    "  {} [{}] markers: {}",
                    category.name.bold(),
                    status,
                    if category.required_api_markers.is_empty() {
                        "(any)".to_string()
                    } else {
                        category.required_api_markers.join(", ")
                    }
                );
            }
        }
        TaxonomyCommands::Register {
            name,
            markers,
            description,
        } => {
            let version = registry.register(PatternCategory::new(name.clone(), markers, description))?;
            let path = config.save_taxonomy(&registry)?;
            println!(
                "{} registered {} (taxonomy v{}, {})",
                "ok".green().bold(),
                name.bold(),
                version,
                path.display()
            );
        }
        TaxonomyCommands::Deactivate { name } => {
            let version = registry.deactivate(&name)?;
            let path = config.save_taxonomy(&registry)?;
            println!(
                "{} deactivated {} (taxonomy v{}, {})",
                "ok".green().bold(),
                name.bold(),
                version,
                path.display()
            );
        }
    }
    Ok(())
}
