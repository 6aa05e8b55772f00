//! Command-line interface for fhir-graph.
//!
//! `run` traverses a GraphDefinition into the local cache, `summarize` and
//! `counts` report on what the cache holds.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use tracing::{debug, error};

use crate::aggregate::Aggregator;
use crate::config::{normalize_base_url, FhirGraphConfig, DEFAULT_DB_PATH};
use crate::graph::{GraphDefinition, GraphDefinitionSource, TraversalEngine, TraversalReport};
use crate::observability::{default_log_file, init_logging};
use crate::progress::SpinnerReporter;
use crate::query::{ExecutorOptions, QueryExecutor};
use crate::store::ResourceStore;

/// Follow a FHIR GraphDefinition across a FHIR server and cache the results
#[derive(Parser)]
#[command(name = "fhir-graph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a GraphDefinition traversal from a starting query
    Run(RunArgs),

    /// Print per-type counts and reference counts as YAML
    Summarize(DbArgs),

    /// Print per-type resource counts as JSON
    Counts(DbArgs),
}

#[derive(Args)]
struct RunArgs {
    /// GraphDefinition file (.json/.yaml) or the id of one on the server
    graph_definition: String,

    /// Starting search, e.g. "/ResearchStudy?identifier=phs001234"
    fhir_query: String,

    /// Base URL of the FHIR server
    #[arg(long, env = "FHIR_BASE")]
    fhir_base_url: Option<String>,

    /// SQLite database the resources are cached in
    #[arg(long)]
    db_path: Option<String>,

    /// YAML config file with traversal and HTTP settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate the GraphDefinition and exit
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log file (defaults to the per-user data directory)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct DbArgs {
    /// SQLite database to read
    #[arg(long, default_value = DEFAULT_DB_PATH)]
    db_path: String,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_traversal(args).await,
        Commands::Summarize(args) => summarize(&args.db_path),
        Commands::Counts(args) => counts(&args.db_path),
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn run_traversal(args: RunArgs) -> Result<()> {
    let log_file = args.log_file.clone().unwrap_or_else(default_log_file);
    init_logging(args.debug, Some(&log_file)).context("failed to set up logging")?;

    let result = execute_run(&args).await;
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "run failed");
        eprintln!("{} {e:#}", style("Error:").red().bold());
    }
    result
}

async fn execute_run(args: &RunArgs) -> Result<()> {
    let mut config = FhirGraphConfig::load_or_default(args.config.as_deref())
        .context("failed to load config")?;
    if let Some(url) = &args.fhir_base_url {
        config.server.base_url = Some(url.clone());
    }
    if let Some(path) = &args.db_path {
        config.database.path = path.clone();
    }
    let Some(base_url) = config.server.base_url.as_deref().map(normalize_base_url) else {
        bail!("no FHIR server given: pass --fhir-base-url or set FHIR_BASE");
    };

    let db_path = config.database.path.clone();
    if Path::new(&db_path).exists() {
        eprintln!(
            "{}",
            style(format!(
                "Warning: database {db_path} already exists, new resources will be added to it"
            ))
            .yellow()
        );
    }
    debug!(db_path = %db_path, base_url = %base_url, "opening store");

    let store = ResourceStore::new(&db_path)
        .with_context(|| format!("failed to open database {db_path}"))?;
    let report = traverse(&store, &config, &base_url, args).await?;
    store.close()?;

    let Some(report) = report else {
        return Ok(());
    };
    eprintln!(
        "Aggregated Results: {}",
        serde_json::to_string(&report.counts)?
    );
    eprintln!("Metrics: {}", serde_json::to_string(&report.metrics)?);
    eprintln!("database available at: {db_path}");
    Ok(())
}

/// Load the definition and walk it. `None` for a dry run.
async fn traverse(
    store: &ResourceStore,
    config: &FhirGraphConfig,
    base_url: &str,
    args: &RunArgs,
) -> Result<Option<TraversalReport>> {
    let executor = QueryExecutor::new(store, ExecutorOptions::from(&config.http))?;

    let source = GraphDefinitionSource::resolve(&args.graph_definition);
    let definition: GraphDefinition = source
        .load(&executor, base_url)
        .await
        .with_context(|| format!("failed to load GraphDefinition {}", args.graph_definition))?;
    eprintln!("{} is a valid GraphDefinition", definition.label());
    if args.dry_run {
        eprintln!("Dry run mode enabled. Exiting.");
        return Ok(None);
    }

    let spinner = SpinnerReporter::new(&format!("Running {} traversal", definition.label()));
    let engine = TraversalEngine::new(&executor, base_url, (&config.traversal).into())
        .with_reporter(&spinner);
    let result = engine.run(&definition, Some(args.fhir_query.as_str())).await;
    match &result {
        Ok(_) => spinner.close(&format!("{} traversal complete", definition.label())),
        Err(_) => spinner.close(&format!("{} traversal failed", definition.label())),
    }
    Ok(Some(result?))
}

// ---------------------------------------------------------------------------
// summarize / counts
// ---------------------------------------------------------------------------

fn open_existing(db_path: &str) -> Result<ResourceStore> {
    if !Path::new(db_path).exists() {
        bail!("no database at {db_path}, run a traversal first");
    }
    ResourceStore::new(db_path).with_context(|| format!("failed to open database {db_path}"))
}

fn summarize(db_path: &str) -> Result<()> {
    let store = open_existing(db_path)?;
    let summary = Aggregator::new(&store).summarize()?;
    print!("{}", serde_yaml::to_string(&summary)?);
    Ok(())
}

fn counts(db_path: &str) -> Result<()> {
    let store = open_existing(db_path)?;
    println!("{}", serde_json::to_string_pretty(&store.counts_by_type()?)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "fhir-graph",
            "run",
            "graph.yaml",
            "/ResearchStudy?identifier=phs001",
            "--fhir-base-url",
            "http://localhost:8080/fhir",
            "--db-path",
            "/tmp/x.sqlite",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.graph_definition, "graph.yaml");
                assert_eq!(args.fhir_query, "/ResearchStudy?identifier=phs001");
                assert_eq!(args.fhir_base_url.as_deref(), Some("http://localhost:8080/fhir"));
                assert_eq!(args.db_path.as_deref(), Some("/tmp/x.sqlite"));
                assert!(args.dry_run);
                assert!(!args.debug);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn summarize_defaults_db_path() {
        let cli = Cli::try_parse_from(["fhir-graph", "summarize"]).unwrap();
        match cli.command {
            Commands::Summarize(args) => assert_eq!(args.db_path, DEFAULT_DB_PATH),
            _ => panic!("expected summarize"),
        }
    }

    #[test]
    fn open_existing_rejects_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.sqlite");
        assert!(open_existing(missing.to_str().unwrap()).is_err());
    }

    #[test]
    fn counts_and_summarize_read_a_populated_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.sqlite");
        let path = path.to_str().unwrap();
        {
            let store = ResourceStore::new(path).unwrap();
            store
                .insert_document(serde_json::json!({"resourceType": "Patient", "id": "1"}))
                .unwrap();
            store.close().unwrap();
        }
        counts(path).unwrap();
        summarize(path).unwrap();
    }
}
