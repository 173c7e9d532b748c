//! market-consensus CLI
//!
//! Runs one reconciliation over a fixture file (entities, plan templates and
//! recorded search answers) and prints the report as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use market_consensus::entity::{GeoEntitySpec, GeoRegistry};
use market_consensus::pipeline::{PlanTemplate, ReconciliationPipeline, TemplatePlanner};
use market_consensus::search::{ReplayRule, ReplaySearchProvider};
use market_consensus::storage::{FileTrustStore, TrustStore};
use market_consensus::{EngineConfig, GeoEntityId};

#[derive(Parser)]
#[command(name = "market-consensus", about = "Reconcile multi-source market data into consensus metrics")]
struct Cli {
    /// Fixture file: entities, plan templates and recorded search answers
    fixture: PathBuf,

    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long, env = "MARKET_CONSENSUS_CONFIG")]
    config: Option<PathBuf>,

    /// Durable trust log; trust feedback is kept across runs when set
    #[arg(long, env = "MARKET_CONSENSUS_TRUST_LOG")]
    trust_log: Option<PathBuf>,

    /// Age data relative to this date (YYYY-MM-DD) instead of today
    #[arg(long)]
    as_of: Option<NaiveDate>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

#[derive(Deserialize)]
struct Fixture {
    entities: Vec<GeoEntitySpec>,
    /// Entity names to reconcile; every entity when empty.
    #[serde(default)]
    targets: Vec<String>,
    plan: Vec<PlanTemplate>,
    #[serde(default)]
    rules: Vec<ReplayRule>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("market_consensus=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };
    let raw = std::fs::read_to_string(&cli.fixture)
        .map_err(|e| format!("cannot read fixture {}: {e}", cli.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&raw)?;

    let registry = GeoRegistry::from_specs(&fixture.entities)?;
    let targets = resolve_targets(&registry, &fixture.targets)?;
    tracing::info!(
        fixture = %cli.fixture.display(),
        entities = registry.len(),
        targets = targets.len(),
        rules = fixture.rules.len(),
        "Fixture loaded"
    );

    let store: Option<Arc<dyn TrustStore>> = match &cli.trust_log {
        Some(path) => Some(Arc::new(FileTrustStore::open(path, true)?)),
        None => None,
    };
    let pipeline = ReconciliationPipeline::from_config(
        config,
        registry,
        Arc::new(TemplatePlanner::new(fixture.plan)),
        Arc::new(ReplaySearchProvider::from_rules(fixture.rules)),
        store,
    )?;

    let report = match cli.as_of {
        Some(date) => {
            let noon = date.and_hms_opt(12, 0, 0).ok_or("invalid --as-of date")?;
            pipeline.run_at(&targets, Utc.from_utc_datetime(&noon)).await
        }
        None => pipeline.run(&targets).await,
    };

    let json = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{json}");
    Ok(())
}

fn resolve_targets(registry: &GeoRegistry, names: &[String]) -> Result<Vec<GeoEntityId>, String> {
    if names.is_empty() {
        return Ok(registry.entities().iter().map(|e| e.id).collect());
    }
    names
        .iter()
        .map(|name| {
            registry
                .entities()
                .into_iter()
                .find(|e| e.name.eq_ignore_ascii_case(name))
                .map(|e| e.id)
                .ok_or_else(|| format!("target '{name}' is not among the fixture entities"))
        })
        .collect()
}
