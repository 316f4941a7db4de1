use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use usage_ledger::aggregator::{parse_date_filter, DateRange, Granularity, SortOrder};
use usage_ledger::blocks::TokenLimit;
use usage_ledger::config::Config;
use usage_ledger::cost::{CostMode, UnknownModelPolicy};
use usage_ledger::display::{json_error, DisplayManager};
use usage_ledger::logging::init_logging;
use usage_ledger::{AnalysisOptions, FileDiscovery, PricingTable, UsageAnalyzer};

#[derive(Parser)]
#[command(name = "usage-ledger")]
#[command(about = "Usage and cost reports from coding-assistant JSONL logs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Clone, Default)]
struct CommonArgs {
    /// Output in JSON format
    #[arg(long)]
    json: bool,
    /// Cost mode: auto, calculate or display
    #[arg(long)]
    mode: Option<CostMode>,
    /// What to do with models that have no pricing: zero or omit
    #[arg(long)]
    unknown_model: Option<UnknownModelPolicy>,
    /// Start date filter (YYYYMMDD or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_filter)]
    since: Option<NaiveDate>,
    /// End date filter (YYYYMMDD or YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_filter)]
    until: Option<NaiveDate>,
    /// Sort order: asc or desc
    #[arg(long)]
    order: Option<SortOrder>,
    /// Reporting timezone (IANA name)
    #[arg(long)]
    timezone: Option<String>,
    /// Use the built-in pricing table instead of fetching the catalog
    #[arg(long)]
    offline: bool,
    /// Load pricing from a LiteLLM-format JSON file
    #[arg(long)]
    pricing_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show usage grouped by day
    Daily {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show usage grouped by month
    Monthly {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show usage grouped by session
    Session {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show reconstructed billing blocks
    Blocks {
        #[command(flatten)]
        common: CommonArgs,
        /// Only the active block
        #[arg(long)]
        active: bool,
        /// Only blocks from the last N days (default 3) plus the active one
        #[arg(long, num_args = 0..=1, default_missing_value = "3")]
        recent: Option<i64>,
        /// Token limit for the active block: a number or 'max'
        #[arg(long)]
        token_limit: Option<TokenLimit>,
        /// Block length in hours
        #[arg(long)]
        session_length: Option<f64>,
        /// Idle gap in minutes that closes a block
        #[arg(long)]
        gap: Option<i64>,
        /// Reconstruct blocks per session instead of one timeline
        #[arg(long)]
        per_session: bool,
    },
}

impl Commands {
    fn common(&self) -> &CommonArgs {
        match self {
            Commands::Daily { common }
            | Commands::Monthly { common }
            | Commands::Session { common }
            | Commands::Blocks { common, .. } => common,
        }
    }

    fn granularity(&self) -> Granularity {
        match self {
            Commands::Daily { .. } => Granularity::Daily,
            Commands::Monthly { .. } => Granularity::Monthly,
            Commands::Session { .. } => Granularity::Session,
            Commands::Blocks { .. } => Granularity::Block,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Daily {
        common: CommonArgs::default(),
    });
    let json = command.common().json;

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => return handle_error(e, json),
    };

    let _guard = match init_logging(&config.logging, &config.paths.log_directory) {
        Ok(guard) => guard,
        Err(e) => return handle_error(e, json),
    };

    match run(command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => handle_error(e, json),
    }
}

async fn run(command: Commands, mut config: Config) -> Result<()> {
    let granularity = command.granularity();
    let common = command.common().clone();
    apply_cli_overrides(&command, &mut config);
    config.validate()?;

    if config.processing.parallel_threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(config.processing.parallel_threads)
            .build_global()
        {
            warn!(error = %e, "Could not size the reader thread pool");
        }
    }

    let discovery = FileDiscovery::resolve(
        config.paths.claude_config_dir.as_deref(),
        &FileDiscovery::default_roots(),
    )?;
    let sources = discovery.find_sources();
    info!(roots = discovery.roots().len(), sources = sources.len(), "Discovered usage sources");

    let pricing = load_pricing(&config).await?;

    let mut options = AnalysisOptions {
        cost_mode: config.cost.mode,
        unknown_model: config.cost.unknown_model,
        deduplicate: config.processing.deduplicate,
        blocks: config.block_config()?,
        block_scope: config.block_scope(),
        timezone: config.timezone()?,
        range: DateRange::new(common.since, common.until),
        order: config.report.order,
        now: Utc::now(),
        ..AnalysisOptions::default()
    };
    if let Commands::Blocks {
        active,
        recent,
        token_limit,
        ..
    } = &command
    {
        options.active_only = *active;
        options.recent_days = *recent;
        options.token_limit = *token_limit;
    }

    let analyzer = UsageAnalyzer::new(pricing, options);
    let report = tokio::task::spawn_blocking(move || analyzer.analyze_sources(sources, granularity))
        .await
        .context("Analysis task failed")??;

    DisplayManager::new().print(&report, common.json, config.report.json_pretty)
}

fn apply_cli_overrides(command: &Commands, config: &mut Config) {
    let common = command.common();
    if let Some(mode) = common.mode {
        config.cost.mode = mode;
    }
    if let Some(policy) = common.unknown_model {
        config.cost.unknown_model = policy;
    }
    if let Some(order) = common.order {
        config.report.order = order;
    }
    if let Some(timezone) = &common.timezone {
        config.report.timezone = timezone.clone();
    }
    if common.offline {
        config.pricing.offline = true;
    }
    if let Some(path) = &common.pricing_file {
        config.pricing.file = Some(path.clone());
    }

    if let Commands::Blocks {
        session_length,
        gap,
        per_session,
        ..
    } = command
    {
        if let Some(hours) = session_length {
            config.blocks.session_length_hours = *hours;
        }
        if let Some(minutes) = gap {
            config.blocks.gap_minutes = *minutes;
        }
        if *per_session {
            config.blocks.per_session = true;
        }
    }
}

async fn load_pricing(config: &Config) -> Result<PricingTable> {
    if let Some(path) = &config.pricing.file {
        let mut table = PricingTable::load_file(path)?;
        table.merge_missing(&PricingTable::builtin());
        return Ok(table);
    }

    // Display mode never computes a cost, so there is nothing to fetch.
    if config.pricing.offline || config.cost.mode == CostMode::Display {
        return Ok(PricingTable::builtin());
    }

    #[cfg(feature = "pricing")]
    match usage_ledger::litellm_pricing::fetch_with_builtin_fallback(&config.pricing.url).await {
        Ok(table) => return Ok(table),
        Err(e) => warn!(error = %format!("{:#}", e), "Falling back to built-in pricing"),
    }

    Ok(PricingTable::builtin())
}

fn handle_error(e: anyhow::Error, json: bool) -> ExitCode {
    if json {
        println!("{}", json_error(&e));
    } else {
        eprintln!("Error: {:#}", e);
    }
    ExitCode::FAILURE
}
