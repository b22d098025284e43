//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing::{info, warn};

use vaultzero_core::peers::{index_corpus, load_corpus};
use vaultzero_core::{
    FinalReport, LazyPeerIndex, LlmSettings, Orchestrator, PeerIndex, Pipeline, PipelineProgress,
    RunOutcome, StageContext, WorkflowInput,
};
use vaultzero_feeds::{KevClient, KevFilter};
use vaultzero_llm::{AnthropicClient, ClientOptions};
use vaultzero_shared::{
    AppConfig, Pillar, VaultZeroError, expand_home, init_config, load_config, validate_api_key,
};
use vaultzero_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// VaultZero: Zero Trust maturity assessment.
#[derive(Parser)]
#[command(
    name = "vaultzero",
    version,
    about = "Score Zero Trust maturity, benchmark against peers, and plan the roadmap.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the questionnaire assessment.
    Assess {
        /// Answers file (TOML or JSON). Uses a built-in sample when omitted.
        #[arg(short, long)]
        answers: Option<PathBuf>,

        /// Report directory (defaults to `[defaults].output_dir`).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Assess uploaded architecture documents.
    Analyze {
        /// Documents to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Assessment mode recorded with the run.
        #[arg(short, long, default_value = "full")]
        mode: String,

        /// Report directory (defaults to `[defaults].output_dir`).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Peer benchmark corpus.
    Peers {
        #[command(subcommand)]
        action: PeersAction,
    },

    /// CISA Known Exploited Vulnerabilities feed.
    Kev {
        #[command(subcommand)]
        action: KevAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Peer corpus subcommands.
#[derive(Subcommand)]
pub(crate) enum PeersAction {
    /// Rebuild the peer index from a corpus file or the embedded corpus.
    Index {
        /// JSON corpus (defaults to `[benchmark].dataset`, then the embedded one).
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Find the peers most similar to a system description.
    Search {
        query: String,

        /// Number of peers (defaults to `[benchmark].top_k`).
        #[arg(short)]
        k: Option<u32>,
    },
}

/// KEV subcommands.
#[derive(Subcommand)]
pub(crate) enum KevAction {
    /// Entries added recently.
    Recent {
        /// Look back this many days.
        #[arg(long, default_value = "30")]
        days: u32,

        /// Entries added on or after this date (YYYY-MM-DD); overrides --days.
        #[arg(long)]
        since: Option<String>,

        /// Vendor substring, case-insensitive.
        #[arg(long)]
        vendor: Option<String>,

        /// Product substring, case-insensitive.
        #[arg(long)]
        product: Option<String>,

        /// Print at most this many entries.
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Catalog statistics.
    Stats {
        /// Vendors listed.
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "vaultzero=info",
        1 => "vaultzero=debug",
        _ => "vaultzero=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Assess { answers, out } => cmd_assess(answers.as_deref(), out.as_deref()).await,
        Command::Analyze { files, mode, out } => cmd_analyze(files, &mode, out.as_deref()).await,
        Command::Peers { action } => match action {
            PeersAction::Index { dataset } => cmd_peers_index(dataset).await,
            PeersAction::Search { query, k } => cmd_peers_search(&query, k).await,
        },
        Command::Kev { action } => match action {
            KevAction::Recent {
                days,
                since,
                vendor,
                product,
                limit,
            } => cmd_kev_recent(days, since.as_deref(), KevFilter { vendor, product }, limit).await,
            KevAction::Stats { top } => cmd_kev_stats(top).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Assessment commands
// ---------------------------------------------------------------------------

const SAMPLE_SYSTEM: &str = "Cloud-based enterprise SaaS application with customer data";

const SAMPLE_ANSWERS: [(Pillar, &str); 5] = [
    (
        Pillar::Identity,
        "Single sign-on with MFA enforced. RBAC implemented with quarterly reviews.",
    ),
    (
        Pillar::Devices,
        "Corporate devices with EDR. BYOD with MDM for contractors.",
    ),
    (
        Pillar::Networks,
        "Cloud infrastructure with security groups. Partial network segmentation.",
    ),
    (
        Pillar::Applications,
        "Security testing in CI/CD. Application monitoring and logging.",
    ),
    (
        Pillar::Data,
        "Data classification framework exists. Encryption at rest, partial in-transit.",
    ),
];

/// Questionnaire input file.
#[derive(Debug, Deserialize)]
struct AnswersFile {
    system_description: String,
    /// Pillar name → answer.
    answers: BTreeMap<String, String>,
}

fn load_answers(path: &Path) -> Result<WorkflowInput> {
    let text = std::fs::read_to_string(path).map_err(|e| VaultZeroError::io(path, e))?;
    let file: AnswersFile = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => toml::from_str(&text)?,
    };

    let mut answers = BTreeMap::new();
    for (key, answer) in file.answers {
        let pillar: Pillar = key.parse()?;
        answers.insert(pillar, answer);
    }
    if answers.is_empty() {
        return Err(eyre!("{} contains no answers", path.display()));
    }
    Ok(WorkflowInput::questionnaire(file.system_description, answers))
}

fn sample_input() -> WorkflowInput {
    let answers = SAMPLE_ANSWERS
        .iter()
        .map(|(pillar, answer)| (*pillar, answer.to_string()))
        .collect();
    WorkflowInput::questionnaire(SAMPLE_SYSTEM, answers)
}

async fn cmd_assess(answers: Option<&Path>, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let input = match answers {
        Some(path) => load_answers(path)?,
        None => {
            info!("no answers file given, using the built-in sample");
            sample_input()
        }
    };

    info!(
        pillars = input.answers.as_ref().map_or(0, BTreeMap::len),
        "starting questionnaire assessment"
    );
    run_pipeline(&config, Pipeline::questionnaire(), input, out).await
}

async fn cmd_analyze(files: Vec<PathBuf>, mode: &str, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    for file in &files {
        if !file.is_file() {
            return Err(eyre!("no such file: {}", file.display()));
        }
    }

    info!(files = files.len(), mode, "starting document assessment");
    run_pipeline(&config, Pipeline::documents(), WorkflowInput::documents(files, mode), out).await
}

async fn run_pipeline(
    config: &AppConfig,
    pipeline: Pipeline,
    input: WorkflowInput,
    out: Option<&str>,
) -> Result<()> {
    let api_key = validate_api_key(config)?;
    let client = AnthropicClient::new(ClientOptions::from_config(&config.anthropic, api_key))?;
    let output_dir = expand_home(out.unwrap_or(&config.defaults.output_dir));
    let progress = Arc::new(CliProgress::new());

    let ctx = StageContext::new(Arc::new(client), LlmSettings::from(&config.anthropic))
        .with_peers(Arc::new(LazyPeerIndex::from_config(&config.benchmark)))
        .with_top_k(config.benchmark.top_k)
        .with_output_dir(&output_dir)
        .with_progress(progress.clone());
    let orchestrator = Orchestrator::new(pipeline, ctx)
        .halt_on_parse_failure(config.pipeline.halt_on_parse_failure);

    let outcome = orchestrator.execute(input).await;
    progress.finish();

    match outcome {
        RunOutcome::Complete { report, .. } => {
            let json_path = if config.defaults.write_json {
                let filename = json_filename(&report);
                Some(report.write_json(&output_dir, &filename)?)
            } else {
                None
            };
            print_summary(&report, json_path.as_deref());
            Ok(())
        }
        RunOutcome::Failed { state, stage, error } => {
            let status = orchestrator.status(&state);
            warn!(
                stage = %stage,
                progress = status.progress,
                errors = status.errors.len(),
                "assessment aborted"
            );
            Err(VaultZeroError::stage_failed(stage, error).into())
        }
    }
}

/// Same stem as the Markdown report, or a timestamped name.
fn json_filename(report: &FinalReport) -> String {
    report
        .report_path
        .as_deref()
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .map(|stem| format!("{stem}.json"))
        .unwrap_or_else(|| format!("ZeroTrust_Assessment_{}.json", Utc::now().format("%Y%m%d_%H%M%S")))
}

fn print_summary(report: &FinalReport, json_path: Option<&Path>) {
    let summary = &report.summary;
    println!();
    println!("  Assessment complete!");
    println!(
        "  Maturity:    {} ({:.2}/5.0)",
        summary.current_maturity, summary.overall_score
    );
    for analysis in report.pillars.values() {
        let marker = if analysis.degraded { "  (manual review)" } else { "" };
        println!(
            "    {:<28} {:.1}{marker}",
            analysis.pillar.display_name(),
            analysis.score()
        );
    }
    if let Some(p) = summary.peer_percentile {
        println!("  Percentile:  {p:.0}");
    }
    if let Some(c) = summary.compliance_percentage {
        println!("  Compliance:  {c:.1}%");
    }
    if let Some(target) = summary.target_maturity {
        println!("  Target:      {target} (24 months)");
    }
    if let Some(range) = &summary.investment_range {
        println!("  Investment:  {range}");
    }
    if !summary.top_recommendations.is_empty() {
        println!("  Top recommendations:");
        for (i, rec) in summary.top_recommendations.iter().enumerate() {
            println!("    {}. {rec}", i + 1);
        }
    }
    if let Some(path) = &report.report_path {
        println!("  Report:      {}", path.display());
    }
    if let Some(path) = json_path {
        println!("  JSON:        {}", path.display());
    }
    if !report.errors.is_empty() {
        println!("  Notes:       {} degraded result(s), see report", report.errors.len());
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl PipelineProgress for CliProgress {
    fn stage_started(&self, name: &str, index: usize, total: usize) {
        self.spinner
            .set_message(format!("[{}/{total}] {name}", index + 1));
    }

    fn subtask(&self, stage: &str, label: &str) {
        self.spinner.set_message(format!("{stage}: {label}"));
    }

    fn stage_finished(&self, name: &str, index: usize, total: usize) {
        self.spinner
            .println(format!("  ✓ [{}/{total}] {name}", index + 1));
    }
}

// ---------------------------------------------------------------------------
// Peer corpus commands
// ---------------------------------------------------------------------------

async fn cmd_peers_index(dataset: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let dataset = dataset.or_else(|| config.benchmark.dataset.as_deref().map(expand_home));
    let database = expand_home(&config.benchmark.database);

    let corpus = load_corpus(dataset.as_deref())?;
    let storage = Storage::open(&database).await?;
    storage.clear_peers().await?;
    let indexed = index_corpus(&storage, &corpus).await?;

    info!(peers = indexed, path = %database.display(), "peer index rebuilt");
    println!("Indexed {indexed} peer assessments into {}", database.display());
    Ok(())
}

async fn cmd_peers_search(query: &str, k: Option<u32>) -> Result<()> {
    let config = load_config()?;
    let index = LazyPeerIndex::from_config(&config.benchmark);
    let peers = index.search(query, k.unwrap_or(config.benchmark.top_k)).await?;

    if peers.is_empty() {
        println!("No similar systems found.");
        return Ok(());
    }
    for (i, peer) in peers.iter().enumerate() {
        println!(
            "{}. {} ({}) - {} [rank {:.3}]",
            i + 1,
            peer.system_id,
            peer.system_type,
            peer.overall_maturity,
            peer.similarity_score
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// KEV commands
// ---------------------------------------------------------------------------

async fn cmd_kev_recent(
    days: u32,
    since: Option<&str>,
    filter: KevFilter,
    limit: usize,
) -> Result<()> {
    let config = load_config()?;
    let client = KevClient::from_config(&config.feeds)?;

    let entries = match since {
        Some(date) => {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| eyre!("invalid date '{date}': {e}"))?;
            client.added_since(date, &filter).await?
        }
        None => client.recent(days, &filter).await?,
    };

    println!("{} known exploited vulnerabilities", entries.len());
    for entry in entries.iter().take(limit) {
        let ransomware = if entry.ransomware_known() { " [ransomware]" } else { "" };
        println!(
            "  {} {} {} - {}{ransomware}",
            entry.date_added, entry.cve_id, entry.vendor_project, entry.product
        );
    }
    if entries.len() > limit {
        println!("  ... {} more", entries.len() - limit);
    }
    Ok(())
}

async fn cmd_kev_stats(top: usize) -> Result<()> {
    let config = load_config()?;
    let client = KevClient::from_config(&config.feeds)?;
    let stats = client.stats(top).await?;

    println!("KEV catalog {} ({})", stats.catalog_version, stats.date_released);
    println!("  Total:              {}", stats.total);
    println!("  Known ransomware:   {}", stats.ransomware_known);
    println!("  Top vendors:");
    for (vendor, count) in &stats.top_vendors {
        println!("    {vendor:<30} {count}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
