//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use buyergroup_classifier::RoleClassifier;
use buyergroup_core::{
    CompanyOutcome, Orchestrator, ProgressReporter, RunOptions, RunReport, UnitPipeline,
};
use buyergroup_providers::{
    CompanyDataProvider, HttpCompanyProvider, HttpPeopleProvider, PeopleDataProvider,
    SnapshotProvider,
};
use buyergroup_shared::{
    AppConfig, CheckpointBackend, CheckpointState, CompanyTarget, config_dir, expand_home,
    init_config, load_config, load_config_from, render_config, validate_api_keys,
};
use buyergroup_storage::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// buyergroup: map the purchasing committee of target companies.
#[derive(Parser)]
#[command(
    name = "buyergroup",
    version,
    about = "Discover, classify and reconcile the buyer group of target companies.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.buyergroup/buyergroup.toml).
    #[arg(long, global = true, env = "BUYERGROUP_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Run buyer-group discovery over a batch of companies.
    Run {
        /// JSON file with an array of `{"name": ..., "domain": ...}` targets.
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Company name target (repeatable).
        #[arg(long)]
        company: Vec<String>,

        /// Company domain or website target (repeatable).
        #[arg(long)]
        domain: Vec<String>,

        /// Use an offline JSON dataset instead of the HTTP providers.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Resume or name a specific run (derived from the batch by default).
        #[arg(long)]
        run_id: Option<String>,

        /// Re-queue units that failed in an earlier invocation of this run.
        #[arg(long)]
        retry_failed: bool,

        /// Also write the JSON run report to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show the checkpoint state of every unit in a run.
    Status {
        #[arg(long)]
        run_id: String,
    },

    /// Print the stored JSON report of a run.
    Report {
        #[arg(long)]
        run_id: String,
    },

    /// Show the current buyer group of a company.
    Group {
        /// Canonical company id.
        #[arg(long)]
        company_id: String,
    },

    /// Classify a job title with the configured rule table.
    Classify {
        title: String,

        #[arg(long)]
        department: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
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
        0 => "buyergroup=info",
        1 => "buyergroup=debug",
        _ => "buyergroup=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            input,
            company,
            domain,
            snapshot,
            run_id,
            retry_failed,
            report,
        } => {
            let targets = collect_targets(input.as_deref(), &company, &domain)?;
            let options = RunOptions {
                run_id,
                retry_failed,
            };
            cmd_run(
                config_path,
                &targets,
                snapshot.as_deref(),
                &options,
                report.as_deref(),
            )
            .await
        }
        Command::Status { run_id } => cmd_status(config_path, &run_id).await,
        Command::Report { run_id } => cmd_report(config_path, &run_id).await,
        Command::Group { company_id } => cmd_group(config_path, &company_id).await,
        Command::Classify { title, department } => {
            cmd_classify(config_path, &title, department.as_deref())
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn read_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    config.validate()?;
    Ok(config)
}

fn database_path(config: &AppConfig) -> Result<PathBuf> {
    Ok(expand_home(&config.workspace.database_path)?)
}

fn collect_targets(
    input: Option<&Path>,
    companies: &[String],
    domains: &[String],
) -> Result<Vec<CompanyTarget>> {
    let mut targets: Vec<CompanyTarget> = match input {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str(&raw)
                .wrap_err_with(|| format!("{} is not a JSON array of targets", path.display()))?
        }
        None => Vec::new(),
    };
    targets.extend(companies.iter().map(|c| CompanyTarget::new(Some(c), None)));
    targets.extend(domains.iter().map(|d| CompanyTarget::new(None, Some(d))));

    if targets.is_empty() {
        return Err(eyre!("no targets: pass --input, --company or --domain"));
    }
    Ok(targets)
}

fn checkpoint_store(
    config: &AppConfig,
    storage: &Arc<Storage>,
) -> Result<Arc<dyn CheckpointStore>> {
    let store: Arc<dyn CheckpointStore> = match config.orchestrator.checkpoint_backend {
        CheckpointBackend::Database => storage.clone(),
        CheckpointBackend::File => {
            let dir = match &config.orchestrator.checkpoint_dir {
                Some(dir) => expand_home(dir)?,
                None => config_dir()?.join("checkpoints"),
            };
            Arc::new(FileCheckpointStore::new(dir)?)
        }
        CheckpointBackend::Memory => Arc::new(MemoryCheckpointStore::new()),
    };
    Ok(store)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    targets: &[CompanyTarget],
    snapshot: Option<&Path>,
    options: &RunOptions,
    report_path: Option<&Path>,
) -> Result<()> {
    let config = read_config(config_path)?;

    let (company, people): (Arc<dyn CompanyDataProvider>, Arc<dyn PeopleDataProvider>) =
        match snapshot {
            Some(path) => {
                let provider = Arc::new(SnapshotProvider::load(
                    path,
                    config.providers.people.page_size as usize,
                )?);
                let company: Arc<dyn CompanyDataProvider> = provider.clone();
                let people: Arc<dyn PeopleDataProvider> = provider;
                (company, people)
            }
            None => {
                // Fail before any unit starts.
                validate_api_keys(&config)?;
                (
                    Arc::new(HttpCompanyProvider::from_config(&config.providers.company)?),
                    Arc::new(HttpPeopleProvider::from_config(&config.providers.people)?),
                )
            }
        };

    let storage = Arc::new(Storage::open(&database_path(&config)?).await?);
    let checkpoints = checkpoint_store(&config, &storage)?;
    let pipeline = Arc::new(UnitPipeline::from_config(&config, company, people, storage)?);
    let orchestrator = Orchestrator::from_config(&config, pipeline, checkpoints)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight companies");
            on_signal.cancel();
        }
    });

    info!(targets = targets.len(), snapshot = snapshot.is_some(), "starting discovery run");

    let progress = Arc::new(CliProgress::new());
    let report = orchestrator.run(targets, options, progress, cancel).await?;

    if let Some(path) = report_path {
        std::fs::write(path, report.to_json()?)
            .wrap_err_with(|| format!("cannot write report to {}", path.display()))?;
    }

    print_summary(&report);
    Ok(())
}

fn print_summary(report: &RunReport) {
    let t = &report.totals;
    let d = &report.distribution;
    println!();
    println!("  Run {}{}", report.run_id, if report.cancelled { " (cancelled)" } else { "" });
    println!(
        "  Companies: {} (success {}, failed {}, skipped {}, pending {}, resumed {})",
        t.companies, t.success, t.failed, t.skipped, t.pending, t.from_checkpoint
    );
    println!(
        "  People:    {} added, {} updated, {} deactivated, {} rejected",
        t.people_added, t.people_updated, t.people_deactivated, t.rejected_profiles
    );
    println!(
        "  Roles:     {} decision makers, {} champions, {} influencers, {} stakeholders",
        d.decision_makers, d.champions, d.influencers, d.stakeholders
    );
    println!(
        "  Calls:     {} company, {} people, {} retries ({:.1} credits)",
        report.usage.company_calls, report.usage.people_calls, report.usage.retries, report.credits.total
    );
    for c in report
        .companies
        .iter()
        .filter(|c| matches!(c.state, CheckpointState::Failed | CheckpointState::Skipped))
    {
        println!(
            "  {:<8} {}: {}",
            c.state.as_str(),
            c.target.label(),
            c.reason.as_deref().unwrap_or("-")
        );
    }
    println!();
}

async fn cmd_status(config_path: Option<&Path>, run_id: &str) -> Result<()> {
    let config = read_config(config_path)?;
    let storage = Arc::new(Storage::open_readonly(&database_path(&config)?).await?);
    let checkpoints = checkpoint_store(&config, &storage)?;

    let rows = checkpoints.load(run_id).await?;
    if rows.is_empty() {
        return Err(eyre!("no checkpoints for run '{run_id}'"));
    }

    println!("{:<40} {:<8} {:>7}  REASON", "UNIT", "STATE", "RETRIES");
    for cp in &rows {
        println!(
            "{:<40} {:<8} {:>7}  {}",
            cp.unit_key,
            cp.state.as_str(),
            cp.retry_count,
            cp.reason.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_report(config_path: Option<&Path>, run_id: &str) -> Result<()> {
    let config = read_config(config_path)?;
    let storage = Storage::open_readonly(&database_path(&config)?).await?;
    let json = storage
        .get_run_report(run_id)
        .await?
        .ok_or_else(|| eyre!("no report stored for run '{run_id}'"))?;
    println!("{json}");
    Ok(())
}

async fn cmd_group(config_path: Option<&Path>, company_id: &str) -> Result<()> {
    let config = read_config(config_path)?;
    let ws = config.workspace.id.as_str();
    let storage = Storage::open_readonly(&database_path(&config)?).await?;

    let company = storage
        .get_company(ws, company_id)
        .await?
        .ok_or_else(|| eyre!("unknown company '{company_id}' in workspace '{ws}'"))?;
    let group = storage
        .get_buyer_group(ws, company_id)
        .await?
        .ok_or_else(|| eyre!("no buyer group computed for '{company_id}'"))?;

    println!(
        "{} ({}): {} members, computed {}",
        company.name,
        company.domain.as_deref().unwrap_or("no domain"),
        group.total_members,
        group.computed_at.format("%Y-%m-%d %H:%M UTC")
    );
    for m in &group.members {
        println!(
            "  {:<16} {:>3}  {:<8}  {:<28} {}",
            m.role.to_string(),
            m.decision_power,
            m.engagement_priority.as_str(),
            m.full_name,
            m.title.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_classify(config_path: Option<&Path>, title: &str, department: Option<&str>) -> Result<()> {
    let config = read_config(config_path)?;
    let classifier = RoleClassifier::new(&config.classifier)?;
    let c = classifier.classify(title, department);
    println!("{}", serde_json::to_string_pretty(&c)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = match config_path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    println!("{}", render_config(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn run_started(&self, run_id: &str, total: usize, already_done: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(already_done as u64);
        self.bar.set_message(run_id.to_string());
    }

    fn unit_started(&self, unit_key: &str) {
        self.bar.set_message(unit_key.to_string());
    }

    fn unit_finished(&self, outcome: &CompanyOutcome) {
        self.bar.inc(1);
        if outcome.state != CheckpointState::Success {
            self.bar
                .println(format!("  {} {}", outcome.state, outcome.target.label()));
        }
    }

    fn done(&self, _report: &RunReport) {
        self.bar.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run() {
        let cli = Cli::try_parse_from([
            "buyergroup",
            "run",
            "--company",
            "Acme",
            "--domain",
            "globex.com",
            "--retry-failed",
        ])
        .expect("parse");
        match cli.command {
            Command::Run {
                company,
                domain,
                retry_failed,
                ..
            } => {
                assert_eq!(company, vec!["Acme"]);
                assert_eq!(domain, vec!["globex.com"]);
                assert!(retry_failed);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn targets_from_flags() {
        let targets = collect_targets(None, &["Acme".into()], &["globex.com".into()]).expect("targets");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name.as_deref(), Some("Acme"));
        assert_eq!(targets[1].domain.as_deref(), Some("globex.com"));
        assert!(collect_targets(None, &[], &[]).is_err());
    }
}
