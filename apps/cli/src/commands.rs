//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use contentforge_core::{
    Action, ActionOutcome, BatchReport, ExtractTarget, PipelineContext, PipelineOutcome,
    ProgressReporter, RunOptions, Services, dispatch,
};
use contentforge_shared::{
    AppConfig, ClusterId, FeedId, ItemId, PipelineRun, Preset, RunId, Stage, expand_home,
    init_config, load_config, load_config_from,
};
use contentforge_storage::{Storage, Stores};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ContentForge: turn news feeds into published articles.
#[derive(Parser)]
#[command(
    name = "contentforge",
    version,
    about = "Ingest feeds, score and fact-check items, and publish generated articles.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.contentforge/contentforge.toml).
    #[arg(long, global = true, env = "CONTENTFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `defaults.database_path`.
    #[arg(long, global = true, env = "CONTENTFORGE_DB")]
    pub db: Option<PathBuf>,

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
    /// Manage and poll feeds.
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },

    /// Score ingested items.
    Score {
        #[arg(long)]
        site: Option<String>,
        /// Maximum items to score (defaults to `pipeline.score_batch`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Extract facts and keywords from scored items.
    Extract {
        #[arg(long)]
        site: Option<String>,
        /// Specific items; otherwise the highest-scored ones.
        #[arg(long = "item")]
        items: Vec<ItemId>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Fact-check extracted items against web search.
    Verify {
        #[arg(long)]
        site: Option<String>,
        #[arg(long = "item")]
        items: Vec<ItemId>,
    },

    /// Embed extracted items for clustering.
    Embed {
        #[arg(long)]
        site: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Group embedded items into topic clusters.
    Cluster {
        #[arg(long)]
        site: Option<String>,
    },

    /// Retry labels for clusters that have none.
    Relabel {
        #[arg(long)]
        site: Option<String>,
    },

    /// Create a run and generate its sections.
    Generate {
        /// Source items (repeatable).
        #[arg(long = "item", conflicts_with = "cluster", required_unless_present = "cluster")]
        items: Vec<ItemId>,
        /// Use every member of a cluster as source.
        #[arg(long)]
        cluster: Option<ClusterId>,
        /// full-article or news-post (defaults to `defaults.preset`).
        #[arg(long)]
        preset: Option<Preset>,
        #[arg(long)]
        persona: Option<String>,
    },

    /// Assemble a generated run.
    Assemble { run: RunId },

    /// Publish an assembled run as a WordPress draft.
    Publish {
        run: RunId,
        #[arg(long)]
        site: String,
    },

    /// Run the full pipeline for one site.
    Run {
        site: String,
        #[arg(long)]
        preset: Option<Preset>,
        /// Selection threshold (defaults to `defaults.min_score`).
        #[arg(long)]
        min_score: Option<u8>,
        #[arg(long)]
        persona: Option<String>,
    },

    /// Continue an interrupted run.
    Resume { run: RunId },

    /// Inspect pipeline runs.
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Item maintenance.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum FeedAction {
    /// Register a feed for a site.
    Add {
        site: String,
        url: String,
        /// Minutes between polls.
        #[arg(long, default_value = "60")]
        interval: u32,
    },
    /// List registered feeds.
    List {
        #[arg(long)]
        site: Option<String>,
    },
    /// Poll one feed, or every feed of a site.
    Poll {
        feed: Option<FeedId>,
        #[arg(long)]
        site: Option<String>,
        /// Only feeds whose poll interval has elapsed.
        #[arg(long)]
        due: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum RunsAction {
    /// Most recent runs first.
    List {
        #[arg(long)]
        site: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one run.
    Show {
        run: RunId,
        /// Print the assembled HTML.
        #[arg(long)]
        html: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum ItemAction {
    /// Exclude an item from all further processing.
    Skip { item: ItemId },
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
        0 => "contentforge=info,contentforge_core=info",
        1 => "contentforge=debug,contentforge_core=debug,contentforge_clients=debug",
        _ => "contentforge=trace,contentforge_core=trace,contentforge_clients=trace,contentforge_storage=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let action = match cli.command {
        Command::Config { action } => {
            return match action {
                ConfigAction::Init => cmd_config_init(),
                ConfigAction::Show => cmd_config_show(cli.config.as_ref()),
            };
        }
        Command::Feed { action } => match action {
            FeedAction::Add {
                site,
                url,
                interval,
            } => Action::AddFeed {
                site_id: site,
                url,
                poll_interval_mins: interval,
            },
            FeedAction::List { site } => Action::ListFeeds { site_id: site },
            FeedAction::Poll {
                feed: Some(feed_id),
                ..
            } => Action::PollFeed { feed_id },
            FeedAction::Poll {
                feed: None,
                site,
                due,
            } => Action::PollAllFeeds {
                site_id: site,
                only_due: due,
            },
        },
        Command::Score { site, limit } => Action::ScoreBatch {
            site_id: site,
            limit,
        },
        Command::Extract { site, items, limit } => Action::ExtractFacts {
            site_id: site,
            target: if items.is_empty() {
                ExtractTarget::Top(limit.unwrap_or(10))
            } else {
                ExtractTarget::Ids(items)
            },
        },
        Command::Verify { site, items } => Action::FactCheck {
            site_id: site,
            item_ids: (!items.is_empty()).then_some(items),
        },
        Command::Embed { site, limit } => Action::EmbedItems {
            site_id: site,
            limit,
        },
        Command::Cluster { site } => Action::ClusterItems { site_id: site },
        Command::Relabel { site } => Action::RelabelClusters { site_id: site },
        Command::Generate {
            items,
            cluster,
            preset,
            persona,
        } => {
            let config = resolve_config(cli.config.as_ref())?;
            let preset = preset.unwrap_or(config.defaults.preset);
            match cluster {
                Some(cluster_id) => Action::GenerateFromCluster {
                    cluster_id,
                    preset,
                    persona,
                },
                None => Action::GenerateAllSections {
                    item_ids: items,
                    preset,
                    persona,
                },
            }
        }
        Command::Assemble { run } => Action::AssembleArticle { run_id: run },
        Command::Publish { run, site } => Action::PublishToWp {
            run_id: run,
            site_id: site,
        },
        Command::Run {
            site,
            preset,
            min_score,
            persona,
        } => Action::RunFullPipeline {
            site_id: site,
            options: RunOptions {
                preset,
                min_score,
                persona,
            },
        },
        Command::Resume { run } => Action::ResumeRun { run_id: run },
        Command::Runs { action } => match action {
            RunsAction::List { site, limit } => Action::ListRuns {
                site_id: site,
                limit,
            },
            RunsAction::Show { run, html } => {
                let ctx = open_context(cli.config.as_ref(), cli.db.as_ref(), None).await?;
                let cancel = CancellationToken::new();
                let outcome = dispatch(&ctx, Action::GetRun { run_id: run }, &cancel).await?;
                if let ActionOutcome::Run(run) = &outcome {
                    print_run_detail(run, html);
                }
                return Ok(());
            }
        },
        Command::Item { action } => match action {
            ItemAction::Skip { item } => Action::SkipItem { item_id: item },
        },
    };

    let progress = Arc::new(CliProgress::new());
    let ctx = open_context(cli.config.as_ref(), cli.db.as_ref(), Some(progress.clone())).await?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = dispatch(&ctx, action, &cancel).await;
    progress.finish();
    print_outcome(&outcome?);
    Ok(())
}

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

async fn open_context(
    config_path: Option<&PathBuf>,
    db_path: Option<&PathBuf>,
    progress: Option<Arc<CliProgress>>,
) -> Result<PipelineContext> {
    let config = resolve_config(config_path)?;
    let db_path = db_path
        .cloned()
        .unwrap_or_else(|| expand_home(&config.defaults.database_path));
    info!(db = %db_path.display(), "opening database");

    let storage = Arc::new(Storage::open(&db_path).await?);
    let services = Services::from_config(&config)?;
    let ctx = PipelineContext::new(Stores::from_shared(storage), services, config);
    Ok(match progress {
        Some(p) => ctx.with_progress(p),
        None => ctx,
    })
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_outcome(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Feed(feed) => {
            println!("  Feed registered: {}", feed.id);
            println!("  Site:     {}", feed.site_id);
            println!("  URL:      {}", feed.url);
            println!("  Interval: {} min", feed.poll_interval_mins);
        }
        ActionOutcome::Feeds(feeds) => {
            if feeds.is_empty() {
                println!("No feeds registered.");
            }
            for feed in feeds {
                let polled = feed
                    .last_polled_at
                    .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                println!(
                    "{}  {:<12} {}  (every {} min, last polled {polled}, {} entries)",
                    feed.id, feed.site_id, feed.url, feed.poll_interval_mins, feed.last_poll_count
                );
            }
        }
        ActionOutcome::Polled(outcome) => {
            println!(
                "Polled {}: {} entries, {} new",
                outcome.feed_id, outcome.entries, outcome.new_items
            );
        }
        ActionOutcome::PolledAll(report) => {
            let new_items: usize = report.successes().map(|(_, o)| o.new_items).sum();
            print_report("Polled feeds", report);
            println!("  New items: {new_items}");
        }
        ActionOutcome::Scored(report) => {
            print_report("Scored", report);
            for (id, score) in report.successes() {
                println!(
                    "  {id}  combined {:>3}  (seo {}, viral {})",
                    score.combined_score, score.seo_score, score.viral_score
                );
            }
        }
        ActionOutcome::Extracted(report) => {
            print_report("Extracted", report);
            for (id, summary) in report.successes() {
                println!("  {id}  {} facts, {} keywords", summary.facts, summary.keywords);
            }
        }
        ActionOutcome::Checked(report) => {
            print_report("Fact-checked", report);
            for (id, result) in report.successes() {
                println!(
                    "  {id}  {} verified, {} unverified",
                    result.verified.len(),
                    result.unverified.len()
                );
            }
        }
        ActionOutcome::Embedded(report) => print_report("Embedded", report),
        ActionOutcome::Clustered(report) => {
            println!(
                "Formed {} clusters from {} candidates ({} unlabeled)",
                report.clusters.len(),
                report.candidates,
                report.unlabeled
            );
            for cluster in &report.clusters {
                println!(
                    "  {}  {:<40} {} items",
                    cluster.id,
                    cluster.label.as_deref().unwrap_or("(unlabeled)"),
                    cluster.member_ids.len()
                );
            }
        }
        ActionOutcome::Relabeled(report) => {
            print_report("Relabeled", report);
            for (id, label) in report.successes() {
                println!("  {id}  {}", label.label);
            }
        }
        ActionOutcome::Run(run) => print_run_summary(run),
        ActionOutcome::Runs(runs) => {
            if runs.is_empty() {
                println!("No pipeline runs.");
            }
            for run in runs {
                println!(
                    "{}  {:<12} {:<11} {:<12} {}",
                    run.id,
                    run.site_id,
                    run.status.as_str(),
                    run.preset.as_str(),
                    run.created_at.to_rfc3339()
                );
            }
        }
        ActionOutcome::Pipeline(PipelineOutcome::Completed(run)) => {
            println!();
            println!("  Pipeline completed!");
            print_run_summary(run);
        }
        ActionOutcome::Pipeline(PipelineOutcome::NoContent { message }) => {
            println!("No content: {message}");
        }
        ActionOutcome::Skipped(id) => println!("Item {id} skipped."),
    }
}

fn print_report<K: std::fmt::Display, T>(label: &str, report: &BatchReport<K, T>) {
    println!("{label}: {}/{} succeeded", report.succeeded(), report.total());
    for (id, err) in report.failures() {
        println!("  {id}  failed: {err}");
    }
}

fn print_run_summary(run: &PipelineRun) {
    println!("  Run:      {}", run.id);
    println!("  Site:     {}", run.site_id);
    println!("  Status:   {}", run.status);
    println!("  Preset:   {}", run.preset);
    println!("  Items:    {}", run.source_item_ids.len());
    println!("  Sections: {} ({} words)", run.sections.len(), run.sections.total_words());
    if let Some(seo) = &run.seo {
        println!("  Title:    {}", seo.title);
    }
    if let Some(url) = &run.remote_url {
        println!("  URL:      {url}");
    }
    if let Some(error) = &run.error {
        println!("  Error:    {error}");
    }
}

fn print_run_detail(run: &PipelineRun, html: bool) {
    print_run_summary(run);
    if let Some(seo) = &run.seo {
        println!("  SEO title:       {}", seo.seo_title);
        println!("  SEO description: {}", seo.seo_description);
        println!("  Focus keyword:   {}", seo.focus_keyword);
    }
    for section in run.sections.0.values() {
        println!("  - {:<11} {} words", section.kind.as_str(), section.word_count);
    }
    if html {
        if let Some(body) = &run.assembled_html {
            println!();
            println!("{body}");
        }
    }
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, stage: Stage) {
        self.spinner.set_message(format!("{stage}..."));
    }

    fn item_done(&self, stage: Stage, current: usize, total: usize) {
        self.spinner.set_message(format!("{stage} [{current}/{total}]"));
    }

    fn done(&self, summary: &str) {
        self.spinner.set_message(summary.to_string());
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config).map_err(|e| eyre!("cannot render config: {e}"))?;
    println!("{toml_str}");
    Ok(())
}
