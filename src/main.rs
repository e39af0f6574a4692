use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vibereader::analysis::templates;
use vibereader::config::Config;
use vibereader::dom::HtmlTimeline;
use vibereader::scanner::{ScanController, ScanEvent, ScanOutcome};
use vibereader::settings::{self, keys, FileStore, Settings, SettingsStore};
use vibereader::stop::VibeMode;
use vibereader::Dispatcher;

const OUTPUT_WIDTH: usize = 100;

/// Scroll through a saved timeline, collect posts and summarize them.
#[derive(Parser)]
#[command(name = "vibereader")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Settings file path
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan timeline HTML files and analyze what was collected
    Scan(ScanArgs),

    /// Show or change stored settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// List the built-in prompt templates
    Templates,
}

#[derive(Args)]
struct ScanArgs {
    /// Timeline HTML chunks, loaded in order as the scroll reaches the bottom
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Stop policy: manual, count or time
    #[arg(long)]
    mode: Option<VibeMode>,

    /// Posts to collect in count mode
    #[arg(long, value_parser = clap::value_parser!(u64).range(10..=1000))]
    count: Option<u64>,

    /// Window in hours for time mode
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=168))]
    hours: Option<u64>,

    /// Prompt template id
    #[arg(long)]
    template: Option<String>,

    /// Print the collected posts as JSON instead of analyzing them
    #[arg(long)]
    collect_only: bool,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 1000.0)]
    viewport: f64,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print every stored setting
    Show,

    /// Store a setting
    Set { key: String, value: String },

    /// Remove a setting
    Unset { key: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load(cli.config.as_deref())?;
    let settings_path = cli
        .settings
        .or_else(FileStore::default_path)
        .context("No config directory found; pass --settings")?;
    let store = Arc::new(FileStore::open(settings_path)?);

    match cli.command {
        Commands::Scan(args) => {
            // Parsed documents are not Send, so the scan stays on one thread.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(scan(config, store, args))
        }
        Commands::Settings { action } => settings_command(store.as_ref(), action),
        Commands::Templates => {
            for template in templates::TEMPLATES {
                let marker = if template.id == templates::DEFAULT_TEMPLATE {
                    " (default)"
                } else {
                    ""
                };
                println!("{:<18} {}{}", template.id, template.title, marker);
                println!("{:<18} {}", "", template.description);
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vibereader=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

async fn scan(config: Config, store: Arc<FileStore>, args: ScanArgs) -> Result<()> {
    let page = HtmlTimeline::from_files(&args.files, args.viewport)
        .context("Failed to read timeline HTML")?
        .with_layout_selectors(config.scan.item_selectors.clone());

    let mut settings = Settings::load(store.as_ref());
    if let Some(mode) = args.mode {
        settings.vibe_mode = mode;
    }
    if let Some(count) = args.count {
        settings.tweet_count = count;
    }
    if let Some(hours) = args.hours {
        settings.time_period_hours = hours;
    }
    if let Some(template) = args.template {
        if templates::find(&template).is_none() {
            bail!("Unknown template: {template} (see `vibereader templates`)");
        }
        settings.selected_template = template;
    }

    let store: Arc<dyn SettingsStore> = store;
    let dispatcher = Dispatcher::new(&config, Arc::clone(&store));
    let (mut controller, events) = ScanController::new(page, &config.scan, dispatcher, store);

    let handle = controller.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && handle.request_stop() {
            info!("Interrupted, stopping scan");
        }
    });
    let reporter = tokio::spawn(report_progress(events));

    let result = if args.collect_only {
        collect_only(&mut controller, &settings).await
    } else {
        let outcome = controller.run_with(&settings).await?;
        print_outcome(outcome)
    };

    drop(controller);
    if let Err(e) = reporter.await {
        warn!(error = %e, "Progress reporter ended abnormally");
    }
    result
}

async fn collect_only(
    controller: &mut ScanController<HtmlTimeline>,
    settings: &Settings,
) -> Result<()> {
    controller.collect_with(settings).await?;
    controller.abort();
    let json = serde_json::to_string_pretty(controller.collected())?;
    println!("{json}");
    Ok(())
}

fn print_outcome(outcome: ScanOutcome) -> Result<()> {
    match outcome {
        ScanOutcome::NothingCollected => {
            eprintln!("No posts were collected.");
            Ok(())
        }
        ScanOutcome::Analyzed(Ok(analysis)) => {
            println!("{}", textwrap::fill(&analysis.text, OUTPUT_WIDTH));
            if let Some(usage) = analysis.usage {
                eprintln!(
                    "Proxy usage: {}/{} ({} remaining)",
                    usage.current, usage.limit, usage.remaining
                );
            }
            Ok(())
        }
        ScanOutcome::Analyzed(Err(e)) => {
            eprintln!("{}", textwrap::fill(&e.user_message(), OUTPUT_WIDTH));
            bail!("Analysis failed: {e}")
        }
    }
}

async fn report_progress(mut events: mpsc::UnboundedReceiver<ScanEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Started { mode } => eprintln!("Scanning ({mode} mode)..."),
            ScanEvent::BatchExtracted(summary) => eprintln!(
                "  +{} new, {} duplicate, {} skipped, {} total",
                summary.added, summary.duplicate, summary.failed, summary.total_collected
            ),
            ScanEvent::AutoStopped(reason) => eprintln!("{reason}"),
            ScanEvent::NothingCollected => {}
            ScanEvent::AnalysisStarted { posts } => eprintln!("Analyzing {posts} posts..."),
            ScanEvent::AnalysisFinished(_) => {}
        }
    }
}

fn settings_command(store: &FileStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            println!("# {}", store.path().display());
            for (key, value) in store.entries() {
                let shown = if key == keys::CLAUDE_API_KEY {
                    Value::String("<set>".to_string())
                } else {
                    value
                };
                println!("{key} = {shown}");
            }
        }
        SettingsAction::Set { key, value } => {
            let value = settings::value_for_key(&key, &value)
                .map_err(|e| anyhow::anyhow!("Invalid value for {key}: {e}"))?;
            store.set(&key, value)?;
            info!(key, "Setting stored");
        }
        SettingsAction::Unset { key } => {
            store.remove(&key)?;
            info!(key, "Setting removed");
        }
    }
    Ok(())
}
