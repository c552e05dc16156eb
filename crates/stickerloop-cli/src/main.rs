use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use serde_json::json;
use stickerloop_contracts::history::DedupHistory;
use stickerloop_contracts::journal::Journal;
use stickerloop_contracts::queue::{EventLabel, EventQueue};
use stickerloop_engine::intake::{enqueue_candidates, load_candidates};
use stickerloop_engine::{new_run_id, Driver, EngineConfig, EngineContext, PromptSynthesizer};

#[derive(Debug, Parser)]
#[command(
    name = "stickerloop",
    version,
    about = "Generate, grade and catalogue holiday sticker art"
)]
struct Cli {
    /// Debug-level logging.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drain the event queue in batches.
    Run(RunArgs),
    /// Add approved candidate events to the queue, skipping known ones.
    Enqueue(EnqueueArgs),
    /// Print the prompt set for one event, synthesizing it if not cached.
    Prompts(PromptsArgs),
}

#[derive(Debug, Args)]
struct ServiceArgs {
    #[arg(long, default_value = ".")]
    out: PathBuf,
    /// Use the offline deterministic services instead of OpenAI.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    text_model: Option<String>,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, default_value = "days.csv")]
    queue: PathBuf,
    /// Events per batch.
    #[arg(long, default_value_t = 3)]
    limit: usize,
    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Debug, Args)]
struct EnqueueArgs {
    #[arg(long, default_value = "days.csv")]
    queue: PathBuf,
    #[arg(long, default_value = "holiday_history.json")]
    history: PathBuf,
    /// JSON array of {title, description, category} records.
    candidates: PathBuf,
}

#[derive(Debug, Args)]
struct PromptsArgs {
    event: String,
    #[command(flatten)]
    service: ServiceArgs,
}

impl ServiceArgs {
    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(&self.out);
        if let Some(model) = &self.text_model {
            config.text_model = model.clone();
        }
        if let Some(model) = &self.vision_model {
            config.vision_model = model.clone();
        }
        if let Some(model) = &self.image_model {
            config.image_model = model.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency.max(1);
        }
        config
    }

    fn context(&self) -> Result<EngineContext> {
        let config = self.config();
        std::fs::create_dir_all(config.output_root())
            .with_context(|| format!("failed to create {}", config.output_root().display()))?;
        let journal = Journal::new(config.journal_path(), new_run_id());
        info!(
            "run {} writing to {}",
            journal.run_id(),
            config.output_root().display()
        );
        if self.dryrun {
            return Ok(EngineContext::dryrun(config, journal));
        }
        EngineContext::openai(config, journal)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("stickerloop error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Command::Run(args) => run_queue(args),
        Command::Enqueue(args) => run_enqueue(args),
        Command::Prompts(args) => run_prompts(args),
    }
}

fn init_logging(verbose: bool) {
    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
    );
    clog.init();
}

fn run_queue(args: RunArgs) -> Result<i32> {
    let ctx = args.service.context()?;
    let queue = EventQueue::new(&args.queue);
    let summary = Driver::new(&ctx, &queue).run(args.limit)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    if summary.events_parked > 0 {
        info!(
            "{} event(s) parked in {}",
            summary.events_parked,
            queue.failed_path().display()
        );
    }
    Ok(0)
}

fn run_enqueue(args: EnqueueArgs) -> Result<i32> {
    let candidates = load_candidates(&args.candidates)?;
    let history = DedupHistory::new(&args.history);
    let queue = EventQueue::new(&args.queue);
    let report = enqueue_candidates(&history, &queue, &candidates)?;
    println!(
        "{}",
        json!({
            "queued": report.fresh.iter().map(|record| record.title.as_str()).collect::<Vec<_>>(),
            "duplicates": report.duplicates.len(),
            "queue": display_path(queue.path()),
        })
    );
    Ok(0)
}

fn run_prompts(args: PromptsArgs) -> Result<i32> {
    let event = EventLabel::new(args.event);
    if event.is_empty() {
        anyhow::bail!("event label is empty");
    }
    let ctx = args.service.context()?;
    let prompts = PromptSynthesizer::new(&ctx).synthesize(&event)?;
    for prompt in prompts {
        println!("{prompt}");
    }
    Ok(0)
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
