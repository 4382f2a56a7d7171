use anyhow::{Context, Result};
use bilang::config::{Config, Settings};
use bilang::lang::require_language;
use bilang::pipeline::{spawn_progress_printer, Pipeline, Step};
use bilang::providers::{create_synthesizer, create_translator};
use bilang::quota::QuotaTracker;
use bilang::rare::{FrequencyTable, LengthHeuristic, LowercaseLemmatizer, ZipfScorer};
use bilang::store::{ProjectStore, Status};
use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "bilang")]
#[command(version, about = "Bilingual audiobook video generator")]
#[command(
    long_about = "Turn a plain-text book into a video with sentence-paired bilingual audio, \
                  karaoke subtitles, and rare-word vocabulary cards."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress bars
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project from a text file and run the full pipeline
    Run {
        /// Input UTF-8 text file
        #[arg(short, long)]
        input: PathBuf,

        /// Source language code (ru, en, es, ...)
        #[arg(short, long)]
        source: String,

        /// Target language code (ru, en, es, es-latam, ...)
        #[arg(short, long)]
        target: String,

        /// Project name (default: input file stem)
        #[arg(short, long)]
        name: Option<String>,

        /// Re-run audio/video steps of an existing project (the TTS cache
        /// is kept)
        #[arg(long)]
        force: bool,

        /// Only split text into sentences, then stop
        #[arg(long)]
        only_sentences: bool,

        /// Split and extract rare words, then stop
        #[arg(long)]
        only_rare_words: bool,

        /// Stop once rare words are translated
        #[arg(long)]
        stop_after_rare_words: bool,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Resume an existing project
    Resume {
        /// Project slug; interactive picker when omitted
        project: Option<String>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// List all projects
    List,

    /// Show TTS/translation quota usage
    Quota,
}

#[derive(Args)]
struct PipelineArgs {
    /// TTS provider: google_cloud, gtts
    #[arg(long, default_value = "google_cloud")]
    tts: String,

    /// Translation provider: google, deepl-free, deepl-pro, openai
    #[arg(long, default_value = "google")]
    translator: String,

    /// Parallel translation requests
    #[arg(long)]
    translator_parallel: Option<usize>,

    /// Parallel TTS requests
    #[arg(long)]
    tts_parallel: Option<usize>,

    /// Workers for the audio tempo pass
    #[arg(long)]
    combine_workers: Option<usize>,

    /// Source audio speed factor
    #[arg(long)]
    speed_source: Option<f64>,

    /// Target audio speed factor
    #[arg(long)]
    speed_target: Option<f64>,

    /// Max rare words per sentence
    #[arg(long)]
    rare_words: Option<usize>,

    /// Subtitle font size
    #[arg(long)]
    font_size: Option<u32>,

    /// Video resolution, e.g. 1920x1080
    #[arg(long)]
    resolution: Option<String>,

    /// Skip spoken word cards
    #[arg(long)]
    no_wordcards: bool,

    /// Drop sentences whose TTS permanently failed instead of failing
    #[arg(long)]
    allow_missing_audio: bool,
}

impl PipelineArgs {
    fn apply(&self, settings: &mut Settings) -> Result<()> {
        if let Some(n) = self.translator_parallel {
            settings.translation_parallel = n;
        }
        if let Some(n) = self.tts_parallel {
            settings.tts_parallel = n;
        }
        if let Some(n) = self.combine_workers {
            settings.combine_workers = n;
        }
        if let Some(s) = self.speed_source {
            settings.speed_source = s;
        }
        if let Some(s) = self.speed_target {
            settings.speed_target = s;
        }
        if let Some(n) = self.rare_words {
            settings.max_rare_words = n;
        }
        if let Some(n) = self.font_size {
            settings.font_size = n;
        }
        if let Some(res) = &self.resolution {
            let (w, h) = res
                .split_once('x')
                .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
                .with_context(|| format!("Invalid resolution: {res} (expected WxH)"))?;
            settings.video_width = w;
            settings.video_height = h;
        }
        if self.no_wordcards {
            settings.wordcards = false;
        }
        if self.allow_missing_audio {
            settings.allow_missing_audio = true;
        }
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Frequency table for the target language, falling back to the length
/// heuristic when no table is installed.
fn load_scorer(config: &Config, target_lang: &str) -> Arc<dyn ZipfScorer> {
    let code = require_language(target_lang)
        .map(|l| l.wordfreq_code)
        .unwrap_or("en");
    if let Some(dir) = &config.frequency_dir {
        let path = dir.join(format!("{code}.tsv"));
        if path.exists() {
            match FrequencyTable::load(&path) {
                Ok(table) => {
                    info!("Loaded frequency table for '{code}' ({} words)", table.len());
                    return Arc::new(table);
                }
                Err(e) => warn!("Failed to load frequency table {}: {e}", path.display()),
            }
        }
    }
    warn!("No frequency table for '{code}'; word rarity uses the length heuristic");
    Arc::new(LengthHeuristic)
}

fn setup_cancellation() -> Arc<AtomicBool> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || {
        if flag.load(Ordering::Relaxed) {
            std::process::exit(1);
        }
        eprintln!("\nReceived Ctrl+C, finishing in-flight work... (press again to force quit)");
        flag.store(true, Ordering::Relaxed);
    })
    .ok();
    cancelled
}

async fn run_pipeline(
    store: Arc<ProjectStore>,
    config: &Config,
    args: &PipelineArgs,
    stop_after: Option<Step>,
    quiet: bool,
) -> Result<()> {
    let mut settings = config.settings.clone();
    args.apply(&mut settings)?;

    let meta = store.meta();
    let quota = Arc::new(QuotaTracker::open_default());
    let translator = create_translator(&args.translator, config, quota.clone())?;
    let tts = create_synthesizer(&args.tts, config, quota)?;
    let scorer = load_scorer(config, &meta.target_lang);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = spawn_progress_printer(rx, !quiet);

    let pipeline = Pipeline::new(
        store,
        Arc::from(translator),
        Arc::from(tts),
        scorer,
        Arc::new(LowercaseLemmatizer),
        settings,
        tx,
    )
    .with_stop_after(stop_after)
    .with_cancellation(setup_cancellation());

    let result = pipeline.run().await;
    drop(pipeline);
    let _ = printer.await;
    result.map_err(|e| anyhow::anyhow!("{e}"))
}

async fn cmd_run(
    cli_quiet: bool,
    input: PathBuf,
    source: String,
    target: String,
    name: Option<String>,
    force: bool,
    only_sentences: bool,
    only_rare_words: bool,
    stop_after_rare_words: bool,
    args: PipelineArgs,
) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    let source = require_language(&source)
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .code
        .to_string();
    let target = require_language(&target)
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .code
        .to_string();

    let config = Config::load().context("Failed to load configuration")?;
    let projects_dir = config.projects_dir();
    std::fs::create_dir_all(&projects_dir)?;

    let name = name.unwrap_or_else(|| {
        input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string())
    });
    let slug = format!("{name}_{source}_{target}");

    let exists = ProjectStore::list(&projects_dir).contains(&slug);
    if exists && !force {
        anyhow::bail!(
            "Project already exists: {slug}\nUse --force to regenerate or 'resume' to continue."
        );
    }

    let store = Arc::new(
        ProjectStore::create_or_open(&projects_dir, &name, &source, &target)
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    if exists {
        // Keep the audio cache; only the mixing and rendering repeat.
        store.reset_step(Step::AudioCombined.name()).map_err(|e| anyhow::anyhow!("{e}"))?;
        store.reset_step(Step::Video.name()).map_err(|e| anyhow::anyhow!("{e}"))?;
        info!("Reusing project {slug} (audio cache preserved)");
    } else {
        info!("Created project {slug}");
    }

    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("Cannot read {}", input.display()))?;
    store
        .set_original_text(&text)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    info!("Loaded text: {} chars", text.chars().count());

    let stop_after = if only_sentences {
        Some(Step::Sentences)
    } else if only_rare_words {
        Some(Step::RareWordsExtract)
    } else if stop_after_rare_words {
        Some(Step::RareWordsTranslate)
    } else {
        None
    };

    run_pipeline(store.clone(), &config, &args, stop_after, cli_quiet).await?;

    if stop_after.is_some() {
        let meta = store.meta();
        println!("Sentences: {}", meta.total_sentences);
        println!("Project saved to {}", store.dir().display());
    } else {
        println!("Video generated: {}", store.output_video_path().display());
    }
    Ok(())
}

async fn cmd_resume(cli_quiet: bool, project: Option<String>, args: PipelineArgs) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let projects_dir = config.projects_dir();

    let slug = match project {
        Some(slug) => slug,
        None => {
            let slugs = ProjectStore::list(&projects_dir);
            if slugs.is_empty() {
                anyhow::bail!("No projects found in {}", projects_dir.display());
            }
            let selection = dialoguer::FuzzySelect::new()
                .with_prompt("Resume which project?")
                .items(&slugs)
                .default(0)
                .interact()?;
            slugs[selection].clone()
        }
    };

    let store = Arc::new(
        ProjectStore::open_slug(&projects_dir, &slug).map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    let meta = store.meta();
    println!(
        "Resuming {} ({} -> {}, {} sentences)",
        style(&meta.slug).cyan(),
        meta.source_lang,
        meta.target_lang,
        meta.total_sentences
    );
    for step in Step::ORDER {
        let p = store.progress(step.name());
        let status = match p.status {
            Status::Complete => style("complete").green(),
            Status::Failed => style("failed").red(),
            Status::Running => style("running").yellow(),
            Status::Pending => style("pending").dim(),
        };
        println!("  [{step}] {}/{} ({status})", p.done, p.total);
    }

    run_pipeline(store.clone(), &config, &args, None, cli_quiet).await?;
    println!("Video generated: {}", store.output_video_path().display());
    Ok(())
}

fn cmd_list() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let projects_dir = config.projects_dir();
    let slugs = ProjectStore::list(&projects_dir);

    if slugs.is_empty() {
        println!("No projects found");
        return Ok(());
    }

    println!("Projects ({}):", slugs.len());
    for slug in slugs {
        match ProjectStore::open_slug(&projects_dir, &slug) {
            Ok(store) => {
                let meta = store.meta();
                let complete = Step::ORDER
                    .iter()
                    .filter(|s| store.progress(s.name()).status == Status::Complete)
                    .count();
                let status = if complete == Step::ORDER.len() {
                    "complete".to_string()
                } else {
                    format!("{complete}/{}", Step::ORDER.len())
                };
                println!(
                    "  {} [{status}] {} -> {}, {} sentences",
                    style(&slug).cyan(),
                    meta.source_lang,
                    meta.target_lang,
                    meta.total_sentences
                );
            }
            Err(e) => println!("  {slug} [unreadable: {e}]"),
        }
    }
    Ok(())
}

fn cmd_quota() -> Result<()> {
    println!("{}", QuotaTracker::open_default().format_report());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run {
            input,
            source,
            target,
            name,
            force,
            only_sentences,
            only_rare_words,
            stop_after_rare_words,
            pipeline,
        } => {
            cmd_run(
                cli.quiet,
                input,
                source,
                target,
                name,
                force,
                only_sentences,
                only_rare_words,
                stop_after_rare_words,
                pipeline,
            )
            .await
        }
        Command::Resume { project, pipeline } => cmd_resume(cli.quiet, project, pipeline).await,
        Command::List => cmd_list(),
        Command::Quota => cmd_quota(),
    };

    if let Err(e) = &result {
        error!("{e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parsing() {
        let mut settings = Settings::default();
        let args = PipelineArgs {
            tts: "gtts".to_string(),
            translator: "google".to_string(),
            translator_parallel: None,
            tts_parallel: None,
            combine_workers: None,
            speed_source: None,
            speed_target: None,
            rare_words: None,
            font_size: None,
            resolution: Some("1280x720".to_string()),
            no_wordcards: true,
            allow_missing_audio: false,
        };
        args.apply(&mut settings).unwrap();
        assert_eq!(settings.video_width, 1280);
        assert_eq!(settings.video_height, 720);
        assert!(!settings.wordcards);
    }

    #[test]
    fn test_invalid_resolution_rejected() {
        let mut settings = Settings::default();
        let args = PipelineArgs {
            tts: "gtts".to_string(),
            translator: "google".to_string(),
            translator_parallel: None,
            tts_parallel: None,
            combine_workers: None,
            speed_source: None,
            speed_target: None,
            rare_words: None,
            font_size: None,
            resolution: Some("huge".to_string()),
            no_wordcards: false,
            allow_missing_audio: false,
        };
        assert!(args.apply(&mut settings).is_err());
    }
}
