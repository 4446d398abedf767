use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clipcast::config::{Config, OutputNaming};
use clipcast::model::{GenerationRequest, GenerationResult, Presenter, Style, VoiceType};
use clipcast::pipeline::{Checkpoint, Pipeline};
use clipcast::{hints, init, ActivityLog};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipcast")]
#[command(about = "Turns a list of topics into a narrated video", long_about = None)]
struct Cli {
    /// Path to config.json (defaults are used when it does not exist)
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a video
    Generate(GenerateArgs),

    /// List subtopic suggestions for a topic
    Suggest {
        topic: String,
    },

    /// Delete everything in the download staging directory
    Clean,
}

#[derive(Args)]
struct GenerateArgs {
    /// Comma-separated topics
    #[arg(short, long, value_delimiter = ',')]
    topics: Vec<String>,

    /// Free-text description; fills in whatever is not given explicitly
    #[arg(short, long)]
    prompt: Option<String>,

    /// Length in minutes (5-45)
    #[arg(short, long)]
    duration: Option<u32>,

    #[arg(long, value_enum)]
    voice: Option<VoiceType>,

    #[arg(long, value_enum, default_value_t = Presenter::None)]
    presenter: Presenter,

    #[arg(short, long, value_enum)]
    style: Option<Style>,

    /// Overrides `output_naming` from the config
    #[arg(long, value_enum)]
    naming: Option<OutputNaming>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Write the activity log to this file when the run ends
    #[arg(long)]
    activity_log: Option<PathBuf>,
}

fn build_request(args: &GenerateArgs) -> GenerationRequest {
    let hinted = args.prompt.as_deref().map(hints::extract_hints);

    let topics = if args.topics.is_empty() {
        hinted.as_ref().map(|h| h.topics.clone()).unwrap_or_default()
    } else {
        args.topics.clone()
    };
    let duration = args
        .duration
        .or(hinted.as_ref().map(|h| h.duration))
        .unwrap_or(5);
    let voice = args
        .voice
        .or(hinted.as_ref().map(|h| h.voice_type))
        .unwrap_or(VoiceType::Male);
    let style = args
        .style
        .or(hinted.as_ref().map(|h| h.style))
        .unwrap_or(Style::Cinematic);

    GenerationRequest::new(topics, duration, voice, args.presenter, style)
}

fn print_result(result: &GenerationResult) {
    match result {
        GenerationResult::Completed(run) => {
            println!("status:      completed");
            println!("run:         {}", run.run_id);
            println!("output:      {} ({:?})", run.video_path.display(), run.output_kind);
            println!(
                "clips:       {} real, {} placeholder",
                run.real_clips, run.placeholder_clips
            );
            println!("voice:       {} ({:?})", run.voice.display(), run.voice_kind);
            println!("script:      {} words", run.script.split_whitespace().count());
        }
        GenerationResult::Error(failed) => {
            println!("status:      error");
            println!("message:     {}", failed.message);
        }
    }
}

async fn generate(config: Config, args: GenerateArgs) -> Result<i32> {
    let mut config = config;
    if let Some(naming) = args.naming {
        config.output_naming = naming;
    }

    if !init::check_ffmpeg(&config).await {
        warn!("FFmpeg not found; output will fall back to a text document");
    }
    if !init::check_ytdlp(&config).await {
        warn!("yt-dlp not found; placeholder clips will be used");
    }

    let request = build_request(&args);
    let log = ActivityLog::new();
    let pipeline = Pipeline::from_config(config, log.clone())?;

    let (tx, rx) = crossbeam::channel::unbounded::<Checkpoint>();
    let reporter = std::thread::spawn(move || {
        for checkpoint in rx {
            info!("[{:>3}%] {}", checkpoint.percent, checkpoint.stage.as_str());
        }
    });

    let result = pipeline.run_with_progress(&request, Some(&tx)).await;
    drop(tx);
    let _ = reporter.join();

    if let Some(path) = &args.activity_log {
        log.save(path)
            .await
            .with_context(|| format!("Failed to write activity log {}", path.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    Ok(if result.is_completed() { 0 } else { 1 })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_or_default(&cli.config).await?;
    init::ensure_directories(&config).await?;

    let code = match cli.command {
        Commands::Generate(args) => generate(config, args).await?,
        Commands::Suggest { topic } => {
            for suggestion in hints::suggest_subtopics(&topic) {
                println!("{}", suggestion);
            }
            0
        }
        Commands::Clean => {
            init::clear_staging(&config).await?;
            0
        }
    };
    std::process::exit(code);
}
