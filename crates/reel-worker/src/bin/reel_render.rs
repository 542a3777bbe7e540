//! One-shot local renderer: script file in, video out.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use validator::Validate;

use reel_media::fs_utils::move_file;
use reel_models::{GenerationRequest, JobId, PlatformPreset, Transition};
use reel_worker::{Generator, ProgressCallback, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "reel-render", about = "Render a narrated short video from a script file")]
struct Args {
    /// Script to narrate (plain UTF-8 text)
    #[arg(long)]
    script: PathBuf,

    /// BCP-47 narration language
    #[arg(long, default_value = "en")]
    language: String,

    /// Provider-specific voice
    #[arg(long)]
    voice: Option<String>,

    /// Output preset: tiktok, reels, shorts, landscape, square
    #[arg(long, default_value = "tiktok")]
    platform: PlatformPreset,

    /// Transition between scenes
    #[arg(long)]
    transition: Option<Transition>,

    /// Burn narration text into the video
    #[arg(long)]
    captions: bool,

    /// Where to write the video; the thumbnail lands beside it
    #[arg(long, default_value = "reel.mp4")]
    output: PathBuf,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reel=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(false))
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let script = tokio::fs::read_to_string(&args.script)
        .await
        .with_context(|| format!("reading {}", args.script.display()))?;

    let mut request = GenerationRequest::new("cli", script)
        .with_language(args.language)
        .with_platform(args.platform)
        .with_captions(args.captions);
    request.voice = args.voice;
    request.transition = args.transition;
    request
        .validate()
        .map_err(|e| anyhow::anyhow!(GenerationRequest::validation_message(&e)))?;

    let config = WorkerConfig::from_env();
    let generator = Generator::from_config(&config)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling render");
            let _ = cancel_tx.send(true);
        }
    });

    let progress: ProgressCallback = Arc::new(|fraction, message| {
        info!(progress = format!("{:.0}%", fraction * 100.0), "{}", message);
    });

    let job_id = JobId::new();
    info!(job_id = %job_id, platform = %args.platform, "Rendering");
    let result = match generator.generate(&job_id, &request, progress, cancel_rx).await {
        Ok(result) => result,
        Err(e) => {
            error!("Render failed: {}", e);
            return Err(e.into());
        }
    };

    let thumbnail = args.output.with_extension("jpg");
    move_file(&result.video_path, &args.output).await?;
    move_file(&result.thumbnail_path, &thumbnail).await?;
    if let Some(job_dir) = result.video_path.parent() {
        tokio::fs::remove_dir(job_dir).await.ok();
    }

    info!(
        video = %args.output.display(),
        thumbnail = %thumbnail.display(),
        duration_secs = result.metadata.duration_secs,
        scenes = result.metadata.scene_count,
        resolution = %result.metadata.resolution(),
        "Render complete"
    );
    Ok(())
}
