//! CLI binary for the dubbing pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use arksynth::bundle;
use arksynth::render::{DialogueRequest, RenderJob, RenderOrchestrator, VoiceCasting};
use arksynth::voice::IdentityResolver;
use arksynth::{AppConfig, GpuLease, RenderCache, SharedLoaders, SovitsEngine};

/// ArkSynth: story-script voice dubbing pipeline.
#[derive(Parser)]
#[command(name = "arksynth", version, about)]
struct Cli {
    /// Path to the settings JSON file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract voice clips from a directory of AssetBundle files.
    ExtractVoices {
        /// Directory containing `.ab` files.
        source: PathBuf,
        /// Output directory (per-character subfolders).
        output: PathBuf,
        /// Output clip extension.
        #[arg(long, default_value = "mp3")]
        format: String,
    },

    /// Extract composited portraits from a directory of AssetBundle files.
    ExtractImages {
        /// Directory containing `.ab` files.
        source: PathBuf,
        /// Output directory (per-character subfolders).
        output: PathBuf,
    },

    /// Parse an episode script and print its dialogue list.
    Parse {
        /// Episode id (script file stem).
        episode_id: String,
        /// Game-data locale.
        #[arg(long, default_value = "ko_KR")]
        lang: String,
    },

    /// Render an episode into the cache.
    Render {
        /// Episode id (script file stem).
        episode_id: String,
        /// Game-data locale.
        #[arg(long, default_value = "ko_KR")]
        lang: String,
        /// Voice for narration lines.
        #[arg(long)]
        narrator: Option<String>,
        /// Default voice for unmapped speakers.
        #[arg(long)]
        default_voice: Option<String>,
        /// Wipe the episode cache first.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arksynth=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from("data/settings.json"));
    let config = AppConfig::load(&config_path)?;

    match cli.command {
        Command::ExtractVoices {
            source,
            output,
            format,
        } => {
            let stats = bundle::extract_voice_folder(&source, &output, &format)?;
            info!(
                "{} bundles processed, {} clips extracted, {} failed",
                stats.processed, stats.extracted, stats.failed
            );
        }
        Command::ExtractImages { source, output } => {
            let stats = bundle::extract_image_folder(&source, &output, "png")?;
            info!(
                "{} bundles processed, {} portraits extracted, {} failed",
                stats.processed, stats.extracted, stats.failed
            );
        }
        Command::Parse { episode_id, lang } => {
            let loaders = SharedLoaders::new(&config);
            let episode = loaders.story_index()?.load_episode(&episode_id, &lang)?;
            println!("{} — {}", episode.id, episode.title);
            for dialogue in &episode.dialogues {
                match &dialogue.speaker_id {
                    Some(id) => println!("[{id}] {}: {}", dialogue.speaker_name, dialogue.text),
                    None if dialogue.speaker_name.is_empty() => println!("  {}", dialogue.text),
                    None => println!("{}: {}", dialogue.speaker_name, dialogue.text),
                }
            }
        }
        Command::Render {
            episode_id,
            lang,
            narrator,
            default_voice,
            force,
        } => {
            run_render(&config, &episode_id, &lang, narrator, default_voice, force).await?;
        }
    }
    Ok(())
}

async fn run_render(
    config: &AppConfig,
    episode_id: &str,
    lang: &str,
    narrator: Option<String>,
    default_voice: Option<String>,
    force: bool,
) -> anyhow::Result<()> {
    let loaders = SharedLoaders::new(config);
    let index = loaders.story_index()?;
    let episode = index.load_episode(episode_id, lang)?;

    let character_table = config
        .gamedata_path()
        .join(lang)
        .join("gamedata/excel/character_table.json");
    let resolver = Arc::new(IdentityResolver::load(
        &character_table,
        &config.data_root.join("character_aliases.json"),
        config.models_path().join(&config.default_engine),
    )?);

    let engine = Arc::new(SovitsEngine::new(
        config.tts.clone(),
        config.models_path().join(&config.default_engine),
        None,
    ));
    let cache = RenderCache::new(config.render_cache_path())?;
    let orchestrator = RenderOrchestrator::new(
        cache,
        engine,
        GpuLease::new(),
        resolver,
        character_table,
        config.extracted_path().join(arksynth::config::voice_folder_for(&config.voice_language)),
    );

    let dialogues: Vec<DialogueRequest> = episode
        .dialogues
        .iter()
        .enumerate()
        .map(|(index, d)| DialogueRequest {
            index,
            char_id: d.speaker_id.clone(),
            speaker_name: (!d.speaker_name.is_empty()).then(|| d.speaker_name.clone()),
            text: d.text.clone(),
        })
        .collect();

    let mut progress_rx = orchestrator.subscribe();
    orchestrator
        .start_render(RenderJob {
            episode_id: episode_id.to_owned(),
            dialogues,
            language: config.voice_language.clone(),
            casting: VoiceCasting {
                default_voice,
                narrator_voice: narrator,
                ..VoiceCasting::default()
            },
            force,
        })
        .await?;

    while let Ok(progress) = progress_rx.recv().await {
        info!(
            "{}: {}/{} ({:?})",
            progress.episode_id, progress.completed, progress.total, progress.status
        );
        if progress.status.is_terminal() {
            break;
        }
    }
    orchestrator.wait_for_render().await;
    Ok(())
}
