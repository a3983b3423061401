use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "animseq", version)]
struct Cli {
    /// JSON config file; created with defaults if missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a frame directory and print the sequence as JSON.
    Index(IndexArgs),
    /// Interpolate extra frames between every pair of frames, in place.
    Tween(TweenArgs),
    /// Smooth every frame towards its neighbours, in place.
    Blend(BlendArgs),
    /// Encode every batch into a video (requires `ffmpeg`).
    Encode(EncodeArgs),
}

#[derive(Parser, Debug)]
struct SourceArgs {
    /// Frame directory (or parent of `batch_NNNN` directories).
    #[arg(long)]
    dir: PathBuf,

    /// Glob pattern matched inside every batch directory.
    #[arg(long, default_value = "*")]
    pattern: String,

    /// Index frames by sorted file name instead of the numeric suffix.
    #[arg(long)]
    alphabetic: bool,

    /// Playback rate of the sequence on disk.
    #[arg(long, default_value_t = 25.0)]
    fps: f64,
}

impl SourceArgs {
    fn mode(&self) -> animseq::IndexMode {
        if self.alphabetic {
            animseq::IndexMode::Alphabetic
        } else {
            animseq::IndexMode::Numeric
        }
    }

    fn load(&self) -> anyhow::Result<animseq::AnimationSequence> {
        let seq = animseq::AnimationSequence::from_directory(
            &self.dir,
            &self.pattern,
            self.mode(),
            self.fps,
        )
        .with_context(|| format!("index '{}'", self.dir.display()))?;
        if !seq.is_defined() {
            anyhow::bail!("no frames found in '{}'", self.dir.display());
        }
        Ok(seq)
    }
}

#[derive(Parser, Debug)]
struct IndexArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Parser, Debug)]
struct TweenArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Output frames per input frame (2..=10).
    #[arg(long)]
    multiplier: usize,
}

#[derive(Parser, Debug)]
struct BlendArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Weight of the previous frame (0 < x <= 0.5).
    #[arg(long, default_value_t = 0.1)]
    fade_in: f32,

    /// Weight of the next frame (0 < x <= 0.5).
    #[arg(long, default_value_t = 0.1)]
    fade_out: f32,

    /// Number of smoothing passes (1..=10).
    #[arg(long, default_value_t = 1)]
    iterations: usize,
}

#[derive(Parser, Debug)]
struct EncodeArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Video file name; bare names are placed next to the frames.
    #[arg(long, default_value = animseq::encode_ffmpeg::DEFAULT_VIDEO_NAME)]
    name: String,

    /// Multiplier applied to the sequence fps.
    #[arg(long, default_value_t = 1.0)]
    framerate_factor: f64,

    /// Keep the source frames after a successful encode.
    #[arg(long)]
    keep_images: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => animseq::SeqConfig::load_or_init(path)
            .with_context(|| format!("load config '{}'", path.display()))?,
        None => animseq::SeqConfig::default(),
    };

    match cli.cmd {
        Command::Index(args) => cmd_index(args),
        Command::Tween(args) => cmd_tween(args, &config),
        Command::Blend(args) => cmd_blend(args, &config),
        Command::Encode(args) => cmd_encode(args, &config),
    }
}

fn cmd_index(args: IndexArgs) -> anyhow::Result<()> {
    let seq = animseq::AnimationSequence::from_directory(
        &args.source.dir,
        &args.source.pattern,
        args.source.mode(),
        args.source.fps,
    )?;
    let json = serde_json::to_string_pretty(&seq).context("serialize sequence")?;
    println!("{json}");
    Ok(())
}

fn cmd_tween(args: TweenArgs, config: &animseq::SeqConfig) -> anyhow::Result<()> {
    let seq = args.source.load()?;
    let tween = animseq::Tween::new(args.multiplier)?;
    let processor = animseq::WindowedProcessor::new(config);
    let out = tween.apply_to(&processor, &seq)?;
    print_summary(&out);
    Ok(())
}

fn cmd_blend(args: BlendArgs, config: &animseq::SeqConfig) -> anyhow::Result<()> {
    let seq = args.source.load()?;
    let blend = animseq::BlendSmoothing::new(args.fade_in, args.fade_out, args.iterations)?;
    let processor = animseq::WindowedProcessor::new(config);
    let out = blend.apply_to(&processor, &seq)?;
    print_summary(&out);
    Ok(())
}

fn cmd_encode(args: EncodeArgs, config: &animseq::SeqConfig) -> anyhow::Result<()> {
    let seq = args.source.load()?;
    if !animseq::encode_ffmpeg::is_ffmpeg_on_path(&config.ffmpeg) {
        tracing::warn!(program = %config.ffmpeg.path, "encoder binary did not answer -version");
    }
    let options = animseq::EncodeOptions {
        name: args.name,
        framerate_factor: args.framerate_factor,
        remove_images: !args.keep_images,
    };
    let log = animseq::encode_sequence(&seq, &options, config);
    for message in log.messages() {
        println!("{message}");
    }
    let encoded = log
        .messages()
        .filter(|m| m.starts_with("Generated video"))
        .count();
    if encoded < seq.num_batches() {
        anyhow::bail!("encoded {encoded} of {} batches", seq.num_batches());
    }
    Ok(())
}

fn print_summary(seq: &animseq::AnimationSequence) {
    println!(
        "frames: {} batches: {} fps: {}",
        seq.len(),
        seq.num_batches(),
        seq.frame_counter().frames_per_second()
    );
}
