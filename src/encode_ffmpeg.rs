use std::{
    io::Write as _,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::Context as _;

use crate::{
    config::{FfmpegConfig, SeqConfig},
    error::{SeqError, SeqResult},
    log_entry::LogEntry,
    sequence::AnimationSequence,
    workset::unique_token,
};

pub const DEFAULT_VIDEO_NAME: &str = "video";

#[derive(Clone, Debug, PartialEq)]
pub struct EncodeOptions {
    /// Video file name; a bare name is placed next to the first frame of each batch.
    pub name: String,
    /// Multiplier applied to the sequence fps.
    pub framerate_factor: f64,
    /// Delete the source frames of a batch once its video was written.
    pub remove_images: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_VIDEO_NAME.to_string(),
            framerate_factor: 1.0,
            remove_images: true,
        }
    }
}

pub fn is_ffmpeg_on_path(config: &FfmpegConfig) -> bool {
    Command::new(&config.path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> SeqResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Contents of an ffmpeg concat demuxer list showing every file for `1 / fps` seconds.
pub fn concat_list(files: &[PathBuf], fps: f64) -> String {
    let duration = 1.0 / fps;
    let mut out = String::new();
    for file in files {
        let name = file.to_string_lossy().replace('\\', "/");
        out.push_str(&format!("file '{name}'\nduration {duration}\n"));
    }
    out
}

/// Replace `%FPS%`, `%FRAMES%` and `%OUTPUT%` in every template argument.
pub fn substitute_arguments(
    template: &[String],
    fps: f64,
    frames_list: &Path,
    output: &Path,
) -> Vec<String> {
    let replacements = [
        ("%FPS%", fps.to_string()),
        ("%FRAMES%", frames_list.to_string_lossy().into_owned()),
        ("%OUTPUT%", output.to_string_lossy().into_owned()),
    ];
    template
        .iter()
        .map(|arg| {
            replacements
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect()
}

/// Encode `files` into `output` with the configured ffmpeg command line.
#[tracing::instrument(skip(config, files, output), fields(frames = files.len(), output = %output.display()))]
pub fn encode_files(
    config: &FfmpegConfig,
    files: &[PathBuf],
    fps: f64,
    output: &Path,
) -> SeqResult<()> {
    if files.is_empty() {
        return Err(SeqError::validation("no frames to encode"));
    }
    if !(fps.is_finite() && fps > 0.0) {
        return Err(SeqError::validation(format!(
            "encode fps must be positive, got {fps}"
        )));
    }
    ensure_parent_dir(output)?;

    let list_path = std::env::temp_dir().join(format!("animseq_frames_{}.txt", unique_token()));
    let list = ListFile::create(list_path, &concat_list(files, fps))?;

    let args = substitute_arguments(&config.arguments, fps, list.path(), output);
    tracing::debug!(program = %config.path, ?args, "running encoder");
    let out = Command::new(&config.path)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            SeqError::encode(format!(
                "failed to spawn '{}' (is it installed and on PATH?): {e}",
                config.path
            ))
        })?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(SeqError::encode(format!(
            "'{}' exited with status {}: {}",
            config.path,
            out.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Concat list on disk, removed when dropped.
struct ListFile {
    path: PathBuf,
}

impl ListFile {
    fn create(path: PathBuf, contents: &str) -> SeqResult<Self> {
        let mut f = std::fs::File::create(&path)
            .with_context(|| format!("create frame list '{}'", path.display()))?;
        let list = Self { path };
        f.write_all(contents.as_bytes())
            .with_context(|| format!("write frame list '{}'", list.path.display()))?;
        Ok(list)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ListFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// `name` with its extension replaced by `ext` (a leading dot on `ext` is ignored).
pub fn make_video_filename(name: &str, ext: &str) -> PathBuf {
    Path::new(name).with_extension(ext.trim_matches('.'))
}

/// First path of `name`, `name_2`, `name_3`, ... that does not exist yet.
///
/// A bare file name is resolved against `default_dir`.
pub fn find_free_filename(name: &Path, default_dir: &Path) -> PathBuf {
    let base = if name.parent().is_none_or(|p| p.as_os_str().is_empty()) {
        default_dir.join(name)
    } else {
        name.to_path_buf()
    };

    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = base.clone();
    let mut n = 1;
    while candidate.exists() {
        n += 1;
        candidate = base.with_file_name(format!("{stem}_{n}{ext}"));
    }
    candidate
}

/// Encode every batch of `sequence` into its own video.
///
/// A failed batch is reported in the returned log and the next batch is attempted.
/// An undefined sequence produces an empty log.
#[tracing::instrument(skip_all, fields(batches = sequence.num_batches()))]
pub fn encode_sequence(
    sequence: &AnimationSequence,
    options: &EncodeOptions,
    config: &SeqConfig,
) -> LogEntry {
    let mut log = LogEntry::default();
    if !sequence.is_defined() {
        return log;
    }

    let filename = make_video_filename(&options.name, &config.ffmpeg.file_extension);
    let fps = sequence.fps() * options.framerate_factor;
    for batch in sequence.batches() {
        match encode_batch(sequence, batch, &filename, fps, options.remove_images, config) {
            Ok(video) => {
                tracing::info!(batch, video = %video.display(), "generated video");
                log = log.add(format!("Generated video '{}'", video.display()));
            }
            Err(e) => {
                tracing::error!(batch, error = %e, "video encoding failed");
                log = log.add(format!("Failed to encode batch {batch}: {e}"));
            }
        }
    }
    log
}

fn encode_batch(
    sequence: &AnimationSequence,
    batch: usize,
    filename: &Path,
    fps: f64,
    remove_images: bool,
    config: &SeqConfig,
) -> SeqResult<PathBuf> {
    let images = sequence.batch_files(batch)?;
    let default_dir = images
        .first()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let video = find_free_filename(filename, &default_dir);
    encode_files(&config.ffmpeg, &images, fps, &video)?;

    if remove_images {
        for image in images.iter().filter(|p| p.is_file()) {
            std::fs::remove_file(image)
                .with_context(|| format!("remove encoded frame '{}'", image.display()))?;
        }
    }
    Ok(video)
}
