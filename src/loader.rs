use std::path::Path;

use anyhow::Context as _;

use crate::{
    core::FrameCounter,
    error::SeqResult,
    frame::Frame,
    frame_index::{IndexMode, file_name_pattern, list_images_in_directory},
};

/// Patterns counted by [`count_matching_files`] when the caller has no preference.
pub const DEFAULT_COUNT_PATTERNS: &str = "*.jpg|*.png|*.jpeg";

/// Frames stored for one counter position, one per batch.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameEntry {
    pub frames: Vec<Frame>,
    /// File name of the first batch's frame.
    pub name: String,
}

/// Load every batch's frame at `counter.current_frame`.
///
/// Returns `None` when the directory holds nothing for that index, so callers can fall
/// back to a default image.
#[tracing::instrument(skip(counter), fields(frame = counter.current_frame()))]
pub fn load_frame_entry(
    counter: &FrameCounter,
    directory: &Path,
    pattern: &str,
    mode: IndexMode,
) -> SeqResult<Option<FrameEntry>> {
    let mut entries = list_images_in_directory(directory, pattern, mode)?;
    let Some(paths) = entries
        .remove(&(counter.current_frame() as i64))
        .filter(|p| !p.is_empty())
    else {
        return Ok(None);
    };

    let name = paths[0]
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let frames = paths
        .iter()
        .map(|p| Frame::load(p))
        .collect::<SeqResult<Vec<_>>>()?;
    Ok(Some(FrameEntry { frames, name }))
}

/// Counter positioned just after the highest frame index found in `directory`.
///
/// Resuming a render this way continues where the previous run stopped.
pub fn directory_frame_counter(
    directory: &Path,
    pattern: &str,
    mode: IndexMode,
    total_frames: i64,
    frames_per_second: f64,
) -> SeqResult<FrameCounter> {
    let entries = list_images_in_directory(directory, pattern, mode)?;
    let current = entries
        .last_key_value()
        .map(|(max, _)| max + 1)
        .unwrap_or(0);
    Ok(FrameCounter::new(current, total_frames, frames_per_second))
}

/// Number of entries directly in `directory` matched by `patterns`.
///
/// `patterns` is a `|`-separated list of file name globs; every pattern is counted on its
/// own, so an entry matched by two patterns counts twice. Names starting with a dot only
/// match patterns that start with a dot. A missing directory counts as zero.
pub fn count_matching_files(directory: &Path, patterns: &str) -> SeqResult<usize> {
    let matchers = patterns
        .split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(file_name_pattern)
        .collect::<SeqResult<Vec<_>>>()?;
    if !directory.is_dir() {
        return Ok(0);
    }

    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };
    let mut count = 0;
    for entry in std::fs::read_dir(directory)
        .with_context(|| format!("read directory '{}'", directory.display()))?
    {
        let entry = entry.with_context(|| format!("read directory '{}'", directory.display()))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        count += matchers
            .iter()
            .filter(|m| m.matches_with(&name, options))
            .count();
    }
    Ok(count)
}
