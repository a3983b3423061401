use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::error::{SeqError, SeqResult};

/// Prefix of numbered batch sub-directories (`batch_0001`, `batch_0002`, ...).
pub const BATCH_DIR_PREFIX: &str = "batch_";

/// Extensions (lowercase, without dot) recognized as frame images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "tiff", "gif", "bmp", "webp"];

/// Frame index used for files whose name carries no numeric suffix.
pub const UNPARSEABLE_INDEX: i64 = -1;

/// Frame index -> one path per batch, in batch order.
pub type FrameIndexMap = BTreeMap<i64, Vec<PathBuf>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IndexMode {
    /// Index parsed from the digits after the last `_` of the file stem.
    #[default]
    Numeric,
    /// Index is the position in lexical order of the matched paths.
    Alphabetic,
}

pub fn batch_dir_name(batch_number: u32) -> String {
    format!("{BATCH_DIR_PREFIX}{batch_number:04}")
}

/// Directories that hold frames: the numbered batch directories if `batch_0001` exists,
/// otherwise `directory` itself.
pub fn search_roots(directory: &Path) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for n in 1..=9999u32 {
        let candidate = directory.join(batch_dir_name(n));
        if !candidate.is_dir() {
            break;
        }
        roots.push(candidate);
    }
    if roots.is_empty() {
        roots.push(directory.to_path_buf());
    }
    roots
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Digits after the last `_` of the file stem, or [`UNPARSEABLE_INDEX`].
pub fn frame_number_from_name(path: &Path) -> i64 {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return UNPARSEABLE_INDEX;
    };
    let token = stem.rsplit('_').next().unwrap_or(stem);
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return UNPARSEABLE_INDEX;
    }
    token.parse::<i64>().unwrap_or(UNPARSEABLE_INDEX)
}

/// Index the frame images below `directory`.
///
/// A missing directory yields an empty map. Batch directories are visited in order, so
/// every value list holds at most one path per batch, in batch order.
#[tracing::instrument]
pub fn list_images_in_directory(
    directory: &Path,
    pattern: &str,
    mode: IndexMode,
) -> SeqResult<FrameIndexMap> {
    let mut result = FrameIndexMap::new();
    if !directory.is_dir() {
        tracing::debug!("directory does not exist, nothing to index");
        return Ok(result);
    }

    for root in search_roots(directory) {
        let mut files = match_images(&root, pattern)?;
        match mode {
            IndexMode::Alphabetic => {
                files.sort();
                for (idx, path) in files.into_iter().enumerate() {
                    result.entry(idx as i64).or_default().push(path);
                }
            }
            IndexMode::Numeric => {
                for path in files {
                    let idx = frame_number_from_name(&path);
                    result.entry(idx).or_default().push(path);
                }
            }
        }
    }

    tracing::debug!(indices = result.len(), "indexed directory");
    Ok(result)
}

/// Image files directly inside `root` whose file name matches `pattern`, sorted.
///
/// Patterns match file names only; a pattern with a path separator is rejected.
fn match_images(root: &Path, pattern: &str) -> SeqResult<Vec<PathBuf>> {
    let matcher = file_name_pattern(pattern)?;
    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..glob::MatchOptions::new()
    };

    let entries =
        std::fs::read_dir(root).with_context(|| format!("read directory '{}'", root.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read directory '{}'", root.display()))?;
        let path = entry.path();
        let name = entry.file_name();
        if !matcher.matches_with(&name.to_string_lossy(), options)
            || !path.is_file()
            || !is_image_file(&path)
        {
            continue;
        }
        let abs = std::path::absolute(&path)
            .with_context(|| format!("resolve path '{}'", path.display()))?;
        files.push(abs);
    }
    files.sort();
    Ok(files)
}

pub(crate) fn file_name_pattern(pattern: &str) -> SeqResult<glob::Pattern> {
    if pattern.contains(['/', '\\']) {
        return Err(SeqError::validation(format!(
            "pattern '{pattern}' must match file names, not paths"
        )));
    }
    glob::Pattern::new(pattern)
        .map_err(|e| SeqError::validation(format!("invalid glob pattern '{pattern}': {e}")))
}
