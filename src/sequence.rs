use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use crate::{
    core::FrameCounter,
    error::{SeqError, SeqResult},
    frame_index::{FrameIndexMap, IndexMode, UNPARSEABLE_INDEX, list_images_in_directory},
};

/// Read-only view binding a [`FrameCounter`] to the frame files of every batch.
///
/// The counter's fps is authoritative for playback. A sequence is only as complete as
/// its shortest batch: `num_batches` is the minimum number of paths over all indices.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnimationSequence {
    frame_counter: FrameCounter,
    frames: FrameIndexMap,
    num_batches: usize,
}

impl AnimationSequence {
    pub fn new(frame_counter: FrameCounter, frames: FrameIndexMap) -> Self {
        let num_batches = frames.values().map(Vec::len).min().unwrap_or(0);
        Self {
            frame_counter,
            frames,
            num_batches,
        }
    }

    /// A sequence without frames, e.g. while the animation is still being rendered.
    pub fn undefined(frame_counter: FrameCounter) -> Self {
        Self::new(frame_counter, FrameIndexMap::new())
    }

    /// Index `directory` and bind it to `FrameCounter(len - 1, len, fps)`.
    ///
    /// Files without a numeric suffix (the `-1` bucket) are not part of the sequence.
    pub fn from_directory(
        directory: &Path,
        pattern: &str,
        mode: IndexMode,
        fps: f64,
    ) -> SeqResult<Self> {
        let mut frames = list_images_in_directory(directory, pattern, mode)?;
        if let Some(skipped) = frames.remove(&UNPARSEABLE_INDEX) {
            tracing::warn!(
                count = skipped.len(),
                "ignoring files without a numeric frame suffix"
            );
        }
        let len = frames.len() as i64;
        Ok(Self::new(FrameCounter::new(len - 1, len, fps), frames))
    }

    pub fn is_defined(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    pub fn fps(&self) -> f64 {
        self.frame_counter.frames_per_second()
    }

    pub fn frames(&self) -> &FrameIndexMap {
        &self.frames
    }

    /// Number of distinct frame indices.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn batches(&self) -> Range<usize> {
        0..self.num_batches
    }

    pub fn frame_indices(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.keys().copied()
    }

    /// Paths of batch `batch` in frame-index order. Each call starts a fresh iteration.
    pub fn image_files_of_batch(
        &self,
        batch: usize,
    ) -> SeqResult<impl Iterator<Item = &Path> + '_> {
        if batch >= self.num_batches {
            return Err(SeqError::validation(format!(
                "batch {batch} out of range (sequence has {} batches)",
                self.num_batches
            )));
        }
        Ok(self.frames.values().map(move |paths| paths[batch].as_path()))
    }

    /// Owned copy of [`Self::image_files_of_batch`].
    pub fn batch_files(&self, batch: usize) -> SeqResult<Vec<PathBuf>> {
        Ok(self
            .image_files_of_batch(batch)?
            .map(Path::to_path_buf)
            .collect())
    }
}
