use std::path::{Path, PathBuf};

use crate::{
    config::SeqConfig,
    core::FrameCounter,
    error::{SeqError, SeqResult},
    frame::Frame,
    frame_index::{IndexMode, UNPARSEABLE_INDEX, batch_dir_name, list_images_in_directory},
    log_entry::LogEntry,
    sequence::AnimationSequence,
    workset::ensure_dir,
};

/// What the saver does once the counter has moved past the last frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtEndPolicy {
    #[default]
    StopOutput,
    RaiseError,
    KeepGoing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFileType {
    #[default]
    Png,
    Jpg,
}

impl OutputFileType {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
        }
    }

    fn pattern(self) -> String {
        format!("*.{}", self.extension())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SaverOptions {
    pub directory: PathBuf,
    pub prefix: String,
    /// Minimum width of the zero-padded frame number.
    pub digits: usize,
    pub at_end: AtEndPolicy,
    pub file_type: OutputFileType,
}

impl SaverOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "frame".to_string(),
            digits: 5,
            at_end: AtEndPolicy::default(),
            file_type: OutputFileType::default(),
        }
    }
}

/// Writes rendered frames to disk one counter step at a time.
///
/// A single frame lands directly in the output directory; several frames saved together
/// (one per batch variant) go to `batch_0001`, `batch_0002`, ... sub-directories.
#[derive(Clone, Debug)]
pub struct SequenceSaver {
    options: SaverOptions,
    jpeg_quality: u8,
}

impl SequenceSaver {
    pub fn new(options: SaverOptions, config: &SeqConfig) -> Self {
        Self {
            options,
            jpeg_quality: config.encoding.jpeg_quality,
        }
    }

    pub fn options(&self) -> &SaverOptions {
        &self.options
    }

    /// `<prefix>_<current frame padded to digits>.<ext>`
    pub fn file_name(&self, counter: &FrameCounter) -> String {
        format!(
            "{}_{:0width$}.{}",
            self.options.prefix,
            counter.current_frame(),
            self.options.file_type.extension(),
            width = self.options.digits
        )
    }

    fn target_dir(&self, batch: Option<usize>) -> PathBuf {
        match batch {
            // batch directories are numbered from 1
            Some(b) => self
                .options
                .directory
                .join(batch_dir_name(b as u32 + 1)),
            None => self.options.directory.clone(),
        }
    }

    /// Save `frames` for the current counter position.
    ///
    /// On the final frame the output directory is indexed and returned as a defined
    /// sequence; otherwise the returned sequence is undefined.
    #[tracing::instrument(skip(self, frames), fields(frame = counter.current_frame(), count = frames.len()))]
    pub fn save(
        &self,
        counter: &FrameCounter,
        frames: &[Frame],
    ) -> SeqResult<(AnimationSequence, LogEntry)> {
        if frames.is_empty() {
            return Err(SeqError::validation("no frames to save"));
        }

        let mut log = LogEntry::default();
        if counter.is_after_last_frame() {
            match self.options.at_end {
                AtEndPolicy::StopOutput => {
                    tracing::info!("reached end of animation, not saving output");
                    log = log.add("Reached end of animation - not saving output!");
                    return Ok((AnimationSequence::undefined(*counter), log));
                }
                AtEndPolicy::RaiseError => {
                    return Err(SeqError::validation(format!(
                        "reached end of animation (frame {} of {})",
                        counter.current_frame(),
                        counter.total_frames()
                    )));
                }
                AtEndPolicy::KeepGoing => {}
            }
        }

        let file_name = self.file_name(counter);
        let batched = frames.len() > 1;
        for (batch, frame) in frames.iter().enumerate() {
            let dir = self.target_dir(batched.then_some(batch));
            ensure_dir(&dir)?;
            frame.save(&dir.join(&file_name), self.jpeg_quality)?;
            let shown = std::path::absolute(&dir).unwrap_or_else(|_| dir.clone());
            log = log.add(format!("Saved {file_name} in {}", shown.display()));
        }

        if counter.is_final_frame() {
            let sequence = self.index_output(counter)?;
            return Ok((sequence, log));
        }
        Ok((AnimationSequence::undefined(*counter), log))
    }

    fn index_output(&self, counter: &FrameCounter) -> SeqResult<AnimationSequence> {
        let mut frames = list_images_in_directory(
            &self.options.directory,
            &self.options.file_type.pattern(),
            IndexMode::Numeric,
        )?;
        frames.remove(&UNPARSEABLE_INDEX);
        Ok(AnimationSequence::new(*counter, frames))
    }

    pub fn directory(&self) -> &Path {
        &self.options.directory
    }
}
