//! Sliding-window rewrite of an [`AnimationSequence`].
//!
//! A pass runs in two phases:
//!
//! 1. **Stage**: for every batch, every output frame is rendered and written to a temp file
//!    (`tmp_<token>_<index><ext>`) next to the inputs. Nothing else on disk changes.
//! 2. **Commit**: only after all batches staged cleanly, every input is renamed to a
//!    backup (`bak_<token>_<name>`), every temp file is renamed onto `seq_<index><ext>`
//!    and the backups are deleted.
//!
//! A failure while staging drops every staged set, which deletes the temp files. A failure
//! while committing undoes the renames already made, newest first, before the temp files
//! are deleted. Either way the whole sequence is left exactly as it started.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::SeqConfig,
    core::FrameCounter,
    error::{SeqError, SeqResult},
    frame::Frame,
    frame_index::FrameIndexMap,
    sequence::AnimationSequence,
    workset::{DirLock, RenameJournal, TempFileSet, unique_token},
};

/// Output frames of one window, keyed by output frame index.
pub type WindowOutput = BTreeMap<usize, Frame>;

/// Where the window currently is within its batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowPosition {
    pub index: usize,
    pub last_index: usize,
}

impl WindowPosition {
    pub fn is_last(&self) -> bool {
        self.index == self.last_index
    }
}

/// Frame transform driven by [`WindowedProcessor::run`].
///
/// `frames[k]` is the input frame at `position.index + offsets[k]`, clamped into the batch.
pub trait WindowTransform {
    fn offsets(&self) -> &[i64];

    fn apply(&mut self, position: WindowPosition, frames: &[&Frame]) -> SeqResult<WindowOutput>;
}

/// Prefix of committed output files.
pub const OUTPUT_PREFIX: &str = "seq_";
const TEMP_PREFIX: &str = "tmp_";
const BACKUP_PREFIX: &str = "bak_";

pub fn output_file_name(index: usize, ext: &str) -> String {
    format!("{OUTPUT_PREFIX}{index:08}{ext}")
}

#[derive(Clone, Debug)]
pub struct WindowedProcessor {
    jpeg_quality: u8,
}

impl Default for WindowedProcessor {
    fn default() -> Self {
        Self::new(&SeqConfig::default())
    }
}

impl WindowedProcessor {
    pub fn new(config: &SeqConfig) -> Self {
        Self {
            jpeg_quality: config.encoding.jpeg_quality,
        }
    }

    /// Run `transform` over every window of every batch and commit the renumbered result.
    ///
    /// The returned sequence has `FrameCounter(len - 1, len, fps * len / old_len)`, so the
    /// playback duration is unchanged when the transform changes the frame count.
    pub fn run<T: WindowTransform + ?Sized>(
        &self,
        sequence: &AnimationSequence,
        transform: &mut T,
    ) -> SeqResult<AnimationSequence> {
        let offsets = transform.offsets().to_vec();
        self.process(sequence, &offsets, |position, frames| {
            transform.apply(position, frames)
        })
    }

    #[tracing::instrument(skip(self, sequence, transform), fields(batches = sequence.num_batches()))]
    pub fn process<F>(
        &self,
        sequence: &AnimationSequence,
        offsets: &[i64],
        mut transform: F,
    ) -> SeqResult<AnimationSequence>
    where
        F: FnMut(WindowPosition, &[&Frame]) -> SeqResult<WindowOutput>,
    {
        if !sequence.is_defined() {
            return Err(SeqError::validation(
                "cannot process an undefined animation sequence",
            ));
        }
        if offsets.is_empty() {
            return Err(SeqError::validation("window offsets must not be empty"));
        }

        let inputs = sequence
            .batches()
            .map(|b| sequence.batch_files(b))
            .collect::<SeqResult<Vec<_>>>()?;
        let Some(first_batch) = inputs.first() else {
            return Err(SeqError::validation("animation sequence has no complete batch"));
        };
        let old_length = first_batch.len();
        let ext = extension_of(&first_batch[0]);

        let out_dirs = inputs
            .iter()
            .map(|files| batch_dir_of(files))
            .collect::<SeqResult<Vec<_>>>()?;
        let distinct_dirs = out_dirs.iter().collect::<BTreeSet<_>>();
        if distinct_dirs.len() != out_dirs.len() {
            return Err(SeqError::validation(
                "two batches of the sequence share an output directory",
            ));
        }
        let _locks = distinct_dirs
            .into_iter()
            .map(|dir| DirLock::acquire(dir))
            .collect::<SeqResult<Vec<_>>>()?;

        let token = unique_token();
        let mut staged = Vec::with_capacity(inputs.len());
        for (batch, (files, out_dir)) in inputs.iter().zip(&out_dirs).enumerate() {
            let span = tracing::debug_span!("stage_batch", batch, frames = files.len());
            let _enter = span.enter();
            staged.push(self.stage_batch(files, offsets, out_dir, &ext, &token, &mut transform)?);
        }

        let mut frames = FrameIndexMap::new();
        let mut new_length = 0usize;
        for outputs in commit(staged, &inputs, &token)? {
            new_length = new_length.max(outputs.len());
            for (index, path) in outputs {
                frames.entry(index as i64).or_default().push(path);
            }
        }

        let new_fps = sequence.fps() * (new_length as f64 / old_length as f64);
        tracing::info!(
            old_length,
            new_length,
            old_fps = sequence.fps(),
            new_fps,
            "committed windowed pass"
        );
        let len = new_length as i64;
        Ok(AnimationSequence::new(
            FrameCounter::new(len - 1, len, new_fps),
            frames,
        ))
    }

    fn stage_batch<F>(
        &self,
        files: &[PathBuf],
        offsets: &[i64],
        out_dir: &Path,
        ext: &str,
        token: &str,
        transform: &mut F,
    ) -> SeqResult<StagedBatch>
    where
        F: FnMut(WindowPosition, &[&Frame]) -> SeqResult<WindowOutput>,
    {
        let last_index = files.len() - 1;
        let min_offset = offsets.iter().copied().min().unwrap_or(0);
        let mut cache = WindowCache::new(files);
        let mut workset = TempFileSet::new();
        let mut outputs = BTreeMap::new();

        for index in 0..files.len() {
            cache.evict_below(clamp_index(index as i64 + min_offset, last_index));
            let window = offsets
                .iter()
                .map(|off| cache.get(clamp_index(index as i64 + off, last_index)))
                .collect::<SeqResult<Vec<_>>>()?;
            let refs: Vec<&Frame> = window.iter().map(Arc::as_ref).collect();

            let produced = transform(WindowPosition { index, last_index }, &refs)?;
            for (out_index, frame) in produced {
                let temp_path = out_dir.join(format!("{TEMP_PREFIX}{token}_{out_index:08}{ext}"));
                let final_path = out_dir.join(output_file_name(out_index, ext));
                workset.add(temp_path.clone(), final_path.clone());
                frame.save(&temp_path, self.jpeg_quality)?;
                outputs.insert(out_index, final_path);
            }
        }

        tracing::debug!(outputs = outputs.len(), "staged batch");
        Ok(StagedBatch { workset, outputs })
    }
}

/// Fully rendered, not yet committed output of one batch.
struct StagedBatch {
    workset: TempFileSet,
    outputs: BTreeMap<usize, PathBuf>,
}

/// Swap every batch's inputs for its staged outputs, or change nothing.
///
/// Inputs are first moved aside to backups, so an output that reuses an input name never
/// overwrites the only copy of a frame.
fn commit(
    mut staged: Vec<StagedBatch>,
    inputs: &[Vec<PathBuf>],
    token: &str,
) -> SeqResult<Vec<BTreeMap<usize, PathBuf>>> {
    let mut journal = RenameJournal::new();
    let mut backups = Vec::new();
    if let Err(e) = swap_files(&staged, inputs, token, &mut journal, &mut backups) {
        tracing::warn!(error = %e, renames = journal.len(), "commit failed, rolling back");
        if let Err(undo) = journal.rollback() {
            for batch in &mut staged {
                batch.workset.keep();
            }
            return Err(SeqError::processing(format!("commit failed: {e}; {undo}")));
        }
        return Err(e);
    }
    journal.complete();

    for backup in &backups {
        if let Err(e) = std::fs::remove_file(backup) {
            tracing::warn!(path = %backup.display(), error = %e, "failed to remove backup frame");
        }
    }
    Ok(staged
        .into_iter()
        .map(|mut batch| {
            batch.workset.forget();
            batch.outputs
        })
        .collect())
}

fn swap_files(
    staged: &[StagedBatch],
    inputs: &[Vec<PathBuf>],
    token: &str,
    journal: &mut RenameJournal,
    backups: &mut Vec<PathBuf>,
) -> SeqResult<()> {
    for old in inputs.iter().flatten() {
        match std::fs::symlink_metadata(old) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            _ => {}
        }
        let name = old.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        let backup = old.with_file_name(format!("{BACKUP_PREFIX}{token}_{name}"));
        journal.rename(old, &backup)?;
        backups.push(backup);
    }
    for batch in staged {
        batch.workset.move_into_place(journal)?;
    }
    Ok(())
}

/// Decoded input frames of one batch, dropped once the window has moved past them.
struct WindowCache<'a> {
    files: &'a [PathBuf],
    loaded: HashMap<usize, Arc<Frame>>,
}

impl<'a> WindowCache<'a> {
    fn new(files: &'a [PathBuf]) -> Self {
        Self {
            files,
            loaded: HashMap::new(),
        }
    }

    fn get(&mut self, index: usize) -> SeqResult<Arc<Frame>> {
        if let Some(frame) = self.loaded.get(&index) {
            return Ok(Arc::clone(frame));
        }
        let frame = Arc::new(Frame::load(&self.files[index])?);
        self.loaded.insert(index, Arc::clone(&frame));
        Ok(frame)
    }

    fn evict_below(&mut self, index: usize) {
        self.loaded.retain(|&k, _| k >= index);
    }
}

fn clamp_index(index: i64, last_index: usize) -> usize {
    index.clamp(0, last_index as i64) as usize
}

/// Lowercase extension including the dot, e.g. `.png`.
fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// The one directory every file of a batch lives in.
fn batch_dir_of(files: &[PathBuf]) -> SeqResult<PathBuf> {
    let dir = output_dir_of(&files[0])?;
    for file in &files[1..] {
        if output_dir_of(file)? != dir {
            return Err(SeqError::validation(format!(
                "batch spans several directories: '{}' is not in '{}'",
                file.display(),
                dir.display()
            )));
        }
    }
    Ok(dir)
}

fn output_dir_of(path: &Path) -> SeqResult<PathBuf> {
    let abs = std::path::absolute(path).map_err(|e| {
        SeqError::processing(format!("resolve path '{}': {e}", path.display()))
    })?;
    abs.parent().map(Path::to_path_buf).ok_or_else(|| {
        SeqError::processing(format!("'{}' has no parent directory", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_index::{IndexMode, list_images_in_directory};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("animseq_{name}_{}", unique_token()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_frames(dir: &Path, values: &[u8]) {
        std::fs::create_dir_all(dir).unwrap();
        for (i, v) in values.iter().enumerate() {
            Frame::solid(2, 2, [*v, *v, *v, 255])
                .save(&dir.join(format!("frame_{i:05}.png")), 95)
                .unwrap();
        }
    }

    fn sequence(dir: &Path, fps: f64) -> AnimationSequence {
        AnimationSequence::from_directory(dir, "*", IndexMode::Numeric, fps).unwrap()
    }

    fn red(path: &Path) -> u8 {
        Frame::load(path).unwrap().pixel(0, 0).unwrap()[0]
    }

    #[test]
    fn clamp_reads_boundary_frames() {
        assert_eq!(clamp_index(-1, 4), 0);
        assert_eq!(clamp_index(5, 4), 4);
        assert_eq!(clamp_index(2, 4), 2);
    }

    #[test]
    fn identity_pass_renumbers_files() {
        let dir = temp_dir("proc_identity");
        write_frames(&dir, &[10, 20, 30]);
        let seq = sequence(&dir, 24.0);

        let out = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out.fps(), 24.0);
        assert_eq!(out.frame_counter().current_frame(), 2);
        assert!(out.frame_counter().is_final_frame());

        let files = out.batch_files(0).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["seq_00000000.png", "seq_00000001.png", "seq_00000002.png"]
        );
        assert_eq!(red(&files[2]), 30);
        assert!(!dir.join("frame_00000.png").exists());
        assert!(!dir.join(crate::workset::LOCK_FILE_NAME).exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn window_offsets_are_clamped_at_edges() {
        let dir = temp_dir("proc_window");
        write_frames(&dir, &[1, 2, 3]);
        let seq = sequence(&dir, 10.0);

        let mut seen = Vec::new();
        WindowedProcessor::default()
            .process(&seq, &[-1, 0, 1], |pos, frames| {
                seen.push(
                    frames
                        .iter()
                        .map(|f| f.pixel(0, 0).unwrap()[0])
                        .collect::<Vec<_>>(),
                );
                assert_eq!(pos.last_index, 2);
                Ok(BTreeMap::from([(pos.index, frames[1].clone())]))
            })
            .unwrap();

        assert_eq!(seen, vec![vec![1, 1, 2], vec![1, 2, 3], vec![2, 3, 3]]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn fan_out_rescales_fps() {
        let dir = temp_dir("proc_fanout");
        write_frames(&dir, &[5, 6]);
        let seq = sequence(&dir, 12.0);

        let out = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok((0..3)
                    .map(|k| (pos.index * 3 + k, frames[0].clone()))
                    .collect())
            })
            .unwrap();
        assert_eq!(out.len(), 6);
        assert_eq!(out.fps(), 36.0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failure_leaves_inputs_untouched() {
        let dir = temp_dir("proc_fail");
        write_frames(&dir, &[1, 2, 3, 4, 5]);
        let before = list_images_in_directory(&dir, "*", IndexMode::Numeric).unwrap();
        let seq = sequence(&dir, 10.0);

        let err = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                if pos.index == 2 {
                    return Err(SeqError::processing("boom"));
                }
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap_err();
        assert!(err.to_string().contains("boom"));

        let after = list_images_in_directory(&dir, "*", IndexMode::Numeric).unwrap();
        assert_eq!(before, after);
        let leftovers = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with(OUTPUT_PREFIX) || name.starts_with(TEMP_PREFIX) || name.starts_with('.')
            })
            .count();
        assert_eq!(leftovers, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn blocked_rename_rolls_back_the_commit() {
        let dir = temp_dir("proc_rollback");
        write_frames(&dir, &[10, 20, 30]);
        let originals: Vec<Vec<u8>> = (0..3)
            .map(|i| std::fs::read(dir.join(format!("frame_{i:05}.png"))).unwrap())
            .collect();
        let seq = sequence(&dir, 10.0);
        // A non-empty directory where the second output frame has to go.
        std::fs::create_dir_all(dir.join("seq_00000001.png").join("inner")).unwrap();

        let result = WindowedProcessor::default().process(&seq, &[0], |pos, frames| {
            Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
        });
        assert!(result.is_err());

        for (i, bytes) in originals.iter().enumerate() {
            let path = dir.join(format!("frame_{i:05}.png"));
            assert_eq!(&std::fs::read(&path).unwrap(), bytes, "{}", path.display());
        }
        assert_eq!(
            entry_names(&dir),
            vec![
                "frame_00000.png",
                "frame_00001.png",
                "frame_00002.png",
                "seq_00000001.png",
            ]
        );
        assert!(dir.join("seq_00000001.png").join("inner").is_dir());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn successful_commit_leaves_no_backups() {
        let dir = temp_dir("proc_backups");
        write_frames(&dir, &[1, 2]);
        let seq = sequence(&dir, 10.0);

        WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap();
        assert_eq!(
            entry_names(&dir),
            vec!["seq_00000000.png", "seq_00000001.png"]
        );

        // Outputs reuse the input names on the second pass.
        let seq = sequence(&dir, 10.0);
        let out = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap();
        assert_eq!(
            entry_names(&dir),
            vec!["seq_00000000.png", "seq_00000001.png"]
        );
        assert_eq!(red(&out.batch_files(0).unwrap()[1]), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn batch_spanning_directories_is_rejected() {
        let dir = temp_dir("proc_mixed_dirs");
        let first = dir.join(crate::frame_index::batch_dir_name(1));
        let second = dir.join(crate::frame_index::batch_dir_name(2));
        write_frames(&first, &[1, 2]);
        write_frames(&second, &[3, 4, 5]);
        let seq = sequence(&dir, 10.0);
        assert_eq!(seq.num_batches(), 1);

        let err = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap_err();
        assert!(matches!(err, SeqError::Validation(_)), "{err}");
        assert_eq!(entry_names(&first), vec!["frame_00000.png", "frame_00001.png"]);
        assert_eq!(
            entry_names(&second),
            vec!["frame_00000.png", "frame_00001.png", "frame_00002.png"]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn batches_sharing_a_directory_are_rejected() {
        let dir = temp_dir("proc_shared_dir");
        write_frames(&dir, &[1, 2]);
        Frame::solid(2, 2, [9, 9, 9, 255])
            .save(&dir.join("other_0.png"), 95)
            .unwrap();
        Frame::solid(2, 2, [9, 9, 9, 255])
            .save(&dir.join("other_1.png"), 95)
            .unwrap();
        let seq = sequence(&dir, 10.0);
        assert_eq!(seq.num_batches(), 2);

        let err = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap_err();
        assert!(matches!(err, SeqError::Validation(_)), "{err}");
        assert_eq!(entry_names(&dir).len(), 4);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn undefined_sequence_and_empty_offsets_are_rejected() {
        let undefined = AnimationSequence::undefined(FrameCounter::default());
        let proc = WindowedProcessor::default();
        assert!(matches!(
            proc.process(&undefined, &[0], |_, _| Ok(WindowOutput::new())),
            Err(SeqError::Validation(_))
        ));

        let dir = temp_dir("proc_offsets");
        write_frames(&dir, &[1]);
        let seq = sequence(&dir, 10.0);
        assert!(matches!(
            proc.process(&seq, &[], |_, _| Ok(WindowOutput::new())),
            Err(SeqError::Validation(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn locked_directory_is_rejected() {
        let dir = temp_dir("proc_locked");
        write_frames(&dir, &[1, 2]);
        let seq = sequence(&dir, 10.0);
        let held = DirLock::acquire(&dir).unwrap();

        let err = WindowedProcessor::default()
            .process(&seq, &[0], |pos, frames| {
                Ok(BTreeMap::from([(pos.index, frames[0].clone())]))
            })
            .unwrap_err();
        assert!(matches!(err, SeqError::Validation(_)));
        assert!(dir.join("frame_00000.png").exists());
        drop(held);
        std::fs::remove_dir_all(&dir).ok();
    }
}
