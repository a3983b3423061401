use std::{
    collections::BTreeMap,
    fs::OpenOptions,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::Context as _;

use crate::error::{SeqError, SeqResult};

/// Name of the lock file a pass holds in every directory it rewrites.
pub const LOCK_FILE_NAME: &str = ".animseq.lock";

/// Uncommitted output of one batch: temp path -> final path.
///
/// Exactly one of [`TempFileSet::finalize`] and [`TempFileSet::remove`] takes effect.
/// Dropping a set that still holds entries removes the temp files, unless it was told to
/// [`TempFileSet::keep`] them.
#[derive(Debug, Default)]
pub struct TempFileSet {
    files: BTreeMap<PathBuf, PathBuf>,
    keep: bool,
}

impl TempFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, temp_path: PathBuf, final_path: PathBuf) {
        self.files.insert(temp_path, final_path);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn final_paths(&self) -> impl Iterator<Item = &Path> {
        self.files.values().map(PathBuf::as_path)
    }

    pub fn temp_paths(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// Forget every entry without touching the disk, once the temp files were moved.
    pub fn forget(&mut self) {
        self.files.clear();
    }

    /// Leave the temp files on disk when the set is dropped.
    pub fn keep(&mut self) {
        self.keep = true;
    }

    /// Unlink every temp file. Files that were never written are skipped.
    pub fn remove(&mut self) -> SeqResult<()> {
        let mut first_err = None;
        for temp in std::mem::take(&mut self.files).into_keys() {
            match std::fs::remove_file(&temp) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %temp.display(), error = %e, "failed to remove temp file");
                    first_err.get_or_insert_with(|| {
                        SeqError::processing(format!(
                            "failed to remove temp file '{}': {e}",
                            temp.display()
                        ))
                    });
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Rename every temp file onto its final path through `journal`.
    ///
    /// Entries stay in the set: if the journal is rolled back the temp files are back
    /// under their temp names and the set still owns them.
    pub fn move_into_place(&self, journal: &mut RenameJournal) -> SeqResult<()> {
        for (temp, final_path) in &self.files {
            journal.rename(temp, final_path)?;
        }
        Ok(())
    }

    /// Rename every temp file onto its final path and clear the set.
    ///
    /// All or nothing: on failure the files already moved are put back under their temp
    /// names and the set is unchanged.
    pub fn finalize(&mut self) -> SeqResult<()> {
        let mut journal = RenameJournal::new();
        if let Err(e) = self.move_into_place(&mut journal) {
            if let Err(undo) = journal.rollback() {
                self.keep();
                return Err(SeqError::processing(format!("{e}; {undo}")));
            }
            return Err(e);
        }
        journal.complete();
        self.forget();
        Ok(())
    }
}

impl Drop for TempFileSet {
    fn drop(&mut self) {
        if self.keep {
            if !self.files.is_empty() {
                tracing::warn!(count = self.files.len(), "leaving temp files on disk");
            }
            return;
        }
        if !self.files.is_empty() {
            tracing::debug!(count = self.files.len(), "discarding uncommitted temp files");
            let _ = self.remove();
        }
    }
}

/// Renames applied during a commit, undone newest first unless the commit completes.
///
/// Dropping a journal that was neither completed nor rolled back undoes its renames.
#[derive(Debug, Default)]
pub struct RenameJournal {
    applied: Vec<(PathBuf, PathBuf)>,
}

impl RenameJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn rename(&mut self, from: &Path, to: &Path) -> SeqResult<()> {
        std::fs::rename(from, to)
            .with_context(|| format!("move '{}' to '{}'", from.display(), to.display()))?;
        self.applied.push((from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    /// Keep every rename applied so far.
    pub fn complete(mut self) {
        self.applied.clear();
    }

    /// Undo every rename, newest first.
    ///
    /// Undo keeps going past a failed step; the error names every file that could not be
    /// moved back.
    pub fn rollback(&mut self) -> SeqResult<()> {
        let mut stranded = Vec::new();
        while let Some((from, to)) = self.applied.pop() {
            if let Err(e) = std::fs::rename(&to, &from) {
                tracing::error!(from = %to.display(), to = %from.display(), error = %e, "failed to undo rename");
                stranded.push(format!("'{}' (belongs at '{}')", to.display(), from.display()));
            }
        }
        if stranded.is_empty() {
            return Ok(());
        }
        Err(SeqError::processing(format!(
            "rollback incomplete, files left at: {}",
            stranded.join(", ")
        )))
    }
}

impl Drop for RenameJournal {
    fn drop(&mut self) {
        if !self.applied.is_empty() {
            let _ = self.rollback();
        }
    }
}

/// Exclusive claim on a directory for the duration of one pass.
///
/// The lock is a file created with create-new semantics and removed on drop.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> SeqResult<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(SeqError::validation(format!(
                "directory '{}' is being processed by another pass (remove '{}' if it is stale)",
                dir.display(),
                path.display()
            ))),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("create lock file '{}'", path.display()))
                .into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock file");
        }
    }
}

/// Token that keeps temp file names of concurrent passes apart.
pub fn unique_token() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!(
        "{}_{}_{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

pub(crate) fn ensure_dir(dir: &Path) -> SeqResult<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create directory '{}'", dir.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("animseq_{name}_{}", unique_token()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn finalize_moves_and_clears() {
        let dir = temp_dir("workset_finalize");
        let tmp = dir.join("tmp_1.png");
        let fin = dir.join("seq_1.png");
        std::fs::write(&tmp, b"data").unwrap();

        let mut set = TempFileSet::new();
        set.add(tmp.clone(), fin.clone());
        set.finalize().unwrap();
        assert!(set.is_empty());
        assert!(!tmp.exists());
        assert_eq!(std::fs::read(&fin).unwrap(), b"data");

        drop(set);
        assert!(fin.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn finalize_replaces_existing_final_file() {
        let dir = temp_dir("workset_replace");
        let tmp = dir.join("tmp_0.png");
        let fin = dir.join("seq_0.png");
        std::fs::write(&fin, b"old").unwrap();
        std::fs::write(&tmp, b"new").unwrap();

        let mut set = TempFileSet::new();
        set.add(tmp, fin.clone());
        set.finalize().unwrap();
        assert_eq!(std::fs::read(&fin).unwrap(), b"new");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn remove_and_drop_unlink_temp_files() {
        let dir = temp_dir("workset_remove");
        let a = dir.join("tmp_a.png");
        let b = dir.join("tmp_b.png");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let mut set = TempFileSet::new();
        set.add(a.clone(), dir.join("seq_a.png"));
        set.add(dir.join("never_written.png"), dir.join("seq_x.png"));
        set.remove().unwrap();
        assert!(!a.exists());

        {
            let mut dropped = TempFileSet::new();
            dropped.add(b.clone(), dir.join("seq_b.png"));
        }
        assert!(!b.exists());
        assert!(!dir.join("seq_b.png").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn failed_finalize_puts_moved_files_back() {
        let dir = temp_dir("workset_all_or_nothing");
        let a = dir.join("tmp_a.png");
        let b = dir.join("tmp_b.png");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();
        // A non-empty directory cannot be replaced by a file.
        std::fs::create_dir_all(dir.join("seq_b.png").join("inner")).unwrap();

        let mut set = TempFileSet::new();
        set.add(a.clone(), dir.join("seq_a.png"));
        set.add(b.clone(), dir.join("seq_b.png"));
        assert!(set.finalize().is_err());
        assert_eq!(set.len(), 2);
        assert_eq!(std::fs::read(&a).unwrap(), b"a");
        assert_eq!(std::fs::read(&b).unwrap(), b"b");
        assert!(!dir.join("seq_a.png").exists());

        drop(set);
        assert!(!a.exists());
        assert!(!b.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn journal_rolls_back_newest_first() {
        let dir = temp_dir("workset_journal");
        let a = dir.join("a.png");
        std::fs::write(&a, b"a").unwrap();

        let mut journal = RenameJournal::new();
        journal.rename(&a, &dir.join("b.png")).unwrap();
        journal.rename(&dir.join("b.png"), &dir.join("c.png")).unwrap();
        assert_eq!(journal.len(), 2);
        journal.rollback().unwrap();
        assert!(journal.is_empty());
        assert_eq!(std::fs::read(&a).unwrap(), b"a");
        assert!(!dir.join("c.png").exists());

        let mut kept = RenameJournal::new();
        kept.rename(&a, &dir.join("d.png")).unwrap();
        kept.complete();
        assert!(dir.join("d.png").exists());

        {
            let mut dropped = RenameJournal::new();
            dropped.rename(&dir.join("d.png"), &dir.join("e.png")).unwrap();
        }
        assert!(dir.join("d.png").exists());
        assert!(!dir.join("e.png").exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = temp_dir("workset_lock");
        let lock = DirLock::acquire(&dir).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(
            DirLock::acquire(&dir).unwrap_err(),
            SeqError::Validation(_)
        ));
        drop(lock);
        assert!(!dir.join(LOCK_FILE_NAME).exists());
        DirLock::acquire(&dir).unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(unique_token(), unique_token());
    }
}
