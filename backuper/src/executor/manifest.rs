//! In-memory backup state used to pick the files of the next archive.
//!
//! A file is selected when it was modified at or after the last successful
//! backup, or when it has never been archived before. The archived set only
//! grows unless pruning of deleted files is switched on.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::fs::walker::FileInfo;

/// Per-job backup state: last backup time plus every path archived so far.
#[derive(Debug, Clone, Default)]
pub struct BackupManifest {
    last_backup_time: i64,
    archived: HashSet<PathBuf>,
    prune_deleted: bool,
}

impl BackupManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget archived paths that are no longer on disk at selection time
    pub fn with_pruning(mut self, prune_deleted: bool) -> Self {
        self.prune_deleted = prune_deleted;
        self
    }

    pub fn last_backup_time(&self) -> i64 {
        self.last_backup_time
    }

    pub fn archived(&self) -> &HashSet<PathBuf> {
        &self.archived
    }

    pub fn is_archived(&self, path: &std::path::Path) -> bool {
        self.archived.contains(path)
    }

    /// Files of `current` that belong in the next archive, sorted by path.
    ///
    /// Does not change the manifest; call [`record`](Self::record) once the
    /// archive has been built and uploaded.
    pub fn select(&self, current: &[FileInfo]) -> Vec<FileInfo> {
        let mut selected: Vec<FileInfo> = current
            .iter()
            .filter(|file| {
                file.modified >= self.last_backup_time || !self.archived.contains(&file.path)
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.path.cmp(&b.path));
        selected
    }

    /// Commit a successful round: remember the archived files and move the
    /// backup time forward to `backup_time` (never backwards).
    pub fn record<'a, I>(&mut self, archived: I, backup_time: i64)
    where
        I: IntoIterator<Item = &'a FileInfo>,
    {
        self.archived
            .extend(archived.into_iter().map(|file| file.path.clone()));
        self.last_backup_time = self.last_backup_time.max(backup_time);
    }

    /// Drop archived paths that are absent from the latest scan.
    /// Returns how many were forgotten; a no-op unless pruning is enabled.
    pub fn prune(&mut self, current: &[FileInfo]) -> usize {
        if !self.prune_deleted {
            return 0;
        }
        let present: HashSet<&PathBuf> = current.iter().map(|file| &file.path).collect();
        let before = self.archived.len();
        self.archived.retain(|path| present.contains(path));
        before - self.archived.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, modified: i64) -> FileInfo {
        FileInfo {
            path: PathBuf::from("/data").join(name),
            relative_path: PathBuf::from(name),
            size: 1,
            modified,
        }
    }

    fn names(files: &[FileInfo]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.relative_path.display().to_string())
            .collect()
    }

    #[test]
    fn test_first_round_selects_everything() {
        let manifest = BackupManifest::new();
        let current = vec![file("b.txt", 10), file("a.txt", 5)];

        assert_eq!(names(&manifest.select(&current)), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_second_round_without_changes_is_empty() {
        let mut manifest = BackupManifest::new();
        let current = vec![file("a.txt", 100)];

        let selected = manifest.select(&current);
        manifest.record(&selected, 200);

        assert!(manifest.select(&current).is_empty());
    }

    #[test]
    fn test_modified_and_new_files_are_selected() {
        let mut manifest = BackupManifest::new();
        let selected = manifest.select(&[file("a.txt", 100)]);
        manifest.record(&selected, 200);

        let current = vec![file("a.txt", 250), file("b.txt", 260), file("c.txt", 150)];
        // c.txt is old but was never archived, so it is captured once
        assert_eq!(
            names(&manifest.select(&current)),
            vec!["a.txt", "b.txt", "c.txt"]
        );
    }

    #[test]
    fn test_mtime_equal_to_backup_time_is_selected() {
        let mut manifest = BackupManifest::new();
        manifest.record(&[file("a.txt", 100)], 200);

        assert_eq!(names(&manifest.select(&[file("a.txt", 200)])), vec!["a.txt"]);
        assert!(manifest.select(&[file("a.txt", 199)]).is_empty());
    }

    #[test]
    fn test_selection_shrinks_as_threshold_grows() {
        let current: Vec<FileInfo> = (0..20).map(|i| file(&format!("f{i}.txt"), i * 10)).collect();

        let mut previous = usize::MAX;
        for threshold in (0..=220).step_by(15) {
            let mut manifest = BackupManifest::new();
            manifest.record(&current, threshold);
            let count = manifest.select(&current).len();
            assert!(count <= previous, "threshold {threshold}: {count} > {previous}");
            assert!(manifest
                .select(&current)
                .iter()
                .all(|f| f.modified >= threshold));
            previous = count;
        }
    }

    #[test]
    fn test_archived_set_only_grows() {
        let mut manifest = BackupManifest::new();
        let rounds = vec![
            vec![file("a.txt", 10)],
            vec![file("b.txt", 20)],
            // a.txt deleted from disk
            vec![file("b.txt", 30)],
        ];

        let mut previous = manifest.archived().clone();
        for (round, current) in rounds.iter().enumerate() {
            manifest.prune(current);
            let selected = manifest.select(current);
            manifest.record(&selected, 100 + round as i64);
            assert!(manifest.archived().is_superset(&previous));
            previous = manifest.archived().clone();
        }
        assert!(manifest.is_archived(&PathBuf::from("/data/a.txt")));
    }

    #[test]
    fn test_pruning_forgets_deleted_files() {
        let mut manifest = BackupManifest::new().with_pruning(true);
        manifest.record(&[file("a.txt", 10), file("b.txt", 10)], 50);

        let forgotten = manifest.prune(&[file("b.txt", 10)]);

        assert_eq!(forgotten, 1);
        assert!(!manifest.is_archived(&PathBuf::from("/data/a.txt")));
        assert!(manifest.is_archived(&PathBuf::from("/data/b.txt")));
    }

    #[test]
    fn test_backup_time_never_moves_backwards() {
        let none: Vec<FileInfo> = Vec::new();
        let mut manifest = BackupManifest::new();
        manifest.record(&none, 500);
        manifest.record(&none, 300);
        assert_eq!(manifest.last_backup_time(), 500);
    }
}
