//! Directory traversal collecting files with their modification times.
//!
//! The scan is a pure read: running it twice over an unchanged tree yields
//! the same set of entries.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Exclude patterns (file-name substrings)
    pub exclude_patterns: Vec<String>,

    /// Directories pruned by full path, e.g. the app dir under a watched home
    pub exclude_dirs: Vec<PathBuf>,
}

/// A file discovered during walking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Path relative to the scanned root (the file name when the root is a file)
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Last modification time (seconds since Unix epoch)
    pub modified: i64,
}

impl FileInfo {
    /// Build a FileInfo from a DirEntry.
    /// Returns None for directories, symlinks to directories, and broken symlinks.
    fn from_entry(entry: &DirEntry, root: &Path) -> io::Result<Option<Self>> {
        let metadata = if entry.path_is_symlink() {
            match std::fs::metadata(entry.path()) {
                Ok(resolved) => resolved,
                // Broken symlink
                Err(_) => return Ok(None),
            }
        } else {
            entry.metadata()?
        };

        if metadata.is_dir() {
            return Ok(None);
        }

        let path = entry.path().to_path_buf();
        let relative_path = if entry.depth() == 0 {
            PathBuf::from(entry.file_name())
        } else {
            path.strip_prefix(root).unwrap_or(&path).to_path_buf()
        };

        Ok(Some(Self {
            path,
            relative_path,
            size: metadata.len(),
            modified: metadata.mtime(),
        }))
    }
}

/// Walk `root` (a directory or a single file) and collect every regular file
///
/// # Arguments
/// * `root` - Directory or file to scan
/// * `options` - Walking options (links and exclusions)
///
/// # Returns
/// * `Ok(Vec<FileInfo>)` - All files found, in walk order
/// * `Err(io::Error)` - If the root itself cannot be read
///
/// Files that vanish while the walk is running are skipped with a warning.
///
/// # Example
/// ```no_run
/// use backuper::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let files = walk_directory(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} files", files.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    let entries = WalkDir::new(root)
        .follow_links(options.follow_links)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_exclude(e, options));

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() > 0 && is_not_found(&err) => {
                warn!("Skipping vanished path: {}", err);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match FileInfo::from_entry(&entry, root) {
            Ok(Some(file_info)) => files.push(file_info),
            Ok(None) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("Skipping vanished file: {}", entry.path().display());
            }
            Err(err) => return Err(err),
        }
    }

    Ok(files)
}

fn is_not_found(err: &walkdir::Error) -> bool {
    err.io_error()
        .map(|e| e.kind() == io::ErrorKind::NotFound)
        .unwrap_or(false)
}

/// Check if a directory entry should be excluded by name pattern or path
fn should_exclude(entry: &DirEntry, options: &WalkOptions) -> bool {
    if options.exclude_dirs.iter().any(|dir| entry.path() == dir) {
        return true;
    }
    let file_name = entry.file_name().to_string_lossy();
    options
        .exclude_patterns
        .iter()
        .any(|pattern| file_name.contains(pattern.as_str()))
}
