//! Zip archive creation for one backup round.
//!
//! Entries are stored relative to the watched root. The archive is written
//! under a temporary name in the archive directory and renamed into place
//! only once complete, so a failed round never leaves a truncated archive.
//!
//! Files that disappear between the scan and the write are skipped; any other
//! read error fails the round.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Timelike};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::utils::Result;

/// Archive name timestamp, e.g. `2024-01-15_14-30-00`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// A finished archive on disk
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub path: PathBuf,

    /// Source files actually written
    pub included: Vec<PathBuf>,

    /// Source files that vanished before they could be read
    pub skipped: Vec<PathBuf>,

    /// Archive size in bytes
    pub size: u64,
}

/// `<timestamp>_<root basename>.zip`
pub fn archive_name(root: &Path, now: &NaiveDateTime) -> String {
    let base = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    format!("{}_{}.zip", now.format(TIMESTAMP_FORMAT), base)
}

/// Entry name of `path` inside the archive: relative to `root`, `/`-separated.
/// A root that is itself a file is stored under its file name.
pub fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = if path == root {
        Path::new(path.file_name()?)
    } else {
        path.strip_prefix(root).ok()?
    };

    let parts: Vec<String> = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Option<_>>()?;

    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Package `files` (absolute paths under `root`) into one zip in `archive_dir`.
///
/// Returns `Ok(None)` when none of the files could be found any more.
pub fn build_archive(
    root: &Path,
    files: &[PathBuf],
    archive_dir: &Path,
    now: &NaiveDateTime,
) -> Result<Option<BuiltArchive>> {
    fs::create_dir_all(archive_dir)?;
    let final_path = archive_dir.join(archive_name(root, now));

    let mut temp = tempfile::Builder::new()
        .prefix(".partial-")
        .suffix(".zip")
        .tempfile_in(archive_dir)?;

    let mut included = Vec::with_capacity(files.len());
    let mut skipped = Vec::new();

    {
        let mut writer = ZipWriter::new(temp.as_file_mut());

        for path in files {
            let Some(name) = entry_name(root, path) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is not under {}", path.display(), root.display()),
                )
                .into());
            };

            let mut source = match File::open(path) {
                Ok(source) => source,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!("File vanished before archiving, skipping: {}", path.display());
                    skipped.push(path.clone());
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let metadata = source.metadata()?;
            if metadata.is_dir() {
                skipped.push(path.clone());
                continue;
            }

            let mut options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(metadata.permissions().mode())
                .large_file(metadata.len() >= u64::from(u32::MAX));
            if let Some(modified) = zip_time(metadata.mtime()) {
                options = options.last_modified_time(modified);
            }

            debug!("Adding {} as {}", path.display(), name);
            writer.start_file(name, options)?;
            io::copy(&mut source, &mut writer)?;
            included.push(path.clone());
        }

        writer.finish()?;
    }

    if included.is_empty() {
        // Dropping the temp file removes it
        return Ok(None);
    }

    temp.persist(&final_path).map_err(|e| e.error)?;
    let size = fs::metadata(&final_path)?.len();

    Ok(Some(BuiltArchive {
        path: final_path,
        included,
        skipped,
        size,
    }))
}

/// Zip timestamps are local wall-clock time with a 1980 epoch.
fn zip_time(mtime: i64) -> Option<zip::DateTime> {
    let local: DateTime<Local> = Local.timestamp_opt(mtime, 0).single()?;
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Read;
    use tempfile::TempDir;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 5)
            .unwrap()
    }

    fn entries(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name(Path::new("/home/user/documents"), &noon()),
            "2024-01-15_12-00-05_documents.zip"
        );
    }

    #[test]
    fn test_entry_name() {
        let root = Path::new("/data");
        assert_eq!(entry_name(root, Path::new("/data/a/b.txt")).as_deref(), Some("a/b.txt"));
        assert_eq!(entry_name(root, Path::new("/data")).as_deref(), Some("data"));
        assert_eq!(entry_name(root, Path::new("/elsewhere/c.txt")), None);
    }

    #[test]
    fn test_build_preserves_relative_paths() -> Result<()> {
        let source = TempDir::new()?;
        let out = TempDir::new()?;
        fs::create_dir(source.path().join("nested"))?;
        fs::write(source.path().join("top.txt"), b"top")?;
        fs::write(source.path().join("nested/deep.txt"), b"deep")?;

        let files = vec![
            source.path().join("nested/deep.txt"),
            source.path().join("top.txt"),
        ];
        let archive = build_archive(source.path(), &files, &out.path().join("archives"), &noon())?
            .expect("archive should be written");

        assert!(archive.path.starts_with(out.path().join("archives")));
        assert!(archive.size > 0);
        assert_eq!(entries(&archive.path), vec!["nested/deep.txt", "top.txt"]);

        let mut zip = zip::ZipArchive::new(File::open(&archive.path)?)?;
        let mut content = String::new();
        zip.by_name("nested/deep.txt")?.read_to_string(&mut content)?;
        assert_eq!(content, "deep");
        Ok(())
    }

    #[test]
    fn test_single_file_root() -> Result<()> {
        let source = TempDir::new()?;
        let out = TempDir::new()?;
        let file = source.path().join("report.pdf");
        fs::write(&file, b"%PDF")?;

        let archive = build_archive(&file, &[file.clone()], out.path(), &noon())?.unwrap();

        assert_eq!(
            archive.path.file_name().unwrap().to_string_lossy(),
            "2024-01-15_12-00-05_report.pdf.zip"
        );
        assert_eq!(entries(&archive.path), vec!["report.pdf"]);
        Ok(())
    }

    #[test]
    fn test_vanished_files_are_skipped() -> Result<()> {
        let source = TempDir::new()?;
        let out = TempDir::new()?;
        fs::write(source.path().join("kept.txt"), b"kept")?;

        let files = vec![source.path().join("gone.txt"), source.path().join("kept.txt")];
        let archive = build_archive(source.path(), &files, out.path(), &noon())?.unwrap();

        assert_eq!(archive.included, vec![source.path().join("kept.txt")]);
        assert_eq!(archive.skipped, vec![source.path().join("gone.txt")]);
        assert_eq!(entries(&archive.path), vec!["kept.txt"]);
        Ok(())
    }

    #[test]
    fn test_nothing_left_leaves_no_archive() -> Result<()> {
        let source = TempDir::new()?;
        let out = TempDir::new()?;

        let files = vec![source.path().join("gone.txt")];
        let archive = build_archive(source.path(), &files, out.path(), &noon())?;

        assert!(archive.is_none());
        assert_eq!(fs::read_dir(out.path())?.count(), 0);
        Ok(())
    }
}
