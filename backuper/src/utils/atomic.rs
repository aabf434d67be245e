//! Whole-file replacement that readers never observe half-written.

use std::io::{self, Write};
use std::path::Path;

/// Write `contents` to a sibling temp file, sync it, then rename over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new().prefix(".tmp-").tempfile_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_replaces_existing_file() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("state.json");
        std::fs::write(&path, b"old contents that are longer")?;

        write_atomic(&path, b"{}")?;

        assert_eq!(std::fs::read(&path)?, b"{}");
        assert_eq!(std::fs::read_dir(temp_dir.path())?.count(), 1);
        Ok(())
    }
}
