//! Crash-safe file replacement.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write `contents` to `path` through a temporary file in the same directory
/// followed by a rename, so readers only ever see the old or the new file.
///
/// The containing directory is created when missing.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    // Keep the permissions of the file being replaced
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
