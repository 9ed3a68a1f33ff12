//! fsync helpers.
//!
//! Creating or renaming a file updates its parent directory entry, so both the
//! file and the directory have to be synced before a write counts as durable.

use std::fs::File;
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created or renamed inside it survive a
/// power loss.
///
/// Directories cannot be opened as files on Windows; there the rename itself
/// is the durability boundary and this is a no-op.
#[cfg(unix)]
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    File::open(dir_path)?.sync_all()
}

/// Syncs a directory so that entries created or renamed inside it survive a
/// power loss.
#[cfg(not(unix))]
pub fn fsync_dir(_dir_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn fsync_file_works() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut file = File::create(&path).expect("create");
        file.write_all(b"{}").expect("write");

        fsync_file(&file).expect("fsync file");
    }

    #[test]
    fn fsync_dir_works() {
        let dir = tempdir().expect("tempdir");
        File::create(dir.path().join("state.json")).expect("create");

        fsync_dir(dir.path()).expect("fsync dir");
    }

    #[cfg(unix)]
    #[test]
    fn fsync_dir_fails_on_nonexistent() {
        let result = fsync_dir(Path::new("/nonexistent/openbdr/state/dir"));
        assert!(result.is_err());
    }
}
