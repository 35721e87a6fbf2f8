//! Owner-only files for key material and tokens.

use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Create `dir` and its parents; the leaf is restricted to the owner.
pub(crate) fn create_private_dir(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `contents` to `path` through a sibling temp file and rename. The
/// temp file is created owner-only, and removed if anything fails before
/// the rename.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
    if let Some(parent) = parent {
        create_private_dir(parent)?;
    }

    // `tempfile` opens with O_EXCL and mode 0600 on unix.
    let mut tmp = NamedTempFile::new_in(parent.unwrap_or_else(|| Path::new(".")))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_replaces_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a").join("b.json");
        write_private_file(&path, b"one").expect("write");
        write_private_file(&path, b"two").expect("rewrite");
        assert_eq!(std::fs::read(&path).expect("read"), b"two");
        assert_eq!(entries(&dir.path().join("a")), vec!["b.json".to_string()]);
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A non-empty directory cannot be replaced by a file
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).expect("mkdir");
        std::fs::write(path.join("inner"), b"x").expect("write");

        assert!(write_private_file(&path, b"secret").is_err());
        assert_eq!(entries(dir.path()), vec!["taken".to_string()]);
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read_dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[cfg(unix)]
    #[test]
    fn test_private_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let sub = dir.path().join("identity");
        let path = sub.join("secret.json");
        std::fs::create_dir_all(&sub).expect("mkdir");
        std::fs::write(&path, b"old").expect("write");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).expect("chmod");

        write_private_file(&path, b"data").expect("write");

        let file_mode = std::fs::metadata(&path).expect("meta").permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = std::fs::metadata(&sub).expect("meta").permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }
}
