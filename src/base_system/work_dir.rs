//! Per-transfer working directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use uuid::Uuid;

/// A uniquely named directory under the configured root, owned by one transfer.
///
/// Removed recursively by [`WorkDir::remove`], or on drop as a fallback when a
/// transfer task unwinds before reaching its cleanup step.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    pub fn create(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let name = Uuid::new_v4().simple().to_string();
        let dir = tempfile::Builder::new()
            .prefix(&name)
            .rand_bytes(0)
            .tempdir_in(root)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Delete the directory and everything in it.
    pub async fn remove(self) -> io::Result<()> {
        tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(io::Error::other)?
    }
}

#[cfg(test)]
pub fn is_empty_dir(path: impl AsRef<Path>) -> io::Result<bool> {
    let mut entries = fs::read_dir(path.as_ref())?;
    Ok(entries.next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_unique_and_dropped() {
        let root = tempfile::TempDir::new().unwrap();
        let a = WorkDir::create(root.path()).unwrap();
        let b = WorkDir::create(root.path()).unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(a.path().parent(), Some(root.path()));

        let a_path = a.path().to_path_buf();
        fs::write(a.join("payload.bin"), b"data").unwrap();
        drop(a);
        assert!(!a_path.exists());
        drop(b);
        assert!(is_empty_dir(root.path()).unwrap());
    }

    #[tokio::test]
    async fn remove_deletes_nested_content() {
        let root = tempfile::TempDir::new().unwrap();
        let dir = WorkDir::create(&root.path().join("nested/root")).unwrap();
        let path = dir.path().to_path_buf();
        fs::create_dir(dir.join("sub")).unwrap();
        fs::write(dir.join("sub/file.txt"), b"x").unwrap();

        dir.remove().await.unwrap();
        assert!(!path.exists());
    }
}
