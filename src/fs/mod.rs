use std::path::{Component, Path, PathBuf};

use eyre::Result;
use tracing::*;

/// A scratch directory under the system temp dir, removed on drop.
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub async fn new() -> Result<TempDir> {
        Self::with_prefix("mkci-workdir").await
    }

    pub async fn with_prefix(prefix: &str) -> Result<TempDir> {
        let mut path = std::env::temp_dir();
        path.push(format!("{prefix}-{}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&path).await?;
        debug!("created temp dir {path:?}");

        Ok(TempDir { path })
    }

    pub fn path_view(&self) -> PathBuf {
        self.path.clone()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        debug!("dropping temp dir {:?}", self.path);
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("could not remove temp dir {:?}: {e}", self.path);
            }
        }
    }
}

impl AsRef<Path> for TempDir {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Lexically resolve `.` and `..` components without touching the disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Recursively collect every regular file under `root`. Symlinks are not
/// followed and not returned.
#[async_recursion::async_recursion]
pub async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    let mut read_dir = tokio::fs::read_dir(root).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let file_type = entry.file_type().await?;
        if file_type.is_dir() {
            let mut sub_paths = list_files(&entry.path()).await?;
            paths.append(&mut sub_paths);
        } else if file_type.is_file() {
            paths.push(entry.path());
        }
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_files_recurses() -> Result<()> {
        let tmp = TempDir::new().await?;
        let root = tmp.path_view();
        tokio::fs::create_dir_all(root.join("a/b")).await?;
        tokio::fs::write(root.join("top"), "1").await?;
        tokio::fs::write(root.join("a/b/deep"), "2").await?;
        tokio::fs::symlink("top", root.join("link")).await?;

        let mut files = list_files(&root).await?;
        files.sort();

        assert_eq!(files, vec![root.join("a/b/deep"), root.join("top")]);

        Ok(())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/src/mk/./debian")), PathBuf::from("/src/mk/debian"));
        assert_eq!(normalize(Path::new("/src/mk/..")), PathBuf::from("/src"));
        assert_eq!(normalize(Path::new("/src/mk/sub/../..")), PathBuf::from("/src"));
    }

    #[tokio::test]
    async fn test_temp_dir_is_removed() -> Result<()> {
        let path = {
            let tmp = TempDir::with_prefix("mkci-test").await?;
            assert!(tmp.path_view().is_dir());
            tmp.path_view()
        };
        assert!(!path.exists());
        Ok(())
    }
}
