use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use eyre::{eyre, Result};
use tokio_tar::Archive;
use tracing::*;

use crate::fs::{list_files, TempDir};
use crate::project::Project;

use super::hash::hash_directory;

const DOCKERFILE: &[u8] = include_bytes!("../../assets/Dockerfile");
const ENTRYPOINT: &[u8] = include_bytes!("../../assets/entrypoint");

/// A pristine Docker build context: the committed `.github/docker` and
/// debian directories from `HEAD`, plus a `Dockerfile` and `entrypoint`.
/// Removed when dropped.
pub struct BuildContext {
    dir: TempDir,
}

impl BuildContext {
    pub async fn assemble(
        project: &Project,
        dockerfile: Option<&Path>,
        entrypoint: Option<&Path>,
    ) -> Result<Self> {
        let dir = TempDir::with_prefix("mkci-tmp-context").await?;
        let debian_dir = project.settings().debian_dir();

        let archive = project
            .runner()
            .output(
                &project
                    .cmd("git")
                    .args(["archive", "--format=tar", "HEAD", "--", ".github/docker"])
                    .arg(debian_dir.to_string_lossy()),
            )
            .await?;
        debug!("unpacking {} byte git archive", archive.stdout.len());
        Archive::new(archive.stdout.as_slice())
            .unpack(dir.path_view())
            .await?;

        let context = Self { dir };
        context
            .place("Dockerfile", dockerfile, DOCKERFILE, 0o644)
            .await?;
        context
            .place("entrypoint", entrypoint, ENTRYPOINT, 0o755)
            .await?;

        Ok(context)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path_view()
    }

    pub async fn hash(&self) -> Result<String> {
        hash_directory(&self.path()).await
    }

    /// `<mode> <size> ./<path>` for every file, sorted by path.
    pub async fn listing(&self) -> Result<Vec<String>> {
        let root = self.path();
        let mut files = list_files(&root).await?;
        files.sort();

        let mut lines = Vec::with_capacity(files.len());
        for file in files {
            let metadata = tokio::fs::metadata(&file).await?;
            lines.push(format!(
                "{:o} {:>8} ./{}",
                metadata.permissions().mode() & 0o7777,
                metadata.len(),
                file.strip_prefix(&root)?.display()
            ));
        }
        Ok(lines)
    }

    async fn place(
        &self,
        name: &str,
        source: Option<&Path>,
        builtin: &[u8],
        mode: u32,
    ) -> Result<()> {
        let dest = self.path().join(name);
        match source {
            Some(source) => {
                debug!("copying {} to {}", source.display(), dest.display());
                tokio::fs::copy(source, &dest)
                    .await
                    .map_err(|e| eyre!("could not copy {}: {e}", source.display()))?;
            }
            None => {
                debug!("writing built-in {name}");
                tokio::fs::write(&dest, builtin).await?;
                tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(mode)).await?;
            }
        }
        Ok(())
    }
}
