use std::path::Path;

use eyre::Result;
use sha2::{Digest, Sha256};
use tracing::*;

use crate::fs::list_files;

/// Fingerprint a directory's file contents.
///
/// Each regular file contributes a `<sha256>  ./<relative path>` line. The
/// lines are sorted bytewise, so neither traversal order nor the host's
/// locale matter, and the digest of the newline-terminated list is the
/// result.
pub async fn hash_directory(dir: &Path) -> Result<String> {
    let files = list_files(dir).await?;

    let mut entries = Vec::with_capacity(files.len());
    for file in &files {
        let contents = tokio::fs::read(file).await?;
        let relative = file.strip_prefix(dir)?;
        entries.push(format!(
            "{:x}  ./{}",
            Sha256::digest(&contents),
            relative.display()
        ));
    }
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    let hash = format!("{:x}", hasher.finalize());
    debug!("hashed {} files in {}: {hash}", entries.len(), dir.display());

    Ok(hash)
}
