//! Output-volume primitives: free-space sampling and rip-output cleanup.

use std::io;
use std::path::Path;

use crate::wire::protocol::FsUsage;

/// Sample total and free bytes for the volume holding `path`.
///
/// Free is what an unprivileged writer can actually use (`f_bavail`,
/// not `f_bfree`).
pub fn free_space(path: &Path) -> io::Result<FsUsage> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
    Ok(FsUsage {
        total: stat.fragment_size() as u64 * stat.blocks() as u64,
        free: stat.fragment_size() as u64 * stat.blocks_available() as u64,
    })
}

/// Delete every entry in the output directory, returning how many went.
///
/// Stops at the first failure; entries already removed stay removed.
pub async fn tidy(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        tokio::fs::remove_file(entry.path()).await?;
        removed += 1;
    }
    Ok(removed)
}
