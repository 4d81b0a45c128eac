//! Capacity gate run before anything is created.

use std::fs::File;
use std::path::Path;

use nix::sys::statfs::statfs;

use crate::{Error, Result};

/// Free inode and block counts as reported for unprivileged users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsCapacity {
    pub free_inodes: u64,
    pub free_blocks: u64,
}

impl FsCapacity {
    /// Query the filesystem holding `dir`.
    #[allow(clippy::unnecessary_cast)]
    pub fn probe(dir: &Path) -> Result<Self> {
        let stat = statfs(dir).map_err(|source| Error::Statfs {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            free_inodes: stat.files_free() as u64,
            free_blocks: stat.blocks_available() as u64,
        })
    }

    /// Every level costs one inode and at least one block.
    pub fn check(&self, max_depth: u64, margin: u64) -> Result<()> {
        let want = max_depth.saturating_add(margin);
        if self.free_inodes < want {
            return Err(Error::NotEnoughInodes {
                want,
                have: self.free_inodes,
            });
        }
        if self.free_blocks < want {
            return Err(Error::NotEnoughBlocks {
                want,
                have: self.free_blocks,
            });
        }
        Ok(())
    }
}

/// Probe, check, then confirm `dir` can be opened.
pub fn check_dir(dir: &Path, max_depth: u64, margin: u64) -> Result<FsCapacity> {
    let capacity = FsCapacity::probe(dir)?;
    capacity.check(max_depth, margin)?;
    File::open(dir).map_err(|source| Error::OpenDir {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(capacity)
}
