//! Filesystem primitives used by descent and unwind.
//!
//! Every level directory carries the same name, and the walker always sits
//! inside the deepest level, so no path history is kept: "the level below" is
//! always `<level name>` relative to where we are, and "the level above" is `..`.

use std::fs::{DirBuilder, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};

use crate::{level_name, marker_name};

/// Capability interface over the chain of nested levels.
pub trait LevelTree {
    /// Create the level directory below the current one.
    fn make_level(&mut self) -> io::Result<()>;

    /// Move into the level directory just created.
    fn enter_level(&mut self) -> io::Result<()>;

    /// Move up to the parent level.
    fn ascend(&mut self) -> io::Result<()>;

    /// Remove the (empty) level directory below the current one.
    fn remove_level(&mut self) -> io::Result<()>;

    /// Create the marker file in the current level and return an open descriptor.
    fn create_marker(&mut self) -> io::Result<OwnedFd>;

    /// Remove the marker's name from the current level.
    fn unlink_marker(&mut self) -> io::Result<()>;
}

/// Walks the process working directory.
#[derive(Debug, Clone)]
pub struct WorkingDirTree {
    level: String,
    marker: String,
}

impl WorkingDirTree {
    pub fn new() -> Self {
        Self {
            level: level_name(),
            marker: marker_name(),
        }
    }
}

impl Default for WorkingDirTree {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelTree for WorkingDirTree {
    fn make_level(&mut self) -> io::Result<()> {
        DirBuilder::new().mode(0o755).create(&self.level)
    }

    fn enter_level(&mut self) -> io::Result<()> {
        std::env::set_current_dir(&self.level)
    }

    fn ascend(&mut self) -> io::Result<()> {
        std::env::set_current_dir("..")
    }

    fn remove_level(&mut self) -> io::Result<()> {
        std::fs::remove_dir(&self.level)
    }

    fn create_marker(&mut self) -> io::Result<OwnedFd> {
        // Children of the interactive runner must not inherit the marker.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o644)
            .custom_flags(libc::O_CLOEXEC)
            .open(&self.marker)?;
        Ok(file.into())
    }

    fn unlink_marker(&mut self) -> io::Result<()> {
        std::fs::remove_file(&self.marker)
    }
}
