//! # breakmaps-core
//!
//! Engines behind the breakmaps stress run.
//!
//! Handles:
//! - Filesystem capacity gating
//! - Descent into (and unwind out of) a chain of nested directories
//! - Locating the lowest mapping and installing a page just below it
//! - A minimal fork/exec command runner for poking at the result

use std::path::PathBuf;

use thiserror::Error;

pub mod capacity;
pub mod depth;
pub mod descent;
pub mod interrupt;
pub mod maps;
pub mod progress;
pub mod shell;
pub mod tree;
pub mod unwind;

pub use depth::DepthCounter;
pub use tree::{LevelTree, WorkingDirTree};
pub use unwind::Trigger;

/// Length of the level directory and marker file names.
pub const NAME_LEN: usize = 255;

/// Name shared by every level directory.
pub fn level_name() -> String {
    "d".repeat(NAME_LEN)
}

/// Name of the marker file created at the bottom of the chain.
pub fn marker_name() -> String {
    "f".repeat(NAME_LEN)
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not statfs {}: {source}", path.display())]
    Statfs {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("could not open {}: {source}", path.display())]
    OpenDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fs needs at least {want} free inodes (has {have})")]
    NotEnoughInodes { want: u64, have: u64 },

    #[error("fs needs at least {want} free blocks (has {have})")]
    NotEnoughBlocks { want: u64, have: u64 },

    #[error("could not mkdir at depth {depth}: {source}")]
    MakeLevel {
        depth: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("could not chdir at depth {depth}: {source}")]
    EnterLevel {
        depth: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("could not open the marker file at depth {depth}: {source}")]
    CreateMarker {
        depth: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("could not unlink the marker file at depth {depth}: {source}")]
    UnlinkMarker {
        depth: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("could not chdir .. at depth {depth}: {source}")]
    Ascend {
        depth: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("could not rmdir at depth {depth}: {source}")]
    RemoveLevel {
        depth: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("could not open {}: {source}", path.display())]
    MapListing {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{} lists no mappings", path.display())]
    NoMappings { path: PathBuf },

    #[error("mapping entry {name:?} does not start with a hex address")]
    MalformedMapEntry { name: String },

    #[error("could not query the page size: {0}")]
    PageSize(nix::Error),

    #[error("lowest mapping at {lowest:#x} leaves no page below it")]
    NoRoomBelow { lowest: usize },

    #[error("could not mmap at {addr:#x}: {source}")]
    Map {
        addr: usize,
        #[source]
        source: nix::Error,
    },

    #[error("mmap at {wanted:#x} was relocated to {got:#x}")]
    Relocated { wanted: usize, got: usize },

    #[error("could not munmap {addr:#x}: {source}")]
    Unmap {
        addr: usize,
        #[source]
        source: nix::Error,
    },

    #[error("could not install signal handler for {signal}: {source}")]
    SignalSetup {
        signal: nix::sys::signal::Signal,
        #[source]
        source: nix::Error,
    },

    #[error("could not fork: {0}")]
    Fork(nix::Error),

    #[error("could not wait for child {pid}: {source}")]
    Wait {
        pid: nix::unistd::Pid,
        #[source]
        source: nix::Error,
    },

    #[error("command contains an interior NUL byte: {0:?}")]
    NulInCommand(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures that leave the on-disk chain out of step with the depth counter.
    pub fn is_unwind_failure(&self) -> bool {
        matches!(self, Error::Ascend { .. } | Error::RemoveLevel { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
