//! # Preflight checks
//!
//! Fail-fast, fail-early validation before anything is created.
//! Nothing here needs cleaning up when it fails.

use std::path::{Path, PathBuf};

use breakmaps_config::DescentConfig;
use breakmaps_core::capacity::{self, FsCapacity};
use console::style;

/// Result of preflight checks
#[derive(Debug, Default)]
pub struct PreflightResult {
    pub can_start: bool,
    pub start_dir: PathBuf,
    pub capacity: Option<FsCapacity>,
    pub errors: Vec<String>,
}

/// Enter the starting directory, then check the filesystem can hold the chain.
///
/// Returns PreflightResult with can_start=true only if ALL checks pass.
pub fn run_preflight(start: Option<&Path>, descent: &DescentConfig) -> PreflightResult {
    let mut result = PreflightResult::default();

    // Check 1: starting directory can be entered
    if let Some(dir) = start {
        if let Err(e) = std::env::set_current_dir(dir) {
            result
                .errors
                .push(format!("could not chdir {}: {}", dir.display(), e));
            return result;
        }
    }
    result.start_dir = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            result
                .errors
                .push(format!("could not resolve the starting directory: {}", e));
            return result;
        }
    };

    // Check 2: enough free inodes and blocks, directory accessible
    match capacity::check_dir(Path::new("."), descent.max_depth, descent.safety_margin) {
        Ok(capacity) => result.capacity = Some(capacity),
        Err(e) => {
            result.errors.push(e.to_string());
            return result;
        }
    }

    result.can_start = true;
    result
}

/// Print preflight errors to stderr with nice formatting
pub fn print_preflight_errors(result: &PreflightResult) {
    eprintln!();
    eprintln!(
        "{} {}",
        style("✘").red(),
        style("Preflight checks failed").red().bold()
    );
    for (i, error) in result.errors.iter().enumerate() {
        eprintln!("   {}. {}", i + 1, error);
    }
    eprintln!();
}

/// Print what the filesystem offers against what the run needs.
pub fn print_capacity(result: &PreflightResult, descent: &DescentConfig) {
    let want = descent.max_depth.saturating_add(descent.safety_margin);
    if let Some(capacity) = result.capacity {
        eprintln!("{}", style(result.start_dir.display()).bold());
        eprintln!(
            "   free inodes: {} (need {})",
            capacity.free_inodes, want
        );
        eprintln!(
            "   free blocks: {} (need {})",
            capacity.free_blocks, want
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_missing_start_dir() {
        let before = std::env::current_dir().unwrap();
        let result = run_preflight(
            Some(Path::new("/nonexistent/breakmaps-start")),
            &DescentConfig::default(),
        );
        assert!(!result.can_start);
        assert!(result.errors[0].starts_with("could not chdir /nonexistent/breakmaps-start"));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn test_preflight_insufficient_capacity() {
        let descent = DescentConfig {
            max_depth: u64::MAX - 1,
            ..DescentConfig::default()
        };
        let result = run_preflight(None, &descent);
        assert!(!result.can_start);
        assert!(result.errors[0].contains("fs needs at least"));
    }
}
