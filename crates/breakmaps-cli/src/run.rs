//! One full run: descend, map the marker, hand over to the runner, clean up.

use std::io;

use breakmaps_config::{
    log_descent_error, log_maps_error, log_maps_info, log_shell_warn, log_unwind_error,
    log_unwind_warn, Config,
};
use breakmaps_core::descent::{descend, Descended};
use breakmaps_core::interrupt::ProcessSignals;
use breakmaps_core::maps::{self, InstalledMapping};
use breakmaps_core::shell::{run_session, LineReader, SessionEnd};
use breakmaps_core::unwind::unwind;
use breakmaps_core::{DepthCounter, Trigger, WorkingDirTree};
use console::style;

use crate::progress::DepthBar;

/// Run everything after preflight. Returns the process exit code.
///
/// The working directory must already be the starting directory.
pub fn run(config: &Config) -> i32 {
    let signals = match ProcessSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            log_descent_error!("nothing created", error = e.to_string());
            return 1;
        }
    };

    let interval = config.descent.progress_interval;
    let mut tree = WorkingDirTree::new();
    let depth = DepthCounter::new(config.descent.max_depth);
    let mut bar = DepthBar::new();

    let trigger = match descend(&mut tree, &depth, &signals, &mut bar, interval) {
        Ok(Descended::Bottom { marker, .. }) => {
            match map_marker(config, marker) {
                Ok(mapping) => {
                    let trigger = interact(config, &signals);
                    if let Err(e) = mapping.release() {
                        log_maps_error!("could not drop the marker mapping", error = e.to_string());
                    }
                    trigger
                }
                Err(e) => {
                    log_maps_error!("could not map the marker", error = e.to_string());
                    Trigger::Error
                }
            }
        }
        Ok(Descended::Interrupted(signal)) => Trigger::Signal(signal),
        Err(e) => {
            log_descent_error!("descent stopped", error = e.to_string());
            Trigger::Error
        }
    };

    if let Err(e) = ProcessSignals::disarm() {
        log_unwind_warn!("interrupts stay armed during cleanup", error = e.to_string());
    }

    match unwind(&mut tree, &depth, trigger, &mut bar, interval) {
        Ok(_) => trigger.exit_code(),
        Err(e) => {
            log_unwind_error!(
                "cleanup failed, directories remain",
                depth = depth.current(),
                error = e.to_string()
            );
            1
        }
    }
}

fn map_marker(
    config: &Config,
    marker: std::os::fd::OwnedFd,
) -> breakmaps_core::Result<InstalledMapping> {
    let lowest = maps::lowest_mapping(&config.maps.listing)?;
    let page = maps::page_size()?;
    let mapping = InstalledMapping::install(marker, lowest, page)?;
    log_maps_info!(
        "marker mapped",
        address = format!("{:#x}", mapping.address()),
        size = mapping.size()
    );
    Ok(mapping)
}

fn interact(config: &Config, signals: &ProcessSignals) -> Trigger {
    let pid = std::process::id();
    eprintln!();
    eprintln!(
        "{} {}",
        style("shell pid:").bold(),
        style(pid).cyan()
    );
    eprintln!(
        "   check {} and the likes",
        style(format!("/proc/{}/maps", pid)).cyan()
    );
    eprintln!();

    let mut reader = LineReader::new(io::stdin(), config.shell.max_line);
    match run_session(&mut reader, &mut io::stderr(), signals) {
        SessionEnd::Interrupted(signal) => Trigger::Signal(signal),
        SessionEnd::ForkFailed => {
            log_shell_warn!("runner stopped after a failed fork");
            Trigger::Normal
        }
        SessionEnd::Exit | SessionEnd::EndOfInput => Trigger::Normal,
    }
}
