//! Unwind engine: climb back out of the chain, removing each level on the way.
//!
//! A failure here is never retried. Once a step fails the on-disk chain and
//! the depth counter no longer agree, so the caller must stop immediately.

use std::fmt;
use std::time::Duration;

use breakmaps_config::{log_unwind_debug, log_unwind_info, log_unwind_warn};
use nix::sys::signal::Signal;

use crate::depth::DepthCounter;
use crate::progress::{Estimator, Phase, ProgressSink};
use crate::tree::LevelTree;
use crate::{Error, Result};

/// Why the unwind is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The interactive phase ended.
    Normal,
    /// An interrupt arrived during descent or the interactive phase.
    Signal(Signal),
    /// A descent, locate or install step failed.
    Error,
}

impl Trigger {
    /// 1 exactly when the trigger was an error.
    pub fn exit_code(self) -> i32 {
        match self {
            Trigger::Error => 1,
            Trigger::Normal | Trigger::Signal(_) => 0,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Normal => f.write_str("normal"),
            Trigger::Signal(signal) => write!(f, "signal {}", signal),
            Trigger::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwound {
    pub trigger: Trigger,
    pub removed: u64,
    pub elapsed: Duration,
}

/// Remove every level recorded in `depth`, leaving the walker where descent started.
pub fn unwind<T, P>(
    tree: &mut T,
    depth: &DepthCounter,
    trigger: Trigger,
    progress: &mut P,
    interval: u64,
) -> Result<Unwound>
where
    T: LevelTree + ?Sized,
    P: ProgressSink + ?Sized,
{
    let max = depth.max();
    match trigger {
        Trigger::Signal(signal) => {
            log_unwind_warn!("caught signal, attempting cleanup", signal = signal.as_str());
        }
        Trigger::Normal => log_unwind_info!("cleanup"),
        Trigger::Error => {
            log_unwind_warn!("attempting cleanup", depth = depth.current());
            // The marker may have been created without losing its name.
            if depth.current() >= max.saturating_sub(1) {
                match tree.unlink_marker() {
                    Ok(()) => log_unwind_debug!("removed leftover marker"),
                    Err(e) => log_unwind_debug!("no leftover marker", error = e.to_string()),
                }
            }
        }
    }

    // A level may exist below the deepest entered one if entering it failed.
    if tree.remove_level().is_ok() {
        log_unwind_debug!("removed stray level", depth = depth.current());
    }

    let start = depth.current();
    let mut estimator = Estimator::start(interval);
    while depth.current() > 0 {
        let at = depth.current();
        tree.ascend()
            .map_err(|source| Error::Ascend { depth: at, source })?;
        tree.remove_level()
            .map_err(|source| Error::RemoveLevel { depth: at, source })?;

        let now = depth.decrement();
        if let Some(estimate) = estimator.observe(now, start - now, now) {
            progress.sample(Phase::Unwind, now, max, &estimate);
        }
    }

    let elapsed = estimator.elapsed();
    progress.finish(Phase::Unwind, elapsed);
    log_unwind_info!(
        "cleanup complete",
        removed = start,
        seconds = format!("{:.3}", elapsed.as_secs_f64()),
    );
    Ok(Unwound {
        trigger,
        removed: start,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descent::{descend, Descended};
    use crate::interrupt::{Interrupt, Never};
    use crate::progress::{Estimate, Silent};
    use crate::tree::testing::MemTree;

    struct StopAt(u64);

    impl Interrupt for StopAt {
        fn pending(&self, depth: u64) -> Option<Signal> {
            (depth >= self.0).then_some(Signal::SIGINT)
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Trigger::Normal.exit_code(), 0);
        assert_eq!(Trigger::Signal(Signal::SIGINT).exit_code(), 0);
        assert_eq!(Trigger::Error.exit_code(), 1);
        assert_eq!(Trigger::Signal(Signal::SIGTERM).to_string(), "signal SIGTERM");
    }

    #[test]
    fn test_round_trip_leaves_nothing() {
        for max in [1, 2, 10, 2500] {
            let mut tree = MemTree::default();
            let depth = DepthCounter::new(max);

            let outcome = descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap();
            let Descended::Bottom { marker, .. } = outcome else {
                panic!("descent to {} was interrupted", max);
            };
            drop(marker);

            let done = unwind(&mut tree, &depth, Trigger::Normal, &mut Silent, 1000).unwrap();
            assert_eq!(done.removed, max);
            assert_eq!(depth.current(), 0);
            assert_eq!(tree.levels, 0);
            assert_eq!(tree.cwd, 0);
        }
    }

    #[test]
    fn test_interrupted_descent_unwinds_exactly() {
        for stop in [1, 500, 999] {
            let mut tree = MemTree::default();
            let depth = DepthCounter::new(1000);

            let Descended::Interrupted(signal) =
                descend(&mut tree, &depth, &StopAt(stop), &mut Silent, 1000).unwrap()
            else {
                panic!("descent was not interrupted at {}", stop);
            };

            let done = unwind(&mut tree, &depth, Trigger::Signal(signal), &mut Silent, 1000)
                .unwrap();
            assert_eq!(done.removed, stop);
            assert_eq!(done.trigger.exit_code(), 0);
            assert_eq!(depth.current(), 0);
            assert_eq!(tree.levels, 0);
        }
    }

    #[test]
    fn test_error_mode_removes_named_marker() {
        let mut tree = MemTree {
            fail_unlink_marker: true,
            ..Default::default()
        };
        let depth = DepthCounter::new(6);
        assert!(descend(&mut tree, &depth, &Never, &mut Silent, 1000).is_err());
        assert_eq!(tree.marker_at, Some(6));

        let done = unwind(&mut tree, &depth, Trigger::Error, &mut Silent, 1000).unwrap();
        assert_eq!(done.removed, 6);
        assert_eq!(tree.marker_at, None);
        assert_eq!(tree.levels, 0);
    }

    #[test]
    fn test_named_marker_blocks_normal_unwind() {
        let mut tree = MemTree {
            fail_unlink_marker: true,
            ..Default::default()
        };
        let depth = DepthCounter::new(3);
        assert!(descend(&mut tree, &depth, &Never, &mut Silent, 1000).is_err());

        let err = unwind(&mut tree, &depth, Trigger::Normal, &mut Silent, 1000).unwrap_err();
        assert!(matches!(err, Error::RemoveLevel { depth: 3, .. }));
        assert!(err.is_unwind_failure());
        assert_eq!(depth.current(), 3);
    }

    #[test]
    fn test_stray_level_is_swept() {
        let mut tree = MemTree {
            fail_enter_at: Some(7),
            ..Default::default()
        };
        let depth = DepthCounter::new(10);
        assert!(descend(&mut tree, &depth, &Never, &mut Silent, 1000).is_err());
        assert_eq!(tree.levels, 8);

        let done = unwind(&mut tree, &depth, Trigger::Error, &mut Silent, 1000).unwrap();
        assert_eq!(done.removed, 7);
        assert_eq!(tree.levels, 0);
    }

    #[test]
    fn test_ascend_failure_is_fatal() {
        let mut tree = MemTree {
            fail_ascend_at: Some(4),
            ..Default::default()
        };
        let depth = DepthCounter::new(8);
        descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap();

        let err = unwind(&mut tree, &depth, Trigger::Normal, &mut Silent, 1000).unwrap_err();
        assert!(matches!(err, Error::Ascend { depth: 4, .. }));
        assert_eq!(depth.current(), 4);
        assert_eq!(tree.levels, 4);
    }

    #[test]
    fn test_progress_counts_levels_undone() {
        #[derive(Default)]
        struct Recorder(Vec<(u64, Estimate)>);

        impl ProgressSink for Recorder {
            fn sample(&mut self, phase: Phase, depth: u64, _max: u64, estimate: &Estimate) {
                assert_eq!(phase, Phase::Unwind);
                self.0.push((depth, *estimate));
            }
        }

        let mut tree = MemTree::default();
        let depth = DepthCounter::new(9);
        descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap();

        let mut recorder = Recorder::default();
        unwind(&mut tree, &depth, Trigger::Normal, &mut recorder, 4).unwrap();
        let depths: Vec<u64> = recorder.0.iter().map(|(d, _)| *d).collect();
        assert_eq!(depths, vec![8, 4, 0]);
        assert!(recorder.0.iter().all(|(_, e)| e.total.is_some()));
    }
}
