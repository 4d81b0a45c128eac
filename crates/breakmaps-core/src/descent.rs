//! Descent engine: build the chain one level at a time, then leave an
//! unlinked-but-open marker at the bottom.

use std::os::fd::OwnedFd;
use std::time::Duration;

use breakmaps_config::{log_descent_info, log_descent_warn};
use nix::sys::signal::Signal;

use crate::depth::DepthCounter;
use crate::interrupt::Interrupt;
use crate::progress::{Estimator, Phase, ProgressSink};
use crate::tree::LevelTree;
use crate::{Error, Result};

/// How a descent that did not fail came to an end.
#[derive(Debug)]
pub enum Descended {
    /// Bottom reached. The marker's name is gone but its storage lives on
    /// through this descriptor.
    Bottom { marker: OwnedFd, elapsed: Duration },
    /// Stopped early by a signal; the chain is `depth.current()` levels deep.
    Interrupted(Signal),
}

/// Descend until `depth.max()` levels exist.
///
/// On error the depth counter still matches the number of entered levels;
/// a level that was created but not entered is left for unwind to sweep.
pub fn descend<T, I, P>(
    tree: &mut T,
    depth: &DepthCounter,
    interrupt: &I,
    progress: &mut P,
    interval: u64,
) -> Result<Descended>
where
    T: LevelTree + ?Sized,
    I: Interrupt + ?Sized,
    P: ProgressSink + ?Sized,
{
    let max = depth.max();
    let mut estimator = Estimator::start(interval);

    while !depth.is_bottom() {
        let at = depth.current();
        if let Some(signal) = interrupt.pending(at) {
            return Ok(Descended::Interrupted(signal));
        }

        tree.make_level()
            .map_err(|source| Error::MakeLevel { depth: at, source })?;
        tree.enter_level()
            .map_err(|source| Error::EnterLevel { depth: at, source })?;

        let now = depth.increment();
        if let Some(estimate) = estimator.observe(now, now, max - now) {
            progress.sample(Phase::Descent, now, max, &estimate);
        }
    }

    if let Some(signal) = interrupt.pending(max) {
        return Ok(Descended::Interrupted(signal));
    }

    let marker = tree
        .create_marker()
        .map_err(|source| Error::CreateMarker { depth: max, source })?;
    if let Err(source) = tree.unlink_marker() {
        log_descent_warn!("marker still has a name; cleanup will likely fail", depth = max);
        return Err(Error::UnlinkMarker { depth: max, source });
    }

    let elapsed = estimator.elapsed();
    progress.finish(Phase::Descent, elapsed);
    log_descent_info!(
        "descent complete",
        depth = max,
        seconds = format!("{:.3}", elapsed.as_secs_f64()),
    );
    Ok(Descended::Bottom { marker, elapsed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::Never;
    use crate::progress::{Estimate, Silent};
    use crate::tree::testing::MemTree;

    /// Interrupts once the chain is at least this deep.
    struct StopAt(u64);

    impl Interrupt for StopAt {
        fn pending(&self, depth: u64) -> Option<Signal> {
            (depth >= self.0).then_some(Signal::SIGINT)
        }
    }

    #[derive(Default)]
    struct Recorder {
        samples: Vec<u64>,
        finished: bool,
    }

    impl ProgressSink for Recorder {
        fn sample(&mut self, phase: Phase, depth: u64, max: u64, estimate: &Estimate) {
            assert_eq!(phase, Phase::Descent);
            assert!(depth <= max);
            assert!(estimate.total.is_some());
            self.samples.push(depth);
        }

        fn finish(&mut self, _phase: Phase, _elapsed: Duration) {
            self.finished = true;
        }
    }

    #[test]
    fn test_full_descent_leaves_unlinked_marker() {
        let mut tree = MemTree::default();
        let depth = DepthCounter::new(10);

        let outcome = descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap();
        assert!(matches!(outcome, Descended::Bottom { .. }));
        assert_eq!(depth.current(), 10);
        assert_eq!(tree.levels, 10);
        assert_eq!(tree.cwd, 10);
        assert_eq!(tree.marker_at, None);
    }

    #[test]
    fn test_interrupt_stops_at_requested_depth() {
        for stop in [1, 500, 999] {
            let mut tree = MemTree::default();
            let depth = DepthCounter::new(1000);

            let outcome = descend(&mut tree, &depth, &StopAt(stop), &mut Silent, 1000).unwrap();
            assert!(matches!(outcome, Descended::Interrupted(Signal::SIGINT)));
            assert_eq!(depth.current(), stop);
            assert_eq!(tree.levels, stop);
        }
    }

    #[test]
    fn test_mkdir_failure_reports_depth() {
        let mut tree = MemTree {
            fail_make_at: Some(5),
            ..Default::default()
        };
        let depth = DepthCounter::new(10);

        let err = descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap_err();
        assert!(matches!(err, Error::MakeLevel { depth: 5, .. }));
        assert_eq!(depth.current(), 5);
        assert_eq!(tree.levels, 5);
    }

    #[test]
    fn test_chdir_failure_leaves_stray_level() {
        let mut tree = MemTree {
            fail_enter_at: Some(7),
            ..Default::default()
        };
        let depth = DepthCounter::new(10);

        let err = descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap_err();
        assert!(matches!(err, Error::EnterLevel { depth: 7, .. }));
        assert_eq!(depth.current(), 7);
        assert_eq!(tree.levels, 8);
    }

    #[test]
    fn test_marker_unlink_failure_keeps_name() {
        let mut tree = MemTree {
            fail_unlink_marker: true,
            ..Default::default()
        };
        let depth = DepthCounter::new(4);

        let err = descend(&mut tree, &depth, &Never, &mut Silent, 1000).unwrap_err();
        assert!(matches!(err, Error::UnlinkMarker { depth: 4, .. }));
        assert_eq!(tree.marker_at, Some(4));
    }

    #[test]
    fn test_progress_sampled_on_interval() {
        let mut tree = MemTree::default();
        let depth = DepthCounter::new(10);
        let mut recorder = Recorder::default();

        descend(&mut tree, &depth, &Never, &mut recorder, 3).unwrap();
        assert_eq!(recorder.samples, vec![3, 6, 9]);
        assert!(recorder.finished);
    }
}
