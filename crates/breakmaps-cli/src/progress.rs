//! Terminal progress for descent and cleanup.
//!
//! Bars are redrawn only when the engines hand over a sample, and never with a
//! steady tick: a ticker thread would make the later fork unsafe. When stderr
//! is not a terminal the bar hides itself, so samples go to the log instead.

use std::time::Duration;

use breakmaps_config::{log_descent_info, log_unwind_info};
use breakmaps_core::progress::{Estimate, Phase, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Default)]
pub struct DepthBar {
    bar: Option<(Phase, ProgressBar)>,
}

impl DepthBar {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar_for(&mut self, phase: Phase, max: u64) -> &ProgressBar {
        if matches!(&self.bar, Some((current, _)) if *current != phase) {
            self.bar = None;
        }
        let (_, bar) = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(max);
            bar.set_style(
                ProgressStyle::with_template("{prefix} depth {pos}/{len} ({msg})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar.set_prefix(phase.to_string());
            (phase, bar)
        });
        bar
    }
}

impl ProgressSink for DepthBar {
    fn sample(&mut self, phase: Phase, depth: u64, max: u64, estimate: &Estimate) {
        let bar = self.bar_for(phase, max);
        if bar.is_hidden() {
            let estimate = estimate.to_string();
            match phase {
                Phase::Descent => {
                    log_descent_info!("progress", depth = depth, max = max, estimate = estimate)
                }
                Phase::Unwind => {
                    log_unwind_info!("progress", depth = depth, max = max, estimate = estimate)
                }
            }
            return;
        }
        bar.set_position(depth);
        bar.set_message(estimate.to_string());
    }

    fn finish(&mut self, phase: Phase, _elapsed: Duration) {
        if let Some((current, bar)) = self.bar.take() {
            if current == phase {
                bar.finish_and_clear();
            } else {
                self.bar = Some((current, bar));
            }
        }
    }
}
