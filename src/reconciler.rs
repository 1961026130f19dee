use tracing::{debug, warn};

/// Outcome of one present callback, as seen by the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentReport {
    /// The frame shown was the generated one.
    pub interpolated_frame: bool,
    /// The present went through the crate's own copy path instead of the native one.
    pub custom_path: bool,
}

/// Point-in-time copy of the reconciler counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub present_count: u64,
    pub interpolation_count: u64,
    pub reset_state: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Continue,
    /// The reset countdown finished; turn off generation until re-armed.
    DisableGeneration,
}

/// Keeps the present counter from drifting past the interpolation counter
/// and runs the countdown that turns generation off after the feature is
/// disabled.
#[derive(Debug, Default)]
pub struct CounterReconciler {
    present_count: u64,
    interpolation_count: u64,
    reset_state: u8,
}

impl CounterReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_interpolation(&mut self) {
        self.interpolation_count += 1;
    }

    /// Undo [`Self::record_interpolation`] for a frame that was dropped
    /// before it could be shown.
    pub fn forget_interpolation(&mut self) {
        self.interpolation_count = self.interpolation_count.saturating_sub(1);
    }

    /// Start the countdown. One more non-interpolated present is needed when
    /// the last frame was interpolated, two otherwise.
    pub fn arm(&mut self, after_interpolated: bool) {
        self.reset_state = if after_interpolated { 1 } else { 2 };
        debug!(reset_state = self.reset_state, "armed frame generation reset");
    }

    /// Cancel a running countdown.
    pub fn disarm(&mut self) {
        self.reset_state = 0;
    }

    pub fn reconcile(&mut self, report: PresentReport) -> ReconcileOutcome {
        self.present_count += u64::from(report.custom_path);

        let mut outcome = ReconcileOutcome::Continue;
        if self.reset_state > 0 && !report.interpolated_frame {
            self.reset_state -= 1;
            if self.reset_state == 0 {
                outcome = ReconcileOutcome::DisableGeneration;
            }
        }

        if self.present_count > self.interpolation_count {
            warn!(
                present_count = self.present_count,
                interpolation_count = self.interpolation_count,
                "present counter ran ahead of interpolations, clamping"
            );
            self.present_count = self.interpolation_count;
            self.reset_state = 0;
        }

        outcome
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            present_count: self.present_count,
            interpolation_count: self.interpolation_count,
            reset_state: self.reset_state,
        }
    }
}
