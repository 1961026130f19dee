//! Present-side half of frame interpolation.
//!
//! A [`PresentStateMachine`] is shared between the render thread, which queues
//! interpolated frames, and the platform swapchain, which calls
//! [`PresentStateMachine::present`] and [`PresentStateMachine::post_present`]
//! from its own thread. One present cycle runs
//! `InterpolateRT -> InterpolateRHI -> PresentRT -> PresentRHI` when a frame
//! was interpolated and `PresentRT -> PresentRHI` otherwise.
//!
//! The render thread may run ahead of the present thread. Cycles scheduled
//! while another one is still pending wait in a short backlog and start, in
//! order, as soon as the running cycle reaches `PresentRHI`.

use crate::{
    FrameInterpolationError, FrameResourceBundle, RenderDevice, lock,
    reconciler::{CounterReconciler, CounterSnapshot, PresentReport, ReconcileOutcome},
    render_parameters::Rect,
    ring::DEFAULT_RING_DEPTH,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresentStatus {
    /// GPU work for an interpolated frame was recorded on the render thread.
    InterpolateRT,
    /// That work was submitted to the GPU.
    InterpolateRHI,
    /// The real frame is next; the platform presents natively.
    PresentRT,
    /// The platform present for this cycle was issued.
    PresentRHI,
}

impl PresentStatus {
    pub fn is_interpolating(self) -> bool {
        matches!(self, PresentStatus::InterpolateRT | PresentStatus::InterpolateRHI)
    }
}

/// An interpolated frame waiting to be shown.
#[derive(Debug)]
pub struct QueuedFrame<T> {
    /// Keeps the interpolation output alive until the present is done with it.
    pub bundle: Arc<FrameResourceBundle<T>>,
    /// Region of the present target covered by interpolated views.
    pub rect: Rect,
    pub force_vsync: bool,
    pub frame_index: u64,
}

/// A cycle scheduled while another one was still running.
#[derive(Debug)]
struct Backlogged<T> {
    /// `None` for a passthrough cycle.
    frame: Option<QueuedFrame<T>>,
    submitted: bool,
}

#[derive(Debug)]
struct Cycle<T> {
    index: u64,
    status: PresentStatus,
    pending: bool,
    frame: Option<QueuedFrame<T>>,
    interpolated_presented: bool,
    backlog: VecDeque<Backlogged<T>>,
    max_in_flight: usize,
    reconciler: CounterReconciler,
}

impl<T> Cycle<T> {
    fn allows(&self, to: PresentStatus) -> bool {
        match to {
            PresentStatus::InterpolateRT => !self.pending,
            PresentStatus::InterpolateRHI => self.status == PresentStatus::InterpolateRT,
            PresentStatus::PresentRT => {
                !self.pending
                    || self.status.is_interpolating()
                    || self.status == PresentStatus::PresentRT
            }
            PresentStatus::PresentRHI => self.pending && self.status == PresentStatus::PresentRT,
        }
    }

    fn in_flight(&self) -> usize {
        usize::from(self.pending) + self.backlog.len()
    }

    fn is_full(&self) -> bool {
        self.in_flight() >= self.max_in_flight
    }

    fn queued_frames(&self) -> usize {
        usize::from(self.frame.is_some())
            + self.backlog.iter().filter(|entry| entry.frame.is_some()).count()
    }

    /// Drop the running cycle's frame without showing it.
    fn drop_frame(&mut self) {
        self.interpolated_presented = false;
        if let Some(frame) = self.frame.take() {
            self.reconciler.forget_interpolation();
            debug!(frame_index = frame.frame_index, "dropped interpolated frame");
        }
    }

    /// Drop every backlogged frame, keeping the cycles as passthrough ones.
    fn drop_backlog_frames(&mut self) {
        for entry in &mut self.backlog {
            if let Some(frame) = entry.frame.take() {
                self.reconciler.forget_interpolation();
                debug!(frame_index = frame.frame_index, "dropped backlogged interpolated frame");
            }
        }
    }
}

/// Per-viewport present state, shared with the platform swapchain.
pub struct PresentStateMachine<D: RenderDevice> {
    device: Arc<D>,
    cycle: Mutex<Cycle<D::Texture>>,
    needs_native_present: AtomicBool,
    present_rhi_done: AtomicBool,
    generation_enabled: AtomicBool,
    resized: AtomicBool,
    completed_presents: AtomicU64,
}

impl<D: RenderDevice> PresentStateMachine<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            cycle: Mutex::new(Cycle {
                index: 0,
                status: PresentStatus::PresentRT,
                pending: false,
                frame: None,
                interpolated_presented: false,
                backlog: VecDeque::new(),
                max_in_flight: DEFAULT_RING_DEPTH - 1,
                reconciler: CounterReconciler::new(),
            }),
            needs_native_present: AtomicBool::new(true),
            present_rhi_done: AtomicBool::new(true),
            generation_enabled: AtomicBool::new(true),
            resized: AtomicBool::new(false),
            completed_presents: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> PresentStatus {
        lock(&self.cycle).status
    }

    /// Index of the running present cycle together with its status. The
    /// index grows by one every time a cycle starts.
    pub fn cycle_status(&self) -> (u64, PresentStatus) {
        let cycle = lock(&self.cycle);
        (cycle.index, cycle.status)
    }

    pub fn is_cycle_pending(&self) -> bool {
        lock(&self.cycle).pending
    }

    /// Limit the number of cycles that may be scheduled before the present
    /// thread finished the running one. At least one.
    pub fn set_max_in_flight(&self, cycles: usize) {
        lock(&self.cycle).max_in_flight = cycles.max(1);
    }

    /// Whether another cycle can be scheduled right now.
    pub fn is_queue_full(&self) -> bool {
        lock(&self.cycle).is_full()
    }

    /// Move to `to`, rejecting transitions that would step backwards within
    /// the current cycle. On error nothing changes.
    pub fn set_status(&self, to: PresentStatus) -> Result<(), FrameInterpolationError> {
        let mut cycle = lock(&self.cycle);
        if !cycle.allows(to) {
            return Err(FrameInterpolationError::InvalidTransition {
                from: cycle.status,
                to,
            });
        }
        self.apply(&mut cycle, to);
        Ok(())
    }

    fn apply(&self, cycle: &mut Cycle<D::Texture>, to: PresentStatus) {
        trace!(cycle = cycle.index, from = ?cycle.status, ?to, "present status");
        if !cycle.pending && matches!(to, PresentStatus::InterpolateRT | PresentStatus::PresentRT) {
            cycle.index += 1;
        }
        cycle.status = to;
        match to {
            PresentStatus::InterpolateRT => {
                cycle.pending = true;
                self.needs_native_present.store(false, Ordering::Release);
            }
            PresentStatus::InterpolateRHI => {
                self.present_rhi_done.store(false, Ordering::Release);
            }
            PresentStatus::PresentRT => {
                cycle.pending = true;
                self.needs_native_present.store(true, Ordering::Release);
            }
            PresentStatus::PresentRHI => {
                cycle.pending = false;
                self.present_rhi_done.store(true, Ordering::Release);
                if let Some(next) = cycle.backlog.pop_front() {
                    self.start(cycle, next);
                }
            }
        }
    }

    fn start(&self, cycle: &mut Cycle<D::Texture>, next: Backlogged<D::Texture>) {
        match next.frame {
            Some(frame) => {
                self.apply(cycle, PresentStatus::InterpolateRT);
                cycle.frame = Some(frame);
                cycle.interpolated_presented = false;
                if next.submitted {
                    self.apply(cycle, PresentStatus::InterpolateRHI);
                }
            }
            None => self.apply(cycle, PresentStatus::PresentRT),
        }
    }

    /// Whether the platform should present its own backbuffer this cycle.
    pub fn needs_native_present(&self) -> bool {
        self.needs_native_present.load(Ordering::Acquire)
    }

    pub fn present_rhi_done(&self) -> bool {
        self.present_rhi_done.load(Ordering::Acquire)
    }

    /// Called from the platform present. Copies the queued interpolated frame
    /// into `target` when one is ready and returns whether the platform should
    /// also present natively.
    ///
    /// Never fails: a missing source or target, or a failed copy, leaves the
    /// platform's present untouched.
    pub fn present(&self, target: Option<&D::Texture>, sync_interval: &mut u32) -> bool {
        let queued = {
            let cycle = lock(&self.cycle);
            match &cycle.frame {
                Some(frame)
                    if cycle.status == PresentStatus::InterpolateRHI
                        && !cycle.interpolated_presented =>
                {
                    Some((
                        Arc::clone(&frame.bundle),
                        frame.rect,
                        frame.force_vsync,
                        frame.frame_index,
                    ))
                }
                _ => None,
            }
        };

        if let Some((bundle, rect, force_vsync, frame_index)) = queued {
            match (bundle.interpolated(), target) {
                (Some(source), Some(target)) => {
                    match self.device.copy_to_present_target(source, target, rect) {
                        Ok(()) => {
                            let mut cycle = lock(&self.cycle);
                            // A resize may have dropped the frame during the copy.
                            if cycle
                                .frame
                                .as_ref()
                                .is_some_and(|frame| Arc::ptr_eq(&frame.bundle, &bundle))
                            {
                                cycle.interpolated_presented = true;
                                if force_vsync {
                                    *sync_interval = 1;
                                }
                                trace!(frame_index, ?rect, "presented interpolated frame");
                            }
                        }
                        Err(err) => debug!(frame_index, %err, "skipping interpolated present"),
                    }
                }
                _ => debug!(frame_index, "interpolated present has no source or target"),
            }
        }

        let cycle = lock(&self.cycle);
        if cycle.status.is_interpolating() && !cycle.interpolated_presented {
            return true;
        }
        self.needs_native_present()
    }

    /// Called once the platform present returned. Advances the cycle,
    /// reconciles counters and releases the presented frame.
    ///
    /// An interpolated frame that was not shown is dropped and no longer
    /// counted as an interpolation; its cycle continues with the native
    /// present.
    pub fn post_present(&self) {
        let mut cycle = lock(&self.cycle);
        let status = cycle.status;
        let report = match status {
            PresentStatus::InterpolateRHI if cycle.interpolated_presented => {
                cycle.interpolated_presented = false;
                cycle.frame = None;
                self.apply(&mut cycle, PresentStatus::PresentRT);
                PresentReport {
                    interpolated_frame: true,
                    custom_path: true,
                }
            }
            PresentStatus::InterpolateRT | PresentStatus::InterpolateRHI => {
                debug!(?status, "interpolated frame was not shown");
                cycle.drop_frame();
                self.apply(&mut cycle, PresentStatus::PresentRT);
                PresentReport::default()
            }
            PresentStatus::PresentRT => {
                self.apply(&mut cycle, PresentStatus::PresentRHI);
                PresentReport::default()
            }
            PresentStatus::PresentRHI => {
                debug!("post-present without a pending cycle");
                PresentReport::default()
            }
        };

        let outcome = cycle.reconciler.reconcile(report);
        drop(cycle);

        if outcome == ReconcileOutcome::DisableGeneration {
            info!("frame generation disabled at the swapchain");
            self.generation_enabled.store(false, Ordering::Release);
        }
        self.completed_presents.fetch_add(1, Ordering::AcqRel);
    }

    /// Called when the platform starts drawing a new frame. Drops a frame left
    /// behind by a cycle that already left the interpolate states.
    pub fn begin_drawing(&self) {
        let mut cycle = lock(&self.cycle);
        if !cycle.status.is_interpolating() && cycle.frame.is_some() {
            cycle.drop_frame();
        }
    }

    /// Called by the platform when its backbuffer was resized. Every queued
    /// frame is dropped; backlogged cycles still run, natively.
    pub fn on_back_buffer_resize(&self) {
        self.resized.store(true, Ordering::Release);
        let mut cycle = lock(&self.cycle);
        cycle.drop_frame();
        cycle.drop_backlog_frames();
        if cycle.status.is_interpolating() {
            self.apply(&mut cycle, PresentStatus::PresentRT);
        }
    }

    /// Read and clear the resize notification.
    pub fn take_resized(&self) -> bool {
        self.resized.swap(false, Ordering::AcqRel)
    }

    /// Start a passthrough cycle, or queue one behind the running cycle.
    pub fn begin_passthrough(&self) {
        let mut cycle = lock(&self.cycle);
        if !cycle.pending {
            self.apply(&mut cycle, PresentStatus::PresentRT);
        } else if !cycle.is_full() {
            cycle.backlog.push_back(Backlogged {
                frame: None,
                submitted: true,
            });
        } else {
            trace!("present queue is full, passthrough frame is not tracked");
        }
    }

    /// Start an interpolated cycle for `frame`, or queue it behind the running
    /// cycle. Counts the interpolation.
    pub fn queue_frame(
        &self,
        frame: QueuedFrame<D::Texture>,
    ) -> Result<(), FrameInterpolationError> {
        let mut cycle = lock(&self.cycle);
        if !cycle.pending {
            self.apply(&mut cycle, PresentStatus::InterpolateRT);
            cycle.frame = Some(frame);
            cycle.interpolated_presented = false;
        } else if !cycle.is_full() {
            trace!(frame_index = frame.frame_index, "queued frame behind running cycle");
            cycle.backlog.push_back(Backlogged {
                frame: Some(frame),
                submitted: false,
            });
        } else {
            return Err(FrameInterpolationError::PresentQueueFull {
                frame_index: frame.frame_index,
            });
        }
        cycle.reconciler.record_interpolation();
        Ok(())
    }

    /// Called once the GPU work of the oldest unsubmitted frame was submitted.
    pub fn mark_submitted(&self) {
        let mut cycle = lock(&self.cycle);
        if cycle.pending && cycle.status == PresentStatus::InterpolateRT {
            self.apply(&mut cycle, PresentStatus::InterpolateRHI);
        } else if let Some(entry) = cycle
            .backlog
            .iter_mut()
            .find(|entry| entry.frame.is_some() && !entry.submitted)
        {
            entry.submitted = true;
        }
    }

    /// Drop every queued frame and backlogged cycle.
    pub fn discard_pending(&self) {
        let mut cycle = lock(&self.cycle);
        cycle.drop_frame();
        cycle.drop_backlog_frames();
        cycle.backlog.clear();
    }

    pub fn has_queued_frame(&self) -> bool {
        lock(&self.cycle).queued_frames() > 0
    }

    /// Interpolated frames scheduled but not yet shown or dropped.
    pub fn queued_frames(&self) -> usize {
        lock(&self.cycle).queued_frames()
    }

    /// Start the countdown that disables generation at the swapchain.
    pub fn arm_reset(&self, after_interpolated: bool) {
        lock(&self.cycle).reconciler.arm(after_interpolated);
    }

    /// Turn generation back on and cancel a running countdown.
    pub fn rearm(&self) {
        lock(&self.cycle).reconciler.disarm();
        self.generation_enabled.store(true, Ordering::Release);
    }

    pub fn generation_enabled(&self) -> bool {
        self.generation_enabled.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> CounterSnapshot {
        lock(&self.cycle).reconciler.snapshot()
    }

    /// Number of `post_present` calls so far.
    pub fn completed_presents(&self) -> u64 {
        self.completed_presents.load(Ordering::Acquire)
    }
}
