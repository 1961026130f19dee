//! Per-viewport pool of frame resource bundles.
//!
//! A bundle handed to a present stays referenced (through its `Arc`) until the
//! present thread is done with it, so the ring never writes into a bundle that
//! may still be read. Bundles come back through [`ResourceRing::reclaim`] and
//! are recycled instead of reallocated.

use crate::{FrameInterpolationError, RenderDevice, TextureDescriptor};
use glam::UVec2;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, trace};
use wgpu::{TextureFormat, TextureUsages};

/// Current bundle plus two previous generations.
pub const DEFAULT_RING_DEPTH: usize = 3;
pub const MIN_RING_DEPTH: usize = 2;
/// Interpolation only ever reads the immediately preceding frame.
const MAX_PREVIOUS_GENERATIONS: usize = 2;

const COLOR_USAGE: TextureUsages = TextureUsages::COPY_DST
    .union(TextureUsages::COPY_SRC)
    .union(TextureUsages::TEXTURE_BINDING);
const INTERPOLATED_USAGE: TextureUsages = COLOR_USAGE.union(TextureUsages::RENDER_ATTACHMENT);

#[derive(Debug)]
struct TextureSlot<T> {
    texture: T,
    size: UVec2,
    format: TextureFormat,
}

/// Swapchain-sized textures needed for one interpolation cycle.
#[derive(Debug)]
pub struct FrameResourceBundle<T> {
    generation: u64,
    color: Option<TextureSlot<T>>,
    hud: Option<TextureSlot<T>>,
    interpolated: Option<TextureSlot<T>>,
}

impl<T> FrameResourceBundle<T> {
    fn new() -> Self {
        Self {
            generation: 0,
            color: None,
            hud: None,
            interpolated: None,
        }
    }

    /// Frame generation this bundle was last acquired for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Snapshot of the real frame.
    pub fn color(&self) -> Option<&T> {
        self.color.as_ref().map(|slot| &slot.texture)
    }

    pub fn hud(&self) -> Option<&T> {
        self.hud.as_ref().map(|slot| &slot.texture)
    }

    /// Output of the generate dispatch.
    pub fn interpolated(&self) -> Option<&T> {
        self.interpolated.as_ref().map(|slot| &slot.texture)
    }

    /// Size of the allocated textures, if any.
    pub fn display_size(&self) -> Option<UVec2> {
        self.color.as_ref().map(|slot| slot.size)
    }

    fn ensure<D: RenderDevice<Texture = T>>(
        &mut self,
        device: &D,
        size: UVec2,
        format: TextureFormat,
    ) -> Result<(), FrameInterpolationError> {
        let color_label = "frame_interpolation_color";
        ensure_slot(&mut self.color, device, color_label, size, format, COLOR_USAGE)?;
        let hud_label = "frame_interpolation_hud";
        ensure_slot(&mut self.hud, device, hud_label, size, format, COLOR_USAGE)?;
        ensure_slot(
            &mut self.interpolated,
            device,
            "frame_interpolation_output",
            size,
            format,
            INTERPOLATED_USAGE,
        )
    }
}

fn ensure_slot<D: RenderDevice>(
    slot: &mut Option<TextureSlot<D::Texture>>,
    device: &D,
    label: &'static str,
    size: UVec2,
    format: TextureFormat,
    usage: TextureUsages,
) -> Result<(), FrameInterpolationError> {
    if let Some(existing) = slot
        && existing.size == size
        && existing.format == format
    {
        return Ok(());
    }

    // Release the stale texture before allocating its replacement.
    *slot = None;
    let texture = device.create_texture(&TextureDescriptor {
        label,
        size,
        format,
        usage,
    })?;
    trace!(label, ?size, ?format, "allocated frame interpolation texture");
    *slot = Some(TextureSlot {
        texture,
        size,
        format,
    });
    Ok(())
}

/// Bounded pool of [`FrameResourceBundle`]s for one viewport.
#[derive(Debug)]
pub struct ResourceRing<T> {
    depth: usize,
    current: Option<Arc<FrameResourceBundle<T>>>,
    retiring: VecDeque<Arc<FrameResourceBundle<T>>>,
    free: Vec<FrameResourceBundle<T>>,
    next_generation: u64,
}

impl<T> ResourceRing<T> {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(MIN_RING_DEPTH),
            current: None,
            retiring: VecDeque::new(),
            free: Vec::new(),
            next_generation: 1,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn set_depth(&mut self, depth: usize) {
        self.depth = depth.max(MIN_RING_DEPTH);
        self.enforce_depth(0);
    }

    /// Number of bundles the ring currently keeps alive.
    pub fn live_bundles(&self) -> usize {
        usize::from(self.current.is_some()) + self.retiring.len() + self.free.len()
    }

    /// Return the bundle new work should write to, (re)allocating any texture
    /// whose size or format no longer matches.
    ///
    /// The caller must drop the returned `Arc` (or hand it to a present) before
    /// the next call.
    pub fn acquire<D: RenderDevice<Texture = T>>(
        &mut self,
        device: &D,
        display_size: UVec2,
        format: TextureFormat,
    ) -> Result<Arc<FrameResourceBundle<T>>, FrameInterpolationError> {
        let mut bundle = match self.current.take().map(Arc::try_unwrap) {
            Some(Ok(bundle)) => bundle,
            Some(Err(in_flight)) => {
                // Still referenced by a present; never write into it again.
                self.retiring.push_back(in_flight);
                self.next_bundle()
            }
            None => self.next_bundle(),
        };

        bundle.generation = self.next_generation;
        self.next_generation += 1;

        if let Err(err) = bundle.ensure(device, display_size, format) {
            self.free.push(bundle);
            self.enforce_depth(0);
            return Err(err);
        }

        let bundle = Arc::new(bundle);
        self.current = Some(Arc::clone(&bundle));
        Ok(bundle)
    }

    /// Mark the current bundle as no longer current; it may still be read by a
    /// present in flight.
    pub fn retire(&mut self) {
        if let Some(current) = self.current.take() {
            trace!(generation = current.generation, "retiring frame bundle");
            self.retiring.push_back(current);
        }
        while self.retiring.len() > MAX_PREVIOUS_GENERATIONS {
            self.retiring.pop_front();
        }
    }

    /// Recycle retired bundles that no present references anymore.
    ///
    /// Returns the number of bundles moved to the free pool.
    pub fn reclaim(&mut self) -> usize {
        let mut reclaimed = 0;
        let mut still_in_flight = VecDeque::with_capacity(self.retiring.len());
        for bundle in self.retiring.drain(..) {
            match Arc::try_unwrap(bundle) {
                Ok(bundle) => {
                    self.free.push(bundle);
                    reclaimed += 1;
                }
                Err(bundle) => still_in_flight.push_back(bundle),
            }
        }
        self.retiring = still_in_flight;
        self.enforce_depth(0);
        if reclaimed > 0 {
            trace!(reclaimed, live = self.live_bundles(), "reclaimed frame bundles");
        }
        reclaimed
    }

    /// Drop every bundle, e.g. after the viewport was resized.
    pub fn invalidate(&mut self) {
        debug!(live = self.live_bundles(), "invalidating frame bundles");
        self.current = None;
        self.retiring.clear();
        self.free.clear();
    }

    fn next_bundle(&mut self) -> FrameResourceBundle<T> {
        if let Some(bundle) = self.free.pop() {
            return bundle;
        }
        self.enforce_depth(1);
        FrameResourceBundle::new()
    }

    /// Drop bundles until `reserve` more fit within the depth; free bundles
    /// go first, then the oldest retiring ones.
    fn enforce_depth(&mut self, reserve: usize) {
        while self.live_bundles() + reserve > self.depth {
            if self.free.pop().is_none() && self.retiring.pop_front().is_none() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRenderDevice;

    const SIZE: UVec2 = UVec2::new(1920, 1080);
    const FORMAT: TextureFormat = TextureFormat::Bgra8Unorm;

    #[test]
    fn unreferenced_bundle_is_reused_in_place() {
        let device = MockRenderDevice::new();
        let mut ring = ResourceRing::new(DEFAULT_RING_DEPTH);

        let first = ring.acquire(&device, SIZE, FORMAT).unwrap();
        let first_color = first.color().unwrap().id;
        drop(first);
        let second = ring.acquire(&device, SIZE, FORMAT).unwrap();

        assert_eq!(second.color().unwrap().id, first_color);
        assert_eq!(device.allocation_count(), 3);
        assert_eq!(ring.live_bundles(), 1);
    }

    #[test]
    fn in_flight_bundle_is_never_written_again() {
        let device = MockRenderDevice::new();
        let mut ring = ResourceRing::new(DEFAULT_RING_DEPTH);

        let in_flight = ring.acquire(&device, SIZE, FORMAT).unwrap();
        let next = ring.acquire(&device, SIZE, FORMAT).unwrap();

        assert_ne!(in_flight.color().unwrap().id, next.color().unwrap().id);
        assert!(next.generation() > in_flight.generation());
        assert_eq!(ring.live_bundles(), 2);
    }

    #[test]
    fn reclaimed_bundle_is_recycled_without_allocation() {
        let device = MockRenderDevice::new();
        let mut ring = ResourceRing::new(DEFAULT_RING_DEPTH);

        let presented = ring.acquire(&device, SIZE, FORMAT).unwrap();
        let recycled_id = presented.interpolated().unwrap().id;
        ring.retire();
        drop(presented);
        assert_eq!(ring.reclaim(), 1);

        let allocations = device.allocation_count();
        let bundle = ring.acquire(&device, SIZE, FORMAT).unwrap();
        assert_eq!(bundle.interpolated().unwrap().id, recycled_id);
        assert_eq!(device.allocation_count(), allocations);
    }

    #[test]
    fn ring_stays_bounded_while_presents_hold_bundles() {
        let device = MockRenderDevice::new();
        let mut ring = ResourceRing::new(DEFAULT_RING_DEPTH);
        let mut in_flight = VecDeque::new();

        for _ in 0..10 {
            let bundle = ring.acquire(&device, SIZE, FORMAT).unwrap();
            ring.retire();
            in_flight.push_back(bundle);
            // Presents complete two frames late.
            if in_flight.len() > 2 {
                in_flight.pop_front();
                ring.reclaim();
            }
            assert!(ring.live_bundles() <= DEFAULT_RING_DEPTH);
        }
    }

    #[test]
    fn bundle_is_only_reclaimed_once_unreferenced() {
        let device = MockRenderDevice::new();
        let mut ring = ResourceRing::new(DEFAULT_RING_DEPTH);

        let held = ring.acquire(&device, SIZE, FORMAT).unwrap();
        ring.retire();
        assert_eq!(ring.reclaim(), 0);
        drop(held);
        assert_eq!(ring.reclaim(), 1);
    }

    #[test]
    fn resize_reallocates_every_texture() {
        let device = MockRenderDevice::new();
        let mut ring = ResourceRing::new(DEFAULT_RING_DEPTH);

        drop(ring.acquire(&device, SIZE, FORMAT).unwrap());
        let resized = ring.acquire(&device, UVec2::new(1280, 720), FORMAT).unwrap();

        assert_eq!(resized.display_size(), Some(UVec2::new(1280, 720)));
        assert_eq!(resized.interpolated().unwrap().size, UVec2::new(1280, 720));
        assert_eq!(device.allocation_count(), 6);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let device = MockRenderDevice::new();
        device.set_fail_allocations(true);
        let mut ring = ResourceRing::<crate::mock::MockTexture>::new(DEFAULT_RING_DEPTH);

        let err = ring.acquire(&device, SIZE, FORMAT).unwrap_err();
        assert!(matches!(err, FrameInterpolationError::ResourceAllocation { .. }));
        assert!(ring.live_bundles() <= DEFAULT_RING_DEPTH);
    }
}
