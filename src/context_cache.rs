use crate::{FrameContextDescriptor, FrameGenerationSdk, FrameInterpolationError, RenderDevice};
use tracing::{debug, info};

/// Contexts unused for this many frames are destroyed by [`ContextCache::trim`].
pub const MAX_IDLE_FRAMES: u64 = 120;

/// A cached SDK context bound to one view.
#[derive(Debug)]
pub struct InterpolationContext<C> {
    id: u64,
    native: C,
    descriptor: FrameContextDescriptor,
    view_id: u32,
    last_used_frame: u64,
}

impl<C> InterpolationContext<C> {
    /// Unique instance id; a new id means the native context was recreated.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &FrameContextDescriptor {
        &self.descriptor
    }

    pub fn view_id(&self) -> u32 {
        self.view_id
    }

    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame
    }

    pub fn native(&self) -> &C {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut C {
        &mut self.native
    }
}

/// Lazily created interpolation contexts, keyed by descriptor and view.
///
/// A context claimed by one view in a frame is never handed to another view in
/// the same frame, so split-screen views sharing a descriptor each get their own.
#[derive(Debug)]
pub struct ContextCache<C> {
    entries: Vec<InterpolationContext<C>>,
    next_id: u64,
}

impl<C> Default for ContextCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ContextCache<C> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterpolationContext<C>> {
        self.entries.iter()
    }

    /// Return a context for `view_id` able to serve `descriptor`, creating one
    /// if necessary.
    pub fn get_or_create<D, S>(
        &mut self,
        sdk: &S,
        descriptor: FrameContextDescriptor,
        view_id: u32,
        frame_index: u64,
    ) -> Result<&mut InterpolationContext<C>, FrameInterpolationError>
    where
        D: RenderDevice,
        S: FrameGenerationSdk<D, Context = C>,
    {
        if let Some(index) = self.entries.iter().position(|entry| {
            entry.view_id == view_id
                && entry.descriptor == descriptor
                && entry.last_used_frame != frame_index
        }) {
            return Ok(self.claim(index, view_id, frame_index));
        }

        let mut reuse: Option<(u64, u64)> = None;
        let mut evict = Vec::new();
        for entry in &self.entries {
            if entry.last_used_frame == frame_index {
                continue;
            }
            let owned = entry.view_id == view_id;
            let orphaned = frame_index.saturating_sub(entry.last_used_frame) > 1;
            if !owned && !orphaned {
                continue;
            }
            if entry.descriptor.is_compatible_with(&descriptor) {
                if reuse.is_none_or(|(_, last_used)| entry.last_used_frame > last_used) {
                    reuse = Some((entry.id, entry.last_used_frame));
                }
            } else if owned {
                evict.push(entry.id);
            }
        }

        for id in evict {
            self.evict(sdk, id);
        }

        if let Some((id, _)) = reuse
            && let Some(index) = self.entries.iter().position(|entry| entry.id == id)
        {
            debug!(context = id, view_id, "reusing compatible frame interpolation context");
            return Ok(self.claim(index, view_id, frame_index));
        }

        let native = sdk.create_context(&descriptor)?;
        let id = self.next_id;
        self.next_id += 1;
        info!(
            context = id,
            view_id,
            display_size = ?descriptor.display_size,
            max_render_size = ?descriptor.max_render_size,
            format = ?descriptor.back_buffer_format,
            "created frame interpolation context"
        );
        self.entries.push(InterpolationContext {
            id,
            native,
            descriptor,
            view_id,
            last_used_frame: frame_index,
        });
        let index = self.entries.len() - 1;
        Ok(&mut self.entries[index])
    }

    /// Destroy contexts that have been idle for more than [`MAX_IDLE_FRAMES`].
    pub fn trim<D, S>(&mut self, sdk: &S, frame_index: u64)
    where
        D: RenderDevice,
        S: FrameGenerationSdk<D, Context = C>,
    {
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|entry| frame_index.saturating_sub(entry.last_used_frame) > MAX_IDLE_FRAMES)
            .map(|entry| entry.id)
            .collect();
        for id in stale {
            self.evict(sdk, id);
        }
    }

    /// Destroy every cached context.
    pub fn clear<D, S>(&mut self, sdk: &S)
    where
        D: RenderDevice,
        S: FrameGenerationSdk<D, Context = C>,
    {
        for entry in self.entries.drain(..) {
            debug!(context = entry.id, "destroying frame interpolation context");
            sdk.destroy_context(entry.native);
        }
    }

    fn claim(
        &mut self,
        index: usize,
        view_id: u32,
        frame_index: u64,
    ) -> &mut InterpolationContext<C> {
        let entry = &mut self.entries[index];
        entry.view_id = view_id;
        entry.last_used_frame = frame_index;
        entry
    }

    fn evict<D, S>(&mut self, sdk: &S, id: u64)
    where
        D: RenderDevice,
        S: FrameGenerationSdk<D, Context = C>,
    {
        if let Some(index) = self.entries.iter().position(|entry| entry.id == id) {
            let entry = self.entries.swap_remove(index);
            info!(context = id, view_id = entry.view_id, "evicting frame interpolation context");
            sdk.destroy_context(entry.native);
        }
    }
}
