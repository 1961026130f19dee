//! Recording implementations of [`RenderDevice`] and [`FrameGenerationSdk`].
//!
//! Nothing touches a GPU: textures are ids with a size, encoders are lists of
//! [`MockCommand`]s, and every allocation, present copy and context lifetime
//! event is logged in order so tests can assert on it. Failures can be
//! injected at runtime.

use crate::{
    DispatchFlags, FrameContextDescriptor, FrameGenerationSdk, FrameInterpolationError,
    RenderDevice, SdkError, TextureDescriptor, lock,
    motion_vectors::MotionVectorInputs,
    render_parameters::{GenerateParameters, PrepareParameters, Rect},
};
use glam::UVec2;
use std::sync::{
    Mutex,
    atomic::{AtomicBool, AtomicU64, Ordering},
};
use wgpu::TextureFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTexture {
    pub id: u64,
    pub label: &'static str,
    pub size: UVec2,
    pub format: TextureFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCommand {
    Copy {
        source: u64,
        destination: u64,
        size: UVec2,
    },
    Clear {
        texture: u64,
    },
    ConvertMotionVectors {
        depth: u64,
        velocity: u64,
        output: u64,
        render_size: UVec2,
    },
    Prepare {
        context: u64,
        frame_id: u64,
        reset: bool,
    },
    Generate {
        context: u64,
        frame_id: u64,
        output: u64,
        rect: Rect,
        flags: DispatchFlags,
        reset: bool,
    },
}

/// Ordered list of the commands recorded for one frame.
#[derive(Debug, Default)]
pub struct MockEncoder {
    pub commands: Vec<MockCommand>,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockDeviceEvent {
    Allocate {
        texture: u64,
        label: &'static str,
        size: UVec2,
    },
    PresentCopy {
        source: u64,
        target: u64,
        rect: Rect,
    },
    Flush,
}

#[derive(Debug)]
pub struct MockRenderDevice {
    next_texture: AtomicU64,
    fail_allocations: AtomicBool,
    fail_present_copies: AtomicBool,
    events: Mutex<Vec<MockDeviceEvent>>,
}

impl Default for MockRenderDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRenderDevice {
    pub fn new() -> Self {
        Self {
            next_texture: AtomicU64::new(1),
            fail_allocations: AtomicBool::new(false),
            fail_present_copies: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        }
    }

    /// A texture owned by the host (backbuffer, depth, velocity); not logged
    /// as an allocation.
    pub fn host_texture(
        &self,
        label: &'static str,
        size: UVec2,
        format: TextureFormat,
    ) -> MockTexture {
        MockTexture {
            id: self.next_texture.fetch_add(1, Ordering::Relaxed),
            label,
            size,
            format,
        }
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_present_copies(&self, fail: bool) {
        self.fail_present_copies.store(fail, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<MockDeviceEvent> {
        lock(&self.events).clone()
    }

    pub fn allocation_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, MockDeviceEvent::Allocate { .. }))
            .count()
    }

    pub fn flush_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, MockDeviceEvent::Flush))
            .count()
    }

    pub fn present_copies(&self) -> Vec<(u64, u64, Rect)> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match *event {
                MockDeviceEvent::PresentCopy {
                    source,
                    target,
                    rect,
                } => Some((source, target, rect)),
                _ => None,
            })
            .collect()
    }
}

impl RenderDevice for MockRenderDevice {
    type Texture = MockTexture;
    type Encoder = MockEncoder;

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<MockTexture, FrameInterpolationError> {
        if self.fail_allocations.load(Ordering::Relaxed) {
            return Err(FrameInterpolationError::ResourceAllocation {
                resource: descriptor.label,
                reason: "injected allocation failure".to_owned(),
            });
        }
        if descriptor.size.cmpeq(UVec2::ZERO).any() {
            return Err(FrameInterpolationError::ResourceAllocation {
                resource: descriptor.label,
                reason: format!("zero-sized texture {}", descriptor.size),
            });
        }

        let texture = self.host_texture(descriptor.label, descriptor.size, descriptor.format);
        lock(&self.events).push(MockDeviceEvent::Allocate {
            texture: texture.id,
            label: texture.label,
            size: texture.size,
        });
        Ok(texture)
    }

    fn copy_texture(
        &self,
        encoder: &mut MockEncoder,
        source: &MockTexture,
        destination: &MockTexture,
        size: UVec2,
    ) {
        encoder.commands.push(MockCommand::Copy {
            source: source.id,
            destination: destination.id,
            size,
        });
    }

    fn clear_texture(&self, encoder: &mut MockEncoder, texture: &MockTexture) {
        encoder.commands.push(MockCommand::Clear { texture: texture.id });
    }

    fn convert_motion_vectors(
        &self,
        encoder: &mut MockEncoder,
        inputs: &MotionVectorInputs<'_, MockTexture>,
        output: &MockTexture,
    ) -> Result<(), FrameInterpolationError> {
        if inputs.render_size.cmpgt(output.size).any() {
            return Err(FrameInterpolationError::CopyOutOfBounds {
                rect: Rect::from_size(inputs.render_size),
                extent: output.size,
            });
        }
        encoder.commands.push(MockCommand::ConvertMotionVectors {
            depth: inputs.depth.id,
            velocity: inputs.velocity.id,
            output: output.id,
            render_size: inputs.render_size,
        });
        Ok(())
    }

    fn copy_to_present_target(
        &self,
        source: &MockTexture,
        target: &MockTexture,
        rect: Rect,
    ) -> Result<(), FrameInterpolationError> {
        if self.fail_present_copies.load(Ordering::Relaxed) {
            return Err(FrameInterpolationError::MissingTexture("present target"));
        }
        let extent = source.size.min(target.size);
        if !rect.fits_within(extent) {
            return Err(FrameInterpolationError::CopyOutOfBounds { rect, extent });
        }
        lock(&self.events).push(MockDeviceEvent::PresentCopy {
            source: source.id,
            target: target.id,
            rect,
        });
        Ok(())
    }

    fn flush(&self) {
        lock(&self.events).push(MockDeviceEvent::Flush);
    }
}

/// Native context handed out by [`MockFrameGenerationSdk`].
#[derive(Debug)]
pub struct MockContext {
    pub id: u64,
    pub descriptor: FrameContextDescriptor,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockSdkEvent {
    Create {
        context: u64,
        descriptor: FrameContextDescriptor,
    },
    Destroy {
        context: u64,
    },
}

#[derive(Debug)]
pub struct MockFrameGenerationSdk {
    name: String,
    supported: AtomicBool,
    fail_create: AtomicBool,
    fail_dispatch: AtomicBool,
    next_context: AtomicU64,
    events: Mutex<Vec<MockSdkEvent>>,
}

impl Default for MockFrameGenerationSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFrameGenerationSdk {
    pub const DEFAULT_NAME: &'static str = "fsr3";

    pub fn new() -> Self {
        Self::with_name(Self::DEFAULT_NAME)
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supported: AtomicBool::new(true),
            fail_create: AtomicBool::new(false),
            fail_dispatch: AtomicBool::new(false),
            next_context: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::Relaxed);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<MockSdkEvent> {
        lock(&self.events).clone()
    }

    pub fn created_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, MockSdkEvent::Create { .. }))
            .count()
    }

    pub fn destroyed_count(&self) -> usize {
        lock(&self.events)
            .iter()
            .filter(|event| matches!(event, MockSdkEvent::Destroy { .. }))
            .count()
    }

    /// Contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        self.created_count() - self.destroyed_count()
    }
}

impl FrameGenerationSdk<MockRenderDevice> for MockFrameGenerationSdk {
    type Context = MockContext;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_supported(&self, _device: &MockRenderDevice) -> bool {
        self.supported.load(Ordering::Relaxed)
    }

    fn create_context(&self, descriptor: &FrameContextDescriptor) -> Result<MockContext, SdkError> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(SdkError::new("create_context", 0x8000_0005));
        }
        let id = self.next_context.fetch_add(1, Ordering::Relaxed);
        lock(&self.events).push(MockSdkEvent::Create {
            context: id,
            descriptor: *descriptor,
        });
        Ok(MockContext {
            id,
            descriptor: *descriptor,
        })
    }

    fn destroy_context(&self, context: MockContext) {
        lock(&self.events).push(MockSdkEvent::Destroy { context: context.id });
    }

    fn dispatch_prepare(
        &self,
        context: &mut MockContext,
        encoder: &mut MockEncoder,
        parameters: &PrepareParameters<'_, MockTexture>,
    ) -> Result<(), SdkError> {
        if self.fail_dispatch.load(Ordering::Relaxed) {
            return Err(SdkError::new("dispatch_prepare", 0x8000_0004));
        }
        encoder.commands.push(MockCommand::Prepare {
            context: context.id,
            frame_id: parameters.frame_id,
            reset: parameters.reset,
        });
        Ok(())
    }

    fn dispatch_generate(
        &self,
        context: &mut MockContext,
        encoder: &mut MockEncoder,
        parameters: &GenerateParameters<'_, MockTexture>,
    ) -> Result<(), SdkError> {
        if self.fail_dispatch.load(Ordering::Relaxed) {
            return Err(SdkError::new("dispatch_generate", 0x8000_0004));
        }
        encoder.commands.push(MockCommand::Generate {
            context: context.id,
            frame_id: parameters.frame_id,
            output: parameters.output.id,
            rect: parameters.generation_rect,
            flags: parameters.flags,
            reset: parameters.reset,
        });
        Ok(())
    }
}
