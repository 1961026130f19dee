//! Seams to the collaborators this crate drives but does not implement: the
//! GPU / render graph ([`RenderDevice`]) and the vendor frame generation SDK
//! ([`FrameGenerationSdk`]).

use crate::{
    FrameContextDescriptor, FrameInterpolationError, SdkError,
    motion_vectors::MotionVectorInputs,
    render_parameters::{GenerateParameters, PrepareParameters, Rect},
};
use glam::UVec2;
use std::fmt;
use wgpu::{TextureFormat, TextureUsages};

/// Description of a 2D texture the scheduler asks the device to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: &'static str,
    pub size: UVec2,
    pub format: TextureFormat,
    pub usage: TextureUsages,
}

/// GPU device and command recording used by the scheduler.
///
/// Allocation happens on the render thread only. [`Self::copy_to_present_target`]
/// is the one entry point called from the present thread and must record and
/// submit its own work.
pub trait RenderDevice: Send + Sync + 'static {
    type Texture: Clone + fmt::Debug + Send + Sync + 'static;
    /// Command stream a frame's passes are recorded into, in order.
    type Encoder;

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Self::Texture, FrameInterpolationError>;

    fn copy_texture(
        &self,
        encoder: &mut Self::Encoder,
        source: &Self::Texture,
        destination: &Self::Texture,
        size: UVec2,
    );

    fn clear_texture(&self, encoder: &mut Self::Encoder, texture: &Self::Texture);

    /// Record the pass turning sparse engine velocity plus depth into dense
    /// motion vectors written to `output`.
    fn convert_motion_vectors(
        &self,
        encoder: &mut Self::Encoder,
        inputs: &MotionVectorInputs<'_, Self::Texture>,
        output: &Self::Texture,
    ) -> Result<(), FrameInterpolationError>;

    /// Copy `rect` of `source` into the same region of the platform's present target.
    fn copy_to_present_target(
        &self,
        source: &Self::Texture,
        target: &Self::Texture,
        rect: Rect,
    ) -> Result<(), FrameInterpolationError>;

    /// Block until all submitted GPU work has completed.
    fn flush(&self);
}

/// Vendor frame generation SDK.
///
/// Contexts are opaque and expensive to create; the scheduler caches them in a
/// [`crate::ContextCache`] and only destroys them through [`Self::destroy_context`].
pub trait FrameGenerationSdk<D: RenderDevice>: Send + Sync {
    type Context: Send;

    /// Upscaler identity; views rendered with a different upscaler are never interpolated.
    fn name(&self) -> &str;

    fn is_supported(&self, device: &D) -> bool;

    fn create_context(
        &self,
        descriptor: &FrameContextDescriptor,
    ) -> Result<Self::Context, SdkError>;

    fn destroy_context(&self, context: Self::Context);

    fn dispatch_prepare(
        &self,
        context: &mut Self::Context,
        encoder: &mut D::Encoder,
        parameters: &PrepareParameters<'_, D::Texture>,
    ) -> Result<(), SdkError>;

    fn dispatch_generate(
        &self,
        context: &mut Self::Context,
        encoder: &mut D::Encoder,
        parameters: &GenerateParameters<'_, D::Texture>,
    ) -> Result<(), SdkError>;
}
