use crate::{
    FrameInterpolationError, RenderDevice, TextureDescriptor,
    motion_vectors::{CameraParameters, MotionVectorInputs},
    render_parameters::Rect,
};
use glam::UVec2;
use tracing::{trace, warn};
use wgpu::{
    BindGroupDescriptor, BindGroupEntry, BindingResource, BufferUsages, CommandEncoder,
    CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline, ComputePipelineDescriptor,
    Device, Extent3d, ImageSubresourceRange, Origin3d, PollType, Queue, TexelCopyTextureInfo,
    Texture, TextureAspect, TextureDimension, TextureViewDescriptor, include_wgsl,
    util::{BufferInitDescriptor, DeviceExt},
};

const WORKGROUP_SIZE: u32 = 8;

/// [`RenderDevice`] backed by a `wgpu` device and queue.
pub struct WgpuRenderDevice {
    device: Device,
    queue: Queue,
    motion_vector_pipeline: ComputePipeline,
}

impl WgpuRenderDevice {
    /// Wraps `device` and `queue`, compiling the motion vector conversion pass.
    pub fn new(device: &Device, queue: &Queue) -> Self {
        let shader = device.create_shader_module(include_wgsl!("convert_motion_vectors.wgsl"));
        let motion_vector_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("frame_interpolation_convert_motion_vectors"),
            layout: None,
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Self {
            device: device.clone(),
            queue: queue.clone(),
            motion_vector_pipeline,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }
}

fn texture_size(texture: &Texture) -> UVec2 {
    UVec2::new(texture.width(), texture.height())
}

fn extent(size: UVec2) -> Extent3d {
    Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}

/// Uniform block of `convert_motion_vectors.wgsl`.
fn motion_vector_uniforms(camera: &CameraParameters, render_size: UVec2) -> Vec<u8> {
    camera
        .clip_to_prev_clip
        .to_cols_array()
        .into_iter()
        .chain(render_size.as_vec2().to_array())
        .chain(camera.motion_vector_scale.to_array())
        .flat_map(f32::to_le_bytes)
        .collect()
}

impl RenderDevice for WgpuRenderDevice {
    type Texture = Texture;
    type Encoder = CommandEncoder;

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Texture, FrameInterpolationError> {
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        let size = descriptor.size;
        if size.cmpeq(UVec2::ZERO).any() || size.max_element() > max_dimension {
            return Err(FrameInterpolationError::ResourceAllocation {
                resource: descriptor.label,
                reason: format!(
                    "size {} outside of 1..={max_dimension}",
                    descriptor.size
                ),
            });
        }

        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(descriptor.label),
            size: extent(descriptor.size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: descriptor.format,
            usage: descriptor.usage,
            view_formats: &[],
        }))
    }

    fn copy_texture(
        &self,
        encoder: &mut CommandEncoder,
        source: &Texture,
        destination: &Texture,
        size: UVec2,
    ) {
        encoder.copy_texture_to_texture(
            source.as_image_copy(),
            destination.as_image_copy(),
            extent(size),
        );
    }

    fn clear_texture(&self, encoder: &mut CommandEncoder, texture: &Texture) {
        encoder.clear_texture(texture, &ImageSubresourceRange::default());
    }

    fn convert_motion_vectors(
        &self,
        encoder: &mut CommandEncoder,
        inputs: &MotionVectorInputs<'_, Texture>,
        output: &Texture,
    ) -> Result<(), FrameInterpolationError> {
        let output_size = texture_size(output);
        if inputs.render_size.cmpgt(output_size).any() {
            return Err(FrameInterpolationError::CopyOutOfBounds {
                rect: Rect::from_size(inputs.render_size),
                extent: output_size,
            });
        }
        if !inputs.depth.format().has_depth_aspect() {
            return Err(FrameInterpolationError::MissingTexture("depth"));
        }

        let uniforms = self.device.create_buffer_init(&BufferInitDescriptor {
            label: Some("frame_interpolation_motion_vector_params"),
            contents: &motion_vector_uniforms(inputs.camera, inputs.render_size),
            usage: BufferUsages::UNIFORM,
        });
        let depth_view = inputs.depth.create_view(&TextureViewDescriptor {
            aspect: TextureAspect::DepthOnly,
            ..Default::default()
        });
        let velocity_view = inputs.velocity.create_view(&TextureViewDescriptor::default());
        let output_view = output.create_view(&TextureViewDescriptor::default());

        let bind_group = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("frame_interpolation_convert_motion_vectors"),
            layout: &self.motion_vector_pipeline.get_bind_group_layout(0),
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&depth_view),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: BindingResource::TextureView(&velocity_view),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: BindingResource::TextureView(&output_view),
                },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("frame_interpolation_convert_motion_vectors"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.motion_vector_pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(
            inputs.render_size.x.div_ceil(WORKGROUP_SIZE),
            inputs.render_size.y.div_ceil(WORKGROUP_SIZE),
            1,
        );
        Ok(())
    }

    fn copy_to_present_target(
        &self,
        source: &Texture,
        target: &Texture,
        rect: Rect,
    ) -> Result<(), FrameInterpolationError> {
        let extent_limit = texture_size(source).min(texture_size(target));
        if !rect.fits_within(extent_limit) {
            return Err(FrameInterpolationError::CopyOutOfBounds {
                rect,
                extent: extent_limit,
            });
        }

        let origin = Origin3d {
            x: rect.origin.x,
            y: rect.origin.y,
            z: 0,
        };
        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("frame_interpolation_present_copy"),
        });
        encoder.copy_texture_to_texture(
            TexelCopyTextureInfo {
                texture: source,
                mip_level: 0,
                origin,
                aspect: TextureAspect::All,
            },
            TexelCopyTextureInfo {
                texture: target,
                mip_level: 0,
                origin,
                aspect: TextureAspect::All,
            },
            extent(rect.size),
        );
        self.queue.submit([encoder.finish()]);
        trace!(?rect, "submitted present copy");
        Ok(())
    }

    fn flush(&self) {
        if let Err(err) = self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        }) {
            warn!(%err, "failed to wait for the GPU to go idle");
        }
    }
}
