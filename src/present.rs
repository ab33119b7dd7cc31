//! Presenter
//!
//! Puts expanded frames on screen. The frame is uploaded into a texture the
//! size of the output surface and drawn by a single scanout pass, scaled to
//! whatever size the window currently has. Gap pixels are blended over black.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::frame::ExpandedFrame;
use crate::gpu::GpuContext;

pub struct Presenter {
    frame_width: u32,
    frame_height: u32,

    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    scanout_pipeline: wgpu::RenderPipeline,
    texture: wgpu::Texture,
    frame_bind_group: wgpu::BindGroup,
}

impl Presenter {
    /// `frame_width` x `frame_height` is the expanded frame size; the window
    /// starts at `width` x `height`.
    pub fn new(
        ctx: &GpuContext,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Self> {
        let device = ctx.device.clone();
        let queue = ctx.queue.clone();

        let surface_caps = surface.get_capabilities(&ctx.adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Surface is not supported by the adapter"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("DMD Frame Texture"),
            size: wgpu::Extent3d {
                width: frame_width,
                height: frame_height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let texture_view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Nearest keeps dot edges sharp when the window is scaled
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("DMD Frame Sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = frame_layout(&device);

        let frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("DMD Frame Bind Group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        let scanout_pipeline = scanout_pipeline(&device, &bind_group_layout, surface_format);

        info!(
            "Presenter initialized: {}x{} frame in a {}x{} window",
            frame_width, frame_height, width, height
        );

        Ok(Self {
            frame_width,
            frame_height,
            device,
            queue,
            surface,
            surface_config,
            scanout_pipeline,
            texture,
            frame_bind_group,
        })
    }

    /// Follow the window size. The frame texture keeps its size.
    pub fn resize(&mut self, new_width: u32, new_height: u32) {
        let new_width = new_width.max(1);
        let new_height = new_height.max(1);
        if new_width == self.surface_config.width && new_height == self.surface_config.height {
            return;
        }

        self.surface_config.width = new_width;
        self.surface_config.height = new_height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    pub fn present(&mut self, frame: &ExpandedFrame) -> Result<()> {
        if frame.width() != self.frame_width || frame.height() != self.frame_height {
            anyhow::bail!(
                "frame is {}x{}, presenter expects {}x{}",
                frame.width(),
                frame.height(),
                self.frame_width,
                self.frame_height
            );
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.frame_width),
                rows_per_image: Some(self.frame_height),
            },
            wgpu::Extent3d {
                width: self.frame_width,
                height: self.frame_height,
                depth_or_array_layers: 1,
            },
        );

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("Surface lost, reconfiguring");
                self.surface.configure(&self.device, &self.surface_config);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("DMD Scanout Encoder"),
        });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("DMD Scanout Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            pass.set_pipeline(&self.scanout_pipeline);
            pass.set_bind_group(0, &self.frame_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

/// Texture at binding 0, sampler at binding 1.
fn frame_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("DMD Frame Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

fn scanout_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("DMD Scanout Shader"),
        source: wgpu::ShaderSource::Wgsl(SCANOUT_SHADER.into()),
    });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("DMD Scanout Pipeline Layout"),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("DMD Scanout Pipeline"),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: "vs_scanout",
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "fs_scanout",
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

/// One oversized triangle covers the viewport; texel (0, 0) is the top-left
/// of the frame.
const SCANOUT_SHADER: &str = r#"
struct Scanout {
    @builtin(position) clip: vec4<f32>,
    @location(0) texel: vec2<f32>,
};

@vertex
fn vs_scanout(@builtin(vertex_index) index: u32) -> Scanout {
    let texel = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: Scanout;
    out.clip = vec4<f32>(texel.x * 2.0 - 1.0, 1.0 - texel.y * 2.0, 0.0, 1.0);
    out.texel = texel;
    return out;
}

@group(0) @binding(0) var dmd_frame: texture_2d<f32>;
@group(0) @binding(1) var dmd_sampler: sampler;

@fragment
fn fs_scanout(in: Scanout) -> @location(0) vec4<f32> {
    return textureSample(dmd_frame, dmd_sampler, in.texel);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanout_pipeline_validates() {
        let ctx = match GpuContext::headless() {
            Ok(ctx) => ctx,
            Err(e) => {
                eprintln!("skipping GPU test: {e}");
                return;
            }
        };

        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = frame_layout(&ctx.device);
        let _pipeline = scanout_pipeline(&ctx.device, &layout, wgpu::TextureFormat::Bgra8UnormSrgb);
        let error = pollster::block_on(ctx.device.pop_error_scope());
        assert!(error.is_none(), "scanout pipeline rejected: {error:?}");
    }
}
