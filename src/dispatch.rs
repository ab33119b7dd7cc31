//! Compute Dispatch
//!
//! Runs the kernel once per logical pixel and hands back the expanded frame.
//! The GPU path keeps its shader, layout, and pipeline for the whole run and
//! builds only the per-tick data buffers:
//!
//! 1. input storage buffer, written through the queue
//! 2. output storage buffer, initialized to the gap color
//! 3. staging buffer the host can map
//!
//! then dispatches, copies output into staging, and waits for the map with a
//! timeout. Allocation and encoding run inside device error scopes and are
//! checked before anything is submitted or mapped. Any failure abandons the
//! tick; nothing partial is returned.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use instant::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::color::PackedColor;
use crate::error::DispatchError;
use crate::frame::{ExpandedFrame, LogicalFrame};
use crate::gpu::GpuContext;
use crate::kernel::{Kernel, WORKGROUP_SIZE};

/// Something that can turn a logical frame into an expanded one.
pub trait Dispatcher {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Expand one frame. `cancel` is checked while waiting on the device.
    fn dispatch(
        &mut self,
        frame: &LogicalFrame,
        cancel: &CancellationToken,
    ) -> Result<ExpandedFrame, DispatchError>;
}

fn check_frame(kernel: &Kernel, frame: &LogicalFrame) -> Result<(), DispatchError> {
    let layout = kernel.layout();
    if frame.width() != layout.logical_width() || frame.height() != layout.logical_height() {
        return Err(DispatchError::FrameSize {
            width: layout.logical_width(),
            height: layout.logical_height(),
            actual_width: frame.width(),
            actual_height: frame.height(),
        });
    }
    Ok(())
}

/// Host fallback: the same kernel as a parallel map over logical rows.
pub struct CpuDispatcher {
    kernel: Kernel,
    gap: PackedColor,
    lanes: usize,
}

impl CpuDispatcher {
    pub fn new(kernel: Kernel, gap: PackedColor) -> Self {
        let lanes = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self { kernel, gap, lanes }
    }

    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }
}

impl Dispatcher for CpuDispatcher {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn dispatch(
        &mut self,
        frame: &LogicalFrame,
        cancel: &CancellationToken,
    ) -> Result<ExpandedFrame, DispatchError> {
        check_frame(&self.kernel, frame)?;
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let layout = self.kernel.layout();
        let mut words = vec![self.gap.0; layout.output_pixels()];
        self.kernel.transform_into(frame, &mut words, self.lanes);

        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        Ok(ExpandedFrame::from_words(
            layout.output_width(),
            layout.output_height(),
            words,
        )?)
    }
}

/// Compute-shader dispatcher.
pub struct GpuDispatcher {
    kernel: Kernel,
    timeout: Duration,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    /// Host copy of an all-gap output, uploaded before every dispatch.
    gap_fill: Vec<u32>,
}

impl GpuDispatcher {
    /// Build the pipeline once. Shader or layout errors are fatal here.
    pub fn new(
        ctx: &GpuContext,
        kernel: Kernel,
        gap: PackedColor,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let layout = kernel.layout();
        let max = ctx.max_storage_binding();
        if layout.output_bytes() > max {
            return Err(DispatchError::Limits {
                what: "expanded frame",
                needed: layout.output_bytes(),
                max,
            });
        }

        let device = ctx.device.clone();
        let (bind_group_layout, pipeline) = guarded(&device, || {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("Dot Expansion Shader"),
                source: wgpu::ShaderSource::Wgsl(kernel.wgsl().into()),
            });

            let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            };
            let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Dot Expansion Bind Group Layout"),
                entries: &[storage(0, true), storage(1, false)],
            });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Dot Expansion Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Dot Expansion Pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: "main",
            });
            (bind_group_layout, pipeline)
        })?;

        info!(
            "Compute pipeline ready: {}x{} -> {}x{}",
            layout.logical_width(),
            layout.logical_height(),
            layout.output_width(),
            layout.output_height()
        );

        Ok(Self {
            kernel,
            timeout,
            device,
            queue: ctx.queue.clone(),
            bind_group_layout,
            pipeline,
            gap_fill: vec![gap.0; layout.output_pixels()],
        })
    }

    /// Create this tick's buffers, record the pass, and submit it once the
    /// device has accepted every step. Returns the staging buffer.
    fn encode(&self, frame: &LogicalFrame) -> Result<wgpu::Buffer, DispatchError> {
        let layout = self.kernel.layout();

        let (staging, bind_group, output) = guarded(&self.device, || {
            let input = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("DMD Input Buffer"),
                size: layout.logical_bytes(),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let output = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("DMD Output Buffer"),
                size: layout.output_bytes(),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("DMD Staging Buffer"),
                size: layout.output_bytes(),
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });

            self.queue.write_buffer(&input, 0, frame.as_bytes());
            self.queue
                .write_buffer(&output, 0, bytemuck::cast_slice(&self.gap_fill));

            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Dot Expansion Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: input.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: output.as_entire_binding(),
                    },
                ],
            });
            (staging, bind_group, output)
        })?;

        let commands = guarded(&self.device, || {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Dot Expansion Encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Dot Expansion Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(
                    layout.logical_width().div_ceil(WORKGROUP_SIZE),
                    layout.logical_height().div_ceil(WORKGROUP_SIZE),
                    1,
                );
            }
            encoder.copy_buffer_to_buffer(&output, 0, &staging, 0, layout.output_bytes());
            encoder.finish()
        })?;

        self.queue.submit(std::iter::once(commands));
        Ok(staging)
    }
}

impl Dispatcher for GpuDispatcher {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn dispatch(
        &mut self,
        frame: &LogicalFrame,
        cancel: &CancellationToken,
    ) -> Result<ExpandedFrame, DispatchError> {
        check_frame(&self.kernel, frame)?;
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let started = Instant::now();
        let staging = self.encode(frame)?;

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        wait_for_map(&rx, self.timeout, cancel, || {
            self.device.poll(wgpu::Maintain::Poll);
        })?;

        let layout = self.kernel.layout();
        let expanded = {
            let view = slice.get_mapped_range();
            ExpandedFrame::from_rgba(layout.output_width(), layout.output_height(), &view)?
        };
        staging.unmap();

        debug!("GPU dispatch took {:?}", started.elapsed());
        Ok(expanded)
    }
}

/// Run `f` inside out-of-memory and validation error scopes and report the
/// first error either scope caught.
fn guarded<T>(device: &wgpu::Device, f: impl FnOnce() -> T) -> Result<T, DispatchError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let value = f();

    // Scopes pop in reverse order of pushing
    let validation = pollster::block_on(device.pop_error_scope());
    let oom = pollster::block_on(device.pop_error_scope());
    if let Some(err) = oom {
        return Err(DispatchError::OutOfMemory(err.to_string()));
    }
    if let Some(err) = validation {
        return Err(DispatchError::Validation(err.to_string()));
    }
    Ok(value)
}

/// Call `poll` until the map callback reports through `rx`, `timeout`
/// elapses, or `cancel` fires. The token may be cancelled from any thread.
fn wait_for_map(
    rx: &mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
    timeout: Duration,
    cancel: &CancellationToken,
    mut poll: impl FnMut(),
) -> Result<(), DispatchError> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        poll();

        match rx.recv_timeout(Duration::from_millis(1)) {
            Ok(result) => return result.map_err(DispatchError::from),
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(DispatchError::MapDropped),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if Instant::now() >= deadline {
            return Err(DispatchError::Timeout(timeout));
        }
    }
}
