// SPDX-License-Identifier: GPL-3.0-only

//! GPU rasterization backend
//!
//! Points are drawn with a `PointList` pipeline into `Rgba32Float` targets.
//! Accumulation is done by the blend unit: one pipeline per equation binding,
//! with `One/One` factors and the binding's operations on the color and
//! alpha components. Pipelines are created on first use and cached.

use super::{BackendCapabilities, RasterBackend, TargetHandle};
use crate::aggregation::equation::EquationBinding;
use crate::aggregation::geometry::{GridGeometry, GridUniforms};
use crate::constants::{BYTES_PER_PIXEL, TARGET_FORMAT, labels};
use crate::errors::{AggregationResult, BackendError, CapacityError};
use crate::gpu::{self, GpuDeviceInfo};
use crate::shaders::{
    CachedDimensions, GRID_SPLAT_SHADER, padded_bytes_per_row, read_buffer_async,
    strip_row_padding,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
const VALUE_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x4];

struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    dimensions: CachedDimensions,
}

/// Vertex buffers reused across draws while large enough
struct VertexBuffers {
    positions: wgpu::Buffer,
    values: wgpu::Buffer,
    capacity: usize,
}

/// wgpu render-pipeline backend
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    shader: wgpu::ShaderModule,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    pipelines: HashMap<EquationBinding, wgpu::RenderPipeline>,
    targets: HashMap<TargetHandle, GpuTarget>,
    vertex_buffers: Option<VertexBuffers>,
    next_handle: u32,
}

impl WgpuBackend {
    /// Create the device, shader and shared bindings
    pub async fn new() -> AggregationResult<Self> {
        info!("Initializing GPU grid aggregation backend");

        let (device, queue, gpu_info) = gpu::create_aggregation_device(labels::DEVICE).await?;

        info!(
            adapter_name = %gpu_info.adapter_name,
            adapter_backend = ?gpu_info.backend,
            max_texture_dimension_2d = gpu_info.max_texture_dimension_2d,
            "GPU device created for grid aggregation"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(labels::SPLAT_SHADER),
            source: wgpu::ShaderSource::Wgsl(GRID_SPLAT_SHADER.into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(labels::SPLAT_BIND_GROUP_LAYOUT),
            entries: &[
                // Grid uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(labels::SPLAT_PIPELINE_LAYOUT),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(labels::GRID_UNIFORMS),
            size: std::mem::size_of::<GridUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(labels::SPLAT_BIND_GROUP),
            layout: &bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            device,
            queue,
            info: gpu_info,
            shader,
            pipeline_layout,
            uniform_buffer,
            bind_group,
            pipelines: HashMap::new(),
            targets: HashMap::new(),
            vertex_buffers: None,
            next_handle: 0,
        })
    }

    /// Blocking constructor for synchronous callers
    pub fn new_blocking() -> AggregationResult<Self> {
        pollster::block_on(Self::new())
    }

    fn ensure_pipeline(&mut self, binding: &EquationBinding) {
        if self.pipelines.contains_key(binding) {
            return;
        }
        debug!(binding = %binding, "Creating grid splat pipeline");

        let label = format!("grid_splat_pipeline_{}", binding);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &self.shader,
                    entry_point: Some("vs_main"),
                    buffers: &[
                        wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &POSITION_ATTRIBUTES,
                        },
                        wgpu::VertexBufferLayout {
                            array_stride: std::mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                            step_mode: wgpu::VertexStepMode::Vertex,
                            attributes: &VALUE_ATTRIBUTES,
                        },
                    ],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::PointList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(binding.to_wgpu()),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
                cache: None,
            });
        self.pipelines.insert(*binding, pipeline);
    }

    /// Grow the vertex buffers to hold at least `count` points
    fn ensure_vertex_buffers(&mut self, count: usize) {
        if self
            .vertex_buffers
            .as_ref()
            .is_some_and(|b| b.capacity >= count)
        {
            return;
        }
        let capacity = count.next_power_of_two();
        debug!(capacity, "Allocating point vertex buffers");

        let buffer = |label: &str, stride: usize| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: (capacity * stride) as u64,
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        self.vertex_buffers = Some(VertexBuffers {
            positions: buffer(labels::POSITION_BUFFER, std::mem::size_of::<[f32; 2]>()),
            values: buffer(labels::VALUE_BUFFER, std::mem::size_of::<[f32; 4]>()),
            capacity,
        });
    }

    fn target(&self, handle: TargetHandle) -> Result<&GpuTarget, BackendError> {
        self.targets
            .get(&handle)
            .ok_or(BackendError::UnknownTarget(handle.0))
    }

    /// Submit one encoder inside a validation error scope
    fn submit_checked(
        &self,
        encoder: wgpu::CommandEncoder,
        describe: impl FnOnce(wgpu::Error) -> BackendError,
    ) -> Result<(), BackendError> {
        self.queue.submit(std::iter::once(encoder.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(e) => Err(describe(e)),
            None => Ok(()),
        }
    }
}

impl RasterBackend for WgpuBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: format!("wgpu ({})", self.info.adapter_name),
            max_texture_dimension_2d: self.info.max_texture_dimension_2d,
            supports_multi_slot_equations: true,
        }
    }

    fn create_target(&mut self, width: u32, height: u32) -> AggregationResult<TargetHandle> {
        let max = self.info.max_texture_dimension_2d;
        if width == 0 || height == 0 {
            return Err(CapacityError::InvalidDimensions { width, height }.into());
        }
        if width > max || height > max {
            return Err(CapacityError::GridTooLarge { width, height, max }.into());
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(labels::ACCUMULATION_TARGET),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let handle = TargetHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.targets.insert(handle, GpuTarget {
            texture,
            view,
            dimensions: CachedDimensions::new(width, height),
        });
        debug!(target = handle.0, width, height, "Created accumulation texture");
        Ok(handle)
    }

    fn destroy_target(&mut self, target: TargetHandle) {
        if let Some(gpu_target) = self.targets.remove(&target) {
            gpu_target.texture.destroy();
        }
    }

    fn clear_target(&mut self, target: TargetHandle, value: [f32; 4]) -> AggregationResult<()> {
        let gpu_target = self.target(target)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grid_clear_encoder"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("grid_clear_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &gpu_target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(value[0]),
                            g: f64::from(value[1]),
                            b: f64::from(value[2]),
                            a: f64::from(value[3]),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.submit_checked(encoder, |e| {
            BackendError::DrawFailed(format!("Failed to clear target {}: {}", target.0, e))
        })?;
        Ok(())
    }

    fn draw_points(
        &mut self,
        target: TargetHandle,
        binding: &EquationBinding,
        geometry: &GridGeometry,
        positions: &[[f32; 2]],
        values: &[[f32; 4]],
    ) -> AggregationResult<()> {
        if positions.len() != values.len() {
            return Err(BackendError::DrawFailed(format!(
                "{} positions but {} attribute values",
                positions.len(),
                values.len()
            ))
            .into());
        }
        let dimensions = self.target(target)?.dimensions;
        if dimensions.needs_update(geometry.cols, geometry.rows) {
            return Err(BackendError::DrawFailed(format!(
                "target is {}x{}, grid is {}x{}",
                dimensions.width, dimensions.height, geometry.cols, geometry.rows
            ))
            .into());
        }
        if positions.is_empty() {
            return Ok(());
        }

        self.ensure_pipeline(binding);
        self.ensure_vertex_buffers(positions.len());

        let (Some(pipeline), Some(vertex_buffers)) =
            (self.pipelines.get(binding), self.vertex_buffers.as_ref())
        else {
            return Err(BackendError::DrawFailed("pipeline state missing".to_string()).into());
        };
        let gpu_target = self.target(target)?;

        self.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&geometry.uniforms()),
        );
        self.queue
            .write_buffer(&vertex_buffers.positions, 0, bytemuck::cast_slice(positions));
        self.queue
            .write_buffer(&vertex_buffers.values, 0, bytemuck::cast_slice(values));

        let position_bytes = std::mem::size_of_val(positions) as u64;
        let value_bytes = std::mem::size_of_val(values) as u64;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grid_splat_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("grid_splat_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &gpu_target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffers.positions.slice(..position_bytes));
            pass.set_vertex_buffer(1, vertex_buffers.values.slice(..value_bytes));
            pass.draw(0..positions.len() as u32, 0..1);
        }
        self.submit_checked(encoder, |e| {
            BackendError::DrawFailed(format!("Failed to draw into target {}: {}", target.0, e))
        })?;

        debug!(
            target = target.0,
            binding = %binding,
            points = positions.len(),
            "GPU splat draw submitted"
        );
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetHandle) -> AggregationResult<Vec<[f32; 4]>> {
        let gpu_target = self.target(target)?;
        let CachedDimensions { width, height } = gpu_target.dimensions;

        let row_bytes = width * BYTES_PER_PIXEL;
        let padded_row_bytes = padded_bytes_per_row(width, BYTES_PER_PIXEL);

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(labels::STAGING_BUFFER),
            size: u64::from(padded_row_bytes) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("grid_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &gpu_target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.submit_checked(encoder, |e| {
            BackendError::ReadbackFailed(format!("Failed to copy target {}: {}", target.0, e))
        })?;

        let data = pollster::block_on(read_buffer_async(&self.device, &staging_buffer))
            .map_err(BackendError::ReadbackFailed)?;
        let bytes = strip_row_padding(
            &data,
            row_bytes as usize,
            padded_row_bytes as usize,
            height as usize,
        );

        Ok(bytes
            .chunks_exact(BYTES_PER_PIXEL as usize)
            .map(bytemuck::pod_read_unaligned::<[f32; 4]>)
            .collect())
    }
}

impl Drop for WgpuBackend {
    fn drop(&mut self) {
        for (_, gpu_target) in self.targets.drain() {
            gpu_target.texture.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::geometry::GridBounds;
    use crate::constants::{ADD_BLEND_EQUATION, MAX_MIN_BLEND_EQUATION};

    #[tokio::test]
    async fn test_gpu_splat_matches_blend_rules() {
        // This test requires a GPU with float32 blending, so it may be skipped in CI
        let mut backend = match WgpuBackend::new().await {
            Ok(backend) => backend,
            Err(e) => {
                println!("Skipping test (no usable GPU): {}", e);
                return;
            }
        };
        let geometry =
            GridGeometry::new(GridBounds::new([0.0, 0.0], [2.0, 2.0]), [1.0, 1.0]).unwrap();

        let target = backend.create_target(2, 2).unwrap();
        backend
            .clear_target(target, ADD_BLEND_EQUATION.clear_value())
            .unwrap();
        backend
            .draw_points(
                target,
                &ADD_BLEND_EQUATION,
                &geometry,
                &[[0.5, 0.5], [0.5, 0.5], [1.5, 0.5], [2.0, 2.0], [5.0, 5.0]],
                &[[1.0, 0.0, 0.0, 1.0]; 5],
            )
            .unwrap();
        let pixels = backend.read_pixels(target).unwrap();
        assert_eq!(pixels[0], [2.0, 0.0, 0.0, 2.0]);
        assert_eq!(pixels[1], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(pixels[2], [0.0; 4]);
        assert_eq!(pixels[3], [1.0, 0.0, 0.0, 1.0]);

        let companion = backend.create_target(2, 2).unwrap();
        backend
            .clear_target(companion, MAX_MIN_BLEND_EQUATION.clear_value())
            .unwrap();
        backend
            .draw_points(
                companion,
                &MAX_MIN_BLEND_EQUATION,
                &geometry,
                &[[0.5, 0.5], [0.5, 0.5]],
                &[[3.0, 0.0, 0.0, 3.0], [-1.0, 0.0, 0.0, -1.0]],
            )
            .unwrap();
        let pixels = backend.read_pixels(companion).unwrap();
        assert_eq!(pixels[0][0], 3.0);
        assert_eq!(pixels[0][3], -1.0);
    }
}
