//! Voxelization technique (§4.5): conservative rasterization of the scene
//! from the three principal axes into the sparse voxel grid.
//!
//! Two submissions per run: the first counts emitted fragments without
//! storing them, the host resizes the fragment buffers to fit, then the
//! second pass actually writes `fragment_data`/`next_fragment_index` and
//! sets `occupied_bits`. Geometry is drawn through the scene's vertex/index
//! buffers, one `MaterialCache` instance per source material (§4.5
//! "Materials"), with draws sorted by material index to minimize pipeline
//! rebinds.

use std::num::NonZeroU64;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::asset::{MeshKind, Scene};
use crate::context::Context;
use crate::material::{MaterialCache, MaterialClass, Pipeline as MaterialPipeline};
use crate::resource::{Buffer, SharedPools, UniformCellAllocator};
use crate::signal::{Signal, SignalToken};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};
use crate::util::div_ceil;

/// §4.5's state table: `VS_INIT → VS_FIRST_CB_SUBMITTED →
/// VS_SECOND_CB_SUBMITTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelizeState {
    Init,
    FirstSubmitted,
    SecondSubmitted,
}

/// The three axis-aligned orthographic view-projection matrices a
/// conservative rasterization pass renders the scene through, one looking
/// along each of -X, -Y, -Z into a cube enclosing `aabb_min..aabb_max`.
pub fn axis_view_projections(aabb_min: Vec3, aabb_max: Vec3) -> [Mat4; 3] {
    let center = (aabb_min + aabb_max) * 0.5;
    let half_extent = ((aabb_max - aabb_min) * 0.5).max_element().max(f32::EPSILON);

    let proj = Mat4::orthographic_rh(
        -half_extent,
        half_extent,
        -half_extent,
        half_extent,
        0.0,
        half_extent * 2.0,
    );

    let eye_x = center - Vec3::X * half_extent;
    let eye_y = center - Vec3::Y * half_extent;
    let eye_z = center - Vec3::Z * half_extent;

    [
        proj * Mat4::look_at_rh(eye_x, center, Vec3::Y),
        proj * Mat4::look_at_rh(eye_y, center, Vec3::Z),
        proj * Mat4::look_at_rh(eye_z, center, Vec3::Y),
    ]
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VoxelizeUniform {
    view_proj: [[f32; 4]; 4],
    aabb_min: [f32; 3],
    side: u32,
    aabb_max: [f32; 3],
    store_fragments: u32,
}

const VERTEX_BUFFER_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<crate::asset::Vertex>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &[
        wgpu::VertexAttribute { format: wgpu::VertexFormat::Float32x3, offset: 0, shader_location: 0 },
        wgpu::VertexAttribute { format: wgpu::VertexFormat::Float32x3, offset: 12, shader_location: 1 },
    ],
};

/// Counts emitted fragments. Mirrors the atomic counter the fragment
/// shader increments unconditionally (§4.5: "first submission counts
/// emitted fragments").
pub struct CpuFragmentCounter {
    pub fragment_count: u32,
    pub occupied_count: u32,
}

impl CpuFragmentCounter {
    /// A CPU reference pass: `hashes` is one voxel hash per emitted
    /// fragment (as the fragment shader would compute, once per covered
    /// voxel per axis pass), used by tests to check the counting and
    /// resize logic without a GPU adapter.
    pub fn count(hashes: &[u32]) -> Self {
        let mut seen = std::collections::HashSet::new();
        for &h in hashes {
            seen.insert(h);
        }
        Self {
            fragment_count: hashes.len() as u32,
            occupied_count: seen.len() as u32,
        }
    }
}

/// The GPU-backed technique. Runs once per scene load (§4.8: "Voxelization
/// runs once"); `restart` re-arms it over the same scene's geometry with a
/// freshly computed AABB.
pub struct VoxelizeTechnique {
    flags: TechniqueFlags,
    state: VoxelizeState,
    pools: SharedPools,
    side: u32,
    aabb_min: Vec3,
    aabb_max: Vec3,
    fragment_count: u32,
    occupied_count: u32,
    complete: Signal<u32>,
    scene: Scene,
    draw_ranges: Vec<(Range<u32>, u32)>,
    draw_bind_group_layout: Option<wgpu::BindGroupLayout>,
    materials: MaterialCache,
}

impl VoxelizeTechnique {
    pub fn new(pools: SharedPools, side: u32, scene: Scene) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::SingleTime,
                compute_host_synchronize: true,
                ..TechniqueFlags::default()
            },
            state: VoxelizeState::Init,
            pools,
            side,
            aabb_min: Vec3::ZERO,
            aabb_max: Vec3::ZERO,
            fragment_count: 0,
            occupied_count: 0,
            complete: Signal::new(),
            scene,
            draw_ranges: Vec::new(),
            draw_bind_group_layout: None,
            materials: MaterialCache::new(),
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(u32) + 'static) -> SignalToken<u32> {
        self.complete.connect(callback)
    }

    pub fn occupied_count(&self) -> u32 {
        self.occupied_count
    }

    /// Re-arm for a freshly computed AABB over the same scene (called from
    /// the asset layer, not from within the scheduler tick).
    pub fn restart(&mut self, aabb_min: Vec3, aabb_max: Vec3) {
        self.aabb_min = aabb_min;
        self.aabb_max = aabb_max;
        self.fragment_count = 0;
        self.occupied_count = 0;
        self.state = VoxelizeState::Init;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn voxel_count(&self) -> u32 {
        self.side * self.side * self.side
    }

    /// One draw range per primitive across every `RenderModel`/
    /// `EmitterModel` instance, sorted by material index so `record`'s draw
    /// loop visits one material's worth of draws at a time (§4.5:
    /// "rendering orders nodes by voxelization material to minimize
    /// pipeline rebinds").
    fn collect_draw_ranges(scene: &Scene) -> Vec<(Range<u32>, u32)> {
        let mut ranges = Vec::new();
        scene.visit_instances::<_, ()>(|instance, _parent| {
            if matches!(instance.mesh_kind, MeshKind::RenderModel | MeshKind::EmitterModel) {
                if let Some(mesh_index) = instance.mesh {
                    if let Some(mesh) = scene.meshes.get(mesh_index as usize) {
                        for primitive in &mesh.primitives {
                            ranges.push((primitive.indices.clone(), primitive.material));
                        }
                    }
                }
            }
        });
        ranges.sort_by_key(|(_, material)| *material);
        ranges
    }

    fn allocate_counting_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let voxels = self.voxel_count().max(1) as u64;

        if !pools.buffers.exists("occupied_bits") {
            let words = div_ceil(self.voxel_count().max(1), 32) as u64;
            pools.buffers.build("occupied_bits", || {
                Buffer::new(
                    context,
                    "occupied_bits",
                    words * 4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        }
        if !pools.buffers.exists("voxel_first_index") {
            pools.buffers.build("voxel_first_index", || {
                Buffer::new(
                    context,
                    "voxel_first_index",
                    voxels * 4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        }
        if !pools.buffers.exists("fragment_counter") {
            pools.buffers.build("fragment_counter", || {
                Buffer::new(
                    context,
                    "fragment_counter",
                    4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        }
        if !pools.buffers.exists("fragment_occupied_counter") {
            pools.buffers.build("fragment_occupied_counter", || {
                Buffer::new(
                    context,
                    "fragment_occupied_counter",
                    4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        }
        if !pools.buffers.exists("fragment_slot_counter") {
            pools.buffers.build("fragment_slot_counter", || {
                Buffer::new(
                    context,
                    "fragment_slot_counter",
                    4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        }
    }

    /// Resize `fragment_data`/`next_fragment_index` to fit
    /// `fragment_count`, per §4.5's `VS_FIRST_CB_SUBMITTED` step. A count
    /// of 0 (empty scene, or before the first pass has run) still
    /// allocates a 1-element buffer; `wgpu` rejects zero-sized buffers.
    fn resize_fragment_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let count = self.fragment_count.max(1) as u64;

        let fragment_data_size = count * std::mem::size_of::<crate::voxel::Fragment>() as u64;
        if !pools.buffers.exists("fragment_data") {
            pools.buffers.build("fragment_data", || {
                Buffer::new(
                    context,
                    "fragment_data",
                    fragment_data_size,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        } else {
            pools.buffers.resize("fragment_data", |old| {
                Buffer::recreate(context, old, fragment_data_size, None)
            });
        }

        if !pools.buffers.exists("next_fragment_index") {
            pools.buffers.build("next_fragment_index", || {
                Buffer::new(
                    context,
                    "next_fragment_index",
                    count * 4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        } else {
            pools.buffers.resize("next_fragment_index", |old| {
                Buffer::recreate(context, old, count * 4, None)
            });
        }
    }

    fn allocate_geometry_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();

        if !pools.buffers.exists("voxelize_vertices") {
            let fallback = [crate::asset::Vertex::default()];
            let vertices: &[crate::asset::Vertex] =
                if self.scene.vertices.is_empty() { &fallback } else { &self.scene.vertices };
            pools.buffers.build("voxelize_vertices", || {
                Buffer::with_data(
                    context,
                    "voxelize_vertices",
                    bytemuck::cast_slice(vertices),
                    wgpu::BufferUsages::VERTEX,
                )
            });
        }

        if !pools.buffers.exists("voxelize_indices") {
            let fallback = [0u32];
            let indices: &[u32] = if self.scene.indices.is_empty() { &fallback } else { &self.scene.indices };
            pools.buffers.build("voxelize_indices", || {
                Buffer::with_data(
                    context,
                    "voxelize_indices",
                    bytemuck::cast_slice(indices),
                    wgpu::BufferUsages::INDEX,
                )
            });
        }
    }

    /// Clears the per-run accumulators before the counting pass (§4.5
    /// `VS_INIT`): a repeated `restart` must not see occupancy bits or
    /// counts left over from a previous voxelization.
    fn reset_counting_state(&self, context: &Context) {
        let pools = self.pools.borrow();
        if let Some(buffer) = pools.buffers.get("occupied_bits") {
            buffer.set_content(context, &vec![0u8; buffer.size as usize]);
        }
        if let Some(buffer) = pools.buffers.get("voxel_first_index") {
            buffer.set_content(context, &vec![0xFFu8; buffer.size as usize]);
        }
        if let Some(buffer) = pools.buffers.get("fragment_counter") {
            buffer.set_content(context, &0u32.to_le_bytes());
        }
        if let Some(buffer) = pools.buffers.get("fragment_occupied_counter") {
            buffer.set_content(context, &0u32.to_le_bytes());
        }
    }

    fn reset_slot_counter(&self, context: &Context) {
        let pools = self.pools.borrow();
        if let Some(buffer) = pools.buffers.get("fragment_slot_counter") {
            buffer.set_content(context, &0u32.to_le_bytes());
        }
    }
}

impl Technique for VoxelizeTechnique {
    fn name(&self) -> &'static str {
        "voxelize"
    }

    fn flags(&self) -> TechniqueFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TechniqueFlags) {
        self.flags = flags;
    }

    fn init(&mut self, context: &mut Context) {
        self.allocate_counting_buffers(context);
        self.resize_fragment_buffers(context);
        self.allocate_geometry_buffers(context);
        self.draw_ranges = Self::collect_draw_ranges(&self.scene);

        let draw_bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxelize draw"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 5,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 6,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 7,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let material_bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("voxelize material"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let pipeline_layout = context.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("voxelize"),
            bind_group_layouts: &[&draw_bind_group_layout, &material_bind_group_layout],
            push_constant_ranges: &[],
        });

        let module = context.create_shader_module(
            include_str!("../shaders/voxelize.wgsl"),
            "shaders/voxelize.wgsl",
            &[],
        );
        let shader = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("voxelize"),
            source: wgpu::ShaderSource::Naga(std::borrow::Cow::Borrowed(&module)),
        });

        let render_pipeline = context.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("voxelize"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vertex_main",
                buffers: &[VERTEX_BUFFER_LAYOUT],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                conservative: true,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fragment_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::R8Unorm,
                    blend: None,
                    write_mask: wgpu::ColorWrites::empty(),
                })],
            }),
            multiview: None,
        });

        let class = MaterialClass::new(
            "voxelize",
            &module,
            material_bind_group_layout,
            pipeline_layout,
            MaterialPipeline::Render(render_pipeline),
            None,
        );
        self.materials.build_class(class);

        // One voxelization material instance per source material (§4.5
        // "Materials"); an empty scene still gets a single default
        // instance so the pipeline always has at least one to bind.
        let material_count = self.scene.materials.len().max(1);
        {
            let mut pools = self.pools.borrow_mut();
            pools.uniforms.build("voxelize_draw_uniforms", || {
                UniformCellAllocator::new(
                    context,
                    "voxelize_draw_uniforms",
                    std::mem::size_of::<VoxelizeUniform>() as u64,
                    3,
                )
            });
            pools.uniforms.build("voxelize_material_uniforms", || {
                UniformCellAllocator::new(context, "voxelize_material_uniforms", 4, material_count)
            });
        }

        for i in 0..material_count {
            let reflectance = self.scene.materials.get(i).map(|material| material.reflectance).unwrap_or(0.5);
            {
                let mut pools = self.pools.borrow_mut();
                if let Some(allocator) = pools.uniforms.get_mut("voxelize_material_uniforms") {
                    allocator.reset_cell(i);
                    allocator.append(i, reflectance);
                    allocator.upload(context);
                }
            }

            let pools = self.pools.borrow();
            if let Some(allocator) = pools.uniforms.get("voxelize_material_uniforms") {
                let instance_name = format!("voxelize_material_{i}");
                self.materials.instantiate("voxelize", &instance_name, |layout| {
                    context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("voxelize material"),
                        layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: allocator.buffer(),
                                offset: 0,
                                size: NonZeroU64::new(allocator.binding_size()),
                            }),
                        }],
                    })
                });
            }
        }

        self.draw_bind_group_layout = Some(draw_bind_group_layout);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        // Empty-scene edge case (§4.5 "failure behavior"): skip straight
        // to completion with M=0 rather than recording a no-op pass.
        if self.aabb_min == self.aabb_max && self.state == VoxelizeState::Init {
            let encoder = context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("voxelize empty") });
            self.state = VoxelizeState::SecondSubmitted;
            return RecordedCommand {
                command_buffer: encoder.finish(),
                queue_kind: QueueKind::Graphics,
                id: self.name(),
            };
        }

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("voxelize") });

        let store_fragments: u32 = if self.state == VoxelizeState::FirstSubmitted {
            self.resize_fragment_buffers(context);
            self.reset_slot_counter(context);
            1
        } else {
            self.reset_counting_state(context);
            0
        };

        let view_projs = axis_view_projections(self.aabb_min, self.aabb_max);
        {
            let mut pools = self.pools.borrow_mut();
            if let Some(allocator) = pools.uniforms.get_mut("voxelize_draw_uniforms") {
                for (axis, view_proj) in view_projs.iter().enumerate() {
                    allocator.reset_cell(axis);
                    allocator.append(
                        axis,
                        VoxelizeUniform {
                            view_proj: view_proj.to_cols_array_2d(),
                            aabb_min: self.aabb_min.to_array(),
                            side: self.side,
                            aabb_max: self.aabb_max.to_array(),
                            store_fragments,
                        },
                    );
                }
                allocator.upload(context);
            }
        }

        let dummy_target = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("voxelize dummy target"),
            size: wgpu::Extent3d { width: self.side.max(1), height: self.side.max(1), depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R8Unorm,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = dummy_target.create_view(&wgpu::TextureViewDescriptor::default());

        let Some(class) = self.materials.class("voxelize") else {
            return RecordedCommand { command_buffer: encoder.finish(), queue_kind: QueueKind::Graphics, id: self.name() };
        };
        let MaterialPipeline::Render(pipeline) = &class.pipeline else {
            return RecordedCommand { command_buffer: encoder.finish(), queue_kind: QueueKind::Graphics, id: self.name() };
        };
        let Some(draw_bind_group_layout) = &self.draw_bind_group_layout else {
            return RecordedCommand { command_buffer: encoder.finish(), queue_kind: QueueKind::Graphics, id: self.name() };
        };

        let pools = self.pools.borrow();
        let (
            Some(vertex_buffer),
            Some(index_buffer),
            Some(occupied_bits),
            Some(voxel_first_index),
            Some(fragment_counter),
            Some(fragment_occupied_counter),
            Some(fragment_slot_counter),
            Some(next_fragment_index),
            Some(fragment_data),
            Some(draw_uniforms),
            Some(material_uniforms),
        ) = (
            pools.buffers.get("voxelize_vertices"),
            pools.buffers.get("voxelize_indices"),
            pools.buffers.get("occupied_bits"),
            pools.buffers.get("voxel_first_index"),
            pools.buffers.get("fragment_counter"),
            pools.buffers.get("fragment_occupied_counter"),
            pools.buffers.get("fragment_slot_counter"),
            pools.buffers.get("next_fragment_index"),
            pools.buffers.get("fragment_data"),
            pools.uniforms.get("voxelize_draw_uniforms"),
            pools.uniforms.get("voxelize_material_uniforms"),
        )
        else {
            drop(pools);
            return RecordedCommand { command_buffer: encoder.finish(), queue_kind: QueueKind::Graphics, id: self.name() };
        };

        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxelize draw"),
            layout: draw_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: draw_uniforms.buffer(),
                        offset: 0,
                        size: NonZeroU64::new(draw_uniforms.binding_size()),
                    }),
                },
                wgpu::BindGroupEntry { binding: 1, resource: occupied_bits.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: voxel_first_index.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: fragment_counter.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: fragment_occupied_counter.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: fragment_slot_counter.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: next_fragment_index.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: fragment_data.handle.as_entire_binding() },
            ],
        });

        // Three passes, one per principal axis (§4.5).
        for axis in 0..3 {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("voxelize axis pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Clear(wgpu::Color::BLACK), store: false },
                })],
                depth_stencil_attachment: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[draw_uniforms.dynamic_offset(axis)]);
            pass.set_vertex_buffer(0, vertex_buffer.handle.slice(..));
            pass.set_index_buffer(index_buffer.handle.slice(..), wgpu::IndexFormat::Uint32);

            for (range, material_index) in &self.draw_ranges {
                let instance_name = format!("voxelize_material_{material_index}");
                if let Some(material) = self.materials.get(&instance_name) {
                    pass.set_bind_group(1, &material.bind_group, &[material_uniforms.dynamic_offset(material.cell_index)]);
                    pass.draw_indexed(range.clone(), 0, 0..1);
                }
            }
        }

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Graphics,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, context: &Context) {
        match self.state {
            VoxelizeState::Init => {
                let pools = self.pools.borrow();
                if let Some(buffer) = pools.buffers.get("fragment_counter") {
                    let bytes = buffer.get_content(context);
                    self.fragment_count = u32::from_le_bytes(bytes[..4].try_into().unwrap());
                }
                drop(pools);
                self.state = VoxelizeState::FirstSubmitted;
            }
            VoxelizeState::FirstSubmitted => {
                let pools = self.pools.borrow();
                if let Some(buffer) = pools.buffers.get("fragment_occupied_counter") {
                    let bytes = buffer.get_content(context);
                    self.occupied_count = u32::from_le_bytes(bytes[..4].try_into().unwrap());
                }
                drop(pools);
                self.state = VoxelizeState::SecondSubmitted;
                log::info!(
                    "voxelization complete: {} fragments, {} occupied voxels",
                    self.fragment_count,
                    self.occupied_count
                );
                self.complete.emit(self.occupied_count);
                self.flags.active = false;
                self.flags.needs_to_record = false;
            }
            VoxelizeState::SecondSubmitted => {
                // Already-complete empty-scene path: still emit once.
                if self.flags.active {
                    self.complete.emit(self.occupied_count);
                    self.flags.active = false;
                    self.flags.needs_to_record = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{BoundingSphere, Instance, Material, Mesh, Primitive, Transform};

    #[test]
    fn axis_views_are_distinct_orthographic_projections() {
        let views = axis_view_projections(Vec3::splat(-5.0), Vec3::splat(5.0));
        assert_ne!(views[0], views[1]);
        assert_ne!(views[1], views[2]);
    }

    #[test]
    fn degenerate_aabb_still_yields_finite_matrices() {
        let views = axis_view_projections(Vec3::ZERO, Vec3::ZERO);
        for view in views {
            assert!(view.is_finite());
        }
    }

    #[test]
    fn fragment_counter_counts_occupied_vs_total() {
        let hashes = vec![1, 1, 2, 3, 3, 3];
        let counter = CpuFragmentCounter::count(&hashes);
        assert_eq!(counter.fragment_count, 6);
        assert_eq!(counter.occupied_count, 3);
    }

    #[test]
    fn empty_fragment_list_has_zero_counts() {
        let counter = CpuFragmentCounter::count(&[]);
        assert_eq!(counter.fragment_count, 0);
        assert_eq!(counter.occupied_count, 0);
    }

    fn leaf_instance(mesh: u32, mesh_kind: MeshKind) -> Instance {
        Instance {
            name: None,
            mesh: Some(mesh),
            mesh_kind,
            transform: Transform::default(),
            children: Vec::new(),
        }
    }

    #[test]
    fn draw_ranges_are_sorted_by_material_and_skip_non_render_kinds() {
        let mut scene = Scene::default();
        scene.materials.push(Material::default());
        scene.materials.push(Material::default());
        scene.meshes.push(Mesh {
            primitives: vec![
                Primitive { indices: 0..3, bounding_sphere: BoundingSphere::default(), material: 1 },
                Primitive { indices: 3..6, bounding_sphere: BoundingSphere::default(), material: 0 },
            ],
        });
        scene.meshes.push(Mesh {
            primitives: vec![Primitive { indices: 6..9, bounding_sphere: BoundingSphere::default(), material: 0 }],
        });
        scene.instances.push(leaf_instance(0, MeshKind::RenderModel));
        scene.instances.push(leaf_instance(1, MeshKind::LightVolume));

        let ranges = VoxelizeTechnique::collect_draw_ranges(&scene);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].1, 0);
        assert_eq!(ranges[1].1, 1);
    }

    #[test]
    fn empty_scene_has_no_draw_ranges() {
        let scene = Scene::default();
        assert!(VoxelizeTechnique::collect_draw_ranges(&scene).is_empty());
    }
}
