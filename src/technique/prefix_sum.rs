//! Prefix-sum / stream-compaction engine (§4.4): converts `occupied_bits`
//! (one bit per voxel) into `first_index_compacted`/
//! `hashed_position_compacted`, via up to 5 levels of parallel reduction
//! followed by a down-sweep and a scatter.

use bytemuck::{Pod, Zeroable};

use crate::context::Context;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};
use crate::util::div_ceil;

pub const ELEMENTS_PER_THREAD: u32 = 128;
pub const MAX_LEVELS: usize = 5;

/// The state machine of one full compaction pass (§4.4's table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixSumState {
    Reduction { level: usize },
    Sweepdown { level: usize },
    LastStep,
    Finished,
}

/// Computes the reduction-level sizes for a base array of `base_size`
/// cells: `size_i = ceil(size_{i-1} / ELEMENTS_PER_THREAD)`, capped at
/// `MAX_LEVELS` (§4.4, §8 scenario (f): `elements_per_thread > N` still
/// produces a valid single-cell reduction).
pub fn level_sizes(base_size: u32) -> Vec<u32> {
    let mut sizes = vec![base_size.max(1)];
    while sizes.last().copied().unwrap_or(1) > 1 && sizes.len() < MAX_LEVELS {
        let next = div_ceil(*sizes.last().unwrap(), ELEMENTS_PER_THREAD);
        sizes.push(next);
    }
    sizes
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LevelSizesUniform {
    input_count: u32,
    output_count: u32,
}

/// A CPU-side reference implementation of one compaction pass, used both
/// as the fallback for tiny scenes (§8 scenario f) and by tests that
/// check the state machine's arithmetic without a GPU adapter.
pub struct CpuPrefixSum {
    levels: Vec<Vec<u32>>,
}

impl CpuPrefixSum {
    /// `occupancy` is one `u32` (0 or 1) per voxel, for the base level.
    pub fn reduce(occupancy: &[u32]) -> Self {
        let mut levels = vec![occupancy.to_vec()];

        loop {
            let current = levels.last().unwrap();
            if current.len() <= 1 {
                break;
            }
            let next: Vec<u32> = current
                .chunks(ELEMENTS_PER_THREAD as usize)
                .map(|chunk| chunk.iter().sum())
                .collect();
            levels.push(next);
            if levels.len() >= MAX_LEVELS {
                break;
            }
        }

        Self { levels }
    }

    pub fn total(&self) -> u32 {
        self.levels.last().map(|level| level.iter().sum()).unwrap_or(0)
    }

    /// Exclusive prefix sum over the base (voxel) level, by sweeping down
    /// from the coarsest level.
    pub fn sweep_down(&self) -> Vec<u32> {
        let top = self.levels.len() - 1;
        let mut prefixes: Vec<Vec<u32>> = vec![Vec::new(); self.levels.len()];

        prefixes[top] = exclusive_prefix(&self.levels[top]);

        for level in (0..top).rev() {
            let parent_prefix = &prefixes[level + 1];
            let values = &self.levels[level];
            let mut child_prefix = Vec::with_capacity(values.len());

            for (chunk_index, chunk) in values.chunks(ELEMENTS_PER_THREAD as usize).enumerate() {
                let mut running = parent_prefix[chunk_index];
                for &value in chunk {
                    child_prefix.push(running);
                    running += value;
                }
            }
            prefixes[level] = child_prefix;
        }

        prefixes.into_iter().next().unwrap_or_default()
    }
}

fn exclusive_prefix(values: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(values.len());
    let mut running = 0;
    for &value in values {
        out.push(running);
        running += value;
    }
    out
}

/// The GPU-backed technique. `occupancy_buffer_name` names the source
/// `Registry<Buffer>` entry (one `u32` per voxel, 0 or 1) this pass reads;
/// `first_index_buffer_name` names the per-voxel linked-list head buffer
/// scatter reads as `first_index` and which is reset to `MAX_U32` once the
/// compaction pass finishes (§4.4: "repurposed after compaction ... to
/// serve downstream passes as a per-position tag buffer"). Downstream
/// consumers subscribe to `prefix_sum_complete`.
pub struct PrefixSumTechnique {
    flags: TechniqueFlags,
    state: PrefixSumState,
    base_size: u32,
    levels: Vec<u32>,
    total_occupied: u32,
    complete: Signal<u32>,
    pools: SharedPools,
    occupancy_buffer_name: String,
    first_index_buffer_name: String,
    reduce_pipeline: Option<wgpu::ComputePipeline>,
    reduce_bind_group_layout: Option<wgpu::BindGroupLayout>,
    sweep_pipeline: Option<wgpu::ComputePipeline>,
    sweep_bind_group_layout: Option<wgpu::BindGroupLayout>,
    scatter_pipeline: Option<wgpu::ComputePipeline>,
    scatter_bind_group_layout: Option<wgpu::BindGroupLayout>,
}

impl PrefixSumTechnique {
    pub fn new(
        pools: SharedPools,
        occupancy_buffer_name: impl Into<String>,
        first_index_buffer_name: impl Into<String>,
        base_size: u32,
    ) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::PerFrame,
                compute_host_synchronize: true,
                ..TechniqueFlags::default()
            },
            state: PrefixSumState::Reduction { level: 0 },
            base_size,
            levels: level_sizes(base_size),
            total_occupied: 0,
            complete: Signal::new(),
            pools,
            occupancy_buffer_name: occupancy_buffer_name.into(),
            first_index_buffer_name: first_index_buffer_name.into(),
            reduce_pipeline: None,
            reduce_bind_group_layout: None,
            sweep_pipeline: None,
            sweep_bind_group_layout: None,
            scatter_pipeline: None,
            scatter_bind_group_layout: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(u32) + 'static) -> SignalToken<u32> {
        self.complete.connect(callback)
    }

    pub fn total_occupied(&self) -> u32 {
        self.total_occupied
    }

    /// Restart the state machine for a fresh voxelization (called when
    /// the upstream `voxelization_complete` signal fires).
    pub fn restart(&mut self, base_size: u32) {
        self.base_size = base_size;
        self.levels = level_sizes(base_size);
        self.state = PrefixSumState::Reduction { level: 0 };
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn level_buffer_name(level: usize) -> String {
        format!("prefix_sum_level_{level}")
    }

    /// The exclusive prefix computed for each level by the down-sweep,
    /// distinct from `level_buffer_name`'s reduction sums: the sweep reads
    /// the sums as `sweep_child_values` and writes the prefix here.
    fn prefix_buffer_name(level: usize) -> String {
        format!("prefix_sum_prefix_{level}")
    }

    fn allocate_level_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        for (level, &size) in self.levels.iter().enumerate() {
            for name in [Self::level_buffer_name(level), Self::prefix_buffer_name(level)] {
                if !pools.buffers.exists(&name) {
                    pools.buffers.build(&name, || {
                        Buffer::new(
                            context,
                            &name,
                            (size.max(1) as u64) * 4,
                            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                        )
                    });
                } else {
                    pools.buffers.resize(&name, |old| {
                        Buffer::recreate(context, old, (size.max(1) as u64) * 4, None)
                    });
                }
            }
        }
    }

    /// Resize `first_index_compacted`/`hashed_position_compacted`/
    /// `emitter_index_compacted` to `M = total_occupied` entries. Called
    /// once, at the start of `LAST_STEP`'s `record`, strictly before the
    /// scatter dispatch and therefore before `complete.emit(M)` in the
    /// following `post_command_submit` (§4.4, §8 invariant 1).
    fn allocate_compacted_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let size = (self.total_occupied.max(1) as u64) * 4;
        for name in ["first_index_compacted", "hashed_position_compacted", "emitter_index_compacted"] {
            if !pools.buffers.exists(name) {
                pools.buffers.build(name, || {
                    Buffer::new(
                        context,
                        name,
                        size,
                        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    )
                });
            } else {
                pools.buffers.resize(name, |old| Buffer::recreate(context, old, size, None));
            }
        }
    }

    fn dispatch_reduce(&self, context: &Context, encoder: &mut wgpu::CommandEncoder, level: usize) {
        let pools = self.pools.borrow();
        let input_name = if level == 0 {
            self.occupancy_buffer_name.clone()
        } else {
            Self::level_buffer_name(level - 1)
        };
        let output_name = Self::level_buffer_name(level);

        let Some(input) = pools.buffers.get(&input_name) else {
            log::warn!("prefix sum: missing reduce input {input_name:?}");
            return;
        };
        let Some(output) = pools.buffers.get(&output_name) else {
            log::warn!("prefix sum: missing reduce output {output_name:?}");
            return;
        };

        let Some(pipeline) = &self.reduce_pipeline else { return };
        let Some(layout) = &self.reduce_bind_group_layout else { return };

        let input_count = self.levels.get(level.wrapping_sub(1)).copied().unwrap_or(self.base_size);
        let output_count = self.levels[level];
        let sizes = LevelSizesUniform { input_count, output_count };

        let sizes_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prefix sum level sizes"),
            size: std::mem::size_of::<LevelSizesUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context.queue.write_buffer(&sizes_buffer, 0, bytemuck::bytes_of(&sizes));

        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prefix sum reduce"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: input.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: output.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: sizes_buffer.as_entire_binding() },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("prefix sum reduce"),
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(div_ceil(output_count.max(1), 64), 1, 1);
    }

    /// Down-sweep one level: `level`'s exclusive prefix is seeded from its
    /// parent's (`level + 1`) already-computed prefix and distributed
    /// across `level`'s own reduction sums (§4.4 SWEEPDOWN). The coarsest
    /// level has no parent; its trivial one-cell prefix is written by
    /// `write_top_level_prefix` instead of this dispatch.
    fn dispatch_sweep_down(&self, context: &Context, encoder: &mut wgpu::CommandEncoder, level: usize) {
        let pools = self.pools.borrow();
        let parent_name = Self::prefix_buffer_name(level + 1);
        let child_values_name = Self::level_buffer_name(level);
        let child_prefix_name = Self::prefix_buffer_name(level);

        let (Some(parent_prefix), Some(child_values), Some(child_prefix)) = (
            pools.buffers.get(&parent_name),
            pools.buffers.get(&child_values_name),
            pools.buffers.get(&child_prefix_name),
        ) else {
            log::warn!("prefix sum: missing sweep-down buffers for level {level}");
            return;
        };

        let Some(pipeline) = &self.sweep_pipeline else { return };
        let Some(layout) = &self.sweep_bind_group_layout else { return };

        let input_count = self.levels[level];
        let sizes = LevelSizesUniform { input_count, output_count: input_count };

        let sizes_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prefix sum sweep sizes"),
            size: std::mem::size_of::<LevelSizesUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context.queue.write_buffer(&sizes_buffer, 0, bytemuck::bytes_of(&sizes));

        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prefix sum sweep down"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: parent_prefix.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: child_values.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: child_prefix.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: sizes_buffer.as_entire_binding() },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("prefix sum sweep down"),
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(div_ceil(input_count.max(1), 64), 1, 1);
    }

    /// The coarsest level always has exactly one cell; its exclusive
    /// prefix is trivially zero, so there is nothing to sweep down into
    /// it from a parent that does not exist.
    fn write_top_level_prefix(&self, context: &Context) {
        let pools = self.pools.borrow();
        let top = self.levels.len() - 1;
        if let Some(buffer) = pools.buffers.get(&Self::prefix_buffer_name(top)) {
            buffer.set_content(context, bytemuck::bytes_of(&0u32));
        }
    }

    fn dispatch_scatter(&self, context: &Context, encoder: &mut wgpu::CommandEncoder) {
        self.allocate_compacted_buffers(context);

        let pools = self.pools.borrow();
        let (
            Some(occupied_bits),
            Some(exclusive_prefix),
            Some(first_index_compacted),
            Some(hashed_position_compacted),
            Some(first_index),
        ) = (
            pools.buffers.get(&self.occupancy_buffer_name),
            pools.buffers.get(&Self::prefix_buffer_name(0)),
            pools.buffers.get("first_index_compacted"),
            pools.buffers.get("hashed_position_compacted"),
            pools.buffers.get(&self.first_index_buffer_name),
        )
        else {
            log::warn!("prefix sum: missing scatter buffers");
            return;
        };

        let Some(pipeline) = &self.scatter_pipeline else { return };
        let Some(layout) = &self.scatter_bind_group_layout else { return };

        let sizes = LevelSizesUniform { input_count: self.base_size, output_count: self.total_occupied };
        let sizes_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prefix sum scatter sizes"),
            size: std::mem::size_of::<LevelSizesUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context.queue.write_buffer(&sizes_buffer, 0, bytemuck::bytes_of(&sizes));

        let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prefix sum scatter"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: occupied_bits.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: exclusive_prefix.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: first_index_compacted.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: hashed_position_compacted.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: first_index.handle.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: sizes_buffer.as_entire_binding() },
            ],
        });

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("prefix sum scatter"),
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(div_ceil(self.base_size.max(1), 64), 1, 1);
    }

    /// §4.4: "the `voxel_first_index` buffer is repurposed after
    /// compaction ... reset to `MAX_U32`". Runs after scatter's command
    /// buffer has been submitted (`compute_host_synchronize` guarantees
    /// `post_command_submit` only observes completed GPU work), so the
    /// reset cannot race the scatter dispatch reading the same buffer.
    fn reset_first_index_buffer(&self, context: &Context) {
        let pools = self.pools.borrow();
        if let Some(buffer) = pools.buffers.get(&self.first_index_buffer_name) {
            let reset = vec![0xFFu8; buffer.size as usize];
            buffer.set_content(context, &reset);
        }
    }
}

impl Technique for PrefixSumTechnique {
    fn name(&self) -> &'static str {
        "prefix_sum"
    }

    fn flags(&self) -> TechniqueFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TechniqueFlags) {
        self.flags = flags;
    }

    fn init(&mut self, context: &mut Context) {
        self.allocate_level_buffers(context);

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let reduce_bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prefix sum reduce"),
            entries: &[storage_entry(0, true), storage_entry(1, false), uniform_entry(2)],
        });
        let sweep_bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prefix sum sweep down"),
            entries: &[storage_entry(0, true), storage_entry(1, true), storage_entry(2, false), uniform_entry(3)],
        });
        let scatter_bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("prefix sum scatter"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, true),
                uniform_entry(5),
            ],
        });

        let module = context.create_shader_module(
            include_str!("../shaders/prefix_sum.wgsl"),
            "shaders/prefix_sum.wgsl",
            &[],
        );
        let shader = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("prefix sum"),
            source: wgpu::ShaderSource::Naga(std::borrow::Cow::Owned(module)),
        });

        let make_pipeline = |label: &str, layout: &wgpu::BindGroupLayout, entry_point: &str| {
            let pipeline_layout = context.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            context.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point,
            })
        };

        let reduce_pipeline = make_pipeline("prefix sum reduce", &reduce_bind_group_layout, "reduce");
        let sweep_pipeline = make_pipeline("prefix sum sweep down", &sweep_bind_group_layout, "sweep_down");
        let scatter_pipeline = make_pipeline("prefix sum scatter", &scatter_bind_group_layout, "scatter");

        self.reduce_bind_group_layout = Some(reduce_bind_group_layout);
        self.reduce_pipeline = Some(reduce_pipeline);
        self.sweep_bind_group_layout = Some(sweep_bind_group_layout);
        self.sweep_pipeline = Some(sweep_pipeline);
        self.scatter_bind_group_layout = Some(scatter_bind_group_layout);
        self.scatter_pipeline = Some(scatter_pipeline);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        self.allocate_level_buffers(context);

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("prefix sum") });

        match self.state {
            PrefixSumState::Reduction { level } => {
                log::debug!("prefix_sum recording reduction level {level}");
                self.dispatch_reduce(context, &mut encoder, level);
            }
            PrefixSumState::Sweepdown { level } => {
                log::debug!("prefix_sum recording sweep-down level {level}");
                let top = self.levels.len() - 1;
                if level == top {
                    self.write_top_level_prefix(context);
                } else {
                    self.dispatch_sweep_down(context, &mut encoder, level);
                }
            }
            PrefixSumState::LastStep => {
                log::debug!("prefix_sum recording scatter (M={})", self.total_occupied);
                self.dispatch_scatter(context, &mut encoder);
            }
            PrefixSumState::Finished => {}
        }

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Compute,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, context: &Context) {
        match self.state {
            PrefixSumState::Reduction { level } => {
                let next_level = level + 1;
                if next_level >= self.levels.len() || self.levels[level] <= 1 {
                    let name = Self::level_buffer_name(level);
                    let pools = self.pools.borrow();
                    if let Some(buffer) = pools.buffers.get(&name) {
                        let bytes = buffer.get_content(context);
                        self.total_occupied = bytes
                            .chunks_exact(4)
                            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
                            .sum();
                    }
                    drop(pools);
                    self.state = PrefixSumState::Sweepdown { level };
                } else {
                    self.state = PrefixSumState::Reduction { level: next_level };
                }
            }
            PrefixSumState::Sweepdown { level } => {
                if level == 0 {
                    self.state = PrefixSumState::LastStep;
                } else {
                    self.state = PrefixSumState::Sweepdown { level: level - 1 };
                }
            }
            PrefixSumState::LastStep => {
                self.reset_first_index_buffer(context);
                log::info!("prefix sum complete with M={}", self.total_occupied);
                self.complete.emit(self.total_occupied);
                self.state = PrefixSumState::Finished;
                self.flags.active = false;
                self.flags.needs_to_record = false;
            }
            PrefixSumState::Finished => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_sizes_shrinks_by_elements_per_thread() {
        let sizes = level_sizes(64 * 64 * 64);
        assert_eq!(sizes[0], 262144);
        assert_eq!(sizes[1], div_ceil(262144, ELEMENTS_PER_THREAD));
        assert!(sizes.len() <= MAX_LEVELS);
    }

    #[test]
    fn tiny_scene_collapses_to_single_cell() {
        // §8 scenario (f): elements_per_thread > N.
        let sizes = level_sizes(10);
        assert_eq!(sizes, vec![10, 1]);
    }

    #[test]
    fn cpu_reduction_total_matches_input_sum() {
        let occupancy: Vec<u32> = (0..300).map(|i| (i % 3 == 0) as u32).collect();
        let expected: u32 = occupancy.iter().sum();

        let reduction = CpuPrefixSum::reduce(&occupancy);
        assert_eq!(reduction.total(), expected);
    }

    #[test]
    fn sweep_down_produces_valid_exclusive_prefix() {
        let occupancy: Vec<u32> = (0..300).map(|i| (i % 4 == 0) as u32).collect();
        let reduction = CpuPrefixSum::reduce(&occupancy);
        let prefix = reduction.sweep_down();

        assert_eq!(prefix.len(), occupancy.len());

        let mut running = 0;
        for (i, &value) in occupancy.iter().enumerate() {
            assert_eq!(prefix[i], running, "prefix mismatch at {i}");
            running += value;
        }
        assert_eq!(running, reduction.total());
    }

    #[test]
    fn single_element_input_has_trivial_sweep() {
        let occupancy = vec![1u32];
        let reduction = CpuPrefixSum::reduce(&occupancy);
        assert_eq!(reduction.total(), 1);
        assert_eq!(reduction.sweep_down(), vec![0]);
    }
}
