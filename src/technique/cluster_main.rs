//! Clusterization Main (§4.6 step 2): a k-means-like loop assigning
//! compacted voxels to `K` superpixel cluster centers, iterated
//! `CLUSTERIZATION_NUM_ITERATION` times with the iteration index carried
//! as a push constant. Runs once the prepare step's completion signal
//! fires; emits its own completion signal after the final iteration.

use bytemuck::{Pod, Zeroable};

use crate::context::Context;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

pub const CLUSTERIZATION_NUM_ITERATION: u32 = 8;

/// `K ≈ (V³ / voxels_per_cluster)^(1/3)` (§4.6 step 2, literal formula).
pub fn target_cluster_count(side: u32, voxels_per_cluster: f32) -> u32 {
    let total_voxels = (side as f64).powi(3);
    ((total_voxels / voxels_per_cluster as f64).powf(1.0 / 3.0)).round().max(1.0) as u32
}

/// The local search window radius, in voxels, around each cluster center
/// (§4.6 step 2: `step = pow(V³/K, 1/3)`).
pub fn cluster_window_step(side: u32, cluster_count: u32) -> u32 {
    let total_voxels = (side as f64).powi(3);
    ((total_voxels / cluster_count.max(1) as f64).powf(1.0 / 3.0)).round().max(1.0) as u32
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct IterationPushConstants {
    iteration: u32,
    cluster_count: u32,
    window_step: u32,
    _pad: u32,
}

pub struct ClusterMainTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    side: u32,
    voxel_count: u32,
    cluster_count: u32,
    iteration: u32,
    complete: Signal<u32>,
    resources: Option<ComputeTechniqueResources>,
}

impl ClusterMainTechnique {
    pub fn new(pools: SharedPools, side: u32) -> Self {
        Self {
            flags: TechniqueFlags::default(),
            pools,
            side,
            voxel_count: 0,
            cluster_count: 0,
            iteration: 0,
            complete: Signal::new(),
            resources: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(u32) + 'static) -> SignalToken<u32> {
        self.complete.connect(callback)
    }

    pub fn arm(&mut self, voxel_count: u32, voxels_per_cluster: f32) {
        self.voxel_count = voxel_count;
        self.cluster_count = target_cluster_count(self.side, voxels_per_cluster);
        self.iteration = 0;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn allocate_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let clusters = self.cluster_count.max(1) as u64;

        for name in ["cluster_center_accum", "cluster_member_count"] {
            if !pools.buffers.exists(name) {
                pools.buffers.build(name, || {
                    Buffer::new(
                        context,
                        name,
                        clusters * 16,
                        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    )
                });
            } else {
                pools.buffers.resize(name, |old| Buffer::recreate(context, old, clusters * 16, None));
            }
        }

        let voxel_owner_size = self.voxel_count.max(1) as u64 * 4;
        if !pools.buffers.exists("voxel_cluster_owner") {
            pools.buffers.build("voxel_cluster_owner", || {
                Buffer::new(
                    context,
                    "voxel_cluster_owner",
                    voxel_owner_size,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        } else {
            pools.buffers.resize("voxel_cluster_owner", |old| {
                Buffer::recreate(context, old, voxel_owner_size, None)
            });
        }
    }
}

impl Technique for ClusterMainTechnique {
    fn name(&self) -> &'static str {
        "cluster_main"
    }

    fn flags(&self) -> TechniqueFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TechniqueFlags) {
        self.flags = flags;
    }

    fn init(&mut self, context: &mut Context) {
        let resources = build_compute_pipeline(
            context,
            "cluster_main",
            include_str!("../shaders/cluster_main.wgsl"),
            "shaders/cluster_main.wgsl",
            "cluster_main_assign",
            &[
                BufferBindingSpec { binding: 0, read_only: true, uniform: false },
                BufferBindingSpec { binding: 1, read_only: false, uniform: false },
                BufferBindingSpec { binding: 2, read_only: false, uniform: false },
                BufferBindingSpec { binding: 3, read_only: false, uniform: false },
            ],
            Some(std::mem::size_of::<IterationPushConstants>() as u32),
        );
        self.resources = Some(resources);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("cluster_main recording (iteration {})", self.iteration);
        if self.iteration == 0 {
            self.allocate_buffers(context);
        }

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("cluster main") });

        if let Some(resources) = &self.resources {
            let pools = self.pools.borrow();
            if let (Some(hashed), Some(owner), Some(centers), Some(counts)) = (
                pools.buffers.get("hashed_position_compacted"),
                pools.buffers.get("voxel_cluster_owner"),
                pools.buffers.get("cluster_center_accum"),
                pools.buffers.get("cluster_member_count"),
            ) {
                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("cluster main"),
                    layout: &resources.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: hashed.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: owner.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: centers.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 3, resource: counts.handle.as_entire_binding() },
                    ],
                });

                let push_constants = IterationPushConstants {
                    iteration: self.iteration,
                    cluster_count: self.cluster_count,
                    window_step: cluster_window_step(self.side, self.cluster_count),
                    _pad: 0,
                };

                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("cluster main"),
                });
                pass.set_pipeline(&resources.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.set_push_constants(0, bytemuck::bytes_of(&push_constants));
                pass.dispatch_workgroups(dispatch_count(self.voxel_count), 1, 1);
            }
        }

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Compute,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, _context: &Context) {
        self.iteration += 1;
        if self.iteration >= CLUSTERIZATION_NUM_ITERATION {
            self.flags.active = false;
            self.flags.needs_to_record = false;
            log::info!("cluster_main complete with {} clusters", self.cluster_count);
            self.complete.emit(self.cluster_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_cluster_count_shrinks_with_larger_groups() {
        let fine = target_cluster_count(128, 64.0);
        let coarse = target_cluster_count(128, 512.0);
        assert!(coarse < fine);
    }

    #[test]
    fn window_step_is_never_zero() {
        assert!(cluster_window_step(128, 1_000_000) >= 1);
        assert!(cluster_window_step(64, 0) >= 1);
    }

    #[test]
    fn arming_resets_iteration_counter() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = ClusterMainTechnique::new(pools, 128);
        technique.iteration = 5;
        technique.arm(4096, 64.0);
        assert_eq!(technique.iteration, 0);
        assert!(technique.flags().active);
    }
}
