//! Clusterization Build Final Buffer (§4.6 step 3): reduces the k-means
//! accumulators into one `ClusterData` per cluster (AABB, center, voxel
//! count, main direction). One-shot, guarded by `cluster_main`'s
//! completion signal.

use crate::context::Context;
use crate::cluster_data::ClusterData;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

pub struct ClusterBuildTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    cluster_count: u32,
    done: bool,
    complete: Signal<u32>,
    resources: Option<ComputeTechniqueResources>,
}

impl ClusterBuildTechnique {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::SingleTime,
                ..TechniqueFlags::default()
            },
            pools,
            cluster_count: 0,
            done: false,
            complete: Signal::new(),
            resources: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(u32) + 'static) -> SignalToken<u32> {
        self.complete.connect(callback)
    }

    pub fn arm(&mut self, cluster_count: u32) {
        self.cluster_count = cluster_count;
        self.done = false;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn allocate_buffer(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let size = self.cluster_count.max(1) as u64 * std::mem::size_of::<ClusterData>() as u64;

        if !pools.buffers.exists("cluster_data") {
            pools.buffers.build("cluster_data", || {
                Buffer::new(
                    context,
                    "cluster_data",
                    size,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        } else {
            pools.buffers.resize("cluster_data", |old| Buffer::recreate(context, old, size, None));
        }
    }
}

impl Technique for ClusterBuildTechnique {
    fn name(&self) -> &'static str {
        "cluster_build"
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
            "cluster_build",
            include_str!("../shaders/cluster_build.wgsl"),
            "shaders/cluster_build.wgsl",
            "cluster_build_main",
            &[
                BufferBindingSpec { binding: 0, read_only: true, uniform: false },
                BufferBindingSpec { binding: 1, read_only: true, uniform: false },
                BufferBindingSpec { binding: 2, read_only: false, uniform: false },
            ],
            None,
        );
        self.resources = Some(resources);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("cluster_build recording");
        self.allocate_buffer(context);

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("cluster build") });

        if let Some(resources) = &self.resources {
            let pools = self.pools.borrow();
            if let (Some(centers), Some(counts), Some(output)) = (
                pools.buffers.get("cluster_center_accum"),
                pools.buffers.get("cluster_member_count"),
                pools.buffers.get("cluster_data"),
            ) {
                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("cluster build"),
                    layout: &resources.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: centers.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: counts.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: output.handle.as_entire_binding() },
                    ],
                });

                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("cluster build"),
                });
                pass.set_pipeline(&resources.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(dispatch_count(self.cluster_count), 1, 1);
            }
        }

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Compute,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, _context: &Context) {
        if !self.done {
            self.done = true;
            self.flags.active = false;
            self.flags.needs_to_record = false;
            log::info!("cluster_build complete");
            self.complete.emit(self.cluster_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_resets_done_flag() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = ClusterBuildTechnique::new(pools);
        technique.done = true;
        technique.arm(16);
        assert!(!technique.done);
        assert_eq!(technique.cluster_count, 16);
    }
}
