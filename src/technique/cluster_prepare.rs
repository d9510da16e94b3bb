//! Clusterization Prepare (§4.6 step 1): per compacted voxel, compute a
//! mean curvature estimate and a mean normal from its neighbourhood.
//! Compute-only, runs once per voxelization (guarded by the prefix-sum
//! engine's completion signal carrying the compacted voxel count).

use crate::context::Context;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

pub struct ClusterPrepareTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    voxel_count: u32,
    done: bool,
    complete: Signal<()>,
    resources: Option<ComputeTechniqueResources>,
}

impl ClusterPrepareTechnique {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::SingleTime,
                ..TechniqueFlags::default()
            },
            pools,
            voxel_count: 0,
            done: false,
            complete: Signal::new(),
            resources: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(()) + 'static) -> SignalToken<()> {
        self.complete.connect(callback)
    }

    /// Called when `prefix_sum`'s completion signal fires with the
    /// compacted voxel count.
    pub fn arm(&mut self, voxel_count: u32) {
        self.voxel_count = voxel_count;
        self.done = false;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn allocate_buffers(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let count = self.voxel_count.max(1) as u64;

        for name in ["voxel_normal_estimate", "voxel_curvature_estimate"] {
            if !pools.buffers.exists(name) {
                pools.buffers.build(name, || {
                    Buffer::new(
                        context,
                        name,
                        count * 16,
                        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    )
                });
            } else {
                pools.buffers.resize(name, |old| Buffer::recreate(context, old, count * 16, None));
            }
        }
    }
}

impl Technique for ClusterPrepareTechnique {
    fn name(&self) -> &'static str {
        "cluster_prepare"
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
            "cluster_prepare",
            include_str!("../shaders/cluster_prepare.wgsl"),
            "shaders/cluster_prepare.wgsl",
            "cluster_prepare_main",
            &[
                BufferBindingSpec { binding: 0, read_only: true, uniform: false },
                BufferBindingSpec { binding: 1, read_only: false, uniform: false },
                BufferBindingSpec { binding: 2, read_only: false, uniform: false },
            ],
            None,
        );
        self.resources = Some(resources);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("cluster_prepare recording");
        self.allocate_buffers(context);

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("cluster prepare") });

        if let Some(resources) = &self.resources {
            let pools = self.pools.borrow();
            if let (Some(hashed), Some(normals), Some(curvature)) = (
                pools.buffers.get("hashed_position_compacted"),
                pools.buffers.get("voxel_normal_estimate"),
                pools.buffers.get("voxel_curvature_estimate"),
            ) {
                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("cluster prepare"),
                    layout: &resources.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: hashed.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: normals.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: curvature.handle.as_entire_binding() },
                    ],
                });

                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("cluster prepare"),
                });
                pass.set_pipeline(&resources.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
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
        if !self.done {
            self.done = true;
            self.flags.active = false;
            self.flags.needs_to_record = false;
            log::info!("cluster_prepare complete");
            self.complete.emit(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_re_enables_recording() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = ClusterPrepareTechnique::new(pools);
        assert!(!technique.flags().active);
        technique.arm(1024);
        assert!(technique.flags().active);
        assert!(technique.flags().needs_to_record);
        assert_eq!(technique.voxel_count, 1024);
    }
}
