//! Lit Cluster Technique (§4.7): three chained compute passes recorded in
//! one command buffer — reset cluster irradiance, test each voxel against
//! the emitter's shadow map and direction, then process results to stamp
//! clusters as lit. Maintains atomic lit/to-rasterize cluster counters.

use crate::context::Context;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LitClusterCounts {
    pub lit: u32,
    pub to_rasterize: u32,
}

pub struct LitClusterTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    cluster_count: u32,
    voxel_count: u32,
    counts: LitClusterCounts,
    complete: Signal<LitClusterCounts>,
    reset: Option<ComputeTechniqueResources>,
    test: Option<ComputeTechniqueResources>,
    stamp: Option<ComputeTechniqueResources>,
}

impl LitClusterTechnique {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::PerFrame,
                compute_host_synchronize: true,
                ..TechniqueFlags::default()
            },
            pools,
            cluster_count: 0,
            voxel_count: 0,
            counts: LitClusterCounts { lit: 0, to_rasterize: 0 },
            complete: Signal::new(),
            reset: None,
            test: None,
            stamp: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(LitClusterCounts) + 'static) -> SignalToken<LitClusterCounts> {
        self.complete.connect(callback)
    }

    pub fn counts(&self) -> LitClusterCounts {
        self.counts
    }

    /// Called when the camera-dirty + shadow-map-dirty chain re-arms this
    /// stage (§4.7 "Triggering rules").
    pub fn arm(&mut self, cluster_count: u32, voxel_count: u32) {
        self.cluster_count = cluster_count;
        self.voxel_count = voxel_count;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn allocate_counters(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        for name in ["lit_cluster_counter", "to_rasterize_cluster_counter"] {
            if !pools.buffers.exists(name) {
                pools.buffers.build(name, || {
                    Buffer::new(
                        context,
                        name,
                        4,
                        wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                    )
                });
            }
        }
        if !pools.buffers.exists("cluster_irradiance") {
            let size = self.cluster_count.max(1) as u64 * 16;
            pools.buffers.build("cluster_irradiance", || {
                Buffer::new(
                    context,
                    "cluster_irradiance",
                    size,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        } else {
            let size = self.cluster_count.max(1) as u64 * 16;
            pools.buffers.resize("cluster_irradiance", |old| Buffer::recreate(context, old, size, None));
        }
    }
}

impl Technique for LitClusterTechnique {
    fn name(&self) -> &'static str {
        "lit_cluster"
    }

    fn flags(&self) -> TechniqueFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TechniqueFlags) {
        self.flags = flags;
    }

    fn init(&mut self, context: &mut Context) {
        self.reset = Some(build_compute_pipeline(
            context,
            "lit_cluster_reset",
            include_str!("../shaders/lit_cluster.wgsl"),
            "shaders/lit_cluster.wgsl",
            "reset_cluster_irradiance",
            &[
                BufferBindingSpec { binding: 0, read_only: false, uniform: false },
                BufferBindingSpec { binding: 1, read_only: false, uniform: false },
                BufferBindingSpec { binding: 2, read_only: false, uniform: false },
            ],
            None,
        ));
        self.test = Some(build_compute_pipeline(
            context,
            "lit_cluster_test",
            include_str!("../shaders/lit_cluster.wgsl"),
            "shaders/lit_cluster.wgsl",
            "test_voxel_lit",
            &[
                BufferBindingSpec { binding: 0, read_only: false, uniform: false },
                BufferBindingSpec { binding: 1, read_only: false, uniform: false },
                BufferBindingSpec { binding: 2, read_only: false, uniform: false },
            ],
            None,
        ));
        self.stamp = Some(build_compute_pipeline(
            context,
            "lit_cluster_stamp",
            include_str!("../shaders/lit_cluster.wgsl"),
            "shaders/lit_cluster.wgsl",
            "stamp_lit_clusters",
            &[
                BufferBindingSpec { binding: 0, read_only: false, uniform: false },
                BufferBindingSpec { binding: 1, read_only: false, uniform: false },
                BufferBindingSpec { binding: 2, read_only: false, uniform: false },
            ],
            None,
        ));
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("lit_cluster recording");
        self.allocate_counters(context);

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("lit cluster") });

        let pools = self.pools.borrow();
        let bindings = (
            pools.buffers.get("cluster_irradiance"),
            pools.buffers.get("lit_cluster_counter"),
            pools.buffers.get("to_rasterize_cluster_counter"),
        );

        if let (Some(irradiance), Some(lit_counter), Some(rasterize_counter)) = bindings {
            for (resources, dispatch_n, label) in [
                (&self.reset, self.cluster_count, "reset"),
                (&self.test, self.voxel_count, "test"),
                (&self.stamp, self.cluster_count, "stamp"),
            ] {
                let Some(resources) = resources else { continue };
                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout: &resources.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: irradiance.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: lit_counter.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: rasterize_counter.handle.as_entire_binding() },
                    ],
                });
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some(label) });
                pass.set_pipeline(&resources.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(dispatch_count(dispatch_n), 1, 1);
            }
        }
        drop(pools);

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Compute,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, context: &Context) {
        let pools = self.pools.borrow();
        if let Some(buffer) = pools.buffers.get("lit_cluster_counter") {
            self.counts.lit = u32::from_le_bytes(buffer.get_content(context)[..4].try_into().unwrap());
        }
        if let Some(buffer) = pools.buffers.get("to_rasterize_cluster_counter") {
            self.counts.to_rasterize = u32::from_le_bytes(buffer.get_content(context)[..4].try_into().unwrap());
        }
        drop(pools);

        self.flags.needs_to_record = false;
        log::info!("lit_cluster complete: lit={} to_rasterize={}", self.counts.lit, self.counts.to_rasterize);
        self.complete.emit(self.counts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_activates_recording() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = LitClusterTechnique::new(pools);
        technique.arm(64, 4096);
        assert!(technique.flags().active);
        assert_eq!(technique.voxel_count, 4096);
    }
}
