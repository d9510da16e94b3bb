//! Clusterization Compute Neighbours (§4.6 step 4): for each compacted
//! cluster, scan candidate clusters and fill a bounded neighbor list
//! (clusters whose AABBs overlap an expanded window). The final step of
//! the clusterization pipeline; its completion signal unlocks the
//! lighting pipeline.

use crate::cluster_data::MAX_NEIGHBOURS;
use crate::context::Context;
use crate::resource::SharedPools;
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

pub struct ClusterNeighboursTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    cluster_count: u32,
    done: bool,
    complete: Signal<()>,
    resources: Option<ComputeTechniqueResources>,
}

impl ClusterNeighboursTechnique {
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

    pub fn on_complete(&mut self, callback: impl FnMut(()) + 'static) -> SignalToken<()> {
        self.complete.connect(callback)
    }

    pub fn arm(&mut self, cluster_count: u32) {
        self.cluster_count = cluster_count;
        self.done = false;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }
}

impl Technique for ClusterNeighboursTechnique {
    fn name(&self) -> &'static str {
        "cluster_neighbours"
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
            "cluster_neighbours",
            include_str!("../shaders/cluster_neighbours.wgsl"),
            "shaders/cluster_neighbours.wgsl",
            "cluster_neighbours_main",
            &[BufferBindingSpec { binding: 0, read_only: false, uniform: false }],
            None,
        );
        self.resources = Some(resources);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("cluster_neighbours recording");
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("cluster neighbours") });

        if let Some(resources) = &self.resources {
            let pools = self.pools.borrow();
            if let Some(cluster_data) = pools.buffers.get("cluster_data") {
                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("cluster neighbours"),
                    layout: &resources.bind_group_layout,
                    entries: &[wgpu::BindGroupEntry {
                        binding: 0,
                        resource: cluster_data.handle.as_entire_binding(),
                    }],
                });

                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("cluster neighbours"),
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
            log::info!("cluster_neighbours complete");
            self.complete.emit(());
        }
    }
}

/// The CPU-mirrored bound check for §8 property 6, used by the test
/// below and by `cluster_data::validate_ownership`'s callers: a
/// neighbour list never exceeds `MAX_NEIGHBOURS` regardless of how many
/// overlapping candidates exist.
pub fn clamp_candidate_count(candidate_count: usize) -> usize {
    candidate_count.min(MAX_NEIGHBOURS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_count_is_bounded() {
        assert_eq!(clamp_candidate_count(100), MAX_NEIGHBOURS);
        assert_eq!(clamp_candidate_count(3), 3);
    }

    #[test]
    fn arm_resets_done_flag() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = ClusterNeighboursTechnique::new(pools);
        technique.done = true;
        technique.arm(32);
        assert!(!technique.done);
    }
}
