//! Light Bounce Voxel Irradiance (§4.7): for each visible voxel and each
//! of its six faces, gathers incoming irradiance from lit clusters and
//! from neighbor voxels, then runs two Gaussian filter passes over the
//! result. Armed by `visible_voxel`'s completion signal once lit-cluster
//! data is also available.

use crate::context::Context;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

/// Irradiance is stored as one `vec4<f32>` per voxel face; six faces per
/// voxel (§4.7 "each of six faces").
pub const FACES_PER_VOXEL: u64 = 6;
const BYTES_PER_FACE: u64 = 16;

pub struct LightBounceTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    voxel_count: u32,
    complete: Signal<u32>,
    gather: Option<ComputeTechniqueResources>,
    blur: Option<ComputeTechniqueResources>,
}

impl LightBounceTechnique {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::PerFrame,
                ..TechniqueFlags::default()
            },
            pools,
            voxel_count: 0,
            complete: Signal::new(),
            gather: None,
            blur: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(u32) + 'static) -> SignalToken<u32> {
        self.complete.connect(callback)
    }

    /// Called once `visible_voxel` and `lit_cluster` have both completed
    /// for this frame (§4.7's dirty chain).
    pub fn arm(&mut self, voxel_count: u32) {
        self.voxel_count = voxel_count;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn buffer_size(&self) -> u64 {
        self.voxel_count.max(1) as u64 * FACES_PER_VOXEL * BYTES_PER_FACE
    }

    fn allocate_buffers(&self, context: &Context) {
        let size = self.buffer_size();
        let mut pools = self.pools.borrow_mut();
        for name in ["voxel_irradiance_a", "voxel_irradiance_b"] {
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
}

impl Technique for LightBounceTechnique {
    fn name(&self) -> &'static str {
        "light_bounce"
    }

    fn flags(&self) -> TechniqueFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TechniqueFlags) {
        self.flags = flags;
    }

    fn init(&mut self, context: &mut Context) {
        let bindings = [
            BufferBindingSpec { binding: 0, read_only: true, uniform: false },
            BufferBindingSpec { binding: 1, read_only: false, uniform: false },
        ];
        self.gather = Some(build_compute_pipeline(
            context,
            "light_bounce_gather",
            include_str!("../shaders/light_bounce.wgsl"),
            "shaders/light_bounce.wgsl",
            "gather_irradiance",
            &bindings,
            None,
        ));
        self.blur = Some(build_compute_pipeline(
            context,
            "light_bounce_blur",
            include_str!("../shaders/light_bounce.wgsl"),
            "shaders/light_bounce.wgsl",
            "blur_face",
            &bindings,
            None,
        ));
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("light_bounce recording");
        self.allocate_buffers(context);

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("light bounce") });

        let pools = self.pools.borrow();
        let bindings = (
            pools.buffers.get("camera_visible_bits"),
            pools.buffers.get("voxel_irradiance_a"),
            pools.buffers.get("voxel_irradiance_b"),
        );

        if let (Some(visible_bits), Some(buffer_a), Some(buffer_b)) = bindings {
            // Gather pass: visible bits -> irradiance A.
            if let Some(gather) = &self.gather {
                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("light bounce gather"),
                    layout: &gather.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: visible_bits.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: buffer_a.handle.as_entire_binding() },
                    ],
                });
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("gather") });
                pass.set_pipeline(&gather.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(dispatch_count(self.voxel_count * FACES_PER_VOXEL as u32), 1, 1);
            }

            // Two Gaussian filter passes, ping-ponging A -> B -> A (§4.7
            // "two Gaussian filter passes smooth the result").
            if let Some(blur) = &self.blur {
                let passes = [(buffer_a, buffer_b), (buffer_b, buffer_a)];
                for (read_buffer, write_buffer) in passes {
                    let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("light bounce blur"),
                        layout: &blur.bind_group_layout,
                        entries: &[
                            wgpu::BindGroupEntry { binding: 0, resource: read_buffer.handle.as_entire_binding() },
                            wgpu::BindGroupEntry { binding: 1, resource: write_buffer.handle.as_entire_binding() },
                        ],
                    });
                    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label: Some("blur") });
                    pass.set_pipeline(&blur.pipeline);
                    pass.set_bind_group(0, &bind_group, &[]);
                    pass.dispatch_workgroups(dispatch_count(self.voxel_count * FACES_PER_VOXEL as u32), 1, 1);
                }
            }
        }
        drop(pools);

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Compute,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, _context: &Context) {
        // Two filter passes land the smoothed result back in
        // `voxel_irradiance_a` (§4.7's two-pass Gaussian filter).
        self.flags.needs_to_record = false;
        log::info!("light_bounce complete");
        self.complete.emit(self.voxel_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_activates_and_sizes_buffer() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = LightBounceTechnique::new(pools);
        technique.arm(1000);
        assert!(technique.flags().active);
        assert_eq!(technique.buffer_size(), 1000 * FACES_PER_VOXEL * BYTES_PER_FACE);
    }

    #[test]
    fn buffer_size_has_minimum_one_voxel() {
        let pools = crate::resource::new_shared_pools();
        let technique = LightBounceTechnique::new(pools);
        assert_eq!(technique.buffer_size(), FACES_PER_VOXEL * BYTES_PER_FACE);
    }
}
