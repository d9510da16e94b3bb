//! Camera-Visible Voxel Technique (§4.7): computes which compacted voxels
//! fall inside the main camera's frustum, writing one occupancy bit per
//! compacted voxel. The result is compacted by a second instance of the
//! prefix-sum engine (wired externally, since `PrefixSumTechnique` is
//! generic over which named buffer it reduces).

use bytemuck::{Pod, Zeroable};

use crate::camera::Frustrum;
use crate::context::Context;
use crate::resource::{Buffer, SharedPools};
use crate::signal::{Signal, SignalToken};
use crate::technique::compute_common::{build_compute_pipeline, dispatch_count, BufferBindingSpec, ComputeTechniqueResources};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};
use crate::util::div_ceil;

pub const CAMERA_VISIBLE_BITS_BUFFER: &str = "camera_visible_bits";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrustumUniform {
    planes: [[f32; 4]; 6],
    aabb_min: [f32; 3],
    side: u32,
    aabb_max: [f32; 3],
    _pad: u32,
}

pub struct VisibleVoxelTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    voxel_count: u32,
    side: u32,
    aabb_min: glam::Vec3,
    aabb_max: glam::Vec3,
    frustum: [glam::Vec4; 6],
    complete: Signal<u32>,
    resources: Option<ComputeTechniqueResources>,
}

impl VisibleVoxelTechnique {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::PerFrame,
                ..TechniqueFlags::default()
            },
            pools,
            voxel_count: 0,
            side: 0,
            aabb_min: glam::Vec3::ZERO,
            aabb_max: glam::Vec3::ZERO,
            frustum: [glam::Vec4::ZERO; 6],
            complete: Signal::new(),
            resources: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(u32) + 'static) -> SignalToken<u32> {
        self.complete.connect(callback)
    }

    /// Called when the camera becomes dirty (§4.7 "Camera-dirty ... →
    /// camera-visible").
    pub fn arm(&mut self, voxel_count: u32, side: u32, aabb_min: glam::Vec3, aabb_max: glam::Vec3, frustum: &Frustrum) {
        self.voxel_count = voxel_count;
        self.side = side;
        self.aabb_min = aabb_min;
        self.aabb_max = aabb_max;
        self.frustum = frustum.planes();
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }

    fn allocate_buffer(&self, context: &Context) {
        let mut pools = self.pools.borrow_mut();
        let words = div_ceil(self.voxel_count.max(1), 32) as u64;
        if !pools.buffers.exists(CAMERA_VISIBLE_BITS_BUFFER) {
            pools.buffers.build(CAMERA_VISIBLE_BITS_BUFFER, || {
                Buffer::new(
                    context,
                    CAMERA_VISIBLE_BITS_BUFFER,
                    words * 4,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                )
            });
        } else {
            pools.buffers.resize(CAMERA_VISIBLE_BITS_BUFFER, |old| Buffer::recreate(context, old, words * 4, None));
        }
    }
}

impl Technique for VisibleVoxelTechnique {
    fn name(&self) -> &'static str {
        "visible_voxel"
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
            "visible_voxel",
            include_str!("../shaders/visible_voxel.wgsl"),
            "shaders/visible_voxel.wgsl",
            "visible_voxel_main",
            &[
                BufferBindingSpec { binding: 0, read_only: true, uniform: false },
                BufferBindingSpec { binding: 1, read_only: false, uniform: false },
                BufferBindingSpec { binding: 2, read_only: true, uniform: true },
            ],
            None,
        );
        self.resources = Some(resources);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, _current_image: u32) -> RecordedCommand {
        log::debug!("visible_voxel recording");
        self.allocate_buffer(context);

        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("visible voxel") });

        if let Some(resources) = &self.resources {
            let pools = self.pools.borrow();
            if let (Some(hashed), Some(visible_bits)) = (
                pools.buffers.get("hashed_position_compacted"),
                pools.buffers.get(CAMERA_VISIBLE_BITS_BUFFER),
            ) {
                let uniform = FrustumUniform {
                    planes: self.frustum.map(|plane| plane.to_array()),
                    aabb_min: self.aabb_min.to_array(),
                    side: self.side,
                    aabb_max: self.aabb_max.to_array(),
                    _pad: 0,
                };
                let frustum_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("visible voxel frustum"),
                    size: std::mem::size_of::<FrustumUniform>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                context.queue.write_buffer(&frustum_buffer, 0, bytemuck::bytes_of(&uniform));

                let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("visible voxel"),
                    layout: &resources.bind_group_layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: hashed.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: visible_bits.handle.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: frustum_buffer.as_entire_binding() },
                    ],
                });

                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("visible voxel"),
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
        self.flags.needs_to_record = false;
        log::info!("visible_voxel complete");
        self.complete.emit(self.voxel_count);
    }
}

/// A CPU reference for the frustum test, used by tests in lieu of a GPU
/// adapter: a point is visible iff it is on the inner side of all six
/// planes (§8, mirrors `Frustrum`'s own plane convention).
pub fn cpu_is_visible(point: glam::Vec3, planes: &[glam::Vec4; 6]) -> bool {
    planes.iter().all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn arm_resets_frustum_and_activates() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = VisibleVoxelTechnique::new(pools);
        let camera = crate::camera::Camera::new(crate::camera::CameraKind::FirstPerson, 1.0);
        technique.arm(4096, 16, Vec3::ZERO, Vec3::splat(16.0), &camera.frustrum());
        assert!(technique.flags().active);
    }

    #[test]
    fn point_at_origin_is_visible_in_identity_frustum() {
        let planes = [glam::Vec4::new(1.0, 0.0, 0.0, 10.0); 6];
        assert!(cpu_is_visible(Vec3::ZERO, &planes));
    }

    #[test]
    fn point_outside_all_planes_is_not_visible() {
        let planes = [glam::Vec4::new(1.0, 0.0, 0.0, -10.0); 6];
        assert!(!cpu_is_visible(Vec3::ZERO, &planes));
    }
}
