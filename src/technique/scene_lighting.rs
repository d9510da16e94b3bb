//! Scene Lighting (§4.7): the final raster pass, re-shading the scene
//! using the filtered per-voxel irradiance (`light_bounce`'s output) as
//! an additive secondary light term on top of the scene's direct
//! shading. Armed by `light_bounce`'s completion signal.

use crate::context::Context;
use crate::resource::SharedPools;
use crate::signal::{Signal, SignalToken};
use crate::technique::{QueueKind, RecordedCommand, RecordPolicy, Technique, TechniqueFlags};

pub struct SceneLightingTechnique {
    flags: TechniqueFlags,
    pools: SharedPools,
    voxel_count: u32,
    complete: Signal<()>,
    bind_group_layout: Option<wgpu::BindGroupLayout>,
    render_pipeline: Option<wgpu::RenderPipeline>,
}

impl SceneLightingTechnique {
    pub fn new(pools: SharedPools) -> Self {
        Self {
            flags: TechniqueFlags {
                record_policy: RecordPolicy::PerFrame,
                ..TechniqueFlags::default()
            },
            pools,
            voxel_count: 0,
            complete: Signal::new(),
            bind_group_layout: None,
            render_pipeline: None,
        }
    }

    pub fn on_complete(&mut self, callback: impl FnMut(()) + 'static) -> SignalToken<()> {
        self.complete.connect(callback)
    }

    /// Called once `light_bounce` has completed this frame's irradiance
    /// pass (§4.7's dirty chain terminus).
    pub fn arm(&mut self, voxel_count: u32) {
        self.voxel_count = voxel_count;
        self.flags.active = true;
        self.flags.needs_to_record = true;
    }
}

impl Technique for SceneLightingTechnique {
    fn name(&self) -> &'static str {
        "scene_lighting"
    }

    fn flags(&self) -> TechniqueFlags {
        self.flags
    }

    fn set_flags(&mut self, flags: TechniqueFlags) {
        self.flags = flags;
    }

    fn init(&mut self, context: &mut Context) {
        let bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene lighting"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let pipeline_layout = context.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene lighting"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let module = context.create_shader_module(
            include_str!("../shaders/scene_lighting.wgsl"),
            "shaders/scene_lighting.wgsl",
            &[],
        );
        let shader = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("scene lighting"),
            source: wgpu::ShaderSource::Naga(std::borrow::Cow::Owned(module)),
        });

        let pipeline = context.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("scene lighting"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState { module: &shader, entry_point: "fullscreen_triangle", buffers: &[] },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "relight_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba16Float,
                    // Additive: the opaque shading pass this technique
                    // relights has already been written to the target by
                    // an earlier stage outside this pipeline.
                    blend: Some(wgpu::BlendState {
                        color: wgpu::BlendComponent {
                            src_factor: wgpu::BlendFactor::One,
                            dst_factor: wgpu::BlendFactor::One,
                            operation: wgpu::BlendOperation::Add,
                        },
                        alpha: wgpu::BlendComponent::REPLACE,
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
        });

        self.bind_group_layout = Some(bind_group_layout);
        self.render_pipeline = Some(pipeline);
    }

    fn prepare(&mut self, _context: &Context, _dt: f32) {}

    fn record(&mut self, context: &Context, current_image: u32) -> RecordedCommand {
        log::debug!("scene_lighting recording (image {current_image})");
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("scene lighting") });

        let pools = self.pools.borrow();
        let target_name = format!("frame_color_{current_image}");
        if let (Some(target), Some(irradiance), Some(pipeline), Some(bind_group_layout)) = (
            pools.textures.get(&target_name),
            pools.buffers.get("voxel_irradiance_a"),
            &self.render_pipeline,
            &self.bind_group_layout,
        ) {
            let bind_group = context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("scene lighting"),
                layout: bind_group_layout,
                entries: &[wgpu::BindGroupEntry { binding: 0, resource: irradiance.handle.as_entire_binding() }],
            });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("scene lighting"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: true },
                })],
                depth_stencil_attachment: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        RecordedCommand {
            command_buffer: encoder.finish(),
            queue_kind: QueueKind::Graphics,
            id: self.name(),
        }
    }

    fn post_command_submit(&mut self, _context: &Context) {
        self.flags.needs_to_record = false;
        log::info!("scene_lighting complete");
        self.complete.emit(());
    }
}

/// CPU reference for the additive secondary light term (§4.7 "as a
/// secondary light term"), exercised by tests in lieu of a GPU adapter.
pub fn apply_secondary_light(base: [f32; 3], irradiance: [f32; 3], weight: f32) -> [f32; 3] {
    [
        base[0] + irradiance[0] * weight,
        base[1] + irradiance[1] * weight,
        base[2] + irradiance[2] * weight,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_activates_recording() {
        let pools = crate::resource::new_shared_pools();
        let mut technique = SceneLightingTechnique::new(pools);
        technique.arm(4096);
        assert!(technique.flags().active);
    }

    #[test]
    fn secondary_light_is_purely_additive() {
        let base = [0.2, 0.2, 0.2];
        let irradiance = [0.5, 0.0, 1.0];
        let result = apply_secondary_light(base, irradiance, 1.0);
        assert_eq!(result, [0.7, 0.2, 1.2]);
    }

    #[test]
    fn zero_weight_leaves_base_untouched() {
        let base = [0.3, 0.4, 0.5];
        let result = apply_secondary_light(base, [9.0, 9.0, 9.0], 0.0);
        assert_eq!(result, base);
    }
}
