//! Shared helpers for the single-dispatch compute techniques in the
//! clusterization (§4.6) and lighting (§4.7) pipelines: every one of them
//! builds a bind-group layout of plain storage/uniform buffers, one
//! compute pipeline from a WGSL entry point, and dispatches
//! `ceil(n / WORKGROUP_SIZE)` workgroups. Factored out once the third
//! technique (`cluster_prepare.rs`) needed the identical boilerplate
//! `prefix_sum.rs`/`voxelize.rs` already had inline.

use crate::context::Context;
use crate::util::div_ceil;

pub const WORKGROUP_SIZE: u32 = 64;

pub fn dispatch_count(n: u32) -> u32 {
    div_ceil(n.max(1), WORKGROUP_SIZE)
}

/// Builds a compute pipeline from a WGSL source string, one entry point,
/// and a list of buffer bindings (all given `ShaderStages::COMPUTE`
/// visibility, matching every consumer's usage).
pub struct ComputeTechniqueResources {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline: wgpu::ComputePipeline,
}

pub struct BufferBindingSpec {
    pub binding: u32,
    pub read_only: bool,
    pub uniform: bool,
}

pub fn build_compute_pipeline(
    context: &mut Context,
    label: &str,
    source: &str,
    path: &str,
    entry_point: &str,
    bindings: &[BufferBindingSpec],
    push_constant_size: Option<u32>,
) -> ComputeTechniqueResources {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = bindings
        .iter()
        .map(|spec| wgpu::BindGroupLayoutEntry {
            binding: spec.binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: if spec.uniform {
                    wgpu::BufferBindingType::Uniform
                } else {
                    wgpu::BufferBindingType::Storage { read_only: spec.read_only }
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();

    let bind_group_layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    });

    let push_constant_ranges: Vec<wgpu::PushConstantRange> = push_constant_size
        .map(|size| {
            vec![wgpu::PushConstantRange {
                stages: wgpu::ShaderStages::COMPUTE,
                range: 0..size,
            }]
        })
        .unwrap_or_default();

    let pipeline_layout = context.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &push_constant_ranges,
    });

    let module = context.create_shader_module(source, path, &[]);
    let shader = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Naga(std::borrow::Cow::Owned(module)),
    });

    let pipeline = context.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &shader,
        entry_point,
    });

    ComputeTechniqueResources { bind_group_layout, pipeline }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_count_rounds_up() {
        assert_eq!(dispatch_count(1), 1);
        assert_eq!(dispatch_count(64), 1);
        assert_eq!(dispatch_count(65), 2);
        assert_eq!(dispatch_count(0), 1);
    }
}
