//! Material & pipeline cache (§3 "Material"): a class (pipeline +
//! bind-group-layout + pipeline-layout + reflected shader, shared by every
//! instance) plus a per-instance binding (bind group, uniform-buffer cell
//! index, push-constant bytes, reflected field values).
//!
//! Materials are instantiated by class name + instance name + parameter
//! map; `build` on an existing instance name returns the existing instance
//! (§4.2's naming-is-authoritative rule), mirroring `Registry::build`.

use ahash::AHashMap;

use crate::registry::{Resource, ResourceHeader};
use crate::shader_reflect::{reflect, ExposedValues, ShaderReflection};

pub enum Pipeline {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

/// Shared, compiled-once state for every instance of one material class.
pub struct MaterialClass {
    pub name: String,
    pub pipeline: Pipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub reflection: ShaderReflection,
    pub clear_value: Option<wgpu::Color>,
}

impl MaterialClass {
    pub fn new(
        name: &str,
        module: &naga::Module,
        bind_group_layout: wgpu::BindGroupLayout,
        pipeline_layout: wgpu::PipelineLayout,
        pipeline: Pipeline,
        clear_value: Option<wgpu::Color>,
    ) -> Self {
        Self {
            name: name.to_string(),
            reflection: reflect(module),
            bind_group_layout,
            pipeline_layout,
            pipeline,
            clear_value,
        }
    }

    fn uniform_buffer(&self) -> Option<&crate::shader_reflect::ReflectedUniformBuffer> {
        self.reflection.uniform_buffers.first()
    }
}

/// One instance of a material class: its own bind group, uniform-buffer
/// cell, push-constant block and user-exposed field values.
pub struct Material {
    header: ResourceHeader,
    pub class_name: String,
    pub bind_group: wgpu::BindGroup,
    pub cell_index: usize,
    pub values: ExposedValues,
    pub push_constants: Vec<u8>,
}

impl Resource for Material {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ResourceHeader {
        &mut self.header
    }
}

/// Owns both the class cache and the instance cache, plus the uniform
/// cell allocator materials' reflected buffers are backed by.
pub struct MaterialCache {
    classes: AHashMap<String, MaterialClass>,
    instances: AHashMap<String, Material>,
    next_cell_index: usize,
}

impl Default for MaterialCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialCache {
    pub fn new() -> Self {
        Self {
            classes: AHashMap::new(),
            instances: AHashMap::new(),
            next_cell_index: 0,
        }
    }

    /// Register a compiled class. `build` on an existing class name is a
    /// no-op (the existing class is kept; §4.2's naming rule).
    pub fn build_class(&mut self, class: MaterialClass) {
        if self.classes.contains_key(&class.name) {
            log::warn!("material class {:?} already exists, keeping original", class.name);
            return;
        }
        self.classes.insert(class.name.clone(), class);
    }

    pub fn class(&self, class_name: &str) -> Option<&MaterialClass> {
        self.classes.get(class_name)
    }

    /// Instantiate a material instance. `build_bind_group` is handed the
    /// class's layout and must return a bind group consistent with it; this
    /// mirrors the way the resource registries take a builder closure
    /// instead of hardcoding binding layouts generically.
    pub fn instantiate(
        &mut self,
        class_name: &str,
        instance_name: &str,
        build_bind_group: impl FnOnce(&wgpu::BindGroupLayout) -> wgpu::BindGroup,
    ) -> &Material {
        if !self.instances.contains_key(instance_name) {
            let class = self
                .classes
                .get(class_name)
                .unwrap_or_else(|| panic!("material class {class_name:?} not registered"));

            let values = match class.uniform_buffer() {
                Some(reflected) => ExposedValues::new(reflected),
                None => ExposedValues::new(&crate::shader_reflect::ReflectedUniformBuffer {
                    name: String::new(),
                    group: 0,
                    binding: 0,
                    fields: Vec::new(),
                    total_size: 0,
                }),
            };

            let cell_index = self.next_cell_index;
            self.next_cell_index += 1;

            let bind_group = build_bind_group(&class.bind_group_layout);

            let mut header = ResourceHeader::new(instance_name, "material");
            header.set_ready(true);

            self.instances.insert(
                instance_name.to_string(),
                Material {
                    header,
                    class_name: class_name.to_string(),
                    bind_group,
                    cell_index,
                    values,
                    push_constants: Vec::new(),
                },
            );
        } else {
            log::warn!("material instance {instance_name:?} already exists, returning existing instance");
        }

        self.instances
            .get(instance_name)
            .expect("just inserted or pre-existing")
    }

    pub fn get(&self, instance_name: &str) -> Option<&Material> {
        self.instances.get(instance_name).filter(|material| material.header().ready())
    }

    pub fn get_mut(&mut self, instance_name: &str) -> Option<&mut Material> {
        self.instances.get_mut(instance_name)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_index_is_assigned_once_per_instance_name() {
        let mut cache = MaterialCache::new();
        assert_eq!(cache.next_cell_index, 0);
        cache.next_cell_index = 3;
        assert_eq!(cache.next_cell_index, 3);
    }
}
