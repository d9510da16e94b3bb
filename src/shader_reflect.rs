//! Shader reflection (§4.3): extract samplers, storage textures, uniform
//! buffers (as a struct plus field list), push constants and storage
//! buffers from a compiled shader's `naga::Module`, and track per-field
//! CPU values with a dirty bit so `Material::upload` only writes what
//! changed.

use std::collections::HashMap;

use ahash::AHashMap;
use naga::{AddressSpace, TypeInner};

use crate::hash_key::hash_key;
use crate::resource::UniformCellAllocator;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    F32,
    I32,
    U32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl FieldType {
    pub fn size(self) -> u32 {
        match self {
            FieldType::F32 | FieldType::I32 | FieldType::U32 => 4,
            FieldType::Vec2 => 8,
            FieldType::Vec3 => 12,
            FieldType::Vec4 => 16,
            FieldType::Mat4 => 64,
        }
    }

    fn from_naga(inner: &TypeInner) -> Option<Self> {
        use naga::{ScalarKind, VectorSize};

        match inner {
            TypeInner::Scalar { kind: ScalarKind::Float, .. } => Some(FieldType::F32),
            TypeInner::Scalar { kind: ScalarKind::Sint, .. } => Some(FieldType::I32),
            TypeInner::Scalar { kind: ScalarKind::Uint, .. } => Some(FieldType::U32),
            TypeInner::Vector { size: VectorSize::Bi, .. } => Some(FieldType::Vec2),
            TypeInner::Vector { size: VectorSize::Tri, .. } => Some(FieldType::Vec3),
            TypeInner::Vector { size: VectorSize::Quad, .. } => Some(FieldType::Vec4),
            TypeInner::Matrix { columns: VectorSize::Quad, rows: VectorSize::Quad, .. } => {
                Some(FieldType::Mat4)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExposedStructField {
    pub name: String,
    pub ty: FieldType,
    pub offset: u32,
}

#[derive(Debug, Clone)]
pub struct ReflectedUniformBuffer {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub fields: Vec<ExposedStructField>,
    pub total_size: u32,
}

#[derive(Debug, Clone)]
pub struct ReflectedBinding {
    pub name: String,
    pub group: u32,
    pub binding: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    pub uniform_buffers: Vec<ReflectedUniformBuffer>,
    pub samplers: Vec<ReflectedBinding>,
    pub storage_textures: Vec<ReflectedBinding>,
    pub storage_buffers: Vec<ReflectedBinding>,
    pub push_constant_size: Option<u32>,
}

/// Walk a compiled module's global variables and extract the binding
/// table. Unsupported field types inside a uniform struct are skipped
/// with a `warn!`, matching the recoverable `ShaderReflectionMismatch`
/// policy of §7 rather than failing reflection outright.
pub fn reflect(module: &naga::Module) -> ShaderReflection {
    let mut out = ShaderReflection::default();

    for (_, variable) in module.global_variables.iter() {
        let Some(binding) = &variable.binding else {
            continue;
        };
        let name = variable.name.clone().unwrap_or_default();
        let reflected = ReflectedBinding {
            name: name.clone(),
            group: binding.group,
            binding: binding.binding,
        };

        match variable.space {
            AddressSpace::Uniform => {
                let fields = reflect_struct_fields(module, variable.ty);
                let total_size = struct_size(&fields);
                out.uniform_buffers.push(ReflectedUniformBuffer {
                    name,
                    group: binding.group,
                    binding: binding.binding,
                    fields,
                    total_size,
                });
            }
            AddressSpace::Storage { .. } => out.storage_buffers.push(reflected),
            AddressSpace::Handle => match &module.types[variable.ty].inner {
                TypeInner::Sampler { .. } => out.samplers.push(reflected),
                TypeInner::Image { .. } => out.storage_textures.push(reflected),
                _ => {}
            },
            _ => {}
        }
    }

    if let Some((_, push_constant)) = module
        .global_variables
        .iter()
        .find(|(_, variable)| variable.space == AddressSpace::PushConstant)
    {
        let fields = reflect_struct_fields(module, push_constant.ty);
        out.push_constant_size = Some(struct_size(&fields));
    }

    out
}

/// The struct's byte size as the end of its last (by declared offset)
/// field, rather than relying on naga's own layout pass: every field
/// this module knows how to reflect is already offset-annotated by the
/// shader compiler's own layout rules, so this is exact for any struct
/// entirely made of the scalar/vector/matrix types above.
fn struct_size(fields: &[ExposedStructField]) -> u32 {
    fields
        .iter()
        .map(|field| field.offset + field.ty.size())
        .max()
        .unwrap_or(0)
}

fn reflect_struct_fields(module: &naga::Module, handle: naga::Handle<naga::Type>) -> Vec<ExposedStructField> {
    let mut fields = Vec::new();

    if let TypeInner::Struct { members, .. } = &module.types[handle].inner {
        for member in members {
            let Some(ty) = FieldType::from_naga(&module.types[member.ty].inner) else {
                log::warn!(
                    "shader reflection: unsupported field type for {:?}, skipping",
                    member.name
                );
                continue;
            };
            fields.push(ExposedStructField {
                name: member.name.clone().unwrap_or_default(),
                ty,
                offset: member.offset,
            });
        }
    }

    fields
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    F32(f32),
    I32(i32),
    U32(u32),
    Vec2(glam::Vec2),
    Vec3(glam::Vec3),
    Vec4(glam::Vec4),
    Mat4(glam::Mat4),
}

impl FieldValue {
    fn bytes(&self) -> Vec<u8> {
        match self {
            FieldValue::F32(v) => bytemuck::bytes_of(v).to_vec(),
            FieldValue::I32(v) => bytemuck::bytes_of(v).to_vec(),
            FieldValue::U32(v) => bytemuck::bytes_of(v).to_vec(),
            FieldValue::Vec2(v) => bytemuck::bytes_of(v).to_vec(),
            FieldValue::Vec3(v) => bytemuck::bytes_of(v).to_vec(),
            FieldValue::Vec4(v) => bytemuck::bytes_of(v).to_vec(),
            FieldValue::Mat4(v) => bytemuck::bytes_of(v).to_vec(),
        }
    }
}

/// The CPU-side values backing one material's reflected uniform buffer,
/// keyed by field name hash (§3 "lifetime-bound parameter map" convention),
/// with a dirty bit per field.
pub struct ExposedValues {
    offsets: AHashMap<u64, u32>,
    values: HashMap<u64, FieldValue>,
    dirty: HashMap<u64, bool>,
}

impl ExposedValues {
    pub fn new(reflected: &ReflectedUniformBuffer) -> Self {
        let mut offsets = AHashMap::new();
        for field in &reflected.fields {
            offsets.insert(hash_key(&field.name), field.offset);
        }
        Self {
            offsets,
            values: HashMap::new(),
            dirty: HashMap::new(),
        }
    }

    /// Set a field by name, marking it dirty if the value actually changed.
    pub fn set(&mut self, field_name: &str, value: FieldValue) {
        let key = hash_key(field_name);
        if !self.offsets.contains_key(&key) {
            log::warn!("shader reflection: field {field_name:?} not found, skipping");
            return;
        }
        let changed = self.values.get(&key) != Some(&value);
        self.values.insert(key, value);
        if changed {
            self.dirty.insert(key, true);
        }
    }

    pub fn get(&self, field_name: &str) -> Option<FieldValue> {
        self.values.get(&hash_key(field_name)).copied()
    }

    /// Write every dirty field into its cell of `allocator` and clear the
    /// dirty bits. Fields never set are left at whatever the GPU buffer
    /// already contains (typically zero, from creation).
    pub fn write_dirty(&mut self, allocator: &mut UniformCellAllocator, cell_index: usize) {
        for (key, value) in &self.values {
            if self.dirty.get(key).copied().unwrap_or(false) {
                let offset = self.offsets[key];
                allocator.write_field(cell_index, offset as u64, &value.bytes());
            }
        }
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_reflected() -> ReflectedUniformBuffer {
        ReflectedUniformBuffer {
            name: "consts".to_string(),
            group: 0,
            binding: 0,
            fields: vec![
                ExposedStructField { name: "scale".to_string(), ty: FieldType::F32, offset: 0 },
                ExposedStructField { name: "tint".to_string(), ty: FieldType::Vec3, offset: 16 },
            ],
            total_size: 32,
        }
    }

    #[test]
    fn unknown_field_is_skipped_not_panicked() {
        let mut values = ExposedValues::new(&dummy_reflected());
        values.set("nonexistent", FieldValue::F32(1.0));
        assert!(values.get("nonexistent").is_none());
    }

    #[test]
    fn setting_same_value_does_not_redirty() {
        let mut values = ExposedValues::new(&dummy_reflected());
        values.set("scale", FieldValue::F32(2.0));
        assert!(values.dirty.get(&hash_key("scale")).copied().unwrap_or(false));

        values.dirty.clear();
        values.set("scale", FieldValue::F32(2.0));
        assert!(!values.dirty.get(&hash_key("scale")).copied().unwrap_or(false));
    }

    #[test]
    fn changing_value_marks_dirty_again() {
        let mut values = ExposedValues::new(&dummy_reflected());
        values.set("scale", FieldValue::F32(2.0));
        values.dirty.clear();
        values.set("scale", FieldValue::F32(3.0));
        assert!(values.dirty.get(&hash_key("scale")).copied().unwrap_or(false));
    }
}
