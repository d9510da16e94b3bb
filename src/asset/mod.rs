//! The in-memory scene representation the voxelizer and rasterizer need:
//! positions, normals, per-triangle material index, a reflectance scalar
//! (§1). Scene *authoring* (glTF or otherwise) is out of scope; `SceneSource`
//! is the trait boundary a real importer would implement instead.
//!
//! This is the teacher's own `asset` module with its glTF importer,
//! texture-quantization and tangent-frame encoding removed — those exist
//! to feed a PBR rasterizer's vertex format, which this pipeline's
//! voxelizer does not need.

use std::ops::Range;
use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub direction: Vec4,
    pub irradiance: Vec4,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec4::new(0.0, 1.0, 0.0, 1.0),
            irradiance: Vec4::splat(1.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Transform {
    pub scale: Vec3,
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
        }
    }
}

impl From<Mat4> for Transform {
    fn from(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self { scale, rotation, translation }
    }
}

impl From<Transform> for Mat4 {
    fn from(transform: Transform) -> Self {
        Self::from_scale_rotation_translation(transform.scale, transform.rotation, transform.translation)
    }
}

#[repr(C)]
#[derive(Default, Clone, Copy, Debug, Zeroable, Pod, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    pub fn transformed(self, transform: Transform) -> Self {
        let scale = transform.scale.abs().max_element();
        let transform: Mat4 = transform.into();
        let center = (transform * self.center.extend(1.0)).truncate();

        Self { radius: scale * self.radius, center }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Primitive {
    pub indices: Range<u32>,
    pub bounding_sphere: BoundingSphere,
    pub material: u32,
}

/// meshType flags (§3 "Scene"): which of the scheduler's passes a node
/// participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshKind {
    RenderModel,
    EmitterModel,
    LightVolume,
    Debug,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    pub name: Option<String>,
    pub mesh: Option<u32>,
    pub mesh_kind: MeshKind,
    pub transform: Transform,
    pub children: Vec<Instance>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Texture {
    pub format: wgpu::TextureFormat,
    pub extent: wgpu::Extent3d,
    pub mip_level_count: u32,
    pub mips: Box<[u8]>,
}

/// No texture bound; `albedo_texture`/`normal_texture`/`specular_texture`
/// hold this sentinel instead of `Option<u32>` so the struct stays `Pod`
/// for direct upload into a storage buffer.
pub const NO_TEXTURE: u32 = u32::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Serialize, Deserialize)]
pub struct Material {
    pub albedo_texture: u32,
    pub normal_texture: u32,
    pub specular_texture: u32,
    /// Scalar reflectance fed to the voxelizer's irradiance accumulation,
    /// in place of the full PBR BRDF the rasterizer would otherwise use.
    pub reflectance: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo_texture: NO_TEXTURE,
            normal_texture: NO_TEXTURE,
            specular_texture: NO_TEXTURE,
            reflectance: 0.5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
}

/// The voxelizer/rasterizer's vertex format: plain `f32` position and
/// normal, no quantization and no tangent frame (those exist only to
/// drive a PBR rasterizer's normal mapping, which is out of scope here).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub texcoord: Vec2,
    pub material: u32,
}

#[derive(Clone, Debug)]
pub struct AssetPath {
    pub asset: PathBuf,
    pub cache: PathBuf,
}

impl AssetPath {
    pub fn new<A, B>(asset: A, cache: B) -> Self
    where
        A: AsRef<Path>,
        B: AsRef<Path>,
    {
        Self {
            asset: asset.as_ref().to_path_buf(),
            cache: cache.as_ref().to_path_buf(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Scene {
    pub directional_light: DirectionalLight,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub textures: Vec<Texture>,
    pub materials: Vec<Material>,
    pub meshes: Vec<Mesh>,
    pub instances: Vec<Instance>,
}

impl Scene {
    pub fn add_texture(&mut self, texture: Texture) -> u32 {
        let index = self.textures.len();
        self.textures.push(texture);
        index as u32
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        let index = self.materials.len();
        self.materials.push(material);
        index as u32
    }

    /// Visit every instance in the scene's node forest, depth-first,
    /// threading a caller-defined accumulator (typically the parent's
    /// resolved world transform) down to children.
    pub fn visit_instances<F, R>(&self, mut cb: F)
    where
        F: FnMut(&Instance, Option<&R>) -> R,
    {
        fn visit<F, R>(instance: &Instance, ret: Option<&R>, cb: &mut F)
        where
            F: FnMut(&Instance, Option<&R>) -> R,
        {
            let ret = cb(instance, ret);
            for child in &instance.children {
                visit(child, Some(&ret), cb);
            }
        }

        for instance in &self.instances {
            visit(instance, None, &mut cb);
        }
    }

    /// World-space AABB enclosing every `RenderModel`/`EmitterModel`
    /// vertex referenced by the scene's instances, used as the
    /// voxelization projection's enclosing cube (§4.5).
    pub fn world_aabb(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);

        self.visit_instances::<_, Mat4>(|instance, parent_transform| {
            let local: Mat4 = instance.transform.into();
            let world = parent_transform.map(|parent| *parent * local).unwrap_or(local);

            if matches!(instance.mesh_kind, MeshKind::RenderModel | MeshKind::EmitterModel) {
                if let Some(mesh_index) = instance.mesh {
                    if let Some(mesh) = self.meshes.get(mesh_index as usize) {
                        for primitive in &mesh.primitives {
                            let sphere = primitive.bounding_sphere.transformed(Transform::from(world));
                            min = min.min(sphere.center - Vec3::splat(sphere.radius));
                            max = max.max(sphere.center + Vec3::splat(sphere.radius));
                        }
                    }
                }
            }

            world
        });

        if min.x.is_finite() {
            (min, max)
        } else {
            (Vec3::ZERO, Vec3::ZERO)
        }
    }
}

/// What a real scene importer (glTF or otherwise) would implement; out of
/// scope here per §1, kept as the documented seam.
pub trait SceneSource {
    fn load(&self, path: &AssetPath) -> eyre::Result<Scene>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_instance(bounding_sphere: BoundingSphere, translation: Vec3) -> Instance {
        Instance {
            name: None,
            mesh: Some(0),
            mesh_kind: MeshKind::RenderModel,
            transform: Transform { translation, ..Default::default() },
            children: Vec::new(),
        }
    }

    #[test]
    fn world_aabb_covers_translated_instances() {
        let mut scene = Scene::default();
        scene.meshes.push(Mesh {
            primitives: vec![Primitive {
                indices: 0..3,
                bounding_sphere: BoundingSphere { center: Vec3::ZERO, radius: 1.0 },
                material: 0,
            }],
        });
        scene.instances.push(leaf_instance(
            BoundingSphere { center: Vec3::ZERO, radius: 1.0 },
            Vec3::new(5.0, 0.0, 0.0),
        ));

        let (min, max) = scene.world_aabb();
        assert!(min.x <= 4.0 && max.x >= 6.0);
    }

    #[test]
    fn empty_scene_has_zero_aabb() {
        let scene = Scene::default();
        assert_eq!(scene.world_aabb(), (Vec3::ZERO, Vec3::ZERO));
    }

    #[test]
    fn visit_instances_reaches_children() {
        let mut scene = Scene::default();
        let mut parent = leaf_instance(BoundingSphere::default(), Vec3::ZERO);
        parent.children.push(leaf_instance(BoundingSphere::default(), Vec3::X));
        scene.instances.push(parent);

        let mut count = 0;
        scene.visit_instances::<_, ()>(|_, _| count += 1);
        assert_eq!(count, 2);
    }
}
