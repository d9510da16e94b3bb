//! GPU texture resource (§3 "Texture").
//!
//! `wgpu` does not expose explicit image layouts the way the source Vulkan
//! backend does; "layout transition" reduces to recreating a
//! usage-compatible view, which is what `change_view` below does. This is
//! recorded in DESIGN.md as the resolution for that part of the data
//! model.

use crate::context::Context;
use crate::registry::{Resource, ResourceHeader};

pub struct Texture {
    header: ResourceHeader,
    /// `None` for a texture that only wraps an externally-owned view (the
    /// swapchain's per-frame color target, registered via `from_view`):
    /// `wgpu` gives out the surface's `Texture` wrapped in a
    /// `SurfaceTexture` that must be presented by its original owner, so
    /// this type cannot also hold it.
    pub handle: Option<wgpu::Texture>,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub extent: wgpu::Extent3d,
    pub usage: wgpu::TextureUsages,
    pub mip_level_count: u32,
    pub sample_count: u32,
}

impl Resource for Texture {
    fn header(&self) -> &ResourceHeader {
        &self.header
    }
    fn header_mut(&mut self) -> &mut ResourceHeader {
        &mut self.header
    }
}

pub struct TextureDesc<'a> {
    pub name: &'a str,
    pub format: wgpu::TextureFormat,
    pub extent: wgpu::Extent3d,
    pub usage: wgpu::TextureUsages,
    pub dimension: wgpu::TextureDimension,
    pub mip_level_count: u32,
    pub sample_count: u32,
}

impl Texture {
    pub fn new(context: &Context, desc: &TextureDesc) -> Self {
        let handle = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.name),
            size: desc.extent,
            mip_level_count: desc.mip_level_count,
            sample_count: desc.sample_count,
            dimension: desc.dimension,
            format: desc.format,
            usage: desc.usage,
            view_formats: &[],
        });

        let view = handle.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.name),
            ..Default::default()
        });

        Self {
            header: ResourceHeader::new(desc.name, "texture"),
            handle: Some(handle),
            view,
            format: desc.format,
            extent: desc.extent,
            usage: desc.usage,
            mip_level_count: desc.mip_level_count,
            sample_count: desc.sample_count,
        }
    }

    /// Wrap a view the caller already created from a texture it owns (the
    /// swapchain's acquired frame), so it can be looked up by name through
    /// the same `Registry<Texture>` every other technique uses, without
    /// this type taking ownership of the `wgpu::SurfaceTexture` (which
    /// only its acquirer may `present()`).
    pub fn from_view(name: &str, view: wgpu::TextureView, format: wgpu::TextureFormat, extent: wgpu::Extent3d) -> Self {
        Self {
            header: ResourceHeader::new(name, "texture"),
            handle: None,
            view,
            format,
            extent,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            mip_level_count: 1,
            sample_count: 1,
        }
    }

    /// Destroy and recreate at a new extent, preserving format/usage/name.
    /// Intended as the rebuild closure passed to `Registry::resize`. Only
    /// valid for a texture that owns its handle.
    pub fn recreate(context: &Context, old: Self, new_extent: wgpu::Extent3d) -> Self {
        let name = old.header().name().to_string();
        let desc = TextureDesc {
            name: &name,
            format: old.format,
            extent: new_extent,
            usage: old.usage,
            dimension: wgpu::TextureDimension::D2,
            mip_level_count: old.mip_level_count,
            sample_count: old.sample_count,
        };
        drop(old);
        Self::new(context, &desc)
    }

    /// Rebuild the cached view with a different view descriptor (e.g. a
    /// different `TextureViewDimension` for a cube/array alias), standing
    /// in for the explicit layout transitions of the original backend.
    /// Only valid for a texture that owns its handle.
    pub fn change_view(&mut self, view_desc: &wgpu::TextureViewDescriptor) {
        self.view = self
            .handle
            .as_ref()
            .expect("change_view on a view-only texture")
            .create_view(view_desc);
    }
}
