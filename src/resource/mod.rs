//! Concrete `Resource` implementations stored in `Registry<T>` (§3, §4.2):
//! GPU buffers, textures, and cell-aligned uniform buffers.

pub mod buffer;
pub mod texture;
pub mod uniform;

pub use buffer::Buffer;
pub use texture::{Texture, TextureDesc};
pub use uniform::UniformCellAllocator;

use std::cell::RefCell;
use std::rc::Rc;

use crate::registry::Registry;

/// The three resource registries the rest of the technique graph shares,
/// bundled so a technique only needs one field instead of three. Every
/// technique in the graph holds a `SharedPools` clone of the same instance
/// (§4.2: names are authoritative across the whole graph, not per
/// technique).
#[derive(Default)]
pub struct ResourcePools {
    pub buffers: Registry<Buffer>,
    pub textures: Registry<Texture>,
    pub uniforms: Registry<UniformCellAllocator>,
}

pub type SharedPools = Rc<RefCell<ResourcePools>>;

pub fn new_shared_pools() -> SharedPools {
    Rc::new(RefCell::new(ResourcePools::default()))
}
