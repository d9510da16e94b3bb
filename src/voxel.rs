//! The voxelization grid data model (§3 "Voxelization grid", §4.5).
//!
//! A dense logical space of side `V` is represented sparsely: one
//! occupancy bit per voxel, a `first_index[h]` linked-list head per voxel,
//! and a flat arena of fragments threaded together by
//! `next_fragment_index`. After the prefix-sum engine (`prefix_sum.rs`)
//! compacts the occupancy bitset, `first_index_compacted`/
//! `hashed_position_compacted` give the dense, GPU-friendly view.

use bit_set::BitSet;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

pub const MAX_U32: u32 = u32::MAX;

/// `h = x*V^2 + y*V + z`, as the spec's hashed voxel index.
pub fn hashed_index(x: u32, y: u32, z: u32, side: u32) -> u32 {
    x * side * side + y * side + z
}

pub fn unhash_index(h: u32, side: u32) -> (u32, u32, u32) {
    let x = h / (side * side);
    let rem = h % (side * side);
    let y = rem / side;
    let z = rem % side;
    (x, y, z)
}

/// Maps an integer voxel coordinate inside `[0, side)^3` to world space
/// given the AABB the grid was built over. Inverse of `world_to_voxel_space`.
pub fn voxel_to_world(coord: glam::UVec3, side: u32, aabb_min: Vec3, aabb_max: Vec3) -> Vec3 {
    let extent = aabb_max - aabb_min;
    let cell_size = extent / side as f32;
    aabb_min + (coord.as_vec3() + Vec3::splat(0.5)) * cell_size
}

/// Maps a world-space position back to its integer voxel coordinate.
/// Round-trips with `voxel_to_world` for any integer coordinate strictly
/// inside the grid (§8).
pub fn world_to_voxel_space(pos: Vec3, side: u32, aabb_min: Vec3, aabb_max: Vec3) -> glam::UVec3 {
    let extent = aabb_max - aabb_min;
    let cell_size = extent / side as f32;
    let local = (pos - aabb_min) / cell_size;
    local.floor().as_uvec3().min(glam::UVec3::splat(side - 1))
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, Pod, Zeroable)]
pub struct Fragment {
    pub position: Vec3,
    pub normal: Vec3,
    pub reflectance: f32,
    pub irradiance: Vec3,
}

/// The sparse voxelization grid before compaction.
pub struct VoxelGrid {
    pub side: u32,
    occupied_bits: BitSet,
    first_index: Vec<u32>,
    fragment_data: Vec<Fragment>,
    next_fragment_index: Vec<u32>,
}

impl VoxelGrid {
    pub fn new(side: u32) -> Self {
        let voxel_count = (side as usize).pow(3);
        Self {
            side,
            occupied_bits: BitSet::with_capacity(voxel_count),
            first_index: vec![MAX_U32; voxel_count],
            fragment_data: Vec::new(),
            next_fragment_index: Vec::new(),
        }
    }

    pub fn is_occupied(&self, h: u32) -> bool {
        self.occupied_bits.contains(h as usize)
    }

    pub fn occupied_count(&self) -> usize {
        self.occupied_bits.len()
    }

    pub fn first_index(&self, h: u32) -> u32 {
        self.first_index[h as usize]
    }

    pub fn fragment(&self, index: u32) -> &Fragment {
        &self.fragment_data[index as usize]
    }

    pub fn next_fragment_index(&self, index: u32) -> u32 {
        self.next_fragment_index[index as usize]
    }

    pub fn fragment_count(&self) -> usize {
        self.fragment_data.len()
    }

    /// Atomically (conceptually — this is the CPU reference used by tests
    /// and by a non-GPU fallback path) inserts a fragment into the linked
    /// list rooted at `first_index[h]`, sets the occupancy bit, and
    /// returns the fragment's own index.
    pub fn insert_fragment(&mut self, h: u32, fragment: Fragment) -> u32 {
        let new_index = self.fragment_data.len() as u32;
        let previous_head = self.first_index[h as usize];

        self.fragment_data.push(fragment);
        self.next_fragment_index.push(previous_head);
        self.first_index[h as usize] = new_index;
        self.occupied_bits.insert(h as usize);

        new_index
    }

    /// §8 property 4: following `next_fragment_index` from
    /// `first_index[h]` eventually reaches `fragment_index` and
    /// terminates at `MAX_U32`.
    pub fn fragment_reachable_from_voxel(&self, h: u32, fragment_index: u32) -> bool {
        let mut cursor = self.first_index[h as usize];
        while cursor != MAX_U32 {
            if cursor == fragment_index {
                return true;
            }
            cursor = self.next_fragment_index[cursor as usize];
        }
        false
    }

    /// A CPU reference compaction: scan `first_index` in hashed-index
    /// order and keep every occupied voxel's first fragment index and
    /// hashed position. This is what the GPU prefix-sum/scatter passes
    /// are expected to reproduce (§8 properties 1-3), and is used directly
    /// by `prefix_sum.rs`'s CPU fallback and by tests.
    pub fn compact(&self) -> CompactedVoxels {
        let mut first_index_compacted = Vec::with_capacity(self.occupied_bits.len());
        let mut hashed_position_compacted = Vec::with_capacity(self.occupied_bits.len());

        for h in self.occupied_bits.iter() {
            first_index_compacted.push(self.first_index[h]);
            hashed_position_compacted.push(h as u32);
        }

        CompactedVoxels {
            first_index_compacted,
            hashed_position_compacted,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CompactedVoxels {
    pub first_index_compacted: Vec<u32>,
    pub hashed_position_compacted: Vec<u32>,
}

impl CompactedVoxels {
    pub fn len(&self) -> usize {
        self.first_index_compacted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_index_compacted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voxel_world_round_trip() {
        let side = 64;
        let aabb_min = Vec3::splat(-10.0);
        let aabb_max = Vec3::splat(10.0);

        for coord in [glam::UVec3::new(0, 0, 0), glam::UVec3::new(31, 5, 63), glam::UVec3::new(63, 63, 63)] {
            let world = voxel_to_world(coord, side, aabb_min, aabb_max);
            let back = world_to_voxel_space(world, side, aabb_min, aabb_max);
            assert_eq!(coord, back, "round trip failed for {coord:?}");
        }
    }

    #[test]
    fn hash_unhash_round_trip() {
        let side = 64;
        for (x, y, z) in [(0, 0, 0), (10, 20, 30), (63, 63, 63)] {
            let h = hashed_index(x, y, z, side);
            assert_eq!(unhash_index(h, side), (x, y, z));
        }
    }

    #[test]
    fn insert_marks_occupied_and_links_fragments() {
        let mut grid = VoxelGrid::new(8);
        let h = hashed_index(1, 2, 3, 8);

        assert!(!grid.is_occupied(h));

        let first = grid.insert_fragment(h, Fragment::default());
        let second = grid.insert_fragment(h, Fragment::default());

        assert!(grid.is_occupied(h));
        assert_eq!(grid.first_index(h), second);
        assert!(grid.fragment_reachable_from_voxel(h, first));
        assert!(grid.fragment_reachable_from_voxel(h, second));
    }

    #[test]
    fn compacted_length_matches_occupied_count() {
        let mut grid = VoxelGrid::new(8);
        grid.insert_fragment(hashed_index(0, 0, 0, 8), Fragment::default());
        grid.insert_fragment(hashed_index(1, 1, 1, 8), Fragment::default());
        grid.insert_fragment(hashed_index(1, 1, 1, 8), Fragment::default());

        let compacted = grid.compact();
        assert_eq!(compacted.len(), grid.occupied_count());
        assert_eq!(compacted.len(), 2);

        for &h in &compacted.hashed_position_compacted {
            assert!(grid.is_occupied(h));
        }
    }

    #[test]
    fn empty_voxel_has_max_u32_first_index() {
        let grid = VoxelGrid::new(8);
        assert_eq!(grid.first_index(hashed_index(4, 4, 4, 8)), MAX_U32);
    }
}
