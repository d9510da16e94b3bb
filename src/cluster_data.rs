//! Cluster data (§3 "Cluster", §4.6).
//!
//! Superpixel clusters over the compacted voxel set, built by the
//! clusterization pipeline's four techniques. A voxel's owning cluster is
//! tracked separately as a parallel array of cluster indices (or `-1`).

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

pub const MAX_NEIGHBOURS: usize = 26;
pub const NO_OWNER: i32 = -1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ClusterData {
    pub min_aabb: Vec3,
    pub _pad0: f32,
    pub max_aabb: Vec3,
    pub _pad1: f32,
    /// `.xyz` = AABB center, `.w` = voxel_count.
    pub center_aabb_voxel_count: glam::Vec4,
    pub main_direction: Vec3,
    pub index: u32,
    pub neighbour_count: u32,
    pub _pad2: [u32; 3],
    pub neighbour_indices: [u32; MAX_NEIGHBOURS],
}

impl Default for ClusterData {
    fn default() -> Self {
        Self {
            min_aabb: Vec3::splat(f32::INFINITY),
            _pad0: 0.0,
            max_aabb: Vec3::splat(f32::NEG_INFINITY),
            _pad1: 0.0,
            center_aabb_voxel_count: glam::Vec4::ZERO,
            main_direction: Vec3::Y,
            index: 0,
            neighbour_count: 0,
            _pad2: [0; 3],
            neighbour_indices: [crate::voxel::MAX_U32; MAX_NEIGHBOURS],
        }
    }
}

impl ClusterData {
    pub fn voxel_count(&self) -> u32 {
        self.center_aabb_voxel_count.w as u32
    }

    pub fn center(&self) -> Vec3 {
        self.center_aabb_voxel_count.truncate()
    }

    /// Appends a neighbour index if there is room and it is not already
    /// present. Silently drops extras past `MAX_NEIGHBOURS` (recoverable,
    /// matching §7's policy for bounded lists rather than asserting).
    pub fn add_neighbour(&mut self, neighbour_index: u32) {
        let count = self.neighbour_count as usize;
        if count >= MAX_NEIGHBOURS {
            log::warn!("cluster {} exceeded MAX_NEIGHBOURS, dropping neighbour", self.index);
            return;
        }
        if self.neighbour_indices[..count].contains(&neighbour_index) {
            return;
        }
        self.neighbour_indices[count] = neighbour_index;
        self.neighbour_count += 1;
    }

    pub fn neighbours(&self) -> &[u32] {
        &self.neighbour_indices[..self.neighbour_count as usize]
    }
}

/// §8 property 6: every compacted voxel has owner `-1` or a valid cluster
/// index, and the sum of `voxel_count` across clusters equals the number
/// of voxels with a non-`-1` owner.
pub fn validate_ownership(owners: &[i32], clusters: &[ClusterData]) -> bool {
    let valid_range = |owner: i32| owner == NO_OWNER || (owner >= 0 && (owner as usize) < clusters.len());
    if !owners.iter().all(|&owner| valid_range(owner)) {
        return false;
    }

    let owned_count = owners.iter().filter(|&&owner| owner != NO_OWNER).count() as u32;
    let cluster_total: u32 = clusters.iter().map(ClusterData::voxel_count).sum();

    owned_count == cluster_total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_neighbour_deduplicates_and_counts() {
        let mut cluster = ClusterData::default();
        cluster.add_neighbour(3);
        cluster.add_neighbour(3);
        cluster.add_neighbour(4);

        assert_eq!(cluster.neighbour_count, 2);
        assert_eq!(cluster.neighbours(), &[3, 4]);
    }

    #[test]
    fn add_neighbour_past_capacity_is_dropped_not_panicked() {
        let mut cluster = ClusterData::default();
        for i in 0..MAX_NEIGHBOURS as u32 + 5 {
            cluster.add_neighbour(i);
        }
        assert_eq!(cluster.neighbour_count as usize, MAX_NEIGHBOURS);
    }

    #[test]
    fn ownership_validates_against_cluster_voxel_counts() {
        let mut cluster_a = ClusterData { index: 0, ..Default::default() };
        cluster_a.center_aabb_voxel_count.w = 2.0;
        let mut cluster_b = ClusterData { index: 1, ..Default::default() };
        cluster_b.center_aabb_voxel_count.w = 1.0;

        let clusters = [cluster_a, cluster_b];
        let owners = [0, 0, 1, NO_OWNER];

        assert!(validate_ownership(&owners, &clusters));
    }

    #[test]
    fn ownership_mismatch_is_rejected() {
        let mut cluster_a = ClusterData { index: 0, ..Default::default() };
        cluster_a.center_aabb_voxel_count.w = 5.0;

        let clusters = [cluster_a];
        let owners = [0, 0];

        assert!(!validate_ownership(&owners, &clusters));
    }

    #[test]
    fn out_of_range_owner_is_rejected() {
        let clusters = [ClusterData::default()];
        let owners = [5];
        assert!(!validate_ownership(&owners, &clusters));
    }
}
