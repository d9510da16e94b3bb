//! Runtime configuration (external interfaces, config table).
//!
//! The original implementation hardcodes these as constants; here they are
//! loaded from a TOML file with field-level defaults, validated once at
//! startup. A missing file is not fatal: it is logged and the defaults are
//! used, mirroring the recoverable `RecordedCameraIOFailure` policy.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoxelizationResolution {
    R64 = 64,
    R128 = 128,
    R256 = 256,
}

impl VoxelizationResolution {
    pub fn side(self) -> u32 {
        self as u32
    }

    fn from_u32(value: u32) -> Result<Self, ConfigError> {
        match value {
            64 => Ok(Self::R64),
            128 => Ok(Self::R128),
            256 => Ok(Self::R256),
            other => Err(ConfigError::InvalidResolution(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelAabbClamp {
    pub min_x: Option<f32>,
    pub min_y: Option<f32>,
    pub min_z: Option<f32>,
    pub max_x: Option<f32>,
    pub max_y: Option<f32>,
    pub max_z: Option<f32>,
}

impl Default for VoxelAabbClamp {
    fn default() -> Self {
        Self {
            min_x: None,
            min_y: None,
            min_z: None,
            max_x: None,
            max_y: None,
            max_z: None,
        }
    }
}

/// The runtime-configurable knobs from the external interfaces table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scene_voxelization_resolution: u32,
    pub emitter_radiance: f32,
    pub lit_voxel_aabb_clamp: VoxelAabbClamp,
    /// Stored pre-divided; effective multiplier is this value / 100000.
    pub irradiance_multiplier: f32,
    /// Stored pre-divided; effective multiplier is this value / 10.
    pub direct_irradiance_multiplier: f32,
    /// Stored pre-divided; effective bias is this value / 10.
    pub form_factor_voxel_to_voxel_added: f32,
    /// Stored pre-divided; effective bias is this value / 10.
    pub form_factor_cluster_to_voxel_added: f32,
    pub cluster_visibility_use_shadow_map: bool,
    pub avoid_voxel_face_penalty: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scene_voxelization_resolution: 128,
            emitter_radiance: 1.0,
            lit_voxel_aabb_clamp: VoxelAabbClamp::default(),
            irradiance_multiplier: 10000.0,
            direct_irradiance_multiplier: 10.0,
            form_factor_voxel_to_voxel_added: 1.0,
            form_factor_cluster_to_voxel_added: 1.0,
            cluster_visibility_use_shadow_map: true,
            avoid_voxel_face_penalty: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults (with a
    /// logged warning) if the file does not exist. A file that exists but
    /// fails to parse, or a value that fails validation, is fatal.
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?,
            Err(err) => {
                log::warn!(
                    "no config file at {path:?} ({err}), using defaults"
                );
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        VoxelizationResolution::from_u32(self.scene_voxelization_resolution)?;

        for (field, value) in [
            ("emitter_radiance", self.emitter_radiance),
            ("irradiance_multiplier", self.irradiance_multiplier),
            (
                "direct_irradiance_multiplier",
                self.direct_irradiance_multiplier,
            ),
            (
                "form_factor_voxel_to_voxel_added",
                self.form_factor_voxel_to_voxel_added,
            ),
            (
                "form_factor_cluster_to_voxel_added",
                self.form_factor_cluster_to_voxel_added,
            ),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NotFinite { field, value });
            }
        }

        Ok(())
    }

    pub fn resolution(&self) -> VoxelizationResolution {
        VoxelizationResolution::from_u32(self.scene_voxelization_resolution)
            .expect("validated at load time")
    }

    pub fn irradiance_scale(&self) -> f32 {
        self.irradiance_multiplier / 100_000.0
    }

    pub fn direct_irradiance_scale(&self) -> f32 {
        self.direct_irradiance_multiplier / 10.0
    }

    pub fn form_factor_voxel_to_voxel_bias(&self) -> f32 {
        self.form_factor_voxel_to_voxel_added / 10.0
    }

    pub fn form_factor_cluster_to_voxel_bias(&self) -> f32 {
        self.form_factor_cluster_to_voxel_added / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_resolution() {
        let mut config = Config::default();
        config.scene_voxelization_resolution = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::path::Path::new("/nonexistent/path/voxel-gi.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.scene_voxelization_resolution, 128);
    }

    #[test]
    fn loads_overrides_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "scene_voxelization_resolution = 256\nemitter_radiance = 2.5\n")
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.scene_voxelization_resolution, 256);
        assert_eq!(config.emitter_radiance, 2.5);
    }

    #[test]
    fn scales_divide_as_documented() {
        let mut config = Config::default();
        config.irradiance_multiplier = 50_000.0;
        config.direct_irradiance_multiplier = 5.0;
        config.form_factor_voxel_to_voxel_added = 3.0;

        assert_eq!(config.irradiance_scale(), 0.5);
        assert_eq!(config.direct_irradiance_scale(), 0.5);
        assert_eq!(config.form_factor_voxel_to_voxel_bias(), 0.3);
    }
}
