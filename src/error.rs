//! The fatal half of the error taxonomy from the error handling design.
//!
//! Recoverable kinds (`ResourceAlreadyExists`, `ResourceNotFound`,
//! `ShaderReflectionMismatch`, `RecordedCameraIOFailure`) are not part of this
//! enum: they surface as `Option`/empty-`Vec` returns plus a `warn!` log line,
//! never as `Err`. Only the kinds the scheduler cannot shrug off live here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TechniqueError {
    #[error("failed to build resource {name:?}: {reason}")]
    ResourceBuildFailure { name: String, reason: String },

    #[error("buffer size mismatch for {name:?}: expected {expected}, got {got}")]
    BufferSizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("queue submission failed for technique {technique:?}")]
    QueueSubmissionFailure { technique: String },

    #[error("device lost or unresponsive: {0}")]
    DeviceLost(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("voxelization resolution must be 64, 128 or 256, got {0}")]
    InvalidResolution(u32),

    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f32 },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
