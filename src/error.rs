use crate::audio::AudioFormat;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Failures raised by the timing and capture core.
///
/// None of these are fatal to the process: capture errors abort a single
/// segment, analysis errors are reported as a failed score, and artifact
/// cleanup errors are only logged.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Failed to query audio devices: {0}")]
    DeviceQuery(String),

    #[error("Input device {index} unavailable: {reason}")]
    DeviceUnavailable { index: usize, reason: String },

    #[error("Input device {index} does not support {format}")]
    UnsupportedFormat { index: usize, format: AudioFormat },

    #[error("Artifact I/O failed for {path:?}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pitch analysis failed: {0}")]
    Analysis(String),
}

impl CoreError {
    pub fn unavailable(index: usize, reason: impl ToString) -> Self {
        Self::DeviceUnavailable {
            index,
            reason: reason.to_string(),
        }
    }

    pub fn artifact(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactIo {
            path: path.into(),
            source,
        }
    }
}
