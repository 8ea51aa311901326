use thiserror::Error;

/// Errors surfaced by an output driver to its owner.
///
/// Every variant carries enough text for caller-side logging. Underruns and
/// other conditions the write loop recovers from are never reported here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("can't probe device: {0}")]
    ProbeFailed(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("can't open device: {0}")]
    OpenFailed(String),

    #[error("can't play: {0}")]
    PlaybackError(String),

    #[error("mixer unavailable: {0}")]
    MixerUnavailable(String),

    #[error("volume {0} outside 0..=100")]
    InvalidVolume(i32),

    #[error("device is not open")]
    NotOpen,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
