use thiserror::Error;

/// Failure reported by a foreign-device backend.
///
/// [`Unsupported`](Self::Unsupported) and
/// [`DifferentDevice`](Self::DifferentDevice) are structural: they repeat on
/// every attempt, so a context that sees one falls back to copying for good.
/// [`Api`](Self::Api) is an unexpected native failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteropError {
    #[error("interop not supported: {0}")]
    Unsupported(String),
    #[error("texture lives on a different device")]
    DifferentDevice,
    #[error("native call failed: {0}")]
    Api(String),
    #[error("timed out waiting for the keyed mutex")]
    Timeout,
}

impl InteropError {
    /// Whether the failure will repeat no matter how often it is retried.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Unsupported(_) | Self::DifferentDevice)
    }
}

pub type InteropResult<T> = Result<T, InteropError>;
