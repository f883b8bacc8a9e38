//! Graphics error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in the graphics system.
///
/// Variants split into two halves: initialization/surface failures the caller
/// can react to (abort startup, retry a resize), and failures after which the
/// GPU timeline can no longer be trusted. Use [`GraphicsError::is_fatal`] to
/// distinguish them.
#[derive(Error, Debug)]
pub enum GraphicsError {
    #[error("failed to initialize graphics: {0}")]
    InitializationFailed(String),
    #[error("failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("failed to create swapchain: {0}")]
    SwapchainCreationFailed(String),
    #[error("failed to create resource: {0}")]
    ResourceCreationFailed(String),
    #[error("failed to submit command list: {0}")]
    SubmitFailed(String),
    #[error("failed to present: {0}")]
    PresentFailed(String),
    /// A new recording session was requested while the previous command list
    /// had not been submitted. The single allocator/list pair forbids this.
    #[error("command list is still in flight, cannot begin a new recording")]
    CommandListInFlight,
    #[error("no frame is in progress")]
    NoFrameInProgress,
    /// The fence wait did not complete within the bounded timeout. A hung GPU
    /// or driver cannot be remediated in-process.
    #[error("timed out after {timeout:?} waiting for fence value {value}")]
    SyncTimeout { timeout: Duration, value: u64 },
    #[error("fence signal or wait failed: {0}")]
    SyncFailed(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
    #[error("surface lost, needs recreation")]
    SurfaceLost,
}

impl GraphicsError {
    /// Whether the error leaves the GPU timeline in a state that cannot be
    /// recovered in-process. Callers should tear down and exit; tests may
    /// intercept instead of crashing the test process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CommandListInFlight
                | Self::SyncTimeout { .. }
                | Self::SyncFailed(_)
                | Self::Internal(_)
                | Self::OutOfMemory
                | Self::DeviceLost
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::DeviceCreationFailed("no adapter qualifies".to_string());
        assert_eq!(err.to_string(), "failed to create device: no adapter qualifies");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(GraphicsError::SyncTimeout {
            timeout: Duration::from_secs(20),
            value: 7,
        }
        .is_fatal());
        assert!(GraphicsError::DeviceLost.is_fatal());
        assert!(GraphicsError::CommandListInFlight.is_fatal());

        assert!(!GraphicsError::SurfaceLost.is_fatal());
        assert!(!GraphicsError::SwapchainCreationFailed("too small".into()).is_fatal());
    }
}
