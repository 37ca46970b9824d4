use thiserror::Error;

use crate::campaign::Stage;

/// Reasons a scan, fix or write could not happen.
///
/// The first four describe the device and are shown to the user as the reason
/// scanning is unavailable; ordering of the checks that produce them lives in
/// [`crate::source::check_preconditions`].
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Wi-Fi is disabled. Please enable it to scan.")]
    RadioDisabled,

    #[error("Location services are disabled. Please enable them to scan.")]
    LocationDisabled,

    #[error("Unable to get location. Ensure location services are enabled.")]
    PositionUnavailable,

    #[error("Location and Wi-Fi permissions denied")]
    PermissionDenied,

    #[error("writing to database failed: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("invalid campaign transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },
}

impl ScanError {
    /// Whether this error describes the device rather than a storage or logic fault.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ScanError::RadioDisabled
                | ScanError::LocationDisabled
                | ScanError::PositionUnavailable
                | ScanError::PermissionDenied
        )
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
