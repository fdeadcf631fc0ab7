//! Validity rules for the provider-side copy of a reference image.
//!
//! The provider keeps uploaded files for a limited window. An upload is
//! treated as stale a little before it really expires so that a job
//! submitted right now can still read it while it runs.

use chrono::Duration;

use crate::error::CoreError;
use crate::types::Timestamp;

/// How long the provider keeps an uploaded file.
pub const DEFAULT_UPLOAD_VALIDITY_HOURS: i64 = 24;
/// Remaining lifetime below which an upload is refreshed.
pub const DEFAULT_GRACE_MARGIN_HOURS: i64 = 4;

/// Decides whether a recorded upload can still be referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadValidityPolicy {
    validity_window: Duration,
    grace_margin: Duration,
}

impl UploadValidityPolicy {
    /// Build a policy; the grace margin must be shorter than the window.
    pub fn new(validity_window: Duration, grace_margin: Duration) -> Result<Self, CoreError> {
        if validity_window <= Duration::zero() {
            return Err(CoreError::Validation(
                "Upload validity window must be positive".to_string(),
            ));
        }
        if grace_margin < Duration::zero() || grace_margin >= validity_window {
            return Err(CoreError::Validation(format!(
                "Grace margin must be within [0, {}h)",
                validity_window.num_hours()
            )));
        }
        Ok(Self {
            validity_window,
            grace_margin,
        })
    }

    pub fn from_hours(validity_hours: i64, grace_hours: i64) -> Result<Self, CoreError> {
        Self::new(Duration::hours(validity_hours), Duration::hours(grace_hours))
    }

    pub fn validity_window(&self) -> Duration {
        self.validity_window
    }

    pub fn grace_margin(&self) -> Duration {
        self.grace_margin
    }

    /// Expiry to assume for an upload made at `uploaded_at` when the
    /// provider does not report one.
    pub fn expiry_for(&self, uploaded_at: Timestamp) -> Timestamp {
        uploaded_at + self.validity_window
    }

    /// An upload is usable iff more than the grace margin remains.
    pub fn is_valid(&self, expires_at: Timestamp, now: Timestamp) -> bool {
        expires_at - now > self.grace_margin
    }
}

impl Default for UploadValidityPolicy {
    fn default() -> Self {
        Self {
            validity_window: Duration::hours(DEFAULT_UPLOAD_VALIDITY_HOURS),
            grace_margin: Duration::hours(DEFAULT_GRACE_MARGIN_HOURS),
        }
    }
}
