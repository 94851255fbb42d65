//! Mapping of domain errors onto problem details.

use tracing::{error, warn};

use super::problem_details::{self, ProblemDetails};
use crate::account::AuthError;
use crate::correlator::CorrelateError;
use crate::listing::ListingError;
use crate::media::{StreamError, UploadError};
use crate::session::SessionError;
use crate::store::StorageError;

impl From<CorrelateError> for ProblemDetails {
    fn from(e: CorrelateError) -> Self {
        match e {
            CorrelateError::TimedOut(..) => {
                warn!(error = %e, "Upstream reply timed out");
                problem_details::gateway_timeout(e.to_string())
            }
            CorrelateError::SessionClosed(_) => problem_details::service_unavailable(e.to_string()),
        }
    }
}

impl From<StorageError> for ProblemDetails {
    fn from(e: StorageError) -> Self {
        error!(error = %e, "Storage failure");
        problem_details::internal_error("storage failure")
    }
}

impl From<SessionError> for ProblemDetails {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Client(e) => {
                warn!(error = %e, "Protocol client unavailable");
                problem_details::service_unavailable(format!("protocol client unavailable: {e}"))
            }
            SessionError::Storage(e) => e.into(),
        }
    }
}

impl From<StreamError> for ProblemDetails {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::InvalidRange(_) | StreamError::NotSatisfiable { .. } => {
                problem_details::range_not_satisfiable(e.to_string())
            }
            StreamError::Session(e) => e.into(),
            StreamError::Correlate(e) => e.into(),
            StreamError::Storage(e) => e.into(),
        }
    }
}

impl From<UploadError> for ProblemDetails {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::InvalidContentRange(_)
            | UploadError::TotalMismatch { .. }
            | UploadError::LengthMismatch { .. } => problem_details::range_not_satisfiable(e.to_string()),
            UploadError::UnsafeFileName(_) => problem_details::bad_request(e.to_string()),
            UploadError::Finalizing(_) => problem_details::conflict(e.to_string()),
            UploadError::Storage(e) => e.into(),
        }
    }
}

impl From<ListingError> for ProblemDetails {
    fn from(e: ListingError) -> Self {
        match e {
            ListingError::Session(e) => e.into(),
            ListingError::Correlate(e) => e.into(),
        }
    }
}

impl From<AuthError> for ProblemDetails {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Session(e) => e.into(),
            AuthError::Correlate(e) => e.into(),
        }
    }
}
