use super::ids::{JobId, UserId};
use super::media::MediaError;
use super::store::StoreError;

/// Error raised by the marketplace services.
#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },
    #[error("applicant '{applicant_id}' already has an active application for job '{job_id}'")]
    DuplicateApplication { job_id: JobId, applicant_id: UserId },
    #[error("cannot {action} {entity} '{id}' while it is {state}")]
    InvalidStateTransition {
        entity: &'static str,
        id: String,
        state: String,
        action: &'static str,
    },
    #[error("user '{user_id}' is not permitted to {action}")]
    Unauthorized { user_id: UserId, action: &'static str },
    #[error("no signed-in user")]
    Unauthenticated,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Backend(#[from] StoreError),
    #[error(transparent)]
    Media(#[from] MediaError),
}

impl MarketplaceError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        MarketplaceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn unauthorized(user_id: &UserId, action: &'static str) -> Self {
        MarketplaceError::Unauthorized {
            user_id: user_id.clone(),
            action,
        }
    }

    pub(crate) fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        state: &str,
        action: &'static str,
    ) -> Self {
        MarketplaceError::InvalidStateTransition {
            entity,
            id: id.to_string(),
            state: state.to_string(),
            action,
        }
    }

    /// True for failures of the backing services rather than of the request itself.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            MarketplaceError::Backend(_) | MarketplaceError::Media(_)
        )
    }
}
