use super::domain::{Gender, HostelId, RoomId, UserId};
use super::payments::GatewayError;
use super::repository::RepositoryError;

/// Error raised by the housing engine.
#[derive(Debug, thiserror::Error)]
pub enum HousingError {
    #[error("{0}")]
    Validation(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("room {room} has no free bed")]
    CapacityExceeded { room: RoomId },
    #[error("hostel {hostel} does not admit {gender:?} students")]
    GenderMismatch { hostel: HostelId, gender: Gender },
    #[error("user {user} already holds an active allocation")]
    DuplicateAllocation { user: UserId },
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
    /// Another request changed the record between read and write; safe to retry.
    #[error("{entity} {id} was changed by another request; retry the operation")]
    Concurrent { entity: &'static str, id: String },
    #[error("webhook signature rejected")]
    Signature,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl HousingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Concurrent { .. } | Self::Repository(RepositoryError::Unavailable(_))
        )
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<RepositoryError> for HousingError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::CapacityConflict { room } => Self::CapacityExceeded { room },
            RepositoryError::ActiveAllocationExists(user) => Self::DuplicateAllocation { user },
            RepositoryError::NotFound { entity, id } => Self::NotFound { entity, id },
            RepositoryError::Stale { entity, id } => Self::Concurrent { entity, id },
            RepositoryError::GenderMismatch { hostel, gender } => {
                Self::GenderMismatch { hostel, gender }
            }
            other => Self::Repository(other),
        }
    }
}
