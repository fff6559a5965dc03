use serde::Serialize;
use thiserror::Error;

/// Stable error kinds surfaced to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Permission,
    NotFound,
    Conflict,
    InvalidState,
    NotOnboarded,
    PaymentProcessing,
    ProviderUnavailable,
    Internal,
}

#[derive(Error, Debug)]
pub enum MentorError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Permission(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    NotOnboarded(String),
    #[error("payment processing failed: {0}")]
    PaymentProcessing(String),
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = MentorError> = std::result::Result<T, E>;

impl MentorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Permission(_) => ErrorKind::Permission,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NotOnboarded(_) => ErrorKind::NotOnboarded,
            Self::PaymentProcessing(_) => ErrorKind::PaymentProcessing,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Database(_) | Self::Pool(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::NotOnboarded => 400,
            ErrorKind::Permission => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::InvalidState => 409,
            ErrorKind::PaymentProcessing | ErrorKind::Internal => 500,
            ErrorKind::ProviderUnavailable => 503,
        }
    }

    /// Message safe to return to clients. Internal failures are replaced
    /// by a generic text so driver and provider details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::Pool(_))
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for MentorError {
    fn from(e: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        MentorError::Pool(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_kind() {
        assert_eq!(MentorError::Validation("x".into()).status_code(), 400);
        assert_eq!(MentorError::NotOnboarded("x".into()).status_code(), 400);
        assert_eq!(MentorError::Permission("x".into()).status_code(), 403);
        assert_eq!(MentorError::NotFound("x".into()).status_code(), 404);
        assert_eq!(MentorError::Conflict("x".into()).status_code(), 409);
        assert_eq!(MentorError::InvalidState("x".into()).status_code(), 409);
        assert_eq!(MentorError::PaymentProcessing("x".into()).status_code(), 500);
        assert_eq!(MentorError::ProviderUnavailable("x".into()).status_code(), 503);
    }

    #[test]
    fn test_internal_errors_are_not_echoed() {
        let err = MentorError::Internal(anyhow::anyhow!("relation \"bookings\" does not exist"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "Internal server error");

        let err = MentorError::Conflict("Booking is already refunded".into());
        assert_eq!(err.public_message(), "Booking is already refunded");
    }
}
