use service_core::error::AppError;
use thiserror::Error;

/// Domain error for the identity core.
///
/// Every variant maps to exactly one outward status category.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn identity_not_found() -> Self {
        ServiceError::NotFound("Identity".to_string())
    }

    pub fn token_not_found() -> Self {
        ServiceError::NotFound("Token".to_string())
    }

    pub fn namespace_missing(namespace: &str) -> Self {
        ServiceError::FailedPrecondition(format!("Namespace '{}' does not exist", namespace))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::FailedPrecondition(msg) => {
                AppError::FailedPrecondition(anyhow::anyhow!(msg))
            }
            ServiceError::AlreadyExists(what) => {
                AppError::Conflict(anyhow::anyhow!("{} already exists", what))
            }
            ServiceError::InvalidArgument(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_map_to_app_errors() {
        assert_eq!(AppError::from(ServiceError::identity_not_found()).code(), "NOT_FOUND");
        assert_eq!(
            AppError::from(ServiceError::namespace_missing("acme")).code(),
            "FAILED_PRECONDITION"
        );
        assert_eq!(
            AppError::from(ServiceError::AlreadyExists("Identity".into())).code(),
            "ALREADY_EXISTS"
        );
        assert_eq!(
            AppError::from(ServiceError::InvalidArgument("name".into())).code(),
            "INVALID_ARGUMENT"
        );
        assert_eq!(
            AppError::from(ServiceError::Database(sqlx::Error::PoolClosed)).code(),
            "INTERNAL"
        );
    }
}
