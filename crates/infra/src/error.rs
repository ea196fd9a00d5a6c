use thiserror::Error;

use warden_auth::{CredentialError, LoginError, PasswordError, TokenError};
use warden_core::DomainError;

use crate::store::StoreError;

/// Error returned by the auth services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Login(#[from] LoginError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => ServiceError::Domain(e),
            StoreError::Storage(msg) => ServiceError::Storage(msg),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
