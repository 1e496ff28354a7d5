// Principal lookup and credential verification for the file endpoint

pub mod authenticator;
pub mod cache;
pub mod directory;

pub use authenticator::{Authenticator, DirectoryAuthenticator};
pub use cache::{CachedDirectory, PrincipalCache};
pub use directory::{MemoryDirectory, PrincipalDirectory};

use axum::http::StatusCode;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthError {
    InvalidCredentials,
    Disabled,
    PrincipalNotFound,
    Backend(String),
}

impl AuthError {
    pub fn to_status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::Disabled => StatusCode::FORBIDDEN,
            AuthError::PrincipalNotFound => StatusCode::NOT_FOUND,
            AuthError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::Disabled => write!(f, "Account disabled"),
            AuthError::PrincipalNotFound => write!(f, "Principal not found"),
            AuthError::Backend(msg) => write!(f, "Authentication backend error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}
