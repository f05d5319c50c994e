use thiserror::Error;

use presenca_core::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// Personal resources (history, stats) are readable only by their owner.
pub fn authorize_self(principal: UserId, owner: UserId) -> Result<(), AuthzError> {
    if principal == owner {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(
            "users may only access their own attendance data".to_string(),
        ))
    }
}
