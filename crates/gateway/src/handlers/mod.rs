//! API handlers module

pub mod chat;
pub mod conversations;
pub mod health;
pub mod memories;

use flowllm_common::errors::AppError;
use validator::ValidationErrors;

/// Map request validation failures to a 400
pub(crate) fn invalid(errors: ValidationErrors) -> AppError {
    AppError::Validation {
        field: errors.field_errors().keys().next().map(|f| f.to_string()),
        message: errors.to_string(),
    }
}
