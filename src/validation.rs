use crate::error::AppError;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ValidationResponse {
    pub status: String,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error".to_string(),
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }

    pub fn from_validation_errors(errors: &ValidationErrors) -> Self {
        let mut error_map = HashMap::new();

        for (field, field_errors) in errors.field_errors() {
            let error_messages: Vec<String> = field_errors
                .iter()
                .map(|error| {
                    error
                        .message
                        .clone()
                        .unwrap_or_else(|| "Invalid value".into())
                        .to_string()
                })
                .collect();

            error_map.insert(field.to_string(), error_messages);
        }

        Self::new(error_map)
    }
}

pub trait ToValidationResponse {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>>;
}

impl ToValidationResponse for AppError {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>> {
        let status = self.status_code();

        let body = match &self {
            // Server-side failures never leak their cause to the client.
            AppError::Database(_) | AppError::Internal(_) => {
                ValidationResponse::with_error("server", "Internal server error")
            }
            AppError::Authentication(msg) => ValidationResponse::with_error("authentication", msg),
            AppError::Authorization(msg) => ValidationResponse::with_error("permission", msg),
            AppError::NotFound(msg) => ValidationResponse::with_error("resource", msg),
            AppError::Conflict(msg) => ValidationResponse::with_error("resource", msg),
            AppError::Validation { field, message } => {
                ValidationResponse::with_error(field, message)
            }
            AppError::InvalidRequest(errors) => ValidationResponse::from_validation_errors(errors),
        };

        Custom(status, Json(body))
    }
}

impl ToValidationResponse for Status {
    fn to_validation_response(self) -> Custom<Json<ValidationResponse>> {
        let (field, message) = match self.code {
            403 => (
                "permission",
                "You don't have permission to perform this action",
            ),
            401 => ("authentication", "Authentication required"),
            404 => ("resource", "Resource not found"),
            400 => ("request", "Bad request"),
            422 => ("validation", "Validation failed"),
            500 => ("server", "Internal server error"),
            _ => ("error", "An error occurred"),
        };

        Custom(self, Json(ValidationResponse::with_error(field, message)))
    }
}

/// Runs `validator` rules on a JSON body and unwraps it.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner.validate()?;
        Ok(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bodies_name_the_failing_area() {
        let cases = [
            (Status::Unauthorized, "authentication"),
            (Status::Forbidden, "permission"),
            (Status::NotFound, "resource"),
            (Status::BadRequest, "request"),
            (Status::UnprocessableEntity, "validation"),
            (Status::InternalServerError, "server"),
            (Status::ImATeapot, "error"),
        ];

        for (status, field) in cases {
            let Custom(returned, Json(body)) = status.to_validation_response();
            assert_eq!(returned, status);
            assert_eq!(body.status, "error");
            assert!(body.errors.contains_key(field), "{} should use {}", status, field);
        }
    }

    #[test]
    fn test_server_errors_hide_their_cause() {
        let Custom(status, Json(body)) =
            AppError::Internal("disk on fire".to_string()).to_validation_response();

        assert_eq!(status, Status::InternalServerError);
        assert_eq!(body.errors["server"], vec!["Internal server error".to_string()]);
    }
}
