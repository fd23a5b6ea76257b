use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_REQUESTS", message)
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::DomainError;

        match error {
            AppErr::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid credentials.",
            ),
            AppErr::Forbidden => ApiError::forbidden("You do not have access to this resource."),
            AppErr::NotFound => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Resource not found.")
            }
            AppErr::EmailAlreadyExists => ApiError::new(
                StatusCode::CONFLICT,
                "EMAIL_ALREADY_EXISTS",
                "Email is already registered.",
            ),
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                format!("{}: {}", field, reason),
            ),
            AppErr::Repository(err) => {
                tracing::error!(error = %err, "repository failure");
                ApiError::internal_server_error("Internal server error.")
            }
            AppErr::Password(err) => {
                tracing::error!(error = %err, "password hasher failure");
                ApiError::internal_server_error("Internal server error.")
            }
            AppErr::Token(err) => {
                tracing::error!(error = %err, "token issuance failure");
                ApiError::internal_server_error("Internal server error.")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_errors_map_to_statuses() {
        let cases = [
            (ApplicationError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ApplicationError::Forbidden, StatusCode::FORBIDDEN),
            (ApplicationError::NotFound, StatusCode::NOT_FOUND),
            (ApplicationError::EmailAlreadyExists, StatusCode::CONFLICT),
            (
                ApplicationError::Domain(domain::DomainError::invalid_argument("email", "bad")),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApplicationError::Repository(domain::RepositoryError::storage("down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }
}
