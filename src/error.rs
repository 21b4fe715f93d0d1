use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use crate::users::repo::StoreError;
use crate::users::validation::{FieldError, ValidationError};

/// Startup problems: bad settings, weak secrets, route collisions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("secret {key} is too weak: {reason}")]
    WeakSecret { key: String, reason: String },
    #[error("route group {group} has a malformed prefix {prefix:?}")]
    BadPrefix { group: &'static str, prefix: String },
    #[error("path {path} is claimed by both {first} and {second}")]
    DuplicatePath {
        path: String,
        first: &'static str,
        second: &'static str,
    },
    #[error("a users api is already installed")]
    AlreadyInstalled,
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user not found")]
    NotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthenticated,
    #[error("user is inactive")]
    Inactive,
    #[error("user is not verified")]
    Unverified,
    #[error("insufficient privileges")]
    Forbidden,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("user is already verified")]
    AlreadyVerified,
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub(crate) fn internal(e: impl Into<anyhow::Error>) -> Self {
        AuthError::Internal(e.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "ValidationError",
            AuthError::DuplicateEmail => "DuplicateEmail",
            AuthError::NotFound => "NotFound",
            AuthError::InvalidCredentials => "InvalidCredentials",
            AuthError::Unauthenticated => "Unauthenticated",
            AuthError::Inactive => "Inactive",
            AuthError::Unverified => "Unverified",
            AuthError::Forbidden => "Forbidden",
            AuthError::InvalidToken => "InvalidToken",
            AuthError::AlreadyVerified => "AlreadyVerified",
            AuthError::Configuration(_) => "ConfigError",
            AuthError::Storage(_) => "StorageError",
            AuthError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::InvalidToken
            | AuthError::AlreadyVerified => StatusCode::BAD_REQUEST,
            AuthError::DuplicateEmail => StatusCode::CONFLICT,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::InvalidCredentials | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AuthError::Inactive | AuthError::Unverified | AuthError::Forbidden => {
                StatusCode::FORBIDDEN
            }
            AuthError::Configuration(_) | AuthError::Storage(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            StoreError::Backend(e) => AuthError::Storage(e),
        }
    }
}

/// Request fields a body rejection may name; anything else reads as `body`.
const BODY_FIELDS: [&str; 6] = [
    "email",
    "password",
    "token",
    "is_active",
    "is_superuser",
    "is_verified",
];

fn field_error(field: &'static str, message: &str) -> FieldError {
    FieldError {
        field,
        message: message.to_string(),
    }
}

fn body_field(name: &str) -> &'static str {
    BODY_FIELDS
        .iter()
        .find(|f| **f == name.trim())
        .copied()
        .unwrap_or("body")
}

/// Names the offending field without echoing serde's text.
fn data_error_field(text: &str) -> FieldError {
    let detail = text
        .split_once("target type: ")
        .map(|(_, d)| d)
        .unwrap_or(text);
    if let Some((_, rest)) = detail.split_once("missing field `") {
        let name = rest.split('`').next().unwrap_or_default();
        return field_error(body_field(name), "is required");
    }
    match detail.split_once(": ").map(|(path, _)| body_field(path)) {
        Some("body") | None => field_error("body", "does not match the expected shape"),
        Some(field) => field_error(field, "has the wrong type"),
    }
}

impl From<JsonRejection> for AuthError {
    fn from(rejection: JsonRejection) -> Self {
        let field = match &rejection {
            JsonRejection::JsonDataError(e) => data_error_field(&e.body_text()),
            JsonRejection::JsonSyntaxError(_) => field_error("body", "is not valid JSON"),
            JsonRejection::MissingJsonContentType(_) => {
                field_error("body", "must be sent as application/json")
            }
            _ => field_error("body", "could not be read"),
        };
        debug!(rejection = %rejection, "request body rejected");
        AuthError::Validation(ValidationError {
            fields: vec![field],
        })
    }
}

impl From<PathRejection> for AuthError {
    fn from(rejection: PathRejection) -> Self {
        debug!(rejection = %rejection, "request path rejected");
        AuthError::Validation(ValidationError {
            fields: vec![field_error("id", "must be a UUID")],
        })
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            // details stay in the log
            error!(error = ?self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "kind": self.kind(),
            "message": message,
            "status": status.as_u16(),
        });
        if let AuthError::Validation(v) = &self {
            body["fields"] = json!(v.fields);
        }

        (status, Json(json!({ "error": body }))).into_response()
    }
}
