//! Error handler for hiregate.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

use crate::model::{DocumentType, UnknownLabel};

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("error parsing form data")]
    ParsingForm(BoxError),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("registration token has already been used")]
    AlreadyUsed,

    #[error("registration token has expired")]
    Expired,

    #[error("cannot {action} {entity} while it is {current}")]
    InvalidState {
        entity: &'static str,
        current: String,
        action: &'static str,
    },

    #[error("{requested} cannot be submitted yet, next allowed document is {}", .next_allowed.map_or("none", |d| d.as_str()))]
    OutOfOrder {
        requested: DocumentType,
        next_allowed: Option<DocumentType>,
    },

    #[error("{0} already exists")]
    Conflict(String),

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("operation partially applied, {details}")]
    PartialFailure { details: String },

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error(transparent)]
    Mail(#[from] crate::mail::MailError),

    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),

    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error("stored value is corrupted: {0}")]
    Label(#[from] UnknownLabel),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<BoxError>,
    },
}

impl ServerError {
    /// Wrap any error as an internal one.
    pub fn internal<E>(details: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.to_owned(),
            source: Some(Box::new(err)),
        }
    }

    /// Single field validation failure.
    pub fn field(field: &'static str, code: &'static str, message: &str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(
            field,
            validator::ValidationError::new(code).with_message(message.to_owned().into()),
        );
        Self::Validation(errors)
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    fn field_error(mut self, field: &str, message: String) -> Self {
        self.errors = Some(vec![FieldError {
            field: field.to_owned(),
            message,
        }]);
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

/// Flatten nested validation errors into dotted paths, e.g.
/// `emergencyContacts[0].phone`.
fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect_errors(None, errors, &mut out);
    out
}

fn collect_errors(prefix: Option<&str>, errors: &ValidationErrors, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{field}"),
            None => field.to_string(),
        };

        match kind {
            ValidationErrorsKind::Field(issues) => {
                out.extend(issues.iter().map(|issue| FieldError {
                    field: path.clone(),
                    message: issue
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| issue.code.to_string()),
                }));
            },
            ValidationErrorsKind::Struct(nested) => collect_errors(Some(&path), nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_errors(Some(&format!("{path}[{index}]")), nested, out);
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => response.errors(validation_errors),

            ServerError::ParsingForm(err) => response
                .title("Server error during data parsing.")
                .details(&err.to_string()),

            ServerError::Axum(err) => response.details(&err.body_text()),

            ServerError::Multipart(err) => response.details(&err.body_text()),

            ServerError::NotFound(_) => response
                .title("Resource not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::AlreadyUsed | ServerError::InvalidState { .. } => response
                .title("Request conflicts with the current state.")
                .status(StatusCode::CONFLICT),

            ServerError::OutOfOrder { next_allowed, .. } => response
                .title("Documents must be submitted in order.")
                .status(StatusCode::CONFLICT)
                .field_error(
                    "documentType",
                    match next_allowed {
                        Some(next) => format!("Next allowed document is {next}."),
                        None => "Every document is already approved.".to_owned(),
                    },
                ),

            ServerError::Conflict(_) => response
                .title("Resource already exists.")
                .status(StatusCode::CONFLICT),

            ServerError::Expired => response
                .title("Registration token has expired.")
                .status(StatusCode::GONE),

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Forbidden(_) => response
                .title("You are not allowed to perform this action.")
                .status(StatusCode::FORBIDDEN),

            ServerError::PartialFailure { details } => {
                tracing::error!(%details, "operation left partial writes behind");

                ResponseError::default()
                    .title("Operation partially applied.")
                    .details(details)
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            err => {
                tracing::error!(%err, "server returned 500 status");

                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use validator::Validate;

    #[derive(Debug, Validate)]
    struct Contact {
        #[validate(length(min = 1, message = "Phone is required."))]
        phone: String,
    }

    #[derive(Debug, Validate)]
    struct Form {
        #[validate(length(min = 1, message = "First name is required."))]
        first_name: String,
        #[validate(nested)]
        contacts: Vec<Contact>,
    }

    async fn body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_nested_validation_errors_are_flattened() {
        let form = Form {
            first_name: String::new(),
            contacts: vec![Contact { phone: "1".into() }, Contact { phone: String::new() }],
        };
        let err = ServerError::from(form.validate().unwrap_err());
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body(response).await;
        let fields: Vec<_> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap().to_owned())
            .collect();
        assert!(fields.contains(&"first_name".to_owned()));
        assert!(fields.contains(&"contacts[1].phone".to_owned()));
    }

    #[tokio::test]
    async fn test_state_errors_map_to_distinct_statuses() {
        let cases = [
            (ServerError::NotFound("registration token"), StatusCode::NOT_FOUND),
            (ServerError::AlreadyUsed, StatusCode::CONFLICT),
            (ServerError::Expired, StatusCode::GONE),
            (ServerError::Forbidden("HR only"), StatusCode::FORBIDDEN),
            (ServerError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ServerError::PartialFailure { details: "token left behind".into() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_out_of_order_names_next_document() {
        let err = ServerError::OutOfOrder {
            requested: DocumentType::I983,
            next_allowed: Some(DocumentType::Receipt),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body(response).await;
        assert_eq!(body["errors"][0]["field"], "documentType");
        assert_eq!(body["errors"][0]["message"], "Next allowed document is RECEIPT.");
    }
}
