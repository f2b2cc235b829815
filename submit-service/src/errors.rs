use crate::http::json_response;
use contact_store::{Operation, StoreError};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde_json::json;
use thiserror::Error;

/// Reasons a submission is not accepted.
///
/// Rejections are detected locally and reported to the caller as is.
/// [`SubmitError::Store`] and [`SubmitError::Internal`] collapse into a
/// generic server error; their detail only goes to the log.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("missing or incorrect form secret")]
    Unauthorized,

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing required fields")]
    MissingFields,

    #[error("{} failed: {source}", .operation.as_str())]
    Store {
        operation: Operation,
        source: StoreError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    pub fn store(operation: Operation) -> impl FnOnce(StoreError) -> SubmitError {
        move |source| SubmitError::Store { operation, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            SubmitError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SubmitError::Unauthorized => StatusCode::UNAUTHORIZED,
            SubmitError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            SubmitError::InvalidBody(_) | SubmitError::MissingFields => StatusCode::BAD_REQUEST,
            SubmitError::Store { .. } | SubmitError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message shown to the caller.
    pub fn public_message(&self) -> &'static str {
        match self {
            SubmitError::MethodNotAllowed => "Method not allowed",
            SubmitError::Unauthorized => "Unauthorized",
            SubmitError::PayloadTooLarge(_) => "Payload too large",
            SubmitError::InvalidBody(_) => "Invalid request body",
            SubmitError::MissingFields => "Missing required fields",
            SubmitError::Store { .. } | SubmitError::Internal(_) => "Server error",
        }
    }

    pub fn metric_tag(&self) -> &'static str {
        match self {
            SubmitError::MethodNotAllowed => "method_not_allowed",
            SubmitError::Unauthorized => "unauthorized",
            SubmitError::PayloadTooLarge(_) => "payload_too_large",
            SubmitError::InvalidBody(_) => "invalid_body",
            SubmitError::MissingFields => "missing_fields",
            SubmitError::Store { .. } | SubmitError::Internal(_) => "server_error",
        }
    }

    pub fn into_response(self) -> Response<Bytes> {
        json_response(self.status(), &json!({ "error": self.public_message() }))
    }
}
