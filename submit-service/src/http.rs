use crate::errors::SubmitError;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Response, StatusCode};
use serde_json::Value;
use shared::http::PeerAddr;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

pub fn json_response(status: StatusCode, value: &Value) -> Response<Bytes> {
    let mut response = Response::new(Bytes::from(value.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Reads the whole body, failing with [`SubmitError::PayloadTooLarge`] as
/// soon as more than `limit` bytes arrive.
pub async fn read_body<B>(headers: &HeaderMap, body: B, limit: usize) -> Result<Bytes, SubmitError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(SubmitError::PayloadTooLarge(limit));
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(SubmitError::PayloadTooLarge(limit))
        }
        Err(e) => Err(SubmitError::Internal(format!("failed to read body: {e}"))),
    }
}

/// Parses the body as a JSON object. An empty body counts as `{}`.
pub fn parse_json_object(body: &[u8]) -> Result<Value, SubmitError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| SubmitError::InvalidBody(e.to_string()))?;
    if !value.is_object() {
        return Err(SubmitError::InvalidBody("body is not a JSON object".into()));
    }
    Ok(value)
}

/// Client address: the first `x-forwarded-for` entry if there is one,
/// otherwise the address of the connection.
pub fn client_ip(headers: &HeaderMap, peer: Option<&PeerAddr>) -> Option<String> {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    match forwarded {
        Some(ip) => Some(ip.to_string()),
        None => peer.map(|p| p.0.ip().to_string()),
    }
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}
