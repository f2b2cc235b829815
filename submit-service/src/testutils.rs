use crate::handler::{FORM_SECRET_HEADER, SubmissionHandler};
use crate::secret::FormSecret;
use contact_store::memory::MemoryStore;
use contact_store::ContactStore;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Response};
use serde_json::Value;
use shared::http::PeerAddr;
use std::sync::Arc;

pub const SECRET: &str = "test-secret";
pub const MAX_BODY_BYTES: usize = 4096;

pub fn handler(store: Arc<dyn ContactStore>) -> SubmissionHandler {
    SubmissionHandler::new(store, FormSecret::new(SECRET), MAX_BODY_BYTES)
}

pub fn memory_handler() -> (Arc<MemoryStore>, SubmissionHandler) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), handler(store))
}

/// An authorized POST carrying `body`, arriving from 192.0.2.10.
pub fn post(body: &Value) -> Request<Full<Bytes>> {
    request(Method::POST, Some(SECRET), body.to_string())
}

pub fn request(
    method: Method,
    secret: Option<&str>,
    body: impl Into<Bytes>,
) -> Request<Full<Bytes>> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/api/submit")
        .header("content-type", "application/json")
        .header("user-agent", "test-agent/1.0");
    if let Some(secret) = secret {
        builder = builder.header(FORM_SECRET_HEADER, secret);
    }
    let mut request = builder.body(Full::new(body.into())).unwrap();
    request
        .extensions_mut()
        .insert(PeerAddr("192.0.2.10:40000".parse().unwrap()));
    request
}

pub fn json_body(response: &Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}
