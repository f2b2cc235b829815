pub mod config;
pub mod errors;
pub mod handler;
pub mod http;
pub mod metrics_defs;
pub mod normalize;
pub mod request;
pub mod secret;
#[cfg(test)]
mod testutils;

use crate::config::{Config, ValidationError};
use crate::handler::SubmissionHandler;
use crate::http::json_response;
use contact_store::{StoreError, build_store};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use shared::admin_service::AdminService;
use shared::http::{full_body, run_http_service};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum IntakeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("contact store: {0}")]
    Store(#[from] StoreError),
}

/// Serves the submission endpoint and the admin probes until either
/// listener fails.
pub async fn run(config: Config) -> Result<(), IntakeError> {
    config.validate()?;
    shared::metrics_defs::describe_all(metrics_defs::ALL_METRICS);

    let store = build_store(&config.store)?;
    // Validation guarantees a secret is present.
    let secret = config
        .form_secret
        .clone()
        .ok_or(ValidationError::MissingFormSecret)?;
    let handler = SubmissionHandler::new(store, secret, config.max_body_bytes);
    let intake_service = IntakeService::new(handler, &config.path);

    // The store client is built before anything listens, so readiness only
    // depends on the admin listener being up.
    let admin_service = AdminService::<_, IntakeError>::new(|| true);

    let intake_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        intake_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(intake_task, admin_task)?;
    Ok(())
}

/// Routes the configured path to the [`SubmissionHandler`]. Every other path
/// is answered with 404.
pub struct IntakeService {
    handler: Arc<SubmissionHandler>,
    path: String,
}

impl IntakeService {
    pub fn new(handler: SubmissionHandler, path: &str) -> Self {
        Self {
            handler: Arc::new(handler),
            path: normalize_path(path).to_string(),
        }
    }
}

fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

impl Service<Request<Incoming>> for IntakeService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = IntakeError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        if normalize_path(req.uri().path()) != self.path {
            tracing::debug!(path = req.uri().path(), "no route");
            let response = json_response(StatusCode::NOT_FOUND, &json!({"error": "Not found"}));
            return Box::pin(async move { Ok(response.map(|body| full_body(body))) });
        }

        let handler = self.handler.clone();
        Box::pin(async move {
            let response = handler.handle(req).await;
            Ok(response.map(|body| full_body(body)))
        })
    }
}
