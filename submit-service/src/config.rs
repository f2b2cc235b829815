use crate::secret::FormSecret;
use contact_store::config::{StoreConfig, StoreType};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Environment variables that take precedence over the config file.
pub const FORM_SECRET_ENV: &str = "FORM_SECRET";
pub const STORE_URL_ENV: &str = "SUPABASE_URL";
pub const STORE_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Submission path must start with '/': {0}")]
    InvalidPath(String),

    #[error("Body size limit cannot be 0")]
    InvalidBodyLimit,

    #[error("No form secret configured (set FORM_SECRET)")]
    MissingFormSecret,

    #[error("No store url configured (set SUPABASE_URL)")]
    MissingStoreUrl,

    #[error("No store service key configured (set SUPABASE_SERVICE_ROLE_KEY)")]
    MissingServiceKey,

    #[error("Invalid store url: {0}")]
    InvalidStoreUrl(String),
}

/// Submission service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for form submissions
    #[serde(default)]
    pub listener: Listener,
    /// Listener for health and readiness probes
    #[serde(default = "Listener::admin")]
    pub admin_listener: Listener,
    /// Path the form posts to
    #[serde(default = "default_path")]
    pub path: String,
    /// Requests with larger bodies are rejected with 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub form_secret: Option<FormSecret>,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_path() -> String {
    "/api/submit".into()
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: Listener::admin(),
            path: default_path(),
            max_body_bytes: default_max_body_bytes(),
            form_secret: None,
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    /// Overrides secrets and the store endpoint from the environment.
    ///
    /// `lookup` is `std::env::var` in production; unset or empty variables
    /// leave the file values in place.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(secret) = lookup(FORM_SECRET_ENV) {
            self.form_secret = Some(FormSecret::new(secret));
        }

        if let StoreType::Postgrest {
            url, service_key, ..
        } = &mut self.store.r#type
        {
            if let Some(raw) = lookup(STORE_URL_ENV) {
                let parsed =
                    Url::parse(&raw).map_err(|e| ValidationError::InvalidStoreUrl(e.to_string()))?;
                *url = Some(parsed);
            }
            if let Some(key) = lookup(STORE_KEY_ENV) {
                *service_key = Some(key);
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !self.path.starts_with('/') {
            return Err(ValidationError::InvalidPath(self.path.clone()));
        }

        if self.max_body_bytes == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        match &self.form_secret {
            Some(secret) if !secret.is_empty() => {}
            _ => return Err(ValidationError::MissingFormSecret),
        }

        if let StoreType::Postgrest {
            url, service_key, ..
        } = &self.store.r#type
        {
            if url.is_none() {
                return Err(ValidationError::MissingStoreUrl);
            }
            if service_key.as_deref().is_none_or(str::is_empty) {
                return Err(ValidationError::MissingServiceKey);
            }
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}

impl Listener {
    fn admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3001,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}
