use serde::Deserialize;
use std::fmt;
use url::Url;

#[derive(Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    /// PostgREST endpoint, e.g. a Supabase project.
    Postgrest {
        #[serde(default)]
        url: Option<Url>,
        #[serde(default)]
        service_key: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// Process-local tables. Only suitable for tests and local development.
    Memory,
}

impl Default for StoreType {
    fn default() -> Self {
        StoreType::Postgrest {
            url: None,
            service_key: None,
            timeout_secs: None,
        }
    }
}

impl fmt::Debug for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreType::Postgrest {
                url,
                service_key,
                timeout_secs,
            } => f
                .debug_struct("Postgrest")
                .field("url", &url.as_ref().map(Url::as_str))
                .field("service_key", &service_key.as_ref().map(|_| "<redacted>"))
                .field("timeout_secs", timeout_secs)
                .finish(),
            StoreType::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub r#type: StoreType,
}
