//! Client side of the contact database: the [`ContactStore`] trait the
//! submission pipeline talks to, and its implementations.

pub mod config;
pub mod memory;
pub mod postgrest;
pub mod types;

#[cfg(test)]
mod testutils;

use async_trait::async_trait;
use config::{StoreConfig, StoreType};
use std::sync::Arc;
use std::time::Duration;
use types::{Contact, ContactId, ContactPatch, NewContact, NewSubmission, Preferences};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("{table}: request rejected with status {status}: {message}")]
    Api {
        table: &'static str,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("{table}: uniqueness conflict: {message}")]
    Conflict {
        table: &'static str,
        message: String,
    },

    #[error("{table}: unexpected response: {reason}")]
    UnexpectedResponse {
        table: &'static str,
        reason: String,
    },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("store misconfigured: {0}")]
    Misconfigured(String),

    #[error("store unavailable during {0}")]
    Unavailable(&'static str),
}

/// PostgREST code for "the result contains 0 rows" on single-object reads.
pub const NO_ROWS_CODE: &str = "PGRST116";

/// PostgreSQL SQLSTATE for unique_violation.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

impl StoreError {
    /// A lookup that found nothing. Callers treat this as "no existing record".
    pub fn is_no_rows(&self) -> bool {
        matches!(self, StoreError::Api { code: Some(code), .. } if code == NO_ROWS_CODE)
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Store operations, used to label errors and metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    FindContact,
    InsertContact,
    UpdateContact,
    FindPreferences,
    InsertPreferences,
    UpdatePreferences,
    InsertSubmission,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::FindContact => "find_contact",
            Operation::InsertContact => "insert_contact",
            Operation::UpdateContact => "update_contact",
            Operation::FindPreferences => "find_preferences",
            Operation::InsertPreferences => "insert_preferences",
            Operation::UpdatePreferences => "update_preferences",
            Operation::InsertSubmission => "insert_submission",
        }
    }
}

/// The `contacts`, `preferences` and `submissions` tables.
///
/// Uniqueness of contacts by email and by phone is enforced by the store; an
/// insert that would violate it fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// First contact whose email or phone matches, in id order.
    async fn find_contact(&self, email: &str, phone_e164: &str)
    -> Result<Option<Contact>, StoreError>;

    async fn insert_contact(&self, contact: &NewContact) -> Result<Contact, StoreError>;

    async fn update_contact(
        &self,
        id: &ContactId,
        patch: &ContactPatch,
    ) -> Result<Contact, StoreError>;

    async fn preferences_exist(&self, contact_id: &ContactId) -> Result<bool, StoreError>;

    async fn insert_preferences(&self, preferences: &Preferences) -> Result<(), StoreError>;

    /// Overwrites every preference column of `preferences.contact_id`.
    async fn update_preferences(&self, preferences: &Preferences) -> Result<(), StoreError>;

    async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), StoreError>;
}

/// Builds the configured store. Called once at startup, the result is shared
/// by every request.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn ContactStore>, StoreError> {
    match &config.r#type {
        StoreType::Postgrest {
            url,
            service_key,
            timeout_secs,
        } => {
            let url = url
                .as_ref()
                .ok_or_else(|| StoreError::Misconfigured("missing store url".into()))?;
            let service_key = service_key
                .as_deref()
                .ok_or_else(|| StoreError::Misconfigured("missing service key".into()))?;
            let store =
                postgrest::PostgrestStore::new(url, service_key, timeout_secs.map(Duration::from_secs))?;
            Ok(Arc::new(store))
        }
        StoreType::Memory => {
            tracing::warn!(
                "Using the in-memory contact store. Submissions are lost on restart; do not use in production."
            );
            Ok(Arc::new(memory::MemoryStore::new()))
        }
    }
}
