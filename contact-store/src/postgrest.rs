//! [`ContactStore`] over a PostgREST endpoint (`{url}/rest/v1/{table}`), as
//! exposed by Supabase.
//!
//! Every request carries the service key both as `apikey` and as a bearer
//! token. Reads use `limit=1` and return the first row, writes that need the
//! row back ask for `Prefer: return=representation`.

use crate::types::{Contact, ContactId, ContactPatch, NewContact, NewSubmission, Preferences};
use crate::{ContactStore, StoreError, UNIQUE_VIOLATION_CODE};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const CONTACTS: &str = "contacts";
const PREFERENCES: &str = "preferences";
const SUBMISSIONS: &str = "submissions";

const PREFER: &str = "prefer";
const RETURN_REPRESENTATION: &str = "return=representation";
const RETURN_MINIMAL: &str = "return=minimal";

/// Error body returned by PostgREST for failed requests.
#[derive(Deserialize, Debug, Default)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

pub struct PostgrestStore {
    client: reqwest::Client,
    rest_url: Url,
}

impl PostgrestStore {
    pub fn new(
        base_url: &Url,
        service_key: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let rest_url = format!("{}/rest/v1/", base_url.as_str().trim_end_matches('/'));
        let rest_url = Url::parse(&rest_url).map_err(|e| StoreError::InvalidUrl(e.to_string()))?;

        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(service_key)
            .map_err(|_| StoreError::Misconfigured("service key is not a valid header".into()))?;
        api_key.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {service_key}"))
            .map_err(|_| StoreError::Misconfigured("service key is not a valid header".into()))?;
        bearer.set_sensitive(true);
        headers.insert(HeaderName::from_static("apikey"), api_key);
        headers.insert(AUTHORIZATION, bearer);

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(PostgrestStore {
            client: builder.build()?,
            rest_url,
        })
    }

    fn table_url(&self, table: &str) -> Result<Url, StoreError> {
        self.rest_url
            .join(table)
            .map_err(|e| StoreError::InvalidUrl(e.to_string()))
    }

    async fn select_first<T: DeserializeOwned>(
        &self,
        table: &'static str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        let response = self
            .client
            .get(self.table_url(table)?)
            .query(query)
            .query(&[("limit", "1")])
            .send()
            .await?;

        match rows::<T>(table, response).await {
            Ok(rows) => Ok(rows.into_iter().next()),
            Err(e) if e.is_no_rows() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn insert_returning<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &'static str,
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .client
            .post(self.table_url(table)?)
            .header(PREFER, RETURN_REPRESENTATION)
            .json(body)
            .send()
            .await?;

        single_row(table, response).await
    }

    async fn insert<B: Serialize>(&self, table: &'static str, body: &B) -> Result<(), StoreError> {
        let response = self
            .client
            .post(self.table_url(table)?)
            .header(PREFER, RETURN_MINIMAL)
            .json(body)
            .send()
            .await?;

        check_status(table, response).await.map(|_| ())
    }

    async fn update_returning<B: Serialize, T: DeserializeOwned>(
        &self,
        table: &'static str,
        filter: (&str, String),
        body: &B,
    ) -> Result<T, StoreError> {
        let response = self
            .client
            .patch(self.table_url(table)?)
            .query(&[filter])
            .header(PREFER, RETURN_REPRESENTATION)
            .json(body)
            .send()
            .await?;

        single_row(table, response).await
    }

    async fn update<B: Serialize>(
        &self,
        table: &'static str,
        filter: (&str, String),
        body: &B,
    ) -> Result<(), StoreError> {
        let response = self
            .client
            .patch(self.table_url(table)?)
            .query(&[filter])
            .header(PREFER, RETURN_MINIMAL)
            .json(body)
            .send()
            .await?;

        check_status(table, response).await.map(|_| ())
    }
}

#[async_trait]
impl ContactStore for PostgrestStore {
    async fn find_contact(
        &self,
        email: &str,
        phone_e164: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let query = [
            ("select", "*".to_string()),
            ("or", contact_match_filter(email, phone_e164)),
            ("order", "id.asc".to_string()),
        ];
        self.select_first(CONTACTS, &query).await
    }

    async fn insert_contact(&self, contact: &NewContact) -> Result<Contact, StoreError> {
        self.insert_returning(CONTACTS, contact).await
    }

    async fn update_contact(
        &self,
        id: &ContactId,
        patch: &ContactPatch,
    ) -> Result<Contact, StoreError> {
        self.update_returning(CONTACTS, ("id", eq(id)), patch).await
    }

    async fn preferences_exist(&self, contact_id: &ContactId) -> Result<bool, StoreError> {
        let query = [
            ("select", "contact_id".to_string()),
            ("contact_id", eq(contact_id)),
        ];
        let found: Option<IgnoredAny> = self.select_first(PREFERENCES, &query).await?;
        Ok(found.is_some())
    }

    async fn insert_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.insert(PREFERENCES, preferences).await
    }

    async fn update_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.update(
            PREFERENCES,
            ("contact_id", eq(&preferences.contact_id)),
            &preferences.settings,
        )
        .await
    }

    async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), StoreError> {
        self.insert(SUBMISSIONS, submission).await
    }
}

fn eq(id: &ContactId) -> String {
    format!("eq.{id}")
}

/// `or` filter matching either column. Values are always double quoted so that
/// PostgREST reserved characters (`,`, `.`, `(`, `)`) inside them are literal.
fn contact_match_filter(email: &str, phone_e164: &str) -> String {
    format!(
        "(email.eq.{},phone_e164.eq.{})",
        quote(email),
        quote(phone_e164)
    )
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

async fn check_status(
    table: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let mut message = body.message.unwrap_or(text);
    if let Some(details) = body.details {
        message = format!("{message} ({details})");
    }

    if status == StatusCode::CONFLICT || body.code.as_deref() == Some(UNIQUE_VIOLATION_CODE) {
        return Err(StoreError::Conflict { table, message });
    }

    Err(StoreError::Api {
        table,
        status: status.as_u16(),
        code: body.code,
        message,
    })
}

async fn rows<T: DeserializeOwned>(
    table: &'static str,
    response: reqwest::Response,
) -> Result<Vec<T>, StoreError> {
    let response = check_status(table, response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::UnexpectedResponse {
        table,
        reason: e.to_string(),
    })
}

async fn single_row<T: DeserializeOwned>(
    table: &'static str,
    response: reqwest::Response,
) -> Result<T, StoreError> {
    let mut rows = rows::<T>(table, response).await?;
    match rows.len() {
        1 => Ok(rows.remove(0)),
        n => Err(StoreError::UnexpectedResponse {
            table,
            reason: format!("expected exactly one row, got {n}"),
        }),
    }
}
