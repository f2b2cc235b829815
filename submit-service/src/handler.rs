use crate::errors::SubmitError;
use crate::http::{client_ip, json_response, parse_json_object, read_body, user_agent};
use crate::metrics_defs::{BOT_DROPPED, STORE_ERRORS, SUBMIT_DURATION, SUBMIT_REQUESTS};
use crate::normalize::{contact_fields, preference_settings, source};
use crate::request::{SubmissionRequest, honeypot_tripped};
use crate::secret::FormSecret;
use contact_store::types::{
    Contact, ContactId, ContactPatch, NewContact, NewSubmission, Preferences,
};
use contact_store::{ContactStore, Operation};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use shared::http::PeerAddr;
use std::sync::Arc;
use std::time::Instant;

pub const FORM_SECRET_HEADER: &str = "x-form-secret";

enum Outcome {
    BotDropped,
    Accepted(ContactId),
}

/// Accepts one form submission at a time.
///
/// A submission is admitted (method, secret, body, honeypot), normalized,
/// matched against an existing contact or stored as a new one, and its
/// preferences are written in full. Finally the raw body is appended to the
/// submissions log. Store calls run one after another and nothing is retried.
pub struct SubmissionHandler {
    store: Arc<dyn ContactStore>,
    secret: FormSecret,
    max_body_bytes: usize,
}

impl SubmissionHandler {
    pub fn new(store: Arc<dyn ContactStore>, secret: FormSecret, max_body_bytes: usize) -> Self {
        Self {
            store,
            secret,
            max_body_bytes,
        }
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Response<Bytes>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();

        let (outcome, response) = match self.process(request).await {
            Ok(Outcome::BotDropped) => {
                shared::counter!(BOT_DROPPED).increment(1);
                ("bot_dropped", json_response(StatusCode::OK, &json!({"ok": true})))
            }
            Ok(Outcome::Accepted(contact_id)) => (
                "accepted",
                json_response(
                    StatusCode::OK,
                    &json!({"ok": true, "contact_id": contact_id}),
                ),
            ),
            Err(err) => {
                log_failure(&err);
                (err.metric_tag(), err.into_response())
            }
        };

        shared::counter!(SUBMIT_REQUESTS, "outcome" => outcome).increment(1);
        shared::histogram!(SUBMIT_DURATION, "outcome" => outcome)
            .record(start.elapsed().as_secs_f64());
        response
    }

    async fn process<B>(&self, request: Request<B>) -> Result<Outcome, SubmitError>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();

        if parts.method != Method::POST {
            return Err(SubmitError::MethodNotAllowed);
        }

        let authorized = parts
            .headers
            .get(FORM_SECRET_HEADER)
            .is_some_and(|value| self.secret.matches(value.as_bytes()));
        if !authorized {
            return Err(SubmitError::Unauthorized);
        }

        let raw = read_body(&parts.headers, body, self.max_body_bytes).await?;
        let payload = parse_json_object(&raw)?;
        if honeypot_tripped(&payload) {
            tracing::debug!("honeypot filled in, dropping submission");
            return Ok(Outcome::BotDropped);
        }

        let request = SubmissionRequest::deserialize(&payload)
            .map_err(|e| SubmitError::InvalidBody(e.to_string()))?;

        let incoming = contact_fields(&request)?;
        let contact = self.resolve_contact(&incoming).await?;

        let preferences = Preferences {
            contact_id: contact.id.clone(),
            settings: preference_settings(request.prefs.as_ref()),
        };
        self.upsert_preferences(&preferences).await?;

        let submission = NewSubmission {
            contact_id: contact.id.clone(),
            source: source(request.source.as_deref()),
            ip: client_ip(&parts.headers, parts.extensions.get::<PeerAddr>()),
            user_agent: user_agent(&parts.headers),
            payload,
        };
        self.store
            .insert_submission(&submission)
            .await
            .map_err(SubmitError::store(Operation::InsertSubmission))?;

        tracing::debug!(contact_id = %contact.id, source = %submission.source, "submission logged");
        Ok(Outcome::Accepted(contact.id))
    }

    async fn find_contact(&self, incoming: &NewContact) -> Result<Option<Contact>, SubmitError> {
        self.store
            .find_contact(&incoming.email, &incoming.phone_e164)
            .await
            .map_err(SubmitError::store(Operation::FindContact))
    }

    /// Existing contact with missing fields filled in, or a newly created one.
    async fn resolve_contact(&self, incoming: &NewContact) -> Result<Contact, SubmitError> {
        let existing = match self.find_contact(incoming).await? {
            Some(contact) => contact,
            None => match self.store.insert_contact(incoming).await {
                Ok(created) => {
                    tracing::debug!(contact_id = %created.id, "contact created");
                    return Ok(created);
                }
                // Someone else created it between our lookup and insert.
                Err(e) if e.is_conflict() => match self.find_contact(incoming).await? {
                    Some(contact) => {
                        tracing::debug!(contact_id = %contact.id, "contact created concurrently");
                        contact
                    }
                    None => return Err(SubmitError::store(Operation::InsertContact)(e)),
                },
                Err(e) => return Err(SubmitError::store(Operation::InsertContact)(e)),
            },
        };

        let patch = backfill(&existing, incoming);
        if patch.is_empty() {
            return Ok(existing);
        }

        tracing::debug!(contact_id = %existing.id, "back-filling contact");
        self.store
            .update_contact(&existing.id, &patch)
            .await
            .map_err(SubmitError::store(Operation::UpdateContact))
    }

    async fn upsert_preferences(&self, preferences: &Preferences) -> Result<(), SubmitError> {
        let exists = self
            .store
            .preferences_exist(&preferences.contact_id)
            .await
            .map_err(SubmitError::store(Operation::FindPreferences))?;

        if !exists {
            match self.store.insert_preferences(preferences).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    tracing::debug!(contact_id = %preferences.contact_id, "preferences created concurrently");
                }
                Err(e) => return Err(SubmitError::store(Operation::InsertPreferences)(e)),
            }
        }

        self.store
            .update_preferences(preferences)
            .await
            .map_err(SubmitError::store(Operation::UpdatePreferences))
    }
}

/// Fields of `incoming` that `existing` lacks. Stored values are never
/// replaced.
pub fn backfill(existing: &Contact, incoming: &NewContact) -> ContactPatch {
    fn missing(stored: &Option<String>, new: &str) -> Option<String> {
        let absent = stored.as_deref().is_none_or(str::is_empty);
        (absent && !new.is_empty()).then(|| new.to_string())
    }

    ContactPatch {
        email: missing(&existing.email, &incoming.email),
        phone_e164: missing(&existing.phone_e164, &incoming.phone_e164),
        first_name: missing(&existing.first_name, &incoming.first_name),
        last_name: missing(&existing.last_name, &incoming.last_name),
    }
}

fn log_failure(err: &SubmitError) {
    match err {
        SubmitError::Store { operation, source } => {
            shared::counter!(STORE_ERRORS, "operation" => operation.as_str()).increment(1);
            tracing::error!(
                operation = operation.as_str(),
                error = source as &dyn std::error::Error,
                "contact store call failed"
            );
        }
        SubmitError::Internal(reason) => {
            tracing::error!(%reason, "submission failed");
        }
        rejection => {
            tracing::warn!(reason = %rejection, "submission rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{SECRET, json_body, memory_handler, post, request};
    use async_trait::async_trait;
    use contact_store::StoreError;
    use contact_store::memory::MemoryStore;
    use contact_store::types::{Channel, Frequency, PreferenceSettings};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn jane() -> Value {
        json!({
            "first": "Jane",
            "last": "Doe",
            "email": "JANE@X.COM",
            "phone": "(555) 123-4567",
            "prefs": {"updates": true, "frequency": "weekly", "channels": ["email", "sms", "x"]},
            "source": "landing-page",
        })
    }

    #[tokio::test]
    async fn test_new_contact_end_to_end() {
        let (store, handler) = memory_handler();

        let response = handler.handle(post(&jane())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(&response);
        assert_eq!(body["ok"], json!(true));

        let contacts = store.contacts();
        assert_eq!(contacts.len(), 1);
        let contact = &contacts[0];
        assert_eq!(body["contact_id"], json!(contact.id));
        assert_eq!(contact.email.as_deref(), Some("jane@x.com"));
        assert_eq!(contact.phone_e164.as_deref(), Some("+15551234567"));
        assert_eq!(contact.first_name.as_deref(), Some("Jane"));
        assert_eq!(contact.last_name.as_deref(), Some("Doe"));

        let preferences = store.preferences(&contact.id).unwrap();
        assert_eq!(
            preferences.settings,
            PreferenceSettings {
                updates: true,
                frequency: Frequency::Weekly,
                channels: vec![Channel::Email, Channel::Sms],
                ..Default::default()
            }
        );

        let submissions = store.submissions();
        assert_eq!(submissions.len(), 1);
        let submission = &submissions[0];
        assert_eq!(submission.contact_id, contact.id);
        assert_eq!(submission.source, "landing-page");
        assert_eq!(submission.ip.as_deref(), Some("192.0.2.10"));
        assert_eq!(submission.user_agent, "test-agent/1.0");
        assert_eq!(submission.payload, jane());
    }

    #[tokio::test]
    async fn test_identical_submission_is_idempotent() {
        let (store, handler) = memory_handler();

        let first = json_body(&handler.handle(post(&jane())).await);
        let second = json_body(&handler.handle(post(&jane())).await);

        assert_eq!(first["contact_id"], second["contact_id"]);
        assert_eq!(store.contacts().len(), 1);
        assert_eq!(store.contact_updates(), 0);
        assert_eq!(store.submissions().len(), 2);
    }

    #[tokio::test]
    async fn test_match_by_phone_backfills_without_overwriting() {
        let (store, handler) = memory_handler();
        handler.handle(post(&jane())).await;

        // Same phone, different email and names.
        let response = handler
            .handle(post(&json!({
                "first": "Janet",
                "last": "Smith",
                "email": "janet@y.com",
                "phone": "555-123-4567",
            })))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let contacts = store.contacts();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].email.as_deref(), Some("jane@x.com"));
        assert_eq!(contacts[0].first_name.as_deref(), Some("Jane"));
        assert_eq!(contacts[0].last_name.as_deref(), Some("Doe"));
        assert_eq!(store.contact_updates(), 0);
    }

    #[test]
    fn test_backfill_only_fills_empty_fields() {
        let existing = Contact {
            id: ContactId::Int(7),
            email: Some("jane@x.com".into()),
            phone_e164: None,
            first_name: Some(String::new()),
            last_name: Some("Doe".into()),
        };
        let incoming = NewContact {
            email: "other@x.com".into(),
            phone_e164: "+15551234567".into(),
            first_name: "Jane".into(),
            last_name: "Smith".into(),
        };

        assert_eq!(
            backfill(&existing, &incoming),
            ContactPatch {
                phone_e164: Some("+15551234567".into()),
                first_name: Some("Jane".into()),
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_existing_contact_is_backfilled() {
        let store = Arc::new(MemoryStore::new());
        // A contact created elsewhere, without a last name.
        let existing = store
            .insert_contact(&NewContact {
                email: "jane@x.com".into(),
                phone_e164: String::new(),
                first_name: "Jane".into(),
                last_name: String::new(),
            })
            .await
            .unwrap();
        let handler = crate::testutils::handler(store.clone());

        let body = json_body(&handler.handle(post(&jane())).await);
        assert_eq!(body["contact_id"], json!(existing.id));

        let contact = store.contact(&existing.id).unwrap();
        assert_eq!(contact.phone_e164.as_deref(), Some("+15551234567"));
        assert_eq!(contact.last_name.as_deref(), Some("Doe"));
        assert_eq!(contact.first_name.as_deref(), Some("Jane"));
        assert_eq!(store.contact_updates(), 1);
    }

    #[tokio::test]
    async fn test_preferences_are_replaced_in_full() {
        let (store, handler) = memory_handler();
        let mut body = jane();
        body["prefs"] = json!({
            "thrive_invites": true,
            "friday_reminders": true,
            "real_insights": true,
            "frequency": "monthly",
            "channels": ["app"],
        });
        handler.handle(post(&body)).await;

        body["prefs"] = json!({"updates": true});
        let response = json_body(&handler.handle(post(&body)).await);

        let contact_id: ContactId = serde_json::from_value(response["contact_id"].clone()).unwrap();
        assert_eq!(
            store.preferences(&contact_id).unwrap().settings,
            PreferenceSettings {
                updates: true,
                ..Default::default()
            }
        );
    }

    #[tokio::test]
    async fn test_honeypot_creates_nothing() {
        let (store, handler) = memory_handler();
        let mut body = jane();
        body["honeypot"] = json!("https://spam.example");

        let response = handler.handle(post(&body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(&response), json!({"ok": true}));
        assert!(store.contacts().is_empty());
        assert!(store.submissions().is_empty());

        body["honeypot"] = json!(true);
        handler.handle(post(&body)).await;
        assert!(store.contacts().is_empty());

        // An empty honeypot is what humans send.
        body["honeypot"] = json!("");
        let response = json_body(&handler.handle(post(&body)).await);
        assert!(response.get("contact_id").is_some());
    }

    #[tokio::test]
    async fn test_honeypot_wins_over_bad_fields() {
        let (store, handler) = memory_handler();

        for body in [
            json!({"honeypot": "spam", "first": 12}),
            json!({"honeypot": 1}),
            json!({"honeypot": {"url": "x"}, "prefs": "weekly", "phone": false}),
        ] {
            let response = handler.handle(post(&body)).await;
            assert_eq!(response.status(), StatusCode::OK, "{body}");
            assert_eq!(json_body(&response), json!({"ok": true}));
        }
        assert!(store.contacts().is_empty());
        assert!(store.submissions().is_empty());

        // Falsy values are what a human's browser sends.
        let mut body = jane();
        body["honeypot"] = json!(0);
        let response = json_body(&handler.handle(post(&body)).await);
        assert!(response.get("contact_id").is_some());
    }

    #[tokio::test]
    async fn test_loosely_typed_fields_are_coerced() {
        let (store, handler) = memory_handler();
        let mut body = jane();
        body["prefs"] = json!({"channels": "email", "updates": 1, "thrive_invites": "", "frequency": 3});

        let response = handler.handle(post(&body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let contact_id: ContactId =
            serde_json::from_value(json_body(&response)["contact_id"].clone()).unwrap();
        assert_eq!(
            store.preferences(&contact_id).unwrap().settings,
            PreferenceSettings {
                updates: true,
                ..Default::default()
            }
        );

        // A non-string name counts as missing rather than malformed.
        let mut body = jane();
        body["first"] = json!(12);
        let response = handler.handle(post(&body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&response), json!({"error": "Missing required fields"}));

        // Non-object prefs reset everything to the defaults.
        let mut body = jane();
        body["prefs"] = json!("weekly");
        handler.handle(post(&body)).await;
        assert_eq!(
            store.preferences(&contact_id).unwrap().settings,
            PreferenceSettings::default()
        );
    }

    #[tokio::test]
    async fn test_missing_phone_is_rejected() {
        let (store, handler) = memory_handler();
        let mut body = jane();
        body["phone"] = json!("555-1234");

        let response = handler.handle(post(&body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(&response), json!({"error": "Missing required fields"}));
        assert!(store.contacts().is_empty());
        assert!(store.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_method_is_checked_first() {
        let (store, handler) = memory_handler();

        let response = handler
            .handle(request(Method::GET, None, jane().to_string()))
            .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json_body(&response), json!({"error": "Method not allowed"}));
        assert!(store.contacts().is_empty());
    }

    #[tokio::test]
    async fn test_secret_is_required() {
        let (store, handler) = memory_handler();

        for secret in [None, Some("wrong"), Some("test-secre"), Some("")] {
            let response = handler
                .handle(request(Method::POST, secret, jane().to_string()))
                .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{secret:?}");
            assert_eq!(json_body(&response), json!({"error": "Unauthorized"}));
        }
        assert!(store.contacts().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_bodies() {
        let (store, handler) = memory_handler();

        for body in ["{oops", "[]", "\"text\"", "null", "42"] {
            let response = handler.handle(request(Method::POST, Some(SECRET), body)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json_body(&response), json!({"error": "Invalid request body"}));
        }

        let response = handler.handle(request(Method::POST, Some(SECRET), "")).await;
        assert_eq!(json_body(&response), json!({"error": "Missing required fields"}));
        assert!(store.contacts().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let (store, handler) = memory_handler();
        let mut body = jane();
        body["source"] = json!("x".repeat(crate::testutils::MAX_BODY_BYTES));

        let response = handler.handle(post(&body)).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(&response), json!({"error": "Payload too large"}));
        assert!(store.contacts().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_generic() {
        for operation in [
            Operation::FindContact,
            Operation::InsertContact,
            Operation::FindPreferences,
            Operation::InsertPreferences,
            Operation::InsertSubmission,
        ] {
            let (store, handler) = memory_handler();
            store.fail_on(operation);

            let response = handler.handle(post(&jane())).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{operation:?}");
            assert_eq!(json_body(&response), json!({"error": "Server error"}));
        }

        // Preferences already exist, so the second submission updates them.
        let (store, handler) = memory_handler();
        assert_eq!(handler.handle(post(&jane())).await.status(), StatusCode::OK);
        store.fail_on(Operation::UpdatePreferences);
        let response = handler.handle(post(&jane())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&response), json!({"error": "Server error"}));
        assert_eq!(store.submissions().len(), 1);

        // An existing contact without a phone needs a back-fill.
        let store = Arc::new(MemoryStore::new());
        store
            .insert_contact(&NewContact {
                email: "jane@x.com".into(),
                phone_e164: String::new(),
                first_name: "Jane".into(),
                last_name: String::new(),
            })
            .await
            .unwrap();
        store.fail_on(Operation::UpdateContact);
        let handler = crate::testutils::handler(store.clone());
        let response = handler.handle(post(&jane())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(&response), json!({"error": "Server error"}));
        assert!(store.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_source_defaults_to_web() {
        let (store, handler) = memory_handler();
        let mut body = jane();
        body["source"] = json!("");
        handler.handle(post(&body)).await;

        body.as_object_mut().unwrap().remove("source");
        handler.handle(post(&body)).await;

        let sources: Vec<_> = store.submissions().into_iter().map(|s| s.source).collect();
        assert_eq!(sources, ["web", "web"]);
    }

    #[tokio::test]
    async fn test_forwarded_ip_wins_over_peer() {
        let (store, handler) = memory_handler();
        let mut request = post(&jane());
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        handler.handle(request).await;

        let mut request = post(&jane());
        request.extensions_mut().remove::<PeerAddr>();
        handler.handle(request).await;

        let ips: Vec<_> = store.submissions().into_iter().map(|s| s.ip).collect();
        assert_eq!(ips, [Some("203.0.113.7".to_string()), None]);
    }

    /// Loses every race: right before the first insert, another writer
    /// creates the same contact and preferences.
    struct RacingStore {
        inner: MemoryStore,
        raced: AtomicBool,
    }

    impl RacingStore {
        async fn race(&self, contact: &NewContact) {
            if self.raced.swap(true, Ordering::SeqCst) {
                return;
            }
            let created = self.inner.insert_contact(contact).await.unwrap();
            self.inner
                .insert_preferences(&Preferences {
                    contact_id: created.id,
                    settings: PreferenceSettings::default(),
                })
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl ContactStore for RacingStore {
        async fn find_contact(
            &self,
            email: &str,
            phone_e164: &str,
        ) -> Result<Option<Contact>, StoreError> {
            self.inner.find_contact(email, phone_e164).await
        }

        async fn insert_contact(&self, contact: &NewContact) -> Result<Contact, StoreError> {
            self.race(contact).await;
            self.inner.insert_contact(contact).await
        }

        async fn update_contact(
            &self,
            id: &ContactId,
            patch: &ContactPatch,
        ) -> Result<Contact, StoreError> {
            self.inner.update_contact(id, patch).await
        }

        async fn preferences_exist(&self, _contact_id: &ContactId) -> Result<bool, StoreError> {
            // Stale read, taken before the other writer committed.
            Ok(false)
        }

        async fn insert_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
            self.inner.insert_preferences(preferences).await
        }

        async fn update_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
            self.inner.update_preferences(preferences).await
        }

        async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), StoreError> {
            self.inner.insert_submission(submission).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_insert_resolves_to_existing_contact() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            raced: AtomicBool::new(false),
        });
        let handler = crate::testutils::handler(store.clone());

        let response = handler.handle(post(&jane())).await;
        assert_eq!(response.status(), StatusCode::OK);

        let contacts = store.inner.contacts();
        assert_eq!(contacts.len(), 1);
        assert_eq!(json_body(&response)["contact_id"], json!(contacts[0].id));

        // The insert conflict fell back to an update of the racing row.
        let preferences = store.inner.preferences(&contacts[0].id).unwrap();
        assert!(preferences.settings.updates);
        assert_eq!(preferences.settings.frequency, Frequency::Weekly);
        assert_eq!(store.inner.submissions().len(), 1);
    }
}
