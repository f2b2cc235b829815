//! Process-local [`ContactStore`]. Enforces the same uniqueness rules as the
//! database (one contact per email, one per phone, one preferences row per
//! contact) and can be told to fail individual operations.

use crate::types::{Contact, ContactId, ContactPatch, NewContact, NewSubmission, Preferences};
use crate::{ContactStore, Operation, StoreError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    next_id: i64,
    contacts: Vec<Contact>,
    preferences: HashMap<ContactId, Preferences>,
    submissions: Vec<NewSubmission>,
    contact_updates: usize,
}

impl Tables {
    fn conflicting(&self, email: Option<&str>, phone: Option<&str>, except: Option<&ContactId>) -> bool {
        let same = |stored: &Option<String>, new: Option<&str>| match (stored.as_deref(), new) {
            (Some(a), Some(b)) => !a.is_empty() && a == b,
            _ => false,
        };

        self.contacts.iter().any(|c| {
            Some(&c.id) != except && (same(&c.email, email) || same(&c.phone_e164, phone))
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failing: Mutex<HashSet<Operation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `operation` fail with
    /// [`StoreError::Unavailable`].
    pub fn fail_on(&self, operation: Operation) {
        lock(&self.failing).insert(operation);
    }

    pub fn contacts(&self) -> Vec<Contact> {
        lock(&self.tables).contacts.clone()
    }

    pub fn contact(&self, id: &ContactId) -> Option<Contact> {
        lock(&self.tables).contacts.iter().find(|c| &c.id == id).cloned()
    }

    pub fn preferences(&self, contact_id: &ContactId) -> Option<Preferences> {
        lock(&self.tables).preferences.get(contact_id).cloned()
    }

    pub fn submissions(&self) -> Vec<NewSubmission> {
        lock(&self.tables).submissions.clone()
    }

    /// Number of contact updates that were applied.
    pub fn contact_updates(&self) -> usize {
        lock(&self.tables).contact_updates
    }

    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        if lock(&self.failing).contains(&operation) {
            return Err(StoreError::Unavailable(operation.as_str()));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn find_contact(
        &self,
        email: &str,
        phone_e164: &str,
    ) -> Result<Option<Contact>, StoreError> {
        self.check(Operation::FindContact)?;
        let tables = lock(&self.tables);
        Ok(tables
            .contacts
            .iter()
            .find(|c| c.email.as_deref() == Some(email) || c.phone_e164.as_deref() == Some(phone_e164))
            .cloned())
    }

    async fn insert_contact(&self, contact: &NewContact) -> Result<Contact, StoreError> {
        self.check(Operation::InsertContact)?;
        let mut tables = lock(&self.tables);
        if tables.conflicting(Some(&contact.email), Some(&contact.phone_e164), None) {
            return Err(StoreError::Conflict {
                table: "contacts",
                message: "duplicate key value violates unique constraint".into(),
            });
        }

        tables.next_id += 1;
        let row = Contact {
            id: ContactId::Int(tables.next_id),
            email: Some(contact.email.clone()),
            phone_e164: Some(contact.phone_e164.clone()),
            first_name: Some(contact.first_name.clone()),
            last_name: Some(contact.last_name.clone()),
        };
        tables.contacts.push(row.clone());
        Ok(row)
    }

    async fn update_contact(
        &self,
        id: &ContactId,
        patch: &ContactPatch,
    ) -> Result<Contact, StoreError> {
        self.check(Operation::UpdateContact)?;
        let mut tables = lock(&self.tables);
        if tables.conflicting(patch.email.as_deref(), patch.phone_e164.as_deref(), Some(id)) {
            return Err(StoreError::Conflict {
                table: "contacts",
                message: "duplicate key value violates unique constraint".into(),
            });
        }

        let row = tables
            .contacts
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| StoreError::UnexpectedResponse {
                table: "contacts",
                reason: format!("no contact with id {id}"),
            })?;

        let fields = [
            (&mut row.email, &patch.email),
            (&mut row.phone_e164, &patch.phone_e164),
            (&mut row.first_name, &patch.first_name),
            (&mut row.last_name, &patch.last_name),
        ];
        for (stored, new) in fields {
            if new.is_some() {
                stored.clone_from(new);
            }
        }

        let row = row.clone();
        tables.contact_updates += 1;
        Ok(row)
    }

    async fn preferences_exist(&self, contact_id: &ContactId) -> Result<bool, StoreError> {
        self.check(Operation::FindPreferences)?;
        Ok(lock(&self.tables).preferences.contains_key(contact_id))
    }

    async fn insert_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.check(Operation::InsertPreferences)?;
        let mut tables = lock(&self.tables);
        if tables.preferences.contains_key(&preferences.contact_id) {
            return Err(StoreError::Conflict {
                table: "preferences",
                message: "duplicate key value violates unique constraint".into(),
            });
        }
        tables
            .preferences
            .insert(preferences.contact_id.clone(), preferences.clone());
        Ok(())
    }

    async fn update_preferences(&self, preferences: &Preferences) -> Result<(), StoreError> {
        self.check(Operation::UpdatePreferences)?;
        // Like a PATCH with a filter, updating a missing row is not an error.
        if let Some(row) = lock(&self.tables)
            .preferences
            .get_mut(&preferences.contact_id)
        {
            row.settings = preferences.settings.clone();
        }
        Ok(())
    }

    async fn insert_submission(&self, submission: &NewSubmission) -> Result<(), StoreError> {
        self.check(Operation::InsertSubmission)?;
        lock(&self.tables).submissions.push(submission.clone());
        Ok(())
    }
}
