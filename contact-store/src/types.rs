use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-assigned contact identifier, echoed back to callers verbatim.
///
/// PostgREST returns integer keys as JSON numbers and uuid keys as strings,
/// both are accepted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContactId {
    Int(i64),
    Text(String),
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactId::Int(id) => write!(f, "{id}"),
            ContactId::Text(id) => f.write_str(id),
        }
    }
}

/// A row of the `contacts` table. Every column except the id may be empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_e164: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewContact {
    pub email: String,
    pub phone_e164: String,
    pub first_name: String,
    pub last_name: String,
}

/// Columns to back-fill on an existing contact. Unset fields are omitted from
/// the update body.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ContactPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_e164: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.phone_e164.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    InvitesOnly,
    Monthly,
    Weekly,
}

impl Frequency {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "invites_only" => Some(Frequency::InvitesOnly),
            "monthly" => Some(Frequency::Monthly),
            "weekly" => Some(Frequency::Weekly),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Frequency::InvitesOnly => "invites_only",
            Frequency::Monthly => "monthly",
            Frequency::Weekly => "weekly",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    App,
}

impl Channel {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            "app" => Some(Channel::App),
            _ => None,
        }
    }
}

/// Every preference column except the key. Written as a whole on each
/// submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferenceSettings {
    pub thrive_invites: bool,
    pub friday_reminders: bool,
    pub updates: bool,
    pub real_insights: bool,
    pub frequency: Frequency,
    pub channels: Vec<Channel>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub contact_id: ContactId,
    #[serde(flatten)]
    pub settings: PreferenceSettings,
}

/// A row for the append-only `submissions` audit table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewSubmission {
    pub contact_id: ContactId,
    pub source: String,
    pub ip: Option<String>,
    pub user_agent: String,
    pub payload: serde_json::Value,
}
