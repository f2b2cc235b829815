use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Body the form posts.
///
/// ```json
/// {
///   "first": "Jane",
///   "last": "Doe",
///   "email": "JANE@X.COM",
///   "phone": "(555) 123-4567",
///   "prefs": {
///     "updates": true,
///     "frequency": "weekly",
///     "channels": ["email", "sms"]
///   },
///   "source": "landing-page",
///   "honeypot": ""
/// }
/// ```
///
/// The body itself must be a JSON object. Its fields are coerced rather than
/// rejected: text fields of another type count as missing, flags follow
/// JSON truthiness and `channels` that is not an array is empty. Required
/// fields are checked after normalization. Unknown fields are ignored.
///
/// `honeypot` is not part of this struct; it is checked on the raw body with
/// [`honeypot_tripped`] before anything else is looked at.
#[derive(Deserialize, Debug, Default)]
pub struct SubmissionRequest {
    #[serde(default, deserialize_with = "text")]
    pub first: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub last: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "phone")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "prefs")]
    pub prefs: Option<PrefsInput>,
    #[serde(default, deserialize_with = "text")]
    pub source: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct PrefsInput {
    #[serde(default, deserialize_with = "flag")]
    pub thrive_invites: bool,
    #[serde(default, deserialize_with = "flag")]
    pub friday_reminders: bool,
    #[serde(default, deserialize_with = "flag")]
    pub updates: bool,
    #[serde(default, deserialize_with = "flag")]
    pub real_insights: bool,
    #[serde(default, deserialize_with = "text")]
    pub frequency: Option<String>,
    #[serde(default, deserialize_with = "channels")]
    pub channels: Vec<String>,
}

pub const HONEYPOT_FIELD: &str = "honeypot";

/// JSON truthiness: `null`, `false`, `0` and `""` are false, everything
/// else (including empty arrays and objects) is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Whether the hidden field humans leave empty was filled in.
pub fn honeypot_tripped(payload: &Value) -> bool {
    payload.get(HONEYPOT_FIELD).is_some_and(is_truthy)
}

fn text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Phone numbers are also accepted as plain JSON numbers.
fn phone<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(is_truthy(&Value::deserialize(deserializer)?))
}

/// String entries of an array. Anything else yields no channels.
fn channels<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn prefs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<PrefsInput>, D::Error> {
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => PrefsInput::deserialize(value)
            .map(Some)
            .map_err(<D::Error as serde::de::Error>::custom),
        _ => Ok(None),
    }
}
