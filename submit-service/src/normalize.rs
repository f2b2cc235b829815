//! Turns the raw form fields into the values written to the store.

use crate::errors::SubmitError;
use crate::request::{PrefsInput, SubmissionRequest};
use contact_store::types::{Channel, Frequency, NewContact, PreferenceSettings};

pub const DEFAULT_SOURCE: &str = "web";

pub fn clean(value: Option<&str>) -> String {
    value.unwrap_or_default().trim().to_string()
}

pub fn normalize_email(value: Option<&str>) -> String {
    clean(value).to_lowercase()
}

/// Formats a North American number as E.164.
///
/// Everything but ASCII digits is dropped. Ten digits get a `+1` prefix,
/// eleven digits are accepted when the first one is `1`. Anything else is
/// not a supported number.
pub fn to_e164(value: Option<&str>) -> Option<String> {
    let digits: String = value
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();

    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+1{}", &digits[1..])),
        _ => None,
    }
}

/// Normalized contact fields, or [`SubmitError::MissingFields`] if any of
/// them ends up empty.
pub fn contact_fields(request: &SubmissionRequest) -> Result<NewContact, SubmitError> {
    let first_name = clean(request.first.as_deref());
    let last_name = clean(request.last.as_deref());
    let email = normalize_email(request.email.as_deref());
    let phone_e164 = to_e164(request.phone.as_deref()).unwrap_or_default();

    if first_name.is_empty() || last_name.is_empty() || email.is_empty() || phone_e164.is_empty()
    {
        return Err(SubmitError::MissingFields);
    }

    Ok(NewContact {
        email,
        phone_e164,
        first_name,
        last_name,
    })
}

/// The complete preference record for a submission. Anything not sent is
/// reset to its default.
pub fn preference_settings(prefs: Option<&PrefsInput>) -> PreferenceSettings {
    let Some(prefs) = prefs else {
        return PreferenceSettings::default();
    };

    let mut channels = Vec::new();
    for channel in prefs.channels.iter().filter_map(|c| Channel::parse(c)) {
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }

    PreferenceSettings {
        thrive_invites: prefs.thrive_invites,
        friday_reminders: prefs.friday_reminders,
        updates: prefs.updates,
        real_insights: prefs.real_insights,
        frequency: prefs
            .frequency
            .as_deref()
            .and_then(Frequency::parse)
            .unwrap_or_default(),
        channels,
    }
}

pub fn source(value: Option<&str>) -> String {
    match value {
        Some(source) if !source.is_empty() => source.to_string(),
        _ => DEFAULT_SOURCE.to_string(),
    }
}
