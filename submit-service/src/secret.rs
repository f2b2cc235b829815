use serde::Deserialize;
use std::fmt;
use subtle::ConstantTimeEq;

/// Shared secret the form sends in the `x-form-secret` header.
///
/// Static and non-expiring, so it is treated like a password: never printed
/// and only compared in constant time. Length differences are not hidden.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FormSecret(String);

impl FormSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        FormSecret(secret.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, candidate: &[u8]) -> bool {
        bool::from(self.0.as_bytes().ct_eq(candidate))
    }
}

impl fmt::Debug for FormSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FormSecret(<redacted>)")
    }
}
