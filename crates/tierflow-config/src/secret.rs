//! Secret configuration values
//!
//! [`SecretString`] keeps credentials out of logs, debug output and
//! serialized reports. The inner value is zeroized on drop.

use serde::{Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

pub const REDACTED: &str = "[REDACTED]";

#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Access the plain value. Call sites should be easy to audit.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretString").field(&REDACTED).finish()
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(REDACTED)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_redacted() {
        let secret = SecretString::new("hunter2");
        assert_eq!(secret.to_string(), REDACTED);
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert_eq!(
            serde_json::to_string(&secret).unwrap(),
            format!("\"{}\"", REDACTED)
        );
        assert_eq!(secret.expose(), "hunter2");
    }
}
