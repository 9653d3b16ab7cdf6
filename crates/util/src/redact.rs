//! Secret handling and log redaction.
//!
//! `SecretString` keeps credentials out of `Debug`/`Display` output and
//! serialized reports; `redact_sensitive` scrubs values that look like
//! secrets from free-form text (captured remote output, rendered previews).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};

/// Replacement text used wherever a secret is removed.
pub const REDACTED_PLACEHOLDER: &str = "<redacted>";

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWD|PASSWORD)=)([^\s]+)",
        r"(?i)(--password[= ])([^\s]+)",
        r"(?i)(identity[-_]file[= ])([^\s]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("sensitive pattern compiles"))
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}{REDACTED_PLACEHOLDER}")
            })
            .to_string();
    }
    redacted
}

/// A credential that must never appear in logs, reports, or serialized
/// output. The plaintext is only reachable through [`SecretString::expose`].
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(plaintext: impl Into<String>) -> Self {
        Self(plaintext.into())
    }

    /// The plaintext value. Callers own the responsibility of keeping the
    /// exposed value out of anything that outlives process memory.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("SecretString(<redacted>)")
    }
}

impl From<String> for SecretString {
    fn from(plaintext: String) -> Self {
        Self(plaintext)
    }
}

impl From<&str> for SecretString {
    fn from(plaintext: &str) -> Self {
        Self(plaintext.to_string())
    }
}

// Serializing a report must not leak the plaintext, so the placeholder is
// written instead. Deserialization stays transparent for plan documents.
impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_PLACEHOLDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_env_style_assignments() {
        let input = "export AD_PASSWD=hunter2 AD_DOMAIN=corp.example.com";
        let redacted = redact_sensitive(input);
        assert_eq!(redacted, "export AD_PASSWD=<redacted> AD_DOMAIN=corp.example.com");
    }

    #[test]
    fn redacts_password_flags() {
        let redacted = redact_sensitive("mysql --password=hunter2 -u slurm");
        assert!(!redacted.contains("hunter2"));
    }

    #[test]
    fn secret_string_debug_is_redacted() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretString(<redacted>)");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn secret_string_serializes_to_placeholder() {
        let secret = SecretString::new("hunter2");
        let json = serde_json::to_string(&secret).expect("serialize");
        assert_eq!(json, format!("\"{REDACTED_PLACEHOLDER}\""));
    }
}
