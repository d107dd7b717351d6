//! Masking of sensitive values before they reach a log sink.

use serde_json::Value;

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_FRAGMENTS: &[&str] = &["secret", "token", "key", "cardnumber", "cvv", "password"];

/// Whether a field name looks like it holds secret material.
///
/// Matching ignores case, `_` and `-`, so `card_number`, `cardNumber` and
/// `CARD-NUMBER` all match. `pan` only matches as a whole name.
#[must_use]
pub fn is_sensitive_field(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();

    normalized == "pan"
        || SENSITIVE_FRAGMENTS
            .iter()
            .any(|fragment| normalized.contains(fragment))
}

/// Copy `value`, replacing every sensitive field at any depth with
/// [`REDACTED`].
#[must_use]
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = if is_sensitive_field(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_json(v)
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

/// Masked preview of a secret: the first four characters followed by `****`.
/// Secrets of eight characters or fewer are fully masked.
#[must_use]
pub fn mask(secret: &str) -> String {
    if secret.chars().count() <= 8 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}****")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensitive_names_match_across_styles() {
        for name in [
            "secret",
            "webhookSecret",
            "api_key",
            "keyId",
            "accessToken",
            "cardNumber",
            "card_number",
            "CVV",
            "pan",
            "PAN",
            "password",
        ] {
            assert!(is_sensitive_field(name), "{name} should be sensitive");
        }
    }

    #[test]
    fn ordinary_names_pass_through() {
        for name in ["amount", "currency", "company", "transactionId", "span"] {
            assert!(!is_sensitive_field(name), "{name} should not be sensitive");
        }
    }

    #[test]
    fn redacts_nested_fields() {
        let input = json!({
            "amount": 100,
            "card": {"cardNumber": "4111111111111111", "cvv": "123", "expiry": "12/30"},
            "items": [{"password": "x"}, {"name": "y"}]
        });
        let output = redact_json(&input);
        assert_eq!(
            output,
            json!({
                "amount": 100,
                "card": {"cardNumber": REDACTED, "cvv": REDACTED, "expiry": "12/30"},
                "items": [{"password": REDACTED}, {"name": "y"}]
            })
        );
    }

    #[test]
    fn mask_keeps_short_prefix_only() {
        assert_eq!(mask("whsec_abcdefghijkl"), "whse****");
        assert_eq!(mask("short"), "****");
    }
}
