use serde_json::Value;

const DEFAULT_ACCEPTED_RANGE: &str = "200-299";

#[derive(Debug, Clone, PartialEq, Eq)]
enum StatusRule {
    Exact(u16),
    Range(u16, u16),
    /// A rule that could not be parsed. Never matches.
    Invalid,
}

impl StatusRule {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => n
                .as_u64()
                .and_then(|code| u16::try_from(code).ok())
                .map_or(StatusRule::Invalid, StatusRule::Exact),
            Value::String(rule) => Self::from_str_rule(rule),
            _ => StatusRule::Invalid,
        }
    }

    fn from_str_rule(rule: &str) -> Self {
        if let Some((min, max)) = rule.split_once('-') {
            match (leading_int(min), leading_int(max)) {
                (Some(min), Some(max)) => StatusRule::Range(min, max),
                _ => StatusRule::Invalid,
            }
        } else {
            leading_int(rule).map_or(StatusRule::Invalid, StatusRule::Exact)
        }
    }

    fn matches(&self, status: u16) -> bool {
        match *self {
            StatusRule::Exact(code) => status == code,
            StatusRule::Range(min, max) => status >= min && status <= max,
            StatusRule::Invalid => false,
        }
    }
}

/// Lenient integer parse: surrounding whitespace and trailing junk are ignored ("200 OK" -> 200).
fn leading_int(raw: &str) -> Option<u16> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// The set of HTTP status codes a monitor treats as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedStatusCodes {
    rules: Vec<StatusRule>,
}

impl Default for AcceptedStatusCodes {
    fn default() -> Self {
        Self {
            rules: vec![StatusRule::from_str_rule(DEFAULT_ACCEPTED_RANGE)],
        }
    }
}

impl AcceptedStatusCodes {
    /// Normalizes the configured value: an array is used as-is, a string must hold a
    /// JSON array, anything else falls back to `["200-299"]`.
    pub fn from_config(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Array(items)) => Self::from_rules(items),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(items)) => Self::from_rules(&items),
                _ => Self::default(),
            },
            _ => Self::default(),
        }
    }

    pub fn from_rules(items: &[Value]) -> Self {
        Self {
            rules: items.iter().map(StatusRule::from_value).collect(),
        }
    }

    /// An empty rule list accepts 200-299.
    pub fn accepts(&self, status: u16) -> bool {
        if self.rules.is_empty() {
            return (200..=299).contains(&status);
        }
        self.rules.iter().any(|rule| rule.matches(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_rules_accept_2xx() {
        let codes = AcceptedStatusCodes::from_rules(&[]);
        assert!(codes.accepts(200));
        assert!(codes.accepts(299));
        assert!(!codes.accepts(300));
        assert!(!codes.accepts(199));
    }

    #[test]
    fn test_mixed_rules() {
        let codes = AcceptedStatusCodes::from_rules(&[json!("200-204"), json!(301), json!("418")]);
        assert!(codes.accepts(204));
        assert!(codes.accepts(301));
        assert!(codes.accepts(418));
        assert!(!codes.accepts(205));
        assert!(!codes.accepts(302));
    }

    #[test]
    fn test_unparsable_rules_never_match() {
        let codes = AcceptedStatusCodes::from_rules(&[json!("abc"), json!("x-y"), json!(true)]);
        assert!(!codes.accepts(200));
    }

    #[test]
    fn test_from_config_variants() {
        assert!(AcceptedStatusCodes::from_config(None).accepts(250));
        assert!(!AcceptedStatusCodes::from_config(None).accepts(404));

        let from_string = AcceptedStatusCodes::from_config(Some(&json!("[\"404\"]")));
        assert!(from_string.accepts(404));
        assert!(!from_string.accepts(200));

        let garbage = AcceptedStatusCodes::from_config(Some(&json!("not json")));
        assert_eq!(garbage, AcceptedStatusCodes::default());

        let array = AcceptedStatusCodes::from_config(Some(&json!(["500-599"])));
        assert!(array.accepts(503));
    }
}
