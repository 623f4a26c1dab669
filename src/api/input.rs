//! Request field validation.
//!
//! Every field is checked and every failure collected; the first failure
//! becomes the error message and the full list goes into `details.errors`.

use serde_json::{Map, Value};

use crate::http::response::ApiError;

/// Length bounds for a text field, counted in characters after trimming.
#[derive(Debug, Clone, Copy)]
pub struct TextRule {
    pub min: usize,
    pub max: usize,
    pub too_short: &'static str,
    pub too_long: &'static str,
}

impl TextRule {
    /// Optional-style rule with only an upper bound.
    pub const fn max(max: usize, too_long: &'static str) -> Self {
        Self {
            min: 0,
            max,
            too_short: too_long,
            too_long,
        }
    }
}

pub const NAME: TextRule = TextRule {
    min: 2,
    max: 100,
    too_short: "Name must be at least 2 characters",
    too_long: "Name is too long",
};

pub const MESSAGE: TextRule = TextRule {
    min: 10,
    max: 5000,
    too_short: "Message must be at least 10 characters",
    too_long: "Message is too long",
};

pub const SUBJECT: TextRule = TextRule::max(200, "Subject is too long");
pub const NEWSLETTER_NAME: TextRule = TextRule::max(100, "Name is too long");
pub const ORGANIZATION: TextRule = TextRule::max(200, "Organization name is too long");
pub const INTEREST: TextRule = TextRule::max(1000, "Interest description is too long");

pub const TOPIC: TextRule = TextRule {
    min: 5,
    max: 500,
    too_short: "Topic must be at least 5 characters",
    too_long: "Topic is too long",
};

pub const EMAIL_MIN: usize = 5;
pub const EMAIL_MAX: usize = 254;

/// Accepted shape of a partially updatable field.
#[derive(Debug, Clone, Copy)]
pub enum PatchKind {
    /// Trimmed text, length in characters.
    Text { min: usize, max: usize },
    /// Absolute `http`/`https` URL.
    Url { max: usize },
    Integer { min: u64, max: u64 },
    Flag,
}

#[derive(Debug, Clone, Copy)]
pub struct PatchField {
    pub key: &'static str,
    pub label: &'static str,
    pub kind: PatchKind,
    pub nullable: bool,
}

impl PatchField {
    pub const fn text(key: &'static str, label: &'static str, max: usize) -> Self {
        Self {
            key,
            label,
            kind: PatchKind::Text { min: 0, max },
            nullable: true,
        }
    }

    pub const fn url(key: &'static str, label: &'static str, max: usize) -> Self {
        Self {
            key,
            label,
            kind: PatchKind::Url { max },
            nullable: true,
        }
    }
}

/// Collects failures while pulling fields out of a JSON object.
pub struct Fields<'a> {
    body: &'a Map<String, Value>,
    errors: Vec<String>,
}

impl<'a> Fields<'a> {
    pub fn new(body: &'a Map<String, Value>) -> Self {
        Self {
            body,
            errors: Vec::new(),
        }
    }

    /// Record a failure found outside the typed accessors.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Raw value of `key`, for checks the accessors do not cover.
    pub fn value(&self, key: &str) -> Option<&'a Value> {
        self.body.get(key)
    }

    /// A required string field; missing or non-string reads as empty.
    fn required_str(&self, key: &str) -> &'a str {
        self.body.get(key).and_then(Value::as_str).unwrap_or("")
    }

    /// An optional string field; `None` when absent, null, or not a string.
    fn raw_str(&mut self, key: &str, wrong_type: &str) -> Option<&'a str> {
        match self.body.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(_) => {
                self.fail(wrong_type);
                None
            }
        }
    }

    /// Required address, trimmed and lowercased.
    pub fn email(&mut self, key: &str, invalid: &str) -> String {
        let email = self.required_str(key).trim().to_lowercase();
        if !is_valid_email(&email) {
            self.fail(invalid);
        } else if email.chars().count() < EMAIL_MIN {
            self.fail("Email is too short");
        } else if email.chars().count() > EMAIL_MAX {
            self.fail("Email is too long");
        }
        email
    }

    /// Required trimmed text.
    pub fn text(&mut self, key: &str, rule: &TextRule) -> String {
        let value = self.required_str(key).trim();
        let len = value.chars().count();
        if len < rule.min.max(1) {
            self.fail(rule.too_short);
        } else if len > rule.max {
            self.fail(rule.too_long);
        }
        value.to_string()
    }

    /// Optional trimmed text; empty strings count as absent.
    pub fn optional_text(&mut self, key: &str, rule: &TextRule) -> Option<String> {
        let value = self.raw_str(key, rule.too_long)?.trim();
        if value.is_empty() {
            return None;
        }
        let len = value.chars().count();
        if len < rule.min {
            self.fail(rule.too_short);
        } else if len > rule.max {
            self.fail(rule.too_long);
        }
        Some(value.to_string())
    }

    /// Required string with presence and length messages of its own.
    pub fn required(&mut self, key: &str, max: usize, missing: &str, too_long: &str) -> String {
        let value = self.required_str(key).trim();
        if value.is_empty() {
            self.fail(missing);
        } else if value.chars().count() > max {
            self.fail(too_long);
        }
        value.to_string()
    }

    /// Password: not trimmed, only a lower bound.
    pub fn password(&mut self, key: &str, min: usize, too_short: &str) -> String {
        let value = self.required_str(key);
        if value.chars().count() < min {
            self.fail(too_short);
        }
        value.to_string()
    }

    /// Integer in `min..=max`. Numeric strings are accepted.
    pub fn integer(&mut self, key: &str, min: u64, max: u64, invalid: &str) -> u64 {
        let parsed = match self.body.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        match parsed {
            Some(n) if (min..=max).contains(&n) => n,
            _ => {
                self.fail(invalid);
                0
            }
        }
    }

    /// Optional positive integer.
    pub fn optional_integer(&mut self, key: &str, invalid: &str) -> Option<u64> {
        match self.body.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_u64() {
                Some(n) if n > 0 => Some(n),
                _ => {
                    self.fail(invalid);
                    None
                }
            },
            Some(_) => {
                self.fail(invalid);
                None
            }
        }
    }

    /// Optional value from a fixed set.
    pub fn one_of(&mut self, key: &str, allowed: &[&str], invalid: &str) -> Option<String> {
        let value = self.raw_str(key, invalid)?;
        if allowed.contains(&value) {
            Some(value.to_string())
        } else {
            self.fail(invalid);
            None
        }
    }

    /// Required value from a fixed set.
    pub fn choice(&mut self, key: &str, allowed: &[&str], missing: &str, invalid: &str) -> String {
        let value = self.required_str(key);
        if value.is_empty() {
            self.fail(missing);
        } else if !allowed.contains(&value) {
            self.fail(invalid);
        }
        value.to_string()
    }

    /// One field of a partial update. `None` when the key is absent,
    /// otherwise the normalized value (`Null` for an allowed clear).
    pub fn patch(&mut self, field: &PatchField) -> Option<Value> {
        let value = self.body.get(field.key)?;
        let label = field.label;

        if value.is_null() {
            if field.nullable {
                return Some(Value::Null);
            }
            self.fail(format!("{label} cannot be empty"));
            return None;
        }

        match field.kind {
            PatchKind::Text { min, max } => {
                let Some(text) = value.as_str() else {
                    self.fail(format!("{label} must be text"));
                    return None;
                };
                let text = text.trim();
                let len = text.chars().count();
                if len < min {
                    self.fail(format!("{label} is required"));
                    None
                } else if len > max {
                    self.fail(format!("{label} is too long"));
                    None
                } else {
                    Some(Value::from(text))
                }
            }
            PatchKind::Url { max } => {
                let text = value.as_str().map(str::trim).unwrap_or_default();
                if text.chars().count() > max {
                    self.fail(format!("{label} is too long"));
                    None
                } else if is_web_url(text) {
                    Some(Value::from(text))
                } else {
                    self.fail(format!("{label} must be a valid URL"));
                    None
                }
            }
            PatchKind::Integer { min, max } => match value.as_u64() {
                Some(n) if (min..=max).contains(&n) => Some(Value::from(n)),
                _ => {
                    self.fail(format!("{label} must be a whole number from {min} to {max}"));
                    None
                }
            },
            PatchKind::Flag => match value.as_bool() {
                Some(flag) => Some(Value::Bool(flag)),
                None => {
                    self.fail(format!("{label} must be true or false"));
                    None
                }
            },
        }
    }

    /// Optional raw string, unvalidated (redirect targets go through the sanitizer).
    pub fn passthrough(&self, key: &str) -> Option<String> {
        match self.body.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn finish(self) -> Result<(), ApiError> {
        match self.errors.first() {
            None => Ok(()),
            Some(first) => Err(ApiError::validation(first.clone(), self.errors.clone())),
        }
    }
}

/// Single `@`, non-empty local part, dotted domain, no whitespace.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

fn is_web_url(text: &str) -> bool {
    url::Url::parse(text)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

/// HTML-escape user text before it is stored or mailed.
pub fn sanitize_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            c => out.push(c),
        }
    }
    out
}
