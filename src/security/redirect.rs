//! Post-authentication redirect sanitizer.
//!
//! Total: every input maps to a same-origin path. Rejected candidates fall
//! back to the configured default; the accepted form is returned exactly as
//! supplied (still percent-encoded) so query strings survive.

use crate::config::RedirectConfig;

#[derive(Debug, Clone)]
pub struct RedirectSanitizer {
    default_path: String,
    allowed_prefixes: Vec<String>,
}

impl RedirectSanitizer {
    pub fn new(config: &RedirectConfig) -> Self {
        Self {
            default_path: config.default_path.clone(),
            allowed_prefixes: config.allowed_prefixes.clone(),
        }
    }

    pub fn default_path(&self) -> &str {
        &self.default_path
    }

    pub fn validate(&self, candidate: Option<&str>) -> String {
        match candidate {
            Some(url) if self.is_safe(url) => url.to_string(),
            _ => self.default_path.clone(),
        }
    }

    fn is_safe(&self, url: &str) -> bool {
        if url.is_empty() || !url.starts_with('/') || escapes_origin(url) {
            return false;
        }

        // Re-check after decoding so `%2F%2F` and `%3A%2F%2F` cannot smuggle
        // a scheme or authority past the raw check.
        match decode_uri_component(url) {
            Some(decoded) if !escapes_origin(&decoded) => {}
            _ => return false,
        }

        self.allowed_prefixes
            .iter()
            .any(|prefix| url.starts_with(prefix.as_str()))
    }
}

// Browsers read `\` as `/` in a path, so `/\evil.com` is protocol-relative.
fn escapes_origin(url: &str) -> bool {
    url.contains("://") || url.starts_with("//") || url.contains('\\')
}

/// Strict percent-decoding: a `%` not followed by two hex digits, or a
/// decoded byte sequence that is not UTF-8, is an error.
pub fn decode_uri_component(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_value(*b))?;
            let lo = bytes.get(i + 2).and_then(|b| hex_value(*b))?;
            out.push((hi << 4) | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
