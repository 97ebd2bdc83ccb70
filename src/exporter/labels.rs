//! Label values for the exposition format.

pub const MAX_LABEL_LEN: usize = 80;
pub const MAX_USER_ID_LEN: usize = 36;
pub const MAX_EMAIL_LEN: usize = 60;

/// Placeholder for empty label values and failed identity lookups.
pub const UNKNOWN: &str = "unknown";

/// Makes `value` safe to place between quotes: backslashes become `_`,
/// double quotes become `'`, line breaks become spaces. The result is
/// trimmed, at most `max_len` characters, and never empty. Applying it
/// twice gives the same string.
pub fn sanitize_label(value: &str, max_len: usize) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '\\' => '_',
            '"' => '\'',
            '\n' | '\r' => ' ',
            c => c,
        })
        .collect();

    let truncated: String = cleaned.trim().chars().take(max_len).collect();
    let truncated = truncated.trim_end();

    if truncated.is_empty() {
        UNKNOWN.chars().take(max_len).collect()
    } else {
        truncated.to_string()
    }
}

/// Exposition-format escaping of a label value.
pub fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// First eight characters of an id, used when no username is known.
pub fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}
