//! Line grammar for darknet `.cfg` documents.
//!
//! Two independent recognisers: a `[section]` header and a `key = value`
//! assignment. Anything else (comments, blank lines, junk) is neither.

/// Returns the section name when `line` is exactly a `[name]` header.
///
/// Surrounding whitespace disqualifies the line, as darknet itself does.
pub fn section_header(line: &str) -> Option<&str> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    if inner.is_empty() || inner.contains(['[', ']']) {
        return None;
    }
    Some(inner)
}

/// Returns `(key, value)` when `line` is a `key = value` assignment.
///
/// Whitespace around the key and value is ignored. Lines containing `#`
/// are never assignments, and keys are limited to `[A-Za-z0-9_.]`.
pub fn key_value(line: &str) -> Option<(&str, &str)> {
    if line.contains('#') {
        return None;
    }
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }
    Some((key, value.trim()))
}

/// `"yolo"` and `"[yolo]"` both become `"[yolo]"`.
pub fn bracketed(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed.to_string()
    } else {
        format!("[{trimmed}]")
    }
}

/// Number of comma-separated entries in a list value such as `0,1,2`.
pub fn list_len(value: &str) -> usize {
    if value.trim().is_empty() {
        0
    } else {
        value.matches(',').count() + 1
    }
}
