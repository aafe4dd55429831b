//! Display formatting for listing rows. Pure functions, no I/O.

use chrono::{DateTime, Utc};

const SIZE_UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Human readable size with binary prefixes, e.g. `1.5 MiB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, SIZE_UNITS[unit])
}

/// UTC, fixed layout, independent of the host locale.
pub fn format_timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Last path segment of a key. Folder keys keep their name without the slash.
pub fn display_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// ETag shortened for a table column.
pub fn short_etag(etag: &str) -> String {
    const MAX: usize = 16;
    if etag.chars().count() > MAX {
        format!("{}...", etag.chars().take(MAX).collect::<String>())
    } else {
        etag.to_string()
    }
}

/// Normalize a user-entered prefix to `""` or `"a/b/"`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

/// Parent of a prefix: `"a/b/"` -> `"a/"`, `"a/"` -> `""`.
pub fn parent_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..=idx].to_string(),
        None => String::new(),
    }
}
