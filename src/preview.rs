//! Preview-mode classification by content type, key extension and sniffing.
//!
//! Only decides how an object should be shown; rendering is left to the UI.
//!
//! CSV rule: parse up to `sample_rows` non-empty records (quote aware). The
//! sample is a table when it has at least two records, the header has at
//! least two columns and every sampled record has the header's column count.
//! Anything else (ragged rows, comment/metadata lines before the header, a
//! single column) falls back to raw text.

use serde::Serialize;

/// Bytes shown by the hex view.
pub const HEX_PREVIEW_LIMIT: usize = 1000;

const CSV_CONTENT_TYPES: [&str; 3] = ["text/csv", "application/csv", "application/vnd.ms-excel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewMode {
    Text,
    CsvTable,
    CsvRaw,
    Image,
    Hex,
}

impl std::fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreviewMode::Text => write!(f, "text"),
            PreviewMode::CsvTable => write!(f, "csv-table"),
            PreviewMode::CsvRaw => write!(f, "csv-raw"),
            PreviewMode::Image => write!(f, "image"),
            PreviewMode::Hex => write!(f, "hex"),
        }
    }
}

/// Classified preview handed to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub key: String,
    pub content_type: String,
    pub mode: PreviewMode,
    /// Raw bytes (possibly cut at the preview limit).
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub truncated: bool,
    /// Parsed records for `csv-table`, header first.
    pub rows: Option<Vec<Vec<String>>>,
}

impl Preview {
    pub fn build(
        key: &str,
        content_type: Option<&str>,
        bytes: Vec<u8>,
        truncated: bool,
        sample_rows: usize,
    ) -> Self {
        let content_type = effective_content_type(key, content_type);
        let mode = classify(key, &content_type, &bytes, truncated, sample_rows);
        let rows = (mode == PreviewMode::CsvTable).then(|| {
            let text = String::from_utf8_lossy(&bytes);
            sample_records(&text, usize::MAX, truncated)
        });
        Self {
            key: key.to_string(),
            content_type,
            mode,
            bytes,
            truncated,
            rows,
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    pub fn hex(&self) -> String {
        hex_dump(&self.bytes)
    }
}

/// Declared content type, or a guess from the key when it is missing/generic.
pub fn effective_content_type(key: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim).filter(|s| !s.is_empty()) {
        Some(ct) if ct != "application/octet-stream" && ct != "binary/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(key)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

pub fn classify(
    key: &str,
    content_type: &str,
    bytes: &[u8],
    truncated: bool,
    sample_rows: usize,
) -> PreviewMode {
    let content_type = content_type.to_ascii_lowercase();

    if content_type.starts_with("image/") || has_image_magic(bytes) {
        return PreviewMode::Image;
    }

    let csv_candidate = key.to_ascii_lowercase().ends_with(".csv")
        || CSV_CONTENT_TYPES.iter().any(|t| content_type.starts_with(t));
    if csv_candidate {
        return match std::str::from_utf8(utf8_window(bytes, truncated)) {
            Ok(text) if is_tabular(text, sample_rows, truncated) => PreviewMode::CsvTable,
            _ => PreviewMode::CsvRaw,
        };
    }

    if content_type.starts_with("text/")
        || content_type == "application/json"
        || content_type == "application/xml"
        || looks_like_text(bytes, truncated)
    {
        return PreviewMode::Text;
    }

    PreviewMode::Hex
}

/// Strict schema check on the first `sample_rows` records.
pub fn is_tabular(text: &str, sample_rows: usize, truncated: bool) -> bool {
    let records = sample_records(text, sample_rows.max(2), truncated);
    let Some(header) = records.first() else {
        return false;
    };
    records.len() >= 2 && header.len() >= 2 && records.iter().all(|r| r.len() == header.len())
}

/// At most `limit` records of `text`. When the text was cut short, a final
/// record without its line ending is dropped since it may be incomplete.
pub fn sample_records(text: &str, limit: usize, truncated: bool) -> Vec<Vec<String>> {
    let mut records = parse_records(text, limit.saturating_add(1));
    if records.len() > limit {
        records.truncate(limit);
    } else if truncated && !text.ends_with('\n') {
        records.pop();
    }
    records
}

/// Comma-separated records, quote aware and tolerant of ragged rows.
/// Blank lines are skipped; parsing stops at the first malformed record.
pub fn parse_records(text: &str, limit: usize) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes())
        .into_records()
        .map_while(Result::ok)
        .filter(|record| !(record.len() == 1 && record[0].is_empty()))
        .take(limit)
        .map(|record| record.iter().map(str::to_string).collect())
        .collect()
}

fn has_image_magic(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0x89, b'P', b'N', b'G'])
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF87a")
        || bytes.starts_with(b"GIF89a")
        || (bytes.len() >= 14 && bytes.starts_with(b"BM") && bytes[6..10] == [0, 0, 0, 0])
        || (bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
}

/// Drops a UTF-8 sequence cut off by truncation.
fn utf8_window(bytes: &[u8], truncated: bool) -> &[u8] {
    if !truncated {
        return bytes;
    }
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes,
        Err(e) if e.error_len().is_none() => &bytes[..e.valid_up_to()],
        Err(_) => bytes,
    }
}

fn looks_like_text(bytes: &[u8], truncated: bool) -> bool {
    let window = utf8_window(bytes, truncated);
    !window.contains(&0) && std::str::from_utf8(window).is_ok()
}

pub fn hex_dump(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(HEX_PREVIEW_LIMIT)];
    let mut out = shown
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > HEX_PREVIEW_LIMIT {
        out.push_str("\n... (truncated)");
    }
    out
}
