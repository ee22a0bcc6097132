//! Dataset loading: CSV / JSON bytes, local files and URLs into a [`Table`].
//!
//! Accepted JSON shapes:
//! - an array of row objects: `[{"age": 31, "region": "west"}, ...]`
//! - a column mapping: `{"age": [31, 40], "region": ["west", "east"]}`
//!   (every value an array, all of the same length)

use crate::{Cell, Table};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Json,
}

impl TableFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" | "text/csv" => Some(Self::Csv),
            "json" | "application/json" => Some(Self::Json),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::parse)
    }

    /// Best guess from content when no extension or content type is available.
    pub fn sniff(bytes: &[u8]) -> Self {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') | Some(b'[') => Self::Json,
            _ => Self::Csv,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TableSource {
    Inline {
        bytes: Vec<u8>,
        format: Option<TableFormat>,
    },
    Path(PathBuf),
    Url(String),
}

impl TableSource {
    /// `http(s)://` references become URLs, everything else a local path.
    pub fn parse_reference(reference: &str) -> Self {
        let trimmed = reference.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Path(PathBuf::from(trimmed))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Inline { bytes, .. } => format!("inline ({} bytes)", bytes.len()),
            Self::Path(p) => p.display().to_string(),
            Self::Url(u) => u.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadFailure {
    #[error("dataset not found: {0}")]
    NotFound(String),
    #[error("dataset could not be parsed: {reason}")]
    UnparseableFormat { reason: String },
    #[error("dataset is {bytes} bytes, over the {limit} byte limit")]
    TooLarge { bytes: u64, limit: u64 },
}

impl LoadFailure {
    fn unparseable(reason: impl Into<String>) -> Self {
        Self::UnparseableFormat {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Loads datasets. Construct once; the HTTP client is reused across loads.
#[derive(Debug, Clone)]
pub struct TableLoader {
    max_bytes: usize,
    #[cfg(feature = "remote")]
    client: reqwest::Client,
}

impl Default for TableLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl TableLoader {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            #[cfg(feature = "remote")]
            client: reqwest::Client::new(),
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn load(&self, source: &TableSource) -> Result<Table, LoadFailure> {
        let table = match source {
            TableSource::Inline { bytes, format } => {
                let format = format.unwrap_or_else(|| TableFormat::sniff(bytes));
                parse_table(bytes, format, self.max_bytes)?
            }
            TableSource::Path(path) => self.load_path(path).await?,
            TableSource::Url(url) => self.load_url(url).await?,
        };
        tracing::debug!(
            source = %source.describe(),
            rows = table.row_count(),
            columns = table.column_count(),
            "loaded dataset"
        );
        Ok(table)
    }

    async fn load_path(&self, path: &Path) -> Result<Table, LoadFailure> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| LoadFailure::NotFound(path.display().to_string()))?;
        if !meta.is_file() {
            return Err(LoadFailure::NotFound(path.display().to_string()));
        }
        self.check_size(meta.len())?;
        let format = TableFormat::from_path(path).ok_or_else(|| {
            LoadFailure::unparseable(format!(
                "unsupported file type `{}` (expected .csv or .json)",
                path.display()
            ))
        })?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| LoadFailure::NotFound(format!("{}: {e}", path.display())))?;
        parse_table(&bytes, format, self.max_bytes)
    }

    #[cfg(feature = "remote")]
    async fn load_url(&self, url: &str) -> Result<Table, LoadFailure> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadFailure::NotFound(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(LoadFailure::NotFound(format!(
                "{url}: http {}",
                response.status()
            )));
        }
        if let Some(len) = response.content_length() {
            self.check_size(len)?;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .and_then(TableFormat::parse);
        // Chunked bodies carry no length up front; stop once past the limit.
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| LoadFailure::NotFound(format!("{url}: {e}")))?
        {
            bytes.extend_from_slice(&chunk);
            self.check_size(bytes.len() as u64)?;
        }
        let from_url = url
            .split(['?', '#'])
            .next()
            .and_then(|p| TableFormat::from_path(Path::new(p)));
        let format = from_url
            .or(content_type)
            .unwrap_or_else(|| TableFormat::sniff(&bytes));
        parse_table(&bytes, format, self.max_bytes)
    }

    #[cfg(not(feature = "remote"))]
    async fn load_url(&self, url: &str) -> Result<Table, LoadFailure> {
        Err(LoadFailure::NotFound(format!(
            "{url}: remote datasets are not enabled in this build"
        )))
    }

    /// `TooLarge` when `bytes` exceeds the configured limit.
    pub fn check_size(&self, bytes: u64) -> Result<(), LoadFailure> {
        if bytes > self.max_bytes as u64 {
            return Err(LoadFailure::TooLarge {
                bytes,
                limit: self.max_bytes as u64,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Parsing
// ============================================================================

pub fn parse_table(bytes: &[u8], format: TableFormat, max_bytes: usize) -> Result<Table, LoadFailure> {
    if bytes.len() > max_bytes {
        return Err(LoadFailure::TooLarge {
            bytes: bytes.len() as u64,
            limit: max_bytes as u64,
        });
    }
    let table = match format {
        TableFormat::Csv => parse_csv(bytes)?,
        TableFormat::Json => {
            let value: Value = serde_json::from_slice(bytes)
                .map_err(|e| LoadFailure::unparseable(format!("invalid JSON: {e}")))?;
            table_from_json(&value)?
        }
    };
    if table.is_empty() {
        return Err(LoadFailure::unparseable("dataset has no rows"));
    }
    Ok(table)
}

fn parse_csv(bytes: &[u8]) -> Result<Table, LoadFailure> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| LoadFailure::unparseable(format!("failed to read CSV headers: {e}")))?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let headers = dedupe_headers(headers);

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| LoadFailure::unparseable(format!("CSV row {}: {e}", idx + 1)))?;
        rows.push(record.iter().map(Cell::from_raw).collect());
    }

    Table::from_rows(headers, rows).map_err(|e| LoadFailure::unparseable(e.to_string()))
}

fn table_from_json(value: &Value) -> Result<Table, LoadFailure> {
    match value {
        Value::Array(records) => table_from_records(records),
        Value::Object(map) if is_column_mapping(value) => {
            let headers = dedupe_headers(map.keys().cloned().collect());
            let columns = map
                .values()
                .filter_map(Value::as_array)
                .map(|values| values.iter().map(cell_from_json).collect::<Vec<_>>());
            let columns = headers
                .into_iter()
                .zip(columns)
                .map(|(name, cells)| crate::Column::new(name, cells))
                .collect();
            Table::new(columns).map_err(|e| LoadFailure::unparseable(e.to_string()))
        }
        Value::Object(_) => Err(LoadFailure::unparseable(
            "JSON object must map column names to equal-length arrays",
        )),
        _ => Err(LoadFailure::unparseable(
            "JSON dataset must be an array of records or a column mapping",
        )),
    }
}

fn table_from_records(records: &[Value]) -> Result<Table, LoadFailure> {
    let mut headers: Vec<String> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (idx, record) in records.iter().enumerate() {
        let Some(obj) = record.as_object() else {
            return Err(LoadFailure::unparseable(format!(
                "JSON record {idx} is not an object"
            )));
        };
        for key in obj.keys() {
            if !index.contains_key(key) {
                index.insert(key.clone(), headers.len());
                headers.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .filter_map(Value::as_object)
        .map(|obj| {
            headers
                .iter()
                .map(|h| obj.get(h).map(cell_from_json).unwrap_or(Cell::Null))
                .collect()
        })
        .collect();

    Table::from_rows(headers, rows).map_err(|e| LoadFailure::unparseable(e.to_string()))
}

fn cell_from_json(value: &Value) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Text(b.to_string()),
        Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Null),
        Value::String(s) => Cell::from_raw(s),
        other => Cell::Text(other.to_string()),
    }
}

/// `{"col": [..], ...}` with every value an array of one shared length.
fn is_column_mapping(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    if map.is_empty() {
        return false;
    }
    let mut lengths = map.values().map(|v| v.as_array().map(Vec::len));
    let Some(Some(first)) = lengths.next() else {
        return false;
    };
    lengths.all(|len| len == Some(first))
}

fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let names: Vec<String> = headers
        .into_iter()
        .enumerate()
        .map(|(idx, h)| match h.trim() {
            "" => format!("column_{}", idx + 1),
            trimmed => trimmed.to_string(),
        })
        .collect();
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .map(|base| {
            if used.insert(base.clone()) {
                return base;
            }
            let suffix = next_suffix.entry(base.clone()).or_insert(1);
            loop {
                let candidate = format!("{base}.{suffix}");
                *suffix += 1;
                if used.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}

// ============================================================================
// Inline data embedded in instruction text
// ============================================================================

/// Split a column-mapping JSON object out of free text.
///
/// Returns the parsed table and the remaining instruction text, or `None` if
/// the text carries no usable inline dataset.
pub fn split_inline_data(text: &str) -> Option<(Table, String)> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let end = balanced_object_end(text, start)?;
        let candidate = &text[start..=end];
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if is_column_mapping(&value) {
                if let Ok(table) = table_from_json(&value) {
                    if !table.is_empty() {
                        let remaining = format!("{} {}", &text[..start], &text[end + 1..]);
                        let remaining = remaining.split_whitespace().collect::<Vec<_>>().join(" ");
                        return Some((table, remaining));
                    }
                }
            }
        }
        search_from = start + 1;
    }
    None
}

/// Index of the `}` closing the object that opens at `start` (ignoring braces
/// inside strings).
pub fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;
    for (idx, ch) in text.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
