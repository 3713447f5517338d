//! Bulk import payloads: CSV row parsing and photo ZIP archives.
//!
//! Parsing is separated from the store so import operations can be fed from
//! tests directly. Malformed rows are carried through as per-row failures;
//! only a structurally unusable payload (missing required columns, broken
//! archive) fails the request as a whole.

use std::io::{Cursor, Read};

use serde::{Serialize, de::DeserializeOwned};

use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub rows: Vec<RowReport>,
}

#[derive(Debug, Serialize)]
pub struct RowReport {
    pub row: usize,
    pub label: String,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Created,
    Updated,
    Failed,
}

impl ImportReport {
    pub fn new() -> Self {
        Self {
            created: 0,
            updated: 0,
            failed: 0,
            rows: Vec::new(),
        }
    }

    pub fn created(&mut self, row: usize, label: impl Into<String>) {
        self.created += 1;
        self.rows.push(RowReport {
            row,
            label: label.into(),
            status: RowStatus::Created,
            message: None,
        });
    }

    pub fn updated(&mut self, row: usize, label: impl Into<String>) {
        self.updated += 1;
        self.rows.push(RowReport {
            row,
            label: label.into(),
            status: RowStatus::Updated,
            message: None,
        });
    }

    pub fn failed(&mut self, row: usize, label: impl Into<String>, message: impl Into<String>) {
        self.failed += 1;
        self.rows.push(RowReport {
            row,
            label: label.into(),
            status: RowStatus::Failed,
            message: Some(message.into()),
        });
    }
}

impl Default for ImportReport {
    fn default() -> Self {
        Self::new()
    }
}

/// One CSV data row: its line number and either the parsed record or the
/// parse error. Kept per row so one bad line never hides the rest.
#[derive(Debug)]
pub struct CsvRow<T> {
    pub line: usize,
    pub parsed: Result<T, String>,
}

impl<T> CsvRow<T> {
    pub fn ok(line: usize, value: T) -> Self {
        Self {
            line,
            parsed: Ok(value),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FunctionRow {
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct HelperRow {
    pub first_name: String,
    pub last_name: String,
    pub group_id: i64,
    pub function_id: i64,
    #[serde(default)]
    pub secondary_1: Option<i64>,
    #[serde(default)]
    pub secondary_2: Option<i64>,
    #[serde(default)]
    pub secondary_3: Option<i64>,
}

impl HelperRow {
    pub fn secondary_ids(&self) -> Vec<i64> {
        [self.secondary_1, self.secondary_2, self.secondary_3]
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Parses a headered CSV payload. Fails the request when a required column
/// is missing; individual bad rows come back as per-row errors.
pub fn parse_csv<T: DeserializeOwned>(
    data: &[u8],
    required: &[&str],
) -> Result<Vec<CsvRow<T>>, AppError> {
    let mut reader = csv::Reader::from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| AppError::MalformedPayload(format!("Unreadable CSV header: {e}")))?
        .clone();

    for column in required {
        if !headers.iter().any(|h| h.trim() == *column) {
            return Err(AppError::MalformedPayload(format!(
                "Missing required CSV column: {column}"
            )));
        }
    }

    let rows = reader
        .deserialize::<T>()
        .enumerate()
        .map(|(i, result)| CsvRow {
            // Line 1 is the header.
            line: i + 2,
            parsed: result.map_err(|e| e.to_string()),
        })
        .collect();

    Ok(rows)
}

#[derive(Debug)]
pub struct PhotoEntry {
    /// 1-based position among the archive's files.
    pub entry: usize,
    pub file_name: String,
    pub last_name: String,
    pub first_name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct PhotoArchive {
    pub photos: Vec<PhotoEntry>,
    /// (entry, file name, reason) for entries that were not usable photos.
    pub skipped: Vec<(usize, String, String)>,
}

/// Unpacks a ZIP of helper photos named `Last First.jpg`.
pub fn parse_photo_archive(data: &[u8]) -> Result<PhotoArchive, AppError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| AppError::MalformedPayload(format!("Unreadable ZIP archive: {e}")))?;

    let mut result = PhotoArchive::default();
    let mut entry = 0;

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| AppError::MalformedPayload(format!("Unreadable ZIP entry: {e}")))?;

        if file.is_dir() {
            continue;
        }
        entry += 1;

        let file_name = file
            .name()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        let Some(stem) = file_name
            .strip_suffix(".jpg")
            .or_else(|| file_name.strip_suffix(".JPG"))
        else {
            result
                .skipped
                .push((entry, file_name, "Not a .jpg file".to_string()));
            continue;
        };

        let Some((last_name, first_name)) = stem.split_once(' ') else {
            result.skipped.push((
                entry,
                file_name,
                "File name must be 'Last First.jpg'".to_string(),
            ));
            continue;
        };

        let mut data = Vec::new();
        let last_name = last_name.trim().to_string();
        let first_name = first_name.trim().to_string();
        file.read_to_end(&mut data)?;

        result.photos.push(PhotoEntry {
            entry,
            file_name,
            last_name,
            first_name,
            data,
        });
    }

    Ok(result)
}
