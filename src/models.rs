use crate::ingest;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A document the service cites in support of an answer.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Source {
    pub document_name: String,
    pub relevance_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
}

impl Source {
    /// Relevance as a whole percentage, rounded half away from zero.
    pub fn relevance_percent(&self) -> u8 {
        (self.relevance_score.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Turn {
    pub id: u64,
    pub role: Role,
    pub content: String,
    /// `None` on user turns.
    pub sources: Option<Vec<Source>>,
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            sources: None,
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(
        id: u64,
        content: impl Into<String>,
        sources: Vec<Source>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            sources: Some(sources),
            is_error: false,
            created_at,
        }
    }

    /// Placeholder shown in place of an answer the service failed to produce.
    pub fn failure(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: message.into(),
            sources: Some(Vec::new()),
            is_error: true,
            created_at: Utc::now(),
        }
    }
}

/// An ingested document as reported by the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub filename: String,
    #[serde(rename = "file_size")]
    pub file_size_bytes: u64,
    pub upload_date: String,
    #[serde(rename = "chunks_count")]
    pub chunk_count: u32,
}

impl Document {
    pub fn uploaded_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.upload_date)
    }

    /// Upload date in the short US form, e.g. `Oct 16, 2026`.
    pub fn display_upload_date(&self) -> String {
        self.uploaded_at()
            .map(|d| d.format("%b %-d, %Y").to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    pub fn display_size(&self) -> String {
        format_file_size(self.file_size_bytes)
    }
}

/// A file picked for upload: payload plus the media type it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub filename: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(filename: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, declaring its media type from the extension
    /// the way a file picker would.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let bytes = fs::read(path)?;
        Ok(Self {
            filename,
            media_type: media_type_for_extension(&ext).to_string(),
            bytes,
        })
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn media_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "pdf" => ingest::PDF,
        "docx" => ingest::DOCX,
        "doc" => ingest::DOC,
        "txt" => ingest::PLAIN_TEXT,
        _ => "application/octet-stream",
    }
}

/// Parse a service timestamp. Accepts RFC 3339 and the offset-less ISO form
/// the service emits; the latter is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// 1024-based size with two decimals above 1 KB: `512 B`, `1.50 KB`, `2.00 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    }
}
