//! Documents, segments and translation payloads.
//!
//! A document (one piece of literature) is an ordered list of segments. Each
//! segment is the unit of translation and is identified by an integer id that
//! is unique within its document.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate segment id {0}")]
    DuplicateSegment(SegmentId),
}

/// Identifier of a segment within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SegmentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// One translated sentence of a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceTranslation {
    #[serde(default)]
    pub original: String,
    #[serde(default)]
    pub translation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Fields the server sends that this client does not interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A complete, structured translation of one segment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Translation {
    #[serde(default)]
    pub sentences: Vec<SentenceTranslation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Translation {
    /// The translated sentences joined into one line of prose.
    pub fn plain_text(&self) -> String {
        self.sentences
            .iter()
            .map(|s| s.translation.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A segment as stored on disk and in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: SegmentId,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<Translation>,
}

impl Segment {
    pub fn new(id: impl Into<SegmentId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            translation: None,
        }
    }

    pub fn is_translated(&self) -> bool {
        self.translation.is_some()
    }
}

/// A piece of literature split into segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Document {
    /// Load a document from a JSON file, rejecting duplicate segment ids.
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, DocumentError> {
        let doc: Document = serde_json::from_str(raw)?;
        let mut seen = std::collections::HashSet::with_capacity(doc.segments.len());
        for seg in &doc.segments {
            if !seen.insert(seg.id) {
                return Err(DocumentError::DuplicateSegment(seg.id));
            }
        }
        Ok(doc)
    }

    /// Write the document as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Display name: the title if present, otherwise the document id.
    pub fn display_name(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.id)
    }
}
