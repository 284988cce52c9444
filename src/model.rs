use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::dom::NodeId;

const PREVIEW_MAX_CHARS: usize = 80;
const SIGNATURE_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Empty,
    Number,
    Currency,
    Percentage,
    Date,
    Time,
    Email,
    Url,
    Phone,
    Boolean,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TypeGuess {
    #[serde(rename = "type")]
    pub cell_type: CellType,
    pub confidence: f32,
}

impl TypeGuess {
    #[must_use]
    pub fn text() -> Self {
        Self {
            cell_type: CellType::Text,
            confidence: 0.0,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            cell_type: CellType::Empty,
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub column_types: Vec<TypeGuess>,
}

impl TableData {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.rows.is_empty()
    }

    /// Row count after collapsing rows with identical cell content.
    #[must_use]
    pub fn unique_row_count(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row_fingerprint(row))
            .collect::<HashSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Explicit,
    Implicit,
}

/// Where a table came from; consumed by a single extraction dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Explicit(NodeId),
    Implicit(NodeId),
}

impl Source {
    #[must_use]
    pub fn node(self) -> NodeId {
        match self {
            Self::Explicit(node) | Self::Implicit(node) => node,
        }
    }

    #[must_use]
    pub fn kind(self) -> TableKind {
        match self {
            Self::Explicit(_) => TableKind::Explicit,
            Self::Implicit(_) => TableKind::Implicit,
        }
    }
}

/// A scored implicit-table container. Short-lived: produced by the scanner
/// and immediately turned into a `TableData`.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub container: NodeId,
    pub confidence: f32,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: u32,
    pub kind: TableKind,
    pub confidence: f32,
    pub locator: String,
    pub data: TableData,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedContentHint {
    pub source: String,
    pub same_origin: bool,
}

/// Deduplication key for a single row: pipe-joined cell values.
#[must_use]
pub fn row_fingerprint(cells: &[String]) -> String {
    cells.join("|")
}

/// Deduplication key for a whole table: headers, the first few rows, and
/// the table dimensions. Never displayed.
#[must_use]
pub fn content_signature(data: &TableData) -> String {
    let sample = data
        .rows
        .iter()
        .take(SIGNATURE_SAMPLE_ROWS)
        .map(|row| row_fingerprint(row))
        .collect::<Vec<_>>()
        .join("\u{1f}");
    let width = data
        .rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(data.headers.len());
    format!(
        "{}\u{1e}{}\u{1e}{}x{}",
        data.headers.join("|"),
        sample,
        data.rows.len(),
        width
    )
}

#[must_use]
pub fn preview_of(data: &TableData) -> String {
    let source = if data.headers.is_empty() {
        data.rows.first().map(|row| row.join(", ")).unwrap_or_default()
    } else {
        data.headers.join(", ")
    };
    if source.chars().count() <= PREVIEW_MAX_CHARS {
        return source;
    }
    let truncated = source.chars().take(PREVIEW_MAX_CHARS).collect::<String>();
    format!("{truncated}…")
}
