//! Table detection and extraction for document trees.
//!
//! The pipeline finds native table markup, scores generic containers that
//! behave like tables, recovers rows hidden by virtualized rendering, and
//! infers per-column value types. Everything runs against the
//! [`dom::DocumentAccessor`] capability trait, so the same pipeline serves
//! live documents and the JSON-backed [`dom::SyntheticDocument`] used in
//! tests and the CLI.

pub mod classify;
pub mod dom;
pub mod error;
pub mod explicit;
pub mod implicit;
pub mod locator;
pub mod model;
pub mod options;
pub mod scan;
pub mod virtualized;
pub mod warning;

pub use dom::{DocumentAccessor, NodeId, Rect, SyntheticDocument};
pub use error::ScanError;
pub use model::{
    CellType, EmbeddedContentHint, TableData, TableKind, TableRecord, TypeGuess,
};
pub use options::{ScanOptions, SignalWeights};
pub use scan::{ScanEngine, ScanReport, ScanState};
pub use warning::{ScanWarning, WarningCode};
