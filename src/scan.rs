use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;

use crate::dom::{DocumentAccessor, descendants};
use crate::error::ScanError;
use crate::explicit::{analyze_table, find_explicit_tables, is_table_node};
use crate::implicit::{assemble_table, find_implicit_candidates};
use crate::locator::{build_locator, resolve_locator};
use crate::model::{
    EmbeddedContentHint, Source, TableData, TableRecord, content_signature, preview_of,
};
use crate::options::ScanOptions;
use crate::virtualized::{is_virtualized, recover};
use crate::warning::{ScanWarning, WarningCode};

/// Schemes the engine refuses to scan up front.
const RESTRICTED_SCHEMES: &[&str] = &[
    "about",
    "chrome",
    "chrome-extension",
    "edge",
    "moz-extension",
    "view-source",
    "devtools",
];
const HIGHLIGHT_PROPERTY: &str = "outline";
const HIGHLIGHT_VALUE: &str = "2px solid #4c8dff";
const EMBED_TAGS: &[&str] = &["iframe", "frame", "embed", "object"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Complete,
}

/// Completion signal of one scan: every surviving record (already emitted
/// incrementally), the attempt count, non-fatal diagnostics, and embedded
/// content hints when nothing was found.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub records: Vec<TableRecord>,
    pub attempts: u32,
    pub warnings: Vec<ScanWarning>,
    pub embedded_content_hints: Vec<EmbeddedContentHint>,
}

/// Timer-based coalescing queue for mutation-driven rescans: every
/// notification re-arms the deadline; the queue fires once the quiet
/// period elapses without further notifications.
#[derive(Debug)]
pub struct Debouncer {
    quiet_period: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    #[must_use]
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            deadline: None,
        }
    }

    pub fn notify(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet_period);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consumes the pending deadline when it has elapsed.
    pub fn take_if_ready(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Drives scans over one document: candidate gathering, virtualized
/// recovery, signature deduplication, retries, and incremental emission.
pub struct ScanEngine<'d, D: DocumentAccessor> {
    doc: &'d D,
    options: ScanOptions,
    state: ScanState,
    debouncer: Debouncer,
}

impl<'d, D: DocumentAccessor> ScanEngine<'d, D> {
    pub fn new(doc: &'d D, options: ScanOptions) -> Result<Self, ScanError> {
        options.validate()?;
        let debouncer = Debouncer::new(options.debounce_quiet_period);
        Ok(Self {
            doc,
            options,
            state: ScanState::Idle,
            debouncer,
        })
    }

    #[must_use]
    pub fn state(&self) -> ScanState {
        self.state
    }

    fn check_accessible(&self) -> Result<(), ScanError> {
        let raw = self.doc.document_url();
        let url = Url::parse(&raw)
            .map_err(|error| ScanError::InaccessibleDocument(format!("{raw}: {error}")))?;
        if RESTRICTED_SCHEMES.contains(&url.scheme()) {
            return Err(ScanError::InaccessibleDocument(format!(
                "restricted scheme '{}'",
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Single extraction dispatch over the source kind.
    fn extract_source(&self, source: Source) -> TableData {
        match source {
            Source::Explicit(node) => analyze_table(self.doc, node, &self.options),
            Source::Implicit(node) => assemble_table(self.doc, node, &self.options),
        }
    }

    fn run_attempt(
        &self,
        sink: &mut dyn FnMut(&TableRecord),
        warnings: &mut Vec<ScanWarning>,
    ) -> Vec<TableRecord> {
        let mut sources: Vec<(Source, f32)> = find_explicit_tables(self.doc)
            .into_iter()
            .map(|node| (Source::Explicit(node), 1.0))
            .collect();
        for candidate in find_implicit_candidates(self.doc, &self.options, warnings) {
            sources.push((Source::Implicit(candidate.container), candidate.confidence));
        }

        let mut seen_signatures = HashSet::new();
        let mut records = Vec::new();
        for (source, confidence) in sources {
            let mut data = self.extract_source(source);
            if data.rows.is_empty() {
                continue;
            }

            if is_virtualized(self.doc, source.node()) {
                let recovered =
                    recover(self.doc, source.node(), &data, &self.options, warnings);
                // Recovery earns its keep only with strictly more unique
                // rows; duplicates do not count.
                if recovered.unique_row_count() > data.unique_row_count() {
                    data = recovered;
                }
            }

            let signature = content_signature(&data);
            if !seen_signatures.insert(signature) {
                debug!("discarding table with duplicate content signature");
                continue;
            }

            let record = TableRecord {
                id: records.len() as u32 + 1,
                kind: source.kind(),
                confidence,
                locator: build_locator(self.doc, source.node(), self.options.max_locator_depth),
                preview: preview_of(&data),
                data,
            };
            sink(&record);
            records.push(record);
        }
        records
    }

    fn embedded_content_hints(&self) -> Vec<EmbeddedContentHint> {
        let origin = Url::parse(&self.doc.document_url())
            .ok()
            .map(|url| url.origin());
        descendants(self.doc, self.doc.root())
            .into_iter()
            .filter(|&node| EMBED_TAGS.contains(&self.doc.tag(node).as_str()))
            .filter_map(|node| {
                let source = self.doc.attr(node, "src")?;
                let same_origin = match Url::parse(&source) {
                    Ok(url) => origin.as_ref().is_some_and(|origin| *origin == url.origin()),
                    // Relative sources stay within the document origin.
                    Err(_) => true,
                };
                Some(EmbeddedContentHint {
                    source,
                    same_origin,
                })
            })
            .collect()
    }

    /// Runs one scan, emitting each surviving table through `sink` as it
    /// is discovered. A request while a scan is already in flight is a
    /// no-op returning `None`. Record ids restart at 1 on every scan.
    pub fn request_scan(
        &mut self,
        sink: &mut dyn FnMut(&TableRecord),
    ) -> Result<Option<ScanReport>, ScanError> {
        if self.state == ScanState::Scanning {
            debug!("scan already in flight; ignoring request");
            return Ok(None);
        }
        self.check_accessible()?;
        self.state = ScanState::Scanning;

        let mut warnings = Vec::new();
        let mut records = Vec::new();
        let mut attempts = 0;
        while attempts < self.options.max_retries {
            attempts += 1;
            debug!(attempt = attempts, "scan attempt starting");
            records = self.run_attempt(sink, &mut warnings);
            if !records.is_empty() {
                break;
            }
            if attempts < self.options.max_retries {
                let delay = Duration::from_secs_f64(
                    self.options.retry_delay.as_secs_f64()
                        * f64::from(self.options.retry_backoff).powi(attempts as i32 - 1),
                );
                warnings.push(
                    ScanWarning::new(
                        WarningCode::RetryScheduled,
                        "attempt found no tables; retrying after delay",
                    )
                    .with_attempt(attempts),
                );
                if let Err(error) = self.doc.settle(delay) {
                    warn!(%error, "retry delay failed; stopping attempts");
                    break;
                }
            }
        }

        let embedded_content_hints = if records.is_empty() {
            warnings.push(ScanWarning::new(
                WarningCode::NoTablesDetected,
                "no tables were detected in the document",
            ));
            self.embedded_content_hints()
        } else {
            Vec::new()
        };

        self.state = ScanState::Complete;
        Ok(Some(ScanReport {
            records,
            attempts,
            warnings,
            embedded_content_hints,
        }))
    }

    /// Ad hoc single-element extraction outside the scan pipeline.
    #[must_use]
    pub fn extract_at(&self, locator: &str) -> Option<TableData> {
        let node = resolve_locator(self.doc, locator)?;
        if is_table_node(self.doc, node) {
            Some(analyze_table(self.doc, node, &self.options))
        } else {
            Some(assemble_table(self.doc, node, &self.options))
        }
    }

    /// Best-effort visual aid; silently a no-op when the locator no
    /// longer resolves.
    pub fn highlight_candidate(&self, locator: &str) {
        if let Some(node) = resolve_locator(self.doc, locator) {
            self.doc
                .set_transient_style(node, HIGHLIGHT_PROPERTY, HIGHLIGHT_VALUE);
        }
    }

    pub fn clear_highlight(&self, locator: &str) {
        if let Some(node) = resolve_locator(self.doc, locator) {
            self.doc.clear_transient_style(node, HIGHLIGHT_PROPERTY);
        }
    }

    /// Records a document mutation; rescans coalesce behind the quiet
    /// period instead of firing per mutation.
    pub fn notify_mutation(&mut self, now: Instant) {
        self.debouncer.notify(now);
    }

    /// Fires the pending debounced rescan when its quiet period elapsed.
    pub fn poll_rescan(
        &mut self,
        now: Instant,
        sink: &mut dyn FnMut(&TableRecord),
    ) -> Result<Option<ScanReport>, ScanError> {
        if self.debouncer.take_if_ready(now) {
            self.request_scan(sink)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::{Debouncer, ScanEngine, ScanState};
    use crate::dom::SyntheticDocument;
    use crate::error::ScanError;
    use crate::model::TableKind;
    use crate::options::ScanOptions;

    fn doc_with_tables() -> SyntheticDocument {
        SyntheticDocument::from_json_str(
            r#"{"url": "https://example.test/page", "body": {"tag": "body", "children": [
                {"tag": "table", "children": [
                    {"tag": "tr", "children": [
                        {"tag": "th", "text": "Name"}, {"tag": "th", "text": "Amount"}
                    ]},
                    {"tag": "tr", "children": [
                        {"tag": "td", "text": "Alice"}, {"tag": "td", "text": "$10.00"}
                    ]},
                    {"tag": "tr", "children": [
                        {"tag": "td", "text": "Bob"}, {"tag": "td", "text": "$20.00"}
                    ]}
                ]},
                {"tag": "table", "children": [
                    {"tag": "tr", "children": [
                        {"tag": "th", "text": "Name"}, {"tag": "th", "text": "Amount"}
                    ]},
                    {"tag": "tr", "children": [
                        {"tag": "td", "text": "Alice"}, {"tag": "td", "text": "$10.00"}
                    ]},
                    {"tag": "tr", "children": [
                        {"tag": "td", "text": "Bob"}, {"tag": "td", "text": "$20.00"}
                    ]}
                ]}
            ]}}"#,
        )
        .expect("fixture should parse")
    }

    #[test]
    fn duplicate_signatures_keep_only_the_first_table() {
        let doc = doc_with_tables();
        let mut engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
        let mut emitted = Vec::new();
        let report = engine
            .request_scan(&mut |record| emitted.push(record.id))
            .expect("scan should run")
            .expect("scan should not be skipped");

        assert_eq!(report.records.len(), 1);
        assert_eq!(emitted, vec![1]);
        assert_eq!(report.records[0].kind, TableKind::Explicit);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn record_ids_restart_on_every_scan() {
        let doc = doc_with_tables();
        let mut engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
        let first = engine
            .request_scan(&mut |_| {})
            .expect("scan")
            .expect("report");
        let second = engine
            .request_scan(&mut |_| {})
            .expect("scan")
            .expect("report");
        assert_eq!(first.records[0].id, 1);
        assert_eq!(second.records[0].id, 1);
    }

    #[test]
    fn in_flight_scan_requests_are_ignored() {
        let doc = doc_with_tables();
        let mut engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
        engine.state = ScanState::Scanning;
        let outcome = engine.request_scan(&mut |_| {}).expect("no error");
        assert!(outcome.is_none());
    }

    #[test]
    fn restricted_schemes_fail_before_scanning() {
        let doc = SyntheticDocument::from_json_str(
            r#"{"url": "chrome://settings", "body": {"tag": "body"}}"#,
        )
        .expect("fixture should parse");
        let mut engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
        let error = engine
            .request_scan(&mut |_| {})
            .expect_err("restricted scheme should fail");
        assert!(matches!(error, ScanError::InaccessibleDocument(_)));
        assert_eq!(engine.state(), ScanState::Idle);
    }

    #[test]
    fn empty_documents_retry_and_surface_embed_hints() {
        let doc = SyntheticDocument::from_json_str(
            r#"{"url": "https://example.test/", "body": {"tag": "body", "children": [
                {"tag": "iframe", "attrs": {"src": "https://other.test/frame"}},
                {"tag": "iframe", "attrs": {"src": "/local/frame"}}
            ]}}"#,
        )
        .expect("fixture should parse");
        let options = ScanOptions {
            retry_delay: Duration::from_millis(1),
            ..ScanOptions::default()
        };
        let mut engine = ScanEngine::new(&doc, options).expect("engine");
        let report = engine
            .request_scan(&mut |_| {})
            .expect("scan")
            .expect("report");

        assert!(report.records.is_empty());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.embedded_content_hints.len(), 2);
        assert!(!report.embedded_content_hints[0].same_origin);
        assert!(report.embedded_content_hints[1].same_origin);
    }

    #[test]
    fn highlight_is_a_noop_for_stale_locators() {
        let doc = doc_with_tables();
        let engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
        engine.highlight_candidate("div.gone:9 > span:1");
        engine.clear_highlight("div.gone:9 > span:1");
    }

    #[test]
    fn debouncer_coalesces_bursts() {
        let quiet = Duration::from_millis(500);
        let mut debouncer = Debouncer::new(quiet);
        let start = Instant::now();

        debouncer.notify(start);
        debouncer.notify(start + Duration::from_millis(200));
        assert!(!debouncer.take_if_ready(start + Duration::from_millis(400)));
        // The second notification pushed the deadline out.
        assert!(!debouncer.take_if_ready(start + Duration::from_millis(600)));
        assert!(debouncer.take_if_ready(start + Duration::from_millis(700)));
        assert!(!debouncer.is_armed());
    }
}
