use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::classify::column_types_for;
use crate::dom::{
    DocumentAccessor, NodeId, class_attr, descendants, is_scrollable, scrollable_ancestors,
};
use crate::error::ScanError;
use crate::explicit::synthetic_headers;
use crate::implicit::{container_rows, extract_row_cells};
use crate::model::{TableData, row_fingerprint};
use crate::options::ScanOptions;
use crate::warning::{ScanWarning, WarningCode};

const VIRTUALIZATION_HINTS: &[&str] = &[
    "virtual", "virtualized", "react-window", "react-virtualized", "cdk-virtual-scroll",
    "windowed",
];
const LAZY_HINTS: &[&str] = &["lazy", "load-more", "loadmore", "pagination", "infinite"];
const GRID_LIBRARY_HINTS: &[&str] = &[
    "ag-grid", "ag-row", "handsontable", "slickgrid", "muidatagrid", "rdg-", "reactvirtualized",
];
const ROW_HINTS: &[&str] = &["row", "item", "entry", "line", "record"];

const SPARSE_MIN_DESCENDANTS: usize = 20;
const SPARSE_MAX_CHILDREN: usize = 50;
const WEAK_ROW_SIGNAL_MIN: usize = 5;
const ZOOM_SCALE: f64 = 0.5;
/// Geometric discount applied per tree level in position weights, so
/// shallow ordering dominates deep ordering.
const DEPTH_DISCOUNT: f64 = 1.0 / 1024.0;

fn subtree_class_haystack(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> String {
    let mut haystack = String::new();
    for current in std::iter::once(node).chain(descendants(doc, node)) {
        haystack.push_str(&class_attr(doc, current).to_ascii_lowercase());
        haystack.push(' ');
        if let Some(id) = doc.attr(current, "id") {
            haystack.push_str(&id.to_ascii_lowercase());
            haystack.push(' ');
        }
    }
    haystack
}

fn has_transform_rows(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    descendants(doc, node).into_iter().any(|n| {
        doc.style(n, "transform")
            .is_some_and(|value| value.contains("translateY") || value.contains("translate3d"))
    })
}

fn has_scrollable_context(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    let root = doc.root();
    let mut current = Some(node);
    while let Some(candidate) = current {
        if candidate != root && is_scrollable(doc, candidate) {
            return true;
        }
        current = doc.parent(candidate);
    }
    false
}

fn is_sparse_but_deep(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    descendants(doc, node).len() > SPARSE_MIN_DESCENDANTS
        && doc.children(node).len() < SPARSE_MAX_CHILDREN
}

fn is_row_like(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    if doc.attr(node, "role").as_deref() == Some("row") {
        return true;
    }
    if matches!(doc.tag(node).as_str(), "tr" | "li") {
        return true;
    }
    let classes = class_attr(doc, node).to_ascii_lowercase();
    ROW_HINTS.iter().any(|hint| classes.contains(hint))
}

fn row_like_descendants(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> usize {
    descendants(doc, node)
        .into_iter()
        .filter(|&n| is_row_like(doc, n))
        .count()
}

/// State-free predicate for a partially rendered table. Table markup needs
/// at least one strong signal; any other container needs a combined
/// strong-plus-weak count of two, so the weak "many row-like descendants"
/// signal alone never qualifies.
pub fn is_virtualized(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    let haystack = subtree_class_haystack(doc, node);
    let mut strong = 0_usize;

    if VIRTUALIZATION_HINTS.iter().any(|hint| haystack.contains(hint)) {
        strong += 1;
    }
    if has_scrollable_context(doc, node) && is_sparse_but_deep(doc, node) {
        strong += 1;
    }
    if has_transform_rows(doc, node) {
        strong += 1;
    }
    if LAZY_HINTS.iter().any(|hint| haystack.contains(hint)) {
        strong += 1;
    }
    if GRID_LIBRARY_HINTS.iter().any(|hint| haystack.contains(hint)) {
        strong += 1;
    }

    if doc.tag(node) == "table" {
        return strong >= 1;
    }
    let weak = usize::from(row_like_descendants(doc, node) >= WEAK_ROW_SIGNAL_MIN);
    strong + weak >= 2
}

#[derive(Debug, Clone)]
struct RecoveredRow {
    cells: Vec<String>,
    /// Synthetic document-position weight, when determinable.
    position: Option<f64>,
    /// Scroll offset at which the row was first observed.
    scroll_offset: f64,
    discovery: usize,
}

#[derive(Debug, Clone, Default)]
struct Recovery {
    headers: Vec<String>,
    rows: Vec<RecoveredRow>,
    seen: HashSet<String>,
}

impl Recovery {
    fn push(&mut self, cells: Vec<String>, position: Option<f64>, scroll_offset: f64) {
        if !self.seen.insert(row_fingerprint(&cells)) {
            return;
        }
        let discovery = self.rows.len();
        self.rows.push(RecoveredRow {
            cells,
            position,
            scroll_offset,
            discovery,
        });
    }

    /// Keeps the longest header set observed across sampling steps.
    fn absorb_headers(&mut self, headers: Option<Vec<String>>) {
        if let Some(headers) = headers {
            if headers.len() > self.headers.len() {
                self.headers = headers;
            }
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Index-within-parent per level, discounted geometrically with depth.
fn document_position_weight(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> f64 {
    let mut path = Vec::new();
    let mut current = node;
    while let Some(parent) = doc.parent(current) {
        let index = doc
            .children(parent)
            .iter()
            .position(|&child| child == current)
            .unwrap_or(0);
        path.push(index);
        current = parent;
    }
    path.reverse();

    let mut weight = 0.0;
    let mut factor = 1.0;
    for index in path {
        weight += index as f64 * factor;
        factor *= DEPTH_DISCOUNT;
    }
    weight
}

fn sample_offsets(
    doc: &(impl DocumentAccessor + ?Sized),
    target: NodeId,
    container: NodeId,
    options: &ScanOptions,
) -> Result<Recovery, ScanError> {
    let max = doc.max_scroll(target);
    let steps = options.scroll_steps.max(1);
    let mut recovery = Recovery::default();
    for step in 0..=steps {
        let offset = max * step as f64 / steps as f64;
        doc.set_scroll_offset(target, offset)?;
        doc.settle(options.render_delay)?;
        let (headers, rows) = container_rows(doc, container);
        recovery.absorb_headers(headers);
        for cells in rows {
            recovery.push(cells, None, offset);
        }
    }
    Ok(recovery)
}

/// One sampled scroll pass over `target`. The original scroll offset is
/// restored on every path out, including failures mid-pass.
fn scroll_sample(
    doc: &(impl DocumentAccessor + ?Sized),
    target: NodeId,
    container: NodeId,
    options: &ScanOptions,
) -> Result<Recovery, ScanError> {
    let original = doc.scroll_offset(target);
    let result = sample_offsets(doc, target, container, options);
    let _ = doc.set_scroll_offset(target, original);
    let _ = doc.settle(options.render_delay);
    result
}

/// Temporary whole-document zoom-out, re-extracting while more content is
/// materialized. Layout is restored afterwards.
fn zoom_sample(
    doc: &(impl DocumentAccessor + ?Sized),
    container: NodeId,
    options: &ScanOptions,
) -> Result<Recovery, ScanError> {
    let original = doc.zoom();
    let result = (|| {
        doc.set_zoom(original * ZOOM_SCALE)?;
        doc.settle(options.render_delay)?;
        let mut recovery = Recovery::default();
        let (headers, rows) = container_rows(doc, container);
        recovery.absorb_headers(headers);
        for (index, cells) in rows.into_iter().enumerate() {
            recovery.push(cells, Some(index as f64), 0.0);
        }
        Ok(recovery)
    })();
    let _ = doc.set_zoom(original);
    let _ = doc.settle(options.render_delay);
    result
}

/// Searches a widened ancestor scope for row-like elements with generic
/// selectors, keeping the leaf-most matches.
fn deep_scan(doc: &(impl DocumentAccessor + ?Sized), container: NodeId) -> Recovery {
    let mut scope = container;
    for _ in 0..2 {
        if let Some(parent) = doc.parent(scope) {
            scope = parent;
        }
    }

    let mut recovery = Recovery::default();
    for node in descendants(doc, scope) {
        if !is_row_like(doc, node) {
            continue;
        }
        if descendants(doc, node)
            .into_iter()
            .any(|inner| is_row_like(doc, inner))
        {
            continue;
        }
        let cells = extract_row_cells(doc, node);
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        recovery.push(cells, Some(document_position_weight(doc, node)), 0.0);
    }
    recovery
}

fn static_extraction(doc: &(impl DocumentAccessor + ?Sized), container: NodeId) -> Recovery {
    let (headers, rows) = container_rows(doc, container);
    let mut recovery = Recovery::default();
    recovery.absorb_headers(headers);
    for (index, cells) in rows.into_iter().enumerate() {
        recovery.push(cells, Some(index as f64), 0.0);
    }
    recovery
}

fn row_order(a: &RecoveredRow, b: &RecoveredRow) -> Ordering {
    let by_position = match (a.position, b.position) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_position
        .then(
            a.scroll_offset
                .partial_cmp(&b.scroll_offset)
                .unwrap_or(Ordering::Equal),
        )
        .then(a.discovery.cmp(&b.discovery))
}

/// Trim, drop header echoes, deduplicate, re-type. Always applied to the
/// chosen recovery result.
fn normalize(mut recovery: Recovery, options: &ScanOptions) -> TableData {
    recovery.rows.sort_by(row_order);

    let headers: Vec<String> = recovery
        .headers
        .iter()
        .map(|header| header.trim().to_string())
        .collect();

    let mut seen = HashSet::new();
    let mut rows: Vec<Vec<String>> = Vec::new();
    for row in recovery.rows {
        let cells: Vec<String> = row.cells.iter().map(|cell| cell.trim().to_string()).collect();
        // A header row re-captured as data during scroll sampling.
        if !headers.is_empty() && cells == headers {
            continue;
        }
        if seen.insert(row_fingerprint(&cells)) {
            rows.push(cells);
        }
    }

    let max_row_width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let headers = if headers.is_empty() {
        synthetic_headers(max_row_width)
    } else {
        headers
    };
    let width = max_row_width.max(headers.len());
    let column_types = column_types_for(&rows, width, options.type_confidence_floor);
    TableData {
        headers,
        rows,
        column_types,
    }
}

/// Best-effort search for the maximal unique row set of a partially
/// rendered container. Never returns fewer unique rows than `baseline`.
pub fn recover(
    doc: &(impl DocumentAccessor + ?Sized),
    container: NodeId,
    baseline: &TableData,
    options: &ScanOptions,
    warnings: &mut Vec<ScanWarning>,
) -> TableData {
    let mut best: Option<Recovery> = None;

    let mut targets = scrollable_ancestors(doc, container);
    let root = doc.root();
    if !targets.contains(&root) {
        targets.push(root);
    }
    for target in targets {
        match scroll_sample(doc, target, container, options) {
            Ok(recovery) => {
                if best.as_ref().is_none_or(|current| recovery.len() > current.len()) {
                    best = Some(recovery);
                }
            }
            Err(error) => {
                warn!(%error, "scroll sampling failed; skipping target");
                warnings.push(
                    ScanWarning::new(
                        WarningCode::RecoveryStrategyFailed,
                        format!("scroll sampling failed: {error}"),
                    ),
                );
            }
        }
    }

    if best.as_ref().map_or(0, Recovery::len) < options.min_virtual_rows {
        match zoom_sample(doc, container, options) {
            Ok(recovery) => {
                if recovery.len() > best.as_ref().map_or(0, Recovery::len) {
                    best = Some(recovery);
                }
            }
            Err(error) => {
                warn!(%error, "zoom simulation failed");
                warnings.push(ScanWarning::new(
                    WarningCode::RecoveryStrategyFailed,
                    format!("zoom simulation failed: {error}"),
                ));
            }
        }

        let deep = deep_scan(doc, container);
        if deep.len() > best.as_ref().map_or(0, Recovery::len) {
            best = Some(deep);
        }
    }

    let recovery = match best.filter(|recovery| !recovery.rows.is_empty()) {
        Some(recovery) => recovery,
        None => static_extraction(doc, container),
    };

    let result = normalize(recovery, options);
    if result.unique_row_count() < baseline.unique_row_count() {
        debug!("recovery yielded fewer unique rows than the baseline; keeping baseline");
        warnings.push(ScanWarning::new(
            WarningCode::RecoveryRejected,
            "recovery produced fewer unique rows than the static extraction",
        ));
        return baseline.clone();
    }
    result
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Recovery, document_position_weight, is_virtualized, normalize, recover};
    use crate::dom::{DocumentAccessor, SyntheticDocument};
    use crate::implicit::assemble_table;
    use crate::options::ScanOptions;

    fn virtual_list(rows: usize, window: usize) -> SyntheticDocument {
        let children = (0..rows)
            .map(|index| {
                format!(
                    r#"{{"tag": "div", "attrs": {{"class": "row"}}, "children": [
                        {{"tag": "span", "text": "name {index}"}},
                        {{"tag": "span", "text": "{index}"}}
                    ]}}"#
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        let json = format!(
            r#"{{"body": {{"tag": "body", "children": [
                {{"tag": "div", "attrs": {{"class": "virtual-list"}},
                  "styles": {{"overflow-y": "auto"}},
                  "window": {window}, "children": [{children}]}}
            ]}}}}"#
        );
        SyntheticDocument::from_json_str(&json).expect("fixture should parse")
    }

    #[test]
    fn virtualization_predicate_needs_two_signals_for_containers() {
        let doc = virtual_list(40, 8);
        let container = doc.children(doc.root())[0];
        // Class hint (strong) + many row-like children (weak).
        assert!(is_virtualized(&doc, container));

        let plain = SyntheticDocument::from_json_str(
            r#"{"body": {"tag": "body", "children": [
                {"tag": "div", "children": [
                    {"tag": "div", "attrs": {"class": "row"}, "text": "a"},
                    {"tag": "div", "attrs": {"class": "row"}, "text": "b"},
                    {"tag": "div", "attrs": {"class": "row"}, "text": "c"},
                    {"tag": "div", "attrs": {"class": "row"}, "text": "d"},
                    {"tag": "div", "attrs": {"class": "row"}, "text": "e"}
                ]}
            ]}}"#,
        )
        .expect("fixture should parse");
        let container = plain.children(plain.root())[0];
        // The weak signal alone never qualifies.
        assert!(!is_virtualized(&plain, container));
    }

    #[test]
    fn static_table_markup_is_not_virtualized() {
        let doc = SyntheticDocument::from_json_str(
            r#"{"body": {"tag": "body", "children": [{"tag": "table", "children": [
                {"tag": "tr", "children": [{"tag": "td", "text": "a"}]},
                {"tag": "tr", "children": [{"tag": "td", "text": "b"}]}
            ]}]}}"#,
        )
        .expect("fixture should parse");
        let table = doc.children(doc.root())[0];
        assert!(!is_virtualized(&doc, table));
    }

    #[test]
    fn scroll_sampling_recovers_the_full_row_set() {
        let doc = virtual_list(40, 8);
        let container = doc.children(doc.root())[0];
        let options = ScanOptions::default();
        let baseline = assemble_table(&doc, container, &options);
        assert!(baseline.rows.len() < 40);

        let mut warnings = Vec::new();
        let recovered = recover(&doc, container, &baseline, &options, &mut warnings);
        assert_eq!(recovered.rows.len(), 40);
        assert_eq!(recovered.unique_row_count(), 40);
        // First-seen scroll offset ordering keeps the visual order.
        assert_eq!(recovered.rows[0][0], "name 0");
        assert_eq!(recovered.rows[39][0], "name 39");
    }

    #[test]
    fn scroll_offsets_are_restored_after_recovery() {
        let doc = virtual_list(40, 8);
        let container = doc.children(doc.root())[0];
        let options = ScanOptions::default();
        doc.set_scroll_offset(container, 120.0).expect("scroll");
        doc.settle(std::time::Duration::ZERO).expect("settle");

        let baseline = assemble_table(&doc, container, &options);
        let mut warnings = Vec::new();
        recover(&doc, container, &baseline, &options, &mut warnings);
        assert_eq!(doc.scroll_offset(container), 120.0);
    }

    #[test]
    fn restoration_survives_a_failing_strategy() {
        let doc = virtual_list(40, 8);
        let container = doc.children(doc.root())[0];
        let options = ScanOptions::default();
        doc.set_scroll_offset(container, 50.0).expect("scroll");
        doc.settle(std::time::Duration::ZERO).expect("settle");
        doc.fail_scrolls_above(200.0);

        let baseline = assemble_table(&doc, container, &options);
        let mut warnings = Vec::new();
        let recovered = recover(&doc, container, &baseline, &options, &mut warnings);
        assert_eq!(doc.scroll_offset(container), 50.0);
        // The invariant holds even when sampling dies mid-pass.
        assert!(recovered.unique_row_count() >= baseline.unique_row_count());
        assert!(!warnings.is_empty());
    }

    #[test]
    fn position_weights_follow_document_order() {
        let doc = SyntheticDocument::from_json_str(
            r#"{"body": {"tag": "body", "children": [
                {"tag": "div", "children": [{"tag": "p", "text": "x"}]},
                {"tag": "div", "children": [{"tag": "p", "text": "y"}]}
            ]}}"#,
        )
        .expect("fixture should parse");
        let first_div = doc.children(doc.root())[0];
        let second_div = doc.children(doc.root())[1];
        let deep_p = doc.children(first_div)[0];

        let shallow_second = document_position_weight(&doc, second_div);
        let deep_first = document_position_weight(&doc, deep_p);
        // Shallow ordering dominates: anything under the first div sorts
        // before the second div.
        assert!(deep_first < shallow_second);
    }

    #[test]
    fn normalization_drops_header_echoes_and_duplicates() {
        let mut recovery = Recovery::default();
        recovery.absorb_headers(Some(vec!["Name".to_string(), "Qty".to_string()]));
        recovery.push(vec!["Name".to_string(), "Qty".to_string()], None, 0.0);
        recovery.push(vec![" a ".to_string(), "1".to_string()], None, 0.0);
        recovery.push(vec!["a".to_string(), "1".to_string()], None, 100.0);
        recovery.push(vec!["b".to_string(), "2".to_string()], None, 100.0);

        let data = normalize(recovery, &ScanOptions::default());
        assert_eq!(data.rows, vec![vec!["a", "1"], vec!["b", "2"]]);
    }
}
