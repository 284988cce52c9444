use std::cmp::Ordering;
use std::collections::HashMap;

use crate::classify::{classify_cell, column_types_for, extract_cell_text};
use crate::dom::{
    DocumentAccessor, NodeId, class_attr, class_list, descendants, is_ancestor, is_visible,
    text_content,
};
use crate::explicit::synthetic_headers;
use crate::locator::build_locator;
use crate::model::{Candidate, TableData};
use crate::options::ScanOptions;
use crate::warning::{ScanWarning, WarningCode};

const CONTAINER_TAGS: &[&str] = &["div", "ul", "ol", "section", "article", "main", "dl"];
const CONTAINER_ROLES: &[&str] = &["table", "grid", "list", "feed", "rowgroup"];
const CONTAINER_CLASS_HINTS: &[&str] = &["table", "grid", "list"];
const TABLE_KEYWORDS: &[&str] = &[
    "table", "grid", "list", "row", "data", "result", "item", "record", "entry", "collection",
];
const CELL_TAGS: &[&str] = &[
    "td", "th", "li", "span", "p", "a", "label", "strong", "em", "b", "code", "time", "dt", "dd",
];
const CELL_CLASS_HINTS: &[&str] = &[
    "cell", "col", "field", "value", "name", "title", "price", "amount", "label",
];
/// Candidates scoring within this margin below the threshold are worth a
/// diagnostic, not a table.
const NEAR_MISS_MARGIN: f32 = 0.15;
/// Text lengths are bucketed this coarsely for structural signatures.
const TEXT_BUCKET: usize = 50;

fn is_container_like(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    if CONTAINER_TAGS.contains(&doc.tag(node).as_str()) {
        return true;
    }
    if doc
        .attr(node, "role")
        .is_some_and(|role| CONTAINER_ROLES.contains(&role.to_ascii_lowercase().as_str()))
    {
        return true;
    }
    let classes = class_attr(doc, node).to_ascii_lowercase();
    CONTAINER_CLASS_HINTS
        .iter()
        .any(|hint| classes.contains(hint))
}

/// `max(0, 1 - maxDeviation / |mean|)` consistency of a measurement series.
fn consistency(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 1.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let max_deviation = values
        .iter()
        .map(|value| (value - mean).abs())
        .fold(0.0_f64, f64::max);
    if mean.abs() < f64::EPSILON {
        return if max_deviation < f64::EPSILON { 1.0 } else { 0.0 };
    }
    (1.0 - max_deviation / mean.abs()).max(0.0)
}

fn structural_signature(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> String {
    let mut child_tags: Vec<String> = doc
        .children(node)
        .into_iter()
        .map(|child| doc.tag(child))
        .collect();
    child_tags.sort();

    let subtree = descendants(doc, node);
    let has_image = subtree.iter().any(|&n| doc.tag(n) == "img");
    let has_link = subtree.iter().any(|&n| doc.tag(n) == "a");
    let has_input = subtree
        .iter()
        .any(|&n| matches!(doc.tag(n).as_str(), "input" | "select" | "textarea"));

    format!(
        "{}|{}|{}|{}{}{}",
        doc.tag(node),
        child_tags.join(","),
        text_content(doc, node).chars().count() / TEXT_BUCKET,
        u8::from(has_image),
        u8::from(has_link),
        u8::from(has_input),
    )
}

fn structural_similarity(doc: &(impl DocumentAccessor + ?Sized), children: &[NodeId]) -> f32 {
    if children.is_empty() {
        return 0.0;
    }
    let mut groups: HashMap<String, usize> = HashMap::new();
    for &child in children {
        *groups.entry(structural_signature(doc, child)).or_insert(0) += 1;
    }
    let largest = groups.values().copied().max().unwrap_or(0);
    largest as f32 / children.len() as f32
}

fn visual_alignment(doc: &(impl DocumentAccessor + ?Sized), children: &[NodeId]) -> f32 {
    let rects: Vec<_> = children
        .iter()
        .map(|&child| doc.bounding_rect(child))
        .filter(crate::dom::Rect::has_area)
        .collect();
    if rects.len() < 2 {
        return 0.0;
    }

    let axis_scores = [
        consistency(&rects.iter().map(|r| r.x).collect::<Vec<_>>()),
        consistency(&rects.iter().map(crate::dom::Rect::right).collect::<Vec<_>>()),
        consistency(&rects.iter().map(|r| r.height).collect::<Vec<_>>()),
        consistency(&rects.iter().map(|r| r.width).collect::<Vec<_>>()),
    ];
    let axis_average = axis_scores.iter().sum::<f64>() / axis_scores.len() as f64;

    let mut tops: Vec<f64> = rects.iter().map(|r| r.y).collect();
    tops.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let gaps: Vec<f64> = tops.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let spacing = consistency(&gaps);

    ((axis_average + spacing) / 2.0) as f32
}

fn content_homogeneity(doc: &(impl DocumentAccessor + ?Sized), children: &[NodeId]) -> f32 {
    if children.is_empty() {
        return 0.0;
    }

    // Feature repetition: text length, link count, image count per child.
    let mut text_lengths = Vec::with_capacity(children.len());
    let mut link_counts = Vec::with_capacity(children.len());
    let mut image_counts = Vec::with_capacity(children.len());
    for &child in children {
        let subtree = descendants(doc, child);
        text_lengths.push(text_content(doc, child).chars().count() as f64);
        link_counts.push(subtree.iter().filter(|&&n| doc.tag(n) == "a").count() as f64);
        image_counts.push(subtree.iter().filter(|&&n| doc.tag(n) == "img").count() as f64);
    }
    let repetition = (consistency(&text_lengths)
        + consistency(&link_counts)
        + consistency(&image_counts))
        / 3.0;

    // Column type consistency: classify every cell and reward columns whose
    // children agree.
    let rows: Vec<Vec<String>> = children
        .iter()
        .map(|&child| extract_row_cells(doc, child))
        .collect();
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let type_consistency = if width == 0 {
        0.0
    } else {
        let mut total = 0.0_f64;
        for column in 0..width {
            let types: Vec<_> = rows
                .iter()
                .filter_map(|row| row.get(column))
                .map(|cell| classify_cell(cell))
                .collect();
            if types.is_empty() {
                continue;
            }
            let mut counts: HashMap<_, usize> = HashMap::new();
            for cell_type in &types {
                *counts.entry(*cell_type).or_insert(0) += 1;
            }
            let modal = counts.values().copied().max().unwrap_or(0);
            total += modal as f64 / types.len() as f64;
        }
        total / width as f64
    };

    ((repetition + type_consistency) / 2.0) as f32
}

fn has_heading_descendant(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    descendants(doc, node).into_iter().any(|n| {
        matches!(
            doc.tag(n).as_str(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" | "thead"
        ) || doc.attr(n, "role").is_some_and(|role| {
            matches!(role.as_str(), "columnheader" | "rowheader" | "heading")
        }) || class_attr(doc, n).to_ascii_lowercase().contains("header")
    })
}

fn has_majority_shared_class(
    doc: &(impl DocumentAccessor + ?Sized),
    children: &[NodeId],
) -> bool {
    if children.len() < 2 {
        return false;
    }
    let mut counts: HashMap<String, usize> = HashMap::new();
    for &child in children {
        for class in class_list(doc, child) {
            *counts.entry(class).or_insert(0) += 1;
        }
    }
    counts.values().any(|&count| count * 2 > children.len())
}

fn semantic_clues(
    doc: &(impl DocumentAccessor + ?Sized),
    node: NodeId,
    children: &[NodeId],
) -> f32 {
    let mut score = 0.0_f32;

    let haystack = format!(
        "{} {}",
        class_attr(doc, node),
        doc.attr(node, "id").unwrap_or_default()
    )
    .to_ascii_lowercase();
    let keyword_hits = TABLE_KEYWORDS
        .iter()
        .filter(|keyword| haystack.contains(*keyword))
        .count();
    score += (keyword_hits as f32 * 0.2).min(0.4);

    if has_heading_descendant(doc, node) {
        score += 0.3;
    }
    if has_majority_shared_class(doc, children) {
        score += 0.3;
    }
    score.min(1.0)
}

fn score_container(
    doc: &(impl DocumentAccessor + ?Sized),
    node: NodeId,
    children: &[NodeId],
    options: &ScanOptions,
) -> f32 {
    let weights = options.weights;
    let combined = structural_similarity(doc, children) * weights.structural
        + visual_alignment(doc, children) * weights.visual
        + content_homogeneity(doc, children) * weights.content
        + semantic_clues(doc, node, children) * weights.semantic;
    combined.clamp(0.0, 1.0)
}

/// Greedily keeps the highest-confidence candidate out of every
/// ancestor/descendant conflict, capped at `max_candidates`.
fn filter_overlaps(
    doc: &(impl DocumentAccessor + ?Sized),
    mut candidates: Vec<Candidate>,
    max_candidates: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_candidates {
            break;
        }
        let overlaps = kept.iter().any(|existing| {
            existing.container == candidate.container
                || is_ancestor(doc, existing.container, candidate.container)
                || is_ancestor(doc, candidate.container, existing.container)
        });
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

/// Discovers containers whose children look like table rows without any
/// table markup.
pub fn find_implicit_candidates(
    doc: &(impl DocumentAccessor + ?Sized),
    options: &ScanOptions,
    warnings: &mut Vec<ScanWarning>,
) -> Vec<Candidate> {
    let mut scored = Vec::new();
    for node in descendants(doc, doc.root()) {
        if !is_container_like(doc, node) || !is_visible(doc, node) {
            continue;
        }
        let children: Vec<NodeId> = doc
            .children(node)
            .into_iter()
            .filter(|&child| is_visible(doc, child))
            .collect();
        if children.len() < 2 {
            continue;
        }

        let confidence = score_container(doc, node, &children, options);
        if confidence > options.candidate_threshold {
            scored.push(Candidate {
                container: node,
                confidence,
                children,
            });
        } else if confidence > options.candidate_threshold - NEAR_MISS_MARGIN {
            warnings.push(
                ScanWarning::new(
                    WarningCode::NearMissCandidate,
                    "container scored just below the candidate threshold",
                )
                .with_locator(build_locator(doc, node, options.max_locator_depth))
                .with_confidence(confidence),
            );
        }
    }

    filter_overlaps(doc, scored, options.max_candidates)
}

/// Header test for a generic row: semantic markers, bold weight, enlarged
/// font, or a painted background.
pub fn looks_like_header(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    let tag = doc.tag(node);
    if matches!(
        tag.as_str(),
        "th" | "thead" | "header" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
    ) {
        return true;
    }
    if doc.attr(node, "role").is_some_and(|role| {
        matches!(role.as_str(), "columnheader" | "rowheader" | "heading")
    }) {
        return true;
    }
    let classes = class_attr(doc, node).to_ascii_lowercase();
    if ["header", "heading", "head", "title"]
        .iter()
        .any(|hint| classes.contains(hint))
    {
        return true;
    }
    if doc.style(node, "font-weight").is_some_and(|weight| {
        weight == "bold" || weight.parse::<u32>().is_ok_and(|value| value >= 600)
    }) {
        return true;
    }
    if doc.style(node, "font-size").is_some_and(|size| {
        size.trim_end_matches("px")
            .trim()
            .parse::<f64>()
            .is_ok_and(|value| value > 16.0)
    }) {
        return true;
    }
    doc.style(node, "background-color").is_some_and(|color| {
        !matches!(color.as_str(), "transparent" | "none" | "rgba(0, 0, 0, 0)")
    })
}

fn is_leaf(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    doc.children(node).is_empty()
}

/// Extracts the cells of one row-like element. Strategies in order: direct
/// text chunks, structural leaf selectors, whole-element text. First
/// non-empty strategy wins.
pub fn extract_row_cells(doc: &(impl DocumentAccessor + ?Sized), row: NodeId) -> Vec<String> {
    let direct: Vec<String> = doc
        .text_chunks(row)
        .into_iter()
        .map(|chunk| crate::classify::collapse_whitespace(&chunk))
        .filter(|chunk| !chunk.is_empty())
        .collect();
    if !direct.is_empty() {
        return direct;
    }

    let mut cells = Vec::new();
    for node in descendants(doc, row) {
        if matches!(doc.tag(node).as_str(), "script" | "style" | "noscript") {
            continue;
        }
        if !is_leaf(doc, node) {
            continue;
        }
        let tag = doc.tag(node);
        let classes = class_attr(doc, node).to_ascii_lowercase();
        let selected = CELL_TAGS.contains(&tag.as_str())
            || CELL_CLASS_HINTS.iter().any(|hint| classes.contains(hint));
        if !selected {
            continue;
        }
        let text = extract_cell_text(doc, node);
        if !text.trim().is_empty() {
            cells.push(text);
        }
    }
    if !cells.is_empty() {
        return cells;
    }

    let whole = extract_cell_text(doc, row);
    if whole.trim().is_empty() {
        Vec::new()
    } else {
        vec![whole]
    }
}

/// Rows of a container in document order, plus headers when the first
/// child passes the header test.
pub fn container_rows(
    doc: &(impl DocumentAccessor + ?Sized),
    container: NodeId,
) -> (Option<Vec<String>>, Vec<Vec<String>>) {
    let children: Vec<NodeId> = doc
        .children(container)
        .into_iter()
        .filter(|&child| is_visible(doc, child))
        .collect();

    let mut rows: Vec<(NodeId, Vec<String>)> = Vec::new();
    for &child in &children {
        let cells = extract_row_cells(doc, child);
        if cells.iter().any(|cell| !cell.trim().is_empty()) {
            rows.push((child, cells));
        }
    }

    let header_row = children
        .first()
        .filter(|&&first| looks_like_header(doc, first))
        .and_then(|&first| {
            rows.first()
                .filter(|(node, _)| *node == first)
                .map(|(_, cells)| cells.clone())
        });

    let data: Vec<Vec<String>> = match &header_row {
        Some(_) => rows.into_iter().skip(1).map(|(_, cells)| cells).collect(),
        None => rows.into_iter().map(|(_, cells)| cells).collect(),
    };
    (header_row, data)
}

/// Assembles a `TableData` from a generic container.
pub fn assemble_table(
    doc: &(impl DocumentAccessor + ?Sized),
    container: NodeId,
    options: &ScanOptions,
) -> TableData {
    let (header_row, rows) = container_rows(doc, container);
    let max_row_width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let headers = header_row.unwrap_or_else(|| synthetic_headers(max_row_width));
    let width = max_row_width.max(headers.len());
    let column_types = column_types_for(&rows, width, options.type_confidence_floor);
    TableData {
        headers,
        rows,
        column_types,
    }
}
