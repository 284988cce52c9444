use crate::classify::{column_types_for, extract_cell_text, is_numeric_text};
use crate::dom::{DocumentAccessor, NodeId, descendants, is_visible};
use crate::model::TableData;
use crate::options::ScanOptions;

/// Header detection only ever looks at the leading rows of a table.
const HEADER_SCAN_ROWS: usize = 6;
/// A row reads as a header when more than this share of cells is non-numeric.
const NON_NUMERIC_HEADER_RATIO: f32 = 0.7;

pub fn is_table_node(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    doc.tag(node) == "table"
}

pub fn find_explicit_tables(doc: &(impl DocumentAccessor + ?Sized)) -> Vec<NodeId> {
    descendants(doc, doc.root())
        .into_iter()
        .filter(|&node| is_table_node(doc, node) && is_visible(doc, node))
        .collect()
}

fn collect_rows(doc: &(impl DocumentAccessor + ?Sized), table: NodeId) -> Vec<NodeId> {
    descendants(doc, table)
        .into_iter()
        .filter(|&node| doc.tag(node) == "tr")
        .collect()
}

fn row_cells(doc: &(impl DocumentAccessor + ?Sized), row: NodeId) -> Vec<NodeId> {
    doc.children(row)
        .into_iter()
        .filter(|&cell| matches!(doc.tag(cell).as_str(), "td" | "th"))
        .collect()
}

fn span_of(doc: &(impl DocumentAccessor + ?Sized), cell: NodeId, name: &str) -> usize {
    doc.attr(cell, name)
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}

fn is_header_like(doc: &(impl DocumentAccessor + ?Sized), row: NodeId) -> bool {
    let cells = row_cells(doc, row);
    if cells.is_empty() {
        return false;
    }
    if cells.iter().any(|&cell| doc.tag(cell) == "th") {
        return true;
    }
    if cells
        .iter()
        .any(|&cell| span_of(doc, cell, "colspan") > 1 || span_of(doc, cell, "rowspan") > 1)
    {
        return true;
    }
    let non_numeric = cells
        .iter()
        .filter(|&&cell| !is_numeric_text(&extract_cell_text(doc, cell)))
        .count();
    non_numeric as f32 / cells.len() as f32 > NON_NUMERIC_HEADER_RATIO
}

/// Number of leading rows treated as headers. Never consumes the whole
/// table; when every row looks header-like a single header row is kept.
fn header_row_count(doc: &(impl DocumentAccessor + ?Sized), rows: &[NodeId]) -> usize {
    let mut count = 0;
    for &row in rows.iter().take(HEADER_SCAN_ROWS) {
        if is_header_like(doc, row) {
            count += 1;
        } else if count > 0 {
            break;
        }
    }

    if count == 0 {
        let first_has_th = rows.first().is_some_and(|&row| {
            row_cells(doc, row)
                .iter()
                .any(|&cell| doc.tag(cell) == "th")
        });
        return usize::from(first_has_th);
    }

    if count >= rows.len() { 1 } else { count }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpannedCell {
    pub text: String,
    pub col_span: usize,
    pub row_span: usize,
}

/// Flattens a multi-row header region into one label per column. Each cell
/// is placed into every grid slot its spans cover; per column, distinct
/// labels are joined top-down with " - ".
#[must_use]
pub fn flatten_headers(rows: &[Vec<SpannedCell>]) -> Vec<String> {
    let row_count = rows.len();
    let mut grid: Vec<Vec<Option<String>>> = vec![Vec::new(); row_count];

    for (row_index, row) in rows.iter().enumerate() {
        let mut column = 0;
        for cell in row {
            while grid[row_index]
                .get(column)
                .is_some_and(Option::is_some)
            {
                column += 1;
            }
            let row_end = (row_index + cell.row_span.max(1)).min(row_count);
            let col_end = column + cell.col_span.max(1);
            for target_row in row_index..row_end {
                if grid[target_row].len() < col_end {
                    grid[target_row].resize(col_end, None);
                }
                for slot in &mut grid[target_row][column..col_end] {
                    *slot = Some(cell.text.clone());
                }
            }
            column = col_end;
        }
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|column| {
            let mut parts: Vec<&str> = Vec::new();
            for row in &grid {
                if let Some(Some(text)) = row.get(column) {
                    let text = text.trim();
                    if !text.is_empty() && !parts.contains(&text) {
                        parts.push(text);
                    }
                }
            }
            if parts.is_empty() {
                format!("Column {}", column + 1)
            } else {
                parts.join(" - ")
            }
        })
        .collect()
}

fn spanned_cells(doc: &(impl DocumentAccessor + ?Sized), row: NodeId) -> Vec<SpannedCell> {
    row_cells(doc, row)
        .into_iter()
        .map(|cell| SpannedCell {
            text: extract_cell_text(doc, cell),
            col_span: span_of(doc, cell, "colspan"),
            row_span: span_of(doc, cell, "rowspan"),
        })
        .collect()
}

pub fn synthetic_headers(width: usize) -> Vec<String> {
    (1..=width).map(|index| format!("Column {index}")).collect()
}

/// Parses native table markup into a header/row matrix.
pub fn analyze_table(
    doc: &(impl DocumentAccessor + ?Sized),
    table: NodeId,
    options: &ScanOptions,
) -> TableData {
    let rows = collect_rows(doc, table);
    if rows.is_empty() {
        return TableData::default();
    }

    let header_count = header_row_count(doc, &rows);
    let data_rows: Vec<Vec<String>> = rows[header_count..]
        .iter()
        .map(|&row| {
            row_cells(doc, row)
                .into_iter()
                .map(|cell| extract_cell_text(doc, cell))
                .collect::<Vec<_>>()
        })
        .filter(|cells| cells.iter().any(|cell| !cell.trim().is_empty()))
        .collect();

    let headers = if header_count > 0 {
        let spanned: Vec<Vec<SpannedCell>> = rows[..header_count]
            .iter()
            .map(|&row| spanned_cells(doc, row))
            .collect();
        flatten_headers(&spanned)
    } else {
        let width = data_rows.iter().map(Vec::len).max().unwrap_or(0);
        synthetic_headers(width)
    };

    let width = data_rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(headers.len());
    let column_types = column_types_for(&data_rows, width, options.type_confidence_floor);

    TableData {
        headers,
        rows: data_rows,
        column_types,
    }
}
