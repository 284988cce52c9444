use std::fs;
use std::path::{Path, PathBuf};

/// Renders a native table node with a `th` header row followed by `td`
/// data rows.
pub fn table_node(headers: &[&str], rows: &[Vec<&str>]) -> String {
    let header_cells = headers
        .iter()
        .map(|text| format!(r#"{{"tag": "th", "text": "{text}"}}"#))
        .collect::<Vec<_>>()
        .join(",");
    let mut tr_nodes = vec![format!(r#"{{"tag": "tr", "children": [{header_cells}]}}"#)];
    for row in rows {
        let cells = row
            .iter()
            .map(|text| format!(r#"{{"tag": "td", "text": "{text}"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        tr_nodes.push(format!(r#"{{"tag": "tr", "children": [{cells}]}}"#));
    }
    format!(
        r#"{{"tag": "table", "children": [{}]}}"#,
        tr_nodes.join(",")
    )
}

/// Renders a repeating `div.row` grid with aligned rects, the shape the
/// implicit scorer is built for.
pub fn card_grid_node(rows: &[Vec<&str>]) -> String {
    let row_nodes = rows
        .iter()
        .enumerate()
        .map(|(index, cells)| {
            let spans = cells
                .iter()
                .map(|text| format!(r#"{{"tag": "span", "text": "{text}"}}"#))
                .collect::<Vec<_>>()
                .join(",");
            format!(
                r#"{{"tag": "div", "attrs": {{"class": "row"}},
                    "rect": {{"x": 0, "y": {y}, "width": 300, "height": 30}},
                    "children": [{spans}]}}"#,
                y = index * 32,
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(r#"{{"tag": "div", "attrs": {{"class": "data-list"}}, "children": [{row_nodes}]}}"#)
}

/// Renders a windowed list container that only materializes `window` of
/// its `rows` children at a time.
pub fn virtual_list_node(rows: usize, window: usize) -> String {
    let row_nodes = (0..rows)
        .map(|index| {
            format!(
                r#"{{"tag": "div", "attrs": {{"class": "row"}},
                    "rect": {{"x": 0, "y": {y}, "width": 300, "height": 30}},
                    "children": [
                        {{"tag": "span", "text": "name {index}"}},
                        {{"tag": "span", "text": "{index}"}}
                    ]}}"#,
                y = (index % window) * 30,
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"{{"tag": "div", "attrs": {{"class": "virtual-list"}},
            "styles": {{"overflow-y": "auto"}},
            "window": {window}, "children": [{row_nodes}]}}"#
    )
}

/// Wraps body children into a complete fixture document.
pub fn fixture(url: &str, body_children: &[String]) -> String {
    format!(
        r#"{{"url": "{url}", "body": {{"tag": "body", "children": [{}]}}}}"#,
        body_children.join(",")
    )
}

pub fn write_fixture(dir: &Path, name: &str, json: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, json).expect("fixture file should be written");
    path
}
