mod common;

use std::time::Duration;

use tablescan::{
    CellType, DocumentAccessor, ScanEngine, ScanError, ScanOptions, SyntheticDocument, TableKind,
};
use tempfile::tempdir;

fn scan(doc: &SyntheticDocument, options: ScanOptions) -> tablescan::ScanReport {
    let mut engine = ScanEngine::new(doc, options).expect("options should validate");
    engine
        .request_scan(&mut |_| {})
        .expect("scan should run")
        .expect("scan should not be skipped")
}

#[test]
fn explicit_table_with_currency_column() {
    let json = common::fixture(
        "https://example.test/report",
        &[common::table_node(
            &["Name", "Amount", "Joined"],
            &[
                vec!["Alice", "$1,200.00", "2024-01-15"],
                vec!["Bob", "$80.50", "2024-03-02"],
            ],
        )],
    );
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let report = scan(&doc, ScanOptions::default());

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.id, 1);
    assert_eq!(record.kind, TableKind::Explicit);
    assert!((record.confidence - 1.0).abs() < f32::EPSILON);
    assert_eq!(record.data.headers, vec!["Name", "Amount", "Joined"]);
    assert_eq!(record.data.rows.len(), 2);
    assert_eq!(record.data.column_types[1].cell_type, CellType::Currency);
    assert_eq!(record.data.column_types[2].cell_type, CellType::Date);
    assert!(record.preview.contains("Name"));
}

#[test]
fn identical_tables_collapse_to_one_record() {
    let table = common::table_node(
        &["Sku", "Qty"],
        &[vec!["A-1", "3"], vec!["B-2", "5"]],
    );
    let json = common::fixture("https://example.test/", &[table.clone(), table]);
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let report = scan(&doc, ScanOptions::default());

    assert_eq!(report.records.len(), 1);
}

#[test]
fn mixed_documents_report_explicit_and_implicit_tables() {
    let json = common::fixture(
        "https://example.test/",
        &[
            common::table_node(&["Id", "State"], &[vec!["1", "open"], vec!["2", "closed"]]),
            common::card_grid_node(&[
                vec!["Item 0", "$0.50", "in stock"],
                vec!["Item 1", "$1.50", "in stock"],
                vec!["Item 2", "$2.50", "sold out"],
                vec!["Item 3", "$3.50", "in stock"],
            ]),
        ],
    );
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let report = scan(&doc, ScanOptions::default());

    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].kind, TableKind::Explicit);
    assert_eq!(report.records[1].kind, TableKind::Implicit);
    assert!(report.records[1].confidence > 0.6);
    assert_eq!(report.records[1].data.rows.len(), 4);
}

#[test]
fn virtualized_lists_are_recovered_in_full() {
    let json = common::fixture(
        "https://example.test/",
        &[common::virtual_list_node(40, 8)],
    );
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let report = scan(&doc, ScanOptions::default());

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(record.kind, TableKind::Implicit);
    assert_eq!(record.data.unique_row_count(), 40);
    assert_eq!(record.data.rows[0][0], "name 0");
    assert_eq!(record.data.rows[39][0], "name 39");

    // Scanning must leave the scroller where it started.
    let container = doc.children(doc.root())[0];
    assert!(doc.scroll_offset(container).abs() < f64::EPSILON);
}

#[test]
fn locators_round_trip_through_extract_at() {
    let json = common::fixture(
        "https://example.test/",
        &[common::table_node(
            &["Host", "Port"],
            &[vec!["db-1", "5432"], vec!["db-2", "5433"]],
        )],
    );
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let report = scan(&doc, ScanOptions::default());
    let record = &report.records[0];

    let engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
    let extracted = engine
        .extract_at(&record.locator)
        .expect("locator should resolve");
    assert_eq!(extracted, record.data);
    assert!(engine.extract_at("div.missing:7 > span:1").is_none());
}

#[test]
fn empty_documents_exhaust_retries_and_report_embeds() {
    let json = common::fixture(
        "https://example.test/",
        &[r#"{"tag": "iframe", "attrs": {"src": "https://elsewhere.test/grid"}}"#.to_string()],
    );
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let options = ScanOptions {
        retry_delay: Duration::from_millis(1),
        ..ScanOptions::default()
    };
    let report = scan(&doc, options);

    assert!(report.records.is_empty());
    assert_eq!(report.attempts, 3);
    assert_eq!(report.embedded_content_hints.len(), 1);
    assert!(!report.embedded_content_hints[0].same_origin);
}

#[test]
fn restricted_schemes_are_refused() {
    let json = common::fixture("about:blank", &[]);
    let doc = SyntheticDocument::from_json_str(&json).expect("fixture should parse");
    let mut engine = ScanEngine::new(&doc, ScanOptions::default()).expect("engine");
    let error = engine
        .request_scan(&mut |_| {})
        .expect_err("restricted scheme should be refused");
    assert!(matches!(error, ScanError::InaccessibleDocument(_)));
}

#[test]
fn fixtures_load_from_disk() {
    let dir = tempdir().expect("tempdir should be created");
    let json = common::fixture(
        "https://example.test/",
        &[common::table_node(&["K", "V"], &[vec!["a", "1"]])],
    );
    let path = common::write_fixture(dir.path(), "page.json", &json);

    let doc = SyntheticDocument::from_json_file(&path).expect("fixture should load");
    let report = scan(&doc, ScanOptions::default());
    assert_eq!(report.records.len(), 1);
}
