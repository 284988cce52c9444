use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use url::Url;

use crate::dom::{DocumentAccessor, NodeId, descendants, text_content};
use crate::model::{CellType, TypeGuess};

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d{1,3}(,\d{3})+|\d+)(\.\d+)?$")
        .expect("hardcoded number regex is valid")
});
static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?[$€£¥₹]\s?\d[\d,]*(\.\d+)?$|^[+-]?\d[\d,]*(\.\d+)?\s?[$€£¥₹]$")
        .expect("hardcoded currency regex is valid")
});
static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?\d[\d,]*(\.\d+)?\s?%$").expect("hardcoded percentage regex is valid")
});
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^(
            \d{4}[-/.]\d{1,2}[-/.]\d{1,2}
          | \d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}
          | [A-Za-z]{3,9}\.?\s\d{1,2},?\s\d{4}
          | \d{1,2}\s[A-Za-z]{3,9}\.?\s\d{4}
        )$",
    )
    .expect("hardcoded date regex is valid")
});
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}:\d{2}(:\d{2})?\s?([AaPp][Mm])?$")
        .expect("hardcoded time regex is valid")
});
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w.+-]+@[\w-]+(\.[\w-]+)+$").expect("hardcoded email regex is valid")
});
static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://|www\.)\S+$").expect("hardcoded url regex is valid")
});
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?[\d\s().-]{7,20}$").expect("hardcoded phone regex is valid")
});
static BOOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(true|false|yes|no|y|n|on|off)$")
        .expect("hardcoded boolean regex is valid")
});

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%m-%d-%Y",
    "%d.%m.%Y", "%d/%m/%y", "%m/%d/%y", "%b %d, %Y", "%B %d, %Y", "%b %d %Y", "%B %d %Y",
    "%d %b %Y", "%d %B %Y",
];

fn is_number(value: &str) -> bool {
    NUMBER_RE.is_match(value)
}

fn is_currency(value: &str) -> bool {
    CURRENCY_RE.is_match(value)
}

fn is_percentage(value: &str) -> bool {
    PERCENT_RE.is_match(value)
}

fn is_date(value: &str) -> bool {
    if !DATE_RE.is_match(value) {
        return false;
    }
    let cleaned = value.replace('.', "-");
    DATE_FORMATS.iter().any(|format| {
        NaiveDate::parse_from_str(value, format).is_ok()
            || NaiveDate::parse_from_str(&cleaned, format).is_ok()
    })
}

fn is_time(value: &str) -> bool {
    if !TIME_RE.is_match(value) {
        return false;
    }
    let hour = value
        .split(':')
        .next()
        .and_then(|part| part.parse::<u32>().ok());
    hour.is_some_and(|hour| hour < 24)
}

fn is_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

fn is_url(value: &str) -> bool {
    if !URL_RE.is_match(value) {
        return false;
    }
    if value.starts_with("www.") {
        return Url::parse(&format!("http://{value}")).is_ok();
    }
    Url::parse(value).is_ok()
}

fn is_phone(value: &str) -> bool {
    // Date-shaped values like 2025-13-45 would otherwise pass the
    // loose separator class.
    if !PHONE_RE.is_match(value) || DATE_RE.is_match(value) {
        return false;
    }
    let digits = value.chars().filter(char::is_ascii_digit).count();
    (7..=15).contains(&digits)
}

fn is_boolean(value: &str) -> bool {
    BOOL_RE.is_match(value)
}

/// True for optionally signed integers/decimals once thousands separators
/// and inner whitespace are stripped. Used by header-likeness tests.
pub(crate) fn is_numeric_text(value: &str) -> bool {
    let stripped: String = value
        .trim()
        .chars()
        .filter(|ch| *ch != ',' && !ch.is_whitespace())
        .collect();
    if stripped.is_empty() {
        return false;
    }
    stripped.parse::<f64>().is_ok()
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Single best type for one cell. First matching pattern wins; anything
/// unrecognized is plain text. Never fails.
#[must_use]
pub fn classify_cell(text: &str) -> CellType {
    let value = text.trim();
    if value.is_empty() {
        return CellType::Empty;
    }
    if is_number(value) {
        return CellType::Number;
    }
    if is_currency(value) {
        return CellType::Currency;
    }
    if is_date(value) {
        return CellType::Date;
    }
    if is_email(value) {
        return CellType::Email;
    }
    if is_url(value) {
        return CellType::Url;
    }
    if is_phone(value) {
        return CellType::Phone;
    }
    CellType::Text
}

/// Weighted type table for column inference. Weighting favors structured
/// types over the always-broad text fallback.
const TYPE_WEIGHTS: &[(CellType, f32, fn(&str) -> bool)] = &[
    (CellType::Number, 1.0, is_number),
    (CellType::Currency, 0.9, is_currency),
    (CellType::Percentage, 0.9, is_percentage),
    (CellType::Date, 0.9, is_date),
    (CellType::Time, 0.8, is_time),
    (CellType::Email, 0.8, is_email),
    (CellType::Url, 0.8, is_url),
    (CellType::Phone, 0.7, is_phone),
    (CellType::Boolean, 0.6, is_boolean),
];

/// Infers a column type from its values. The winning type must clear
/// `floor`, otherwise the column stays `text` with zero confidence.
#[must_use]
pub fn infer_column_type(values: &[String], floor: f32) -> TypeGuess {
    let non_empty: Vec<&str> = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();
    if non_empty.is_empty() {
        return TypeGuess::empty();
    }

    let mut best: Option<TypeGuess> = None;
    for (cell_type, weight, matcher) in TYPE_WEIGHTS {
        let matches = non_empty.iter().filter(|value| matcher(value)).count();
        let fraction = matches as f32 / non_empty.len() as f32;
        let score = fraction * weight;
        if best.is_none_or(|current| score > current.confidence) {
            best = Some(TypeGuess {
                cell_type: *cell_type,
                confidence: score,
            });
        }
    }

    match best {
        Some(guess) if guess.confidence > floor => TypeGuess {
            cell_type: guess.cell_type,
            confidence: guess.confidence.clamp(0.0, 1.0),
        },
        _ => TypeGuess::text(),
    }
}

/// Column types for a positional row matrix; missing cells count as empty.
#[must_use]
pub fn column_types_for(rows: &[Vec<String>], width: usize, floor: f32) -> Vec<TypeGuess> {
    (0..width)
        .map(|column| {
            let values: Vec<String> = rows
                .iter()
                .map(|row| row.get(column).cloned().unwrap_or_default())
                .collect();
            infer_column_type(&values, floor)
        })
        .collect()
}

/// Plain text of a cell, with machine-actionable link targets and image
/// references appended when they are not already visible in the text.
pub fn extract_cell_text(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> String {
    let mut text = collapse_whitespace(&text_content(doc, node));

    for current in std::iter::once(node).chain(descendants(doc, node)) {
        match doc.tag(current).as_str() {
            "a" => {
                if let Some(href) = doc.attr(current, "href") {
                    let href = href.trim();
                    if !href.is_empty() && !text.contains(href) {
                        text.push_str(&format!(" [{href}]"));
                    }
                }
            }
            "img" => {
                let label = doc
                    .attr(current, "alt")
                    .filter(|alt| !alt.trim().is_empty())
                    .map(|alt| alt.trim().to_string())
                    .or_else(|| {
                        doc.attr(current, "src").and_then(|src| {
                            src.rsplit('/')
                                .next()
                                .filter(|name| !name.is_empty())
                                .map(str::to_string)
                        })
                    });
                if let Some(label) = label {
                    if !text.contains(&label) {
                        text.push_str(&format!(" [IMG: {label}]"));
                    }
                }
            }
            _ => {}
        }
    }

    text.trim().to_string()
}
