//! Record decoding and display encoding.
//!
//! Inbound payloads arrive as literal text that resembles JSON but uses
//! `'single quotes'` and `True`/`False`/`None`. [`decode`] parses that text
//! with a restricted literal parser; [`encode_text`] renders a record back in
//! the same syntax, and [`encode_csv_row`] flattens one into a CSV-like line.

mod literal;

use serde_json::{Map, Value};
use std::fmt::Write;
use thiserror::Error;

/// A stored record: field name to JSON-like value, in insertion order
pub type Record = Map<String, Value>;

/// Errors that can occur while decoding a payload
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Malformed payload at offset {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
}

/// Decode a payload into a record. The payload must be a mapping literal.
pub fn decode(payload: &str) -> Result<Record, DecodeError> {
    match literal::parse(payload)? {
        Value::Object(record) => Ok(record),
        other => Err(DecodeError::Malformed {
            offset: 0,
            reason: format!("payload must be a mapping, got {}", type_name(&other)),
        }),
    }
}

/// Render the full record, fields in stored order.
pub fn encode_text(record: &Record) -> String {
    let mut out = String::new();
    write_mapping(&mut out, record.iter());
    out
}

/// Flatten a record into one comma-joined line.
///
/// The named fields come first, in order, as their textual form (empty when
/// absent). A final field holds every remaining field rendered as a mapping.
/// Values are not escaped: commas or quotes inside a value pass through.
pub fn encode_csv_row(record: &Record, fieldnames: &[&str]) -> String {
    let mut cells: Vec<String> = fieldnames
        .iter()
        .map(|name| record.get(*name).map(cell_text).unwrap_or_default())
        .collect();

    let mut rest = String::new();
    write_mapping(
        &mut rest,
        record
            .iter()
            .filter(|(name, _)| !fieldnames.contains(&name.as_str())),
    );
    cells.push(rest);

    cells.join(",")
}

/// Render a single value in literal syntax.
pub fn render_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Render a string as a quoted literal.
pub fn render_str(s: &str) -> String {
    let mut out = String::new();
    write_str(&mut out, s);
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => render_value(other),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_str(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_mapping(out, map.iter()),
    }
}

fn write_mapping<'a>(out: &mut String, fields: impl Iterator<Item = (&'a String, &'a Value)>) {
    out.push('{');
    for (i, (name, value)) in fields.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_str(out, name);
        out.push_str(": ");
        write_value(out, value);
    }
    out.push('}');
}

/// Quote with `'` unless the text contains `'` and no `"`.
fn write_str(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };

    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() && (c as u32) < 0x100 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FIELDS: [&str; 5] = ["received", "name", "email", "affiliation", "platform"];

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_decode_relaxed_literal() {
        let decoded = decode(
            "{'name': 'James Stewart', 'rank': 'Brigadier General', 'serial number': 'O-433210'}",
        )
        .unwrap();

        assert_eq!(
            decoded,
            record(json!({
                "name": "James Stewart",
                "rank": "Brigadier General",
                "serial number": "O-433210"
            }))
        );
    }

    #[test]
    fn test_decode_accepts_strict_json() {
        let decoded = decode(r#"{"id": 36, "ok": true, "tags": ["a", null]}"#).unwrap();
        assert_eq!(decoded, record(json!({"id": 36, "ok": true, "tags": ["a", null]})));
    }

    #[test]
    fn test_decode_requires_mapping() {
        for payload in ["[1, 2]", "'text'", "None", "42"] {
            assert!(matches!(
                decode(payload),
                Err(DecodeError::Malformed { .. })
            ));
        }
    }

    #[test]
    fn test_encode_text_literal_syntax() {
        let r = record(json!({
            "name": "Ann",
            "n": 1,
            "x": 2.5,
            "ok": true,
            "none": null,
            "list": [1, "two", false],
            "nested": {"q": "it's"}
        }));

        assert_eq!(
            encode_text(&r),
            "{'name': 'Ann', 'n': 1, 'x': 2.5, 'ok': True, 'none': None, \
             'list': [1, 'two', False], 'nested': {'q': \"it's\"}}"
        );
    }

    #[test]
    fn test_encode_text_escapes_round_trip() {
        let r = record(json!({
            "both": "it's \"quoted\"",
            "ctl": "tab\tnew\nline\u{1}",
            "back": "C:\\path"
        }));

        let text = encode_text(&r);
        assert_eq!(decode(&text).unwrap(), r);
    }

    #[test]
    fn test_encode_text_is_stable() {
        let decoded = decode("{'name': 'Ann', 'rank': 'Colonel', 'meta': (1, None)}").unwrap();
        let first = encode_text(&decoded);
        let second = encode_text(&decode(&first).unwrap());

        assert_eq!(first, encode_text(&decoded));
        assert_eq!(first, second);
    }

    #[test]
    fn test_csv_row_fixed_fields_only() {
        let r = record(json!({
            "received": "2024-01-02T030405-0500",
            "name": "Ann",
            "email": "ann@example.com",
            "affiliation": "Army",
            "platform": "linux"
        }));

        assert_eq!(
            encode_csv_row(&r, &FIELDS),
            "2024-01-02T030405-0500,Ann,ann@example.com,Army,linux,{}"
        );
    }

    #[test]
    fn test_csv_row_missing_and_extra_fields() {
        let r = record(json!({
            "rank": "Colonel",
            "name": "Ann",
            "id": 7,
            "received": "2024-01-02T030405-0500"
        }));

        assert_eq!(
            encode_csv_row(&r, &FIELDS),
            "2024-01-02T030405-0500,Ann,,,,{'rank': 'Colonel', 'id': 7}"
        );
    }

    #[test]
    fn test_csv_row_does_not_escape() {
        let r = record(json!({"name": "Stewart, James", "platform": ["a", "b"]}));

        assert_eq!(
            encode_csv_row(&r, &FIELDS),
            ",Stewart, James,,,['a', 'b'],{}"
        );
    }
}
