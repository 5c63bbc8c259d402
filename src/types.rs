//! Type definitions for mappings and rows

use serde_json::Value;
use std::fmt;

/// One output column and the JSON field that feeds it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    /// Header written to row 1 of the output sheet
    pub output_column: String,
    /// Key looked up in each JSON record
    pub source_field: String,
}

impl MappingEntry {
    /// Create a new mapping entry
    pub fn new(output_column: impl Into<String>, source_field: impl Into<String>) -> Self {
        MappingEntry {
            output_column: output_column.into(),
            source_field: source_field.into(),
        }
    }
}

/// Ordered field mapping built once per job from the template
///
/// Entry order is output column order. The list is immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    entries: Vec<MappingEntry>,
}

impl Mapping {
    /// Build a mapping from entries already in column order
    pub fn new(entries: Vec<MappingEntry>) -> Self {
        Mapping { entries }
    }

    /// Mapping entries in output column order
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Number of output columns
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if mapping has no columns
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Output headers in column order
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.output_column.as_str())
    }

    /// Build the output row for one JSON record
    ///
    /// Returns `None` for scalars and null. Missing and null fields become
    /// empty cells; an array is structured but has no named fields, so every
    /// cell of its row is empty.
    pub fn map_record(&self, record: &Value) -> Option<OutputRow> {
        let cells = match record {
            Value::Object(object) => self
                .entries
                .iter()
                .map(|entry| match object.get(&entry.source_field) {
                    None | Some(Value::Null) => String::new(),
                    Some(value) => stringify(value),
                })
                .collect(),
            Value::Array(_) => vec![String::new(); self.entries.len()],
            _ => return None,
        };
        Some(OutputRow { cells })
    }
}

// Largest integer an f64 holds exactly (2^53)
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

// Strings are taken verbatim, numbers in their shortest form, everything else
// uses its JSON text
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n),
        other => other.to_string(),
    }
}

/// Integral floats drop the fraction: `30.0` -> `30`, `1e2` -> `100`, `-0.0` -> `0`
fn format_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
            let mut digits = itoa::Buffer::new();
            digits.format(f as i64).to_string()
        }
        _ => n.to_string(),
    }
}

/// Represents one row of output cells, aligned with the mapping
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputRow {
    /// Cell values in column order
    pub cells: Vec<String>,
}

impl OutputRow {
    /// Get cell at column index
    pub fn get(&self, col: usize) -> Option<&str> {
        self.cells.get(col).map(String::as_str)
    }

    /// Get number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if row has no cells
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl fmt::Display for OutputRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cells.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping() -> Mapping {
        Mapping::new(vec![
            MappingEntry::new("Name", "full_name"),
            MappingEntry::new("Age", "years"),
        ])
    }

    #[test]
    fn test_map_record_missing_field() {
        let mapping = mapping();

        let row = mapping
            .map_record(&json!({"full_name": "Ann", "years": 30}))
            .unwrap();
        assert_eq!(row.to_string(), "Ann,30");

        let row = mapping.map_record(&json!({"full_name": "Bo"})).unwrap();
        assert_eq!(row.cells, vec!["Bo".to_string(), String::new()]);

        let row = mapping
            .map_record(&json!({"full_name": null, "years": 1.5}))
            .unwrap();
        assert_eq!(row.cells, vec![String::new(), "1.5".to_string()]);
    }

    #[test]
    fn test_map_record_non_object() {
        let mapping = mapping();
        assert!(mapping.map_record(&json!(null)).is_none());
        assert!(mapping.map_record(&json!(42)).is_none());
        assert!(mapping.map_record(&json!("text")).is_none());
        assert!(mapping.map_record(&json!(false)).is_none());

        let row = mapping.map_record(&json!([1, 2])).unwrap();
        assert_eq!(row.cells, vec![String::new(), String::new()]);
    }

    #[test]
    fn test_stringify_scalars() {
        let mapping = Mapping::new(vec![MappingEntry::new("V", "v")]);
        let cell = |v: Value| mapping.map_record(&json!({ "v": v })).unwrap().cells[0].clone();

        assert_eq!(cell(json!(true)), "true");
        assert_eq!(cell(json!(-7)), "-7");
        assert_eq!(cell(json!({"a": 1})), "{\"a\":1}");

        // Integral floats lose the fraction
        assert_eq!(cell(json!(30.0)), "30");
        assert_eq!(cell(json!(-0.0)), "0");
        assert_eq!(cell(json!(1.5)), "1.5");
        assert_eq!(cell(json!(-2.25)), "-2.25");
    }

    #[test]
    fn test_number_text_from_source() {
        let mapping = Mapping::new(vec![MappingEntry::new("V", "v")]);
        let cell = |text: &str| {
            let record: Value = serde_json::from_str(text).unwrap();
            mapping.map_record(&record).unwrap().cells[0].clone()
        };

        assert_eq!(cell(r#"{"v":30.0}"#), "30");
        assert_eq!(cell(r#"{"v":1e2}"#), "100");
        assert_eq!(cell(r#"{"v":-0.0}"#), "0");
        assert_eq!(cell(r#"{"v":18446744073709551615}"#), "18446744073709551615");
    }
}
