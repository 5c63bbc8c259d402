//! Mapping extraction from a template workbook
//!
//! Row 1 of the template's first sheet holds output headers, row 2 the JSON
//! property each header is filled from. Column A is a label column and is skipped.
//!
//! ```text
//!      A          B            C
//! 1    Header     Name         Age
//! 2    Field      full_name    [years]
//! ```

use crate::error::{ConvertError, Result};
use crate::streaming_reader::StreamingReader;
use crate::types::{Mapping, MappingEntry};
use std::path::Path;

/// Read the mapping from the first worksheet of `template`
///
/// The template is closed before this returns, on success or failure.
pub fn extract_mapping<P: AsRef<Path>>(template: P) -> Result<Mapping> {
    let mut reader = StreamingReader::open(template)?;
    let mut rows = reader.rows_by_index(0)?;

    let header_row = rows.next().transpose()?.unwrap_or_default();
    let field_row = rows.next().transpose()?.unwrap_or_default();

    let mapping = mapping_from_rows(&header_row, &field_row)?;
    tracing::info!(columns = mapping.len(), "✅ Extracted headers & JSON mapping");
    Ok(mapping)
}

/// Build a mapping from the raw header and field rows
///
/// Empty cells are dropped from each row independently and the survivors are
/// paired left to right.
pub fn mapping_from_rows<S: AsRef<str>>(header_row: &[S], field_row: &[S]) -> Result<Mapping> {
    let headers: Vec<String> = header_row
        .iter()
        .skip(1)
        .map(|cell| cell.as_ref().trim().to_string())
        .filter(|cell| !cell.is_empty())
        .collect();

    let fields: Vec<String> = field_row
        .iter()
        .skip(1)
        .map(|cell| clean_field_name(cell.as_ref()))
        .filter(|cell| !cell.is_empty())
        .collect();

    if headers.len() != fields.len() || headers.is_empty() {
        return Err(ConvertError::ConfigurationMismatch {
            headers: headers.len(),
            fields: fields.len(),
        });
    }

    Ok(Mapping::new(
        headers
            .into_iter()
            .zip(fields)
            .map(|(header, field)| MappingEntry::new(header, field))
            .collect(),
    ))
}

/// Trim and strip bracket decoration: `" [years] "` -> `"years"`
fn clean_field_name(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '[' && *c != ']')
        .collect::<String>()
        .trim()
        .to_string()
}
