//! Streaming reader for XLSX templates
//!
//! This module provides a reader that processes worksheet data row-by-row with an
//! iterator interface. It is used to pull the header and field rows out of a
//! template workbook.
//!
//! **Memory Usage:**
//! - Shared Strings Table (SST): Loaded fully (templates keep this tiny)
//! - Worksheet XML: decompressed entry, scanned in 128 KB chunks
//!
//! **Trade-offs:**
//! - Only supports simple XLSX files (no formatting, no formulas evaluation)
//! - Sequential read only (can't jump to random rows)

use crate::error::{ConvertError, Result};
use crate::fast_writer::StreamingZipReader;
use std::io::{Cursor, Read};
use std::path::Path;

/// Streaming reader for XLSX files
pub struct StreamingReader {
    archive: StreamingZipReader,
    sst: Vec<String>,
    sheet_names: Vec<String>,
    sheet_paths: Vec<String>,
}

impl StreamingReader {
    /// Open XLSX file for streaming read
    ///
    /// Loads the shared strings table and the sheet directory. Worksheet data is
    /// only decompressed when rows are requested.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use json_excelstream::streaming_reader::StreamingReader;
    ///
    /// let mut reader = StreamingReader::open("template.xlsx")?;
    /// for row in reader.rows_by_index(0)?.take(2) {
    ///     println!("{:?}", row?);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut archive = StreamingZipReader::open(path.as_ref())
            .map_err(|e| ConvertError::TemplateRead(format!("Failed to open ZIP: {}", e)))?;

        let sst = Self::load_shared_strings(&mut archive)?;
        let (sheet_names, sheet_paths) = Self::load_sheet_info(&mut archive)?;

        tracing::debug!(
            shared_strings = sst.len(),
            sheets = ?sheet_names,
            "opened workbook"
        );

        Ok(StreamingReader {
            archive,
            sst,
            sheet_names,
            sheet_paths,
        })
    }

    /// Get list of sheet names
    pub fn sheet_names(&self) -> &[String] {
        &self.sheet_names
    }

    /// Read rows by sheet index
    ///
    /// # Arguments
    /// * `sheet_index` - Zero-based sheet index (0 = first sheet)
    pub fn rows_by_index(&mut self, sheet_index: usize) -> Result<RowIterator<'_, Cursor<Vec<u8>>>> {
        let sheet_name = self
            .sheet_names
            .get(sheet_index)
            .ok_or_else(|| {
                ConvertError::TemplateRead(format!(
                    "Sheet index {} out of bounds. Available: {} sheets",
                    sheet_index,
                    self.sheet_names.len()
                ))
            })?
            .clone();

        self.rows(&sheet_name)
    }

    /// Stream rows from a worksheet
    ///
    /// Each item is the row's cell text, position-aligned by column letter
    /// (gaps are filled with empty strings).
    pub fn rows(&mut self, sheet_name: &str) -> Result<RowIterator<'_, Cursor<Vec<u8>>>> {
        let sheet_path = self
            .sheet_names
            .iter()
            .position(|name| name == sheet_name)
            .and_then(|idx| self.sheet_paths.get(idx))
            .ok_or_else(|| {
                ConvertError::TemplateRead(format!(
                    "Sheet '{}' not found. Available sheets: {:?}",
                    sheet_name, self.sheet_names
                ))
            })?;

        let sheet_xml = self
            .archive
            .read_entry_by_name(sheet_path)
            .map_err(|e| ConvertError::TemplateRead(format!("Failed to open sheet: {}", e)))?;

        Ok(RowIterator::new(Cursor::new(sheet_xml), &self.sst))
    }

    fn read_entry_string(archive: &mut StreamingZipReader, name: &str) -> Result<Option<String>> {
        if !archive.entries().iter().any(|e| e.name == name) {
            return Ok(None);
        }
        let data = archive
            .read_entry_by_name(name)
            .map_err(|e| ConvertError::TemplateRead(format!("Failed to read {}: {}", name, e)))?;
        String::from_utf8(data)
            .map(Some)
            .map_err(|e| ConvertError::TemplateRead(format!("{} is not UTF-8: {}", name, e)))
    }

    /// Load Shared Strings Table
    ///
    /// Rich-text entries (`<r><t>..</t></r>` runs) are concatenated.
    fn load_shared_strings(archive: &mut StreamingZipReader) -> Result<Vec<String>> {
        let mut sst = Vec::new();

        let xml_data = match Self::read_entry_string(archive, "xl/sharedStrings.xml")? {
            Some(data) => data,
            None => return Ok(sst), // No SST = all cells are inline
        };

        let mut pos = 0;
        while let Some(si_start) = find_tag(&xml_data[pos..], "si") {
            let si_start = pos + si_start;
            let si_end = match xml_data[si_start..].find("</si>") {
                Some(end) => si_start + end + 5,
                None => {
                    // <si/> has no closing tag
                    match xml_data[si_start..].find("/>") {
                        Some(end) => {
                            sst.push(String::new());
                            pos = si_start + end + 2;
                            continue;
                        }
                        None => break,
                    }
                }
            };
            sst.push(collect_text_runs(&xml_data[si_start..si_end]));
            pos = si_end;
        }

        Ok(sst)
    }

    /// Load sheet names and paths from workbook.xml
    ///
    /// Parses workbook.xml to get sheet names and their corresponding worksheet paths.
    fn load_sheet_info(archive: &mut StreamingZipReader) -> Result<(Vec<String>, Vec<String>)> {
        let mut sheet_names = Vec::new();
        let mut sheet_ids = Vec::new();

        let xml_data = Self::read_entry_string(archive, "xl/workbook.xml")?
            .ok_or_else(|| ConvertError::TemplateRead("Missing xl/workbook.xml".to_string()))?;

        // Example: <sheet name="Sheet1" sheetId="1" r:id="rId1"/>
        let mut pos = 0;
        while let Some(sheet_start) = xml_data[pos..].find("<sheet ") {
            let sheet_start = pos + sheet_start;
            let Some(sheet_end) = xml_data[sheet_start..].find('>') else {
                break;
            };
            let sheet_end = sheet_start + sheet_end + 1;
            let sheet_tag = &xml_data[sheet_start..sheet_end];

            if let (Some(name), Some(rid)) = (
                attribute_value(sheet_tag, "name"),
                attribute_value(sheet_tag, "r:id"),
            ) {
                sheet_names.push(decode_xml_entities(name));
                sheet_ids.push(rid.to_string());
            }

            pos = sheet_end;
        }

        let rels_data = Self::read_entry_string(archive, "xl/_rels/workbook.xml.rels")?
            .ok_or_else(|| {
                ConvertError::TemplateRead("Missing xl/_rels/workbook.xml.rels".to_string())
            })?;

        // Find <Relationship Id="rId1" Target="worksheets/sheet1.xml"/> for each rId
        let mut sheet_paths = Vec::new();
        for rid in &sheet_ids {
            let mut target = None;
            let mut pos = 0;
            while let Some(rel_start) = rels_data[pos..].find("<Relationship ") {
                let rel_start = pos + rel_start;
                let rel_end = rels_data[rel_start..]
                    .find('>')
                    .map(|end| rel_start + end + 1)
                    .unwrap_or(rels_data.len());
                let rel_tag = &rels_data[rel_start..rel_end];
                if attribute_value(rel_tag, "Id") == Some(rid.as_str()) {
                    target = attribute_value(rel_tag, "Target");
                    break;
                }
                pos = rel_end;
            }

            if let Some(target) = target {
                // Target is relative to xl/ unless absolute within the package
                let full_path = match target.strip_prefix('/') {
                    Some(absolute) => absolute.to_string(),
                    None => format!("xl/{}", target),
                };
                sheet_paths.push(full_path);
            }
        }

        if sheet_names.len() != sheet_paths.len() {
            return Err(ConvertError::TemplateRead(format!(
                "Mismatch between sheet names ({}) and paths ({})",
                sheet_names.len(),
                sheet_paths.len()
            )));
        }

        Ok((sheet_names, sheet_paths))
    }
}

// Decode XML entities (&lt; &gt; &quot; &apos; numeric refs, &amp; last)
fn decode_xml_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else {
            break;
        };
        let entity = &rest[1..semi];
        let decoded = match entity {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// Find `<name>` or `<name ...` (not `<names`)
fn find_tag(haystack: &str, name: &str) -> Option<usize> {
    let open = format!("<{}", name);
    let mut pos = 0;
    while let Some(found) = haystack[pos..].find(&open) {
        let start = pos + found;
        match haystack.as_bytes().get(start + open.len()) {
            Some(b'>') | Some(b' ') | Some(b'/') | Some(b'\t') | Some(b'\n') | Some(b'\r') => {
                return Some(start)
            }
            _ => pos = start + open.len(),
        }
    }
    None
}

// Value of `name="..."` inside a single tag
fn attribute_value<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {}=\"", name);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(&tag[start..start + end])
}

// Concatenate the text of every <t> element in a block
fn collect_text_runs(block: &str) -> String {
    let mut text = String::new();
    let mut pos = 0;
    while let Some(t_start) = find_tag(&block[pos..], "t") {
        let t_start = pos + t_start;
        let Some(open_end) = block[t_start..].find('>') else {
            break;
        };
        let open_end = t_start + open_end;
        if block.as_bytes()[open_end - 1] == b'/' {
            // <t/>
            pos = open_end + 1;
            continue;
        }
        let Some(t_end) = block[open_end..].find("</t>") else {
            break;
        };
        let t_end = open_end + t_end;
        text.push_str(&decode_xml_entities(&block[open_end + 1..t_end]));
        pos = t_end + 4;
    }
    text
}

/// Iterator over rows in a worksheet
pub struct RowIterator<'a, R: Read> {
    reader: R,
    sst: &'a [String],
    buffer: String,  // String buffer for accumulated data
    position: usize, // Current position in buffer
    pending: Vec<u8>, // Incomplete UTF-8 tail of the last chunk
    next_row_number: usize, // 1-based row number expected next
    queued_blank_rows: usize, // Rows skipped in the XML, emitted as empty
    eof: bool,
}

impl<'a, R: Read> RowIterator<'a, R> {
    fn new(reader: R, sst: &'a [String]) -> Self {
        RowIterator {
            reader,
            sst,
            buffer: String::new(),
            position: 0,
            pending: Vec::new(),
            next_row_number: 1,
            queued_blank_rows: 0,
            eof: false,
        }
    }

    // Returns false at EOF
    fn read_chunk(&mut self) -> Result<bool> {
        const CHUNK_SIZE: usize = 131072; // 128 KB chunks

        if self.eof {
            return Ok(false);
        }

        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = self
            .reader
            .read(&mut chunk)
            .map_err(|e| ConvertError::TemplateRead(e.to_string()))?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }

        self.pending.extend_from_slice(&chunk[..n]);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                return Err(ConvertError::TemplateRead(format!(
                    "Worksheet is not UTF-8: {}",
                    e
                )))
            }
        };
        // Prefix up to `valid` is UTF-8; the tail waits for the next chunk
        let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
        self.buffer.push_str(&text);
        self.pending.drain(..valid);
        Ok(true)
    }

    fn compact(&mut self) {
        if self.position > 0 {
            self.buffer.drain(..self.position);
            self.position = 0;
        }
    }

    fn parse_row(row_xml: &str, sst: &[String]) -> Vec<String> {
        let mut row_data = Vec::new();
        let mut pos = 0;

        while let Some(cell_start) = find_tag(&row_xml[pos..], "c") {
            let cell_start = pos + cell_start;
            let Some(open_end) = row_xml[cell_start..].find('>') else {
                break;
            };
            let open_end = cell_start + open_end;
            let open_tag = &row_xml[cell_start..=open_end];

            // Self-closing cell: <c r="B1" s="1"/>
            let (cell_xml, cell_end) = if open_tag.ends_with("/>") {
                ("", open_end + 1)
            } else {
                match row_xml[open_end..].find("</c>") {
                    Some(end) => (&row_xml[open_end + 1..open_end + end], open_end + end + 4),
                    None => break,
                }
            };

            let col_idx = attribute_value(open_tag, "r")
                .map(parse_column_index)
                .unwrap_or(row_data.len());

            // Fill empty cells between last column and current column
            while row_data.len() < col_idx {
                row_data.push(String::new());
            }

            let value = match attribute_value(open_tag, "t") {
                Some("inlineStr") => collect_text_runs(cell_xml),
                Some("s") => extract_value(cell_xml)
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .and_then(|idx| sst.get(idx).cloned())
                    .unwrap_or_default(),
                _ => extract_value(cell_xml)
                    .map(decode_xml_entities)
                    .unwrap_or_default(),
            };

            row_data.push(value);
            pos = cell_end;
        }

        row_data
    }
}

fn extract_value(cell_xml: &str) -> Option<&str> {
    let v_start = find_tag(cell_xml, "v")?;
    let open_end = v_start + cell_xml[v_start..].find('>')?;
    let v_end = cell_xml[open_end..].find("</v>")?;
    Some(&cell_xml[open_end + 1..open_end + v_end])
}

impl<'a, R: Read> Iterator for RowIterator<'a, R> {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.queued_blank_rows > 0 {
            self.queued_blank_rows -= 1;
            self.next_row_number += 1;
            return Some(Ok(Vec::new()));
        }

        loop {
            let search_slice = &self.buffer[self.position..];

            if let Some(row_start) = find_tag(search_slice, "row") {
                let open_end = search_slice[row_start..].find('>').map(|e| row_start + e);
                let row_end = open_end.and_then(|open_end| {
                    if search_slice.as_bytes()[open_end - 1] == b'/' {
                        Some(open_end + 1) // <row r="3"/>
                    } else {
                        search_slice[open_end..].find("</row>").map(|e| open_end + e + 6)
                    }
                });

                if let (Some(open_end), Some(row_end)) = (open_end, row_end) {
                    let open_tag = &search_slice[row_start..=open_end];
                    let row_number = attribute_value(open_tag, "r")
                        .and_then(|r| r.parse::<usize>().ok())
                        .unwrap_or(self.next_row_number);
                    // Rows omitted from the XML are empty rows; this row is
                    // left in the buffer until the gap has been emitted
                    if row_number > self.next_row_number {
                        self.position += row_start;
                        self.queued_blank_rows = row_number - self.next_row_number - 1;
                        self.next_row_number += 1;
                        return Some(Ok(Vec::new()));
                    }

                    let cells = Self::parse_row(&search_slice[row_start..row_end], self.sst);
                    self.position += row_end;
                    self.next_row_number = row_number + 1;
                    return Some(Ok(cells));
                }

                // Found <row but not its end - need more data
                self.position += row_start;
                self.compact();
            } else {
                // No <row found - keep a short tail for split tags
                if search_slice.len() > 10 {
                    let mut advance = search_slice.len() - 10;
                    while !search_slice.is_char_boundary(advance) {
                        advance -= 1;
                    }
                    self.position += advance;
                }
                self.compact();
            }

            match self.read_chunk() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

// Parse column index from cell reference (e.g., "A1" -> 0, "B1" -> 1, "AA1" -> 26)
fn parse_column_index(cell_ref: &str) -> usize {
    let mut col_idx = 0usize;
    for ch in cell_ref.chars() {
        if ch.is_ascii_alphabetic() {
            col_idx = col_idx * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
        } else {
            break;
        }
    }
    col_idx.saturating_sub(1) // Convert to 0-based index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows_of(xml: &str, sst: &[String]) -> Vec<Vec<String>> {
        RowIterator::new(Cursor::new(xml.as_bytes().to_vec()), sst)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_parse_column_index() {
        assert_eq!(parse_column_index("A1"), 0);
        assert_eq!(parse_column_index("b7"), 1);
        assert_eq!(parse_column_index("AA10"), 26);
    }

    #[test]
    fn test_decode_xml_entities() {
        assert_eq!(decode_xml_entities("a &amp;lt; b"), "a &lt; b");
        assert_eq!(decode_xml_entities("&#65;&#x42;"), "AB");
        assert_eq!(decode_xml_entities("x & y"), "x & y");
    }

    #[test]
    fn test_rows_with_mixed_cells() {
        let sst = vec!["Name".to_string(), "[full_name]".to_string()];
        let xml = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>Header</t></is></c><c r="B1" t="s"><v>0</v></c><c r="D1"><v>42</v></c></row>
<row r="2"><c r="A2" s="1"/><c r="B2" t="s"><v>1</v></c></row>
</sheetData></worksheet>"#;

        let rows = rows_of(xml, &sst);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Header", "Name", "", "42"]);
        assert_eq!(rows[1], vec!["", "[full_name]"]);
    }

    #[test]
    fn test_rows_gap_yields_blank_row() {
        let xml = r#"<sheetData><row r="2"><c r="A2"><v>1</v></c></row></sheetData>"#;
        let rows = rows_of(xml, &[]);
        assert_eq!(rows, vec![Vec::<String>::new(), vec!["1".to_string()]]);
    }

    #[test]
    fn test_collect_rich_text_runs() {
        let si = r#"<si><r><rPr><b/></rPr><t>full</t></r><r><t xml:space="preserve">_name </t></r></si>"#;
        assert_eq!(collect_text_runs(si), "full_name ");
    }
}
