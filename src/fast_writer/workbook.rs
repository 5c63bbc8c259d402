//! Streaming workbook writer with staged commit
//!
//! Rows are compressed into the ZIP container as they arrive. The container is
//! written to a hidden staging file next to the destination and only renamed into
//! place by [`FastWorkbook::close`], so a reader of the destination path never sees
//! a half-written workbook.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::xml_writer::{escape_into, XmlWriter};
use super::{CompressionMethod, StreamingZipWriter};
use crate::error::{ConvertError, Result};

const SHEET_PATH: &str = "xl/worksheets/sheet1.xml";
const HEADER_BOLD_STYLE: u32 = 1;
const MAX_SHEET_NAME_CHARS: usize = 31;
const INVALID_SHEET_NAME_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

/// `io::Write` view over the current ZIP entry
struct EntrySink<'a>(&'a mut StreamingZipWriter<File>);

impl Write for EntrySink<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .write_data(buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Fast single-sheet workbook for streaming Excel writing
pub struct FastWorkbook {
    zip: Option<StreamingZipWriter<File>>,
    staging_path: PathBuf,
    final_path: PathBuf,
    sheet_name: Option<String>,
    sheet_open: bool,
    current_row: u32,
    xml_buffer: Vec<u8>,         // Reusable buffer for row XML
    cell_ref_cache: Vec<String>, // Cache for column letters (A, B, C, ...)
    committed: bool,
}

impl FastWorkbook {
    /// Create a new workbook that will be committed to `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_compression(path, 6)
    }

    /// Create a new workbook with a Deflate level from 0 to 9
    pub fn with_compression<P: AsRef<Path>>(path: P, compression_level: u32) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let staging_path = Self::staging_path_for(&final_path);

        let zip = StreamingZipWriter::with_method(
            &staging_path,
            CompressionMethod::Deflate,
            compression_level.min(9),
        )
        .map_err(|e| ConvertError::WriteError(format!("Failed to create ZIP writer: {}", e)))?;

        let mut cell_ref_cache = Vec::with_capacity(100);
        for col in 1..=100 {
            cell_ref_cache.push(col_to_letter(col));
        }

        let mut workbook = FastWorkbook {
            zip: Some(zip),
            staging_path,
            final_path,
            sheet_name: None,
            sheet_open: false,
            current_row: 0,
            xml_buffer: Vec::with_capacity(8192),
            cell_ref_cache,
            committed: false,
        };

        workbook.write_part("[Content_Types].xml", CONTENT_TYPES.as_bytes())?;
        workbook.write_part("_rels/.rels", ROOT_RELS.as_bytes())?;
        workbook.write_part("docProps/core.xml", core_props().as_bytes())?;
        workbook.write_part("docProps/app.xml", APP_PROPS.as_bytes())?;

        Ok(workbook)
    }

    // `.name.xlsx.part` next to the destination
    fn staging_path_for(final_path: &Path) -> PathBuf {
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workbook.xlsx".to_string());
        final_path.with_file_name(format!(".{}.part", file_name))
    }

    fn zip_mut(&mut self) -> Result<&mut StreamingZipWriter<File>> {
        self.zip
            .as_mut()
            .ok_or_else(|| ConvertError::WriteError("Workbook already closed".to_string()))
    }

    fn start_entry(&mut self, name: &str) -> Result<()> {
        self.zip_mut()?
            .start_entry(name)
            .map_err(|e| ConvertError::WriteError(format!("Failed to start ZIP entry: {}", e)))
    }

    fn write_data(&mut self, data: &[u8]) -> Result<()> {
        self.zip_mut()?
            .write_data(data)
            .map_err(|e| ConvertError::WriteError(format!("Failed to write to ZIP: {}", e)))
    }

    fn write_part(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.start_entry(name)?;
        self.write_data(data)
    }

    /// Add the worksheet; a workbook holds exactly one
    ///
    /// The name must be a valid Excel sheet name (see [`validate_sheet_name`]).
    pub fn add_worksheet(&mut self, name: &str) -> Result<()> {
        if self.sheet_name.is_some() {
            return Err(ConvertError::WriteError(
                "Workbook already has a worksheet".to_string(),
            ));
        }
        validate_sheet_name(name)?;

        self.start_entry(SHEET_PATH)?;
        let header = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
<sheetData>";
        self.write_data(header.as_bytes())?;

        self.sheet_name = Some(name.to_string());
        self.sheet_open = true;
        self.current_row = 0;
        Ok(())
    }

    /// Write a row of strings to the worksheet
    ///
    /// Empty strings become empty cells.
    pub fn write_row<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        self.write_row_with_style(values, None)
    }

    /// Write a header row in bold
    pub fn write_header_bold<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        self.write_row_with_style(values, Some(HEADER_BOLD_STYLE))
    }

    fn write_row_with_style<S: AsRef<str>>(
        &mut self,
        values: &[S],
        style: Option<u32>,
    ) -> Result<()> {
        if !self.sheet_open {
            return Err(ConvertError::WriteError(
                "No active worksheet".to_string(),
            ));
        }

        self.current_row += 1;
        let mut row_digits = itoa::Buffer::new();
        let row_num = row_digits.format(self.current_row);

        self.xml_buffer.clear();
        self.xml_buffer.extend_from_slice(b"<row r=\"");
        self.xml_buffer.extend_from_slice(row_num.as_bytes());
        self.xml_buffer.extend_from_slice(b"\">");

        for (col_idx, value) in values.iter().enumerate() {
            let value = value.as_ref();
            if value.is_empty() {
                continue;
            }

            self.xml_buffer.extend_from_slice(b"<c r=\"");
            match self.cell_ref_cache.get(col_idx) {
                Some(letter) => self.xml_buffer.extend_from_slice(letter.as_bytes()),
                None => self
                    .xml_buffer
                    .extend_from_slice(col_to_letter(col_idx as u32 + 1).as_bytes()),
            }
            self.xml_buffer.extend_from_slice(row_num.as_bytes());
            self.xml_buffer.extend_from_slice(b"\"");
            if let Some(style) = style {
                let mut style_digits = itoa::Buffer::new();
                self.xml_buffer.extend_from_slice(b" s=\"");
                self.xml_buffer
                    .extend_from_slice(style_digits.format(style).as_bytes());
                self.xml_buffer.extend_from_slice(b"\"");
            }
            self.xml_buffer
                .extend_from_slice(b" t=\"inlineStr\"><is><t xml:space=\"preserve\">");
            escape_into(&mut self.xml_buffer, value);
            self.xml_buffer.extend_from_slice(b"</t></is></c>");
        }

        self.xml_buffer.extend_from_slice(b"</row>");

        // Stream to compressor immediately
        let zip = self
            .zip
            .as_mut()
            .ok_or_else(|| ConvertError::WriteError("Workbook already closed".to_string()))?;
        zip.write_data(&self.xml_buffer)
            .map_err(|e| ConvertError::WriteError(format!("Failed to write row: {}", e)))
    }

    /// Number of rows written so far (header included)
    pub fn rows_written(&self) -> u32 {
        self.current_row
    }

    /// Path the workbook is committed to by [`close`](Self::close)
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Close the worksheet (first commit step)
    ///
    /// Idempotent; `close()` calls it when it has not been called yet.
    pub fn finish_worksheet(&mut self) -> Result<()> {
        if !self.sheet_open {
            return Ok(());
        }
        self.write_data(b"</sheetData></worksheet>")
            .map_err(|e| ConvertError::SinkFinalization(e.to_string()))?;
        self.sheet_open = false;
        Ok(())
    }

    /// Close the workbook and commit it to the destination path
    ///
    /// Writes the workbook directory, relationships and styles, seals the ZIP
    /// central directory and renames the staging file into place. Any failure here
    /// is reported as [`ConvertError::SinkFinalization`] and leaves nothing at the
    /// destination path.
    pub fn close(mut self) -> Result<PathBuf> {
        self.finish_worksheet()?;
        self.write_metadata()
            .map_err(|e| ConvertError::SinkFinalization(e.to_string()))?;

        let zip = self
            .zip
            .take()
            .ok_or_else(|| ConvertError::SinkFinalization("Workbook already closed".to_string()))?;
        zip.finish()
            .map_err(|e| ConvertError::SinkFinalization(format!("Failed to finish ZIP: {}", e)))?;

        fs::rename(&self.staging_path, &self.final_path).map_err(|e| {
            ConvertError::SinkFinalization(format!(
                "Failed to move workbook into {}: {}",
                self.final_path.display(),
                e
            ))
        })?;
        self.committed = true;

        Ok(self.final_path.clone())
    }

    fn write_metadata(&mut self) -> Result<()> {
        if self.sheet_name.is_none() {
            // A workbook needs at least one sheet to open
            self.add_worksheet("Sheet1")?;
            self.finish_worksheet()?;
        }
        let sheet_name = self.sheet_name.clone().unwrap_or_default();

        self.start_entry("xl/workbook.xml")?;
        {
            let zip = self
                .zip
                .as_mut()
                .ok_or_else(|| ConvertError::WriteError("Workbook already closed".to_string()))?;
            let mut xml = XmlWriter::new(EntrySink(zip));
            xml.declaration()?;
            xml.start_element("workbook")?;
            xml.attribute(
                "xmlns",
                "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
            )?;
            xml.attribute(
                "xmlns:r",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships",
            )?;
            xml.close_start_tag()?;
            xml.start_element("sheets")?;
            xml.close_start_tag()?;
            xml.start_element("sheet")?;
            xml.attribute("name", &sheet_name)?;
            xml.attribute_int("sheetId", 1)?;
            xml.attribute("r:id", "rId1")?;
            xml.close_empty()?;
            xml.end_element("sheets")?;
            xml.end_element("workbook")?;
            xml.flush()?;
        }

        self.write_part("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.as_bytes())?;
        self.write_part("xl/styles.xml", STYLES.as_bytes())
    }
}

impl Drop for FastWorkbook {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Close the handle before removing the staging file
        drop(self.zip.take());
        if self.staging_path.exists() {
            if let Err(e) = fs::remove_file(&self.staging_path) {
                tracing::warn!(
                    path = %self.staging_path.display(),
                    error = %e,
                    "failed to remove staging workbook"
                );
            }
        }
    }
}

/// Check a worksheet name against Excel's rules
///
/// 1 to 31 characters, none of `[ ] : * ? / \`, and no leading or trailing
/// apostrophe.
pub fn validate_sheet_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(ConvertError::WriteError(format!(
            "Invalid sheet name '{}': {}",
            name, reason
        )))
    };
    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.chars().count() > MAX_SHEET_NAME_CHARS {
        return invalid("longer than 31 characters");
    }
    if let Some(c) = name.chars().find(|c| INVALID_SHEET_NAME_CHARS.contains(c)) {
        return invalid(&format!("contains '{}'", c));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return invalid("starts or ends with an apostrophe");
    }
    Ok(())
}

/// Convert 1-based column number to Excel letters (1 -> A, 27 -> AA)
pub(crate) fn col_to_letter(col: u32) -> String {
    let mut col_str = String::new();
    let mut n = col;
    while n > 0 {
        let rem = (n - 1) % 26;
        col_str.insert(0, (b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    col_str
}

fn core_props() -> String {
    let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:creator>json-excelstream</dc:creator>
<cp:lastModifiedBy>json-excelstream</cp:lastModifiedBy>
<dcterms:created xsi:type="dcterms:W3CDTF">{now}</dcterms:created>
<dcterms:modified xsi:type="dcterms:W3CDTF">{now}</dcterms:modified>
</cp:coreProperties>"#
    )
}

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>
</Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/>
</Relationships>"#;

const APP_PROPS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties">
<Application>json-excelstream</Application>
<DocSecurity>0</DocSecurity>
<ScaleCrop>false</ScaleCrop>
<LinksUpToDate>false</LinksUpToDate>
<SharedDoc>false</SharedDoc>
<HyperlinksChanged>false</HyperlinksChanged>
<AppVersion>1.0</AppVersion>
</Properties>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>
</Relationships>"#;

// Style 0 = default, style 1 = bold header
const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<fonts count="2">
<font><sz val="11"/><name val="Calibri"/></font>
<font><b/><sz val="11"/><name val="Calibri"/></font>
</fonts>
<fills count="2">
<fill><patternFill patternType="none"/></fill>
<fill><patternFill patternType="gray125"/></fill>
</fills>
<borders count="1">
<border><left/><right/><top/><bottom/><diagonal/></border>
</borders>
<cellStyleXfs count="1">
<xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
</cellStyleXfs>
<cellXfs count="2">
<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
<xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>
</cellXfs>
</styleSheet>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fast_workbook_commit() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("test.xlsx");

        let mut workbook = FastWorkbook::new(&path)?;
        workbook.add_worksheet("Applicants")?;
        workbook.write_header_bold(&["Name", "Age"])?;
        workbook.write_row(&["Alice", "30"])?;
        assert_eq!(workbook.rows_written(), 2);

        // Not visible before the commit
        assert!(!path.exists());

        let committed = workbook.close()?;
        assert_eq!(committed, path);
        assert!(path.exists());
        assert!(!dir.path().join(".test.xlsx.part").exists());
        Ok(())
    }

    #[test]
    fn test_dropped_workbook_leaves_nothing() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("abandoned.xlsx");

        {
            let mut workbook = FastWorkbook::new(&path)?;
            workbook.add_worksheet("Applicants")?;
            workbook.write_row(&["partial"])?;
        }

        assert!(!path.exists());
        assert!(!dir.path().join(".abandoned.xlsx.part").exists());
        Ok(())
    }

    #[test]
    fn test_single_worksheet_only() -> Result<()> {
        let dir = tempdir()?;
        let mut workbook = FastWorkbook::new(dir.path().join("one.xlsx"))?;
        workbook.add_worksheet("First")?;
        assert!(workbook.add_worksheet("Second").is_err());
        Ok(())
    }

    #[test]
    fn test_col_to_letter() {
        assert_eq!(col_to_letter(1), "A");
        assert_eq!(col_to_letter(26), "Z");
        assert_eq!(col_to_letter(27), "AA");
        assert_eq!(col_to_letter(703), "AAA");
    }

    #[test]
    fn test_invalid_sheet_name_rejected() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("named.xlsx");
        let mut workbook = FastWorkbook::new(&path)?;

        let too_long = "x".repeat(32);
        for name in ["", "Q1/Q2", "a[1]", "what?", "'quoted'", too_long.as_str()] {
            assert!(
                matches!(workbook.add_worksheet(name), Err(ConvertError::WriteError(_))),
                "accepted {:?}",
                name
            );
        }
        // Rejected names leave the workbook usable
        workbook.add_worksheet(&"é".repeat(31))?;
        workbook.write_row(&["ok"])?;
        workbook.close()?;
        assert!(path.exists());
        Ok(())
    }
}
