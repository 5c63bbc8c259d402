//! Fast Excel writer optimized for streaming
//!
//! This module provides the output sink for conversions:
//! - Rows stream straight into the ZIP compressor (inline strings, no shared table)
//! - Memory stays flat regardless of row count
//! - The workbook only appears at its destination once it is fully sealed

pub mod workbook;
pub mod xml_writer;

pub use s_zip::{CompressionMethod, StreamingZipReader, StreamingZipWriter};
pub use workbook::{validate_sheet_name, FastWorkbook};

use crate::error::Result;
use std::path::Path;

/// Create a fast Excel writer with default compression
///
/// # Examples
///
/// ```no_run
/// use json_excelstream::fast_writer::create_fast_writer;
///
/// let mut workbook = create_fast_writer("output.xlsx")?;
/// workbook.add_worksheet("Applicants")?;
///
/// workbook.write_row(&["Name", "Age"])?;
/// workbook.write_row(&["Alice", "30"])?;
///
/// workbook.close()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_fast_writer<P: AsRef<Path>>(path: P) -> Result<FastWorkbook> {
    FastWorkbook::new(path)
}
