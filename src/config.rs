//! Conversion settings

use std::path::{Path, PathBuf};

/// Default worksheet name for generated workbooks
pub const DEFAULT_SHEET_NAME: &str = "Applicants";

/// Default number of rows buffered before a flush
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Settings shared by every job a [`ConversionService`](crate::ConversionService) runs
///
/// # Examples
///
/// ```
/// use json_excelstream::ConvertConfig;
///
/// let config = ConvertConfig::new("public")
///     .sheet_name("Export")
///     .batch_size(500)
///     .bold_header(true);
///
/// assert_eq!(config.batch_size, 500);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertConfig {
    /// Root directory for generated artifacts
    pub output_dir: PathBuf,
    /// Name of the single output worksheet
    pub sheet_name: String,
    /// Rows buffered in memory between flushes (at least 1)
    pub batch_size: usize,
    /// Deflate level 0-9
    pub compression_level: u32,
    /// Render the header row bold
    pub bold_header: bool,
    /// Delete uploaded inputs after a successful job
    pub remove_inputs_on_success: bool,
}

impl ConvertConfig {
    /// Create a config writing artifacts under `output_dir`
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        ConvertConfig {
            output_dir: output_dir.as_ref().to_path_buf(),
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            compression_level: 6,
            bold_header: false,
            remove_inputs_on_success: true,
        }
    }

    /// Set the output worksheet name (builder pattern)
    pub fn sheet_name(mut self, name: impl Into<String>) -> Self {
        self.sheet_name = name.into();
        self
    }

    /// Set the batch capacity; 0 is raised to 1
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the Deflate level; values above 9 are clamped
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Render the header row bold
    pub fn bold_header(mut self, bold: bool) -> Self {
        self.bold_header = bold;
        self
    }

    /// Keep or delete uploaded inputs after a successful job
    pub fn remove_inputs_on_success(mut self, remove: bool) -> Self {
        self.remove_inputs_on_success = remove;
        self
    }
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self::new("public")
    }
}
