//! Two-pass streaming transform from a JSON array to a workbook
//!
//! Pass 1 counts the array elements so progress has a denominator. Pass 2 reopens
//! the source, maps each object through the [`Mapping`] and writes rows in batches.
//! The workbook is sealed last; any earlier failure drops it, which removes the
//! staged bytes so no partial artifact is left at the output path.

use crate::config::ConvertConfig;
use crate::error::Result;
use crate::fast_writer::{validate_sheet_name, FastWorkbook};
use crate::json_stream::{count_elements, open_elements};
use crate::progress::{ElementAnomaly, ProgressListener, ProgressState};
use crate::types::{Mapping, OutputRow};
use std::path::{Path, PathBuf};

/// Result of a completed transform
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSummary {
    /// Committed workbook
    pub output_path: PathBuf,
    /// Final counters
    pub progress: ProgressState,
    /// Elements skipped because they were not records
    pub anomalies: u64,
    /// Progress reported at completion (always 100.00)
    pub final_percent: f64,
}

/// Fixed-capacity buffer of rows awaiting a flush
struct RowBatch {
    rows: Vec<OutputRow>,
    capacity: usize,
}

impl RowBatch {
    fn new(capacity: usize) -> Self {
        RowBatch {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer a row; returns true when the batch is full
    fn push(&mut self, row: OutputRow) -> bool {
        self.rows.push(row);
        self.rows.len() >= self.capacity
    }

    /// Write buffered rows in arrival order and clear the buffer
    fn flush_into(&mut self, workbook: &mut FastWorkbook) -> Result<usize> {
        let flushed = self.rows.len();
        for row in self.rows.drain(..) {
            workbook.write_row(&row.cells)?;
        }
        Ok(flushed)
    }
}

/// Streams JSON records into a single-sheet workbook through a mapping
pub struct StreamingTransformer<'a> {
    mapping: &'a Mapping,
    config: &'a ConvertConfig,
}

impl<'a> StreamingTransformer<'a> {
    pub fn new(mapping: &'a Mapping, config: &'a ConvertConfig) -> Self {
        StreamingTransformer { mapping, config }
    }

    /// Convert the JSON array at `data` into a workbook at `output`
    ///
    /// # Errors
    /// - [`SourceParse`](crate::ConvertError::SourceParse) if either pass hits malformed JSON
    /// - [`WriteError`](crate::ConvertError::WriteError) if the sheet name is invalid or a row cannot be written
    /// - [`SinkFinalization`](crate::ConvertError::SinkFinalization) if sealing the workbook fails
    ///
    /// Scalars and nulls in the array are reported to `listener` and skipped.
    pub fn run<L: ProgressListener>(
        &self,
        data: &Path,
        output: &Path,
        listener: &mut L,
    ) -> Result<TransformSummary> {
        validate_sheet_name(&self.config.sheet_name)?;

        // Pass 1: the whole source must parse before any output exists
        let total_rows = count_elements(data)?;
        listener.on_total(total_rows);

        let mut workbook = FastWorkbook::with_compression(output, self.config.compression_level)?;
        workbook.add_worksheet(&self.config.sheet_name)?;
        let headers: Vec<&str> = self.mapping.headers().collect();
        if self.config.bold_header {
            workbook.write_header_bold(&headers)?;
        } else {
            workbook.write_row(&headers)?;
        }

        // Pass 2: fresh sequence over the same source
        let mut state = ProgressState::new(total_rows);
        let mut anomalies = 0u64;
        let mut batch = RowBatch::new(self.config.batch_size);

        for (index, element) in open_elements(data)?.enumerate() {
            let value = element?;
            let Some(row) = self.mapping.map_record(&value) else {
                anomalies += 1;
                listener.on_anomaly(&ElementAnomaly {
                    index: index as u64,
                    value,
                });
                continue;
            };

            if batch.push(row) {
                let flushed = batch.flush_into(&mut workbook)?;
                tracing::debug!(rows = flushed, "flushed batch");
            }

            state.rows_processed += 1;
            listener.on_progress(&state);
        }

        let remaining = batch.flush_into(&mut workbook)?;
        if remaining > 0 {
            tracing::debug!("✅ Processed remaining {} rows", remaining);
        }

        workbook.finish_worksheet()?;
        tracing::debug!("✅ Worksheet committed");
        let output_path = workbook.close()?;
        tracing::info!(path = %output_path.display(), "🎉 Workbook finalized and closed");

        let final_percent = 100.0;
        listener.on_complete(&state, final_percent);

        Ok(TransformSummary {
            output_path,
            progress: state,
            anomalies,
            final_percent,
        })
    }
}
