//! # json-excelstream
//!
//! Streaming conversion of large JSON arrays into XLSX workbooks, driven by a
//! two-row spreadsheet template.
//!
//! Row 1 of the template names the output columns and row 2 names the JSON
//! property that fills each one. The data file is read twice (a count pass for
//! progress, then the transform pass), one array element at a time, and rows are
//! streamed straight into a compressed workbook. Memory stays flat regardless of
//! the input size.
//!
//! ## Quick Start
//!
//! ```no_run
//! use json_excelstream::{ConversionService, ConvertConfig, JobRequest, UploadedFile};
//!
//! let service = ConversionService::new(ConvertConfig::new("public").batch_size(100));
//! let outcome = service.convert(JobRequest {
//!     template: UploadedFile::from_path("format.xlsx"),
//!     data: UploadedFile::from_path("applicants.json"),
//! })?;
//!
//! let artifact = service.retrieve(&outcome.artifact)?;
//! std::fs::write(&artifact.file_name, artifact.bytes)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Lower-level pieces
//!
//! - [`extract_mapping`] reads the template into a [`Mapping`]
//! - [`StreamingTransformer`] runs the two passes for one mapping
//! - [`json_stream::JsonArrayReader`] yields array elements lazily
//! - [`fast_writer::FastWorkbook`] writes a single-sheet workbook with a staged commit

pub mod config;
pub mod error;
pub mod fast_writer;
pub mod json_stream;
#[cfg(feature = "cli")]
pub mod logger;
pub mod mapping;
pub mod progress;
pub mod service;
pub mod streaming_reader;
pub mod transformer;
pub mod types;

pub use config::ConvertConfig;
pub use error::{ConvertError, ErrorCategory, Result};
pub use mapping::extract_mapping;
pub use progress::{NoopProgress, ProgressListener, ProgressState, TracingProgress};
pub use service::{Artifact, ArtifactId, ConversionService, JobOutcome, JobRequest, UploadedFile};
pub use streaming_reader::StreamingReader;
pub use transformer::{StreamingTransformer, TransformSummary};
pub use types::{Mapping, MappingEntry, OutputRow};
