//! Error types for the json-excelstream library

use thiserror::Error;

/// Result type alias for conversion operations
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Main error type for all conversion operations
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Template header row and source field row disagree in length
    #[error("Template defines {headers} output headers but {fields} JSON property names")]
    ConfigurationMismatch { headers: usize, fields: usize },

    /// Template could not be opened or is not a readable workbook
    #[error("Failed to read template: {0}")]
    TemplateRead(String),

    /// JSON source malformed or unreadable
    #[error("Failed to parse JSON source at byte {offset}: {message}")]
    SourceParse { offset: u64, message: String },

    /// Writing a row into the output sink failed before finalization
    #[error("Failed to write output: {0}")]
    WriteError(String),

    /// Sealing the output container failed after all rows were accepted
    #[error("Failed to finalize output workbook: {0}")]
    SinkFinalization(String),

    /// No completed, unretrieved artifact for the given reference
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Fault category a caller maps onto its own status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Configuration,
    SourceParse,
    Finalization,
    NotFound,
    Io,
}

impl ConvertError {
    pub(crate) fn parse(offset: u64, message: impl Into<String>) -> Self {
        ConvertError::SourceParse {
            offset,
            message: message.into(),
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConvertError::ConfigurationMismatch { .. } | ConvertError::TemplateRead(_) => {
                ErrorCategory::Configuration
            }
            ConvertError::SourceParse { .. } => ErrorCategory::SourceParse,
            ConvertError::WriteError(_) | ConvertError::SinkFinalization(_) => {
                ErrorCategory::Finalization
            }
            ConvertError::ArtifactNotFound(_) => ErrorCategory::NotFound,
            ConvertError::IoError(_) => ErrorCategory::Io,
        }
    }

    /// HTTP-style status code for the category
    pub fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::NotFound => 404,
            _ => 500,
        }
    }

    /// Category-tagged message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Template configuration error: {}", self),
            ErrorCategory::SourceParse => format!("Error processing JSON file: {}", self),
            ErrorCategory::Finalization => format!("Error finalizing Excel file: {}", self),
            ErrorCategory::NotFound => {
                "File not found. Please upload and process data first.".to_string()
            }
            ErrorCategory::Io => format!("Internal server error: {}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = ConvertError::ConfigurationMismatch {
            headers: 3,
            fields: 2,
        };
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(err.status_code(), 500);
        assert!(err.user_message().starts_with("Template configuration error"));

        let err = ConvertError::parse(17, "unexpected end of input");
        assert_eq!(err.category(), ErrorCategory::SourceParse);
        assert!(err.to_string().contains("byte 17"));

        let err = ConvertError::ArtifactNotFound("job-1".to_string());
        assert_eq!(err.status_code(), 404);
    }
}
