//! Progress tracking and reporting for conversion jobs

use serde_json::Value;

/// Rows processed against the count-pass total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressState {
    /// Rows built from object elements so far
    pub rows_processed: u64,
    /// Elements counted in the first pass; fixed before the transform pass
    pub total_rows: u64,
}

impl ProgressState {
    pub fn new(total_rows: u64) -> Self {
        ProgressState {
            rows_processed: 0,
            total_rows,
        }
    }

    /// Percentage complete, rounded to two decimal places
    ///
    /// Returns 0 when the total is 0.
    pub fn percent(&self) -> f64 {
        if self.total_rows == 0 {
            return 0.0;
        }
        let raw = self.rows_processed as f64 / self.total_rows as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }
}

/// A skipped array element
#[derive(Debug, Clone, PartialEq)]
pub struct ElementAnomaly {
    /// Zero-based position of the element in the source array
    pub index: u64,
    /// The element that could not be used as a record
    pub value: Value,
}

impl ElementAnomaly {
    /// JSON kind of the skipped value (`null`, `number`, ...)
    pub fn kind(&self) -> &'static str {
        match self.value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

/// Receives progress events from a running conversion
///
/// All methods default to doing nothing.
pub trait ProgressListener {
    /// Count pass finished
    fn on_total(&mut self, _total_rows: u64) {}

    /// A row was accepted
    fn on_progress(&mut self, _state: &ProgressState) {}

    /// An element was skipped
    fn on_anomaly(&mut self, _anomaly: &ElementAnomaly) {}

    /// Output committed; `percent` is the final reported value
    fn on_complete(&mut self, _state: &ProgressState, _percent: f64) {}
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressListener for NoopProgress {}

/// Listener that reports through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressListener for TracingProgress {
    fn on_total(&mut self, total_rows: u64) {
        tracing::info!("📊 Total rows to process: {}", total_rows);
    }

    fn on_progress(&mut self, state: &ProgressState) {
        tracing::debug!(
            "✅ Row {}/{} written ({:.2}% completed)",
            state.rows_processed,
            state.total_rows,
            state.percent()
        );
    }

    fn on_anomaly(&mut self, anomaly: &ElementAnomaly) {
        tracing::warn!(
            index = anomaly.index,
            kind = anomaly.kind(),
            "❌ Invalid JSON data format, element skipped: {}",
            anomaly.value
        );
    }

    fn on_complete(&mut self, state: &ProgressState, percent: f64) {
        tracing::info!(
            rows = state.rows_processed,
            total = state.total_rows,
            "🎉 Conversion complete ({:.2}%)",
            percent
        );
    }
}

impl<L: ProgressListener + ?Sized> ProgressListener for &mut L {
    fn on_total(&mut self, total_rows: u64) {
        (**self).on_total(total_rows)
    }

    fn on_progress(&mut self, state: &ProgressState) {
        (**self).on_progress(state)
    }

    fn on_anomaly(&mut self, anomaly: &ElementAnomaly) {
        (**self).on_anomaly(anomaly)
    }

    fn on_complete(&mut self, state: &ProgressState, percent: f64) {
        (**self).on_complete(state, percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_percent_rounding() {
        let state = ProgressState {
            rows_processed: 2,
            total_rows: 3,
        };
        assert_eq!(state.percent(), 66.67);

        let state = ProgressState {
            rows_processed: 1,
            total_rows: 8,
        };
        assert_eq!(state.percent(), 12.5);

        assert_eq!(ProgressState::new(0).percent(), 0.0);

        let state = ProgressState {
            rows_processed: 7,
            total_rows: 7,
        };
        assert_eq!(state.percent(), 100.0);
    }

    #[test]
    fn test_anomaly_kind() {
        let anomaly = ElementAnomaly {
            index: 1,
            value: json!(null),
        };
        assert_eq!(anomaly.kind(), "null");
        let anomaly = ElementAnomaly {
            index: 2,
            value: json!("x"),
        };
        assert_eq!(anomaly.kind(), "string");
    }
}
