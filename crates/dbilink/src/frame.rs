//! Tabular result container and the query output marker.

use std::fmt;

use tracing::error;

use crate::error::Result;
use crate::value::SqlValue;

/// One returned row, in source order.
pub type Row = Vec<SqlValue>;

/// A uniform tabular container: ordered column headers plus ordered rows.
///
/// Row order always matches the source cursor. A result with zero rows
/// still carries correct column headers when the source provided them; a
/// source with no header information at all yields a fully empty frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Frame {
    /// Build a frame from headers and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// An empty frame that still carries column headers.
    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Ordered column headers.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Ordered rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the frame holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell accessor by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Consume the frame into its rows, dropping the headers.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Adapt a stored-procedure result-set iterator into a frame.
    ///
    /// Stored-result iterators hold a single result set in practice; the
    /// last set wins if a driver yields several. A malformed or exhausted
    /// iterator does not raise to the caller: the error is reported to the
    /// operator channel and an empty frame is returned.
    pub fn from_stored_results<I>(results: I) -> Frame
    where
        I: IntoIterator<Item = Result<Frame>>,
    {
        let mut frame = Frame::default();
        for item in results {
            match item {
                Ok(f) => frame = f,
                Err(err) => {
                    error!(error = %err, "failed to read stored procedure result set");
                    return Frame::default();
                }
            }
        }
        frame
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.columns.join(" | "))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        Ok(())
    }
}

/// The shape of a statement's result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    /// Raw row tuples, the efficient default.
    Rows(Vec<Row>),
    /// A labeled tabular structure.
    Frame(Frame),
    /// The statement produced no result set (DDL, etc.).
    Absent,
}

impl QueryOutput {
    /// True for the no-result-set marker.
    pub fn is_absent(&self) -> bool {
        matches!(self, QueryOutput::Absent)
    }

    /// Raw rows, if this output carries any.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            QueryOutput::Rows(rows) => Some(rows),
            QueryOutput::Frame(frame) => Some(frame.rows()),
            QueryOutput::Absent => None,
        }
    }

    /// Consume into raw rows; `Absent` yields an empty vector.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Frame(frame) => frame.into_rows(),
            QueryOutput::Absent => Vec::new(),
        }
    }

    /// First cell of the first row, a common shape for scalar queries.
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows().and_then(|rows| rows.first()).and_then(|r| r.first())
    }

    /// Package rows as either raw tuples or a labeled frame.
    pub(crate) fn from_rows(columns: Vec<String>, rows: Vec<Row>, raw: bool) -> Self {
        if raw {
            QueryOutput::Rows(rows)
        } else {
            QueryOutput::Frame(Frame::new(columns, rows))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbiError;

    fn sample_frame() -> Frame {
        Frame::new(
            vec!["id".to_string(), "colour".to_string()],
            vec![
                vec![SqlValue::I64(1), SqlValue::Text("Black".to_string())],
                vec![SqlValue::I64(2), SqlValue::Text("Red".to_string())],
            ],
        )
    }

    #[test]
    fn test_frame_preserves_order() {
        let frame = sample_frame();
        assert_eq!(frame.columns(), ["id", "colour"]);
        assert_eq!(frame.cell(0, "colour"), Some(&SqlValue::Text("Black".to_string())));
        assert_eq!(frame.cell(1, "id"), Some(&SqlValue::I64(2)));
    }

    #[test]
    fn test_empty_frame_keeps_headers() {
        let frame = Frame::with_columns(vec!["id".to_string()]);
        assert!(frame.is_empty());
        assert_eq!(frame.columns(), ["id"]);
    }

    #[test]
    fn test_stored_results_error_yields_empty_frame() {
        let results = vec![Err(DbiError::Parameter("exhausted iterator".to_string()))];
        let frame = Frame::from_stored_results(results);
        assert!(frame.is_empty());
        assert!(frame.columns().is_empty());
    }

    #[test]
    fn test_stored_results_last_set_wins() {
        let results = vec![Ok(Frame::with_columns(vec!["a".to_string()])), Ok(sample_frame())];
        let frame = Frame::from_stored_results(results);
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn test_query_output_scalar() {
        let out = QueryOutput::Rows(vec![vec![SqlValue::I64(3)]]);
        assert_eq!(out.scalar().and_then(SqlValue::as_i64), Some(3));
        assert!(QueryOutput::Absent.scalar().is_none());
    }

    #[test]
    fn test_from_rows_respects_raw_flag() {
        let cols = vec!["n".to_string()];
        let rows = vec![vec![SqlValue::I64(14)]];
        assert!(matches!(
            QueryOutput::from_rows(cols.clone(), rows.clone(), true),
            QueryOutput::Rows(_)
        ));
        assert!(matches!(
            QueryOutput::from_rows(cols, rows, false),
            QueryOutput::Frame(_)
        ));
    }
}
