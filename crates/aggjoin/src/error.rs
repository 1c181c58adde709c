use std::path::PathBuf;

pub type JoinResult<T> = Result<T, JoinError>;

#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("cannot plan a join over zero relations")]
    EmptyJoin,

    #[error("disconnected join graph: relation {relation} shares no attribute with {placed:?}")]
    DisconnectedSchema {
        relation: String,
        placed: Vec<String>,
    },

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("duplicate column {relation}[{column}]")]
    DuplicateColumn { relation: String, column: String },

    #[error("row width mismatch for {relation} at row {row}: expected {expected} values, got {actual}")]
    RowWidthMismatch {
        relation: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid number {value:?} in {relation} at record {record}, column {column}")]
    Parse {
        relation: String,
        record: usize,
        column: usize,
        value: String,
    },
}
