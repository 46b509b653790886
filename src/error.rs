use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A statement line that could not be turned into an import row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One offending row in a rejected confirm. `line` is the statement line number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row: Option<usize>,
    pub line: Option<usize>,
    pub message: String,
}

impl RowIssue {
    pub fn batch(message: impl Into<String>) -> Self {
        Self {
            row: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn at(row: usize, line: usize, message: impl Into<String>) -> Self {
        Self {
            row: Some(row),
            line: Some(line),
            message: message.into(),
        }
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

fn join_issues(issues: &[RowIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum BudgieError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<RowIssue>),

    #[error("Conflict: {}", join_issues(.0))]
    Conflict(Vec<RowIssue>),

    #[error("Import batch {id} is already {status}")]
    BatchClosed { id: i64, status: String },

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Unknown payee: {0}")]
    UnknownPayee(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl BudgieError {
    /// Rows that caused a rejected confirm, if any.
    pub fn issues(&self) -> &[RowIssue] {
        match self {
            Self::Validation(issues) | Self::Conflict(issues) => issues,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, BudgieError>;
