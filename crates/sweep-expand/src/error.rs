//! Sweep configuration errors.
//!
//! Every variant is fatal: a sweep with a malformed line is rejected as a
//! whole and nothing is scheduled.

use std::path::PathBuf;

use thiserror::Error;

pub type ExpandResult<T> = Result<T, ExpandError>;

#[derive(Debug, Error)]
pub enum ExpandError {
    #[error("cannot open sweep config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: malformed {section} entry: {text:?}")]
    MalformedLine {
        section: &'static str,
        line: usize,
        text: String,
    },

    #[error("line {line}: unbalanced brackets in {text:?}")]
    UnbalancedBrackets { line: usize, text: String },

    #[error("invalid value list [{spec}]: {reason}")]
    BadValueList { spec: String, reason: String },

    #[error("{name}: expected a non-negative integer, got {value:?}")]
    BadInteger { name: String, value: String },

    #[error("app {app}: more than one placeholder carries the thread-count marker")]
    MultipleThreadMarkers { app: String },
}

impl ExpandError {
    pub(crate) fn bad_list(spec: &str, reason: impl Into<String>) -> Self {
        Self::BadValueList {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
