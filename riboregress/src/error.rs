use std::io;

use polars::error::PolarsError;
use thiserror::Error;

/// Run-level and per-family error categories.
///
/// `InputIntegrity` and `Configuration` abort the whole run. The
/// `AssemblyConsistency` variant is contained to the family that raised it:
/// the driver logs it and records a skip, it never propagates past the
/// family boundary.
#[derive(Debug, Error)]
pub enum RegressError {
    #[error("input integrity: {0}")]
    InputIntegrity(String),

    #[error("configuration: {0}")]
    Configuration(String),

    #[error("assembly inconsistency in family {tfam}: {msg}")]
    AssemblyConsistency { tfam: String, msg: String },

    #[error("table error: {0}")]
    Table(#[from] PolarsError),

    #[error("offset table parse error: {0}")]
    OffsetParse(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type RegressResult<T> = Result<T, RegressError>;
