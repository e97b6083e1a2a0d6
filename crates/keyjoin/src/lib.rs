#![forbid(unsafe_code)]

//! Outer join of two CSV files on one or more key lists.
//!
//! Key lists are consulted in order, each narrowing (or, in cumulative mode,
//! intersecting) the set of candidate partners until a row pairs uniquely.
//! Every row of both inputs appears in the output at least once.

use std::io::Write;
use std::path::PathBuf;

use thiserror::Error;

pub use kj_frame::{
    COLUMN_RENAME_CEILING, FrameError, KeyedTable, Table, merge_headers, resolve_key_positions,
};
pub use kj_index::{KeyIndex, LineSet};
pub use kj_io::{
    IoError, load_keyed_bytes, load_keyed_table, read_table_bytes, read_table_path,
    read_table_str, write_csv, write_csv_string,
};
pub use kj_join::{
    CandidateStep, Candidates, JoinError, JoinOptions, JoinPlan, JoinSummary, RowMatch,
    UsedMarkers, join_tables, resolve_candidates,
};
pub use kj_types::{KeyError, KeyList, KeyNormalizer, KeySpec, NormalizedKey};

/// Exit status for invalid key declarations and input schema problems.
pub const EXIT_CONFIGURATION: u8 = 10;
/// Exit status for IO failures and internal invariant violations.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum KeyjoinError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Join(#[from] JoinError),
}

impl KeyjoinError {
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Key(_))
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Key(_) => EXIT_CONFIGURATION,
            Self::Io(err) if err.is_schema_error() => EXIT_CONFIGURATION,
            Self::Io(_) | Self::Join(_) => EXIT_FAILURE,
        }
    }
}

/// Everything needed to join two files.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub file_one: PathBuf,
    pub file_two: PathBuf,
    pub keys: KeySpec,
    pub normalizer: KeyNormalizer,
    pub options: JoinOptions,
}

/// Loads both files, resolves the join and writes the merged CSV to `out`.
///
/// Nothing is written unless both files load and every row resolves. The
/// second file is not read when the first one fails validation.
pub fn run_join<W: Write>(request: &JoinRequest, out: W) -> Result<JoinSummary, KeyjoinError> {
    let left = load_keyed_table(&request.file_one, request.keys.first(), &request.normalizer)?;
    let right = load_keyed_table(&request.file_two, request.keys.second(), &request.normalizer)?;

    let plan = join_tables(&left, &right, &request.options)?;
    let written = write_csv(out, &plan.header, plan.rows(left.table(), right.table()))?;

    tracing::debug!(rows = written, "wrote joined csv");
    Ok(plan.summary)
}
