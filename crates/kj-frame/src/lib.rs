#![forbid(unsafe_code)]

use std::collections::HashSet;

use kj_index::KeyIndex;
use kj_types::{KeyList, KeyNormalizer, NormalizedKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rename attempts for a colliding output column stop once the suffix counter
/// reaches this value, so `" (98)"` is the last suffix ever produced.
pub const COLUMN_RENAME_CEILING: usize = 100;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("key columns missing from file '{source_name}': {}", quoted(.columns))]
    MissingKeyColumns {
        source_name: String,
        columns: Vec<String>,
    },
    #[error(
        "row at line index {line} of '{source_name}' has {found} fields but the header has {expected}"
    )]
    RowTooWide {
        source_name: String,
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("unable to create unique column name for '{column}'")]
    ColumnRenameExhausted { column: String },
}

fn quoted(columns: &[String]) -> String {
    columns
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves every key list to positions in `header`.
///
/// All missing names are gathered (once each, in order of first mention)
/// before failing, so a single error reports the whole schema problem. Only
/// the header is needed, so callers can validate before reading any row.
pub fn resolve_key_positions(
    source_name: &str,
    header: &[String],
    key_lists: &[KeyList],
) -> Result<Vec<Vec<usize>>, FrameError> {
    let mut missing = Vec::<String>::new();
    let mut positions = Vec::with_capacity(key_lists.len());

    for key_list in key_lists {
        let mut list_positions = Vec::with_capacity(key_list.arity());
        for name in key_list.columns() {
            match header.iter().position(|column| column == name) {
                Some(pos) => list_positions.push(pos),
                None => {
                    if !missing.contains(name) {
                        missing.push(name.clone());
                    }
                }
            }
        }
        positions.push(list_positions);
    }

    if !missing.is_empty() {
        return Err(FrameError::MissingKeyColumns {
            source_name: source_name.to_owned(),
            columns: missing,
        });
    }

    Ok(positions)
}

/// A fully loaded table: header plus rows in file order.
///
/// Rows are stored at exactly the header width. A row's position in
/// [`Table::rows`] is its line index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    source_name: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Short rows are padded with empty fields; rows wider than the header are
    /// rejected.
    pub fn new(
        source_name: impl Into<String>,
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, FrameError> {
        let source_name = source_name.into();
        let width = header.len();

        let mut shaped = Vec::with_capacity(rows.len());
        for (line, mut row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(FrameError::RowTooWide {
                    source_name,
                    line,
                    expected: width,
                    found: row.len(),
                });
            }
            row.resize(width, String::new());
            shaped.push(row);
        }

        Ok(Self {
            source_name,
            header,
            rows: shaped,
        })
    }

    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    #[must_use]
    pub fn header(&self) -> &[String] {
        &self.header
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.header.len()
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn row(&self, line: usize) -> Option<&[String]> {
        self.rows.get(line).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn key_at(
        &self,
        line: usize,
        positions: &[usize],
        normalizer: &KeyNormalizer,
    ) -> NormalizedKey {
        let row = self.row(line).unwrap_or_default();
        normalizer.normalize(
            positions
                .iter()
                .map(|&pos| row.get(pos).map_or("", String::as_str)),
        )
    }
}

/// A table together with one [`KeyIndex`] per declared key list.
#[derive(Debug, Clone)]
pub struct KeyedTable {
    table: Table,
    key_lists: Vec<KeyList>,
    indices: Vec<KeyIndex>,
}

impl KeyedTable {
    pub fn build(
        table: Table,
        key_lists: &[KeyList],
        normalizer: &KeyNormalizer,
    ) -> Result<Self, FrameError> {
        let positions = resolve_key_positions(table.source_name(), table.header(), key_lists)?;
        Ok(Self::with_positions(table, key_lists, &positions, normalizer))
    }

    /// Indexes `table` under key columns already resolved by
    /// [`resolve_key_positions`], one position list per key list.
    #[must_use]
    pub fn with_positions(
        table: Table,
        key_lists: &[KeyList],
        positions: &[Vec<usize>],
        normalizer: &KeyNormalizer,
    ) -> Self {
        let indices = positions
            .iter()
            .map(|list_positions| {
                KeyIndex::from_keys(
                    (0..table.len()).map(|line| table.key_at(line, list_positions, normalizer)),
                )
            })
            .collect::<Vec<_>>();

        #[cfg(feature = "tracing")]
        for (key_list, index) in key_lists.iter().zip(&indices) {
            tracing::debug!(
                source = table.source_name(),
                key_list = %key_list,
                rows = index.line_count(),
                distinct_keys = index.distinct_keys(),
                "indexed key list"
            );
        }

        Self {
            table,
            key_lists: key_lists.to_vec(),
            indices,
        }
    }

    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    #[must_use]
    pub fn key_lists(&self) -> &[KeyList] {
        &self.key_lists
    }

    #[must_use]
    pub fn indices(&self) -> &[KeyIndex] {
        &self.indices
    }

    #[must_use]
    pub fn index(&self, key_list: usize) -> Option<&KeyIndex> {
        self.indices.get(key_list)
    }
}

/// Output header: `first` in order, then `second` in order, with each
/// colliding `second` name renamed `"name (2)"`, `"name (3)"`, ...
pub fn merge_headers(first: &[String], second: &[String]) -> Result<Vec<String>, FrameError> {
    let mut merged = first.to_vec();
    let mut taken = first.iter().cloned().collect::<HashSet<_>>();

    for name in second {
        let mut candidate = name.clone();
        let mut suffix = 2;
        while taken.contains(&candidate) && suffix < COLUMN_RENAME_CEILING {
            candidate = format!("{name} ({suffix})");
            suffix += 1;
        }
        if suffix >= COLUMN_RENAME_CEILING {
            return Err(FrameError::ColumnRenameExhausted {
                column: name.clone(),
            });
        }

        taken.insert(candidate.clone());
        merged.push(candidate);
    }

    Ok(merged)
}
