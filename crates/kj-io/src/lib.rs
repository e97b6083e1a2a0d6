#![forbid(unsafe_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use kj_frame::{FrameError, KeyedTable, Table, resolve_key_positions};
use kj_types::{KeyList, KeyNormalizer};
use thiserror::Error;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input '{source_name}' has no header row")]
    MissingHeaders { source_name: String },
    #[error("failed to read '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed csv in '{source_name}'")]
    Csv {
        source_name: String,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write csv output")]
    Write(#[from] csv::Error),
    #[error("failed to flush csv output")]
    Flush(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl IoError {
    /// True for failures caused by the shape of an input file rather than by
    /// reading or writing it.
    #[must_use]
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::MissingHeaders { .. }
                | Self::Frame(FrameError::MissingKeyColumns { .. } | FrameError::RowTooWide { .. })
        )
    }
}

/// Reads a CSV file fully into memory.
pub fn read_table_path(path: &Path) -> Result<Table, IoError> {
    let bytes = read_bytes(path)?;
    read_table_bytes(path.display().to_string(), &bytes)
}

pub fn read_table_str(source_name: impl Into<String>, input: &str) -> Result<Table, IoError> {
    read_table_bytes(source_name, input.as_bytes())
}

/// Parses CSV bytes, dropping a leading UTF-8 BOM.
pub fn read_table_bytes(source_name: impl Into<String>, input: &[u8]) -> Result<Table, IoError> {
    let source_name = source_name.into();
    let (header, records) = parse_csv(&source_name, input)?;
    Ok(Table::new(source_name, header, records)?)
}

/// Loads a table and indexes it under every key list.
///
/// Key columns are checked against the header before any data row is
/// parsed; a missing column fails the load with nothing indexed.
pub fn load_keyed_table(
    path: &Path,
    key_lists: &[KeyList],
    normalizer: &KeyNormalizer,
) -> Result<KeyedTable, IoError> {
    let bytes = read_bytes(path)?;
    load_keyed_bytes(path.display().to_string(), &bytes, key_lists, normalizer)
}

pub fn load_keyed_bytes(
    source_name: impl Into<String>,
    input: &[u8],
    key_lists: &[KeyList],
    normalizer: &KeyNormalizer,
) -> Result<KeyedTable, IoError> {
    let source_name = source_name.into();
    let mut reader = csv_reader(input);
    let header = read_header(&source_name, &mut reader)?;

    let positions = resolve_key_positions(&source_name, &header, key_lists)?;

    let rows = read_records(&source_name, &mut reader)?;
    let table = Table::new(source_name, header, rows)?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        source = table.source_name(),
        columns = table.width(),
        rows = table.len(),
        "loaded csv table"
    );

    Ok(KeyedTable::with_positions(table, key_lists, &positions, normalizer))
}

/// Writes `header` followed by `rows` as CRLF-terminated CSV, quoting only
/// where needed. Returns the number of data rows written.
pub fn write_csv<W, I, R, F>(writer: W, header: &[String], rows: I) -> Result<usize, IoError>
where
    W: Write,
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(writer);

    writer.write_record(header)?;
    let mut written = 0;
    for row in rows {
        writer.write_record(row)?;
        written += 1;
    }
    writer.flush()?;

    Ok(written)
}

pub fn write_csv_string<I, R, F>(header: &[String], rows: I) -> Result<String, IoError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = F>,
    F: AsRef<[u8]>,
{
    let mut buffer = Vec::new();
    write_csv(&mut buffer, header, rows)?;
    // csv only ever emits the UTF-8 it was given
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, IoError> {
    fs::read(path).map_err(|source| IoError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn csv_reader(input: &[u8]) -> csv::Reader<&[u8]> {
    let input = input.strip_prefix(UTF8_BOM).unwrap_or(input);
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input)
}

fn parse_csv(source_name: &str, input: &[u8]) -> Result<(Vec<String>, Vec<Vec<String>>), IoError> {
    let mut reader = csv_reader(input);
    let header = read_header(source_name, &mut reader)?;
    let rows = read_records(source_name, &mut reader)?;
    Ok((header, rows))
}

fn read_header(source_name: &str, reader: &mut csv::Reader<&[u8]>) -> Result<Vec<String>, IoError> {
    let header = reader.headers().map_err(|source| IoError::Csv {
        source_name: source_name.to_owned(),
        source,
    })?;

    if header.is_empty() {
        return Err(IoError::MissingHeaders {
            source_name: source_name.to_owned(),
        });
    }

    Ok(record_fields(header))
}

fn read_records(
    source_name: &str,
    reader: &mut csv::Reader<&[u8]>,
) -> Result<Vec<Vec<String>>, IoError> {
    reader
        .records()
        .map(|record| {
            record.map(|record| record_fields(&record)).map_err(|source| IoError::Csv {
                source_name: source_name.to_owned(),
                source,
            })
        })
        .collect()
}

fn record_fields(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_owned).collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use kj_frame::FrameError;
    use kj_types::{KeyList, KeyNormalizer};

    use super::{
        IoError, load_keyed_bytes, load_keyed_table, read_table_bytes, read_table_path,
        read_table_str, write_csv_string,
    };

    #[test]
    fn leading_bom_is_stripped_from_first_header() {
        let table = read_table_bytes("bom.csv", b"\xEF\xBB\xBFid,name\r\n1,Ann\r\n").expect("read");
        assert_eq!(table.header(), &["id".to_owned(), "name".to_owned()]);
    }

    #[test]
    fn quoted_fields_and_ragged_rows_load() {
        let table =
            read_table_str("q.csv", "id,name,note\n1,\"Smith, Ann\",\"say \"\"hi\"\"\"\n2\n")
                .expect("read");
        assert_eq!(
            table.row(0),
            Some(&["1".to_owned(), "Smith, Ann".to_owned(), "say \"hi\"".to_owned()][..])
        );
        assert_eq!(
            table.row(1),
            Some(&["2".to_owned(), String::new(), String::new()][..])
        );
    }

    #[test]
    fn empty_input_has_no_headers() {
        let err = read_table_str("empty.csv", "").expect_err("no header");
        assert!(matches!(err, IoError::MissingHeaders { .. }));
        assert!(err.is_schema_error());
    }

    #[test]
    fn wide_row_is_a_schema_error() {
        let err = read_table_str("wide.csv", "a\n1,2\n").expect_err("wide");
        assert!(err.is_schema_error());
    }

    #[test]
    fn missing_key_column_fails_before_rows_are_indexed() {
        let err = load_keyed_bytes(
            "people.csv",
            b"id,name\n1,Ann\n",
            &[KeyList::parse("id"), KeyList::parse("surname")],
            &KeyNormalizer::default(),
        )
        .expect_err("missing column");

        match &err {
            IoError::Frame(FrameError::MissingKeyColumns {
                source_name,
                columns,
            }) => {
                assert_eq!(source_name, "people.csv");
                assert_eq!(columns, &["surname".to_owned()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_schema_error());
    }

    #[test]
    fn invalid_utf8_is_reported_with_file_name() {
        let err = read_table_bytes("bad.csv", b"id\n\xFF\xFE\n").expect_err("invalid utf8");
        assert!(matches!(err, IoError::Csv { ref source_name, .. } if source_name == "bad.csv"));
        assert!(!err.is_schema_error());
    }

    #[test]
    fn keyed_table_loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"id,dept\n1,X\n1,Y\n").expect("write");

        let keyed = load_keyed_table(file.path(), &[KeyList::parse("id")], &KeyNormalizer::default())
            .expect("load");
        assert_eq!(keyed.table().len(), 2);
        assert_eq!(keyed.index(0).expect("index").distinct_keys(), 1);

        let table = read_table_path(file.path()).expect("plain read");
        assert_eq!(table.width(), 2);
    }

    #[test]
    fn unreadable_path_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = read_table_path(&dir.path().join("absent.csv")).expect_err("absent");
        assert!(matches!(err, IoError::Read { .. }));
    }

    #[test]
    fn writer_uses_crlf_and_minimal_quoting() {
        let header = vec!["id".to_owned(), "name".to_owned()];
        let out = write_csv_string(
            &header,
            vec![vec!["1", "Smith, Ann"], vec!["2", ""], vec!["", "say \"hi\""]],
        )
        .expect("write");
        assert_eq!(
            out,
            "id,name\r\n1,\"Smith, Ann\"\r\n2,\r\n,\"say \"\"hi\"\"\"\r\n"
        );
    }
}
