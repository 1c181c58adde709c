use crate::error::{JoinError, JoinResult};
use crate::relation::Relation;
use csv::ByteRecord;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Field separator of `.tbl` style dumps.
pub const DEFAULT_SEPARATOR: u8 = b'|';

/// Load a relation from a delimited text file, one row per non-blank record.
///
/// Only the first `schema.len()` fields of each record are read; anything after them (for
/// example the empty field behind a terminating separator) is ignored.
pub fn load_delimited(
    path: impl AsRef<Path>,
    separator: u8,
    schema: &[&str],
    name: &str,
) -> JoinResult<Relation> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| JoinError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let relation = parse_delimited(file, separator, schema, name).map_err(|err| match err {
        JoinError::Io { source, .. } => JoinError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })?;
    log::debug!(
        "loaded {} rows into {name} from {}",
        relation.row_count(),
        path.display()
    );
    Ok(relation)
}

/// Parse a relation from any reader. See [`load_delimited`] for the format.
///
/// Parse errors report the 1-based record number; blank records are not counted.
pub fn parse_delimited<R: Read>(
    reader: R,
    separator: u8,
    schema: &[&str],
    name: &str,
) -> JoinResult<Relation> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(false)
        // `.tbl` rows carry a trailing separator, and extra fields are ignored anyway.
        .flexible(true)
        .from_reader(reader);

    let width = schema.len();
    let mut record = ByteRecord::new();
    let mut rows = Vec::new();
    loop {
        match csv_reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {}
            Err(err) => return Err(map_csv_error(err, name, rows.len() + 1)),
        }
        if is_blank(&record) {
            continue;
        }
        rows.push(parse_record(&record, width, name, rows.len())?);
    }

    Relation::new(name, schema.to_vec(), rows)
}

fn is_blank(record: &ByteRecord) -> bool {
    record
        .iter()
        .all(|field| field.iter().all(u8::is_ascii_whitespace))
}

fn parse_record(record: &ByteRecord, width: usize, name: &str, row: usize) -> JoinResult<Vec<f64>> {
    let mut values = Vec::with_capacity(width);
    for (column, field) in record.iter().take(width).enumerate() {
        let value = std::str::from_utf8(field)
            .ok()
            .map(str::trim)
            .and_then(|text| text.parse::<f64>().ok())
            .ok_or_else(|| JoinError::Parse {
                relation: name.to_string(),
                record: row + 1,
                column: column + 1,
                value: String::from_utf8_lossy(field).trim().to_string(),
            })?;
        values.push(value);
    }
    if values.len() < width {
        return Err(JoinError::RowWidthMismatch {
            relation: name.to_string(),
            row,
            expected: width,
            actual: values.len(),
        });
    }
    Ok(values)
}

fn map_csv_error(err: csv::Error, name: &str, record: usize) -> JoinError {
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => JoinError::Io {
            path: name.into(),
            source,
        },
        _ => JoinError::Parse {
            relation: name.to_string(),
            record,
            column: 0,
            value: reason,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{self, Cursor, Write};

    #[test]
    fn parses_tbl_rows_with_trailing_separator() {
        let input = "1|2.5|\n\n3|-4|\r\n";
        let relation = parse_delimited(Cursor::new(input), b'|', &["a", "b"], "T").unwrap();
        assert_eq!(relation.name(), "T");
        assert_eq!(relation.schema(), ["a", "b"]);
        assert_eq!(relation.row_count(), 2);
        assert_eq!(relation.row(0), [1.0, 2.5]);
        assert_eq!(relation.row(1), [3.0, -4.0]);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let relation = parse_delimited(Cursor::new("1,2,3,4\n"), b',', &["a", "b"], "T").unwrap();
        assert_eq!(relation.row(0), [1.0, 2.0]);
    }

    #[test]
    fn tab_separated_fields_are_trimmed() {
        let relation =
            parse_delimited(Cursor::new(" 1\t 2 \n   \n3\t4\n"), b'\t', &["a", "b"], "T").unwrap();
        assert_eq!(relation.row_count(), 2);
        assert_eq!(relation.row(0), [1.0, 2.0]);
        assert_eq!(relation.row(1), [3.0, 4.0]);
    }

    #[test]
    fn short_rows_are_rejected() {
        let err = parse_delimited(Cursor::new("1|2\n3\n"), b'|', &["a", "b"], "T").unwrap_err();
        assert!(matches!(
            err,
            JoinError::RowWidthMismatch {
                row: 1,
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn bad_numbers_report_record_and_column() {
        let err =
            parse_delimited(Cursor::new("1|2\n\n3|x\n"), b'|', &["a", "b"], "T").unwrap_err();
        match err {
            JoinError::Parse {
                relation,
                record,
                column,
                value,
            } => {
                assert_eq!(relation, "T");
                assert_eq!(record, 2);
                assert_eq!(column, 2);
                assert_eq!(value, "x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let err = parse_delimited(Cursor::new(b"1|\xff\n".to_vec()), b'|', &["a", "b"], "T")
            .unwrap_err();
        assert!(matches!(
            err,
            JoinError::Parse {
                record: 1,
                column: 2,
                ..
            }
        ));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
    }

    #[test]
    fn reader_failures_are_io_errors() {
        let err = parse_delimited(FailingReader, b'|', &["a"], "T").unwrap_err();
        match err {
            JoinError::Io { source, .. } => assert_eq!(source.to_string(), "disk gone"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "7|8|").unwrap();
        let relation = load_delimited(file.path(), DEFAULT_SEPARATOR, &["x", "y"], "F").unwrap();
        assert_eq!(relation.row_count(), 1);
        assert_eq!(relation.row(0), [7.0, 8.0]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.tbl");
        let err = load_delimited(&path, b'|', &["x"], "M").unwrap_err();
        match err {
            JoinError::Io { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
