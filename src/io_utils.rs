//! File plumbing for the command-line driver.
//!
//! The engine itself never touches the filesystem; this module turns CSV
//! files into [`SourceRow`]s and writes mapped facts back out.
//!
//! - **Delimiter resolution**: `.tsv` → tab, anything else → comma, unless
//!   overridden.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

use crate::{fact::SourceRow, schema::Schema, store::FactStore};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    Ok(open_csv_reader(reader, delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// Reads every record of a headed CSV file as a [`SourceRow`]. Short records
/// simply lack the trailing columns.
pub fn read_source_rows(
    path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<Vec<SourceRow>> {
    let delimiter = resolve_input_delimiter(path, delimiter);
    let mut reader = open_csv_reader_from_path(path, delimiter)?;
    let headers = reader_headers(&mut reader, encoding)
        .with_context(|| format!("Reading headers from {path:?}"))?;

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading row {} of {path:?}", rows.len() + 1))?
    {
        let cells = decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {} of {path:?}", rows.len() + 1))?;
        rows.push(SourceRow::from_record(&headers, &cells));
    }
    Ok(rows)
}

pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    })
}

/// Writes one JSON object per fact, in store order.
pub fn write_facts_jsonl<S: FactStore + ?Sized>(
    schema: &Schema,
    store: &S,
    writer: &mut dyn Write,
) -> Result<usize> {
    let mut written = 0;
    for record in store.records() {
        serde_json::to_writer(&mut *writer, &record.to_json(schema))
            .context("Serializing fact record")?;
        writer.write_all(b"\n").context("Writing fact record")?;
        written += 1;
    }
    writer.flush().context("Flushing fact output")?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn tsv_extension_selects_tab() {
        assert_eq!(resolve_input_delimiter(Path::new("rows.tsv"), None), b'\t');
        assert_eq!(resolve_input_delimiter(Path::new("rows.csv"), None), b',');
        assert_eq!(resolve_input_delimiter(Path::new("rows.tsv"), Some(b';')), b';');
    }

    #[test]
    fn latin1_input_decodes() {
        let encoding = resolve_encoding(Some("latin1")).unwrap();
        let data: &[u8] = b"region,amount\nM\xe9xico,1\n";
        let mut reader = open_csv_reader(Cursor::new(data), b',');
        let headers = reader_headers(&mut reader, encoding).unwrap();
        let mut record = csv::ByteRecord::new();
        assert!(reader.read_byte_record(&mut record).unwrap());
        let row = SourceRow::from_record(&headers, &decode_record(&record, encoding).unwrap());
        assert_eq!(row.get("region"), Some("México"));
    }

    #[test]
    fn unknown_encodings_are_rejected() {
        assert!(resolve_encoding(Some("klingon")).is_err());
    }
}
