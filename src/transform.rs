//! Parsing of downloaded delimited files and the cleaning step.
//!
//! Cleaning is pure: it fills absent cells with the zero of the column's type and
//! trims + lowercases every column label. Nothing here touches the network or a store.

use crate::error::EtlError;
use crate::table::{CleanedTable, Column, ColumnType, RawTable, Value};
use encoding_rs::{Encoding, UTF_8};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

pub fn load(path: &Path, delimiter: u8, encoding: &str) -> Result<CleanedTable, EtlError> {
    let raw = parse_table(path, delimiter, encoding)?;
    Ok(clean_table(raw))
}

pub fn parse_table(path: &Path, delimiter: u8, encoding: &str) -> Result<RawTable, EtlError> {
    let bytes = std::fs::read(path).map_err(|err| EtlError::parse(path, err))?;
    if bytes.is_empty() {
        return Err(EtlError::parse(path, "file is empty"));
    }

    let text = decode(&bytes, encoding).map_err(|message| EtlError::parse(path, message))?;
    let table = parse_text(&text, delimiter).map_err(|message| EtlError::parse(path, message))?;

    debug!(
        file = %path.display(),
        columns = table.headers.len(),
        rows = table.rows.len(),
        "parsed delimited file"
    );
    Ok(table)
}

// Labels that mean ISO-8859-1 proper. encoding_rs maps them to windows-1252,
// which decodes 0x80..=0x9F differently.
const LATIN1_LABELS: &[&str] = &[
    "iso-8859-1",
    "iso8859-1",
    "iso88591",
    "iso_8859-1",
    "iso_8859-1:1987",
    "iso-ir-100",
    "latin1",
    "l1",
    "cp819",
    "ibm819",
    "csisolatin1",
];

fn decode(bytes: &[u8], label: &str) -> Result<String, String> {
    if LATIN1_LABELS.contains(&label.trim().to_ascii_lowercase().as_str()) {
        return Ok(encoding_rs::mem::decode_latin1(bytes).into_owned());
    }

    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| format!("unknown encoding {label}"))?;

    let bytes = if encoding == UTF_8 {
        bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
    } else {
        bytes
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| format!("content is not valid {}", encoding.name()))
}

fn parse_text(text: &str, delimiter: u8) -> Result<RawTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let headers: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|err| err.to_string())?
            .iter()
            .map(str::to_string)
            .collect(),
        None => return Err("no header row".to_string()),
    };

    let mut rows = Vec::new();
    for (index, record) in records.enumerate() {
        let record = record.map_err(|err| err.to_string())?;
        if record.len() > headers.len() {
            return Err(format!(
                "line {} has {} fields, header has {}",
                index + 2,
                record.len(),
                headers.len()
            ));
        }

        let mut row: Vec<Option<String>> = record
            .iter()
            .map(|field| (!field.is_empty()).then(|| field.to_string()))
            .collect();
        row.resize(headers.len(), None);
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

/// Fill absent cells and normalize labels. Row order and cardinality are preserved.
///
/// Rows shorter than the header are padded with zeros; cells past the last column are dropped.
pub fn clean_table(raw: RawTable) -> CleanedTable {
    let kinds: Vec<ColumnType> = (0..raw.headers.len())
        .map(|index| {
            infer_column_type(
                raw.rows
                    .iter()
                    .map(|row| row.get(index).and_then(Option::as_deref)),
            )
        })
        .collect();

    let labels = dedupe_labels(&raw.headers);
    let columns: Vec<Column> = labels
        .iter()
        .enumerate()
        .zip(&kinds)
        .map(|((index, label), kind)| Column {
            name: normalize_label(label, index),
            kind: *kind,
        })
        .collect();
    warn_on_collisions(&raw.headers, &columns);

    let rows = raw
        .rows
        .into_iter()
        .map(|row| {
            let mut cells = row.into_iter();
            kinds
                .iter()
                .map(|kind| match cells.next().flatten() {
                    Some(text) => typed_value(text, *kind),
                    None => kind.zero(),
                })
                .collect()
        })
        .collect();

    CleanedTable { columns, rows }
}

/// Repeated labels get a `.N` suffix (`v`, `v.1`, `v.2`), skipping names already taken,
/// the way dataframe readers disambiguate a header row.
pub fn dedupe_labels(headers: &[String]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut labels = Vec::with_capacity(headers.len());

    for header in headers {
        let mut label = header.clone();
        let mut count = counts.get(&label).copied().unwrap_or(0);
        while count > 0 {
            counts.insert(label.clone(), count + 1);
            label = format!("{label}.{count}");
            count = counts.get(&label).copied().unwrap_or(0);
        }
        counts.insert(label.clone(), count + 1);
        labels.push(label);
    }

    labels
}

pub fn normalize_label(label: &str, index: usize) -> String {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return format!("unnamed: {index}");
    }
    trimmed.to_lowercase()
}

/// A column with no present cells is treated as real, matching how a dataframe
/// reads an all-missing column.
pub fn infer_column_type<'a>(cells: impl Iterator<Item = Option<&'a str>>) -> ColumnType {
    let mut kind = ColumnType::Real;
    let mut seen_integer_only = true;
    let mut any_present = false;

    for cell in cells.flatten() {
        any_present = true;
        if seen_integer_only && parse_integer(cell).is_some() {
            continue;
        }
        seen_integer_only = false;
        if parse_real(cell).is_none() {
            kind = ColumnType::Text;
            break;
        }
    }

    if any_present && seen_integer_only && kind != ColumnType::Text {
        ColumnType::Integer
    } else {
        kind
    }
}

fn typed_value(text: String, kind: ColumnType) -> Value {
    match kind {
        ColumnType::Integer => parse_integer(&text)
            .map(Value::Integer)
            .unwrap_or(Value::Text(text)),
        ColumnType::Real => parse_real(&text)
            .map(Value::Real)
            .unwrap_or(Value::Text(text)),
        ColumnType::Text => Value::Text(text),
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    text.trim().parse::<i64>().ok()
}

// Non-finite values would land in SQLite as NULL.
fn parse_real(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn warn_on_collisions(original: &[String], columns: &[Column]) {
    let mut first_seen: HashMap<&str, usize> = HashMap::new();
    for (index, column) in columns.iter().enumerate() {
        if let Some(previous) = first_seen.insert(column.name.as_str(), index) {
            warn!(
                column = %column.name,
                first = %original[previous],
                second = %original[index],
                "distinct column labels collapse to the same name after normalization"
            );
        }
    }
}
