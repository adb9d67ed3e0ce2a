use crate::error::EtlError;
use crate::table::{CleanedTable, Value};
use rust_xlsxwriter::{ColNum, Format, RowNum, Workbook, XlsxError};
use std::path::Path;
use tracing::info;

const MAX_SHEET_NAME: usize = 31;
const MAX_COLUMNS: usize = 16_384;
const MAX_ROWS: usize = 1_048_576;
// Largest magnitude an f64 cell holds without rounding.
const MAX_EXACT_INTEGER: i64 = 1 << 53;

/// Writes the cleaned table as a single-sheet workbook, overwriting `dest`.
pub fn export_table(table: &CleanedTable, sheet: &str, dest: &Path) -> Result<(), EtlError> {
    if table.columns.len() > MAX_COLUMNS {
        return Err(EtlError::export(
            dest,
            format!(
                "{} columns exceed the worksheet limit of {MAX_COLUMNS}",
                table.columns.len()
            ),
        ));
    }
    if table.rows.len() + 1 > MAX_ROWS {
        return Err(EtlError::export(
            dest,
            format!(
                "{} rows exceed the worksheet limit of {}",
                table.rows.len(),
                MAX_ROWS - 1
            ),
        ));
    }

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| EtlError::export(dest, e))?;
    }

    build_workbook(table, sheet)
        .and_then(|mut workbook| workbook.save(dest))
        .map_err(|e| EtlError::export(dest, e))?;

    info!(
        file = %dest.display(),
        rows = table.rows.len(),
        "spreadsheet exported"
    );
    Ok(())
}

fn build_workbook(table: &CleanedTable, sheet: &str) -> Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name(sheet))?;

    for (col, column) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, col as ColNum, &column.name, &header)?;
    }

    for (index, row) in table.rows.iter().enumerate() {
        let row_num = (index + 1) as RowNum;
        for (col, value) in row.iter().enumerate() {
            let col = col as ColNum;
            match value {
                Value::Integer(v) => match exact_number(*v) {
                    Some(number) => worksheet.write_number(row_num, col, number)?,
                    None => worksheet.write_string(row_num, col, v.to_string())?,
                },
                Value::Real(v) => worksheet.write_number(row_num, col, *v)?,
                Value::Text(v) => worksheet.write_string(row_num, col, v)?,
            };
        }
    }

    Ok(workbook)
}

/// Integers beyond 2^53 are written as text so no digits are lost.
fn exact_number(value: i64) -> Option<f64> {
    (value.unsigned_abs() <= MAX_EXACT_INTEGER as u64).then_some(value as f64)
}

/// Worksheet names are capped at 31 characters and may not contain `[]:*?/\`.
fn sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet1".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_names_are_truncated_and_sanitized() {
        assert_eq!(
            sheet_name("final_energy_consumption_by_sector"),
            "final_energy_consumption_by_sec"
        );
        assert_eq!(sheet_name("a/b:c"), "a_b_c");
        assert_eq!(sheet_name(""), "Sheet1");
    }

    #[test]
    fn large_integers_fall_back_to_text() {
        assert_eq!(exact_number(42), Some(42.0));
        assert_eq!(exact_number(-(1 << 53)), Some(-9_007_199_254_740_992.0));
        assert_eq!(exact_number((1 << 53) + 1), None);
        assert_eq!(exact_number(i64::MIN), None);
    }
}
