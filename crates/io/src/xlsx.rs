// Spreadsheet decoding (xlsx, xls, xlsb, ods) into a `Table`

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader, Sheets};
use tally_recon::tabular::{CellValue, Table};

/// Read one worksheet; the first one when `sheet` is `None`. The first
/// non-empty row is the header row.
pub fn import(path: &Path, sheet: Option<&str>) -> Result<Table, String> {
    let mut workbook: Sheets<_> = open_workbook_auto(path)
        .map_err(|e| format!("Failed to open spreadsheet {}: {e}", path.display()))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let name = match sheet {
        Some(wanted) => sheet_names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(wanted))
            .cloned()
            .ok_or_else(|| format!("{}: no sheet named '{wanted}'", path.display()))?,
        None => sheet_names
            .first()
            .cloned()
            .ok_or_else(|| format!("{}: workbook contains no sheets", path.display()))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| format!("Failed to read sheet '{name}': {e}"))?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(convert).collect::<Vec<_>>())
        .skip_while(|row| row.iter().all(CellValue::is_blank));

    let headers = match rows.next() {
        Some(header) => header.iter().map(CellValue::as_text).collect(),
        None => return Ok(Table::default()),
    };
    let rows: Vec<Vec<CellValue>> = rows
        .filter(|row| !row.iter().all(CellValue::is_blank))
        .collect();

    tracing::debug!(sheet = %name, rows = rows.len(), "read worksheet");
    Ok(Table { headers, rows })
}

fn convert(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        // serial day number; coerced like any other numeric date
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("#{e:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_conversion() {
        assert_eq!(convert(&Data::Int(5)), CellValue::Number(5.0));
        assert_eq!(convert(&Data::String("  ".into())), CellValue::Empty);
        assert_eq!(convert(&Data::Bool(true)), CellValue::Bool(true));
        assert_eq!(convert(&Data::String("x".into())), CellValue::Text("x".into()));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = import(Path::new("/nonexistent/book.xlsx"), None).unwrap_err();
        assert!(err.contains("Failed to open spreadsheet"));
    }
}
