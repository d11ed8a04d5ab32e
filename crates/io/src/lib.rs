// File and database boundary for tally

pub mod csv;
pub mod sqlite;
pub mod xlsx;

use std::path::Path;

use tally_recon::tabular::Table;

pub use sqlite::SqliteStore;

/// Decode a tabular export by extension. Anything that is not a known
/// spreadsheet format is read as delimited text.
pub fn load_table(path: &Path, sheet: Option<&str>) -> Result<Table, String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => xlsx::import(path, sheet),
        "tsv" | "tab" => csv::import_with_delimiter(path, b'\t'),
        _ => csv::import(path),
    }
}

/// Legacy log text, decoded with the same fallback as CSV files.
pub fn read_log(path: &Path) -> Result<String, String> {
    csv::read_file_as_utf8(path)
}
