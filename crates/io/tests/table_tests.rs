use std::io::Write;

use chrono::{TimeZone, Utc};

use tally_io::{load_table, read_log};
use tally_recon::config::TallyConfig;
use tally_recon::tabular::adapt;
use tally_recon::LogParser;

#[test]
fn csv_export_through_adapter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("groups.csv");
    std::fs::write(
        &path,
        "Collection Date;Individual;group_collections\n\
         2024-02-01;30;\"[{\"\"groupName\"\":\"\"Scouts\"\",\"\"sandwichCount\"\":20}]\"\n\
         2024-02-08;n/a;\n\
         2024-02-15;0;\n",
    )
    .unwrap();

    let config = TallyConfig::from_toml(
        r#"
[sources.groups]
date_column = "Collection Date"
total_column = "Individual"
breakdown_column = "group_collections"
label = "Groups"
"#,
    )
    .unwrap();

    let table = load_table(&path, None).unwrap();
    assert_eq!(table.headers.len(), 3);
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let intake = adapt("groups", &table, config.source("groups").unwrap(), at)
        .unwrap()
        .into_intake();
    assert_eq!(intake.records.len(), 1);
    assert_eq!(intake.records[0].effective_total(), 50);
    assert_eq!(intake.rejected.len(), 1);
    assert_eq!(intake.filtered, 1);
}

#[test]
fn windows_1252_log_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.rtf");
    let mut file = std::fs::File::create(&path).unwrap();
    // 0x96 is an en dash in Windows-1252 and invalid as UTF-8
    file.write_all(b"Caf\xe9 \x96 Week 3 (01/21/2024): 75 sandwiches\n").unwrap();
    drop(file);

    let text = read_log(&path).unwrap();
    assert!(text.starts_with("Café"));
    let parsed = LogParser::new(&Default::default())
        .unwrap()
        .parse(&text, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
    assert_eq!(parsed.total(), 75);
}

#[test]
fn unreadable_input_reports_path() {
    let err = load_table(std::path::Path::new("/nonexistent/master.csv"), None).unwrap_err();
    assert!(err.contains("/nonexistent/master.csv"));
}
