//! CSV feed files → raw `column name → text` records.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use buyback_core::RawRecord;
use tracing::debug;

const BOM: char = '\u{feff}';

/// Read a headed CSV file. Header names are trimmed and a UTF-8 BOM is dropped.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let records = parse_records(file).with_context(|| format!("reading {}", path.display()))?;
    debug!(path = %path.display(), rows = records.len(), "feed file read");
    Ok(records)
}

pub fn parse_records<R: Read>(reader: R) -> Result<Vec<RawRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches(BOM).trim().to_string())
        .collect();

    let mut out = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row: RawRecord = headers
            .iter()
            .zip(record.iter())
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        out.push(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_and_padding_stripped_from_headers() {
        let data = "\u{feff}code , name,date\n000001,Ping An,2024-02-01\n";
        let rows = parse_records(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("code").map(String::as_str), Some("000001"));
        assert_eq!(rows[0].get("name").map(String::as_str), Some("Ping An"));
    }

    #[test]
    fn short_rows_keep_present_columns() {
        let data = "code,name,date\n000002,Vanke\n";
        let rows = parse_records(data.as_bytes()).unwrap();
        assert_eq!(rows[0].len(), 2);
        assert!(rows[0].get("date").is_none());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_records(Path::new("/nonexistent/plans.csv")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/plans.csv"));
    }
}
