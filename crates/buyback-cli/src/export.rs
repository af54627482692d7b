//! CSV report files written after a run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use buyback_core::{OverlapHint, Plan, plan_label};
use buyback_store::StoredExecution;

pub const PLANS_ALL: &str = "plans_all.csv";
pub const PLANS_OVERLAP_HINT: &str = "plans_overlap_hint.csv";
pub const PLANS_INCREMENT: &str = "plans_increment.csv";
pub const EXECUTIONS_INCREMENT: &str = "executions_increment.csv";

/// Execution row as exported, with the plan rendered for people.
#[derive(Debug, Serialize)]
struct ExecutionRow<'a> {
    entity_code: &'a str,
    plan_key: &'a str,
    plan_label: String,
    display_name: Option<&'a str>,
    date: NaiveDate,
    amount: Option<f64>,
    volume: Option<f64>,
    avg_price: Option<f64>,
    progress_text: Option<&'a str>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
}

impl<'a> From<&'a StoredExecution> for ExecutionRow<'a> {
    fn from(e: &'a StoredExecution) -> Self {
        let r = &e.record;
        Self {
            entity_code: &r.entity_code,
            plan_key: &e.plan_key,
            plan_label: plan_label(&e.plan_key),
            display_name: r.display_name.as_deref(),
            date: r.date,
            amount: r.amount,
            volume: r.volume,
            avg_price: r.avg_price,
            progress_text: r.progress_text.as_deref(),
            start_date: r.start_date,
            end_date: r.end_date,
        }
    }
}

/// Writes report files into one output directory.
pub struct Exporter {
    dir: PathBuf,
}

impl Exporter {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn plans_all(&self, plans: &[Plan]) -> Result<PathBuf> {
        self.write(PLANS_ALL, plans)
    }

    pub fn overlap_hints(&self, hints: &[OverlapHint]) -> Result<PathBuf> {
        self.write(PLANS_OVERLAP_HINT, hints)
    }

    pub fn plans_increment(&self, plans: &[Plan]) -> Result<PathBuf> {
        self.write(PLANS_INCREMENT, plans)
    }

    pub fn executions_increment(&self, rows: &[StoredExecution]) -> Result<PathBuf> {
        let rows: Vec<ExecutionRow<'_>> = rows.iter().map(ExecutionRow::from).collect();
        self.write(EXECUTIONS_INCREMENT, &rows)
    }

    fn write<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let mut writer =
            csv::Writer::from_path(&path).with_context(|| format!("creating {}", path.display()))?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = rows.len(), "report written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buyback_core::{ExecutionRecord, PlanIdentity};
    use tempfile::TempDir;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn stored(key: &str) -> StoredExecution {
        StoredExecution {
            plan_key: key.into(),
            record: ExecutionRecord {
                entity_code: "000001".into(),
                identity: PlanIdentity::from_storage_key(key),
                display_name: Some("Ping An".into()),
                date: d("2024-02-01"),
                amount: Some(1.5e6),
                volume: None,
                avg_price: None,
                progress_text: None,
                start_date: None,
                end_date: None,
            },
        }
    }

    #[test]
    fn executions_carry_plan_label() {
        let dir = TempDir::new().unwrap();
        let exporter = Exporter::new(dir.path()).unwrap();
        let path = exporter
            .executions_increment(&[stored("__DEFAULT__:000001"), stored("0123456789abcdef")])
            .unwrap();

        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().clone();
        let label = headers.iter().position(|h| h == "plan_label").unwrap();
        let labels: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[label].to_string())
            .collect();
        assert_eq!(labels, vec!["default plan", "0123456789abcdef"]);
    }

    #[test]
    fn empty_report_is_still_written() {
        let dir = TempDir::new().unwrap();
        let exporter = Exporter::new(&dir.path().join("nested")).unwrap();
        let path = exporter.overlap_hints(&[]).unwrap();
        assert!(path.exists());
    }
}
