//! CSV export for window reports: one row per emitted window.
//!
//! Appends to a persistent file so several runs (different tick rates, policies)
//! can be compared afterwards; the header is written only when the file is new.

use serde::Serialize;
use std::{
    fs::{OpenOptions, create_dir_all},
    path::{Path, PathBuf},
};

use crate::utils::{error::LinkResult, metrics::WindowReport};

#[derive(Debug, Serialize)]
struct ReportRow {
    tick_hz: f64,
    window_secs: f64,
    ticks: u64,
    fresh: u64,
    achieved_hz: f64,
    fresh_pct: f64,
    age_p50_ms: Option<f64>,
    age_p95_ms: Option<f64>,
    age_max_ms: Option<f64>,
    adapter_p50_us: Option<f64>,
    adapter_p95_us: Option<f64>,
    adapter_max_us: Option<f64>,
    max_wait_ticks: Option<u32>,
    max_tick_gap_ms: f64,
    drained: u64,
    malformed: u64,
    stale: u64,
    overruns: u64,
}

impl From<&WindowReport> for ReportRow {
    fn from(r: &WindowReport) -> Self {
        Self {
            tick_hz: r.tick_hz,
            window_secs: r.window_secs,
            ticks: r.ticks,
            fresh: r.fresh,
            achieved_hz: r.achieved_hz,
            fresh_pct: r.fresh_pct,
            age_p50_ms: r.age_ms.map(|p| p.p50),
            age_p95_ms: r.age_ms.map(|p| p.p95),
            age_max_ms: r.age_ms.map(|p| p.max),
            adapter_p50_us: r.adapter_us.map(|p| p.p50),
            adapter_p95_us: r.adapter_us.map(|p| p.p95),
            adapter_max_us: r.adapter_us.map(|p| p.max),
            max_wait_ticks: r.max_wait_ticks,
            max_tick_gap_ms: r.max_tick_gap_ms,
            drained: r.drained,
            malformed: r.malformed,
            stale: r.stale,
            overruns: r.overruns,
        }
    }
}

/// Appends window reports to a CSV file, creating it (and its parent directory) on first use.
pub struct ReportCsv {
    path: PathBuf,
}

impl ReportCsv {
    pub fn new(path: impl Into<PathBuf>) -> LinkResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, report: &WindowReport) -> LinkResult<()> {
        let is_new = self.path.metadata().map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        writer.serialize(ReportRow::from(report))?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::Percentiles;

    fn report(ticks: u64) -> WindowReport {
        WindowReport {
            tick_hz: 100.0,
            window_secs: 5.0,
            ticks,
            fresh: ticks / 2,
            achieved_hz: ticks as f64 / 5.0,
            fresh_pct: 50.0,
            age_ms: Some(Percentiles { p50: 1.0, p95: 2.0, max: 3.0 }),
            adapter_us: None,
            max_wait_ticks: Some(1),
            max_tick_gap_ms: 10.4,
            drained: ticks,
            malformed: 0,
            stale: 0,
            overruns: 0,
        }
    }

    #[test]
    fn header_written_once_across_appends() {
        let dir = tempfile::tempdir().unwrap();
        let export = ReportCsv::new(dir.path().join("reports/window.csv")).unwrap();

        export.append(&report(500)).unwrap();
        export.append(&report(498)).unwrap();

        let text = std::fs::read_to_string(export.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("tick_hz,window_secs,ticks"));
        assert_eq!(text.matches("tick_hz").count(), 1);
        assert!(lines[1].contains(",500,"));
        assert!(lines[2].contains(",498,"));
    }
}
