//! Run report: summary figures scanned from one run's log files.

use std::path::{Path, PathBuf};

use serde::Serialize;

use mesh_core::Role;
use mesh_core::protocol::{ECHO_PING, NEXT_HOP, parse_result_line};
use meshgrid_fleet::sink::file_name;

/// Figures extracted from the root and server logs of a run directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub dir: PathBuf,
    /// Lines ending in `ECHO PING`.
    pub echoed_pings: usize,
    /// Lines reporting a forwarded message.
    pub next_hops: usize,
    /// First `Result:` value, if any benchmark wrote one.
    pub result: Option<f64>,
}

impl RunReport {
    pub const CSV_HEADER: &'static str = "dir,echoed_pings,next_hops,result";

    pub async fn scan(dir: &Path) -> std::io::Result<Self> {
        let mut report = RunReport {
            dir: dir.to_path_buf(),
            echoed_pings: 0,
            next_hops: 0,
            result: None,
        };
        for role in [Role::Root, Role::Server] {
            let text = tokio::fs::read_to_string(dir.join(file_name(role))).await?;
            report.absorb(&text);
        }
        Ok(report)
    }

    fn absorb(&mut self, text: &str) {
        for line in text.lines() {
            if line.trim_end().ends_with(ECHO_PING) {
                self.echoed_pings += 1;
            }
            if line.contains(NEXT_HOP) {
                self.next_hops += 1;
            }
            if self.result.is_none() {
                self.result = parse_result_line(line);
            }
        }
    }

    pub fn to_csv_row(&self) -> String {
        let result = self.result.map(|v| v.to_string()).unwrap_or_default();
        format!(
            "{},{},{},{}",
            self.dir.display(),
            self.echoed_pings,
            self.next_hops,
            result
        )
    }
}
