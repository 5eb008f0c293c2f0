use std::path::Path;

use anyhow::Context;

use meshgrid_commands::RunReport;

pub async fn report(dir: &Path, json: bool) -> anyhow::Result<()> {
    let report = RunReport::scan(dir)
        .await
        .with_context(|| format!("reading run logs in {}", dir.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", RunReport::CSV_HEADER);
        println!("{}", report.to_csv_row());
    }
    Ok(())
}
