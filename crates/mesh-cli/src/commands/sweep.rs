use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tracing::info;

use mesh_core::{ScriptConfig, Settings};
use meshgrid_commands::{RunReport, SweepPlan, TagFile};

use super::run::{RunOptions, run_script, run_tag};

async fn append(path: &Path, line: &str) -> anyhow::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    Ok(())
}

/// Run every case of `plan` `plan.repeats` times, each on a fresh mesh.
/// Returns the path of the results CSV.
pub async fn sweep(opts: &RunOptions, plan: &SweepPlan) -> anyhow::Result<PathBuf> {
    let settings = Settings::load(opts.settings.as_deref())?;
    let output = PathBuf::from(&settings.output.dir);
    let sweep_tag = run_tag();
    let results = output
        .join("performance_results")
        .join(format!("results_{sweep_tag}"));
    tokio::fs::create_dir_all(&results)
        .await
        .with_context(|| format!("creating {}", results.display()))?;

    let benchmark = plan.benchmark;
    let csv = results.join(format!("{benchmark}.csv"));
    let config_path = results.join(format!("config_{benchmark}.json"));
    let tag_path = output.join("tag.json");
    append(&csv, benchmark.csv_header()).await?;

    let cases = plan.cases();
    info!(%benchmark, cases = cases.len(), repeats = plan.repeats, "sweep starting");
    for (index, case) in cases.iter().enumerate() {
        let rendered = serde_json::to_string_pretty(&plan.config(case))?;
        tokio::fs::write(&config_path, rendered)
            .await
            .with_context(|| format!("writing {}", config_path.display()))?;

        for repeat in 0..plan.repeats {
            let tag = format!("{sweep_tag}_{index}_{repeat}");
            info!(
                %benchmark,
                servers = case.servers,
                interval_ms = ?case.interval_ms,
                repeat,
                %tag,
                "sweep run"
            );
            let config = ScriptConfig::from_file(&config_path)?;
            let dir = run_script(opts, config, &tag).await?;
            let memo = serde_json::to_string_pretty(&TagFile { tag: tag.clone() })?;
            tokio::fs::write(&tag_path, memo)
                .await
                .with_context(|| format!("writing {}", tag_path.display()))?;

            let report = RunReport::scan(&dir)
                .await
                .with_context(|| format!("reading run logs in {}", dir.display()))?;
            append(&csv, &plan.row(case, &report, &tag)).await?;
        }
    }
    println!("results written to {}", csv.display());
    Ok(csv)
}
