use std::path::PathBuf;

use clap::{Parser, Subcommand};

use meshgrid_commands::{Benchmark, SweepPlan};

mod commands;

#[derive(Parser)]
#[command(
    name = "meshctl",
    about = "meshgrid: testbed orchestrator for spatial mesh nodes",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Settings file (mesh.toml). Defaults apply when omitted.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Simulate brokers and nodes in-process instead of launching programs.
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up a mesh at random coordinates and open the command shell
    Random {
        /// Number of nodes, root included
        #[arg(short, long)]
        servers: u32,
        /// Upper bound of both synthetic coordinates
        #[arg(short, long, default_value_t = 100)]
        range: u32,
        /// Launch on the configured remote machines
        #[arg(long)]
        remote: bool,
    },
    /// Bring up the mesh described by a script config.
    ///
    /// With `"test": true` the script's commands run as a batch and the
    /// mesh is torn down afterwards; otherwise the command shell opens.
    Script {
        /// Path to the JSON script config
        config: PathBuf,
    },
    /// Repeat a benchmark over fleet sizes and ping intervals, one fresh
    /// mesh per repetition, and collect the figures in a CSV file
    Sweep {
        /// performance_1 .. performance_6
        benchmark: Benchmark,
        /// Ping intervals in milliseconds (performance_1 and _2 only)
        #[arg(long, value_delimiter = ',', default_values_t = [10, 100, 1000])]
        intervals: Vec<u64>,
        /// Fleet sizes, root included
        #[arg(long, value_delimiter = ',', default_values_t = [15, 30, 45, 60])]
        servers: Vec<u32>,
        /// Runs per grid point
        #[arg(long, default_value_t = 5)]
        repeat: u32,
        /// Traffic duration in milliseconds
        #[arg(long, default_value_t = 10_000)]
        duration: u64,
        /// Upper bound of both synthetic coordinates
        #[arg(short, long, default_value_t = 10_000)]
        range: u32,
        /// Launch on the configured remote machines
        #[arg(long)]
        remote: bool,
    },
    /// Summarize the logs of a finished run
    Report {
        /// Run directory (exec_<tag>)
        #[arg(short, long)]
        dir: PathBuf,
        /// Print JSON instead of a CSV row
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,meshctl=debug,meshgrid=debug")),
        )
        .init();

    let cli = Cli::parse();
    let opts = commands::run::RunOptions {
        settings: cli.settings,
        dry_run: cli.dry_run,
    };

    match cli.command {
        Commands::Random {
            servers,
            range,
            remote,
        } => commands::run::random(&opts, servers, range, remote).await,
        Commands::Script { config } => commands::run::script(&opts, &config).await,
        Commands::Sweep {
            benchmark,
            intervals,
            servers,
            repeat,
            duration,
            range,
            remote,
        } => {
            let plan = SweepPlan {
                benchmark,
                intervals_ms: intervals,
                server_counts: servers,
                repeats: repeat,
                duration_ms: duration,
                range,
                local_host: !remote,
            };
            commands::sweep::sweep(&opts, &plan).await.map(|_| ())
        }
        Commands::Report { dir, json } => commands::report::report(&dir, json).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["meshctl", "random", "-s", "6", "--dry-run"]).unwrap();
        assert!(cli.dry_run);
        match cli.command {
            Commands::Random {
                servers,
                range,
                remote,
            } => {
                assert_eq!(servers, 6);
                assert_eq!(range, 100);
                assert!(!remote);
            }
            _ => panic!("expected random"),
        }
    }

    #[test]
    fn sweep_defaults_cover_the_full_grid() {
        let cli = Cli::try_parse_from(["meshctl", "sweep", "performance_2"]).unwrap();
        match cli.command {
            Commands::Sweep {
                benchmark,
                intervals,
                servers,
                repeat,
                ..
            } => {
                assert_eq!(benchmark, Benchmark::AllSources);
                assert_eq!(intervals, vec![10, 100, 1000]);
                assert_eq!(servers, vec![15, 30, 45, 60]);
                assert_eq!(repeat, 5);
            }
            _ => panic!("expected sweep"),
        }

        let cli =
            Cli::try_parse_from(["meshctl", "sweep", "performance_5", "--servers", "5,10"]).unwrap();
        assert!(matches!(cli.command, Commands::Sweep { ref servers, .. } if servers == &[5, 10]));
        assert!(Cli::try_parse_from(["meshctl", "sweep", "performance_9"]).is_err());
    }
}
