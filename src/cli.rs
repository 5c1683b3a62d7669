use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "catalog-worker")]
#[command(about = "Runs catalog tasks against an inventory API", long_about = None)]
pub struct Cli {
    /// Configuration file (overrides CATALOG_WORKER_CONFIG and the default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one task and print its outcome
    Run(RunArgs),
    /// Load and validate configuration, then print it
    CheckConfig,
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Task JSON file, or `-` for stdin
    #[arg(long)]
    pub task: PathBuf,
}

impl RunArgs {
    pub fn reads_stdin(&self) -> bool {
        self.task.as_os_str() == "-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["catalog-worker", "run", "--task", "task.json"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.task, PathBuf::from("task.json"));
                assert!(!args.reads_stdin());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_stdin_and_config() {
        let cli = Cli::parse_from([
            "catalog-worker",
            "run",
            "--task",
            "-",
            "--config",
            "/etc/catalog.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/catalog.toml")));
        assert!(matches!(cli.command, Commands::Run(ref args) if args.reads_stdin()));
    }

    #[test]
    fn test_parse_check_config() {
        let cli = Cli::parse_from(["catalog-worker", "check-config"]);
        assert!(matches!(cli.command, Commands::CheckConfig));
    }
}
