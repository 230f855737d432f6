//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Download serialized books and run them through processing stages.
#[derive(Parser, Debug)]
#[command(name = "bookfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// JSON run file (source, acquisition settings, plan filter, stages)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root directory holding one subdirectory per book
    #[arg(short = 'd', long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch book info and chapters into the raw generation
    Download(DownloadArgs),
    /// Run the configured stages over stored chapters
    Process(ProcessArgs),
    /// Show stored generations and the pipeline manifest
    Status(StatusArgs),
}

#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// Book ids to download
    #[arg(required = true)]
    pub book_ids: Vec<String>,

    /// Concurrent chapter workers (1-64)
    #[arg(short = 'w', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub workers: Option<u8>,

    /// Retries after the first attempt (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub retry_times: Option<u32>,

    /// Pause after each request in milliseconds (max 60000)
    #[arg(short = 'i', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub request_interval: Option<u64>,

    /// Refetch chapters that are already stored clean
    #[arg(long)]
    pub no_skip_existing: bool,

    /// Run the configured stages after a completed download
    #[arg(long)]
    pub process: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ProcessArgs {
    /// Book ids to process
    #[arg(required = true)]
    pub book_ids: Vec<String>,

    /// Reprocess every stage even when cached output is reusable
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StatusArgs {
    /// Book ids to inspect
    #[arg(required = true)]
    pub book_ids: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_download_parses_book_ids() {
        let args = Args::try_parse_from(["bookfetch", "download", "42", "43"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        let Command::Download(download) = args.command else {
            panic!("expected download");
        };
        assert_eq!(download.book_ids, ["42", "43"]);
        assert!(download.workers.is_none());
        assert!(!download.no_skip_existing);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["bookfetch", "-v", "status", "1"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["bookfetch", "status", "1", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "bookfetch", "process", "1", "-q", "--config", "run.json", "-d", "/data",
        ])
        .unwrap();
        assert!(args.quiet);
        assert_eq!(args.config, Some(PathBuf::from("run.json")));
        assert_eq!(args.data_dir, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_cli_book_id_required() {
        let result = Args::try_parse_from(["bookfetch", "download"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn test_cli_subcommand_required() {
        assert!(Args::try_parse_from(["bookfetch"]).is_err());
    }

    #[test]
    fn test_cli_workers_range() {
        let args = Args::try_parse_from(["bookfetch", "download", "1", "-w", "64"]).unwrap();
        let Command::Download(download) = args.command else {
            panic!("expected download");
        };
        assert_eq!(download.workers, Some(64));

        for value in ["0", "65"] {
            let result = Args::try_parse_from(["bookfetch", "download", "1", "-w", value]);
            assert_eq!(
                result.unwrap_err().kind(),
                clap::error::ErrorKind::ValueValidation
            );
        }
    }

    #[test]
    fn test_cli_retry_times_over_max_rejected() {
        let result = Args::try_parse_from(["bookfetch", "download", "1", "-r", "11"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::ValueValidation
        );
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["bookfetch", "--help"]);
        assert_eq!(result.unwrap_err().kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let result = Args::try_parse_from(["bookfetch", "--version"]);
        assert_eq!(
            result.unwrap_err().kind(),
            clap::error::ErrorKind::DisplayVersion
        );
    }
}
