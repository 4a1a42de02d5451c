//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use fetchall_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use fetchall_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Download many URLs at once, resuming interrupted transfers.
///
/// Each input is `URL` or `URL|PATH`. Partial downloads live next to their
/// destination as `<name>.part` and continue where they stopped on the next run.
#[derive(Parser, Debug)]
#[command(name = "fetchall")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download (`URL` or `URL|PATH`)
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Directory for downloads without an explicit path
    #[arg(short = 'o', long, default_value = ".")]
    pub output_dir: PathBuf,

    /// File with one `URL` or `URL|PATH` per line (`#` starts a comment)
    #[arg(short = 'i', long)]
    pub input_file: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum attempts for transient failures (0-10, 0 means a single attempt)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Connect timeout in seconds
    #[arg(short = 't', long = "timeout", default_value_t = CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub connect_timeout: u64,

    /// Timeout in seconds for a stalled response body
    #[arg(long, default_value_t = READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub read_timeout: u64,

    /// Extra request header `Name: value`, sent with every request (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Fail instead of replacing an existing file that differs from the remote
    #[arg(short = 'O', long)]
    pub no_overwrite: bool,

    /// Ignore partial downloads and always start from zero
    #[arg(short = 'P', long)]
    pub no_partial: bool,

    /// Where transfer state records live (default: <output-dir>/.fetchall/state)
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["fetchall"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.output_dir, PathBuf::from("."));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.concurrency, 5); // DEFAULT_CONCURRENCY
        assert_eq!(args.max_retries, 3); // DEFAULT_MAX_RETRIES
        assert_eq!(args.connect_timeout, 30);
        assert_eq!(args.read_timeout, 300);
        assert!(!args.no_overwrite);
        assert!(!args.no_partial);
        assert!(args.state_dir.is_none());
    }

    #[test]
    fn test_cli_positional_urls_keep_order() {
        let args = Args::try_parse_from([
            "fetchall",
            "https://example.com/a.bin",
            "https://example.com/b.bin|/tmp/b.bin",
        ])
        .unwrap();
        assert_eq!(
            args.urls,
            vec![
                "https://example.com/a.bin".to_string(),
                "https://example.com/b.bin|/tmp/b.bin".to_string()
            ]
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["fetchall", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["fetchall", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["fetchall", "--help"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["fetchall", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["fetchall", "-c", "1"]).unwrap();
        assert_eq!(args.concurrency, 1);
        let args = Args::try_parse_from(["fetchall", "--concurrency", "100"]).unwrap();
        assert_eq!(args.concurrency, 100);

        for value in ["0", "101"] {
            let err = Args::try_parse_from(["fetchall", "-c", value]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_max_retries_bounds() {
        let args = Args::try_parse_from(["fetchall", "-r", "0"]).unwrap();
        assert_eq!(args.max_retries, 0);
        let args = Args::try_parse_from(["fetchall", "--max-retries", "10"]).unwrap();
        assert_eq!(args.max_retries, 10);

        let err = Args::try_parse_from(["fetchall", "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_timeouts() {
        let args =
            Args::try_parse_from(["fetchall", "-t", "5", "--read-timeout", "60"]).unwrap();
        assert_eq!(args.connect_timeout, 5);
        assert_eq!(args.read_timeout, 60);

        let err = Args::try_parse_from(["fetchall", "--timeout", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_headers_are_repeatable() {
        let args = Args::try_parse_from([
            "fetchall",
            "-H",
            "Authorization: Bearer abc",
            "--header",
            "X-Trace: 1",
        ])
        .unwrap();
        assert_eq!(args.headers.len(), 2);
        assert_eq!(args.headers[1], "X-Trace: 1");
    }

    #[test]
    fn test_cli_behavior_flags() {
        let args = Args::try_parse_from([
            "fetchall",
            "-O",
            "-P",
            "-o",
            "/tmp/out",
            "-i",
            "list.txt",
            "--state-dir",
            "/tmp/state",
        ])
        .unwrap();
        assert!(args.no_overwrite);
        assert!(args.no_partial);
        assert_eq!(args.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(args.input_file, Some(PathBuf::from("list.txt")));
        assert_eq!(args.state_dir, Some(PathBuf::from("/tmp/state")));
    }
}
