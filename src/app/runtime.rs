use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fetchall_core::{
    HttpClient, JsonStateStore, RetryPolicy, Scheduler, SchedulerConfig, TransferConfig,
};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{exit_handler, input_processor, progress_manager, terminal};
use crate::cli::Args;

/// State records live here unless `--state-dir` says otherwise.
const STATE_SUBDIR: &str = ".fetchall/state";

pub(crate) async fn run_fetchall() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let no_color = terminal::no_color_env_requested() || terminal::is_dumb_terminal();
    terminal::init_tracing(terminal::resolve_default_log_level(&args), no_color);
    debug!(?args, "CLI arguments parsed");

    let headers = args
        .headers
        .iter()
        .map(|raw| input_processor::parse_header(raw))
        .collect::<Result<Vec<_>>>()?;

    let Some(input_text) = input_processor::collect_input_text(&args)? else {
        info!("No input provided. Pass URLs as arguments, via --input-file, or on stdin.");
        info!("Example: fetchall -o downloads https://example.com/file.iso");
        return Ok(ProcessExit::Success);
    };

    let entries = input_processor::parse_input_text(&input_text);
    if entries.is_empty() {
        info!("No URLs found in input");
        return Ok(ProcessExit::Success);
    }

    if !args.output_dir.exists() {
        std::fs::create_dir_all(&args.output_dir).with_context(|| {
            format!("failed to create output directory {}", args.output_dir.display())
        })?;
        info!(dir = %args.output_dir.display(), "Created output directory");
    }

    let client = HttpClient::new_with_timeouts(
        Duration::from_secs(args.connect_timeout),
        Duration::from_secs(args.read_timeout),
    )
    .context("failed to build HTTP client")?;

    let entries = input_processor::resolve_remote_names(
        entries,
        &args.output_dir,
        &headers,
        &client,
        Duration::from_secs(args.connect_timeout),
        usize::from(args.concurrency),
    )
    .await;
    let (requests, rejected) = input_processor::build_requests(entries, &args.output_dir, &headers);
    info!(
        transfers = requests.len(),
        rejected = rejected.len(),
        "Parsed input"
    );

    let state_dir = args
        .state_dir
        .clone()
        .unwrap_or_else(|| args.output_dir.join(STATE_SUBDIR));
    let store = JsonStateStore::open(state_dir.clone())
        .await
        .with_context(|| format!("failed to open state directory {}", state_dir.display()))?;

    let config = SchedulerConfig {
        concurrency: usize::from(args.concurrency),
        transfer: TransferConfig {
            retry_policy: RetryPolicy::with_max_attempts(u32::from(args.max_retries)),
            allow_overwrite: !args.no_overwrite,
            allow_resume: !args.no_partial,
            ..TransferConfig::default()
        },
    };
    let scheduler = Scheduler::new(config, Arc::new(store), client)?;

    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let mut view = progress_manager::ProgressView::new(use_bar, args.quiet);

    let mut run = scheduler.run(requests);
    let cancel = run.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, pausing active transfers");
            cancel.cancel();
        }
    });

    while let Some(event) = run.next_event().await {
        view.handle(&event);
    }
    let summary = run.wait().await?;

    for input in &rejected {
        eprintln!("  {}: {}", input.input, input.reason);
    }
    view.finish(&summary, rejected.len());

    Ok(exit_handler::determine_exit_outcome(&summary, rejected.len()))
}
