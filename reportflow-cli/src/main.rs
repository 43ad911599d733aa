//! `reportflow` command-line entry point.
//!
//! Exit status of `run`: 0 succeeded, 1 failed, 2 partially failed,
//! 130 cancelled, 3 when the run could not start.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use reportflow::cancellation::CancellationToken;
use reportflow::collaborators::standard_pipeline;
use reportflow::config::WorkflowConfig;
use reportflow::core::{RunId, FINAL_DOCUMENT};
use reportflow::events::LoggingEventSink;
use reportflow::pipeline::{Orchestrator, Pipeline, RunInputs};
use reportflow::report::{ExecutionReport, RunJournal};
use reportflow::store::{ArtifactStore, FsArtifactStore};
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::{collect_documents, Cli, Command, LogFormat, RunArgs};

const FINAL_REPORT_FILE: &str = "Final_Medical_Report.pdf";
const EXIT_NOT_STARTED: u8 = 3;

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let outcome = match cli.command {
        Command::Run(args) => run(args).await,
        Command::Report {
            run_id,
            workdir,
            text,
        } => show_report(&workdir.resolve(), &run_id, text).await,
        Command::Purge { run_id, workdir } => purge(&workdir.resolve(), &run_id).await,
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_NOT_STARTED)
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = args.workflow_config()?;
    let pipeline = standard_pipeline(&config).context("Failed to build pipeline")?;

    let cancel = Arc::new(CancellationToken::new());
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel("interrupted by Ctrl-C");
        }
    });

    let code = execute_run(&args, &config, &pipeline, cancel).await?;
    Ok(ExitCode::from(code))
}

/// Runs (or resumes) the workflow and returns the process exit status.
///
/// Errors are returned only when the run could not start. Once a report
/// exists its status decides the exit code; a failed export of the final
/// document is logged and does not change it.
async fn execute_run(
    args: &RunArgs,
    config: &WorkflowConfig,
    pipeline: &Pipeline,
    cancel: Arc<CancellationToken>,
) -> Result<u8> {
    let store = Arc::new(FsArtifactStore::new(&config.workdir));
    let orchestrator = Orchestrator::from_config(store.clone(), config)
        .with_event_sink(Arc::new(LoggingEventSink::info()))
        .with_cancellation(cancel)
        .with_journal(&config.workdir);

    let run_id = match &args.run_id {
        Some(id) => RunId::parse(id.clone())?,
        None => RunId::generate(),
    };

    let report = match &args.resume_from {
        Some(prior) => {
            let prior = RunId::parse(prior.clone())?;
            info!(run_id = %run_id, prior = %prior, "Resuming workflow");
            orchestrator.resume(pipeline, &prior, run_id).await?
        }
        None => {
            let bundle = collect_documents(&args.inputs)?;
            info!(run_id = %run_id, documents = bundle.len(), workdir = %config.workdir.display(), "Starting workflow");
            let inputs = RunInputs::from_bundle(&bundle)?;
            orchestrator.execute(pipeline, run_id, inputs).await?
        }
    };

    if let Err(e) = write_report(&report, args.report_out.as_deref()) {
        warn!(error = %format!("{e:#}"), "Execution report not written");
    }

    if report.final_artifact.is_some() {
        let target = args
            .final_output
            .clone()
            .unwrap_or_else(|| store.run_dir(&report.run_id).join(FINAL_REPORT_FILE));
        match export_final(store.as_ref(), &report.run_id, &target).await {
            Ok(()) => info!(path = %target.display(), "Final report written"),
            Err(e) => warn!(path = %target.display(), error = %format!("{e:#}"), "Final report not exported"),
        }
    }

    eprintln!("{}", report.render_text());
    Ok(exit_code(&report))
}

fn write_report(report: &ExecutionReport, out: Option<&Path>) -> Result<()> {
    let json = report.to_json()?;
    match out {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

async fn export_final(store: &dyn ArtifactStore, run_id: &RunId, target: &Path) -> Result<()> {
    let document = store.get(run_id, FINAL_DOCUMENT).await?;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, document)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))
}

fn exit_code(report: &ExecutionReport) -> u8 {
    u8::try_from(report.status.exit_code()).unwrap_or(1)
}

async fn show_report(workdir: &Path, run_id: &str, text: bool) -> Result<ExitCode> {
    let run_id = RunId::parse(run_id)?;
    let report = RunJournal::read_report(workdir, &run_id).await?;
    if text {
        println!("{}", report.render_text());
    } else {
        println!("{}", report.to_json()?);
    }
    Ok(ExitCode::SUCCESS)
}

async fn purge(workdir: &Path, run_id: &str) -> Result<ExitCode> {
    let run_id = RunId::parse(run_id)?;
    FsArtifactStore::new(workdir).purge(&run_id).await?;
    info!(run_id = %run_id, "Run purged");
    Ok(ExitCode::SUCCESS)
}
