mod http;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use evalrun_core::config::{AgentConfig, RunFile};
use evalrun_core::types::{RunInputConfig, RunSubmission};
use evalrun_core::{
	from_async_fn, submit, AgentExecutor, AgentOutput, AgentRequest, CancellationToken, RunConfig, RunScheduler,
	RunStatus,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::http::{HttpAgent, HttpJudge, HttpSandbox, JsonlEventSink};

const DEFAULT_AGENT_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Parser)]
#[command(name = "evalrun", about = "Run agent evaluations over a dataset")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	Run(RunArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML run file (dataset, agent, judge, run settings)
	#[arg(long)]
	config: PathBuf,

	/// Threads per test case
	#[arg(long)]
	k: Option<u32>,

	/// Test cases in flight
	#[arg(long)]
	concurrency: Option<usize>,

	/// Per-thread agent timeout in milliseconds
	#[arg(long)]
	timeout: Option<u64>,

	/// Write the final run outcome as JSON
	#[arg(long)]
	json_out: Option<PathBuf>,

	/// Write run events as JSON lines
	#[arg(long)]
	events_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await,
	}
}

async fn run(args: RunArgs) -> Result<ExitCode> {
	let mut file = RunFile::load(&args.config).await?;
	if args.k.is_some() {
		file.run.k = args.k;
	}
	if args.concurrency.is_some() {
		file.run.max_concurrency = args.concurrency;
	}
	if args.timeout.is_some() {
		file.run.timeout = args.timeout;
	}
	let json_out = args.json_out.or_else(|| file.json_out.clone());
	let events_out = args.events_out.or_else(|| file.events_out.clone());

	let base_dir = args.config.parent().unwrap_or_else(|| Path::new("."));
	let source = file.source(base_dir);

	let (agent, agent_id) = build_agent(&file.agent, &file.run)?;
	let scorer_timeout = file.run.scorer_timeout();
	let mut builder = RunScheduler::builder().agent(agent);
	if let Some(judge) = &file.judge {
		builder = builder.judge(Arc::new(HttpJudge::new(judge, scorer_timeout)?));
	}
	if let Some(sandbox) = &file.sandbox {
		builder = builder.sandbox(Arc::new(HttpSandbox::new(sandbox, scorer_timeout)?));
	}
	if let Some(path) = &events_out {
		builder = builder.sink(Arc::new(JsonlEventSink::create(path).await?));
	}
	let scheduler = builder.build()?;

	let mut run = submit(RunSubmission {
		dataset_id: file.dataset().id,
		target_agent_id: agent_id,
		name: file.dataset.name.clone(),
		config: RunInputConfig {
			k: file.run.k,
			max_concurrency: file.run.max_concurrency,
			max_steps: file.run.max_steps,
			timeout: file.run.timeout,
		},
	})?;
	run.config = file.run.clone();

	let cancel = CancellationToken::new();
	let on_interrupt = cancel.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("interrupt received, cancelling run");
			on_interrupt.cancel();
		}
	});

	tracing::info!(run_id = %run.id, dataset = %run.dataset_id, "starting run");
	let outcome = scheduler.execute_source(run, &source, cancel).await;
	println!("{}", outcome.summary_table());
	if let Some(error) = &outcome.error {
		eprintln!("run {}: {error}", outcome.run.status);
	}

	if let Some(path) = json_out {
		let json = serde_json::to_string_pretty(&outcome)?;
		tokio::fs::write(path, json).await?;
	}

	Ok(if outcome.run.status == RunStatus::Completed {
		ExitCode::SUCCESS
	} else {
		ExitCode::FAILURE
	})
}

fn build_agent(config: &AgentConfig, run: &RunConfig) -> Result<(Arc<dyn AgentExecutor>, Option<String>)> {
	Ok(match config {
		AgentConfig::Echo => (
			from_async_fn(|req: AgentRequest| async move { Ok(AgentOutput::text(req.input)) }),
			Some("echo".to_string()),
		),
		AgentConfig::Http { url, headers, id, timeout } => {
			let timeout = timeout
				.or(run.timeout)
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_AGENT_HTTP_TIMEOUT);
			(
				Arc::new(HttpAgent::new(url.clone(), headers.clone(), timeout)?),
				id.clone().or_else(|| Some(url.clone())),
			)
		}
	})
}
