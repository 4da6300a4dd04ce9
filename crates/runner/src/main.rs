mod arbiter;
mod catalog;
mod config;
mod coordinator;
mod error;
mod relay;
mod sink;
mod stage;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use sandbox::{CompletionOutcome, ResourceBudget};
use sandbox_docker::LimitStrategy;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::time::FormatTime;

use crate::catalog::Catalog;
use crate::config::RunnerConfig;
use crate::coordinator::{RunCoordinator, RunRequest};
use crate::error::{RunnerError, RunnerResult};
use crate::sink::StdioSink;
use crate::stage::SourceFile;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "runner", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run staged files as a sandboxed catalog task
    Run(Box<RunArgs>),
    /// List the languages, processors, and tasks of the catalog
    List(CatalogArgs),
    /// Write the built-in catalog to a file as a starting point
    Init { path: PathBuf },
}

#[derive(Args)]
struct RunArgs {
    /// Source files to stage into the sandbox workspace
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long, default_value = "test-shell")]
    language: String,

    #[arg(long, default_value = "alpine-sh-latest")]
    processor: String,

    #[arg(long, default_value = "run")]
    task: String,

    #[command(flatten)]
    catalog: CatalogArgs,

    /// Wall-clock timeout in seconds (0 takes the server cap)
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,

    /// Docker daemon socket
    #[arg(long, default_value = sandbox_docker::DEFAULT_SOCKET)]
    socket: PathBuf,

    /// Use cgroup controllers instead of classic rlimits
    #[arg(long)]
    cgroup_limits: bool,
}

#[derive(Args)]
struct CatalogArgs {
    /// Catalog file; the built-in catalog is used when omitted
    #[arg(long)]
    catalog: Option<PathBuf>,
}

impl CatalogArgs {
    fn load(&self) -> RunnerResult<Catalog> {
        match &self.catalog {
            Some(path) => Ok(Catalog::from_path(path)?),
            None => Ok(Catalog::builtin()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run(*args).await,
        Command::List(args) => list(&args).map(|()| ExitCode::SUCCESS),
        Command::Init { path } => Catalog::builtin()
            .save(&path)
            .map(|()| ExitCode::SUCCESS)
            .map_err(RunnerError::from),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> RunnerResult<ExitCode> {
    let uid = nix::unistd::getuid();
    if uid.is_root() {
        return Err(RunnerError::Config(
            "refusing to stage and run untrusted code as root".into(),
        ));
    }

    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RunnerError::Config(format!("not a file path: {}", path.display())))?;
        files.push(SourceFile {
            path: name.to_owned(),
            content: tokio::fs::read(path).await?,
        });
    }

    let catalog = args.catalog.load()?;
    let config = RunnerConfig {
        socket_path: args.socket,
        strategy: if args.cgroup_limits {
            LimitStrategy::Cgroups
        } else {
            LimitStrategy::Rlimits
        },
        staging_root: std::env::temp_dir(),
        runner_uid: uid.as_raw(),
        runner_gid: nix::unistd::getgid().as_raw(),
        caps: RunnerConfig::default_caps(),
    };
    let backend = config.backend();
    let coordinator = RunCoordinator::new(backend, catalog, config);

    let request = RunRequest {
        language: args.language,
        processor: args.processor,
        task: args.task,
        files,
        budget: ResourceBudget {
            timeout_secs: args.timeout_secs,
            ..Default::default()
        },
    };

    // Ctrl-C cancels the in-flight run; teardown still happens.
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = coordinator.run(&request, StdioSink::new(), cancel).await?;
    info!(outcome = %outcome, "run finished");

    Ok(match outcome {
        CompletionOutcome::Exited(code) => u8::try_from(code)
            .map(ExitCode::from)
            .unwrap_or(ExitCode::FAILURE),
        _ => ExitCode::FAILURE,
    })
}

fn list(args: &CatalogArgs) -> RunnerResult<()> {
    let catalog = args.load()?;
    for language in &catalog.languages {
        println!("{} ({})", language.id, language.show_name);
        for processor in &language.processors {
            println!("  {} ({}) [{}]", processor.id, processor.show_name, processor.image);
            for task in &processor.tasks {
                println!("    {} ({})", task.id, task.show_name);
            }
        }
    }
    Ok(())
}
