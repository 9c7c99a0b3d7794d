//! inline-worker - run a JavaScript function as a worker
//!
//! Reads a main procedure from a file, delivers it to a Boa-backed worker
//! through the configured strategy chain and exchanges messages with it.

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use inline_worker::cli::{WorkerRepl, parse_input};
use inline_worker::factory::FactoryConfig;
use inline_worker::runtime::{BoaWorker, ContentSecurityPolicy, RuntimeConfig};
use inline_worker::{
    ErrorEvent, MessageEvent, StrategyKind, WorkerError, WorkerFactory, WorkerHandle, WorkerMain,
    WorkerOptions, compose,
};

#[derive(Parser)]
#[command(name = "inline-worker")]
#[command(author, version, about = "Run inline JavaScript functions as workers")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a worker, post messages to it and print its replies
    Run {
        #[command(flatten)]
        worker: WorkerArgs,

        /// Message to post after the worker starts (JSON, repeatable)
        #[arg(short, long = "message")]
        messages: Vec<String>,

        /// Stop after this many milliseconds without worker activity
        #[arg(long, default_value = "500")]
        wait_ms: u64,
    },
    /// Start a worker and talk to it interactively
    Repl {
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Print the bootstrap script for a main procedure
    Compose {
        /// File holding the main procedure
        file: PathBuf,
    },
}

#[derive(Args)]
struct WorkerArgs {
    /// File holding the main procedure (.ts files are transpiled first)
    file: PathBuf,

    /// Content-Security-Policy applied to worker script loads
    #[arg(long)]
    csp: Option<String>,

    /// Delivery strategies in attempt order (data, blob, file)
    #[arg(short, long, value_delimiter = ',')]
    strategy: Vec<StrategyKind>,

    /// Evaluate the bootstrap as an ES module
    #[arg(long)]
    module: bool,

    /// Name exposed to the worker as `self.name`
    #[arg(long)]
    name: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            worker,
            messages,
            wait_ms,
        } => run_worker(&worker, &messages, Duration::from_millis(wait_ms)),
        Commands::Repl { worker } => run_repl(&worker),
        Commands::Compose { file } => {
            let main = read_main(&file)?;
            println!("{}", compose(&main).text());
            Ok(())
        }
    }
}

/// Read a main procedure, transpiling TypeScript sources
fn read_main(path: &Path) -> Result<WorkerMain> {
    let source = std::fs::read_to_string(path).into_diagnostic()?;
    let is_typescript = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("ts" | "mts" | "cts")
    );

    let main = if is_typescript {
        WorkerMain::from_typescript(&source)
    } else {
        WorkerMain::parse(&source)
    };

    match main {
        Ok(main) => Ok(main),
        Err(e) => fail(&e),
    }
}

/// Create the worker described by `args`, exiting with a report on failure
fn spawn_worker(args: &WorkerArgs) -> Result<BoaWorker> {
    let main = read_main(&args.file)?;

    let mut runtime = RuntimeConfig::default();
    if let Some(policy) = &args.csp {
        runtime = runtime.with_csp(ContentSecurityPolicy::parse(policy).into_diagnostic()?);
    }

    let mut config = FactoryConfig::default();
    if !args.strategy.is_empty() {
        config.strategies = args.strategy.clone();
    }

    let factory = WorkerFactory::with_config(runtime, config);
    tracing::debug!(
        strategies = ?factory.strategy_names(),
        csp = factory.environment().config().csp.as_ref().map(|csp| csp.as_str()),
        "creating worker"
    );

    let mut options = if args.module {
        WorkerOptions::module()
    } else {
        WorkerOptions::default()
    };
    if let Some(name) = &args.name {
        options = options.with_name(name.clone());
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    match rt.block_on(factory.create_worker_from(&main, &options)) {
        Ok(worker) => Ok(worker),
        Err(e) => fail(&e),
    }
}

/// Print the full failure report and exit
fn fail(err: &WorkerError) -> ! {
    eprintln!("{}: {}", "Error".red(), err.report());
    std::process::exit(1);
}

enum Activity {
    Message(Value),
    Error(String),
}

fn run_worker(args: &WorkerArgs, messages: &[String], quiet: Duration) -> Result<()> {
    let worker = spawn_worker(args)?;
    let (tx, rx) = mpsc::channel();

    let message_tx = tx.clone();
    worker.set_on_message(Some(Box::new(move |event: MessageEvent| {
        let _ = message_tx.send(Activity::Message(event.data));
    })));
    worker.set_on_error(Some(Box::new(move |event: ErrorEvent| {
        let _ = tx.send(Activity::Error(event.message));
    })));

    for message in messages {
        worker.post_message(parse_input(message)).into_diagnostic()?;
    }

    let mut failed = false;
    while let Ok(activity) = rx.recv_timeout(quiet) {
        match activity {
            Activity::Message(data) => println!("{}", data),
            Activity::Error(message) => {
                eprintln!("{}: {}", "Error".red(), message);
                failed = true;
            }
        }
    }

    worker.terminate();

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_repl(args: &WorkerArgs) -> Result<()> {
    let worker = spawn_worker(args)?;
    let mut repl = WorkerRepl::new(worker);
    repl.run().into_diagnostic()?;
    Ok(())
}
