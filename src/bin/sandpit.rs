//! Sandpit CLI - run scripts locally or serve the NDJSON protocol
//!
//! `sandpit run` executes one file and prints its output; stdin lines answer
//! input requests, and while paused in the debugger they are read as
//! debugger commands (`c`, `s`, `q`). `sandpit serve` speaks the service
//! protocol over stdio or TCP.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandpit::runtime::{
    DebugCommand, ExecutionState, ExternalMessage, MessageKind, PackageIndex, RunOutcome, RunRequest,
    Session, SessionConfig, SessionHandle,
};
use sandpit::service::Service;
use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};

#[derive(Parser)]
#[command(name = "sandpit")]
#[command(about = "Sandboxed script runner with a streaming front-end protocol", long_about = None)]
struct Cli {
    /// JSON session config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of `<name>.scm` modules used to resolve missing imports
    #[arg(long, global = true)]
    packages: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script
    Run {
        /// Script to execute
        file: PathBuf,

        /// Run under the line debugger
        #[arg(long)]
        debug: bool,

        /// Breakpoint line (repeatable); implies --debug
        #[arg(long = "break", value_name = "LINE")]
        breakpoints: Vec<u32>,

        /// Print every message as a JSON line
        #[arg(long)]
        json: bool,

        /// Make a file readable by the script as NAME=PATH (repeatable)
        #[arg(long = "file", value_name = "NAME=PATH")]
        files: Vec<String>,
    },

    /// Serve the NDJSON protocol
    Serve {
        /// Listen on a TCP address instead of stdio
        #[arg(long)]
        listen: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    match cli.command {
        Commands::Run {
            file,
            debug,
            breakpoints,
            json,
            files,
        } => {
            let outcome = run_file(config, cli.packages, &file, debug, breakpoints, json, &files).await?;
            // The stdin forwarder may still be parked in a blocking read.
            let code = if matches!(outcome, RunOutcome::Completed(_)) { 0 } else { 1 };
            std::process::exit(code);
        }
        Commands::Serve { listen } => {
            let mut service = Service::new(config.clone());
            if let Some(root) = cli.packages {
                service = service.with_resolver(PackageIndex::new(root, config.recursion_limit));
            }
            match listen {
                Some(addr) => serve_tcp(service, &addr).await?,
                None => {
                    let reader = BufReader::new(tokio::io::stdin());
                    let writer = BufWriter::new(tokio::io::stdout());
                    service.handle(reader, writer).await?;
                }
            }
        }
    }

    Ok(())
}

async fn run_file(
    config: SessionConfig,
    packages: Option<PathBuf>,
    file: &Path,
    debug: bool,
    breakpoints: Vec<u32>,
    json: bool,
    files: &[String],
) -> Result<RunOutcome> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.default_filename.clone());

    let mut builder = Session::builder()
        .config(config.clone())
        .callback(move |message| print_message(&message, json));
    if let Some(root) = packages {
        builder = builder.resolver(PackageIndex::new(root, config.recursion_limit));
    }
    let session = builder.build()?;
    session.provide_files(read_files(files).await?);

    let handle = session.handle();
    tokio::spawn(forward_stdin(handle.clone()));
    let interrupter = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt requested");
            interrupter.interrupt();
        }
    });

    let mut request = RunRequest::new(source).filename(filename);
    if debug || !breakpoints.is_empty() {
        request = request.debug(breakpoints);
    }
    Ok(session.run(request).await?)
}

async fn read_files(specs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    for spec in specs {
        let (name, path) = spec
            .split_once('=')
            .with_context(|| format!("expected NAME=PATH, got '{spec}'"))?;
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {path}"))?;
        files.insert(name.to_string(), text);
    }
    Ok(files)
}

async fn forward_stdin(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if handle.state() == ExecutionState::DebugPaused {
            match parse_debug_command(&line) {
                Some(command) => handle.debug(command),
                None => eprintln!("debugger commands: c(ontinue), s(tep), q(uit)"),
            }
        } else {
            handle.provide_input(line);
        }
    }
}

fn parse_debug_command(line: &str) -> Option<DebugCommand> {
    match line.trim() {
        "c" | "continue" => Some(DebugCommand::Continue),
        "s" | "step" | "" => Some(DebugCommand::Step),
        "q" | "quit" => Some(DebugCommand::Quit),
        _ => None,
    }
}

fn print_message(message: &ExternalMessage, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(message) {
            println!("{line}");
        }
        return;
    }
    let text = message.data.as_text().unwrap_or_default();
    match message.kind {
        MessageKind::Output if message.content_type.starts_with("text/") => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        MessageKind::Output => println!("[{} output]", message.content_type),
        MessageKind::Input if !text.is_empty() => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        MessageKind::Debug => {
            if let Some(line) = message.data.as_number() {
                eprintln!("paused at line {line} (c/s/q)");
            }
        }
        MessageKind::Error => eprintln!("{}", render_error(text)),
        MessageKind::Interrupt => eprintln!("{text}"),
        MessageKind::Loading => tracing::info!(status = text, "loading modules"),
        MessageKind::Start
        | MessageKind::End
        | MessageKind::Sleep
        | MessageKind::Input => {}
    }
}

/// Explained runtime errors arrive as JSON; show their traceback and summary.
fn render_error(data: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(value) if value.is_object() => {
            let traceback = value.get("traceback").and_then(|v| v.as_str()).unwrap_or_default();
            let what = value.get("what").and_then(|v| v.as_str()).unwrap_or_default();
            format!("{traceback}\n{what}")
        }
        _ => data.to_string(),
    }
}

async fn serve_tcp(service: Service, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let (read, write) = stream.into_split();
        if let Err(err) = service
            .handle(BufReader::new(read), BufWriter::new(write))
            .await
        {
            tracing::warn!(%peer, error = %err, "connection error");
        }
    }
}
