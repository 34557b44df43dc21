//! Task-mining recorder CLI
//!
//! Records UI interaction events into the event store and exports sessions
//! as process-mining event logs.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use taskmining_recorder::{
    collector::{CaptureHandler, CaptureMessage, Gate, PauseFileGate},
    config::Config,
    core::{ExportError, SessionExporter, SourceSpec, TimeWindow, WindowedCollector},
    publisher::{BufferedPublisher, StopOutcome},
    store::{EventStore, HttpStore, StoreConfig},
    VERSION,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskmining")]
#[command(version = VERSION)]
#[command(about = "Desktop interaction recorder and event-log exporter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record capture events (JSON lines on stdin) into the event store
    Record {
        /// Allowed applications, separated by `;` (e.g. EXCEL.EXE;chrome.exe)
        #[arg(long)]
        allow: Option<String>,

        /// Event store host
        #[arg(long)]
        host: Option<String>,

        /// Event store port
        #[arg(long)]
        port: Option<u16>,

        /// Bucket id (default: aw-watcher-uia_<host>)
        #[arg(long)]
        bucket: Option<String>,

        /// Capture is paused while this file exists
        #[arg(long)]
        pause_file: Option<PathBuf>,

        /// Export the recorded session when recording stops
        #[arg(long)]
        export_on_stop: bool,
    },

    /// Export a session's events as an event-log CSV
    Export {
        /// Session start (RFC 3339, or local `YYYY-MM-DD HH:MM[:SS]`)
        #[arg(long)]
        start: String,

        /// Session end (defaults to now)
        #[arg(long)]
        end: Option<String>,

        /// Output directory for the event log
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Pause capture (creates the pause file)
    Pause,

    /// Resume capture (removes the pause file)
    Resume,

    /// Show store connectivity, buckets and pause state
    Status,

    /// Show configuration
    Config,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Record {
            allow,
            host,
            port,
            bucket,
            pause_file,
            export_on_stop,
        } => load_config().and_then(|mut config| {
            if let Some(allow) = allow {
                config.allowlist = allow.split(';').map(str::to_string).collect();
            }
            if let Some(host) = host {
                config.store.host = host;
            }
            if let Some(port) = port {
                config.store.port = port;
            }
            if bucket.is_some() {
                config.bucket_id = bucket;
            }
            if let Some(pause_file) = pause_file {
                config.pause_file = pause_file;
            }
            cmd_record(&config, export_on_stop)
        }),
        Commands::Export { start, end, output } => {
            load_config().and_then(|config| cmd_export(&config, &start, end.as_deref(), output))
        }
        Commands::Pause => load_config().and_then(|config| cmd_pause(&config)),
        Commands::Resume => load_config().and_then(|config| cmd_resume(&config)),
        Commands::Status => load_config().and_then(|config| cmd_status(&config)),
        Commands::Config => load_config().and_then(|config| cmd_config(&config)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Result<Config> {
    Config::load().with_context(|| format!("could not load {:?}", Config::config_path()))
}

fn open_store(config: &Config) -> Result<HttpStore> {
    HttpStore::new(StoreConfig::new(config.store.host.clone(), config.store.port))
        .context("could not create store client")
}

fn cmd_record(config: &Config, export_on_stop: bool) -> Result<()> {
    println!("Task-mining recorder v{VERSION}");
    println!();

    if let Err(e) = config.ensure_directories() {
        warn!(error = %e, "could not create output directory");
    }

    let mut publisher = BufferedPublisher::new(open_store(config)?, config.publisher_config());
    publisher.start().with_context(|| {
        format!(
            "could not reach the event store at {}:{} (is the server running?)",
            config.store.host, config.store.port
        )
    })?;
    let session_start = Utc::now();

    let allowlist = config.allowlist();
    let gate = Arc::new(PauseFileGate::new(config.pause_file.clone()));
    let capture = CaptureHandler::new(gate, allowlist.clone(), publisher.handle());

    println!("Recording into bucket: {}", publisher.config().bucket_id);
    if allowlist.is_empty() {
        println!("  Allowlist: all applications");
    } else {
        println!("  Allowlist: {}", allowlist.apps().join(";"));
    }
    println!(
        "  Pause file: {:?} (create it to pause capture)",
        config.pause_file
    );
    println!();
    println!("Reading capture events from stdin. Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    // Stdin is read on its own thread so Ctrl+C is noticed while idle.
    let (line_tx, line_rx) = crossbeam_channel::bounded::<String>(1024);
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    while running.load(Ordering::SeqCst) {
        match line_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CaptureMessage>(&line) {
                    Ok(message) => {
                        capture.dispatch(message);
                    }
                    Err(e) => warn!(error = %e, "ignoring malformed capture line"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                info!("capture input closed");
                break;
            }
        }
    }

    println!();
    println!("Stopping recorder...");
    if publisher.stop() == StopOutcome::TimedOut {
        eprintln!("Warning: publisher did not finish its final flush in time; some events may be lost");
    }
    println!();
    println!("{}", publisher.stats().summary());

    if export_on_stop {
        println!();
        let session = TimeWindow::new(session_start, Utc::now())?;
        run_export(config, &session, None)?;
    }

    Ok(())
}

/// Parse a CLI timestamp. Naive values are local time.
fn parse_cli_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return match Local.from_local_datetime(&naive).earliest() {
                Some(local) => Ok(local.with_timezone(&Utc)),
                None => bail!("{raw} does not exist in the local time zone"),
            };
        }
    }
    bail!("could not parse time {raw:?}")
}

fn cmd_export(config: &Config, start: &str, end: Option<&str>, output: Option<PathBuf>) -> Result<()> {
    let start = parse_cli_time(start)?;
    let end = match end {
        Some(end) => parse_cli_time(end)?,
        None => Utc::now(),
    };
    let session = TimeWindow::new(start, end)?;
    run_export(config, &session, output)
}

fn run_export(config: &Config, session: &TimeWindow, output: Option<PathBuf>) -> Result<()> {
    let mut export_config = config.export_config()?;
    if let Some(output) = output {
        export_config.output_dir = output;
    }

    let collector = WindowedCollector::with_default_sources(open_store(config)?);
    let exporter = SessionExporter::new(collector, export_config);

    println!("Exporting session {session}");
    match exporter.export(session) {
        Ok(outcome) => {
            for attempt in &outcome.attempts {
                println!("  {attempt}");
            }
            println!("Exported {} events to {:?}", outcome.rows, outcome.path);
            Ok(())
        }
        Err(ExportError::Exhausted { attempts }) => {
            for attempt in &attempts {
                println!("  {attempt}");
            }
            bail!(
                "no events in the {} windows tried; interact for a few seconds (Alt+Tab, typing) and try again",
                attempts.len()
            )
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_pause(config: &Config) -> Result<()> {
    PauseFileGate::new(config.pause_file.clone())
        .pause()
        .with_context(|| format!("could not create {:?}", config.pause_file))?;
    println!("Capture paused. Use 'taskmining resume' to continue.");
    Ok(())
}

fn cmd_resume(config: &Config) -> Result<()> {
    PauseFileGate::new(config.pause_file.clone())
        .resume()
        .with_context(|| format!("could not remove {:?}", config.pause_file))?;
    println!("Capture resumed.");
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Task-mining Recorder Status");
    println!("===========================");
    println!();

    let gate = PauseFileGate::new(config.pause_file.clone());
    println!(
        "Capture: {}",
        if gate.is_open() { "active" } else { "paused" }
    );
    println!("Bucket: {}", config.bucket_id());
    println!(
        "Event store: {}:{}",
        config.store.host, config.store.port
    );

    let store = open_store(config)?;
    match store.connect().and_then(|_| store.list_buckets()) {
        Ok(buckets) => {
            println!("  Connection: OK");
            println!();
            for source in SourceSpec::defaults() {
                let ids: Vec<&String> = buckets
                    .keys()
                    .filter(|id| id.contains(source.fragment.as_str()))
                    .collect();
                println!("  {} buckets: {}", source.label, ids.len());
                for id in ids {
                    println!("    - {id}");
                }
            }
        }
        Err(e) => println!("  Connection: FAILED ({e})"),
    }

    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("could not install Ctrl+C handler")
}
