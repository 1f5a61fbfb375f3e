//! livetiming - command line front end
//!
//! Imports archived sessions, replays captures and follows the live feed,
//! printing topic state as JSON.

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use livetiming_rs::{
    backend::{BackendMessage, ControlHandle, TimingBackend},
    config::{format_file_size, AppConfig},
    processor::RegistryView,
    session::{
        importer::ReqwestTransport, list_captures, live::capture_paths_for, CapturePaths,
        CaptureWriter, DataImporter, LiveClient, LiveSource, ReplaySource, SessionSource,
    },
    types::Topic,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "livetiming.log";

#[derive(Parser, Debug)]
#[command(
    name = "livetiming",
    version,
    about = "Live-timing capture, replay and state merge",
    arg_required_else_help = true
)]
struct Cli {
    /// Config file (default: platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Captures directory, overriding the config
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a season's meetings and sessions from the archive index
    Meetings {
        year: i32,
    },
    /// Download a completed session into a new capture
    Import {
        year: i32,
        /// Meeting key from `meetings`
        meeting: i64,
        /// Session key from `meetings`
        session: i64,
    },
    /// List captures in the data directory
    List,
    /// Replay a capture
    Replay(ReplayArgs),
    /// Follow the live feed, capturing it to disk
    Live(LiveArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Topic to print (repeatable)
    #[arg(long = "topic", value_name = "TOPIC")]
    topics: Vec<Topic>,

    /// Seconds between state prints
    #[arg(long, default_value_t = 5)]
    print_every: u64,
}

impl OutputArgs {
    fn topics(&self) -> Vec<Topic> {
        if self.topics.is_empty() {
            vec![Topic::LapCount, Topic::TrackStatus, Topic::WeatherData]
        } else {
            self.topics.clone()
        }
    }
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Capture directory name (under the data directory) or path
    capture: String,

    /// Scrub straight to the first N records, print, and exit
    #[arg(long, value_name = "N")]
    cursor: Option<usize>,

    /// Keep tailing the delta log as it grows
    #[arg(long)]
    follow: bool,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct LiveArgs {
    /// Seconds to trail the feed by
    #[arg(long, value_name = "SECS")]
    delay: Option<u64>,

    /// Do not write a capture
    #[arg(long)]
    no_capture: bool,

    #[command(flatten)]
    output: OutputArgs,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_or_default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_directory = Some(dir);
    }

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = init_logging(&config);

    match cli.command {
        Commands::Meetings { year } => cmd_meetings(&config, year),
        Commands::Import {
            year,
            meeting,
            session,
        } => cmd_import(&config, year, meeting, session),
        Commands::List => cmd_list(&config),
        Commands::Replay(args) => cmd_replay(&config, args),
        Commands::Live(args) => cmd_live(config, args),
    }
}

fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,livetiming_rs=debug"));

    let (file_layer, guard) = match &config.log_directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn importer(config: &AppConfig) -> anyhow::Result<DataImporter<ReqwestTransport>> {
    let transport = ReqwestTransport::new(config.feed.request_timeout())?;
    Ok(DataImporter::new(
        transport,
        &config.feed.static_base_url,
        config.data_dir()?,
    )?)
}

fn cmd_meetings(config: &AppConfig, year: i32) -> anyhow::Result<()> {
    let importer = importer(config)?;
    let index = runtime()?.block_on(importer.meetings(year))?;

    for meeting in &index.meetings {
        println!("{:>6}  {} ({})", meeting.key, meeting.name, meeting.location);
        for session in &meeting.sessions {
            let state = if session.is_importable() { "" } else { "  [not archived]" };
            println!(
                "        {:>6}  {:<12} {}{}",
                session.key, session.session_type, session.name, state
            );
        }
    }
    Ok(())
}

fn cmd_import(config: &AppConfig, year: i32, meeting: i64, session: i64) -> anyhow::Result<()> {
    let importer = importer(config)?;
    let paths = runtime()?.block_on(importer.import_session(year, meeting, session))?;
    println!("Captured session to {}", paths.dir.display());
    Ok(())
}

fn cmd_list(config: &AppConfig) -> anyhow::Result<()> {
    let data_dir = config.data_dir()?;
    let captures = list_captures(&data_dir)?;
    if captures.is_empty() {
        println!("No captures in {}", data_dir.display());
    }
    for capture in captures {
        let note = if capture.paths.is_complete() { "" } else { "  [no snapshot]" };
        println!("{:<40} {:>12}{}", capture.name, format_file_size(capture.size), note);
    }
    Ok(())
}

fn cmd_replay(config: &AppConfig, args: ReplayArgs) -> anyhow::Result<()> {
    let direct = PathBuf::from(&args.capture);
    let dir = if direct.is_dir() {
        direct
    } else {
        config.data_dir()?.join(&args.capture)
    };
    let source = ReplaySource::open(CapturePaths::in_dir(dir), config.playback.replay_chunk_size)?
        .with_follow(args.follow);

    let topics = args.output.topics();
    let (backend, control) = TimingBackend::new(config, Box::new(source));
    let worker = backend.spawn()?;

    match args.cursor {
        Some(cursor) => {
            control.seek_cursor(cursor);
            wait_for_cursor(&control, cursor);
            print_topics(control.view(), &topics)?;
        }
        None => watch(&control, &topics, Duration::from_secs(args.output.print_every))?,
    }

    control.shutdown();
    worker
        .join()
        .map_err(|_| anyhow!("Dispatch thread panicked"))?;
    Ok(())
}

fn cmd_live(mut config: AppConfig, args: LiveArgs) -> anyhow::Result<()> {
    if let Some(delay) = args.delay {
        config.playback.delay_ms = delay.saturating_mul(1000);
    }
    let runtime = runtime()?;
    let client = LiveClient::new(
        &config.feed.live_base_url,
        Topic::ALL.to_vec(),
        config.feed.request_timeout(),
    )?;

    let (snapshot_tx, snapshot_rx) = crossbeam_channel::unbounded();
    let (point_tx, point_rx) = crossbeam_channel::unbounded();
    let cancel = CancellationToken::new();
    let feed = runtime.spawn(client.run(snapshot_tx, point_tx, cancel.clone()));

    let interrupt = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, closing live feed");
            interrupt.cancel();
        }
    });

    let snapshot = match snapshot_rx.recv_timeout(config.feed.request_timeout()) {
        Ok(snapshot) => snapshot,
        Err(_) => {
            cancel.cancel();
            runtime.block_on(feed)??;
            bail!("Live feed closed before sending a snapshot");
        }
    };

    let mut source = LiveSource::new(point_rx, snapshot.clone());
    if !args.no_capture {
        match capture_paths_for(&config.data_dir()?, &snapshot) {
            Some(paths) => match CaptureWriter::create(paths, &snapshot) {
                Ok(writer) => {
                    tracing::info!(dir = %writer.paths().dir.display(), "Capturing live session");
                    source = source.with_capture(writer);
                }
                Err(e) => tracing::warn!(error = %e, "Not capturing this session"),
            },
            None => tracing::warn!("Snapshot has no session info, not capturing"),
        }
    }

    let source: Box<dyn SessionSource> = Box::new(source);
    let (backend, control) = TimingBackend::new(&config, source);
    let worker = backend.spawn()?;

    watch(&control, &args.output.topics(), Duration::from_secs(args.output.print_every))?;

    control.shutdown();
    cancel.cancel();
    worker
        .join()
        .map_err(|_| anyhow!("Dispatch thread panicked"))?;
    if let Err(e) = runtime.block_on(feed)? {
        tracing::warn!(error = %e, "Live feed ended with an error");
    }
    Ok(())
}

/// Block until the worker has delivered `cursor` records or run out of data
fn wait_for_cursor(control: &ControlHandle, cursor: usize) {
    while let Some(msg) = control.recv_timeout(Duration::from_secs(30)) {
        match msg {
            BackendMessage::Progress { delivered, .. } if delivered >= cursor => return,
            BackendMessage::SourceFinished | BackendMessage::Shutdown => return,
            BackendMessage::Error(e) => tracing::warn!("{}", e),
            _ => {}
        }
    }
}

/// Print state periodically until the source is exhausted
fn watch(control: &ControlHandle, topics: &[Topic], every: Duration) -> anyhow::Result<()> {
    let mut last_print = Instant::now();
    loop {
        match control.recv_timeout(every.min(Duration::from_millis(500))) {
            Some(BackendMessage::SourceFinished) => break,
            Some(BackendMessage::Shutdown) => return Ok(()),
            Some(BackendMessage::CatchUp { backlog }) => {
                tracing::debug!(backlog, "Playback caught up");
            }
            Some(BackendMessage::Error(e)) => tracing::warn!("{}", e),
            _ => {}
        }
        if last_print.elapsed() >= every {
            print_topics(control.view(), topics)?;
            last_print = Instant::now();
        }
    }
    print_topics(control.view(), topics)
}

fn print_topics(view: &RegistryView, topics: &[Topic]) -> anyhow::Result<()> {
    for topic in topics {
        println!("{}: {}", topic, serde_json::to_string_pretty(&view.to_json(*topic))?);
    }
    Ok(())
}
