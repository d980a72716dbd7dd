//! capline: replay, query and export framed capture files.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use capline::perfetto::{timeline_to_trace, write_trace};
use capline::track::ScopeTreeMode;
use capline::{replay_file, Config, Replay, ReplaySummary, TrackKey};
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "capline")]
#[command(about = "Process captures into timelines")]
#[command(version)]
struct Cli {
    /// JSON config file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// When thread scope trees are built
    #[arg(long, value_enum, global = true)]
    scope_tree_mode: Option<ScopeTreeMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a capture and print a summary
    Replay {
        /// Framed capture file
        file: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay a capture and list the timers visible at one depth of a track
    Query {
        /// Framed capture file
        file: PathBuf,

        /// Track: scheduler, thread:<tid>, functions:<tid>, gpu:<timeline>[:<lane>] or async:<name>
        #[arg(short, long)]
        track: TrackKey,

        #[arg(short, long, default_value_t = 0)]
        depth: u8,

        /// Horizontal resolution of the query
        #[arg(short, long, default_value_t = 1000)]
        pixels: u64,

        /// Start of the visible range, defaults to the first timer of the track
        #[arg(long)]
        start: Option<u64>,

        /// End of the visible range, defaults to the last timer of the track
        #[arg(long)]
        end: Option<u64>,
    },
    /// Replay a capture and write its tracks as a Perfetto trace
    Export {
        /// Framed capture file
        file: PathBuf,

        /// Output trace
        #[arg(short, long, default_value = "trace.pb")]
        output: PathBuf,
    },
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.verbosity = config.verbosity.max(cli.verbose);
    if cli.scope_tree_mode.is_some() {
        config.scope_tree_mode = cli.scope_tree_mode;
    }
    Ok(config)
}

fn print_summary(summary: &ReplaySummary) {
    println!("frames:          {}", summary.frames);
    println!("timers:          {}", summary.timers);
    if summary.unknown_events > 0 {
        println!("unknown events:  {}", summary.unknown_events);
    }

    println!("\nevents:");
    for (kind, count) in &summary.events {
        println!("  {:<60} {:>10}", kind, count);
    }

    if !summary.tracks.is_empty() {
        println!("\ntracks:");
        println!(
            "  {:<40} {:>10} {:>6} {:>20} {:>20}",
            "track", "timers", "depth", "min_ns", "max_ns"
        );
        for track in &summary.tracks {
            println!(
                "  {:<40} {:>10} {:>6} {:>20} {:>20}",
                track.track, track.timers, track.max_depth, track.min_time_ns, track.max_time_ns
            );
        }
    }
    if !summary.value_tracks.is_empty() {
        println!("\nvalue tracks:");
        for (name, samples) in &summary.value_tracks {
            println!("  {:<40} {:>10}", name, samples);
        }
    }

    let api = &summary.api;
    println!(
        "\napi: {} scopes, {} async scopes, {} unmatched stops, {} unmatched async stops",
        api.sync_scopes, api.async_scopes, api.unmatched_sync_stops, api.unmatched_async_stops
    );
    let gpu = &summary.gpu;
    println!(
        "gpu: {} jobs, {} submissions, {} joins, {} dropped before capture, {} pending discarded",
        gpu.jobs,
        gpu.submissions,
        gpu.joins,
        gpu.dropped_before_capture,
        gpu.discarded_pending_jobs + gpu.discarded_pending_submissions
    );
}

fn check_aborted(replay: &Replay) -> Result<()> {
    if let Some(reason) = replay.processor().abort_reason() {
        bail!("Capture processing aborted: {}", reason);
    }
    Ok(())
}

fn run_replay(file: &Path, json: bool, config: &Config) -> Result<()> {
    let replay = replay_file(file, config)?;
    let summary = replay.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    check_aborted(&replay)
}

fn run_query(
    file: &Path,
    track_key: &TrackKey,
    depth: u8,
    pixels: u64,
    range: (Option<u64>, Option<u64>),
    config: &Config,
) -> Result<()> {
    if !config.own_tracks {
        bail!("Queries need own_tracks enabled in the config");
    }
    let replay = replay_file(file, config)?;
    check_aborted(&replay)?;
    let Some(track) = replay.timeline().and_then(|timeline| timeline.track(track_key)) else {
        bail!("No track {} in {}", track_key, file.display());
    };

    let start_ns = range.0.unwrap_or_else(|| track.store().min_time_ns());
    let end_ns = range.1.unwrap_or_else(|| track.store().max_time_ns());
    if start_ns > end_ns {
        bail!("Empty range [{}, {}]", start_ns, end_ns);
    }

    let timers = track.get_timers_at_depth_discretised(depth, pixels, start_ns, end_ns);
    for timer in &timers {
        println!(
            "{:>20} {:>20} {:>8} {:?}{}",
            timer.start_ns,
            timer.end_ns,
            timer.tid,
            timer.timer_type,
            timer
                .api_scope_name
                .as_deref()
                .map(|name| format!(" {}", name))
                .unwrap_or_default()
        );
    }
    eprintln!(
        "\n{} timers at depth {} of {} in [{}, {}] over {} pixels",
        timers.len(),
        depth,
        track_key,
        start_ns,
        end_ns,
        pixels
    );
    Ok(())
}

fn run_export(file: &Path, output: &Path, config: &Config) -> Result<()> {
    if !config.own_tracks {
        bail!("Export needs own_tracks enabled in the config");
    }
    let replay = replay_file(file, config)?;
    check_aborted(&replay)?;
    let timeline = replay
        .timeline()
        .context("Replay did not build a timeline")?;
    let names = replay.trace_names();
    let trace = timeline_to_trace(timeline, &names);
    write_trace(&trace, output)?;
    eprintln!(
        "Wrote {} trace packets to {}",
        trace.packet.len(),
        output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(config.verbosity);

    match &cli.command {
        Commands::Replay { file, json } => run_replay(file, *json, &config),
        Commands::Query {
            file,
            track,
            depth,
            pixels,
            start,
            end,
        } => run_query(file, track, *depth, *pixels, (*start, *end), &config),
        Commands::Export { file, output } => run_export(file, output, &config),
    }
}
