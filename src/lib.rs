//! capline - capture event processing and timeline data for a sampling and
//! instrumentation profiler.
//!
//! A capture arrives as a stream of framed [`events::CaptureEvent`]s. The
//! [`capture::CaptureEventProcessor`] resolves interned strings and
//! callstacks, pairs manual-instrumentation scopes, joins GPU jobs with their
//! Vulkan submissions and hands the results to a [`listener::CaptureListener`].
//! Timers can also be kept in a [`track::Timeline`] whose block-chained
//! [`timer_store::TimerStore`]s and [`scope_tree::ScopeTree`]s answer
//! pixel-bounded render queries.
//!
//! # Example
//!
//! ```no_run
//! use capline::{replay_file, Config};
//! use std::path::Path;
//!
//! let replay = replay_file(Path::new("game.capline"), &Config::default())?;
//! println!("{} timers", replay.summary().timers);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod gpu;
pub mod intern;
pub mod listener;
pub mod perfetto;
pub mod pixel;
pub mod replay;
pub mod scope_tree;
pub mod symbolize;
pub mod timer;
pub mod timer_store;
pub mod track;
pub mod wire;

pub use capture::CaptureEventProcessor;
pub use config::Config;
pub use error::{CaptureError, WireError};
pub use listener::{CaptureListener, RecordingListener, SummaryListener};
pub use replay::{replay, replay_file, Replay, ReplaySummary};
pub use track::{Timeline, TrackKey};
