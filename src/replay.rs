//! Offline replay of a framed capture file.
//!
//! Decodes every frame, feeds it to a [`CaptureEventProcessor`] with a
//! [`SummaryListener`] and keeps the result for summaries, queries and
//! export. The timers themselves live only in the processor's timeline.
//!
//! Scope trees are built once at the end of the replay unless the config
//! asks for a mode.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info};

use crate::api::ApiStats;
use crate::capture::CaptureEventProcessor;
use crate::config::Config;
use crate::gpu::GpuStats;
use crate::listener::SummaryListener;
use crate::perfetto::TraceNames;
use crate::track::{ScopeTreeMode, Timeline};
use crate::wire::CaptureEventReader;

#[derive(Clone, Debug, Serialize)]
pub struct TrackSummary {
    pub track: String,
    pub timers: u64,
    pub max_depth: u32,
    pub min_time_ns: u64,
    pub max_time_ns: u64,
    pub rejected_scopes: u64,
    pub dropped_timers: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplaySummary {
    pub frames: u64,
    pub events: BTreeMap<&'static str, u64>,
    pub unknown_events: u64,
    pub listener_calls: BTreeMap<&'static str, usize>,
    pub scope_tree_mode: Option<ScopeTreeMode>,
    pub timers: u64,
    pub tracks: Vec<TrackSummary>,
    pub value_tracks: BTreeMap<String, usize>,
    pub api: ApiStats,
    pub gpu: GpuStats,
    /// Why processing stopped early, if it did.
    pub aborted: Option<String>,
}

pub struct Replay {
    processor: CaptureEventProcessor<SummaryListener>,
    frames: u64,
}

impl Replay {
    pub fn processor(&self) -> &CaptureEventProcessor<SummaryListener> {
        &self.processor
    }

    pub fn listener(&self) -> &SummaryListener {
        self.processor.listener()
    }

    pub fn timeline(&self) -> Option<&Arc<Timeline>> {
        self.processor.timeline()
    }

    pub fn thread_names(&self) -> HashMap<u32, String> {
        self.listener().thread_names().clone()
    }

    pub fn trace_names(&self) -> TraceNames<'_> {
        TraceNames {
            thread_names: self.thread_names(),
            strings: Some(self.processor.intern_tables()),
        }
    }

    pub fn summary(&self) -> ReplaySummary {
        let (tracks, value_tracks) = match self.timeline() {
            Some(timeline) => (
                timeline
                    .tracks()
                    .iter()
                    .map(|track| {
                        let store = track.store();
                        TrackSummary {
                            track: track.key().to_string(),
                            timers: store.num_timers(),
                            max_depth: store.max_depth(),
                            min_time_ns: store.min_time_ns(),
                            max_time_ns: store.max_time_ns(),
                            rejected_scopes: track.rejected_scopes(),
                            dropped_timers: store.dropped_timers(),
                        }
                    })
                    .collect(),
                timeline
                    .value_tracks()
                    .into_iter()
                    .map(|(name, values)| (name, values.len()))
                    .collect(),
            ),
            None => (Vec::new(), BTreeMap::new()),
        };

        ReplaySummary {
            frames: self.frames,
            events: self.processor.event_counts().clone(),
            unknown_events: self.processor.unknown_events(),
            listener_calls: self.listener().counts().clone(),
            scope_tree_mode: self.timeline().map(|timeline| timeline.mode()),
            timers: self.listener().num_timers(),
            tracks,
            value_tracks,
            api: self.processor.api_stats().clone(),
            gpu: self.processor.gpu_stats().clone(),
            aborted: self.processor.abort_reason().map(ToString::to_string),
        }
    }
}

/// Replay every frame of `reader`.
///
/// Stops at the first fatal capture error; the summary reports it. Framing
/// and decode errors are returned.
pub fn replay<R: Read>(reader: R, config: &Config) -> Result<Replay> {
    let mut config = config.clone();
    config.scope_tree_mode.get_or_insert(ScopeTreeMode::Batched);
    let mut processor = CaptureEventProcessor::from_config(SummaryListener::new(), &config);
    let mut reader = CaptureEventReader::new(reader);

    while let Some(event) = reader
        .next_event()
        .with_context(|| format!("Failed to decode frame {}", reader.frames()))?
    {
        if let Err(e) = processor.process(&event) {
            error!("Stopping replay after frame {}: {}", reader.frames(), e);
            break;
        }
    }

    info!("Replayed {} frames", reader.frames());
    Ok(Replay {
        processor,
        frames: reader.frames(),
    })
}

pub fn replay_file(path: &Path, config: &Config) -> Result<Replay> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open capture file {}", path.display()))?;
    let mut config = config.clone();
    if config.file_path.is_none() {
        config.file_path = Some(path.to_path_buf());
    }
    replay(BufReader::new(file), &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::*;
    use crate::wire::CaptureEventWriter;
    use std::io::Cursor;

    fn encode(events: &[CaptureEvent]) -> Vec<u8> {
        let mut writer = CaptureEventWriter::new(Vec::new());
        for event in events {
            writer.write_event(event).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn test_replay_summary() {
        let data = encode(&[
            CaptureEvent::ThreadName(ThreadName {
                pid: 1,
                tid: 7,
                name: "main".to_string(),
                timestamp_ns: 0,
            }),
            CaptureEvent::FunctionCall(FunctionCall {
                pid: 1,
                tid: 7,
                function_id: 3,
                duration_ns: 10,
                end_timestamp_ns: 100,
                depth: 0,
                ..Default::default()
            }),
            CaptureEvent::Unknown,
            CaptureEvent::CaptureFinished(CaptureFinished::default()),
        ]);
        let replay = replay(Cursor::new(data), &Config::default()).unwrap();
        let summary = replay.summary();
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.unknown_events, 1);
        assert_eq!(summary.timers, 1);
        assert_eq!(summary.tracks.len(), 1);
        assert_eq!(summary.tracks[0].track, "functions:7");
        assert_eq!(summary.tracks[0].min_time_ns, 90);
        assert!(summary.aborted.is_none());
        assert_eq!(replay.thread_names()[&7], "main");
        assert_eq!(summary.listener_calls["thread_name"], 1);
    }

    #[test]
    fn test_replay_builds_scope_trees_at_end_by_default() {
        let scope = |tid, start_ns, end_ns| {
            [
                CaptureEvent::ApiScopeStart(ApiScopeStart {
                    pid: 1,
                    tid,
                    timestamp_ns: start_ns,
                    name: EncodedName::encode("Frame"),
                    ..Default::default()
                }),
                CaptureEvent::ApiScopeStop(ApiScopeStop {
                    pid: 1,
                    tid,
                    timestamp_ns: end_ns,
                }),
            ]
        };
        let mut events: Vec<CaptureEvent> = scope(4, 10, 20).into();
        events.push(CaptureEvent::CaptureFinished(CaptureFinished::default()));
        let data = encode(&events);

        let batched = replay(Cursor::new(data.clone()), &Config::default()).unwrap();
        assert_eq!(batched.summary().scope_tree_mode, Some(ScopeTreeMode::Batched));
        let track = batched
            .timeline()
            .unwrap()
            .track(&crate::TrackKey::Thread { tid: 4 })
            .unwrap();
        assert_eq!(track.with_scope_tree(|tree| tree.len()), Some(1));

        let config = Config {
            scope_tree_mode: Some(ScopeTreeMode::Streaming),
            ..Config::default()
        };
        let streaming = replay(Cursor::new(data), &config).unwrap();
        assert_eq!(streaming.summary().scope_tree_mode, Some(ScopeTreeMode::Streaming));
    }

    #[test]
    fn test_replay_stops_at_fatal_error() {
        let data = encode(&[
            CaptureEvent::CallstackSample(CallstackSample {
                pid: 1,
                tid: 2,
                callstack_id: 42,
                timestamp_ns: 5,
            }),
            CaptureEvent::ThreadName(ThreadName::default()),
        ]);
        let replay = replay(Cursor::new(data), &Config::default()).unwrap();
        let summary = replay.summary();
        assert_eq!(summary.frames, 1);
        assert!(summary.aborted.unwrap().contains("42"));
    }

    #[test]
    fn test_replay_without_own_tracks() {
        let data = encode(&[CaptureEvent::FunctionCall(FunctionCall {
            tid: 1,
            duration_ns: 1,
            end_timestamp_ns: 2,
            ..Default::default()
        })]);
        let config = Config {
            own_tracks: false,
            ..Config::default()
        };
        let replay = replay(Cursor::new(data), &config).unwrap();
        assert!(replay.timeline().is_none());
        assert!(replay.summary().tracks.is_empty());
        assert_eq!(replay.summary().timers, 1);
    }

    #[test]
    fn test_replay_file_reports_missing_file() {
        let err = replay_file(Path::new("/nonexistent/capture.bin"), &Config::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("Failed to open capture file"));
    }
}
