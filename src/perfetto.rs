//! Perfetto export of the tracks owned by a [`Timeline`].
//!
//! Every track gets a descriptor, and each of its depths gets a child track
//! carrying begin/end slices. The scope and function tracks of a thread hang
//! off one thread descriptor so the Perfetto UI groups them. Value tracks
//! become counter tracks.
//!
//! UUIDs and sequence ids are handed out in track order, so exporting the
//! same timeline twice yields the same bytes.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use perfetto_protos::counter_descriptor::counter_descriptor::Unit;
use perfetto_protos::counter_descriptor::CounterDescriptor;
use perfetto_protos::thread_descriptor::ThreadDescriptor;
use perfetto_protos::trace::Trace;
use perfetto_protos::trace_packet::TracePacket;
use perfetto_protos::track_descriptor::TrackDescriptor;
use perfetto_protos::track_event::track_event::Type;
use perfetto_protos::track_event::TrackEvent;
use protobuf::Message;
use tracing::debug;

use crate::intern::InternTables;
use crate::timer::{TimerInfo, TimerType};
use crate::track::{Timeline, Track, TrackKey, ValueTrack};

/// Names used to label tracks and slices.
#[derive(Debug, Default)]
pub struct TraceNames<'a> {
    pub thread_names: HashMap<u32, String>,
    /// Resolves the label keys carried by GPU timers.
    pub strings: Option<&'a InternTables>,
}

impl TraceNames<'_> {
    fn thread_name(&self, tid: i32) -> Option<&str> {
        u32::try_from(tid)
            .ok()
            .and_then(|tid| self.thread_names.get(&tid))
            .map(String::as_str)
    }

    fn slice_name(&self, timer: &TimerInfo) -> String {
        if let Some(name) = &timer.api_scope_name {
            return name.clone();
        }
        let label = timer
            .user_data_key
            .zip(self.strings)
            .and_then(|(key, strings)| strings.string(key));
        match timer.timer_type {
            TimerType::GpuActivity | TimerType::GpuCommandBuffer | TimerType::GpuDebugMarker => {
                if let Some(label) = label {
                    return label.to_string();
                }
            }
            TimerType::CoreActivity | TimerType::SchedulingSlice => {
                return match self.thread_name(timer.tid) {
                    Some(name) => format!("{} {}", name, timer.tid),
                    None => format!("tid {}", timer.tid),
                };
            }
            _ => {}
        }
        match timer.function_id {
            Some(function_id) => format!("function {}", function_id),
            None => format!("{:?}", timer.timer_type),
        }
    }
}

struct TraceBuilder<'a> {
    names: &'a TraceNames<'a>,
    trace: Trace,
    next_uuid: u64,
    next_sequence_id: u32,
    thread_uuids: HashMap<i32, u64>,
}

/// Where a slice packet sorts among packets of the same timestamp: ends of
/// earlier slices, then zero-length slices as begin/end pairs, then begins.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SliceEdge {
    End,
    Instant { index: usize, is_end: bool },
    Begin,
}

impl<'a> TraceBuilder<'a> {
    fn new(names: &'a TraceNames<'a>) -> Self {
        Self {
            names,
            trace: Trace::default(),
            next_uuid: 1,
            next_sequence_id: 1,
            thread_uuids: HashMap::new(),
        }
    }

    fn uuid(&mut self) -> u64 {
        let uuid = self.next_uuid;
        self.next_uuid += 1;
        uuid
    }

    fn sequence_id(&mut self) -> u32 {
        let seq = self.next_sequence_id;
        self.next_sequence_id += 1;
        seq
    }

    fn push_descriptor(&mut self, desc: TrackDescriptor) {
        let mut packet = TracePacket::default();
        packet.set_track_descriptor(desc);
        self.trace.packet.push(packet);
    }

    /// The descriptor of thread `tid`, emitted the first time one of its
    /// tracks is exported.
    fn thread_descriptor(&mut self, pid: i32, tid: i32) -> u64 {
        if let Some(&uuid) = self.thread_uuids.get(&tid) {
            return uuid;
        }
        let uuid = self.uuid();
        let mut thread = ThreadDescriptor::default();
        thread.set_pid(pid);
        thread.set_tid(tid);
        if let Some(name) = self.names.thread_name(tid) {
            thread.set_thread_name(name.to_string());
        }
        let mut desc = TrackDescriptor::default();
        desc.set_uuid(uuid);
        desc.thread = Some(thread).into();
        self.push_descriptor(desc);
        self.thread_uuids.insert(tid, uuid);
        uuid
    }

    fn named_descriptor(&mut self, name: String) -> u64 {
        let uuid = self.uuid();
        let mut desc = TrackDescriptor::default();
        desc.set_uuid(uuid);
        desc.set_name(name);
        self.push_descriptor(desc);
        uuid
    }

    fn add_track(&mut self, track: &Track) {
        let parent_uuid = match track.key() {
            TrackKey::Thread { tid } | TrackKey::Functions { tid } => {
                self.thread_descriptor(track.pid(), *tid)
            }
            key => self.named_descriptor(key.to_string()),
        };
        for chain in track.store().chains() {
            let uuid = self.uuid();
            let mut desc = TrackDescriptor::default();
            desc.set_uuid(uuid);
            desc.set_parent_uuid(parent_uuid);
            desc.set_name(match track.key() {
                TrackKey::Scheduler => format!("cpu {}", chain.depth()),
                TrackKey::Functions { .. } => format!("functions depth {}", chain.depth()),
                _ => format!("depth {}", chain.depth()),
            });
            self.push_descriptor(desc);

            let seq = self.sequence_id();
            let mut events: Vec<(u64, SliceEdge, TracePacket)> = Vec::new();
            for (index, timer) in chain.iter().enumerate() {
                let (begin, end) = if timer.start_ns == timer.end_ns {
                    (
                        SliceEdge::Instant { index, is_end: false },
                        SliceEdge::Instant { index, is_end: true },
                    )
                } else {
                    (SliceEdge::Begin, SliceEdge::End)
                };
                events.push((timer.start_ns, begin, self.slice_begin(uuid, seq, timer)));
                events.push((timer.end_ns, end, slice_end(uuid, seq, timer.end_ns)));
            }
            events.sort_by_key(|(ts, edge, _)| (*ts, *edge));
            self.trace
                .packet
                .extend(events.into_iter().map(|(_, _, packet)| packet));
        }
    }

    fn slice_begin(&self, track_uuid: u64, seq: u32, timer: &TimerInfo) -> TracePacket {
        let mut track_event = TrackEvent::default();
        track_event.set_type(Type::TYPE_SLICE_BEGIN);
        track_event.set_name(self.names.slice_name(timer));
        track_event.set_track_uuid(track_uuid);

        let mut packet = TracePacket::default();
        packet.set_timestamp(timer.start_ns);
        packet.set_track_event(track_event);
        packet.set_trusted_packet_sequence_id(seq);
        packet
    }

    fn add_value_track(&mut self, name: &str, values: &ValueTrack) {
        let uuid = self.uuid();
        let mut counter_desc = CounterDescriptor::default();
        counter_desc.set_unit(Unit::UNIT_COUNT);
        counter_desc.set_is_incremental(false);

        let mut desc = TrackDescriptor::default();
        desc.set_name(name.to_string());
        desc.set_uuid(uuid);
        desc.counter = Some(counter_desc).into();
        self.push_descriptor(desc);

        let seq = self.sequence_id();
        for sample in values.samples() {
            let mut track_event = TrackEvent::default();
            track_event.set_type(Type::TYPE_COUNTER);
            track_event.set_double_counter_value(sample.value);
            track_event.set_track_uuid(uuid);

            let mut packet = TracePacket::default();
            packet.set_timestamp(sample.timestamp_ns);
            packet.set_track_event(track_event);
            packet.set_trusted_packet_sequence_id(seq);
            self.trace.packet.push(packet);
        }
    }
}

fn slice_end(track_uuid: u64, seq: u32, timestamp_ns: u64) -> TracePacket {
    let mut track_event = TrackEvent::default();
    track_event.set_type(Type::TYPE_SLICE_END);
    track_event.set_track_uuid(track_uuid);

    let mut packet = TracePacket::default();
    packet.set_timestamp(timestamp_ns);
    packet.set_track_event(track_event);
    packet.set_trusted_packet_sequence_id(seq);
    packet
}

/// Build a Perfetto trace from every track of `timeline`.
pub fn timeline_to_trace(timeline: &Timeline, names: &TraceNames<'_>) -> Trace {
    let mut builder = TraceBuilder::new(names);
    for track in timeline.tracks() {
        builder.add_track(&track);
    }
    for (name, values) in timeline.value_tracks() {
        builder.add_value_track(&name, &values);
    }
    debug!("Generated {} trace packets", builder.trace.packet.len());
    builder.trace
}

pub fn write_trace(trace: &Trace, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    trace
        .write_to_writer(&mut writer)
        .context("Failed to write Perfetto trace")?;
    Ok(())
}
