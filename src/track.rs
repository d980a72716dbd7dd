//! Tracks owned by the capture core.
//!
//! A [`Timeline`] routes every timer to the track of its owner: a thread, the
//! scheduler, a lane of a GPU timeline or a group of async scopes. Each track
//! stores its timers in a [`TimerStore`]. Thread tracks additionally keep a
//! [`ScopeTree`] over their timers for parent/child navigation, built either
//! while timers arrive or once when the capture finishes.
//!
//! A thread owns two tracks: one for manual-instrumentation scopes and one
//! for dynamically instrumented function calls. Their depths come from two
//! independent call stacks, so sharing one store would interleave them on the
//! same depth out of start order.
//!
//! Tracks are handed out as `Arc`s so render threads can query them while the
//! capture thread keeps inserting.

use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};

use anyhow::{bail, Context};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::listener::ApiTrackValueInfo;
use crate::scope_tree::{Scope, ScopeId, ScopeTree};
use crate::timer::{TimerInfo, TimerType};
use crate::timer_store::{TimerStore, DEFAULT_BLOCK_CAPACITY};

/// When thread scope trees are built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTreeMode {
    /// Insert into the tree on every timer. For live captures.
    #[default]
    Streaming,
    /// Build the tree once at capture end. For replays whose scopes arrive
    /// out of order.
    Batched,
}

/// Sub-track of a GPU timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuLane {
    /// sw queue, hw queue and hw execution phases of kernel jobs.
    Queue,
    CommandBuffer,
    DebugMarker,
}

impl GpuLane {
    fn as_str(self) -> &'static str {
        match self {
            GpuLane::Queue => "queue",
            GpuLane::CommandBuffer => "command_buffer",
            GpuLane::DebugMarker => "debug_marker",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackKey {
    Scheduler,
    /// Manual-instrumentation scopes of a thread.
    Thread { tid: i32 },
    /// Dynamically instrumented function calls of a thread.
    Functions { tid: i32 },
    Gpu { timeline: u64, lane: GpuLane },
    Async { name: String },
}

impl TrackKey {
    /// Track a timer belongs to.
    pub fn for_timer(timer: &TimerInfo) -> Self {
        let timeline = timer.timeline_hash.unwrap_or_default();
        match timer.timer_type {
            TimerType::CoreActivity | TimerType::SchedulingSlice => TrackKey::Scheduler,
            TimerType::GpuActivity => TrackKey::Gpu {
                timeline,
                lane: GpuLane::Queue,
            },
            TimerType::GpuCommandBuffer => TrackKey::Gpu {
                timeline,
                lane: GpuLane::CommandBuffer,
            },
            TimerType::GpuDebugMarker => TrackKey::Gpu {
                timeline,
                lane: GpuLane::DebugMarker,
            },
            TimerType::ApiAsyncScope => TrackKey::Async {
                name: timer.api_scope_name.clone().unwrap_or_default(),
            },
            TimerType::FunctionCall => TrackKey::Functions { tid: timer.tid },
            TimerType::ApiSyncScope | TimerType::None => TrackKey::Thread { tid: timer.tid },
        }
    }

    /// Thread owning the track, for the two per-thread kinds.
    pub fn thread_id(&self) -> Option<i32> {
        match self {
            TrackKey::Thread { tid } | TrackKey::Functions { tid } => Some(*tid),
            _ => None,
        }
    }

    fn has_scope_tree(&self) -> bool {
        self.thread_id().is_some()
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKey::Scheduler => write!(f, "scheduler"),
            TrackKey::Thread { tid } => write!(f, "thread:{tid}"),
            TrackKey::Functions { tid } => write!(f, "functions:{tid}"),
            TrackKey::Gpu { timeline, lane } => write!(f, "gpu:{timeline}:{}", lane.as_str()),
            TrackKey::Async { name } => write!(f, "async:{name}"),
        }
    }
}

/// Parses the `Display` form: `scheduler`, `thread:<tid>`, `functions:<tid>`,
/// `gpu:<timeline>[:<lane>]` or `async:<name>`.
impl FromStr for TrackKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s.split_once(':').unwrap_or((s, ""));
        match kind {
            "scheduler" => Ok(TrackKey::Scheduler),
            "thread" => Ok(TrackKey::Thread {
                tid: rest
                    .parse()
                    .with_context(|| format!("Invalid thread id in track '{s}'"))?,
            }),
            "functions" => Ok(TrackKey::Functions {
                tid: rest
                    .parse()
                    .with_context(|| format!("Invalid thread id in track '{s}'"))?,
            }),
            "gpu" => {
                let (timeline, lane) = rest.split_once(':').unwrap_or((rest, "queue"));
                let lane = match lane {
                    "queue" => GpuLane::Queue,
                    "command_buffer" => GpuLane::CommandBuffer,
                    "debug_marker" => GpuLane::DebugMarker,
                    other => bail!("Unknown GPU lane '{}'", other),
                };
                Ok(TrackKey::Gpu {
                    timeline: timeline
                        .parse()
                        .with_context(|| format!("Invalid GPU timeline in track '{s}'"))?,
                    lane,
                })
            }
            "async" if !rest.is_empty() => Ok(TrackKey::Async {
                name: rest.to_string(),
            }),
            _ => bail!(
                "Invalid track '{}', expected scheduler, thread:<tid>, functions:<tid>, \
                 gpu:<timeline>[:<lane>] or async:<name>",
                s
            ),
        }
    }
}

/// Position of a timer in its track's store, as kept in the scope tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    pub depth: u8,
    pub index: usize,
    pub start_ns: u64,
    pub end_ns: u64,
}

impl Scope for TimerHandle {
    fn start_ns(&self) -> u64 {
        self.start_ns
    }

    fn end_ns(&self) -> u64 {
        self.end_ns
    }
}

#[derive(Debug)]
pub struct Track {
    key: TrackKey,
    /// Process of the first timer stored on the track.
    pid: i32,
    store: TimerStore,
    scope_tree: Option<RwLock<ScopeTree<TimerHandle>>>,
    mode: ScopeTreeMode,
    /// End of the last timer of every async lane.
    lane_ends: Mutex<Vec<u64>>,
    rejected_scopes: Mutex<u64>,
}

impl Track {
    fn new(key: TrackKey, pid: i32, mode: ScopeTreeMode, block_capacity: usize) -> Self {
        let scope_tree = key.has_scope_tree().then(|| RwLock::new(ScopeTree::new()));
        Self {
            key,
            pid,
            store: TimerStore::with_block_capacity(block_capacity),
            scope_tree,
            mode,
            lane_ends: Mutex::new(Vec::new()),
            rejected_scopes: Mutex::new(0),
        }
    }

    pub fn key(&self) -> &TrackKey {
        &self.key
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn store(&self) -> &TimerStore {
        &self.store
    }

    pub fn num_timers(&self) -> u64 {
        self.store.num_timers()
    }

    /// Scopes the tree refused because they partially overlapped another one.
    pub fn rejected_scopes(&self) -> u64 {
        *self
            .rejected_scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn add_timer(&self, mut timer: TimerInfo) -> Result<(), StoreError> {
        if matches!(self.key, TrackKey::Async { .. }) {
            timer.depth = self.assign_lane(timer.start_ns, timer.end_ns);
        }
        let depth = timer.depth;
        let (index, stored) = self.store.add_timer_indexed(timer, depth)?;
        if self.mode == ScopeTreeMode::Streaming {
            let handle = TimerHandle {
                depth,
                index,
                start_ns: stored.start_ns,
                end_ns: stored.end_ns,
            };
            self.insert_scope(handle);
        }
        Ok(())
    }

    /// Lowest lane whose last timer ended at or before `start_ns`.
    fn assign_lane(&self, start_ns: u64, end_ns: u64) -> u8 {
        let mut lane_ends = self.lane_ends.lock().unwrap_or_else(PoisonError::into_inner);
        let lane = match lane_ends.iter().position(|&end| end <= start_ns) {
            Some(lane) => lane,
            None => {
                lane_ends.push(0);
                lane_ends.len() - 1
            }
        };
        lane_ends[lane] = end_ns;
        u8::try_from(lane).unwrap_or(u8::MAX)
    }

    fn insert_scope(&self, handle: TimerHandle) {
        let Some(tree) = &self.scope_tree else {
            return;
        };
        let result = tree
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle);
        if let Err(e) = result {
            warn!("Track {}: {}", self.key, e);
            *self
                .rejected_scopes
                .lock()
                .unwrap_or_else(PoisonError::into_inner) += 1;
        }
    }

    /// Build the scope tree from the stored timers, enclosing scopes first.
    fn build_scope_tree(&self) {
        if self.scope_tree.is_none() || self.mode != ScopeTreeMode::Batched {
            return;
        }
        let mut handles: Vec<TimerHandle> = self
            .store
            .chains()
            .flat_map(|chain| {
                chain.iter().enumerate().map(move |(index, timer)| TimerHandle {
                    depth: chain.depth(),
                    index,
                    start_ns: timer.start_ns,
                    end_ns: timer.end_ns,
                })
            })
            .collect();
        handles.sort_by_key(|h| (h.start_ns, Reverse(h.end_ns), h.depth));
        debug!("Track {}: building scope tree of {} timers", self.key, handles.len());
        for handle in handles {
            self.insert_scope(handle);
        }
    }

    fn read_tree(&self) -> Option<RwLockReadGuard<'_, ScopeTree<TimerHandle>>> {
        self.scope_tree
            .as_ref()
            .map(|tree| tree.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Run `f` against the scope tree. `None` for tracks without one.
    pub fn with_scope_tree<R>(&self, f: impl FnOnce(&ScopeTree<TimerHandle>) -> R) -> Option<R> {
        self.read_tree().map(|tree| f(&tree))
    }

    /// The timer behind a scope tree node.
    pub fn scope_timer(&self, id: ScopeId) -> Option<&TimerInfo> {
        let handle = *self.read_tree()?.scope(id)?;
        self.store.get(handle.depth, handle.index)
    }

    pub fn find_parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.read_tree()?.find_parent(id)
    }

    pub fn find_first_child(&self, id: ScopeId) -> Option<ScopeId> {
        self.read_tree()?.find_first_child(id)
    }

    pub fn find_previous_sibling(&self, id: ScopeId) -> Option<ScopeId> {
        self.read_tree()?.find_previous_sibling(id)
    }

    pub fn find_next_sibling(&self, id: ScopeId) -> Option<ScopeId> {
        self.read_tree()?.find_next_sibling(id)
    }

    pub fn get_timers_at_depth_discretised(
        &self,
        depth: u8,
        pixel_count: u64,
        start_ns: u64,
        end_ns: u64,
    ) -> Vec<&TimerInfo> {
        self.store
            .get_timers_at_depth_discretised(depth, pixel_count, start_ns, end_ns)
    }

    /// Pixel-bounded query over the scope tree. Tree depth 1 holds the
    /// outermost scopes.
    pub fn get_scopes_at_depth_discretised(
        &self,
        depth: u32,
        pixel_count: u64,
        start_ns: u64,
        end_ns: u64,
    ) -> Vec<&TimerInfo> {
        let handles: Vec<TimerHandle> = match self.read_tree() {
            Some(tree) => tree
                .get_scopes_at_depth_discretised(depth, pixel_count, start_ns, end_ns)
                .into_iter()
                .filter_map(|id| tree.scope(id).copied())
                .collect(),
            None => return Vec::new(),
        };
        handles
            .into_iter()
            .filter_map(|h| self.store.get(h.depth, h.index))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ValueSample {
    pub timestamp_ns: u64,
    pub value: f64,
}

/// Samples of one named variable.
#[derive(Debug, Default)]
pub struct ValueTrack {
    samples: RwLock<Vec<ValueSample>>,
}

impl ValueTrack {
    fn push(&self, sample: ValueSample) {
        self.samples
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }

    pub fn samples(&self) -> Vec<ValueSample> {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every track of one capture.
#[derive(Debug)]
pub struct Timeline {
    mode: ScopeTreeMode,
    block_capacity: usize,
    tracks: DashMap<TrackKey, Arc<Track>>,
    value_tracks: DashMap<String, Arc<ValueTrack>>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(ScopeTreeMode::default(), DEFAULT_BLOCK_CAPACITY)
    }
}

impl Timeline {
    pub fn new(mode: ScopeTreeMode, block_capacity: usize) -> Self {
        Self {
            mode,
            block_capacity,
            tracks: DashMap::new(),
            value_tracks: DashMap::new(),
        }
    }

    pub fn mode(&self) -> ScopeTreeMode {
        self.mode
    }

    /// Store `timer` on the track it belongs to, creating the track on first use.
    pub fn add_timer(&self, timer: &TimerInfo) -> Result<(), StoreError> {
        let key = TrackKey::for_timer(timer);
        let track = Arc::clone(
            self.tracks
                .entry(key.clone())
                .or_insert_with(|| {
                    Arc::new(Track::new(key, timer.pid, self.mode, self.block_capacity))
                })
                .value(),
        );
        track.add_timer(timer.clone())
    }

    pub fn add_value(&self, value: &ApiTrackValueInfo) {
        let track = Arc::clone(
            self.value_tracks
                .entry(value.track_name.clone())
                .or_default()
                .value(),
        );
        track.push(ValueSample {
            timestamp_ns: value.timestamp_ns,
            value: value.value,
        });
    }

    /// Finalise derived state. Builds the scope trees in batched mode.
    pub fn capture_finished(&self) {
        for track in self.tracks() {
            track.build_scope_tree();
        }
    }

    pub fn track(&self, key: &TrackKey) -> Option<Arc<Track>> {
        self.tracks.get(key).map(|track| Arc::clone(track.value()))
    }

    /// All tracks ordered by key.
    pub fn tracks(&self) -> Vec<Arc<Track>> {
        let mut tracks: Vec<_> = self
            .tracks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tracks.sort_by(|a, b| a.key().cmp(b.key()));
        tracks
    }

    pub fn value_track(&self, name: &str) -> Option<Arc<ValueTrack>> {
        self.value_tracks.get(name).map(|track| Arc::clone(track.value()))
    }

    /// All value tracks ordered by name.
    pub fn value_tracks(&self) -> Vec<(String, Arc<ValueTrack>)> {
        let mut tracks: Vec<_> = self
            .value_tracks
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        tracks.sort_by(|a, b| a.0.cmp(&b.0));
        tracks
    }

    pub fn num_timers(&self) -> u64 {
        self.tracks.iter().map(|entry| entry.value().num_timers()).sum()
    }
}
