//! Properties that hold for any valid capture, checked over seeded random
//! streams.

mod common;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ptr;
use std::sync::Arc;
use std::thread;

use capline::events::CaptureEvent;
use capline::listener::{ListenerCall, RecordingListener};
use capline::pixel::{get_pixel, next_pixel_boundary};
use capline::timer::{TimerInfo, TimerType};
use capline::track::{GpuLane, ScopeTreeMode};
use capline::{CaptureEventProcessor, Timeline, TrackKey};
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEEDS: [u64; 4] = [1, 7, 42, 1234];
const TIDS: [u32; 3] = [10, 11, 12];
const CORES: u32 = 4;
const GPU_TIMELINE: u64 = 3;
const GPU_CLOCK_OFFSET: u64 = 1 << 40;
const MAX_STACK_DEPTH: usize = 8;
const MAX_OPEN_ASYNC_SCOPES: usize = 4;

/// A random stream plus what the generator knows about it.
struct Stream {
    events: Vec<CaptureEvent>,
    /// Stack depth at the time each scope started, by `(tid, start_ns)`.
    start_depths: HashMap<(u32, u64), u8>,
    /// Call depth of each instrumented function, by `(tid, start_ns)`.
    function_depths: HashMap<(u32, u64), u8>,
    /// `(start, stop)` of every async scope, by id.
    async_scopes: HashMap<u64, (u64, u64)>,
    /// `(ioctl, fence)` of every GPU job.
    gpu_jobs: Vec<(u64, u64)>,
    /// `(hardware start, middle, fence)` of every job with a queue submission.
    submitted_jobs: Vec<(u64, u64, u64)>,
}

#[derive(Default)]
struct Generator {
    events: Vec<CaptureEvent>,
    start_depths: HashMap<(u32, u64), u8>,
    function_depths: HashMap<(u32, u64), u8>,
    async_scopes: HashMap<u64, (u64, u64)>,
    gpu_jobs: Vec<(u64, u64)>,
    submitted_jobs: Vec<(u64, u64, u64)>,
    scopes: BTreeMap<u32, Vec<u64>>,
    functions: BTreeMap<u32, Vec<(u64, u64)>>,
    open_async: Vec<(u64, u64)>,
    next_async_id: u64,
    interned_callstacks: HashSet<u64>,
    core_free_at: Vec<u64>,
    gpu_free_at: u64,
}

impl Generator {
    fn enter_scope(&mut self, tid: u32, now: u64) {
        let stack = self.scopes.entry(tid).or_default();
        if stack.len() < MAX_STACK_DEPTH {
            self.start_depths.insert((tid, now), stack.len() as u8);
            stack.push(now);
            self.events.push(scope_start(tid, now, &format!("scope{}", stack.len())));
        }
    }

    fn exit_scope(&mut self, tid: u32, now: u64) {
        let stack = self.scopes.entry(tid).or_default();
        if stack.pop().is_some() {
            self.events.push(scope_stop(tid, now));
        }
    }

    fn enter_function(&mut self, tid: u32, function_id: u64, now: u64) {
        let stack = self.functions.entry(tid).or_default();
        if stack.len() < MAX_STACK_DEPTH {
            self.function_depths.insert((tid, now), stack.len() as u8);
            stack.push((now, function_id));
        }
    }

    /// Instrumented calls are only reported once they return.
    fn exit_function(&mut self, tid: u32, now: u64) {
        let stack = self.functions.entry(tid).or_default();
        if let Some((start_ns, function_id)) = stack.pop() {
            let depth = stack.len() as u32;
            self.events.push(function_call(tid, function_id, start_ns, now, depth));
        }
    }

    fn start_async(&mut self, tid: u32, name: &str, now: u64) {
        if self.open_async.len() < MAX_OPEN_ASYNC_SCOPES {
            self.next_async_id += 1;
            self.open_async.push((self.next_async_id, now));
            self.events.push(async_start(tid, self.next_async_id, now, name));
        }
    }

    /// Async scopes may stop on any thread.
    fn stop_async(&mut self, tid: u32, index: usize, now: u64) {
        if index < self.open_async.len() {
            let (id, start_ns) = self.open_async.swap_remove(index);
            self.async_scopes.insert(id, (start_ns, now));
            self.events.push(async_stop(tid, id, now));
        }
    }

    fn schedule(&mut self, tid: u32, core: u32, now: u64, duration_ns: u64) {
        let start_ns = self.core_free_at[core as usize].max(now);
        let end_ns = start_ns + duration_ns;
        self.core_free_at[core as usize] = end_ns;
        self.events.push(scheduling_slice(tid, core, start_ns, end_ns));
    }

    fn finish(mut self, mut now: u64) -> Stream {
        let tids: Vec<u32> = self.scopes.keys().chain(self.functions.keys()).copied().collect();
        for tid in tids {
            while self.scopes.get(&tid).is_some_and(|stack| !stack.is_empty()) {
                now += 1;
                self.exit_scope(tid, now);
            }
            while self.functions.get(&tid).is_some_and(|stack| !stack.is_empty()) {
                now += 1;
                self.exit_function(tid, now);
            }
        }
        while !self.open_async.is_empty() {
            now += 1;
            self.stop_async(TIDS[0], 0, now);
        }
        self.events.push(CaptureEvent::CaptureFinished(Default::default()));

        Stream {
            events: self.events,
            start_depths: self.start_depths,
            function_depths: self.function_depths,
            async_scopes: self.async_scopes,
            gpu_jobs: self.gpu_jobs,
            submitted_jobs: self.submitted_jobs,
        }
    }
}

fn random_stream(seed: u64, steps: usize) -> Stream {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut generator = Generator {
        core_free_at: vec![0; CORES as usize],
        ..Default::default()
    };
    let mut now = 1_000u64;

    for _ in 0..steps {
        now += rng.random_range(1..50);
        let tid = TIDS[rng.random_range(0..TIDS.len())];
        match rng.random_range(0..10) {
            0 | 1 => generator.enter_scope(tid, now),
            2 => generator.exit_scope(tid, now),
            3 => {
                let callstack_id = rng.random_range(0..6u64);
                if generator.interned_callstacks.insert(callstack_id) {
                    generator.events
                        .push(interned_callstack(callstack_id, &[0x1000 + callstack_id, 0x2000]));
                }
                generator.events.push(callstack_sample(tid, callstack_id, now));
            }
            4 => generator.enter_function(tid, rng.random_range(0..20), now),
            5 => generator.exit_function(tid, now),
            6 => {
                if rng.random_bool(0.5) {
                    let name = if rng.random_bool(0.5) { "load" } else { "upload" };
                    generator.start_async(tid, name, now);
                } else {
                    let index = rng.random_range(0..MAX_OPEN_ASYNC_SCOPES);
                    generator.stop_async(tid, index, now);
                }
            }
            _ => {
                if rng.random_bool(0.5) {
                    let core = rng.random_range(0..CORES);
                    generator.schedule(tid, core, now, rng.random_range(1..30));
                } else {
                    let ioctl = generator.gpu_free_at.max(now);
                    let sched = ioctl + rng.random_range(0..20);
                    let hw_start = sched + rng.random_range(0..20);
                    let fence = hw_start + rng.random_range(2..40);
                    generator.gpu_free_at = fence;
                    generator.gpu_jobs.push((ioctl, fence));
                    let job = gpu_job(tid, GPU_TIMELINE, ioctl, sched, hw_start, fence);
                    if rng.random_bool(0.5) {
                        generator.events.push(job);
                        continue;
                    }

                    let middle = hw_start + (fence - hw_start) / 2;
                    generator.submitted_jobs.push((hw_start, middle, fence));
                    let submission = queue_submission(
                        tid,
                        ioctl,
                        ioctl,
                        &[
                            (GPU_CLOCK_OFFSET + hw_start, GPU_CLOCK_OFFSET + middle),
                            (GPU_CLOCK_OFFSET + middle, GPU_CLOCK_OFFSET + fence),
                        ],
                    );
                    // Either half of the pair may arrive first.
                    if rng.random_bool(0.5) {
                        generator.events.extend([submission, job]);
                    } else {
                        generator.events.extend([job, submission]);
                    }
                }
            }
        }
    }

    generator.finish(now)
}

fn is_subsequence(part: &[&TimerInfo], whole: &[&TimerInfo]) -> bool {
    let mut whole = whole.iter();
    part.iter().all(|timer| whole.any(|candidate| ptr::eq(*timer, *candidate)))
}

fn replay_stream(
    stream: &Stream,
    mode: ScopeTreeMode,
) -> (CaptureEventProcessor<RecordingListener>, Arc<Timeline>) {
    let timeline = Arc::new(Timeline::new(mode, 16));
    let mut processor = CaptureEventProcessor::new(RecordingListener::new())
        .with_timeline(Arc::clone(&timeline));
    for event in &stream.events {
        processor.process(event).unwrap();
    }
    (processor, timeline)
}

#[test]
fn test_store_ordering_and_bounds() {
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (_, timeline) = replay_stream(&stream, ScopeTreeMode::Streaming);
        for track in timeline.tracks() {
            let store = track.store();
            for chain in store.chains() {
                let timers: Vec<_> = chain.iter().collect();
                assert!(
                    timers.windows(2).all(|w| w[0].start_ns <= w[1].start_ns),
                    "seed {seed}: unordered depth {} on {}",
                    chain.depth(),
                    track.key()
                );
                for timer in timers {
                    assert!(store.min_time_ns() <= timer.start_ns);
                    assert!(timer.start_ns <= timer.end_ns);
                    assert!(timer.end_ns <= store.max_time_ns());
                }
                assert_eq!(chain.out_of_order_inserts(), 0);
            }
        }

        let keys: Vec<TrackKey> = timeline.tracks().iter().map(|t| t.key().clone()).collect();
        assert!(keys.iter().any(|k| matches!(k, TrackKey::Functions { .. })));
        assert!(keys.iter().any(|k| matches!(k, TrackKey::Async { .. })));
        assert!(keys.contains(&TrackKey::Gpu {
            timeline: GPU_TIMELINE,
            lane: GpuLane::CommandBuffer,
        }));
    }
}

#[test]
fn test_scope_tree_nesting() {
    for mode in [ScopeTreeMode::Streaming, ScopeTreeMode::Batched] {
        for seed in SEEDS {
            let stream = random_stream(seed, 2_000);
            let (_, timeline) = replay_stream(&stream, mode);
            let keys = TIDS.iter().flat_map(|&tid| {
                let tid = tid as i32;
                [TrackKey::Thread { tid }, TrackKey::Functions { tid }]
            });
            for key in keys {
                let Some(track) = timeline.track(&key) else {
                    continue;
                };
                assert_eq!(track.rejected_scopes(), 0);
                let checked = track
                    .with_scope_tree(|tree| {
                        let mut checked = 0;
                        for depth in 1..=tree.max_depth() {
                            for id in tree.ordered_nodes_at_depth(depth) {
                                let scope = tree.scope(id).unwrap();
                                match tree.find_parent(id) {
                                    Some(parent) => {
                                        let outer = tree.scope(parent).unwrap();
                                        assert!(outer.start_ns <= scope.start_ns);
                                        assert!(scope.start_ns <= scope.end_ns);
                                        assert!(scope.end_ns <= outer.end_ns);
                                        assert_eq!(
                                            tree.depth(id).unwrap(),
                                            tree.depth(parent).unwrap() + 1
                                        );
                                    }
                                    None => assert_eq!(tree.depth(id), Some(1)),
                                }
                                checked += 1;
                            }
                        }
                        checked
                    })
                    .unwrap();
                assert_eq!(checked as u64, track.num_timers());
            }
        }
    }
}

#[test]
fn test_discretised_result_bounded_by_pixels() {
    let mut rng = StdRng::seed_from_u64(99);
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (_, timeline) = replay_stream(&stream, ScopeTreeMode::Streaming);
        for track in timeline.tracks() {
            let store = track.store();
            let (min, max) = (store.min_time_ns(), store.max_time_ns());
            for _ in 0..50 {
                let start_ns = rng.random_range(min..=max);
                let end_ns = rng.random_range(start_ns..=max);
                let pixels = rng.random_range(1..64u64);
                for chain in store.chains() {
                    let result = store.get_timers_at_depth_discretised(
                        chain.depth(),
                        pixels,
                        start_ns,
                        end_ns,
                    );
                    if start_ns < end_ns {
                        assert!(result.len() as u64 <= pixels + 1);
                    }
                    assert!(result.iter().all(|t| t.intersects(start_ns, end_ns)));
                    assert!(result.windows(2).all(|w| w[0].start_ns <= w[1].start_ns));
                }
            }
            for chain in store.chains() {
                let collapsed = store.get_timers_at_depth_discretised(chain.depth(), 1, min, max);
                assert_eq!(collapsed.len(), 1);
            }
        }
    }
}

#[test]
fn test_discretised_result_is_subsequence_of_intersecting_timers() {
    let mut rng = StdRng::seed_from_u64(17);
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (_, timeline) = replay_stream(&stream, ScopeTreeMode::Streaming);
        for track in timeline.tracks() {
            let store = track.store();
            let (min, max) = (store.min_time_ns(), store.max_time_ns());
            for chain in store.chains() {
                for _ in 0..20 {
                    let start_ns = rng.random_range(min..=max);
                    let end_ns = rng.random_range(start_ns..=max);
                    let intersecting: Vec<&TimerInfo> =
                        chain.iter().filter(|t| t.intersects(start_ns, end_ns)).collect();
                    let coarse_pixels = rng.random_range(1..64u64);
                    let fine_pixels = coarse_pixels + rng.random_range(0..64u64);
                    let coarse = store.get_timers_at_depth_discretised(
                        chain.depth(),
                        coarse_pixels,
                        start_ns,
                        end_ns,
                    );
                    let fine = store.get_timers_at_depth_discretised(
                        chain.depth(),
                        fine_pixels,
                        start_ns,
                        end_ns,
                    );
                    assert!(is_subsequence(&coarse, &intersecting));
                    assert!(is_subsequence(&fine, &intersecting));
                    // Every pixel count starts from the same timer.
                    assert_eq!(coarse.is_empty(), intersecting.is_empty());
                    if let (Some(a), Some(b)) = (coarse.first(), fine.first()) {
                        assert!(ptr::eq(*a, *b));
                    }
                }
            }
        }
    }
}

#[test]
fn test_scope_depth_matches_open_scopes() {
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (processor, _) = replay_stream(&stream, ScopeTreeMode::Streaming);
        let mut functions = 0;
        for timer in processor.listener().timers() {
            let key = (timer.tid as u32, timer.start_ns);
            match timer.timer_type {
                TimerType::ApiSyncScope => {
                    assert_eq!(stream.start_depths.get(&key), Some(&timer.depth));
                }
                TimerType::FunctionCall => {
                    assert_eq!(stream.function_depths.get(&key), Some(&timer.depth));
                    functions += 1;
                }
                _ => {}
            }
        }
        assert_eq!(functions, stream.function_depths.len());
    }
}

#[test]
fn test_async_scopes_pair_by_id_on_free_lanes() {
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (processor, timeline) = replay_stream(&stream, ScopeTreeMode::Streaming);
        let scopes: Vec<&TimerInfo> = processor
            .listener()
            .timers()
            .filter(|t| t.timer_type == TimerType::ApiAsyncScope)
            .collect();
        assert!(!scopes.is_empty());
        assert_eq!(scopes.len(), stream.async_scopes.len());
        for timer in scopes {
            let id = timer.api_async_scope_id.unwrap();
            assert_eq!(stream.async_scopes[&id], (timer.start_ns, timer.end_ns));
        }

        for name in ["load", "upload"] {
            let key = TrackKey::Async {
                name: name.to_string(),
            };
            let Some(track) = timeline.track(&key) else {
                continue;
            };
            for chain in track.store().chains() {
                let timers: Vec<_> = chain.iter().collect();
                assert!(timers.windows(2).all(|w| w[0].end_ns <= w[1].start_ns));
            }
        }
    }
}

#[test]
fn test_command_buffers_mapped_onto_gpu_job() {
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (processor, _) = replay_stream(&stream, ScopeTreeMode::Streaming);
        assert!(!stream.submitted_jobs.is_empty());
        let command_buffers: Vec<&TimerInfo> = processor
            .listener()
            .timers()
            .filter(|t| t.timer_type == TimerType::GpuCommandBuffer)
            .collect();
        assert_eq!(command_buffers.len(), stream.submitted_jobs.len() * 2);
        for (pair, &(hw_start, middle, fence)) in
            command_buffers.chunks(2).zip(&stream.submitted_jobs)
        {
            assert_eq!((pair[0].start_ns, pair[0].end_ns), (hw_start, middle));
            assert_eq!((pair[1].start_ns, pair[1].end_ns), (middle, fence));
        }
        assert_eq!(processor.gpu_stats().joins, stream.submitted_jobs.len() as u64);
    }
}

#[test]
fn test_callstacks_published_once_before_use() {
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (processor, _) = replay_stream(&stream, ScopeTreeMode::Streaming);
        let mut published = HashSet::new();
        let mut events = 0;
        for call in processor.listener().calls() {
            match call {
                ListenerCall::UniqueCallstack { callstack_id, .. } => {
                    assert!(published.insert(*callstack_id), "published twice");
                }
                ListenerCall::CallstackEvent(event) => {
                    assert!(published.contains(&event.callstack_id));
                    events += 1;
                }
                _ => {}
            }
        }
        assert!(events > 0);
    }
}

#[test]
fn test_gpu_triples_cover_job() {
    for seed in SEEDS {
        let stream = random_stream(seed, 2_000);
        let (processor, _) = replay_stream(&stream, ScopeTreeMode::Streaming);
        let activity: Vec<&TimerInfo> = processor
            .listener()
            .timers()
            .filter(|t| t.timer_type == TimerType::GpuActivity)
            .collect();
        assert_eq!(activity.len(), stream.gpu_jobs.len() * 3);
        for (triple, &(ioctl, fence)) in activity.chunks(3).zip(&stream.gpu_jobs) {
            assert_eq!(triple[0].start_ns, ioctl);
            assert_eq!(triple[0].end_ns, triple[1].start_ns);
            assert_eq!(triple[1].end_ns, triple[2].start_ns);
            assert_eq!(triple[2].end_ns, fence);
        }
    }
}

#[test]
fn test_replay_is_deterministic() {
    for seed in SEEDS {
        let stream = random_stream(seed, 1_000);
        let (first, _) = replay_stream(&stream, ScopeTreeMode::Streaming);
        let (second, _) = replay_stream(&stream, ScopeTreeMode::Streaming);
        assert_eq!(
            first.listener().to_json().unwrap(),
            second.listener().to_json().unwrap()
        );
    }
}

#[test]
fn test_pixel_boundary_inverse_on_random_ranges() {
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..10_000 {
        let start_ns = rng.random_range(0..u64::MAX / 2);
        let end_ns = start_ns + rng.random_range(1..u64::MAX / 2);
        let pixels = rng.random_range(1..4096u64);
        let t = rng.random_range(start_ns..end_ns);
        let pixel = get_pixel(t, pixels, start_ns, end_ns);
        let boundary = next_pixel_boundary(t, pixels, start_ns, end_ns);
        assert!(boundary > t);
        assert_eq!(get_pixel(boundary, pixels, start_ns, end_ns), pixel + 1);
    }
}

#[test]
fn test_concurrent_readers_see_complete_timers() {
    let timeline = Arc::new(Timeline::new(ScopeTreeMode::Streaming, 8));
    let key = TrackKey::Functions { tid: 1 };
    const COUNT: u64 = 20_000;

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..COUNT {
                timeline
                    .add_timer(&TimerInfo {
                        start_ns: i * 10,
                        end_ns: i * 10 + 5,
                        tid: 1,
                        function_id: Some(i),
                        timer_type: TimerType::FunctionCall,
                        ..Default::default()
                    })
                    .unwrap();
            }
        });

        for _ in 0..3 {
            s.spawn(|| {
                let mut last_seen = 0;
                while last_seen < COUNT {
                    let Some(track) = timeline.track(&key) else {
                        thread::yield_now();
                        continue;
                    };
                    let timers = track.get_timers_at_depth_discretised(0, 500, 0, COUNT * 10);
                    for timer in &timers {
                        let i = timer.function_id.unwrap();
                        assert_eq!((timer.start_ns, timer.end_ns), (i * 10, i * 10 + 5));
                    }
                    assert!(timers.windows(2).all(|w| w[0].start_ns < w[1].start_ns));
                    last_seen = track.num_timers();
                }
            });
        }
    });

    assert_eq!(timeline.num_timers(), COUNT);
}
