//! The capture event demultiplexer.
//!
//! [`CaptureEventProcessor::process`] takes the events of one capture in
//! arrival order. Intern events fill the [`InternTables`]; API and GPU events
//! go through their correlators; everything else is translated and forwarded
//! to the [`CaptureListener`]. When a [`Timeline`] is attached, every timer
//! handed to the listener is stored there as well.
//!
//! Callstacks are published to the listener lazily: the first event citing a
//! callstack id publishes it, so the listener never sees an id it does not
//! know.
//!
//! A reference to an interned callstack or name that was never defined ends
//! processing. The processor then stays aborted and rejects further events.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::api::{ApiEventProcessor, ApiStats};
use crate::config::Config;
use crate::error::CaptureError;
use crate::events::*;
use crate::gpu::{GpuCorrelator, GpuStats};
use crate::intern::InternTables;
use crate::listener::{
    ApiTrackValueInfo, CGroupAndProcessMemoryInfo, CallstackEvent, CallstackInfo, CaptureListener,
    LinuxAddressInfo, PageFaultsInfo, SliceWakeupReason, SystemMemoryInfo, ThreadStateSliceInfo,
    TracepointEventInfo, TracepointInfo,
};
use crate::symbolize::DemangleCache;
use crate::timer::{TimerInfo, TimerType};
use crate::track::{Timeline, TrackKey};

/// Key under which a string produced by the processor itself is interned.
///
/// `DefaultHasher::new()` is unseeded, so a string maps to the same key in
/// every run of one build. The algorithm may change between Rust releases,
/// so keys are not meant to be persisted or compared across builds.
pub fn string_key(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Intern `value` and publish it to the listener the first time it is seen.
fn intern_and_publish<L: CaptureListener>(
    intern: &InternTables,
    listener: &mut L,
    value: &str,
) -> u64 {
    let key = string_key(value);
    if !intern.contains_string(key) {
        match intern.insert_string(key, value) {
            Ok(_) => listener.on_key_and_string(key, value),
            Err(e) => error!("Failed to intern '{}': {}", value, e),
        }
    }
    key
}

fn wakeup_reason(reason: WakeupReason) -> SliceWakeupReason {
    match reason {
        WakeupReason::NotApplicable => SliceWakeupReason::NotApplicable,
        WakeupReason::Unblocked => SliceWakeupReason::Unblocked,
        WakeupReason::Created => SliceWakeupReason::Created,
    }
}

pub struct CaptureEventProcessor<L: CaptureListener> {
    listener: L,
    intern: Arc<InternTables>,
    published_callstacks: HashSet<u64>,
    api: ApiEventProcessor,
    gpu: GpuCorrelator,
    demangled: DemangleCache,
    timeline: Option<Arc<Timeline>>,
    file_path: Option<PathBuf>,
    frame_track_function_ids: BTreeSet<u64>,
    event_counts: BTreeMap<&'static str, u64>,
    unknown_events: u64,
    reported_store_errors: HashSet<String>,
    aborted: Option<CaptureError>,
}

impl<L: CaptureListener> CaptureEventProcessor<L> {
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            intern: Arc::new(InternTables::new()),
            published_callstacks: HashSet::new(),
            api: ApiEventProcessor::new(),
            gpu: GpuCorrelator::new(),
            demangled: DemangleCache::new(),
            timeline: None,
            file_path: None,
            frame_track_function_ids: BTreeSet::new(),
            event_counts: BTreeMap::new(),
            unknown_events: 0,
            reported_store_errors: HashSet::new(),
            aborted: None,
        }
    }

    /// A processor set up from `config`, with its own timeline if
    /// `config.own_tracks` is set.
    pub fn from_config(listener: L, config: &Config) -> Self {
        let mut processor = Self::new(listener)
            .with_frame_track_function_ids(config.frame_track_function_ids.clone());
        if let Some(path) = &config.file_path {
            processor = processor.with_file_path(path.clone());
        }
        if config.own_tracks {
            processor = processor.with_timeline(Arc::new(Timeline::new(
                config.scope_tree_mode.unwrap_or_default(),
                config.block_capacity,
            )));
        }
        processor
    }

    /// Also store every timer in `timeline`.
    pub fn with_timeline(mut self, timeline: Arc<Timeline>) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn with_file_path(mut self, file_path: PathBuf) -> Self {
        self.file_path = Some(file_path);
        self
    }

    pub fn with_frame_track_function_ids(mut self, ids: BTreeSet<u64>) -> Self {
        self.frame_track_function_ids = ids;
        self
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    pub fn intern_tables(&self) -> &Arc<InternTables> {
        &self.intern
    }

    pub fn timeline(&self) -> Option<&Arc<Timeline>> {
        self.timeline.as_ref()
    }

    pub fn api_stats(&self) -> &ApiStats {
        self.api.stats()
    }

    pub fn gpu_stats(&self) -> &GpuStats {
        self.gpu.stats()
    }

    /// Events processed per wire kind.
    pub fn event_counts(&self) -> &BTreeMap<&'static str, u64> {
        &self.event_counts
    }

    pub fn unknown_events(&self) -> u64 {
        self.unknown_events
    }

    /// The error that ended processing, if any.
    pub fn abort_reason(&self) -> Option<&CaptureError> {
        self.aborted.as_ref()
    }

    /// Handle one event.
    ///
    /// Protocol violations such as duplicate intern keys are logged and the
    /// event is dropped. A dangling reference to an interned callstack or name
    /// is fatal: the error is returned and every later call fails with
    /// [`CaptureError::Aborted`].
    pub fn process(&mut self, event: &CaptureEvent) -> Result<(), CaptureError> {
        if let Some(reason) = &self.aborted {
            return Err(CaptureError::Aborted(Box::new(reason.clone())));
        }
        *self.event_counts.entry(event.kind()).or_insert(0) += 1;

        if let Err(e) = self.dispatch(event) {
            error!("Aborting capture processing: {}", e);
            self.aborted = Some(e.clone());
            return Err(e);
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &CaptureEvent) -> Result<(), CaptureError> {
        match event {
            CaptureEvent::CaptureStarted(e) => self.listener.on_capture_started(
                e,
                self.file_path.as_deref(),
                &self.frame_track_function_ids,
            ),
            CaptureEvent::CaptureFinished(e) => self.process_capture_finished(e),
            CaptureEvent::SchedulingSlice(e) => self.process_scheduling_slice(e),
            CaptureEvent::InternedCallstack(e) => self.process_interned_callstack(e),
            CaptureEvent::CallstackSample(e) => self.process_callstack_sample(e)?,
            CaptureEvent::FunctionCall(e) => self.process_function_call(e),
            CaptureEvent::InternedString(e) => self.process_interned_string(e),
            CaptureEvent::GpuJob(e) => {
                let timers = self.gpu.process_gpu_job(e, &self.intern, &mut |label: &str| {
                    intern_and_publish(&self.intern, &mut self.listener, label)
                });
                self.emit_timers(timers);
            }
            CaptureEvent::ThreadName(e) => self.listener.on_thread_name(e.tid, &e.name),
            CaptureEvent::ThreadStateSlice(e) => self.process_thread_state_slice(e)?,
            CaptureEvent::AddressInfo(e) => self.process_address_info(e)?,
            CaptureEvent::InternedTracepointInfo(e) => self.listener.on_unique_tracepoint_info(
                e.key,
                TracepointInfo {
                    category: e.category.clone(),
                    name: e.name.clone(),
                },
            ),
            CaptureEvent::TracepointEvent(e) => {
                self.gpu.update_begin_capture_time(e.timestamp_ns);
                self.listener.on_tracepoint_event(TracepointEventInfo {
                    pid: e.pid,
                    tid: e.tid,
                    cpu: e.cpu,
                    timestamp_ns: e.timestamp_ns,
                    tracepoint_info_key: e.tracepoint_info_key,
                });
            }
            CaptureEvent::GpuQueueSubmission(e) => {
                let timers =
                    self.gpu
                        .process_gpu_queue_submission(e, &self.intern, &mut |label: &str| {
                            intern_and_publish(&self.intern, &mut self.listener, label)
                        });
                self.emit_timers(timers);
            }
            CaptureEvent::ModulesSnapshot(e) => {
                self.listener.on_modules_snapshot(e.timestamp_ns, &e.modules)
            }
            CaptureEvent::PresentEvent(e) => self.listener.on_present_event(e),
            CaptureEvent::ThreadNamesSnapshot(e) => {
                for thread_name in &e.thread_names {
                    self.listener.on_thread_name(thread_name.tid, &thread_name.name);
                }
            }
            CaptureEvent::ModuleUpdateEvent(e) => {
                self.listener.on_module_update(e.timestamp_ns, &e.module)
            }
            CaptureEvent::MemoryUsageEvent(e) => self.process_memory_usage_event(e),
            CaptureEvent::ApiScopeStart(e) => self.api.process_scope_start(e),
            CaptureEvent::ApiScopeStartAsync(e) => self.api.process_scope_start_async(e),
            CaptureEvent::ApiScopeStop(e) => {
                if let Some(timer) = self.api.process_scope_stop(e) {
                    self.emit_timer(timer);
                }
            }
            CaptureEvent::ApiScopeStopAsync(e) => {
                if let Some(timer) = self.api.process_scope_stop_async(e) {
                    self.emit_timer(timer);
                }
            }
            CaptureEvent::ApiStringEvent(e) => {
                let info = self.api.process_string_event(e);
                self.listener.on_api_string_event(info);
            }
            CaptureEvent::ApiTrackDouble(e) => {
                self.emit_track_value(self.api.process_track_value(e))
            }
            CaptureEvent::ApiTrackFloat(e) => {
                self.emit_track_value(self.api.process_track_value(e))
            }
            CaptureEvent::ApiTrackInt(e) => self.emit_track_value(self.api.process_track_value(e)),
            CaptureEvent::ApiTrackInt64(e) => {
                self.emit_track_value(self.api.process_track_value(e))
            }
            CaptureEvent::ApiTrackUint(e) => self.emit_track_value(self.api.process_track_value(e)),
            CaptureEvent::ApiTrackUint64(e) => {
                self.emit_track_value(self.api.process_track_value(e))
            }
            CaptureEvent::WarningEvent(e) => self.listener.on_warning_event(e),
            CaptureEvent::ClockResolutionEvent(e) => self.listener.on_clock_resolution_event(e),
            CaptureEvent::ErrorsWithPerfEventOpenEvent(e) => {
                self.listener.on_errors_with_perf_event_open_event(e)
            }
            CaptureEvent::WarningInstrumentingWithUprobesEvent(e) => {
                self.listener.on_warning_instrumenting_with_uprobes_event(e)
            }
            CaptureEvent::ErrorEnablingOrbitApiEvent(e) => {
                self.listener.on_error_enabling_orbit_api_event(e)
            }
            CaptureEvent::ErrorEnablingUserSpaceInstrumentationEvent(e) => self
                .listener
                .on_error_enabling_user_space_instrumentation_event(e),
            CaptureEvent::WarningInstrumentingWithUserSpaceInstrumentationEvent(e) => self
                .listener
                .on_warning_instrumenting_with_user_space_instrumentation_event(e),
            CaptureEvent::LostPerfRecordsEvent(e) => self.listener.on_lost_perf_records_event(e),
            CaptureEvent::OutOfOrderEventsDiscardedEvent(e) => {
                self.listener.on_out_of_order_events_discarded_event(e)
            }
            CaptureEvent::Unknown => {
                self.unknown_events += 1;
                error!("Unknown capture event kind, skipping");
            }
        }
        Ok(())
    }

    fn process_capture_finished(&mut self, capture_finished: &CaptureFinished) {
        self.api.capture_finished();
        self.gpu.capture_finished();
        if let Some(timeline) = &self.timeline {
            timeline.capture_finished();
        }
        self.listener.on_capture_finished(capture_finished);
    }

    fn process_scheduling_slice(&mut self, slice: &SchedulingSlice) {
        let in_timestamp_ns = slice.out_timestamp_ns.saturating_sub(slice.duration_ns);
        self.gpu.update_begin_capture_time(in_timestamp_ns);
        let core = u8::try_from(slice.core).unwrap_or(u8::MAX);
        self.emit_timer(TimerInfo {
            start_ns: in_timestamp_ns,
            end_ns: slice.out_timestamp_ns,
            pid: slice.pid as i32,
            tid: slice.tid as i32,
            depth: core,
            processor: Some(slice.core),
            timer_type: TimerType::CoreActivity,
            ..Default::default()
        });
    }

    fn process_interned_callstack(&mut self, interned: &InternedCallstack) {
        if let Err(e) = self
            .intern
            .insert_callstack(interned.key, interned.intern.clone())
        {
            error!("{}, keeping the first definition", e);
        }
    }

    fn process_interned_string(&mut self, interned: &InternedString) {
        match self.intern.insert_string(interned.key, &interned.intern) {
            Ok(_) => self
                .listener
                .on_key_and_string(interned.key, &interned.intern),
            Err(e) => error!("{}, ignoring '{}'", e, interned.intern),
        }
    }

    /// Publish callstack `id` unless the listener already has it.
    fn publish_callstack(&mut self, id: u64, event: &'static str) -> Result<(), CaptureError> {
        if self.published_callstacks.contains(&id) {
            return Ok(());
        }
        let callstack = self
            .intern
            .callstack(id)
            .ok_or(CaptureError::MissingCallstack { key: id, event })?;
        self.published_callstacks.insert(id);
        self.listener.on_unique_callstack(
            id,
            CallstackInfo {
                frames: callstack.pcs.clone(),
                callstack_type: callstack.callstack_type,
            },
        );
        Ok(())
    }

    fn process_callstack_sample(&mut self, sample: &CallstackSample) -> Result<(), CaptureError> {
        self.gpu.update_begin_capture_time(sample.timestamp_ns);
        self.publish_callstack(sample.callstack_id, "callstack_sample")?;
        self.listener.on_callstack_event(CallstackEvent {
            timestamp_ns: sample.timestamp_ns,
            callstack_id: sample.callstack_id,
            tid: sample.tid,
        });
        Ok(())
    }

    fn process_function_call(&mut self, call: &FunctionCall) {
        let start_ns = call.end_timestamp_ns.saturating_sub(call.duration_ns);
        self.gpu.update_begin_capture_time(start_ns);
        self.emit_timer(TimerInfo {
            start_ns,
            end_ns: call.end_timestamp_ns,
            pid: call.pid as i32,
            tid: call.tid as i32,
            depth: u8::try_from(call.depth).unwrap_or(u8::MAX),
            timer_type: TimerType::FunctionCall,
            function_id: Some(call.function_id),
            user_data_key: Some(call.return_value),
            registers: call.registers.clone(),
            ..Default::default()
        });
    }

    fn process_thread_state_slice(&mut self, slice: &ThreadStateSlice) -> Result<(), CaptureError> {
        let begin_timestamp_ns = slice.end_timestamp_ns.saturating_sub(slice.duration_ns);
        self.gpu.update_begin_capture_time(begin_timestamp_ns);
        if let Some(callstack_id) = slice.switch_out_or_wakeup_callstack_id {
            self.publish_callstack(callstack_id, "thread_state_slice")?;
        }
        self.listener.on_thread_state_slice(ThreadStateSliceInfo {
            tid: slice.tid,
            thread_state: slice.thread_state,
            begin_timestamp_ns,
            end_timestamp_ns: slice.end_timestamp_ns,
            wakeup_reason: wakeup_reason(slice.wakeup_reason),
            wakeup_tid: slice.wakeup_tid,
            wakeup_pid: slice.wakeup_pid,
            switch_out_or_wakeup_callstack_id: slice.switch_out_or_wakeup_callstack_id,
        });
        Ok(())
    }

    fn process_address_info(&mut self, address_info: &AddressInfo) -> Result<(), CaptureError> {
        let missing = |key| CaptureError::MissingString {
            key,
            event: "address_info",
        };
        let function_name = self
            .intern
            .string(address_info.function_name_key)
            .ok_or_else(|| missing(address_info.function_name_key))?;
        let module_path = self
            .intern
            .string(address_info.module_name_key)
            .ok_or_else(|| missing(address_info.module_name_key))?;
        let function_name = self
            .demangled
            .get_or_demangle(address_info.function_name_key, &function_name);

        self.listener.on_address_info(LinuxAddressInfo {
            absolute_address: address_info.absolute_address,
            offset_in_function: address_info.offset_in_function,
            module_path: module_path.to_string(),
            function_name: function_name.to_string(),
        });
        Ok(())
    }

    /// Up to three listener calls, each only if all of its parts are present.
    fn process_memory_usage_event(&mut self, event: &MemoryUsageEvent) {
        let timestamp_ns = event.timestamp_ns;

        if let Some(system) = &event.system_memory_usage {
            self.listener.on_system_memory_info(SystemMemoryInfo {
                timestamp_ns,
                total_kb: system.total_kb,
                free_kb: system.free_kb,
                available_kb: system.available_kb,
                buffers_kb: system.buffers_kb,
                cached_kb: system.cached_kb,
            });
        }

        let (Some(cgroup), Some(process)) =
            (&event.cgroup_memory_usage, &event.process_memory_usage)
        else {
            return;
        };
        let cgroup_name_hash =
            intern_and_publish(&self.intern, &mut self.listener, &cgroup.cgroup_name);
        self.listener
            .on_cgroup_and_process_memory_info(CGroupAndProcessMemoryInfo {
                timestamp_ns,
                cgroup_name_hash,
                cgroup_limit_bytes: cgroup.limit_bytes,
                cgroup_rss_bytes: cgroup.rss_bytes,
                cgroup_mapped_file_bytes: cgroup.mapped_file_bytes,
                process_rss_anon_kb: process.rss_anon_kb,
            });

        let Some(system) = &event.system_memory_usage else {
            return;
        };
        self.listener.on_page_faults_info(PageFaultsInfo {
            timestamp_ns,
            system_page_faults: system.pgfault,
            system_major_page_faults: system.pgmajfault,
            cgroup_name_hash,
            cgroup_page_faults: cgroup.pgfault,
            cgroup_major_page_faults: cgroup.pgmajfault,
            process_minor_page_faults: process.minflt,
            process_major_page_faults: process.majflt,
        });
    }

    fn emit_track_value(&mut self, value: ApiTrackValueInfo) {
        if let Some(timeline) = &self.timeline {
            timeline.add_value(&value);
        }
        self.listener.on_api_track_value(value);
    }

    fn emit_timers(&mut self, timers: Vec<TimerInfo>) {
        for timer in timers {
            self.emit_timer(timer);
        }
    }

    fn emit_timer(&mut self, timer: TimerInfo) {
        self.listener.on_timer(&timer);
        let Some(timeline) = &self.timeline else {
            return;
        };
        if let Err(e) = timeline.add_timer(&timer) {
            let message =
                format!("Dropping timers on track {}: {}", TrackKey::for_timer(&timer), e);
            if self.reported_store_errors.insert(message.clone()) {
                warn!("{}", message);
                self.listener.on_warning_event(&WarningEvent {
                    timestamp_ns: timer.end_ns,
                    message,
                });
            } else {
                debug!("{}", message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{ListenerCall, RecordingListener};

    fn processor() -> CaptureEventProcessor<RecordingListener> {
        CaptureEventProcessor::new(RecordingListener::new())
    }

    fn interned_callstack(key: u64, pcs: Vec<u64>) -> CaptureEvent {
        CaptureEvent::InternedCallstack(InternedCallstack {
            key,
            intern: Callstack {
                pcs,
                callstack_type: CallstackType::Complete,
            },
        })
    }

    fn sample(callstack_id: u64, timestamp_ns: u64) -> CaptureEvent {
        CaptureEvent::CallstackSample(CallstackSample {
            pid: 1,
            tid: 2,
            callstack_id,
            timestamp_ns,
        })
    }

    #[test]
    fn test_callstack_published_once_before_first_sample() {
        let mut p = processor();
        p.process(&interned_callstack(5, vec![0x10, 0x20])).unwrap();
        assert!(p.listener().calls().is_empty());

        p.process(&sample(5, 100)).unwrap();
        p.process(&sample(5, 200)).unwrap();
        let methods: Vec<_> = p.listener().calls().iter().map(ListenerCall::method).collect();
        assert_eq!(
            methods,
            vec!["unique_callstack", "callstack_event", "callstack_event"]
        );
    }

    #[test]
    fn test_missing_callstack_aborts_and_poisons() {
        let mut p = processor();
        let err = p.process(&sample(9, 100)).unwrap_err();
        assert_eq!(
            err,
            CaptureError::MissingCallstack {
                key: 9,
                event: "callstack_sample"
            }
        );

        let err = p
            .process(&CaptureEvent::ThreadName(ThreadName::default()))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Aborted(_)));
        assert_eq!(err.key(), Some(9));
        assert!(p.listener().calls().is_empty());
    }

    #[test]
    fn test_duplicate_string_is_ignored() {
        let mut p = processor();
        let string = |intern: &str| {
            CaptureEvent::InternedString(InternedString {
                key: 1,
                intern: intern.to_string(),
            })
        };
        p.process(&string("first")).unwrap();
        p.process(&string("second")).unwrap();
        assert_eq!(p.listener().calls().len(), 1);
        assert_eq!(p.intern_tables().string(1).as_deref(), Some("first"));
    }

    #[test]
    fn test_duplicate_callstack_keeps_first() {
        let mut p = processor();
        p.process(&interned_callstack(5, vec![1])).unwrap();
        p.process(&interned_callstack(5, vec![2])).unwrap();
        p.process(&sample(5, 10)).unwrap();
        match &p.listener().calls()[0] {
            ListenerCall::UniqueCallstack { callstack, .. } => {
                assert_eq!(callstack.frames, vec![1])
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let mut p = processor();
        p.process(&CaptureEvent::Unknown).unwrap();
        assert_eq!(p.unknown_events(), 1);
        assert!(p.listener().calls().is_empty());
        assert_eq!(p.event_counts()["unknown"], 1);
    }

    #[test]
    fn test_scheduling_slice_becomes_core_activity() {
        let mut p = processor();
        p.process(&CaptureEvent::SchedulingSlice(SchedulingSlice {
            pid: 1,
            tid: 2,
            core: 3,
            duration_ns: 40,
            out_timestamp_ns: 100,
        }))
        .unwrap();
        let timer = p.listener().timers().next().unwrap();
        assert_eq!((timer.start_ns, timer.end_ns), (60, 100));
        assert_eq!(timer.depth, 3);
        assert_eq!(timer.processor, Some(3));
        assert_eq!(timer.timer_type, TimerType::CoreActivity);
        assert_eq!(p.gpu.begin_capture_time_ns(), 60);
    }

    #[test]
    fn test_function_call_timer() {
        let mut p = processor();
        p.process(&CaptureEvent::FunctionCall(FunctionCall {
            pid: 1,
            tid: 2,
            function_id: 17,
            duration_ns: 5,
            end_timestamp_ns: 50,
            depth: 2,
            return_value: 99,
            registers: vec![1, 2, 3],
        }))
        .unwrap();
        let timer = p.listener().timers().next().unwrap();
        assert_eq!((timer.start_ns, timer.end_ns, timer.depth), (45, 50, 2));
        assert_eq!(timer.function_id, Some(17));
        assert_eq!(timer.user_data_key, Some(99));
        assert_eq!(timer.registers, vec![1, 2, 3]);
    }

    #[test]
    fn test_thread_state_slice_publishes_callstack_first() {
        let mut p = processor();
        p.process(&interned_callstack(4, vec![7])).unwrap();
        p.process(&CaptureEvent::ThreadStateSlice(ThreadStateSlice {
            pid: 1,
            tid: 2,
            thread_state: ThreadState::Runnable,
            duration_ns: 10,
            end_timestamp_ns: 30,
            wakeup_reason: WakeupReason::Unblocked,
            wakeup_tid: 3,
            wakeup_pid: 1,
            switch_out_or_wakeup_callstack_id: Some(4),
        }))
        .unwrap();
        let calls = p.listener().calls();
        assert_eq!(calls[0].method(), "unique_callstack");
        match &calls[1] {
            ListenerCall::ThreadStateSlice(slice) => {
                assert_eq!(slice.begin_timestamp_ns, 20);
                assert_eq!(slice.wakeup_reason, SliceWakeupReason::Unblocked);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[test]
    fn test_address_info_requires_both_names() {
        let mut p = processor();
        p.process(&CaptureEvent::InternedString(InternedString {
            key: 1,
            intern: "libfoo.so".to_string(),
        }))
        .unwrap();
        let err = p
            .process(&CaptureEvent::AddressInfo(AddressInfo {
                absolute_address: 0x10,
                offset_in_function: 0,
                function_name_key: 2,
                module_name_key: 1,
            }))
            .unwrap_err();
        assert_eq!(
            err,
            CaptureError::MissingString {
                key: 2,
                event: "address_info"
            }
        );
    }

    #[test]
    fn test_memory_event_with_system_only() {
        let mut p = processor();
        p.process(&CaptureEvent::MemoryUsageEvent(MemoryUsageEvent {
            timestamp_ns: 10,
            system_memory_usage: Some(SystemMemoryUsage::default()),
            cgroup_memory_usage: Some(CGroupMemoryUsage::default()),
            process_memory_usage: None,
        }))
        .unwrap();
        let methods: Vec<_> = p.listener().calls().iter().map(ListenerCall::method).collect();
        assert_eq!(methods, vec!["system_memory_info"]);
    }

    #[test]
    fn test_timers_land_in_timeline() {
        let timeline = Arc::new(Timeline::default());
        let mut p = processor().with_timeline(Arc::clone(&timeline));
        p.process(&CaptureEvent::ApiScopeStart(ApiScopeStart {
            pid: 1,
            tid: 7,
            timestamp_ns: 10,
            name: EncodedName::encode("Frame"),
            ..Default::default()
        }))
        .unwrap();
        p.process(&CaptureEvent::ApiScopeStop(ApiScopeStop {
            pid: 1,
            tid: 7,
            timestamp_ns: 20,
        }))
        .unwrap();
        let track = timeline.track(&TrackKey::Thread { tid: 7 }).unwrap();
        assert_eq!(track.num_timers(), 1);
        assert_eq!(p.api_stats().sync_scopes, 1);
    }

    #[test]
    fn test_string_key_is_fixed_within_a_run() {
        assert_eq!(string_key("sw queue"), string_key("sw queue"));
        assert_ne!(string_key("sw queue"), string_key("hw queue"));
    }
}
