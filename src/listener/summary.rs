//! A listener that only counts.
//!
//! Replays of whole captures go through this one: its memory does not grow
//! with the capture, apart from one entry per named thread.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::types::*;
use super::CaptureListener;
use crate::events::{
    CaptureFinished, CaptureStarted, ClockResolutionEvent, ErrorEnablingOrbitApiEvent,
    ErrorEnablingUserSpaceInstrumentationEvent, ErrorsWithPerfEventOpenEvent,
    LostPerfRecordsEvent, ModuleInfo, OutOfOrderEventsDiscardedEvent, PresentEvent, WarningEvent,
    WarningInstrumentingWithUprobesEvent, WarningInstrumentingWithUserSpaceInstrumentationEvent,
};
use crate::timer::TimerInfo;

/// Counts calls per listener method and keeps thread names.
#[derive(Debug, Default)]
pub struct SummaryListener {
    counts: BTreeMap<&'static str, usize>,
    thread_names: HashMap<u32, String>,
    file_path: Option<PathBuf>,
}

impl SummaryListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls per listener method, named as [`super::ListenerCall::method`].
    pub fn counts(&self) -> &BTreeMap<&'static str, usize> {
        &self.counts
    }

    pub fn num_timers(&self) -> u64 {
        self.counts.get("timer").copied().unwrap_or_default() as u64
    }

    /// Latest name of every thread.
    pub fn thread_names(&self) -> &HashMap<u32, String> {
        &self.thread_names
    }

    /// Capture file announced with capture-started.
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn count(&mut self, method: &'static str) {
        *self.counts.entry(method).or_insert(0) += 1;
    }
}

impl CaptureListener for SummaryListener {
    fn on_capture_started(
        &mut self,
        _capture_started: &CaptureStarted,
        file_path: Option<&Path>,
        _frame_track_function_ids: &BTreeSet<u64>,
    ) {
        self.count("capture_started");
        self.file_path = file_path.map(Path::to_path_buf);
    }

    fn on_capture_finished(&mut self, _capture_finished: &CaptureFinished) {
        self.count("capture_finished");
    }

    fn on_timer(&mut self, _timer: &TimerInfo) {
        self.count("timer");
    }

    fn on_key_and_string(&mut self, _key: u64, _value: &str) {
        self.count("key_and_string");
    }

    fn on_unique_callstack(&mut self, _callstack_id: u64, _callstack: CallstackInfo) {
        self.count("unique_callstack");
    }

    fn on_callstack_event(&mut self, _callstack_event: CallstackEvent) {
        self.count("callstack_event");
    }

    fn on_thread_name(&mut self, tid: u32, thread_name: &str) {
        self.count("thread_name");
        self.thread_names.insert(tid, thread_name.to_string());
    }

    fn on_thread_state_slice(&mut self, _thread_state_slice: ThreadStateSliceInfo) {
        self.count("thread_state_slice");
    }

    fn on_address_info(&mut self, _address_info: LinuxAddressInfo) {
        self.count("address_info");
    }

    fn on_unique_tracepoint_info(&mut self, _key: u64, _tracepoint_info: TracepointInfo) {
        self.count("unique_tracepoint_info");
    }

    fn on_tracepoint_event(&mut self, _tracepoint_event: TracepointEventInfo) {
        self.count("tracepoint_event");
    }

    fn on_module_update(&mut self, _timestamp_ns: u64, _module_info: &ModuleInfo) {
        self.count("module_update");
    }

    fn on_modules_snapshot(&mut self, _timestamp_ns: u64, _module_infos: &[ModuleInfo]) {
        self.count("modules_snapshot");
    }

    fn on_present_event(&mut self, _present_event: &PresentEvent) {
        self.count("present_event");
    }

    fn on_system_memory_info(&mut self, _system_memory_info: SystemMemoryInfo) {
        self.count("system_memory_info");
    }

    fn on_cgroup_and_process_memory_info(&mut self, _memory_info: CGroupAndProcessMemoryInfo) {
        self.count("cgroup_and_process_memory_info");
    }

    fn on_page_faults_info(&mut self, _page_faults_info: PageFaultsInfo) {
        self.count("page_faults_info");
    }

    fn on_api_string_event(&mut self, _api_string_event: ApiStringEventInfo) {
        self.count("api_string_event");
    }

    fn on_api_track_value(&mut self, _api_track_value: ApiTrackValueInfo) {
        self.count("api_track_value");
    }

    fn on_warning_event(&mut self, _warning_event: &WarningEvent) {
        self.count("warning_event");
    }

    fn on_clock_resolution_event(&mut self, _clock_resolution_event: &ClockResolutionEvent) {
        self.count("clock_resolution_event");
    }

    fn on_errors_with_perf_event_open_event(&mut self, _event: &ErrorsWithPerfEventOpenEvent) {
        self.count("errors_with_perf_event_open_event");
    }

    fn on_warning_instrumenting_with_uprobes_event(
        &mut self,
        _event: &WarningInstrumentingWithUprobesEvent,
    ) {
        self.count("warning_instrumenting_with_uprobes_event");
    }

    fn on_error_enabling_orbit_api_event(&mut self, _event: &ErrorEnablingOrbitApiEvent) {
        self.count("error_enabling_orbit_api_event");
    }

    fn on_error_enabling_user_space_instrumentation_event(
        &mut self,
        _event: &ErrorEnablingUserSpaceInstrumentationEvent,
    ) {
        self.count("error_enabling_user_space_instrumentation_event");
    }

    fn on_warning_instrumenting_with_user_space_instrumentation_event(
        &mut self,
        _event: &WarningInstrumentingWithUserSpaceInstrumentationEvent,
    ) {
        self.count("warning_instrumenting_with_user_space_instrumentation_event");
    }

    fn on_lost_perf_records_event(&mut self, _event: &LostPerfRecordsEvent) {
        self.count("lost_perf_records_event");
    }

    fn on_out_of_order_events_discarded_event(&mut self, _event: &OutOfOrderEventsDiscardedEvent) {
        self.count("out_of_order_events_discarded_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_without_keeping_payloads() {
        let mut listener = SummaryListener::new();
        for i in 0..1000 {
            listener.on_timer(&TimerInfo {
                start_ns: i,
                end_ns: i + 1,
                ..Default::default()
            });
        }
        listener.on_thread_name(7, "main");
        listener.on_thread_name(7, "render");

        assert_eq!(listener.num_timers(), 1000);
        assert_eq!(listener.counts()["thread_name"], 2);
        assert_eq!(listener.thread_names().len(), 1);
        assert_eq!(listener.thread_names()[&7], "render");
        assert!(listener.file_path().is_none());
    }

    #[test]
    fn test_method_names_match_recording_listener() {
        use super::super::RecordingListener;

        let mut summary = SummaryListener::new();
        let mut recording = RecordingListener::new();
        let started = CaptureStarted::default();
        let path = Path::new("/tmp/game.capline");
        summary.on_capture_started(&started, Some(path), &BTreeSet::new());
        recording.on_capture_started(&started, Some(path), &BTreeSet::new());
        summary.on_key_and_string(1, "a");
        recording.on_key_and_string(1, "a");
        summary.on_thread_name(3, "worker");
        recording.on_thread_name(3, "worker");

        assert_eq!(summary.counts(), &recording.counts());
        assert_eq!(summary.file_path(), Some(path));
    }
}
