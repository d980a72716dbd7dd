//! A listener that keeps every call in memory.
//!
//! Useful for tests and for comparing two replays of the same capture: the
//! recorded sequence serializes to JSON, so equal sequences compare equal byte
//! for byte.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::types::*;
use super::CaptureListener;
use crate::events::{
    CaptureFinished, CaptureStarted, ClockResolutionEvent, ErrorEnablingOrbitApiEvent,
    ErrorEnablingUserSpaceInstrumentationEvent, ErrorsWithPerfEventOpenEvent,
    LostPerfRecordsEvent, ModuleInfo, OutOfOrderEventsDiscardedEvent, PresentEvent, WarningEvent,
    WarningInstrumentingWithUprobesEvent, WarningInstrumentingWithUserSpaceInstrumentationEvent,
};
use crate::timer::TimerInfo;

/// One recorded listener call with its arguments.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum ListenerCall {
    CaptureStarted {
        capture_started: CaptureStarted,
        file_path: Option<PathBuf>,
        frame_track_function_ids: Vec<u64>,
    },
    CaptureFinished(CaptureFinished),
    Timer(TimerInfo),
    KeyAndString {
        key: u64,
        value: String,
    },
    UniqueCallstack {
        callstack_id: u64,
        callstack: CallstackInfo,
    },
    CallstackEvent(CallstackEvent),
    ThreadName {
        tid: u32,
        name: String,
    },
    ThreadStateSlice(ThreadStateSliceInfo),
    AddressInfo(LinuxAddressInfo),
    UniqueTracepointInfo {
        key: u64,
        info: TracepointInfo,
    },
    TracepointEvent(TracepointEventInfo),
    ModuleUpdate {
        timestamp_ns: u64,
        module: ModuleInfo,
    },
    ModulesSnapshot {
        timestamp_ns: u64,
        modules: Vec<ModuleInfo>,
    },
    PresentEvent(PresentEvent),
    SystemMemoryInfo(SystemMemoryInfo),
    CGroupAndProcessMemoryInfo(CGroupAndProcessMemoryInfo),
    PageFaultsInfo(PageFaultsInfo),
    ApiStringEvent(ApiStringEventInfo),
    ApiTrackValue(ApiTrackValueInfo),
    WarningEvent(WarningEvent),
    ClockResolutionEvent(ClockResolutionEvent),
    ErrorsWithPerfEventOpenEvent(ErrorsWithPerfEventOpenEvent),
    WarningInstrumentingWithUprobesEvent(WarningInstrumentingWithUprobesEvent),
    ErrorEnablingOrbitApiEvent(ErrorEnablingOrbitApiEvent),
    ErrorEnablingUserSpaceInstrumentationEvent(ErrorEnablingUserSpaceInstrumentationEvent),
    WarningInstrumentingWithUserSpaceInstrumentationEvent(
        WarningInstrumentingWithUserSpaceInstrumentationEvent,
    ),
    LostPerfRecordsEvent(LostPerfRecordsEvent),
    OutOfOrderEventsDiscardedEvent(OutOfOrderEventsDiscardedEvent),
}

impl ListenerCall {
    /// Name of the listener method that produced this call.
    pub fn method(&self) -> &'static str {
        match self {
            ListenerCall::CaptureStarted { .. } => "capture_started",
            ListenerCall::CaptureFinished(_) => "capture_finished",
            ListenerCall::Timer(_) => "timer",
            ListenerCall::KeyAndString { .. } => "key_and_string",
            ListenerCall::UniqueCallstack { .. } => "unique_callstack",
            ListenerCall::CallstackEvent(_) => "callstack_event",
            ListenerCall::ThreadName { .. } => "thread_name",
            ListenerCall::ThreadStateSlice(_) => "thread_state_slice",
            ListenerCall::AddressInfo(_) => "address_info",
            ListenerCall::UniqueTracepointInfo { .. } => "unique_tracepoint_info",
            ListenerCall::TracepointEvent(_) => "tracepoint_event",
            ListenerCall::ModuleUpdate { .. } => "module_update",
            ListenerCall::ModulesSnapshot { .. } => "modules_snapshot",
            ListenerCall::PresentEvent(_) => "present_event",
            ListenerCall::SystemMemoryInfo(_) => "system_memory_info",
            ListenerCall::CGroupAndProcessMemoryInfo(_) => "cgroup_and_process_memory_info",
            ListenerCall::PageFaultsInfo(_) => "page_faults_info",
            ListenerCall::ApiStringEvent(_) => "api_string_event",
            ListenerCall::ApiTrackValue(_) => "api_track_value",
            ListenerCall::WarningEvent(_) => "warning_event",
            ListenerCall::ClockResolutionEvent(_) => "clock_resolution_event",
            ListenerCall::ErrorsWithPerfEventOpenEvent(_) => "errors_with_perf_event_open_event",
            ListenerCall::WarningInstrumentingWithUprobesEvent(_) => {
                "warning_instrumenting_with_uprobes_event"
            }
            ListenerCall::ErrorEnablingOrbitApiEvent(_) => "error_enabling_orbit_api_event",
            ListenerCall::ErrorEnablingUserSpaceInstrumentationEvent(_) => {
                "error_enabling_user_space_instrumentation_event"
            }
            ListenerCall::WarningInstrumentingWithUserSpaceInstrumentationEvent(_) => {
                "warning_instrumenting_with_user_space_instrumentation_event"
            }
            ListenerCall::LostPerfRecordsEvent(_) => "lost_perf_records_event",
            ListenerCall::OutOfOrderEventsDiscardedEvent(_) => {
                "out_of_order_events_discarded_event"
            }
        }
    }
}

/// Records every call in arrival order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    calls: Vec<ListenerCall>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[ListenerCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<ListenerCall> {
        self.calls
    }

    /// All timers in the order they were published.
    pub fn timers(&self) -> impl Iterator<Item = &TimerInfo> {
        self.calls.iter().filter_map(|call| match call {
            ListenerCall::Timer(timer) => Some(timer),
            _ => None,
        })
    }

    /// Number of calls per listener method.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for call in &self.calls {
            *counts.entry(call.method()).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.calls)
    }
}

impl CaptureListener for RecordingListener {
    fn on_capture_started(
        &mut self,
        capture_started: &CaptureStarted,
        file_path: Option<&Path>,
        frame_track_function_ids: &BTreeSet<u64>,
    ) {
        self.calls.push(ListenerCall::CaptureStarted {
            capture_started: capture_started.clone(),
            file_path: file_path.map(Path::to_path_buf),
            frame_track_function_ids: frame_track_function_ids.iter().copied().collect(),
        });
    }

    fn on_capture_finished(&mut self, capture_finished: &CaptureFinished) {
        self.calls
            .push(ListenerCall::CaptureFinished(capture_finished.clone()));
    }

    fn on_timer(&mut self, timer: &TimerInfo) {
        self.calls.push(ListenerCall::Timer(timer.clone()));
    }

    fn on_key_and_string(&mut self, key: u64, value: &str) {
        self.calls.push(ListenerCall::KeyAndString {
            key,
            value: value.to_string(),
        });
    }

    fn on_unique_callstack(&mut self, callstack_id: u64, callstack: CallstackInfo) {
        self.calls.push(ListenerCall::UniqueCallstack {
            callstack_id,
            callstack,
        });
    }

    fn on_callstack_event(&mut self, callstack_event: CallstackEvent) {
        self.calls.push(ListenerCall::CallstackEvent(callstack_event));
    }

    fn on_thread_name(&mut self, tid: u32, thread_name: &str) {
        self.calls.push(ListenerCall::ThreadName {
            tid,
            name: thread_name.to_string(),
        });
    }

    fn on_thread_state_slice(&mut self, thread_state_slice: ThreadStateSliceInfo) {
        self.calls
            .push(ListenerCall::ThreadStateSlice(thread_state_slice));
    }

    fn on_address_info(&mut self, address_info: LinuxAddressInfo) {
        self.calls.push(ListenerCall::AddressInfo(address_info));
    }

    fn on_unique_tracepoint_info(&mut self, key: u64, tracepoint_info: TracepointInfo) {
        self.calls.push(ListenerCall::UniqueTracepointInfo {
            key,
            info: tracepoint_info,
        });
    }

    fn on_tracepoint_event(&mut self, tracepoint_event: TracepointEventInfo) {
        self.calls.push(ListenerCall::TracepointEvent(tracepoint_event));
    }

    fn on_module_update(&mut self, timestamp_ns: u64, module_info: &ModuleInfo) {
        self.calls.push(ListenerCall::ModuleUpdate {
            timestamp_ns,
            module: module_info.clone(),
        });
    }

    fn on_modules_snapshot(&mut self, timestamp_ns: u64, module_infos: &[ModuleInfo]) {
        self.calls.push(ListenerCall::ModulesSnapshot {
            timestamp_ns,
            modules: module_infos.to_vec(),
        });
    }

    fn on_present_event(&mut self, present_event: &PresentEvent) {
        self.calls
            .push(ListenerCall::PresentEvent(present_event.clone()));
    }

    fn on_system_memory_info(&mut self, system_memory_info: SystemMemoryInfo) {
        self.calls
            .push(ListenerCall::SystemMemoryInfo(system_memory_info));
    }

    fn on_cgroup_and_process_memory_info(&mut self, memory_info: CGroupAndProcessMemoryInfo) {
        self.calls
            .push(ListenerCall::CGroupAndProcessMemoryInfo(memory_info));
    }

    fn on_page_faults_info(&mut self, page_faults_info: PageFaultsInfo) {
        self.calls.push(ListenerCall::PageFaultsInfo(page_faults_info));
    }

    fn on_api_string_event(&mut self, api_string_event: ApiStringEventInfo) {
        self.calls.push(ListenerCall::ApiStringEvent(api_string_event));
    }

    fn on_api_track_value(&mut self, api_track_value: ApiTrackValueInfo) {
        self.calls.push(ListenerCall::ApiTrackValue(api_track_value));
    }

    fn on_warning_event(&mut self, warning_event: &WarningEvent) {
        self.calls
            .push(ListenerCall::WarningEvent(warning_event.clone()));
    }

    fn on_clock_resolution_event(&mut self, clock_resolution_event: &ClockResolutionEvent) {
        self.calls
            .push(ListenerCall::ClockResolutionEvent(clock_resolution_event.clone()));
    }

    fn on_errors_with_perf_event_open_event(&mut self, event: &ErrorsWithPerfEventOpenEvent) {
        self.calls
            .push(ListenerCall::ErrorsWithPerfEventOpenEvent(event.clone()));
    }

    fn on_warning_instrumenting_with_uprobes_event(
        &mut self,
        event: &WarningInstrumentingWithUprobesEvent,
    ) {
        self.calls
            .push(ListenerCall::WarningInstrumentingWithUprobesEvent(event.clone()));
    }

    fn on_error_enabling_orbit_api_event(&mut self, event: &ErrorEnablingOrbitApiEvent) {
        self.calls
            .push(ListenerCall::ErrorEnablingOrbitApiEvent(event.clone()));
    }

    fn on_error_enabling_user_space_instrumentation_event(
        &mut self,
        event: &ErrorEnablingUserSpaceInstrumentationEvent,
    ) {
        self.calls
            .push(ListenerCall::ErrorEnablingUserSpaceInstrumentationEvent(event.clone()));
    }

    fn on_warning_instrumenting_with_user_space_instrumentation_event(
        &mut self,
        event: &WarningInstrumentingWithUserSpaceInstrumentationEvent,
    ) {
        self.calls.push(
            ListenerCall::WarningInstrumentingWithUserSpaceInstrumentationEvent(event.clone()),
        );
    }

    fn on_lost_perf_records_event(&mut self, event: &LostPerfRecordsEvent) {
        self.calls
            .push(ListenerCall::LostPerfRecordsEvent(event.clone()));
    }

    fn on_out_of_order_events_discarded_event(&mut self, event: &OutOfOrderEventsDiscardedEvent) {
        self.calls
            .push(ListenerCall::OutOfOrderEventsDiscardedEvent(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order_and_counts() {
        let mut listener = RecordingListener::new();
        listener.on_key_and_string(1, "main");
        listener.on_timer(&TimerInfo {
            start_ns: 1,
            end_ns: 2,
            ..Default::default()
        });
        listener.on_key_and_string(2, "worker");

        assert_eq!(listener.calls().len(), 3);
        assert_eq!(listener.calls()[0].method(), "key_and_string");
        assert_eq!(listener.timers().count(), 1);
        assert_eq!(listener.counts()["key_and_string"], 2);
    }

    #[test]
    fn test_json_is_tagged_by_method() {
        let mut listener = RecordingListener::new();
        listener.on_thread_name(7, "render");
        let json = listener.to_json().unwrap();
        assert_eq!(json, r#"[{"call":"thread_name","tid":7,"name":"render"}]"#);
    }
}
