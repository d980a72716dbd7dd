//! The sink side of capture processing.
//!
//! [`CaptureListener`] is the full set of calls the demultiplexer makes while
//! it works through a capture. Every call happens synchronously on the thread
//! that drives [`crate::capture::CaptureEventProcessor::process`], and a
//! listener must not call back into the processor.
//!
//! Payloads that arrive on the wire unchanged are passed by reference. Payloads
//! derived by the processor are passed by value; see [`types`].

pub mod recording;
pub mod summary;
pub mod types;

use std::collections::BTreeSet;
use std::path::Path;

pub use recording::{ListenerCall, RecordingListener};
pub use summary::SummaryListener;
pub use types::*;

use crate::events::{
    CaptureFinished, CaptureStarted, ClockResolutionEvent, ErrorEnablingOrbitApiEvent,
    ErrorEnablingUserSpaceInstrumentationEvent, ErrorsWithPerfEventOpenEvent,
    LostPerfRecordsEvent, ModuleInfo, OutOfOrderEventsDiscardedEvent, PresentEvent, WarningEvent,
    WarningInstrumentingWithUprobesEvent, WarningInstrumentingWithUserSpaceInstrumentationEvent,
};
use crate::timer::TimerInfo;

/// Receives everything derived from one capture.
pub trait CaptureListener {
    /// The capture began. `file_path` is set when replaying from disk.
    fn on_capture_started(
        &mut self,
        capture_started: &CaptureStarted,
        file_path: Option<&Path>,
        frame_track_function_ids: &BTreeSet<u64>,
    );

    fn on_capture_finished(&mut self, capture_finished: &CaptureFinished);

    /// A complete timer: scheduling slice, function call, API scope or GPU work.
    fn on_timer(&mut self, timer: &TimerInfo);

    /// A string became available under `key`. Called at most once per key.
    fn on_key_and_string(&mut self, key: u64, value: &str);

    /// A callstack is about to be cited for the first time.
    fn on_unique_callstack(&mut self, callstack_id: u64, callstack: CallstackInfo);

    fn on_callstack_event(&mut self, callstack_event: CallstackEvent);

    fn on_thread_name(&mut self, tid: u32, thread_name: &str);

    fn on_thread_state_slice(&mut self, thread_state_slice: ThreadStateSliceInfo);

    fn on_address_info(&mut self, address_info: LinuxAddressInfo);

    fn on_unique_tracepoint_info(&mut self, key: u64, tracepoint_info: TracepointInfo);

    fn on_tracepoint_event(&mut self, tracepoint_event: TracepointEventInfo);

    fn on_module_update(&mut self, timestamp_ns: u64, module_info: &ModuleInfo);

    fn on_modules_snapshot(&mut self, timestamp_ns: u64, module_infos: &[ModuleInfo]);

    fn on_present_event(&mut self, present_event: &PresentEvent);

    fn on_system_memory_info(&mut self, system_memory_info: SystemMemoryInfo);

    fn on_cgroup_and_process_memory_info(&mut self, memory_info: CGroupAndProcessMemoryInfo);

    fn on_page_faults_info(&mut self, page_faults_info: PageFaultsInfo);

    fn on_api_string_event(&mut self, api_string_event: ApiStringEventInfo);

    fn on_api_track_value(&mut self, api_track_value: ApiTrackValueInfo);

    fn on_warning_event(&mut self, warning_event: &WarningEvent);

    fn on_clock_resolution_event(&mut self, clock_resolution_event: &ClockResolutionEvent);

    fn on_errors_with_perf_event_open_event(&mut self, event: &ErrorsWithPerfEventOpenEvent);

    fn on_warning_instrumenting_with_uprobes_event(
        &mut self,
        event: &WarningInstrumentingWithUprobesEvent,
    );

    fn on_error_enabling_orbit_api_event(&mut self, event: &ErrorEnablingOrbitApiEvent);

    fn on_error_enabling_user_space_instrumentation_event(
        &mut self,
        event: &ErrorEnablingUserSpaceInstrumentationEvent,
    );

    fn on_warning_instrumenting_with_user_space_instrumentation_event(
        &mut self,
        event: &WarningInstrumentingWithUserSpaceInstrumentationEvent,
    );

    fn on_lost_perf_records_event(&mut self, event: &LostPerfRecordsEvent);

    fn on_out_of_order_events_discarded_event(&mut self, event: &OutOfOrderEventsDiscardedEvent);
}
