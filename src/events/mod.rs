//! Capture events as they arrive from the instrumented process.
//!
//! [`CaptureEvent`] is a tagged sum over every event kind the producer
//! emits. On the wire the tag is the `kind` field of each frame, see
//! [`crate::wire`]. Frames with a tag this build does not know decode to
//! [`CaptureEvent::Unknown`] so older readers keep working on newer captures.

mod types;

pub use types::*;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CaptureEvent {
    CaptureStarted(CaptureStarted),
    CaptureFinished(CaptureFinished),
    SchedulingSlice(SchedulingSlice),
    InternedCallstack(InternedCallstack),
    CallstackSample(CallstackSample),
    FunctionCall(FunctionCall),
    InternedString(InternedString),
    GpuJob(GpuJob),
    ThreadName(ThreadName),
    ThreadStateSlice(ThreadStateSlice),
    AddressInfo(AddressInfo),
    InternedTracepointInfo(InternedTracepointInfo),
    TracepointEvent(TracepointEvent),
    GpuQueueSubmission(GpuQueueSubmission),
    ModulesSnapshot(ModulesSnapshot),
    PresentEvent(PresentEvent),
    ThreadNamesSnapshot(ThreadNamesSnapshot),
    ModuleUpdateEvent(ModuleUpdateEvent),
    MemoryUsageEvent(MemoryUsageEvent),
    ApiScopeStart(ApiScopeStart),
    ApiScopeStartAsync(ApiScopeStartAsync),
    ApiScopeStop(ApiScopeStop),
    ApiScopeStopAsync(ApiScopeStopAsync),
    ApiStringEvent(ApiStringEvent),
    ApiTrackDouble(ApiTrackValue<f64>),
    ApiTrackFloat(ApiTrackValue<f32>),
    ApiTrackInt(ApiTrackValue<i32>),
    ApiTrackInt64(ApiTrackValue<i64>),
    ApiTrackUint(ApiTrackValue<u32>),
    ApiTrackUint64(ApiTrackValue<u64>),
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
    #[serde(other)]
    Unknown,
}

impl CaptureEvent {
    /// The wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureEvent::CaptureStarted(_) => "capture_started",
            CaptureEvent::CaptureFinished(_) => "capture_finished",
            CaptureEvent::SchedulingSlice(_) => "scheduling_slice",
            CaptureEvent::InternedCallstack(_) => "interned_callstack",
            CaptureEvent::CallstackSample(_) => "callstack_sample",
            CaptureEvent::FunctionCall(_) => "function_call",
            CaptureEvent::InternedString(_) => "interned_string",
            CaptureEvent::GpuJob(_) => "gpu_job",
            CaptureEvent::ThreadName(_) => "thread_name",
            CaptureEvent::ThreadStateSlice(_) => "thread_state_slice",
            CaptureEvent::AddressInfo(_) => "address_info",
            CaptureEvent::InternedTracepointInfo(_) => "interned_tracepoint_info",
            CaptureEvent::TracepointEvent(_) => "tracepoint_event",
            CaptureEvent::GpuQueueSubmission(_) => "gpu_queue_submission",
            CaptureEvent::ModulesSnapshot(_) => "modules_snapshot",
            CaptureEvent::PresentEvent(_) => "present_event",
            CaptureEvent::ThreadNamesSnapshot(_) => "thread_names_snapshot",
            CaptureEvent::ModuleUpdateEvent(_) => "module_update_event",
            CaptureEvent::MemoryUsageEvent(_) => "memory_usage_event",
            CaptureEvent::ApiScopeStart(_) => "api_scope_start",
            CaptureEvent::ApiScopeStartAsync(_) => "api_scope_start_async",
            CaptureEvent::ApiScopeStop(_) => "api_scope_stop",
            CaptureEvent::ApiScopeStopAsync(_) => "api_scope_stop_async",
            CaptureEvent::ApiStringEvent(_) => "api_string_event",
            CaptureEvent::ApiTrackDouble(_) => "api_track_double",
            CaptureEvent::ApiTrackFloat(_) => "api_track_float",
            CaptureEvent::ApiTrackInt(_) => "api_track_int",
            CaptureEvent::ApiTrackInt64(_) => "api_track_int64",
            CaptureEvent::ApiTrackUint(_) => "api_track_uint",
            CaptureEvent::ApiTrackUint64(_) => "api_track_uint64",
            CaptureEvent::WarningEvent(_) => "warning_event",
            CaptureEvent::ClockResolutionEvent(_) => "clock_resolution_event",
            CaptureEvent::ErrorsWithPerfEventOpenEvent(_) => "errors_with_perf_event_open_event",
            CaptureEvent::WarningInstrumentingWithUprobesEvent(_) => {
                "warning_instrumenting_with_uprobes_event"
            }
            CaptureEvent::ErrorEnablingOrbitApiEvent(_) => "error_enabling_orbit_api_event",
            CaptureEvent::ErrorEnablingUserSpaceInstrumentationEvent(_) => {
                "error_enabling_user_space_instrumentation_event"
            }
            CaptureEvent::WarningInstrumentingWithUserSpaceInstrumentationEvent(_) => {
                "warning_instrumenting_with_user_space_instrumentation_event"
            }
            CaptureEvent::LostPerfRecordsEvent(_) => "lost_perf_records_event",
            CaptureEvent::OutOfOrderEventsDiscardedEvent(_) => {
                "out_of_order_events_discarded_event"
            }
            CaptureEvent::Unknown => "unknown",
        }
    }
}
