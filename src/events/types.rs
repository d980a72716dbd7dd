//! Payloads carried by [`super::CaptureEvent`].
//!
//! Field names follow the capture producer. Timestamps are nanoseconds on the
//! capture clock, intern keys are `u64`, colours are packed `0xRRGGBBAA`.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    #[serde(default)]
    pub samples_per_second: f64,
    #[serde(default)]
    pub collect_scheduling_info: bool,
    #[serde(default)]
    pub collect_thread_states: bool,
    #[serde(default)]
    pub enable_api: bool,
    #[serde(default)]
    pub instrumented_function_ids: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStarted {
    pub process_id: u32,
    pub executable_path: String,
    pub capture_start_timestamp_ns: u64,
    #[serde(default)]
    pub capture_options: CaptureOptions,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFinishedStatus {
    #[default]
    Successful,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureFinished {
    #[serde(default)]
    pub status: CaptureFinishedStatus,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingSlice {
    pub pid: u32,
    pub tid: u32,
    pub core: u32,
    pub duration_ns: u64,
    pub out_timestamp_ns: u64,
}

/// How a callstack was obtained, or why it is incomplete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallstackType {
    #[default]
    Complete,
    DwarfUnwindingError,
    FramePointerUnwindingError,
    InUprobes,
    InUserSpaceInstrumentation,
    CallstackPatchingFailed,
    StackTopForDwarfUnwindingTooSmall,
    StackTopDwarfUnwindingError,
    Filtered,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Callstack {
    pub pcs: Vec<u64>,
    #[serde(default, rename = "type")]
    pub callstack_type: CallstackType,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InternedCallstack {
    pub key: u64,
    pub intern: Callstack,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallstackSample {
    pub pid: u32,
    pub tid: u32,
    pub callstack_id: u64,
    pub timestamp_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub pid: u32,
    pub tid: u32,
    pub function_id: u64,
    pub duration_ns: u64,
    pub end_timestamp_ns: u64,
    pub depth: u32,
    #[serde(default)]
    pub return_value: u64,
    #[serde(default)]
    pub registers: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InternedString {
    pub key: u64,
    pub intern: String,
}

/// Kernel-side record of one GPU job on an amdgpu timeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuJob {
    pub pid: u32,
    pub tid: u32,
    #[serde(default)]
    pub context: u32,
    #[serde(default)]
    pub seqno: u32,
    pub timeline_key: u64,
    pub depth: u32,
    pub amdgpu_cs_ioctl_time_ns: u64,
    pub amdgpu_sched_run_job_time_ns: u64,
    pub gpu_hardware_start_time_ns: u64,
    pub dma_fence_signaled_time_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadName {
    pub pid: u32,
    pub tid: u32,
    pub name: String,
    #[serde(default)]
    pub timestamp_ns: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadState {
    #[default]
    Running,
    Runnable,
    InterruptibleSleep,
    UninterruptibleSleep,
    Stopped,
    Traced,
    Dead,
    Zombie,
    Parked,
    Idle,
}

/// Wake-up reason as encoded on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeupReason {
    #[default]
    NotApplicable,
    Unblocked,
    Created,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadStateSlice {
    pub pid: u32,
    pub tid: u32,
    pub thread_state: ThreadState,
    pub duration_ns: u64,
    pub end_timestamp_ns: u64,
    #[serde(default)]
    pub wakeup_reason: WakeupReason,
    #[serde(default)]
    pub wakeup_tid: u32,
    #[serde(default)]
    pub wakeup_pid: u32,
    #[serde(default)]
    pub switch_out_or_wakeup_callstack_id: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub absolute_address: u64,
    pub offset_in_function: u64,
    pub function_name_key: u64,
    pub module_name_key: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InternedTracepointInfo {
    pub key: u64,
    pub category: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TracepointEvent {
    pub pid: u32,
    pub tid: u32,
    pub cpu: i32,
    pub timestamp_ns: u64,
    pub tracepoint_info_key: u64,
}

/// Identifies a `vkQueueSubmit` call by its submitting thread and the CPU
/// time window around the call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GpuQueueSubmissionMetaInfo {
    pub tid: u32,
    pub pid: u32,
    pub pre_submission_cpu_timestamp: u64,
    pub post_submission_cpu_timestamp: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCommandBuffer {
    pub begin_gpu_timestamp_ns: u64,
    pub end_gpu_timestamp_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSubmitInfo {
    pub command_buffers: Vec<GpuCommandBuffer>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerColor {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

/// Begin half of a debug marker, possibly recorded in an earlier submission.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDebugMarkerBeginInfo {
    pub meta_info: GpuQueueSubmissionMetaInfo,
    pub gpu_timestamp_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuDebugMarker {
    pub text_key: u64,
    #[serde(default)]
    pub color: Option<MarkerColor>,
    pub depth: u32,
    pub end_gpu_timestamp_ns: u64,
    #[serde(default)]
    pub begin_marker: Option<GpuDebugMarkerBeginInfo>,
}

/// Application-side record of one queue submission.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuQueueSubmission {
    pub meta_info: GpuQueueSubmissionMetaInfo,
    #[serde(default)]
    pub queue: u64,
    #[serde(default)]
    pub submit_infos: Vec<GpuSubmitInfo>,
    #[serde(default)]
    pub completed_markers: Vec<GpuDebugMarker>,
    #[serde(default)]
    pub num_begin_markers: u32,
}

impl GpuQueueSubmission {
    pub fn first_command_buffer(&self) -> Option<&GpuCommandBuffer> {
        self.command_buffers().next()
    }

    pub fn command_buffers(&self) -> impl Iterator<Item = &GpuCommandBuffer> {
        self.submit_infos
            .iter()
            .flat_map(|submit| submit.command_buffers.iter())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub file_path: String,
    #[serde(default)]
    pub file_size: u64,
    pub address_start: u64,
    pub address_end: u64,
    #[serde(default)]
    pub build_id: String,
    #[serde(default)]
    pub load_bias: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModulesSnapshot {
    pub pid: u32,
    pub timestamp_ns: u64,
    pub modules: Vec<ModuleInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleUpdateEvent {
    pub pid: u32,
    pub timestamp_ns: u64,
    pub module: ModuleInfo,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentSource {
    #[default]
    Unknown,
    D3d9,
    Dxgi,
    Vulkan,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PresentEvent {
    #[serde(default)]
    pub source: PresentSource,
    pub pid: u32,
    pub tid: u32,
    pub begin_timestamp_ns: u64,
    pub end_timestamp_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreadNamesSnapshot {
    pub timestamp_ns: u64,
    pub thread_names: Vec<ThreadName>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMemoryUsage {
    pub timestamp_ns: u64,
    pub total_kb: i64,
    pub free_kb: i64,
    pub available_kb: i64,
    pub buffers_kb: i64,
    pub cached_kb: i64,
    pub pgfault: i64,
    pub pgmajfault: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CGroupMemoryUsage {
    pub timestamp_ns: u64,
    pub cgroup_name: String,
    pub limit_bytes: i64,
    pub rss_bytes: i64,
    pub mapped_file_bytes: i64,
    pub pgfault: i64,
    pub pgmajfault: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMemoryUsage {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub rss_anon_kb: i64,
    pub minflt: i64,
    pub majflt: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsageEvent {
    pub timestamp_ns: u64,
    #[serde(default)]
    pub system_memory_usage: Option<SystemMemoryUsage>,
    #[serde(default)]
    pub cgroup_memory_usage: Option<CGroupMemoryUsage>,
    #[serde(default)]
    pub process_memory_usage: Option<ProcessMemoryUsage>,
}

/// A name packed into 64-bit words, eight bytes per word, little-endian.
///
/// Decoding lives in [`crate::api::encoded_name`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedName {
    pub slots: [u64; 8],
    #[serde(default)]
    pub additional: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiScopeStart {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub name: EncodedName,
    #[serde(default)]
    pub color_rgba: u32,
    #[serde(default)]
    pub group_id: u64,
    #[serde(default)]
    pub address_in_function: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiScopeStartAsync {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub name: EncodedName,
    #[serde(default)]
    pub color_rgba: u32,
    pub id: u64,
    #[serde(default)]
    pub address_in_function: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiScopeStop {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiScopeStopAsync {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub id: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiStringEvent {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub name: EncodedName,
    #[serde(default)]
    pub color_rgba: u32,
    pub id: u64,
}

/// A sample of a named variable. `T` is the wire type of the value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiTrackValue<T> {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub name: EncodedName,
    #[serde(default)]
    pub color_rgba: u32,
    pub data: T,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub timestamp_ns: u64,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockResolutionEvent {
    pub timestamp_ns: u64,
    pub clock_resolution_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorsWithPerfEventOpenEvent {
    pub timestamp_ns: u64,
    pub failed_to_open: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionThatFailedToBeInstrumented {
    pub function_id: u64,
    pub error_message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningInstrumentingWithUprobesEvent {
    pub timestamp_ns: u64,
    pub functions_that_failed_to_instrument: Vec<FunctionThatFailedToBeInstrumented>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnablingOrbitApiEvent {
    pub timestamp_ns: u64,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnablingUserSpaceInstrumentationEvent {
    pub timestamp_ns: u64,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WarningInstrumentingWithUserSpaceInstrumentationEvent {
    pub timestamp_ns: u64,
    pub functions_that_failed_to_instrument: Vec<FunctionThatFailedToBeInstrumented>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LostPerfRecordsEvent {
    pub duration_ns: u64,
    pub end_timestamp_ns: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutOfOrderEventsDiscardedEvent {
    pub duration_ns: u64,
    pub end_timestamp_ns: u64,
}
