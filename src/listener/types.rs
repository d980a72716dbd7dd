//! Derived payloads published to a [`super::CaptureListener`].
//!
//! These sit between the wire events and whatever consumes the capture. Wire
//! payloads that need no translation are forwarded as-is and are not
//! repeated here.

use serde::{Deserialize, Serialize};

use crate::events::{CallstackType, ThreadState};

/// Frames of a callstack, published once per callstack id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallstackInfo {
    pub frames: Vec<u64>,
    pub callstack_type: CallstackType,
}

/// One sample citing a previously published callstack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallstackEvent {
    pub timestamp_ns: u64,
    pub callstack_id: u64,
    pub tid: u32,
}

/// Wake-up reason of a thread state slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceWakeupReason {
    NotApplicable,
    Unblocked,
    Created,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadStateSliceInfo {
    pub tid: u32,
    pub thread_state: ThreadState,
    pub begin_timestamp_ns: u64,
    pub end_timestamp_ns: u64,
    pub wakeup_reason: SliceWakeupReason,
    pub wakeup_tid: u32,
    pub wakeup_pid: u32,
    pub switch_out_or_wakeup_callstack_id: Option<u64>,
}

/// Address resolved to a demangled function within a module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxAddressInfo {
    pub absolute_address: u64,
    pub offset_in_function: u64,
    pub module_path: String,
    pub function_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracepointInfo {
    pub category: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracepointEventInfo {
    pub pid: u32,
    pub tid: u32,
    pub cpu: i32,
    pub timestamp_ns: u64,
    pub tracepoint_info_key: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMemoryInfo {
    pub timestamp_ns: u64,
    pub total_kb: i64,
    pub free_kb: i64,
    pub available_kb: i64,
    pub buffers_kb: i64,
    pub cached_kb: i64,
}

/// Cgroup and process memory at one timestamp. The cgroup name is interned
/// and referenced by `cgroup_name_hash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CGroupAndProcessMemoryInfo {
    pub timestamp_ns: u64,
    pub cgroup_name_hash: u64,
    pub cgroup_limit_bytes: i64,
    pub cgroup_rss_bytes: i64,
    pub cgroup_mapped_file_bytes: i64,
    pub process_rss_anon_kb: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFaultsInfo {
    pub timestamp_ns: u64,
    pub system_page_faults: i64,
    pub system_major_page_faults: i64,
    pub cgroup_name_hash: u64,
    pub cgroup_page_faults: i64,
    pub cgroup_major_page_faults: i64,
    pub process_minor_page_faults: i64,
    pub process_major_page_faults: i64,
}

/// A string attached to an async scope id by the instrumentation API.
///
/// `should_concatenate` is only set when replaying captures whose strings were
/// split over several events sharing one id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiStringEventInfo {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub async_scope_id: u64,
    pub name: String,
    pub should_concatenate: bool,
}

/// One sample of a named variable, widened to `f64`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiTrackValueInfo {
    pub pid: u32,
    pub tid: u32,
    pub timestamp_ns: u64,
    pub track_name: String,
    pub value: f64,
}
