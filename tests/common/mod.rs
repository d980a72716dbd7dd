//! Common test utilities for capline integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use capline::events::*;
use capline::listener::{ListenerCall, RecordingListener};
use capline::wire::CaptureEventWriter;
use capline::CaptureEventProcessor;

pub const PID: u32 = 1;

pub fn scope_start(tid: u32, timestamp_ns: u64, name: &str) -> CaptureEvent {
    CaptureEvent::ApiScopeStart(ApiScopeStart {
        pid: PID,
        tid,
        timestamp_ns,
        name: EncodedName::encode(name),
        ..Default::default()
    })
}

pub fn scope_stop(tid: u32, timestamp_ns: u64) -> CaptureEvent {
    CaptureEvent::ApiScopeStop(ApiScopeStop {
        pid: PID,
        tid,
        timestamp_ns,
    })
}

pub fn async_start(tid: u32, id: u64, timestamp_ns: u64, name: &str) -> CaptureEvent {
    CaptureEvent::ApiScopeStartAsync(ApiScopeStartAsync {
        pid: PID,
        tid,
        timestamp_ns,
        name: EncodedName::encode(name),
        id,
        ..Default::default()
    })
}

pub fn async_stop(tid: u32, id: u64, timestamp_ns: u64) -> CaptureEvent {
    CaptureEvent::ApiScopeStopAsync(ApiScopeStopAsync {
        pid: PID,
        tid,
        timestamp_ns,
        id,
    })
}

pub fn interned_string(key: u64, value: &str) -> CaptureEvent {
    CaptureEvent::InternedString(InternedString {
        key,
        intern: value.to_string(),
    })
}

pub fn interned_callstack(key: u64, pcs: &[u64]) -> CaptureEvent {
    CaptureEvent::InternedCallstack(InternedCallstack {
        key,
        intern: Callstack {
            pcs: pcs.to_vec(),
            callstack_type: CallstackType::Complete,
        },
    })
}

pub fn callstack_sample(tid: u32, callstack_id: u64, timestamp_ns: u64) -> CaptureEvent {
    CaptureEvent::CallstackSample(CallstackSample {
        pid: PID,
        tid,
        callstack_id,
        timestamp_ns,
    })
}

pub fn function_call(
    tid: u32,
    function_id: u64,
    start_ns: u64,
    end_ns: u64,
    depth: u32,
) -> CaptureEvent {
    CaptureEvent::FunctionCall(FunctionCall {
        pid: PID,
        tid,
        function_id,
        duration_ns: end_ns - start_ns,
        end_timestamp_ns: end_ns,
        depth,
        ..Default::default()
    })
}

pub fn scheduling_slice(tid: u32, core: u32, start_ns: u64, end_ns: u64) -> CaptureEvent {
    CaptureEvent::SchedulingSlice(SchedulingSlice {
        pid: PID,
        tid,
        core,
        duration_ns: end_ns - start_ns,
        out_timestamp_ns: end_ns,
    })
}

pub fn gpu_job(
    tid: u32,
    timeline_key: u64,
    ioctl_ns: u64,
    sched_ns: u64,
    hw_start_ns: u64,
    fence_ns: u64,
) -> CaptureEvent {
    CaptureEvent::GpuJob(GpuJob {
        pid: PID,
        tid,
        timeline_key,
        depth: 0,
        amdgpu_cs_ioctl_time_ns: ioctl_ns,
        amdgpu_sched_run_job_time_ns: sched_ns,
        gpu_hardware_start_time_ns: hw_start_ns,
        dma_fence_signaled_time_ns: fence_ns,
        ..Default::default()
    })
}

pub fn queue_submission(
    tid: u32,
    pre_ns: u64,
    post_ns: u64,
    command_buffers: &[(u64, u64)],
) -> CaptureEvent {
    CaptureEvent::GpuQueueSubmission(GpuQueueSubmission {
        meta_info: GpuQueueSubmissionMetaInfo {
            tid,
            pid: PID,
            pre_submission_cpu_timestamp: pre_ns,
            post_submission_cpu_timestamp: post_ns,
        },
        submit_infos: vec![GpuSubmitInfo {
            command_buffers: command_buffers
                .iter()
                .map(|&(begin, end)| GpuCommandBuffer {
                    begin_gpu_timestamp_ns: begin,
                    end_gpu_timestamp_ns: end,
                })
                .collect(),
        }],
        ..Default::default()
    })
}

/// Run `events` through a fresh processor, stopping at the first fatal error.
pub fn run(events: &[CaptureEvent]) -> CaptureEventProcessor<RecordingListener> {
    let mut processor = CaptureEventProcessor::new(RecordingListener::new());
    for event in events {
        if processor.process(event).is_err() {
            break;
        }
    }
    processor
}

pub fn methods(calls: &[ListenerCall]) -> Vec<&'static str> {
    calls.iter().map(ListenerCall::method).collect()
}

pub fn encode_capture(events: &[CaptureEvent]) -> Vec<u8> {
    let mut writer = CaptureEventWriter::new(Vec::new());
    for event in events {
        writer.write_event(event).unwrap();
    }
    writer.into_inner()
}

pub fn write_capture(dir: &Path, name: &str, events: &[CaptureEvent]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, encode_capture(events)).unwrap();
    path
}
