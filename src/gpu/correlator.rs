//! Joins kernel GPU jobs with Vulkan queue submissions.
//!
//! The kernel reports when a job was submitted through `amdgpu_cs_ioctl`, when
//! the scheduler picked it up, when the hardware started it and when its
//! fence signalled. The Vulkan layer reports, for each `vkQueueSubmit`, the
//! CPU window around the call and GPU timestamps written into the command
//! buffers. A job belongs to the submission whose CPU window, on the same
//! thread, contains the ioctl. Once both halves are known the GPU timestamps
//! are moved onto the CPU clock by anchoring the first command buffer's begin
//! at the job's hardware start.
//!
//! Either half may arrive first. The unmatched half waits in a per-thread map
//! keyed by its CPU timestamp. Submissions that open debug markers whose end
//! lands in a later submission, and the jobs matching them, are kept until
//! every such marker has been closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, error};

use crate::events::{GpuCommandBuffer, GpuJob, GpuQueueSubmission};
use crate::intern::InternTables;
use crate::timer::{Color, TimerInfo, TimerType, UNKNOWN_TID};

pub const SW_QUEUE_LABEL: &str = "sw queue";
pub const HW_QUEUE_LABEL: &str = "hw queue";
pub const HW_EXECUTION_LABEL: &str = "hw execution";
pub const COMMAND_BUFFER_LABEL: &str = "command buffer";

/// DXVK labels encode a group id as `DXVK__vkFunctionName#GROUP_ID`.
static DXVK_GROUP_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DXVK__.*#(\d+)$").expect("Invalid DXVK label regex pattern")
});

/// Resolves a label to its string key, publishing the string on first use.
pub type LabelKeyFn<'a> = dyn FnMut(&str) -> u64 + 'a;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GpuStats {
    pub jobs: u64,
    pub submissions: u64,
    pub joins: u64,
    pub command_buffer_timers: u64,
    pub debug_marker_timers: u64,
    /// Joins dropped because the submission started before the capture.
    pub dropped_before_capture: u64,
    /// Joins dropped because the first command buffer has no begin timestamp.
    pub missing_first_timestamp: u64,
    /// Markers whose begin submission was no longer known.
    pub discarded_markers: u64,
    pub discarded_pending_jobs: u64,
    pub discarded_pending_submissions: u64,
}

/// Result of joining one submission with one job.
#[derive(Debug, Default)]
struct Join {
    timers: Vec<TimerInfo>,
    /// `(tid, job ioctl time, submission post time)` of every begin marker
    /// consumed by this join.
    consumed_begin_markers: Vec<(u32, u64, u64)>,
    discarded_markers: u64,
    outcome: JoinOutcome,
}

#[derive(Debug, Default, PartialEq, Eq)]
enum JoinOutcome {
    #[default]
    Joined,
    BeforeCapture,
    MissingFirstTimestamp,
}

#[derive(Debug)]
pub struct GpuCorrelator {
    submissions_by_tid: HashMap<u32, BTreeMap<u64, GpuQueueSubmission>>,
    jobs_by_tid: HashMap<u32, BTreeMap<u64, GpuJob>>,
    begin_markers_by_tid: HashMap<u32, BTreeMap<u64, u32>>,
    begin_capture_time_ns: u64,
    stats: GpuStats,
}

impl Default for GpuCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

fn depth_u8(depth: u32) -> u8 {
    u8::try_from(depth).unwrap_or(u8::MAX)
}

/// Move a GPU timestamp onto the CPU clock. Timestamps are unsigned and may
/// precede the anchor, so the arithmetic wraps and cancels out.
fn gpu_to_cpu(gpu_timestamp_ns: u64, anchor_gpu_ns: u64, anchor_cpu_ns: u64) -> u64 {
    gpu_timestamp_ns
        .wrapping_sub(anchor_gpu_ns)
        .wrapping_add(anchor_cpu_ns)
}

/// Parse the group id out of a DXVK debug label.
pub fn dxvk_group_id(label: &str) -> Option<u64> {
    DXVK_GROUP_ID_RE
        .captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

impl GpuCorrelator {
    pub fn new() -> Self {
        Self {
            submissions_by_tid: HashMap::new(),
            jobs_by_tid: HashMap::new(),
            begin_markers_by_tid: HashMap::new(),
            begin_capture_time_ns: u64::MAX,
            stats: GpuStats::default(),
        }
    }

    pub fn stats(&self) -> &GpuStats {
        &self.stats
    }

    /// Earliest timestamp seen so far, `u64::MAX` before any event.
    pub fn begin_capture_time_ns(&self) -> u64 {
        self.begin_capture_time_ns
    }

    pub fn update_begin_capture_time(&mut self, timestamp_ns: u64) {
        self.begin_capture_time_ns = self.begin_capture_time_ns.min(timestamp_ns);
    }

    pub fn num_pending_jobs(&self) -> usize {
        self.jobs_by_tid.values().map(BTreeMap::len).sum()
    }

    pub fn num_pending_submissions(&self) -> usize {
        self.submissions_by_tid.values().map(BTreeMap::len).sum()
    }

    /// Timers for a kernel GPU job: its three queue phases, then the command
    /// buffers and debug markers of the matching submission if it is known.
    pub fn process_gpu_job(
        &mut self,
        job: &GpuJob,
        strings: &InternTables,
        label_key: &mut LabelKeyFn<'_>,
    ) -> Vec<TimerInfo> {
        self.stats.jobs += 1;
        self.update_begin_capture_time(job.amdgpu_cs_ioctl_time_ns);

        let mut timers = gpu_activity_timers(job, label_key);

        let tid = job.tid;
        let ioctl_ns = job.amdgpu_cs_ioctl_time_ns;
        let Some(post_ns) = self.find_matching_submission(tid, ioctl_ns) else {
            self.save_job(job);
            return timers;
        };
        let has_begin_markers = self
            .submission(tid, post_ns)
            .is_some_and(|submission| submission.num_begin_markers > 0);
        if has_begin_markers {
            self.save_job(job);
        }

        let Some(submission) = self.submission(tid, post_ns) else {
            return timers;
        };
        let join = self.join(submission, job, strings, label_key);
        timers.extend(self.finish_join(join));

        if !self.has_unprocessed_begin_markers(tid, post_ns) {
            self.delete_saved_submission(tid, post_ns);
        }
        timers
    }

    /// Timers for a queue submission whose job already arrived, or nothing if
    /// the job is still outstanding.
    pub fn process_gpu_queue_submission(
        &mut self,
        submission: &GpuQueueSubmission,
        strings: &InternTables,
        label_key: &mut LabelKeyFn<'_>,
    ) -> Vec<TimerInfo> {
        self.stats.submissions += 1;

        let meta = submission.meta_info;
        let tid = meta.tid;
        let post_ns = meta.post_submission_cpu_timestamp;
        let matching_job =
            self.find_matching_job(tid, meta.pre_submission_cpu_timestamp, post_ns);

        if matching_job.is_none() || submission.num_begin_markers > 0 {
            self.submissions_by_tid
                .entry(tid)
                .or_default()
                .insert(post_ns, submission.clone());
        }
        if submission.num_begin_markers > 0 {
            self.begin_markers_by_tid
                .entry(tid)
                .or_default()
                .insert(post_ns, submission.num_begin_markers);
        }
        let Some(ioctl_ns) = matching_job else {
            return Vec::new();
        };
        let Some(job) = self.job(tid, ioctl_ns) else {
            return Vec::new();
        };

        let join = self.join(submission, job, strings, label_key);
        let timers = self.finish_join(join);

        if !self.has_unprocessed_begin_markers(tid, post_ns) {
            self.delete_saved_job(tid, ioctl_ns);
        }
        timers
    }

    /// Drop every half that is still waiting for its partner.
    pub fn capture_finished(&mut self) {
        let jobs = self.num_pending_jobs() as u64;
        let submissions = self.num_pending_submissions() as u64;
        if jobs + submissions > 0 {
            debug!(
                "Discarding {} unmatched GPU jobs and {} unmatched queue submissions",
                jobs, submissions
            );
        }
        self.stats.discarded_pending_jobs += jobs;
        self.stats.discarded_pending_submissions += submissions;
        self.jobs_by_tid.clear();
        self.submissions_by_tid.clear();
        self.begin_markers_by_tid.clear();
    }

    fn submission(&self, tid: u32, post_ns: u64) -> Option<&GpuQueueSubmission> {
        self.submissions_by_tid.get(&tid)?.get(&post_ns)
    }

    fn job(&self, tid: u32, ioctl_ns: u64) -> Option<&GpuJob> {
        self.jobs_by_tid.get(&tid)?.get(&ioctl_ns)
    }

    fn save_job(&mut self, job: &GpuJob) {
        self.jobs_by_tid
            .entry(job.tid)
            .or_default()
            .insert(job.amdgpu_cs_ioctl_time_ns, job.clone());
    }

    /// Post-submission time of the saved submission on `tid` whose CPU window
    /// contains `ioctl_ns`: the first one ending at or after the ioctl, if it
    /// also began at or before it.
    fn find_matching_submission(&self, tid: u32, ioctl_ns: u64) -> Option<u64> {
        let (&post_ns, submission) = self.submissions_by_tid.get(&tid)?.range(ioctl_ns..).next()?;
        (submission.meta_info.pre_submission_cpu_timestamp <= ioctl_ns).then_some(post_ns)
    }

    /// Ioctl time of the single saved job on `tid` inside `[pre_ns, post_ns]`.
    fn find_matching_job(&self, tid: u32, pre_ns: u64, post_ns: u64) -> Option<u64> {
        let jobs = self.jobs_by_tid.get(&tid)?;
        let (&first_after_pre, _) = jobs.range(pre_ns..).next()?;
        let (&last_before_post, _) = jobs.range(..=post_ns).next_back()?;
        (first_after_pre == last_before_post).then_some(first_after_pre)
    }

    fn has_unprocessed_begin_markers(&self, tid: u32, post_ns: u64) -> bool {
        self.begin_markers_by_tid
            .get(&tid)
            .is_some_and(|counts| counts.contains_key(&post_ns))
    }

    fn decrement_begin_markers(&mut self, tid: u32, ioctl_ns: u64, post_ns: u64) {
        let Some(counts) = self.begin_markers_by_tid.get_mut(&tid) else {
            return;
        };
        let Some(count) = counts.get_mut(&post_ns) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }
        counts.remove(&post_ns);
        if counts.is_empty() {
            self.begin_markers_by_tid.remove(&tid);
        }
        self.delete_saved_job(tid, ioctl_ns);
        self.delete_saved_submission(tid, post_ns);
    }

    fn delete_saved_job(&mut self, tid: u32, ioctl_ns: u64) {
        if let Some(jobs) = self.jobs_by_tid.get_mut(&tid) {
            jobs.remove(&ioctl_ns);
            if jobs.is_empty() {
                self.jobs_by_tid.remove(&tid);
            }
        }
    }

    fn delete_saved_submission(&mut self, tid: u32, post_ns: u64) {
        if let Some(submissions) = self.submissions_by_tid.get_mut(&tid) {
            submissions.remove(&post_ns);
            if submissions.is_empty() {
                self.submissions_by_tid.remove(&tid);
            }
        }
    }

    fn finish_join(&mut self, join: Join) -> Vec<TimerInfo> {
        match join.outcome {
            JoinOutcome::Joined => self.stats.joins += 1,
            JoinOutcome::BeforeCapture => self.stats.dropped_before_capture += 1,
            JoinOutcome::MissingFirstTimestamp => self.stats.missing_first_timestamp += 1,
        }
        self.stats.discarded_markers += join.discarded_markers;
        for timer in &join.timers {
            match timer.timer_type {
                TimerType::GpuCommandBuffer => self.stats.command_buffer_timers += 1,
                TimerType::GpuDebugMarker => self.stats.debug_marker_timers += 1,
                _ => {}
            }
        }
        // Only now, the begin submission may be the one just joined.
        for (tid, ioctl_ns, post_ns) in join.consumed_begin_markers {
            self.decrement_begin_markers(tid, ioctl_ns, post_ns);
        }
        join.timers
    }

    fn join(
        &self,
        submission: &GpuQueueSubmission,
        job: &GpuJob,
        strings: &InternTables,
        label_key: &mut LabelKeyFn<'_>,
    ) -> Join {
        let pre_ns = submission.meta_info.pre_submission_cpu_timestamp;
        let begin_ns = self.begin_capture_time_ns;
        if pre_ns < begin_ns && begin_ns < job.amdgpu_cs_ioctl_time_ns {
            debug!(
                "Dropping GPU submission at {} that started before the capture at {}",
                pre_ns, self.begin_capture_time_ns
            );
            return Join {
                outcome: JoinOutcome::BeforeCapture,
                ..Default::default()
            };
        }

        let first_command_buffer = submission.first_command_buffer().copied();
        // The first command buffer anchors GPU time. Without its begin
        // timestamp the capture started while the submission was executing.
        if first_command_buffer.is_some_and(|cb| cb.begin_gpu_timestamp_ns == 0) {
            return Join {
                outcome: JoinOutcome::MissingFirstTimestamp,
                ..Default::default()
            };
        }
        let Some(first_command_buffer) = first_command_buffer else {
            return Join::default();
        };

        let mut join = Join {
            timers: self.command_buffer_timers(submission, job, &first_command_buffer, label_key),
            ..Default::default()
        };
        self.debug_marker_timers(submission, job, &first_command_buffer, strings, &mut join);
        join
    }

    fn command_buffer_timers(
        &self,
        submission: &GpuQueueSubmission,
        job: &GpuJob,
        first_command_buffer: &GpuCommandBuffer,
        label_key: &mut LabelKeyFn<'_>,
    ) -> Vec<TimerInfo> {
        let command_buffer_key = label_key(COMMAND_BUFFER_LABEL);
        let anchor_gpu_ns = first_command_buffer.begin_gpu_timestamp_ns;
        let anchor_cpu_ns = job.gpu_hardware_start_time_ns;

        submission
            .command_buffers()
            .map(|command_buffer| {
                let start_ns = if command_buffer.begin_gpu_timestamp_ns != 0 {
                    gpu_to_cpu(command_buffer.begin_gpu_timestamp_ns, anchor_gpu_ns, anchor_cpu_ns)
                } else {
                    self.begin_capture_time_ns
                };
                TimerInfo {
                    start_ns,
                    end_ns: gpu_to_cpu(
                        command_buffer.end_gpu_timestamp_ns,
                        anchor_gpu_ns,
                        anchor_cpu_ns,
                    ),
                    pid: submission.meta_info.pid as i32,
                    tid: submission.meta_info.tid as i32,
                    depth: depth_u8(job.depth),
                    timer_type: TimerType::GpuCommandBuffer,
                    user_data_key: Some(command_buffer_key),
                    timeline_hash: Some(job.timeline_key),
                    ..Default::default()
                }
            })
            .collect()
    }

    fn debug_marker_timers(
        &self,
        submission: &GpuQueueSubmission,
        job: &GpuJob,
        first_command_buffer: &GpuCommandBuffer,
        strings: &InternTables,
        join: &mut Join,
    ) {
        let meta = submission.meta_info;

        for marker in &submission.completed_markers {
            let mut timer = TimerInfo {
                pid: meta.pid as i32,
                depth: depth_u8(marker.depth),
                timer_type: TimerType::GpuDebugMarker,
                timeline_hash: Some(job.timeline_key),
                end_ns: gpu_to_cpu(
                    marker.end_gpu_timestamp_ns,
                    first_command_buffer.begin_gpu_timestamp_ns,
                    job.gpu_hardware_start_time_ns,
                ),
                user_data_key: Some(marker.text_key),
                ..Default::default()
            };

            match &marker.begin_marker {
                Some(begin) => {
                    let begin_meta = begin.meta_info;
                    // The begin half may sit in an earlier submission that was
                    // kept around for exactly this purpose.
                    let begin_first_command_buffer = if begin_meta == meta {
                        Some(*first_command_buffer)
                    } else {
                        self.find_matching_submission(
                            begin_meta.tid,
                            begin_meta.post_submission_cpu_timestamp,
                        )
                        .and_then(|post_ns| self.submission(begin_meta.tid, post_ns))
                        .and_then(|s| s.first_command_buffer().copied())
                    };
                    let Some(begin_first_command_buffer) = begin_first_command_buffer else {
                        error!("Discarding debug marker timer, its begin submission is unknown");
                        join.discarded_markers += 1;
                        continue;
                    };

                    let begin_job = self
                        .find_matching_job(
                            begin_meta.tid,
                            begin_meta.pre_submission_cpu_timestamp,
                            begin_meta.post_submission_cpu_timestamp,
                        )
                        .and_then(|ioctl_ns| self.job(begin_meta.tid, ioctl_ns))
                        .or(if begin_meta == meta { Some(job) } else { None });

                    let mut begin_ioctl_ns = 0;
                    match begin_job {
                        Some(begin_job) => {
                            timer.start_ns = gpu_to_cpu(
                                begin.gpu_timestamp_ns,
                                begin_first_command_buffer.begin_gpu_timestamp_ns,
                                begin_job.gpu_hardware_start_time_ns,
                            );
                            begin_ioctl_ns = begin_job.amdgpu_cs_ioctl_time_ns;
                        }
                        // The begin submission was captured but its job was not.
                        None => timer.start_ns = self.begin_capture_time_ns,
                    }

                    timer.tid = if begin_meta.tid == meta.tid {
                        begin_meta.tid as i32
                    } else {
                        UNKNOWN_TID
                    };
                    join.consumed_begin_markers.push((
                        begin_meta.tid,
                        begin_ioctl_ns,
                        begin_meta.post_submission_cpu_timestamp,
                    ));
                }
                None => {
                    timer.start_ns = self.begin_capture_time_ns;
                    timer.tid = UNKNOWN_TID;
                }
            }

            if let Some(color) = marker.color {
                timer.color = Some(Color::from_unit_floats(
                    color.red,
                    color.green,
                    color.blue,
                    color.alpha,
                ));
            }

            match strings.string(marker.text_key) {
                Some(label) => timer.group_id = dxvk_group_id(&label),
                None => error!("Debug marker references unknown string key {}", marker.text_key),
            }

            join.timers.push(timer);
        }
    }
}

/// The three queue phases of a kernel job: sw queue, hw queue, hw execution.
fn gpu_activity_timers(job: &GpuJob, label_key: &mut LabelKeyFn<'_>) -> Vec<TimerInfo> {
    let phases = [
        (
            SW_QUEUE_LABEL,
            job.amdgpu_cs_ioctl_time_ns,
            job.amdgpu_sched_run_job_time_ns,
        ),
        (
            HW_QUEUE_LABEL,
            job.amdgpu_sched_run_job_time_ns,
            job.gpu_hardware_start_time_ns,
        ),
        (
            HW_EXECUTION_LABEL,
            job.gpu_hardware_start_time_ns,
            job.dma_fence_signaled_time_ns,
        ),
    ];
    phases
        .into_iter()
        .map(|(label, start_ns, end_ns)| TimerInfo {
            start_ns,
            end_ns,
            pid: job.pid as i32,
            tid: job.tid as i32,
            depth: depth_u8(job.depth),
            timer_type: TimerType::GpuActivity,
            user_data_key: Some(label_key(label)),
            timeline_hash: Some(job.timeline_key),
            ..Default::default()
        })
        .collect()
}
