//! Manual-instrumentation events.
//!
//! The instrumentation API emits start and stop events instead of complete
//! timers. Synchronous scopes nest on a per-thread stack; asynchronous scopes
//! are matched by an id chosen by the application. [`ApiEventProcessor`] pairs
//! them and hands the resulting timers back to the caller, which forwards them
//! to the listener. The processor itself never talks to the listener.

mod encoded_name;

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::events::{
    ApiScopeStart, ApiScopeStartAsync, ApiScopeStop, ApiScopeStopAsync, ApiStringEvent,
    ApiTrackValue,
};
use crate::listener::{ApiStringEventInfo, ApiTrackValueInfo};
use crate::timer::{Color, TimerInfo, TimerType};

/// Counters for API events that did not produce a timer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApiStats {
    pub sync_scopes: u64,
    pub async_scopes: u64,
    /// Stops on a thread with no open scope, usually opened before the capture.
    pub unmatched_sync_stops: u64,
    pub unmatched_async_stops: u64,
    /// Async starts that reused an id still open.
    pub replaced_async_starts: u64,
    /// Scopes still open when the capture finished.
    pub discarded_sync_starts: u64,
    pub discarded_async_starts: u64,
}

/// Values the API can record on a value track.
pub trait TrackValue: Copy {
    fn to_f64(self) -> f64;
}

macro_rules! impl_track_value {
    ($($ty:ty),*) => {
        $(impl TrackValue for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_track_value!(f64, f32, i32, i64, u32, u64);

#[derive(Debug, Default)]
pub struct ApiEventProcessor {
    synchronous_scopes_by_tid: HashMap<u32, Vec<ApiScopeStart>>,
    asynchronous_scopes_by_id: HashMap<u64, ApiScopeStartAsync>,
    stats: ApiStats,
}

impl ApiEventProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ApiStats {
        &self.stats
    }

    /// Scopes currently open on `tid`.
    pub fn open_scopes(&self, tid: u32) -> usize {
        self.synchronous_scopes_by_tid
            .get(&tid)
            .map_or(0, Vec::len)
    }

    pub fn open_async_scopes(&self) -> usize {
        self.asynchronous_scopes_by_id.len()
    }

    pub fn process_scope_start(&mut self, start: &ApiScopeStart) {
        self.synchronous_scopes_by_tid
            .entry(start.tid)
            .or_default()
            .push(start.clone());
    }

    /// Close the innermost open scope of the stopping thread.
    ///
    /// The timer depth is the number of scopes still open on the thread once
    /// this one is closed, so the outermost scope lands at depth 0.
    pub fn process_scope_stop(&mut self, stop: &ApiScopeStop) -> Option<TimerInfo> {
        let Some(stack) = self.synchronous_scopes_by_tid.get_mut(&stop.tid) else {
            self.stats.unmatched_sync_stops += 1;
            debug!("Dropping scope stop on tid {} with no open scope", stop.tid);
            return None;
        };
        let Some(start) = stack.pop() else {
            self.stats.unmatched_sync_stops += 1;
            return None;
        };
        let depth = u8::try_from(stack.len()).unwrap_or(u8::MAX);
        if stack.is_empty() {
            self.synchronous_scopes_by_tid.remove(&stop.tid);
        }

        self.stats.sync_scopes += 1;
        Some(TimerInfo {
            start_ns: start.timestamp_ns,
            end_ns: stop.timestamp_ns,
            pid: start.pid as i32,
            tid: start.tid as i32,
            depth,
            timer_type: TimerType::ApiSyncScope,
            group_id: (start.group_id != 0).then_some(start.group_id),
            address_in_function: (start.address_in_function != 0)
                .then_some(start.address_in_function),
            color: Color::from_packed_rgba(start.color_rgba),
            api_scope_name: Some(start.name.decode()),
            ..Default::default()
        })
    }

    pub fn process_scope_start_async(&mut self, start: &ApiScopeStartAsync) {
        if self
            .asynchronous_scopes_by_id
            .insert(start.id, start.clone())
            .is_some()
        {
            self.stats.replaced_async_starts += 1;
            debug!("Async scope id {} started again before it stopped", start.id);
        }
    }

    pub fn process_scope_stop_async(&mut self, stop: &ApiScopeStopAsync) -> Option<TimerInfo> {
        let Some(start) = self.asynchronous_scopes_by_id.remove(&stop.id) else {
            self.stats.unmatched_async_stops += 1;
            debug!("Dropping async scope stop for unknown id {}", stop.id);
            return None;
        };

        self.stats.async_scopes += 1;
        Some(TimerInfo {
            start_ns: start.timestamp_ns,
            end_ns: stop.timestamp_ns,
            pid: start.pid as i32,
            tid: start.tid as i32,
            depth: 0,
            timer_type: TimerType::ApiAsyncScope,
            address_in_function: (start.address_in_function != 0)
                .then_some(start.address_in_function),
            color: Color::from_packed_rgba(start.color_rgba),
            api_scope_name: Some(start.name.decode()),
            api_async_scope_id: Some(start.id),
            ..Default::default()
        })
    }

    pub fn process_string_event(&self, event: &ApiStringEvent) -> ApiStringEventInfo {
        ApiStringEventInfo {
            pid: event.pid,
            tid: event.tid,
            timestamp_ns: event.timestamp_ns,
            async_scope_id: event.id,
            name: event.name.decode(),
            should_concatenate: false,
        }
    }

    pub fn process_track_value<T: TrackValue>(
        &self,
        event: &ApiTrackValue<T>,
    ) -> ApiTrackValueInfo {
        ApiTrackValueInfo {
            pid: event.pid,
            tid: event.tid,
            timestamp_ns: event.timestamp_ns,
            track_name: event.name.decode(),
            value: event.data.to_f64(),
        }
    }

    /// Drop every scope still open. Their starts may never see a stop.
    pub fn capture_finished(&mut self) {
        let sync: usize = self.synchronous_scopes_by_tid.values().map(Vec::len).sum();
        let async_scopes = self.asynchronous_scopes_by_id.len();
        if sync + async_scopes > 0 {
            debug!(
                "Discarding {} open synchronous and {} open asynchronous scopes",
                sync, async_scopes
            );
        }
        self.stats.discarded_sync_starts += sync as u64;
        self.stats.discarded_async_starts += async_scopes as u64;
        self.synchronous_scopes_by_tid.clear();
        self.asynchronous_scopes_by_id.clear();
    }
}
