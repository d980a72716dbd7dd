//! The timer interval, the unit every track stores and every query returns.

use serde::{Deserialize, Serialize};

/// Thread id used when a timer cannot be attributed to a single thread.
pub const UNKNOWN_TID: i32 = -1;

/// Kind of work a timer represents. Decides which track a timer lands on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerType {
    #[default]
    None,
    SchedulingSlice,
    FunctionCall,
    GpuActivity,
    ApiSyncScope,
    ApiAsyncScope,
    GpuDebugMarker,
    GpuCommandBuffer,
    CoreActivity,
}

/// An RGBA colour with one byte per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    /// Packed value that asks the consumer to pick a colour.
    pub const AUTO: u32 = 0;

    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Decode a packed `0xRRGGBBAA` value. Returns `None` for [`Color::AUTO`].
    pub fn from_packed_rgba(rgba: u32) -> Option<Self> {
        if rgba == Self::AUTO {
            return None;
        }
        Some(Self {
            red: ((rgba & 0xff00_0000) >> 24) as u8,
            green: ((rgba & 0x00ff_0000) >> 16) as u8,
            blue: ((rgba & 0x0000_ff00) >> 8) as u8,
            alpha: (rgba & 0x0000_00ff) as u8,
        })
    }

    pub fn to_packed_rgba(self) -> u32 {
        (u32::from(self.red) << 24)
            | (u32::from(self.green) << 16)
            | (u32::from(self.blue) << 8)
            | u32::from(self.alpha)
    }

    /// Scale `[0.0, 1.0]` float channels to bytes, truncating like a C cast.
    pub fn from_unit_floats(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        let scale = |c: f32| (c * 255.0).clamp(0.0, 255.0) as u8;
        Self::new(scale(red), scale(green), scale(blue), scale(alpha))
    }
}

/// A timed interval on a track.
///
/// # Fields
/// - `start_ns`/`end_ns`: Interval bounds on the capture clock, `start_ns <= end_ns`
/// - `pid`/`tid`: Owner of the work; `tid` is [`UNKNOWN_TID`] when ambiguous
/// - `depth`: Stacking level on its track, 0 is outermost
/// - `processor`: CPU core for scheduling timers
/// - `user_data_key`: Return value of a function call, or the label string key of a GPU timer
/// - `timeline_hash`: GPU timeline string key
/// - `registers`: Argument registers captured with a function call
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerInfo {
    pub start_ns: u64,
    pub end_ns: u64,
    pub pid: i32,
    pub tid: i32,
    pub depth: u8,
    pub timer_type: TimerType,
    pub function_id: Option<u64>,
    pub group_id: Option<u64>,
    pub processor: Option<u32>,
    pub address_in_function: Option<u64>,
    pub user_data_key: Option<u64>,
    pub timeline_hash: Option<u64>,
    pub color: Option<Color>,
    pub api_scope_name: Option<String>,
    pub api_async_scope_id: Option<u64>,
    pub registers: Vec<u64>,
}

impl TimerInfo {
    pub fn duration_ns(&self) -> u64 {
        self.end_ns.saturating_sub(self.start_ns)
    }

    /// Closed-interval intersection with `[min_ns, max_ns]`.
    pub fn intersects(&self, min_ns: u64, max_ns: u64) -> bool {
        self.start_ns <= max_ns && self.end_ns >= min_ns
    }
}
