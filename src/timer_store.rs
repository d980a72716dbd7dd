//! Append-only timer storage for one track.
//!
//! Timers are grouped by depth. Every depth owns a [`TimerChain`], a directory
//! of geometrically growing [`TimerBlock`]s whose slots are write-once cells.
//! A writer fills a slot and then publishes the new length with release
//! ordering, so a reader that loads the length with acquire ordering only ever
//! sees fully written timers. Blocks are never moved or freed while the store
//! lives, which makes `&TimerInfo` borrows handed out by the store stable.
//!
//! # Thread Safety
//!
//! Inserts into one depth are serialised by that chain's mutex. Inserts into
//! different depths and all queries run concurrently without blocking each
//! other. Store-wide bounds and counters are atomics updated with
//! `fetch_min`/`fetch_max`, so they only ever move outwards.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::warn;

use crate::error::StoreError;
use crate::pixel::next_pixel_boundary;
use crate::timer::TimerInfo;

/// Number of timers in the first block of every chain.
pub const DEFAULT_BLOCK_CAPACITY: usize = 4096;

/// Block slots per chain. Block `i` holds `capacity << i` timers.
pub const MAX_BLOCKS_PER_CHAIN: usize = 32;

/// Depth is a `u8`, so this many chains cover every possible depth.
pub const MAX_DEPTHS: usize = 256;

/// A fixed-capacity run of timers with tight bounds for range skipping.
#[derive(Debug)]
pub struct TimerBlock {
    slots: Box<[OnceLock<TimerInfo>]>,
    len: AtomicUsize,
    min_start_ns: AtomicU64,
    max_end_ns: AtomicU64,
}

impl TimerBlock {
    fn allocate(depth: u8, capacity: usize) -> Result<Self, StoreError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| StoreError::BlockAllocation { depth, capacity })?;
        slots.resize_with(capacity, OnceLock::new);
        Ok(Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
            min_start_ns: AtomicU64::new(u64::MAX),
            max_end_ns: AtomicU64::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Smallest start of the timers published so far. Read after [`TimerBlock::len`].
    pub fn min_start_ns(&self) -> u64 {
        self.min_start_ns.load(Ordering::Acquire)
    }

    /// Largest end of the timers published so far. Read after [`TimerBlock::len`].
    pub fn max_end_ns(&self) -> u64 {
        self.max_end_ns.load(Ordering::Acquire)
    }

    pub fn get(&self, index: usize) -> Option<&TimerInfo> {
        if index < self.len() {
            self.slots[index].get()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimerInfo> {
        let len = self.len();
        self.slots[..len].iter().filter_map(OnceLock::get)
    }

    fn overlaps(&self, min_ns: u64, max_ns: u64) -> bool {
        !self.is_empty() && self.min_start_ns() <= max_ns && self.max_end_ns() >= min_ns
    }

    /// Caller holds the chain's write lock and has checked there is room.
    fn push(&self, timer: TimerInfo) -> &TimerInfo {
        let index = self.len.load(Ordering::Relaxed);
        self.min_start_ns
            .fetch_min(timer.start_ns, Ordering::Relaxed);
        self.max_end_ns.fetch_max(timer.end_ns, Ordering::Relaxed);
        let stored = self.slots[index].get_or_init(move || timer);
        self.len.store(index + 1, Ordering::Release);
        stored
    }
}

#[derive(Debug, Default)]
struct ChainWriter {
    last_start_ns: u64,
    out_of_order: u64,
}

/// All timers of one depth, in insertion order.
#[derive(Debug)]
pub struct TimerChain {
    depth: u8,
    first_block_capacity: usize,
    blocks: [OnceLock<TimerBlock>; MAX_BLOCKS_PER_CHAIN],
    num_blocks: AtomicUsize,
    len: AtomicUsize,
    writer: Mutex<ChainWriter>,
}

impl TimerChain {
    fn new(depth: u8, first_block_capacity: usize) -> Self {
        Self {
            depth,
            first_block_capacity,
            blocks: std::array::from_fn(|_| OnceLock::new()),
            num_blocks: AtomicUsize::new(0),
            len: AtomicUsize::new(0),
            writer: Mutex::new(ChainWriter::default()),
        }
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of inserts whose start preceded the previous insert's start.
    pub fn out_of_order_inserts(&self) -> u64 {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .out_of_order
    }

    fn block_capacity(&self, block: usize) -> usize {
        self.first_block_capacity.saturating_mul(1usize << block)
    }

    /// Index of the first timer stored in block `block`.
    fn block_offset(&self, block: usize) -> usize {
        self.first_block_capacity
            .saturating_mul((1usize << block) - 1)
    }

    /// Published blocks, oldest first.
    pub fn blocks(&self) -> impl Iterator<Item = &TimerBlock> {
        let num_blocks = self.num_blocks.load(Ordering::Acquire);
        self.blocks[..num_blocks].iter().filter_map(OnceLock::get)
    }

    pub fn get(&self, index: usize) -> Option<&TimerInfo> {
        if index >= self.len() {
            return None;
        }
        let block = (index / self.first_block_capacity + 1).ilog2() as usize;
        let offset = index - self.block_offset(block);
        self.blocks.get(block)?.get()?.get(offset)
    }

    /// Timers in insertion order, bounded by the length at call time.
    pub fn iter(&self) -> impl Iterator<Item = &TimerInfo> {
        let len = self.len();
        self.blocks().flat_map(TimerBlock::iter).take(len)
    }

    /// First index in `[from, len)` whose start satisfies `!pred`, assuming
    /// starts are non-decreasing.
    fn partition_point(
        &self,
        mut from: usize,
        mut to: usize,
        pred: impl Fn(&TimerInfo) -> bool,
    ) -> usize {
        while from < to {
            let mid = from + (to - from) / 2;
            match self.get(mid) {
                Some(timer) if pred(timer) => from = mid + 1,
                _ => to = mid,
            }
        }
        from
    }

    /// Index of the first timer ending at or after `t`, skipping whole blocks
    /// whose tight bound ends before `t`.
    fn first_ending_at_or_after(&self, t: u64, len: usize) -> usize {
        let mut base = 0;
        for block in self.blocks() {
            let block_len = block.len();
            if block.max_end_ns() >= t {
                if let Some(i) = block.iter().position(|timer| timer.end_ns >= t) {
                    return (base + i).min(len);
                }
            }
            base += block_len;
            if base >= len {
                break;
            }
        }
        len
    }

    fn push(&self, timer: TimerInfo) -> Result<(usize, &TimerInfo), StoreError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.start_ns < writer.last_start_ns {
            writer.out_of_order += 1;
            warn!(
                "Timer starting at {} inserted after one starting at {} on depth {}",
                timer.start_ns, writer.last_start_ns, self.depth
            );
        }

        let block = self.tail_block_with_room()?;
        writer.last_start_ns = timer.start_ns;
        let index = self.len.load(Ordering::Relaxed);
        let stored = block.push(timer);
        self.len.store(index + 1, Ordering::Release);
        Ok((index, stored))
    }

    fn tail_block_with_room(&self) -> Result<&TimerBlock, StoreError> {
        let num_blocks = self.num_blocks.load(Ordering::Relaxed);
        if num_blocks > 0 {
            if let Some(block) = self.blocks[num_blocks - 1].get() {
                if block.len() < block.capacity() {
                    return Ok(block);
                }
            }
        }
        if num_blocks == MAX_BLOCKS_PER_CHAIN {
            return Err(StoreError::ChainFull { depth: self.depth });
        }

        let block = TimerBlock::allocate(self.depth, self.block_capacity(num_blocks))?;
        let block = self.blocks[num_blocks].get_or_init(move || block);
        self.num_blocks.store(num_blocks + 1, Ordering::Release);
        Ok(block)
    }
}

/// Per-track timer storage, see the module docs.
#[derive(Debug)]
pub struct TimerStore {
    chains: Box<[OnceLock<TimerChain>]>,
    first_block_capacity: usize,
    min_time_ns: AtomicU64,
    max_time_ns: AtomicU64,
    num_timers: AtomicU64,
    max_depth: AtomicU32,
    dropped_timers: AtomicU64,
}

impl Default for TimerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerStore {
    pub fn new() -> Self {
        Self::with_block_capacity(DEFAULT_BLOCK_CAPACITY)
    }

    /// Create a store whose chains start with blocks of `capacity` timers.
    pub fn with_block_capacity(capacity: usize) -> Self {
        Self {
            chains: (0..MAX_DEPTHS).map(|_| OnceLock::new()).collect(),
            first_block_capacity: capacity.max(1),
            min_time_ns: AtomicU64::new(u64::MAX),
            max_time_ns: AtomicU64::new(0),
            num_timers: AtomicU64::new(0),
            max_depth: AtomicU32::new(0),
            dropped_timers: AtomicU64::new(0),
        }
    }

    /// Append `timer` to the chain of `depth` and return a stable reference to it.
    pub fn add_timer(&self, timer: TimerInfo, depth: u8) -> Result<&TimerInfo, StoreError> {
        self.add_timer_indexed(timer, depth).map(|(_, timer)| timer)
    }

    /// Like [`TimerStore::add_timer`], also returning the index within the chain.
    pub fn add_timer_indexed(
        &self,
        timer: TimerInfo,
        depth: u8,
    ) -> Result<(usize, &TimerInfo), StoreError> {
        let chain = self.chains[usize::from(depth)]
            .get_or_init(|| TimerChain::new(depth, self.first_block_capacity));
        let (start_ns, end_ns) = (timer.start_ns, timer.end_ns);
        let (index, stored) = chain.push(timer).inspect_err(|_| {
            self.dropped_timers.fetch_add(1, Ordering::Relaxed);
        })?;

        self.min_time_ns.fetch_min(start_ns, Ordering::AcqRel);
        self.max_time_ns.fetch_max(end_ns, Ordering::AcqRel);
        self.num_timers.fetch_add(1, Ordering::AcqRel);
        self.max_depth
            .fetch_max(u32::from(depth) + 1, Ordering::AcqRel);
        Ok((index, stored))
    }

    /// The chain for `depth`, or `None` if nothing was ever inserted there.
    pub fn get_chain(&self, depth: u8) -> Option<&TimerChain> {
        self.chains[usize::from(depth)].get()
    }

    pub fn get(&self, depth: u8, index: usize) -> Option<&TimerInfo> {
        self.get_chain(depth)?.get(index)
    }

    /// Chains that hold at least one timer, by increasing depth.
    pub fn chains(&self) -> impl Iterator<Item = &TimerChain> {
        self.chains
            .iter()
            .filter_map(OnceLock::get)
            .filter(|chain| !chain.is_empty())
    }

    /// `u64::MAX` while the store is empty.
    pub fn min_time_ns(&self) -> u64 {
        self.min_time_ns.load(Ordering::Acquire)
    }

    pub fn max_time_ns(&self) -> u64 {
        self.max_time_ns.load(Ordering::Acquire)
    }

    pub fn num_timers(&self) -> u64 {
        self.num_timers.load(Ordering::Acquire)
    }

    /// One past the deepest depth that holds a timer.
    pub fn max_depth(&self) -> u32 {
        self.max_depth.load(Ordering::Acquire)
    }

    /// Timers rejected because their chain could not grow.
    pub fn dropped_timers(&self) -> u64 {
        self.dropped_timers.load(Ordering::Relaxed)
    }

    pub fn out_of_order_inserts(&self) -> u64 {
        self.chains().map(TimerChain::out_of_order_inserts).sum()
    }

    /// All timers intersecting `[min_ns, max_ns]`, depth by depth, each depth
    /// in insertion order.
    pub fn get_timers(&self, min_ns: u64, max_ns: u64) -> Vec<&TimerInfo> {
        let mut timers = Vec::new();
        for chain in self.chains() {
            for block in chain.blocks() {
                if !block.overlaps(min_ns, max_ns) {
                    continue;
                }
                timers.extend(block.iter().filter(|t| t.intersects(min_ns, max_ns)));
            }
        }
        timers
    }

    /// At most one timer per pixel column of `[start_ns, end_ns]` at `depth`.
    ///
    /// After emitting a timer the scan resumes at the first timer starting at
    /// or after the boundary of the pixel holding the emitted timer's end, so
    /// the result never exceeds `pixel_count + 1` timers. With
    /// `start_ns == end_ns` every timer touching that instant is returned.
    pub fn get_timers_at_depth_discretised(
        &self,
        depth: u8,
        pixel_count: u64,
        start_ns: u64,
        end_ns: u64,
    ) -> Vec<&TimerInfo> {
        let Some(chain) = self.get_chain(depth) else {
            return Vec::new();
        };
        if pixel_count == 0 || end_ns < start_ns {
            return Vec::new();
        }
        if start_ns == end_ns {
            return chain
                .iter()
                .filter(|t| t.intersects(start_ns, end_ns))
                .collect();
        }

        let len = chain.len();
        let mut result = Vec::new();
        let mut index = chain.first_ending_at_or_after(start_ns, len);
        while index < len {
            let Some(timer) = chain.get(index) else {
                break;
            };
            if timer.start_ns > end_ns {
                break;
            }
            if timer.end_ns < start_ns {
                index += 1;
                continue;
            }
            result.push(timer);
            let boundary = next_pixel_boundary(timer.end_ns, pixel_count, start_ns, end_ns);
            index = chain.partition_point(index + 1, len, |t| t.start_ns < boundary);
        }
        result
    }

    /// First timer at `depth` starting strictly after `t`.
    pub fn first_after(&self, t: u64, depth: u8) -> Option<&TimerInfo> {
        let chain = self.get_chain(depth)?;
        let index = chain.partition_point(0, chain.len(), |timer| timer.start_ns <= t);
        chain.get(index)
    }

    /// Last timer at `depth` starting strictly before `t`.
    pub fn first_before(&self, t: u64, depth: u8) -> Option<&TimerInfo> {
        let chain = self.get_chain(depth)?;
        let index = chain.partition_point(0, chain.len(), |timer| timer.start_ns < t);
        index.checked_sub(1).and_then(|i| chain.get(i))
    }
}
