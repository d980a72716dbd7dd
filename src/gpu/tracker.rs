//! Bookkeeping of Vulkan command pools and the command buffers allocated
//! from them.
//!
//! Handles are opaque 64-bit values as seen by the Vulkan layer. Destroying a
//! pool releases every buffer it still owns. All state sits behind one
//! `RwLock` so lookups from other threads can run while the layer thread
//! mutates it.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

#[derive(Debug, Default)]
struct TrackerState {
    pools: HashSet<u64>,
    /// Buffer to its `(device, pool)`.
    buffers: HashMap<u64, (u64, u64)>,
    pool_to_buffers: HashMap<u64, HashSet<u64>>,
}

#[derive(Debug, Default)]
pub struct CommandBufferTracker {
    state: RwLock<TrackerState>,
}

impl CommandBufferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track_command_pool(&self, pool: u64) {
        self.write().pools.insert(pool);
    }

    /// Forget `pool` and every buffer allocated from it.
    pub fn untrack_command_pool(&self, pool: u64) {
        let mut state = self.write();
        state.pools.remove(&pool);
        if let Some(buffers) = state.pool_to_buffers.remove(&pool) {
            for buffer in buffers {
                state.buffers.remove(&buffer);
            }
        }
    }

    /// Release the buffers of `pool` while keeping the pool itself.
    pub fn reset_command_pool(&self, pool: u64) {
        let mut state = self.write();
        if let Some(buffers) = state.pool_to_buffers.remove(&pool) {
            for buffer in buffers {
                state.buffers.remove(&buffer);
            }
        }
    }

    pub fn track_command_buffers(&self, device: u64, pool: u64, buffers: &[u64]) {
        let mut state = self.write();
        if !state.pools.contains(&pool) {
            warn!("Tracking command buffers of untracked pool {:#x}", pool);
        }
        for &buffer in buffers {
            state.buffers.insert(buffer, (device, pool));
        }
        state
            .pool_to_buffers
            .entry(pool)
            .or_default()
            .extend(buffers.iter().copied());
    }

    pub fn untrack_command_buffers(&self, pool: u64, buffers: &[u64]) {
        let mut state = self.write();
        for buffer in buffers {
            state.buffers.remove(buffer);
        }
        if let Some(owned) = state.pool_to_buffers.get_mut(&pool) {
            for buffer in buffers {
                owned.remove(buffer);
            }
            if owned.is_empty() {
                state.pool_to_buffers.remove(&pool);
            }
        }
    }

    pub fn is_command_pool_tracked(&self, pool: u64) -> bool {
        self.read().pools.contains(&pool)
    }

    pub fn is_command_buffer_tracked(&self, buffer: u64) -> bool {
        self.read().buffers.contains_key(&buffer)
    }

    /// Device that allocated `buffer`.
    pub fn device_of(&self, buffer: u64) -> Option<u64> {
        self.read().buffers.get(&buffer).map(|&(device, _)| device)
    }

    pub fn num_command_pools(&self) -> usize {
        self.read().pools.len()
    }

    pub fn num_command_buffers(&self) -> usize {
        self.read().buffers.len()
    }
}
