//! Intern tables for strings and callstacks referenced by key.
//!
//! Producers send each string or callstack once, tagged with a 64-bit key,
//! and later events refer to the key only. Keys are write-once: a second
//! definition of the same key is reported and ignored, the first value stays.
//!
//! # Thread Safety
//!
//! Both tables are `DashMap`s. The demultiplexer is the only writer; render
//! and export threads read concurrently. Values are handed out as `Arc`s so a
//! reader never holds a shard lock beyond the lookup itself.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::InternError;
use crate::events::Callstack;

/// Initial capacity for the string table. Function, module and label names.
const INITIAL_STRING_CAPACITY: usize = 4096;

/// Initial capacity for the callstack table.
const INITIAL_CALLSTACK_CAPACITY: usize = 16384;

#[derive(Debug)]
pub struct InternTables {
    strings: DashMap<u64, Arc<str>>,
    callstacks: DashMap<u64, Arc<Callstack>>,
}

impl InternTables {
    pub fn new() -> Self {
        Self {
            strings: DashMap::with_capacity(INITIAL_STRING_CAPACITY),
            callstacks: DashMap::with_capacity(INITIAL_CALLSTACK_CAPACITY),
        }
    }

    /// Bind `key` to `value`. Fails without touching the table if `key` is bound.
    pub fn insert_string(&self, key: u64, value: &str) -> Result<Arc<str>, InternError> {
        match self.strings.entry(key) {
            Entry::Occupied(_) => Err(InternError::DuplicateString(key)),
            Entry::Vacant(entry) => Ok(Arc::clone(entry.insert(Arc::from(value)).value())),
        }
    }

    /// Bind `key` to `callstack`. Fails without touching the table if `key` is bound.
    pub fn insert_callstack(&self, key: u64, callstack: Callstack) -> Result<(), InternError> {
        match self.callstacks.entry(key) {
            Entry::Occupied(_) => Err(InternError::DuplicateCallstack(key)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(callstack));
                Ok(())
            }
        }
    }

    pub fn string(&self, key: u64) -> Option<Arc<str>> {
        self.strings.get(&key).map(|value| Arc::clone(value.value()))
    }

    pub fn callstack(&self, key: u64) -> Option<Arc<Callstack>> {
        self.callstacks.get(&key).map(|value| Arc::clone(value.value()))
    }

    pub fn contains_string(&self, key: u64) -> bool {
        self.strings.contains_key(&key)
    }

    pub fn contains_callstack(&self, key: u64) -> bool {
        self.callstacks.contains_key(&key)
    }

    pub fn num_strings(&self) -> usize {
        self.strings.len()
    }

    pub fn num_callstacks(&self) -> usize {
        self.callstacks.len()
    }
}

impl Default for InternTables {
    fn default() -> Self {
        Self::new()
    }
}
