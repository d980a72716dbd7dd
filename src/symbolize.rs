//! Demangling of function names reported with address infos.
//!
//! Names arrive as interned strings in their mangled form. Many addresses
//! share one function, so demangled names are cached by the key of the
//! mangled string.

use std::collections::HashMap;
use std::sync::Arc;

use cpp_demangle::{DemangleOptions, Symbol};

/// Demangle an Itanium C++ symbol. Names that are not mangled, or that fail
/// to demangle, are returned unchanged.
pub fn demangle(name: &str) -> String {
    Symbol::new(name.as_bytes())
        .ok()
        .and_then(|symbol| symbol.demangle(&DemangleOptions::default()).ok())
        .unwrap_or_else(|| name.to_string())
}

#[derive(Debug, Default)]
pub struct DemangleCache {
    by_key: HashMap<u64, Arc<str>>,
}

impl DemangleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demangled form of the string interned under `key`.
    pub fn get_or_demangle(&mut self, key: u64, mangled: &str) -> Arc<str> {
        Arc::clone(
            self.by_key
                .entry(key)
                .or_insert_with(|| Arc::from(demangle(mangled))),
        )
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_itanium() {
        assert_eq!(demangle("_ZN3Foo3barEv"), "Foo::bar()");
        assert_eq!(demangle("_Z3addii"), "add(int, int)");
    }

    #[test]
    fn test_plain_names_pass_through() {
        assert_eq!(demangle("main"), "main");
        assert_eq!(demangle(""), "");
        assert_eq!(demangle("_Z"), "_Z");
    }

    #[test]
    fn test_cache_by_key() {
        let mut cache = DemangleCache::new();
        let first = cache.get_or_demangle(2, "_ZN3Foo3barEv");
        let again = cache.get_or_demangle(2, "ignored");
        assert_eq!(&*first, "Foo::bar()");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);
    }
}
