use indexmap::IndexMap;
use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use crate::el_model::Template;
use crate::el_parser::{contains_el, parse_template};
use crate::path::PathError;
use crate::record_path::{RecordPath, RecordPathError};

/// Bounded map that evicts the least recently used entry.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: IndexMap<K, V>,
}

impl<K: Hash + Eq, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    pub fn get_cloned<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, value)| value.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        if let Some(index) = self.entries.get_index_of(&key) {
            self.entries.shift_remove_index(index);
        } else if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// ExpressionCache
// =============================================================================

/// Source text of a field mapping or variable, classified and compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledSource {
    Empty,
    Expression(Arc<Template>),
    RecordPath(Arc<RecordPath>),
    Literal(Arc<str>),
    /// Text that looks like an expression but does not parse.
    Invalid(Arc<str>),
}

pub fn compile_source(source: &str) -> CompiledSource {
    if source.trim().is_empty() {
        return CompiledSource::Empty;
    }
    if contains_el(source) {
        return match parse_template(source) {
            Ok(template) => CompiledSource::Expression(Arc::new(template)),
            Err(err) => CompiledSource::Invalid(Arc::from(err.to_string())),
        };
    }
    match RecordPath::compile(source) {
        Ok(path) => CompiledSource::RecordPath(Arc::new(path)),
        Err(err @ RecordPathError::InvalidRegex { .. })
        | Err(err @ RecordPathError::InvalidPath(PathError::IndexTooLarge(_))) => {
            CompiledSource::Invalid(Arc::from(err.to_string()))
        }
        Err(_) => CompiledSource::Literal(Arc::from(source)),
    }
}

/// Compiled sources keyed by their raw text.
///
/// Owned by whoever drives the mapping (one per worker) and passed down by
/// `&mut`; nothing about it is shared between threads.
pub struct ExpressionCache {
    entries: LruCache<String, CompiledSource>,
    hits: u64,
    misses: u64,
}

impl ExpressionCache {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn compile(&mut self, source: &str) -> CompiledSource {
        if let Some(compiled) = self.entries.get_cloned(source) {
            self.hits += 1;
            return compiled;
        }
        self.misses += 1;
        let compiled = compile_source(source);
        self.entries.insert(source.to_string(), compiled.clone());
        compiled
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::new()
    }
}
