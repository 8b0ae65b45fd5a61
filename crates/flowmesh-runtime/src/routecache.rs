//! Target → process-group resolution cache (spec §4.10 "Target → group
//! resolution is cached with optional negative-cache entries; placement
//! changes ... invalidate the cache and bump a generation counter").
//!
//! Grounded in the original's `route_cache_snapshot` (spec §12): the
//! supervisor exposes the generation counter and hit/miss/negative counts
//! as diagnostics rather than through any side channel.

use std::collections::HashMap;

/// Open Question resolution (SPEC_FULL.md §13 item 1): `route_cache_invalidated`
/// fires only when [`RouteCache::invalidate`] runs because placement
/// changed, never from [`RouteCache::configure`] alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteCacheDiagnostics {
    pub generation: u64,
    pub hits: u64,
    pub misses: u64,
    pub negative_hits: u64,
    pub entries: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct RouteCacheSettings {
    pub enabled: bool,
    pub negative_cache: bool,
    pub max_entries: usize,
}

impl Default for RouteCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            negative_cache: false,
            max_entries: 1024,
        }
    }
}

enum Entry {
    Group(String),
    Negative,
}

/// Caches `target node name → process group name` lookups. `configure`
/// replaces settings without bumping the generation counter (spec §13);
/// `invalidate` (placement change) clears entries and bumps it.
pub struct RouteCache {
    settings: RouteCacheSettings,
    entries: HashMap<String, Entry>,
    diagnostics: RouteCacheDiagnostics,
}

impl RouteCache {
    pub fn new(settings: RouteCacheSettings) -> Self {
        Self {
            settings,
            entries: HashMap::new(),
            diagnostics: RouteCacheDiagnostics::default(),
        }
    }

    pub fn configure(&mut self, settings: RouteCacheSettings) {
        self.settings = settings;
        if self.entries.len() > self.settings.max_entries {
            self.entries.clear();
        }
    }

    /// Invalidates every cached entry and bumps the generation counter
    /// (spec §4.10 "placement changes ... invalidate the cache").
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.diagnostics.generation += 1;
    }

    pub fn lookup(&mut self, target: &str) -> Option<Option<&str>> {
        if !self.settings.enabled {
            return None;
        }
        match self.entries.get(target) {
            Some(Entry::Group(group)) => {
                self.diagnostics.hits += 1;
                Some(Some(group.as_str()))
            }
            Some(Entry::Negative) => {
                self.diagnostics.negative_hits += 1;
                Some(None)
            }
            None => {
                self.diagnostics.misses += 1;
                None
            }
        }
    }

    pub fn record_hit(&mut self, target: impl Into<String>, group: impl Into<String>) {
        if !self.settings.enabled {
            return;
        }
        if self.entries.len() >= self.settings.max_entries {
            return;
        }
        self.entries.insert(target.into(), Entry::Group(group.into()));
    }

    pub fn record_miss(&mut self, target: impl Into<String>) {
        if !self.settings.enabled || !self.settings.negative_cache {
            return;
        }
        if self.entries.len() >= self.settings.max_entries {
            return;
        }
        self.entries.insert(target.into(), Entry::Negative);
    }

    pub fn diagnostics(&self) -> RouteCacheDiagnostics {
        RouteCacheDiagnostics {
            entries: self.entries.len(),
            ..self.diagnostics
        }
    }
}
