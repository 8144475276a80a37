//! Resource state cache
//!
//! Remembers, for one recording scope, the last state each
//! (resource, subresource) pair was moved to. The first touch of a pair
//! yields the resource's default state. When the scope closes every entry
//! must be back at its default; anything else is a forgotten closing
//! transition and is reported as a [`StateLeak`].

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::resource::{Resource, ResourceId};
use crate::types::ResourceState;
use crate::{hal_error, hal_warn};

struct CacheEntry {
    state: ResourceState,
    default_state: ResourceState,
    resource: Arc<dyn Resource>,
}

/// Subresource left in a non-default state at scope close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLeak {
    pub resource_id: ResourceId,
    pub subresource: u32,
    pub state: ResourceState,
    pub default_state: ResourceState,
}

/// Cached states of the subresources touched in the current scope
#[derive(Default)]
pub struct ResourceStateCache {
    entries: FxHashMap<(ResourceId, u32), CacheEntry>,
}

impl ResourceStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a scope. Leftover entries mean the previous scope was not closed.
    pub fn on_begin(&mut self) {
        if !self.entries.is_empty() {
            hal_warn!(
                "quasar::ResourceStateCache",
                "{} entries left over from an unclosed scope, dropped",
                self.entries.len()
            );
            self.entries.clear();
        }
    }

    /// State of a subresource in this scope
    ///
    /// The first touch inserts and returns the default state.
    pub fn get_state(&mut self, resource: &Arc<dyn Resource>, subresource: u32) -> ResourceState {
        let key = (resource.id(), subresource);
        if let Some(entry) = self.entries.get(&key) {
            return entry.state;
        }

        let default_state = resource.default_state();
        let current = resource.current_state(subresource);
        if current != default_state {
            hal_error!(
                "quasar::ResourceStateCache",
                "Resource {:?} subresource {} entered the scope in {:?} instead of {:?} (missing closing transition)",
                resource.id(), subresource, current, default_state
            );
        }

        self.entries.insert(
            key,
            CacheEntry {
                state: default_state,
                default_state,
                resource: resource.clone(),
            },
        );
        default_state
    }

    /// Record a new state, returning the previous one
    pub fn set_state(&mut self, resource: &Arc<dyn Resource>, subresource: u32, state: ResourceState) -> ResourceState {
        let previous = self.get_state(resource, subresource);
        if let Some(entry) = self.entries.get_mut(&(resource.id(), subresource)) {
            entry.state = state;
        }
        previous
    }

    /// Touched subresources whose state differs from their default
    pub fn non_default_entries(&self) -> Vec<(Arc<dyn Resource>, u32, ResourceState)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state != e.default_state)
            .map(|(&(_, sub), e)| (e.resource.clone(), sub, e.state))
            .collect();
        // Stable order for barrier emission
        entries.sort_by_key(|(r, sub, _)| (r.id(), *sub));
        entries
    }

    /// Every touched subresource with its cached state
    pub fn entries(&self) -> Vec<(Arc<dyn Resource>, u32, ResourceState)> {
        self.entries
            .iter()
            .map(|(&(_, sub), e)| (e.resource.clone(), sub, e.state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close the scope
    ///
    /// Every non-default entry is logged and returned as a leak. The cache
    /// is always emptied.
    pub fn on_finish(&mut self) -> Vec<StateLeak> {
        let mut leaks: Vec<StateLeak> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state != e.default_state)
            .map(|(&(resource_id, subresource), e)| StateLeak {
                resource_id,
                subresource,
                state: e.state,
                default_state: e.default_state,
            })
            .collect();
        leaks.sort_by_key(|l| (l.resource_id, l.subresource));

        for leak in &leaks {
            hal_error!(
                "quasar::ResourceStateCache",
                "Resource {:?} subresource {} left in {:?} at scope close (default {:?})",
                leak.resource_id, leak.subresource, leak.state, leak.default_state
            );
        }

        self.entries.clear();
        leaks
    }

    /// Drop every entry without verification (abnormal teardown)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
#[path = "resource_state_cache_tests.rs"]
mod tests;
