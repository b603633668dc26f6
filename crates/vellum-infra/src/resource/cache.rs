// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An in-memory [`ResourceCache`] with a byte budget and least-recently-used purging.

use ahash::AHashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use vellum_core::{
    ContextId, ResourceCache, ResourceError, ScratchKey, Surface, SurfaceId, UniqueKey,
};

#[derive(Debug)]
struct CacheEntry {
    surface: Arc<Surface>,
    last_use: u64,
}

impl CacheEntry {
    // The cache's own reference is the only one left.
    fn is_purgeable(&self) -> bool {
        Arc::strong_count(&self.surface) == 1
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: AHashMap<SurfaceId, CacheEntry>,
    scratch_index: AHashMap<ScratchKey, Vec<SurfaceId>>,
    unique_index: AHashMap<UniqueKey, SurfaceId>,
    timestamp: u64,
    budget: u64,
}

impl CacheState {
    fn next_timestamp(&mut self) -> u64 {
        self.timestamp += 1;
        self.timestamp
    }

    fn touch(&mut self, id: SurfaceId) -> Option<Arc<Surface>> {
        let ts = self.next_timestamp();
        let entry = self.entries.get_mut(&id)?;
        entry.last_use = ts;
        Some(entry.surface.clone())
    }

    fn budgeted_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| e.surface.is_budgeted())
            .map(|e| e.surface.gpu_memory_size())
            .sum()
    }

    fn purgeable_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| e.surface.is_budgeted() && e.is_purgeable())
            .map(|e| e.surface.gpu_memory_size())
            .sum()
    }

    // Purgeable budgeted entries, least recently used first.
    fn purge_candidates(&self) -> Vec<(u64, SurfaceId)> {
        let mut candidates: Vec<(u64, SurfaceId)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.surface.is_budgeted() && e.is_purgeable())
            .map(|(id, e)| (e.last_use, *id))
            .collect();
        candidates.sort_unstable();
        candidates
    }

    fn remove(&mut self, id: SurfaceId) -> Option<Arc<Surface>> {
        let entry = self.entries.remove(&id)?;
        if let Some(key) = entry.surface.scratch_key() {
            if let Some(ids) = self.scratch_index.get_mut(&key) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.scratch_index.remove(&key);
                }
            }
        }
        if let Some(key) = entry.surface.unique_key() {
            if self.unique_index.get(&key) == Some(&id) {
                self.unique_index.remove(&key);
            }
        }
        Some(entry.surface)
    }
}

/// A thread-safe handle used to hand a surface back to the cache of its owning context.
///
/// Sending never blocks. The surface is received the next time the owning context calls
/// [`ResourceCache::process_returned_surfaces`].
#[derive(Debug, Clone)]
pub struct ReturnHandle {
    owner: ContextId,
    sender: flume::Sender<Arc<Surface>>,
}

impl ReturnHandle {
    /// The context whose cache receives returned surfaces.
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    /// Returns `surface` to its owning cache from any thread.
    pub fn return_surface(&self, surface: Arc<Surface>) {
        log::trace!(
            "Returning {} to the cache of context {}",
            surface.id(),
            self.owner.0
        );
        if let Err(e) = self.sender.send(surface) {
            log::warn!("Failed to return surface: {e}. Owning cache likely dropped.");
        }
    }
}

/// Keeps every surface created for one context.
#[derive(Debug)]
pub struct SurfaceCache {
    owner: ContextId,
    state: Mutex<CacheState>,
    returns: (flume::Sender<Arc<Surface>>, flume::Receiver<Arc<Surface>>),
}

impl SurfaceCache {
    /// Creates an empty cache for `owner` with a budget of `budget` bytes.
    pub fn new(owner: ContextId, budget: u64) -> Self {
        Self {
            owner,
            state: Mutex::new(CacheState {
                budget,
                ..Default::default()
            }),
            returns: flume::unbounded(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts tracking `surface`.
    pub fn insert(&self, surface: Arc<Surface>) {
        let mut state = self.lock();
        let id = surface.id();
        if let Some(key) = surface.scratch_key() {
            state.scratch_index.entry(key).or_default().push(id);
        }
        if let Some(key) = surface.unique_key() {
            state.unique_index.insert(key, id);
        }
        let last_use = state.next_timestamp();
        state.entries.insert(id, CacheEntry { surface, last_use });
    }

    /// Returns a handle other threads can use to hand surfaces back to this cache.
    pub fn return_handle(&self) -> ReturnHandle {
        ReturnHandle {
            owner: self.owner,
            sender: self.returns.0.clone(),
        }
    }

    /// Returns `true` if `id` is tracked by this cache.
    pub fn contains(&self, id: SurfaceId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    /// The number of tracked surfaces.
    pub fn surface_count(&self) -> usize {
        self.lock().entries.len()
    }

    /// The byte budget.
    pub fn budget(&self) -> u64 {
        self.lock().budget
    }

    /// Changes the byte budget. Does not purge.
    pub fn set_budget(&self, budget: u64) {
        self.lock().budget = budget;
    }

    /// Drops every unreferenced surface, budgeted or not.
    pub fn purge_unlocked_resources(&self) -> usize {
        let mut state = self.lock();
        let ids: Vec<SurfaceId> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_purgeable())
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            state.remove(*id);
        }
        ids.len()
    }
}

impl ResourceCache for SurfaceCache {
    fn find_and_ref_unique_surface(&self, key: &UniqueKey) -> Option<Arc<Surface>> {
        let mut state = self.lock();
        let id = *state.unique_index.get(key)?;
        state.touch(id)
    }

    fn find_and_ref_scratch_surface(&self, key: &ScratchKey) -> Option<Arc<Surface>> {
        let mut state = self.lock();
        let found = state.scratch_index.get(key)?.iter().copied().find(|id| {
            state
                .entries
                .get(id)
                .is_some_and(|e| e.is_purgeable() && e.surface.unique_key().is_none())
        })?;
        log::trace!("Recycling scratch {found}");
        state.touch(found)
    }

    fn change_unique_key(&self, surface: &Arc<Surface>, key: Option<&UniqueKey>) {
        let mut state = self.lock();
        let id = surface.id();
        if let Some(old) = surface.unique_key() {
            if state.unique_index.get(&old) == Some(&id) {
                state.unique_index.remove(&old);
            }
        }
        if let Some(key) = key {
            if let Some(previous) = state.unique_index.insert(key.clone(), id) {
                if previous != id {
                    if let Some(entry) = state.entries.get(&previous) {
                        log::debug!("Unique key moved from {previous} to {id}");
                        entry.surface.set_unique_key(None);
                    }
                }
            }
        }
        surface.set_unique_key(key.cloned());
    }

    fn make_budgeted(&self, surface: &Arc<Surface>) {
        if !surface.is_budgeted() {
            surface.set_budgeted(true);
        }
    }

    fn purge_to_make_headroom(&self, bytes: u64) -> Result<(), ResourceError> {
        let mut state = self.lock();
        let budgeted = state.budgeted_bytes();
        let Some(needed) = (budgeted + bytes).checked_sub(state.budget) else {
            return Ok(());
        };
        if needed == 0 {
            return Ok(());
        }
        let purgeable = state.purgeable_bytes();
        if purgeable < needed {
            log::warn!(
                "Cannot make {bytes} bytes of headroom: {needed} must be freed, {purgeable} purgeable"
            );
            return Err(ResourceError::BudgetExceeded {
                requested: needed,
                purgeable,
            });
        }
        let mut freed = 0;
        for (_, id) in state.purge_candidates() {
            if freed >= needed {
                break;
            }
            if let Some(surface) = state.remove(id) {
                freed += surface.gpu_memory_size();
            }
        }
        log::debug!("Purged {freed} bytes to make headroom for {bytes}");
        Ok(())
    }

    fn purge_as_needed(&self) {
        let mut state = self.lock();
        let mut budgeted = state.budgeted_bytes();
        for (_, id) in state.purge_candidates() {
            if budgeted <= state.budget {
                break;
            }
            if let Some(surface) = state.remove(id) {
                budgeted -= surface.gpu_memory_size();
            }
        }
    }

    fn budgeted_bytes(&self) -> u64 {
        self.lock().budgeted_bytes()
    }

    fn purgeable_bytes(&self) -> u64 {
        self.lock().purgeable_bytes()
    }

    fn process_returned_surfaces(&self) -> usize {
        let mut received = 0;
        for surface in self.returns.1.try_iter() {
            received += 1;
            if surface.owning_context() != Some(self.owner) {
                log::warn!(
                    "{} returned to context {} but is owned by {:?}",
                    surface.id(),
                    self.owner.0,
                    surface.owning_context()
                );
                continue;
            }
            let mut state = self.lock();
            if state.entries.contains_key(&surface.id()) {
                state.touch(surface.id());
            } else {
                drop(state);
                self.insert(surface);
            }
        }
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{
        Backend, BackendFormat, BackingFit, Budgeted, ISize, KeyDomain, Mipmapped, Protected,
        Renderable, SurfaceDescriptor, TextureFormat,
    };

    fn surface(w: i32, owner: ContextId) -> Arc<Surface> {
        let desc = SurfaceDescriptor {
            dimensions: ISize::new(w, w),
            format: BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm),
            renderable: Renderable::No,
            sample_count: 1,
            mipmapped: Mipmapped::No,
            budgeted: Budgeted::Yes,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: String::new(),
        };
        Arc::new(Surface::new(&desc, Some(owner)))
    }

    #[test]
    fn scratch_lookup_skips_referenced_surfaces() {
        let ctx = ContextId::next();
        let cache = SurfaceCache::new(ctx, u64::MAX);
        let held = surface(16, ctx);
        let key = held.scratch_key().unwrap();
        cache.insert(held.clone());
        assert!(cache.find_and_ref_scratch_surface(&key).is_none());
        drop(held);
        assert!(cache.find_and_ref_scratch_surface(&key).is_some());
    }

    #[test]
    fn unique_key_moves_between_surfaces() {
        let ctx = ContextId::next();
        let cache = SurfaceCache::new(ctx, u64::MAX);
        let a = surface(16, ctx);
        let b = surface(16, ctx);
        cache.insert(a.clone());
        cache.insert(b.clone());
        let key = UniqueKey::new(KeyDomain::generate(), &[7]);
        cache.change_unique_key(&a, Some(&key));
        cache.change_unique_key(&b, Some(&key));
        assert!(a.unique_key().is_none());
        assert_eq!(b.unique_key(), Some(key.clone()));
        assert_eq!(
            cache.find_and_ref_unique_surface(&key).map(|s| s.id()),
            Some(b.id())
        );
        cache.change_unique_key(&b, None);
        assert!(cache.find_and_ref_unique_surface(&key).is_none());
    }

    #[test]
    fn headroom_is_all_or_nothing() {
        let ctx = ContextId::next();
        // Each 16x16 RGBA surface costs 1024 bytes.
        let cache = SurfaceCache::new(ctx, 2048);
        let held = surface(16, ctx);
        cache.insert(held.clone());
        cache.insert(surface(16, ctx));
        assert_eq!(cache.budgeted_bytes(), 2048);
        assert_eq!(cache.purgeable_bytes(), 1024);

        let err = cache.purge_to_make_headroom(2048).unwrap_err();
        assert_eq!(
            err,
            ResourceError::BudgetExceeded {
                requested: 2048,
                purgeable: 1024
            }
        );
        assert_eq!(cache.surface_count(), 2);

        cache.purge_to_make_headroom(1024).unwrap();
        assert_eq!(cache.surface_count(), 1);
        assert!(cache.contains(held.id()));
    }

    #[test]
    fn purge_as_needed_evicts_least_recently_used() {
        let ctx = ContextId::next();
        let cache = SurfaceCache::new(ctx, 4096);
        let old = surface(16, ctx);
        let new = surface(16, ctx);
        let (old_id, new_id) = (old.id(), new.id());
        cache.insert(old);
        cache.insert(new);
        cache.set_budget(1024);
        cache.purge_as_needed();
        assert!(!cache.contains(old_id));
        assert!(cache.contains(new_id));
    }

    #[test]
    fn surfaces_returned_from_another_thread_are_received() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ctx = ContextId::next();
        let cache = SurfaceCache::new(ctx, u64::MAX);
        let s = surface(16, ctx);
        let id = s.id();
        let handle = cache.return_handle();
        std::thread::spawn(move || handle.return_surface(s))
            .join()
            .unwrap();
        assert_eq!(cache.process_returned_surfaces(), 1);
        assert!(cache.contains(id));
        assert_eq!(cache.process_returned_surfaces(), 0);
    }

    #[test]
    fn foreign_surfaces_are_not_adopted() {
        let ctx = ContextId::next();
        let cache = SurfaceCache::new(ctx, u64::MAX);
        let foreign = surface(16, ContextId::next());
        let id = foreign.id();
        cache.return_handle().return_surface(foreign);
        assert_eq!(cache.process_returned_surfaces(), 1);
        assert!(!cache.contains(id));
    }
}
