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

//! Lending a surface created on one context to another.
//!
//! The mutex guards only the transfer record: the current borrower and the callback to run
//! when the borrow ends. When the handoff is dropped, the surface is sent back to its owning
//! cache as an explicit message rather than being released on whichever thread drops it.

use crate::resource::cache::ReturnHandle;
use std::sync::{Arc, Mutex};
use vellum_core::{ContextId, ReleaseCallback, ResourceError, Surface};

#[derive(Default)]
struct TransferState {
    borrower: Option<ContextId>,
    on_borrow_end: Option<ReleaseCallback>,
}

/// A surface owned by one context that other contexts may borrow, one at a time.
pub struct SurfaceHandoff {
    surface: Option<Arc<Surface>>,
    owner: ContextId,
    return_handle: ReturnHandle,
    state: Mutex<TransferState>,
}

impl SurfaceHandoff {
    /// Wraps `surface` for lending. It is returned through `return_handle` when the handoff
    /// is dropped.
    pub fn new(surface: Arc<Surface>, return_handle: ReturnHandle) -> Self {
        Self {
            owner: return_handle.owner(),
            surface: Some(surface),
            return_handle,
            state: Mutex::new(TransferState::default()),
        }
    }

    /// The context that owns the surface.
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    /// The context currently borrowing the surface, if any.
    pub fn borrower(&self) -> Option<ContextId> {
        self.state.lock().ok().and_then(|s| s.borrower)
    }

    /// Lends the surface to `borrower`.
    ///
    /// The owning context may always use its own surface. Another context may borrow it only
    /// if nobody else currently does; borrowing again from the same context is allowed.
    /// `on_borrow_end` runs when the borrow is released.
    /// ## Errors
    /// * `ResourceError::CrossContextMisuse` - If a different context holds the borrow.
    pub fn borrow_for(
        &self,
        borrower: ContextId,
        on_borrow_end: Option<ReleaseCallback>,
    ) -> Result<Arc<Surface>, ResourceError> {
        let surface = self.surface.clone().ok_or(ResourceError::NotFound)?;
        if borrower == self.owner {
            return Ok(surface);
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| ResourceError::BackendError("handoff lock poisoned".into()))?;
        match state.borrower {
            Some(current) if current != borrower => {
                log::warn!(
                    "Surface {} requested by context {} while borrowed by context {}",
                    surface.id(),
                    borrower.0,
                    current.0
                );
                Err(ResourceError::CrossContextMisuse {
                    owner: self.owner,
                    borrower: current,
                })
            }
            _ => {
                state.borrower = Some(borrower);
                if on_borrow_end.is_some() {
                    state.on_borrow_end = on_borrow_end;
                }
                Ok(surface)
            }
        }
    }

    /// Ends the current borrow, running its callback. Does nothing if `borrower` does not hold
    /// the borrow.
    pub fn release_borrow(&self, borrower: ContextId) {
        let callback = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.borrower != Some(borrower) {
                return;
            }
            state.borrower = None;
            state.on_borrow_end.take()
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for SurfaceHandoff {
    fn drop(&mut self) {
        let callback = self
            .state
            .get_mut()
            .ok()
            .and_then(|s| s.on_borrow_end.take());
        if let Some(callback) = callback {
            callback();
        }
        if let Some(surface) = self.surface.take() {
            self.return_handle.return_surface(surface);
        }
    }
}

impl std::fmt::Debug for SurfaceHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceHandoff")
            .field("surface", &self.surface.as_ref().map(|s| s.id()))
            .field("owner", &self.owner)
            .field("borrower", &self.borrower())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::SurfaceCache;
    use std::sync::atomic::{AtomicBool, Ordering};
    use vellum_core::{
        Backend, BackendFormat, BackingFit, Budgeted, ISize, Mipmapped, Protected, Renderable,
        ResourceCache, SurfaceDescriptor, TextureFormat,
    };

    fn owned_surface(owner: ContextId) -> Arc<Surface> {
        let desc = SurfaceDescriptor {
            dimensions: ISize::new(32, 32),
            format: BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm),
            renderable: Renderable::No,
            sample_count: 1,
            mipmapped: Mipmapped::No,
            budgeted: Budgeted::Yes,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: "shared".into(),
        };
        Arc::new(Surface::new(&desc, Some(owner)))
    }

    #[test]
    fn second_borrower_is_refused() {
        let owner = ContextId::next();
        let cache = SurfaceCache::new(owner, u64::MAX);
        let handoff = SurfaceHandoff::new(owned_surface(owner), cache.return_handle());
        let b = ContextId::next();
        let c = ContextId::next();

        assert!(handoff.borrow_for(b, None).is_ok());
        assert!(handoff.borrow_for(b, None).is_ok());
        assert!(matches!(
            handoff.borrow_for(c, None),
            Err(ResourceError::CrossContextMisuse { borrower, .. }) if borrower == b
        ));
        assert!(handoff.borrow_for(owner, None).is_ok());

        handoff.release_borrow(b);
        assert!(handoff.borrow_for(c, None).is_ok());
        assert_eq!(handoff.borrower(), Some(c));
    }

    #[test]
    fn release_runs_borrow_end_callback() {
        let owner = ContextId::next();
        let cache = SurfaceCache::new(owner, u64::MAX);
        let handoff = SurfaceHandoff::new(owned_surface(owner), cache.return_handle());
        let ended = Arc::new(AtomicBool::new(false));
        let flag = ended.clone();
        let borrower = ContextId::next();
        handoff
            .borrow_for(
                borrower,
                Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
            )
            .unwrap();
        handoff.release_borrow(ContextId::next());
        assert!(!ended.load(Ordering::SeqCst));
        handoff.release_borrow(borrower);
        assert!(ended.load(Ordering::SeqCst));
    }

    #[test]
    fn dropping_on_another_thread_returns_surface_to_owner() {
        let owner = ContextId::next();
        let cache = SurfaceCache::new(owner, u64::MAX);
        let surface = owned_surface(owner);
        let id = surface.id();
        let handoff = SurfaceHandoff::new(surface, cache.return_handle());
        std::thread::spawn(move || {
            let borrower = ContextId::next();
            let s = handoff.borrow_for(borrower, None).unwrap();
            assert_eq!(s.id(), id);
            drop(s);
            drop(handoff);
        })
        .join()
        .unwrap();
        assert_eq!(cache.process_returned_surfaces(), 1);
        assert!(cache.contains(id));
    }
}
