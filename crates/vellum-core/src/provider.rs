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

//! The resource provider and resource cache contracts.
//!
//! A [`ResourceProvider`] creates and wraps [`Surface`]s for one context. Its
//! [`ResourceCache`] keeps every surface it created, indexed by scratch key and unique key, so
//! that unreferenced surfaces can be recycled or purged.

use crate::caps::Caps;
use crate::error::ResourceError;
use crate::format::BackendFormat;
use crate::geometry::ISize;
use crate::id::ContextId;
use crate::keys::{ScratchKey, UniqueKey};
use crate::surface::{Surface, SurfaceDescriptor};
use crate::types::{Mipmapped, Protected, SurfaceFlags};
use std::fmt::Debug;
use std::sync::Arc;

/// Who frees the backend memory behind a wrapped surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapOwnership {
    /// The client keeps ownership; the memory outlives the surface.
    Borrow,
    /// The surface takes ownership and frees the memory when destroyed.
    Adopt,
}

/// Whether a wrapped surface may be kept by the resource cache after its last use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapCacheable {
    /// The cache keeps the surface so it can be found again by unique key.
    Yes,
    /// The surface is destroyed as soon as it is unreferenced.
    No,
}

/// Whether a wrapped texture may be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    /// Sample-only; any write is a usage error.
    Read,
    /// Reads and writes are allowed.
    ReadWrite,
}

/// A texture allocated outside this system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTexture {
    /// The native handle, opaque to this system.
    pub handle: u64,
    /// The texture's dimensions.
    pub dimensions: ISize,
    /// The texture's format.
    pub format: BackendFormat,
    /// Whether the texture has a mip chain.
    pub mipmapped: Mipmapped,
    /// Whether the texture holds protected content.
    pub protected: Protected,
}

/// A render target allocated outside this system, such as a window's framebuffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRenderTarget {
    /// The native handle, opaque to this system.
    pub handle: u64,
    /// The render target's dimensions.
    pub dimensions: ISize,
    /// The render target's format.
    pub format: BackendFormat,
    /// The multisample count.
    pub sample_count: u32,
    /// Backend usage flags, e.g. [`SurfaceFlags::WRAPS_SECONDARY_CB`].
    pub flags: SurfaceFlags,
}

/// Keeps every surface created for one context, indexed for reuse.
///
/// A surface is *purgeable* when the cache holds the only reference to it.
pub trait ResourceCache: Debug {
    /// Returns the surface holding `key`, if any.
    fn find_and_ref_unique_surface(&self, key: &UniqueKey) -> Option<Arc<Surface>>;

    /// Returns an unreferenced surface with `key` and no unique key, if any.
    fn find_and_ref_scratch_surface(&self, key: &ScratchKey) -> Option<Arc<Surface>>;

    /// Sets or clears the unique key of `surface`, keeping the key index in sync.
    ///
    /// Assigning a key held by another surface moves it to `surface`.
    fn change_unique_key(&self, surface: &Arc<Surface>, key: Option<&UniqueKey>);

    /// Marks `surface` as budgeted and updates the byte accounting.
    fn make_budgeted(&self, surface: &Arc<Surface>);

    /// Purges unreferenced surfaces until `bytes` more budgeted bytes fit within the budget.
    ///
    /// Nothing is purged if the headroom cannot be reached.
    /// ## Errors
    /// * `ResourceError::BudgetExceeded` - If not enough purgeable memory exists.
    fn purge_to_make_headroom(&self, bytes: u64) -> Result<(), ResourceError>;

    /// Purges unreferenced surfaces, least recently used first, until under budget.
    fn purge_as_needed(&self);

    /// The total size of budgeted surfaces.
    fn budgeted_bytes(&self) -> u64;

    /// The total size of budgeted surfaces that are currently purgeable.
    fn purgeable_bytes(&self) -> u64;

    /// Drains surfaces handed back from other threads. Returns how many were received.
    fn process_returned_surfaces(&self) -> usize;
}

/// Creates and wraps surfaces for one context.
///
/// All creation calls are synchronous and fail closed. A returned surface's format and
/// dimensions match the request exactly, except that approximate-fit requests may be rounded up.
pub trait ResourceProvider: Debug {
    /// The context this provider belongs to.
    fn context_id(&self) -> ContextId;

    /// The capabilities of the device behind this provider.
    fn caps(&self) -> &Caps;

    /// The cache of surfaces created by this provider.
    fn cache(&self) -> &dyn ResourceCache;

    /// Returns `true` once the context has been abandoned.
    fn is_abandoned(&self) -> bool;

    /// Creates a new, never-before-used surface of exactly `desc.dimensions`.
    /// ## Errors
    /// * `ResourceError` - If the parameters are invalid or the device is out of memory.
    fn create_texture(&self, desc: &SurfaceDescriptor) -> Result<Arc<Surface>, ResourceError>;

    /// Creates or recycles a surface whose dimensions are `desc.dimensions` rounded up to the
    /// approximate-fit bucket.
    fn create_approx_texture(
        &self,
        desc: &SurfaceDescriptor,
    ) -> Result<Arc<Surface>, ResourceError>;

    /// Wraps an externally allocated texture.
    fn wrap_backend_texture(
        &self,
        texture: &BackendTexture,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
        io_type: IoType,
    ) -> Result<Arc<Surface>, ResourceError>;

    /// Wraps an externally allocated texture that may also be rendered into.
    fn wrap_renderable_backend_texture(
        &self,
        texture: &BackendTexture,
        sample_count: u32,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
    ) -> Result<Arc<Surface>, ResourceError>;

    /// Wraps an externally allocated render target.
    fn wrap_backend_render_target(
        &self,
        render_target: &BackendRenderTarget,
    ) -> Result<Arc<Surface>, ResourceError>;

    /// Finds a cached surface by unique key.
    fn find_by_unique_key(&self, key: &UniqueKey) -> Option<Arc<Surface>> {
        if self.is_abandoned() {
            return None;
        }
        self.cache().find_and_ref_unique_surface(key)
    }

    /// Attaches `key` to `surface` in the cache.
    fn assign_unique_key_to_surface(&self, key: &UniqueKey, surface: &Arc<Surface>) {
        if self.is_abandoned() {
            return;
        }
        self.cache().change_unique_key(surface, Some(key));
    }

    /// Detaches whatever unique key `surface` holds.
    fn remove_unique_key_from_surface(&self, surface: &Arc<Surface>) {
        if self.is_abandoned() {
            return;
        }
        self.cache().change_unique_key(surface, None);
    }
}
