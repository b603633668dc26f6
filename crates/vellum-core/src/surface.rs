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

//! A backend-allocated block of GPU memory.
//!
//! Surfaces are shared through `Arc<Surface>`. The resource cache keeps one reference of its
//! own, so a surface whose strong count has fallen to one is unreferenced and may be recycled
//! or purged. The release callback fires exactly once, when the surface is finally dropped.

use crate::format::BackendFormat;
use crate::geometry::ISize;
use crate::id::{ContextId, SurfaceId};
use crate::keys::{ScratchKey, UniqueKey};
use crate::types::{BackingFit, Budgeted, Mipmapped, Protected, Renderable, SurfaceFlags};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A callback invoked once when a surface is destroyed.
pub type ReleaseCallback = Box<dyn FnOnce() + Send>;

/// Describes a surface to be created by a resource provider.
#[derive(Debug, Clone)]
pub struct SurfaceDescriptor {
    /// The requested dimensions. For [`BackingFit::Approx`] the provider may round them up.
    pub dimensions: ISize,
    /// The pixel format.
    pub format: BackendFormat,
    /// Whether the surface must be renderable.
    pub renderable: Renderable,
    /// The multisample count. `1` for single-sampled surfaces.
    pub sample_count: u32,
    /// Whether the surface carries a full mip chain.
    pub mipmapped: Mipmapped,
    /// Whether the surface counts against the cache budget.
    pub budgeted: Budgeted,
    /// Whether the surface holds protected content.
    pub protected: Protected,
    /// How closely the backing store must match `dimensions`.
    pub fit: BackingFit,
    /// A debug label.
    pub label: String,
}

impl SurfaceDescriptor {
    /// Returns the scratch key a surface created from this descriptor would carry.
    pub fn scratch_key(&self) -> Option<ScratchKey> {
        ScratchKey::for_surface(
            self.format,
            self.dimensions,
            self.renderable,
            self.sample_count,
            self.mipmapped,
            self.protected,
        )
    }
}

/// A real, backend-allocated texture and/or render target.
pub struct Surface {
    id: SurfaceId,
    dimensions: ISize,
    format: BackendFormat,
    renderable: Renderable,
    texturable: bool,
    sample_count: u32,
    mipmapped: Mipmapped,
    protected: Protected,
    flags: SurfaceFlags,
    scratch_key: Option<ScratchKey>,
    wrapped: bool,
    owning_context: Option<ContextId>,
    label: String,
    budgeted: AtomicBool,
    unique_key: Mutex<Option<UniqueKey>>,
    release_callback: Mutex<Option<ReleaseCallback>>,
}

impl Surface {
    /// Creates a freshly allocated surface matching `desc` exactly.
    ///
    /// Providers are responsible for having applied approximate-fit rounding to
    /// `desc.dimensions` beforehand.
    pub fn new(desc: &SurfaceDescriptor, owning_context: Option<ContextId>) -> Self {
        Self {
            id: SurfaceId::next(),
            dimensions: desc.dimensions,
            format: desc.format,
            renderable: desc.renderable,
            texturable: true,
            sample_count: desc.sample_count.max(1),
            mipmapped: desc.mipmapped,
            protected: desc.protected,
            flags: SurfaceFlags::empty(),
            scratch_key: desc.scratch_key(),
            wrapped: false,
            owning_context,
            label: desc.label.clone(),
            budgeted: AtomicBool::new(desc.budgeted == Budgeted::Yes),
            unique_key: Mutex::new(None),
            release_callback: Mutex::new(None),
        }
    }

    /// Creates a surface that wraps externally-owned memory.
    ///
    /// Wrapped surfaces carry no scratch key and are never budgeted.
    pub fn wrapped(
        desc: &SurfaceDescriptor,
        texturable: bool,
        flags: SurfaceFlags,
        owning_context: Option<ContextId>,
    ) -> Self {
        let mut surface = Self::new(desc, owning_context);
        surface.texturable = texturable;
        surface.flags = flags;
        surface.scratch_key = None;
        surface.wrapped = true;
        surface.budgeted = AtomicBool::new(false);
        surface
    }

    /// The surface's identifier.
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    /// The surface's dimensions.
    pub fn dimensions(&self) -> ISize {
        self.dimensions
    }

    /// The surface's format.
    pub fn format(&self) -> BackendFormat {
        self.format
    }

    /// Returns `true` if the surface can be drawn into.
    pub fn is_render_target(&self) -> bool {
        self.renderable == Renderable::Yes
    }

    /// Returns `true` if the surface can be sampled.
    pub fn is_texture(&self) -> bool {
        self.texturable
    }

    /// The multisample count.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Whether the surface carries a mip chain.
    pub fn mipmapped(&self) -> Mipmapped {
        self.mipmapped
    }

    /// Whether the surface holds protected content.
    pub fn protected(&self) -> Protected {
        self.protected
    }

    /// Usage flags given at wrap time.
    pub fn flags(&self) -> SurfaceFlags {
        self.flags
    }

    /// Returns `true` if the surface wraps externally-owned memory.
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// The context whose cache owns this surface, if any.
    pub fn owning_context(&self) -> Option<ContextId> {
        self.owning_context
    }

    /// The debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The fungibility class of this surface, if it has one.
    pub fn scratch_key(&self) -> Option<ScratchKey> {
        self.scratch_key
    }

    /// The unique key currently attached to this surface.
    pub fn unique_key(&self) -> Option<UniqueKey> {
        self.unique_key.lock().ok().and_then(|k| k.clone())
    }

    /// Attaches or clears the unique key. The resource cache keeps its index in sync.
    pub fn set_unique_key(&self, key: Option<UniqueKey>) {
        if let Ok(mut slot) = self.unique_key.lock() {
            *slot = key;
        }
    }

    /// Returns `true` if the surface counts against the cache budget.
    pub fn is_budgeted(&self) -> bool {
        self.budgeted.load(Ordering::Acquire)
    }

    /// Changes whether the surface counts against the cache budget.
    pub fn set_budgeted(&self, budgeted: bool) {
        if !self.wrapped {
            self.budgeted.store(budgeted, Ordering::Release);
        }
    }

    /// Installs the callback fired when this surface is destroyed, replacing any previous one.
    pub fn set_release_callback(&self, callback: ReleaseCallback) {
        if let Ok(mut slot) = self.release_callback.lock() {
            *slot = Some(callback);
        }
    }

    /// The approximate number of bytes of GPU memory this surface occupies.
    pub fn gpu_memory_size(&self) -> u64 {
        compute_memory_size(
            self.dimensions,
            &self.format,
            self.sample_count,
            self.texturable && self.is_render_target(),
            self.mipmapped,
        )
    }
}

/// Computes the byte cost of a surface with the given shape.
///
/// Multisampled textures that are also render targets carry an extra resolve buffer. A mip
/// chain adds a third of the base level.
pub fn compute_memory_size(
    dimensions: ISize,
    format: &BackendFormat,
    sample_count: u32,
    has_resolve_buffer: bool,
    mipmapped: Mipmapped,
) -> u64 {
    let base = dimensions.area() * format.bytes_per_pixel() as u64;
    let mut samples = sample_count.max(1) as u64;
    if samples > 1 && has_resolve_buffer {
        samples += 1;
    }
    let mut size = base * samples;
    if mipmapped == Mipmapped::Yes {
        size += base / 3;
    }
    size
}

impl Drop for Surface {
    fn drop(&mut self) {
        let callback = self
            .release_callback
            .get_mut()
            .ok()
            .and_then(|slot| slot.take());
        if let Some(callback) = callback {
            log::trace!("Firing release callback for {}", self.id);
            callback();
        }
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("dimensions", &self.dimensions)
            .field("format", &self.format)
            .field("sample_count", &self.sample_count)
            .field("wrapped", &self.wrapped)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Backend, TextureFormat};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn desc(w: i32, h: i32) -> SurfaceDescriptor {
        SurfaceDescriptor {
            dimensions: ISize::new(w, h),
            format: BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm),
            renderable: Renderable::Yes,
            sample_count: 1,
            mipmapped: Mipmapped::No,
            budgeted: Budgeted::Yes,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: "test".into(),
        }
    }

    #[test]
    fn release_callback_fires_once_on_last_drop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let surface = Arc::new(Surface::new(&desc(4, 4), None));
        let counter = fired.clone();
        surface.set_release_callback(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let clone = surface.clone();
        drop(surface);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memory_size_accounts_for_samples_and_mips() {
        let f = BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm);
        let dims = ISize::new(16, 16);
        assert_eq!(compute_memory_size(dims, &f, 1, true, Mipmapped::No), 1024);
        assert_eq!(compute_memory_size(dims, &f, 4, true, Mipmapped::No), 5120);
        assert_eq!(compute_memory_size(dims, &f, 4, false, Mipmapped::No), 4096);
        assert_eq!(compute_memory_size(dims, &f, 1, true, Mipmapped::Yes), 1365);
    }

    #[test]
    fn wrapped_surfaces_have_no_scratch_key_and_are_unbudgeted() {
        let s = Surface::wrapped(&desc(8, 8), true, SurfaceFlags::READ_ONLY, None);
        assert!(s.scratch_key().is_none());
        assert!(!s.is_budgeted());
        s.set_budgeted(true);
        assert!(!s.is_budgeted());
        assert!(Surface::new(&desc(8, 8), None).scratch_key().is_some());
    }
}
