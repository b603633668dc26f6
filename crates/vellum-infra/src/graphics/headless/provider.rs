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

use crate::resource::{ReturnHandle, SurfaceCache};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use vellum_core::types::approx_size;
use vellum_core::{
    BackendRenderTarget, BackendTexture, BackingFit, Budgeted, Caps, ContextId, ContextOptions,
    IoType, Protected, Renderable, ResourceCache, ResourceError, ResourceProvider, Surface,
    SurfaceDescriptor, SurfaceFlags, WrapCacheable, WrapOwnership,
};

/// A [`ResourceProvider`] whose surfaces are bookkeeping objects only.
///
/// Allocation can be made to fail on demand, which is how tests exercise out-of-memory and
/// all-or-nothing flush behavior.
#[derive(Debug)]
pub struct HeadlessResourceProvider {
    context_id: ContextId,
    caps: Caps,
    cache: SurfaceCache,
    abandoned: AtomicBool,
    surfaces_created: AtomicUsize,
    // Number of allocations that may still succeed before every allocation fails.
    allocation_limit: Mutex<Option<usize>>,
}

impl HeadlessResourceProvider {
    /// Creates a provider for a fresh context.
    pub fn new(caps: Caps, options: &ContextOptions) -> Self {
        let mut caps = caps;
        caps.apply_options(options);
        let context_id = ContextId::next();
        log::debug!(
            "Headless provider for context {} (budget {} bytes)",
            context_id.0,
            options.resource_budget_bytes
        );
        Self {
            context_id,
            caps,
            cache: SurfaceCache::new(context_id, options.resource_budget_bytes),
            abandoned: AtomicBool::new(false),
            surfaces_created: AtomicUsize::new(0),
            allocation_limit: Mutex::new(None),
        }
    }

    /// The concrete cache, for callers that need more than the [`ResourceCache`] contract.
    pub fn surface_cache(&self) -> &SurfaceCache {
        &self.cache
    }

    /// A handle other threads can use to return surfaces to this provider's cache.
    pub fn return_handle(&self) -> ReturnHandle {
        self.cache.return_handle()
    }

    /// How many surfaces this provider has allocated. Wrapping and recycling do not count.
    pub fn surfaces_created(&self) -> usize {
        self.surfaces_created.load(Ordering::Relaxed)
    }

    /// Lets `count` more allocations succeed, then fails every later one.
    /// `None` removes the limit.
    pub fn set_allocation_limit(&self, count: Option<usize>) {
        if let Ok(mut limit) = self.allocation_limit.lock() {
            *limit = count;
        }
    }

    /// Makes every factory fail from now on.
    pub fn abandon(&self) {
        log::debug!("Context {} abandoned", self.context_id.0);
        self.abandoned.store(true, Ordering::Release);
    }

    fn take_allocation(&self) -> bool {
        let Ok(mut limit) = self.allocation_limit.lock() else {
            return false;
        };
        match limit.as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    fn check_alive(&self) -> Result<(), ResourceError> {
        if self.is_abandoned() {
            Err(ResourceError::Abandoned)
        } else {
            Ok(())
        }
    }

    fn validate(&self, desc: &SurfaceDescriptor) -> Result<(), ResourceError> {
        if !desc.format.is_valid() || desc.format.backend() != self.caps.backend {
            return Err(ResourceError::InvalidFormat);
        }
        if desc.protected == Protected::Yes && !self.caps.protected_content_support {
            return Err(ResourceError::InvalidFormat);
        }
        if !self.caps.validate_surface_params(
            desc.dimensions,
            &desc.format,
            desc.renderable,
            desc.sample_count,
            desc.mipmapped,
        ) {
            return Err(ResourceError::InvalidGeometry {
                dimensions: desc.dimensions,
            });
        }
        Ok(())
    }

    fn wrapped_descriptor(
        texture: &BackendTexture,
        renderable: Renderable,
        sample_count: u32,
    ) -> SurfaceDescriptor {
        SurfaceDescriptor {
            dimensions: texture.dimensions,
            format: texture.format,
            renderable,
            sample_count,
            mipmapped: texture.mipmapped,
            budgeted: Budgeted::No,
            protected: texture.protected,
            fit: BackingFit::Exact,
            label: format!("wrapped#{}", texture.handle),
        }
    }

    fn finish_wrap(
        &self,
        surface: Surface,
        handle: u64,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
    ) -> Arc<Surface> {
        if ownership == WrapOwnership::Adopt {
            surface.set_release_callback(Box::new(move || {
                log::trace!("Freeing adopted backend handle {handle}");
            }));
        }
        let surface = Arc::new(surface);
        if cacheable == WrapCacheable::Yes {
            self.cache.insert(surface.clone());
        }
        surface
    }
}

impl ResourceProvider for HeadlessResourceProvider {
    fn context_id(&self) -> ContextId {
        self.context_id
    }

    fn caps(&self) -> &Caps {
        &self.caps
    }

    fn cache(&self) -> &dyn ResourceCache {
        &self.cache
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    fn create_texture(&self, desc: &SurfaceDescriptor) -> Result<Arc<Surface>, ResourceError> {
        self.check_alive()?;
        self.validate(desc)?;
        if !self.take_allocation() {
            log::warn!("Allocation of '{}' failed", desc.label);
            return Err(ResourceError::AllocationFailed {
                label: desc.label.clone(),
            });
        }
        let surface = Arc::new(Surface::new(desc, Some(self.context_id)));
        self.surfaces_created.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "Created {} ({}x{}) for '{}'",
            surface.id(),
            desc.dimensions.width,
            desc.dimensions.height,
            desc.label
        );
        self.cache.insert(surface.clone());
        Ok(surface)
    }

    fn create_approx_texture(
        &self,
        desc: &SurfaceDescriptor,
    ) -> Result<Arc<Surface>, ResourceError> {
        self.check_alive()?;
        let mut rounded = desc.clone();
        rounded.dimensions = approx_size(desc.dimensions);
        rounded.fit = BackingFit::Approx;
        if let Some(key) = rounded.scratch_key() {
            if let Some(surface) = self.cache.find_and_ref_scratch_surface(&key) {
                if desc.budgeted == Budgeted::Yes {
                    self.cache.make_budgeted(&surface);
                }
                return Ok(surface);
            }
        }
        self.create_texture(&rounded)
    }

    fn wrap_backend_texture(
        &self,
        texture: &BackendTexture,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
        io_type: IoType,
    ) -> Result<Arc<Surface>, ResourceError> {
        self.check_alive()?;
        if !texture.format.is_valid() {
            return Err(ResourceError::InvalidFormat);
        }
        if texture.dimensions.is_empty() {
            return Err(ResourceError::InvalidGeometry {
                dimensions: texture.dimensions,
            });
        }
        let flags = match io_type {
            IoType::Read => SurfaceFlags::READ_ONLY,
            IoType::ReadWrite => SurfaceFlags::empty(),
        };
        let desc = Self::wrapped_descriptor(texture, Renderable::No, 1);
        let surface = Surface::wrapped(&desc, true, flags, Some(self.context_id));
        Ok(self.finish_wrap(surface, texture.handle, ownership, cacheable))
    }

    fn wrap_renderable_backend_texture(
        &self,
        texture: &BackendTexture,
        sample_count: u32,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
    ) -> Result<Arc<Surface>, ResourceError> {
        self.check_alive()?;
        let sample_count = self
            .caps
            .get_render_target_sample_count(sample_count, &texture.format)
            .ok_or(ResourceError::InvalidFormat)?;
        if texture.dimensions.is_empty()
            || texture.dimensions.width > self.caps.max_render_target_size
            || texture.dimensions.height > self.caps.max_render_target_size
        {
            return Err(ResourceError::InvalidGeometry {
                dimensions: texture.dimensions,
            });
        }
        let desc = Self::wrapped_descriptor(texture, Renderable::Yes, sample_count);
        let mut flags = SurfaceFlags::empty();
        if sample_count > 1 && !self.caps.msaa_resolves_automatically {
            flags |= SurfaceFlags::REQUIRES_MANUAL_MSAA_RESOLVE;
        }
        let surface = Surface::wrapped(&desc, true, flags, Some(self.context_id));
        Ok(self.finish_wrap(surface, texture.handle, ownership, cacheable))
    }

    fn wrap_backend_render_target(
        &self,
        render_target: &BackendRenderTarget,
    ) -> Result<Arc<Surface>, ResourceError> {
        self.check_alive()?;
        if !render_target.format.is_valid() {
            return Err(ResourceError::InvalidFormat);
        }
        if render_target.dimensions.is_empty() {
            return Err(ResourceError::InvalidGeometry {
                dimensions: render_target.dimensions,
            });
        }
        let desc = SurfaceDescriptor {
            dimensions: render_target.dimensions,
            format: render_target.format,
            renderable: Renderable::Yes,
            sample_count: render_target.sample_count.max(1),
            mipmapped: vellum_core::Mipmapped::No,
            budgeted: Budgeted::No,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: format!("render_target#{}", render_target.handle),
        };
        let surface = Surface::wrapped(&desc, false, render_target.flags, Some(self.context_id));
        Ok(self.finish_wrap(
            surface,
            render_target.handle,
            WrapOwnership::Borrow,
            WrapCacheable::No,
        ))
    }
}
