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

//! The proxy provider.
//!
//! One [`ProxyProvider`] exists per context. It is the factory for deferred, lazy and wrapped
//! proxies, and the single registry mapping unique keys to live proxies.

use crate::proxy::surface_proxy::{LazyInstantiateCallback, ProxyCapability, SurfaceProxy};
use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use vellum_core::{
    BackendFormat, BackendRenderTarget, BackendTexture, BackingFit, Budgeted, Caps, ISize,
    IoType, MipmapStatus, Mipmapped, Protected, ProxyId, ReleaseCallback, Renderable,
    ResourceError, ResourceProvider, Surface, SurfaceDescriptor, SurfaceFlags, UniqueKey,
    WrapCacheable, WrapOwnership,
};

/// Whether invalidating a proxy's key also strips it from the cached surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidateGpuResource {
    /// Remove the key from the cached surface too.
    Yes,
    /// Only forget the proxy's key.
    No,
}

/// Unique key to live proxy. Entries hold weak references; a dropped proxy removes its own.
#[derive(Debug, Default)]
pub(crate) struct UniqueKeyTable {
    entries: RefCell<AHashMap<UniqueKey, (ProxyId, Weak<SurfaceProxy>)>>,
}

impl UniqueKeyTable {
    fn find(&self, key: &UniqueKey) -> Option<Rc<SurfaceProxy>> {
        self.entries.borrow().get(key).and_then(|(_, p)| p.upgrade())
    }

    fn insert(&self, key: UniqueKey, proxy: &Rc<SurfaceProxy>) {
        self.entries
            .borrow_mut()
            .insert(key, (proxy.id(), Rc::downgrade(proxy)));
    }

    fn remove(&self, key: &UniqueKey) {
        self.entries.borrow_mut().remove(key);
    }

    /// Removes `key` if `owner` still holds it. Used from `SurfaceProxy::drop`, which may run
    /// while the table is already borrowed.
    pub(crate) fn forget(&self, key: &UniqueKey, owner: ProxyId) {
        if let Ok(mut entries) = self.entries.try_borrow_mut() {
            if entries.get(key).is_some_and(|(id, _)| *id == owner) {
                entries.remove(key);
            }
        }
    }

    fn drain(&self) -> Vec<Rc<SurfaceProxy>> {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        entries.into_values().filter_map(|(_, p)| p.upgrade()).collect()
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

/// Creates proxies and owns the unique-key registry of one context.
///
/// Every factory fails closed: it returns `None` when the provider is abandoned, the
/// dimensions exceed device limits, or the format does not suit the backend.
#[derive(Debug)]
pub struct ProxyProvider {
    resource_provider: Rc<dyn ResourceProvider>,
    keys: Rc<UniqueKeyTable>,
    abandoned: Cell<bool>,
}

impl ProxyProvider {
    /// Creates a provider that allocates through `resource_provider`.
    pub fn new(resource_provider: Rc<dyn ResourceProvider>) -> Self {
        Self {
            resource_provider,
            keys: Rc::new(UniqueKeyTable::default()),
            abandoned: Cell::new(false),
        }
    }

    /// The device capabilities proxies are validated against.
    pub fn caps(&self) -> &Caps {
        self.resource_provider.caps()
    }

    /// The resource provider backing this proxy provider.
    pub fn resource_provider(&self) -> &Rc<dyn ResourceProvider> {
        &self.resource_provider
    }

    /// Returns `true` once this provider or its resource provider was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.get() || self.resource_provider.is_abandoned()
    }

    /// Makes every factory fail from now on.
    pub fn abandon(&self) {
        log::debug!("Proxy provider abandoned with {} keyed proxies", self.keys.len());
        self.abandoned.set(true);
    }

    /// The number of keys currently registered.
    pub fn num_unique_key_proxies(&self) -> usize {
        self.keys.len()
    }

    // --- Unique keys ---

    /// Registers `proxy` under `key`.
    ///
    /// ## Errors
    /// * `ResourceError::Abandoned` - If the provider was abandoned.
    /// * `ResourceError::KeyConflict` - If a live proxy already holds `key`, a cached surface
    ///   other than the proxy's own already carries it, or the proxy already has a key.
    pub fn assign_unique_key_to_proxy(
        &self,
        key: &UniqueKey,
        proxy: &Rc<SurfaceProxy>,
    ) -> Result<(), ResourceError> {
        if self.is_abandoned() {
            return Err(ResourceError::Abandoned);
        }
        if proxy.has_unique_key() || self.keys.find(key).is_some() {
            log::warn!("{key:?} is already held by a live proxy");
            return Err(ResourceError::KeyConflict);
        }
        let own = proxy.peek_surface();
        if let Some(cached) = self.resource_provider.find_by_unique_key(key) {
            if own.as_ref().map(|s| s.id()) != Some(cached.id()) {
                log::warn!("{key:?} is already held by cached {}", cached.id());
                return Err(ResourceError::KeyConflict);
            }
        }
        if let Some(surface) = own {
            let syncs = proxy.as_texture().map_or(true, |t| t.sync_target_key());
            if syncs && surface.unique_key().is_none() {
                self.resource_provider
                    .assign_unique_key_to_surface(key, &surface);
            }
        }
        proxy.set_unique_key(key.clone(), Rc::downgrade(&self.keys));
        self.keys.insert(key.clone(), proxy);
        Ok(())
    }

    /// Returns the live proxy registered under `key`.
    pub fn find_proxy_by_unique_key(&self, key: &UniqueKey) -> Option<Rc<SurfaceProxy>> {
        if self.is_abandoned() {
            return None;
        }
        self.keys.find(key)
    }

    /// Returns the proxy registered under `key`, or wraps the cached surface holding `key`
    /// in a new registered proxy.
    pub fn find_or_create_proxy_by_unique_key(
        &self,
        key: &UniqueKey,
    ) -> Option<Rc<SurfaceProxy>> {
        if let Some(proxy) = self.find_proxy_by_unique_key(key) {
            return Some(proxy);
        }
        let surface = self.resource_provider.find_by_unique_key(key)?;
        let proxy = self.wrap_surface(surface);
        debug_assert_eq!(proxy.unique_key().as_ref(), Some(key));
        Some(proxy)
    }

    /// Strips `proxy`'s key from the registry and from its cached surface.
    pub fn remove_unique_key_from_proxy(&self, proxy: &Rc<SurfaceProxy>) {
        if let Some(key) = proxy.unique_key() {
            self.process_invalid_unique_key(&key, Some(proxy), InvalidateGpuResource::Yes);
        }
    }

    /// Invalidates `key`.
    ///
    /// The proxy holding it (given, or looked up) loses the key. With
    /// [`InvalidateGpuResource::Yes`] the cached surface holding it loses the key as well.
    pub fn process_invalid_unique_key(
        &self,
        key: &UniqueKey,
        proxy: Option<&Rc<SurfaceProxy>>,
        invalidate: InvalidateGpuResource,
    ) {
        let proxy = proxy.cloned().or_else(|| self.keys.find(key));
        // Looked up before the proxy's key is cleared, since `key` may alias it.
        let invalid_surface = match invalidate {
            InvalidateGpuResource::Yes => self.resource_provider.find_by_unique_key(key),
            InvalidateGpuResource::No => None,
        };
        if let Some(proxy) = proxy {
            debug_assert_eq!(proxy.unique_key().as_ref(), Some(key));
            self.keys.remove(key);
            proxy.clear_unique_key();
        }
        if let Some(surface) = invalid_surface {
            self.resource_provider.remove_unique_key_from_surface(&surface);
        }
    }

    /// Detaches every keyed proxy from this provider, keeping the key values.
    ///
    /// Used when a recording context goes away while its proxies may still be replayed
    /// against another context.
    pub fn orphan_all_unique_keys(&self) {
        for proxy in self.keys.drain() {
            proxy.orphan();
        }
    }

    /// Clears every proxy's key without touching the cached surfaces.
    pub fn remove_all_unique_keys(&self) {
        for proxy in self.keys.drain() {
            proxy.clear_unique_key();
        }
    }

    // --- Factories ---

    fn check_format(&self, format: &BackendFormat) -> bool {
        format.is_valid() && format.backend() == self.caps().backend
    }

    fn render_target_flags(&self, sample_count: u32) -> SurfaceFlags {
        if sample_count > 1 && !self.caps().msaa_resolves_automatically {
            SurfaceFlags::REQUIRES_MANUAL_MSAA_RESOLVE
        } else {
            SurfaceFlags::empty()
        }
    }

    /// Creates a deferred proxy.
    ///
    /// Renderable requests get a dual texture/render-target proxy with the sample count
    /// rounded up to one the device supports. Mipmaps are dropped for 1×1 surfaces.
    pub fn create_proxy(&self, desc: &SurfaceDescriptor) -> Option<Rc<SurfaceProxy>> {
        if self.is_abandoned() {
            return None;
        }
        let caps = self.caps();
        if !self.check_format(&desc.format)
            || !caps.validate_surface_params(
                desc.dimensions,
                &desc.format,
                desc.renderable,
                desc.sample_count,
                desc.mipmapped,
            )
        {
            log::warn!(
                "Rejected proxy '{}' ({}x{})",
                desc.label,
                desc.dimensions.width,
                desc.dimensions.height
            );
            return None;
        }
        let mut desc = desc.clone();
        if desc.mipmapped == Mipmapped::Yes && desc.dimensions.area() <= 1 {
            desc.mipmapped = Mipmapped::No;
        }
        if desc.mipmapped == Mipmapped::Yes && desc.fit == BackingFit::Approx {
            log::warn!("Approximate-fit proxy '{}' cannot be mipmapped", desc.label);
            return None;
        }
        let status = match desc.mipmapped {
            Mipmapped::Yes => MipmapStatus::Dirty,
            Mipmapped::No => MipmapStatus::NotAllocated,
        };
        let (capability, flags) = match desc.renderable {
            Renderable::Yes => {
                desc.sample_count =
                    caps.get_render_target_sample_count(desc.sample_count, &desc.format)?;
                (
                    ProxyCapability::TextureRenderTarget,
                    self.render_target_flags(desc.sample_count),
                )
            }
            Renderable::No => {
                desc.sample_count = 1;
                (ProxyCapability::TextureOnly, SurfaceFlags::empty())
            }
        };
        let proxy = SurfaceProxy::deferred(&desc, capability, flags, status, None);
        log::trace!("Created deferred {} '{}'", proxy.id(), desc.label);
        Some(Rc::new(proxy))
    }

    /// Creates an exact-fit texture proxy whose `pixels` are uploaded before the first task
    /// that reads it executes.
    ///
    /// `pixels` must be tightly packed rows of `format`.
    pub fn create_proxy_from_pixels(
        &self,
        pixels: Vec<u8>,
        dimensions: ISize,
        format: BackendFormat,
        mipmapped: Mipmapped,
        budgeted: Budgeted,
        label: &str,
    ) -> Option<Rc<SurfaceProxy>> {
        let expected = dimensions.area() * u64::from(format.bytes_per_pixel());
        if pixels.len() as u64 != expected {
            log::warn!(
                "Pixel data for '{label}' is {} bytes, expected {expected}",
                pixels.len()
            );
            return None;
        }
        let proxy = self.create_proxy(&SurfaceDescriptor {
            dimensions,
            format,
            renderable: Renderable::No,
            sample_count: 1,
            mipmapped,
            budgeted,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: label.to_owned(),
        })?;
        proxy.set_pending_upload(pixels);
        Some(proxy)
    }

    // The checks shared by the lazy factories. Dimensions left to the callback require an
    // approximate fit, and render targets get a sample count the device supports.
    fn lazy_descriptor(
        &self,
        desc: &SurfaceDescriptor,
        renderable: bool,
        max_size: i32,
    ) -> Option<SurfaceDescriptor> {
        if self.is_abandoned() || !self.check_format(&desc.format) {
            return None;
        }
        if desc.dimensions.width > max_size || desc.dimensions.height > max_size {
            log::warn!("Lazy proxy '{}' exceeds the maximum size {max_size}", desc.label);
            return None;
        }
        if desc.dimensions.is_lazy_sentinel() && desc.fit != BackingFit::Approx {
            log::warn!("Fully lazy proxy '{}' must be approximate-fit", desc.label);
            return None;
        }
        let mut desc = desc.clone();
        desc.sample_count = if renderable {
            let Some(count) = self
                .caps()
                .get_render_target_sample_count(desc.sample_count, &desc.format)
            else {
                log::warn!(
                    "Lazy render target '{}' asks for unsupported {} samples",
                    desc.label,
                    desc.sample_count
                );
                return None;
            };
            count
        } else {
            1
        };
        Some(desc)
    }

    /// Creates a texture proxy whose backing comes from `callback`.
    ///
    /// A renderable descriptor yields a dual texture/render-target proxy with its sample
    /// count rounded up to a supported one. [`ISize::LAZY`] dimensions make the proxy fully
    /// lazy and are refused unless the descriptor is approximate-fit.
    pub fn create_lazy_proxy(
        &self,
        callback: LazyInstantiateCallback,
        desc: &SurfaceDescriptor,
        mipmap_status: MipmapStatus,
    ) -> Option<Rc<SurfaceProxy>> {
        let renderable = desc.renderable == Renderable::Yes;
        let desc = self.lazy_descriptor(desc, renderable, self.caps().max_texture_size)?;
        let (capability, flags) = if renderable {
            (
                ProxyCapability::TextureRenderTarget,
                self.render_target_flags(desc.sample_count),
            )
        } else {
            (ProxyCapability::TextureOnly, SurfaceFlags::empty())
        };
        Some(Rc::new(SurfaceProxy::deferred(
            &desc,
            capability,
            flags,
            mipmap_status,
            Some(callback),
        )))
    }

    /// Creates a render-target proxy whose backing comes from `callback`.
    ///
    /// With `texturable` the proxy may also be sampled. `wraps_secondary_cb` marks a render
    /// target whose draws replay through a secondary command buffer.
    pub fn create_lazy_render_target_proxy(
        &self,
        callback: LazyInstantiateCallback,
        desc: &SurfaceDescriptor,
        texturable: bool,
        wraps_secondary_cb: bool,
    ) -> Option<Rc<SurfaceProxy>> {
        let desc = self.lazy_descriptor(desc, true, self.caps().max_render_target_size)?;
        let mut flags = self.render_target_flags(desc.sample_count);
        if wraps_secondary_cb {
            flags |= SurfaceFlags::WRAPS_SECONDARY_CB;
        }
        let capability = if texturable {
            ProxyCapability::TextureRenderTarget
        } else {
            ProxyCapability::RenderTargetOnly
        };
        let status = match desc.mipmapped {
            Mipmapped::Yes => MipmapStatus::Dirty,
            Mipmapped::No => MipmapStatus::NotAllocated,
        };
        Some(Rc::new(SurfaceProxy::deferred(
            &desc,
            capability,
            flags,
            status,
            Some(callback),
        )))
    }

    /// Creates a proxy whose dimensions, as well as its backing, come from `callback`.
    ///
    /// Such proxies are approximate-fit, budgeted and never mipmapped.
    pub fn make_fully_lazy_proxy(
        &self,
        callback: LazyInstantiateCallback,
        format: BackendFormat,
        renderable: Renderable,
        sample_count: u32,
        protected: Protected,
    ) -> Option<Rc<SurfaceProxy>> {
        let desc = self.lazy_descriptor(
            &SurfaceDescriptor {
                dimensions: ISize::LAZY,
                format,
                renderable,
                sample_count,
                mipmapped: Mipmapped::No,
                budgeted: Budgeted::Yes,
                protected,
                fit: BackingFit::Approx,
                label: "FullyLazyProxy".into(),
            },
            renderable == Renderable::Yes,
            self.caps().max_texture_size,
        )?;
        let (capability, flags) = match renderable {
            Renderable::Yes => (
                ProxyCapability::TextureRenderTarget,
                self.render_target_flags(desc.sample_count),
            ),
            Renderable::No => (ProxyCapability::TextureOnly, SurfaceFlags::empty()),
        };
        Some(Rc::new(SurfaceProxy::deferred(
            &desc,
            capability,
            flags,
            MipmapStatus::NotAllocated,
            Some(callback),
        )))
    }

    /// Wraps an existing surface, adopting its unique key if no live proxy holds it.
    pub fn wrap_surface(&self, surface: Arc<Surface>) -> Rc<SurfaceProxy> {
        let key = surface.unique_key();
        let proxy = Rc::new(SurfaceProxy::wrapped(surface));
        if let Some(key) = key {
            if self.keys.find(&key).is_none() {
                proxy.set_unique_key(key.clone(), Rc::downgrade(&self.keys));
                self.keys.insert(key, &proxy);
            }
        }
        proxy
    }

    fn finish_wrap(
        &self,
        surface: Result<Arc<Surface>, ResourceError>,
        release: Option<ReleaseCallback>,
    ) -> Option<Rc<SurfaceProxy>> {
        let surface = match surface {
            Ok(surface) => surface,
            Err(err) => {
                log::warn!("Failed to wrap backend object: {err}");
                return None;
            }
        };
        if let Some(release) = release {
            surface.set_release_callback(release);
        }
        Some(self.wrap_surface(surface))
    }

    /// Wraps an externally allocated texture. `release` runs when the wrapped surface dies.
    pub fn wrap_backend_texture(
        &self,
        texture: &BackendTexture,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
        io_type: IoType,
        release: Option<ReleaseCallback>,
    ) -> Option<Rc<SurfaceProxy>> {
        if self.is_abandoned() {
            return None;
        }
        let surface = self.resource_provider.wrap_backend_texture(
            texture, ownership, cacheable, io_type,
        );
        self.finish_wrap(surface, release)
    }

    /// Wraps an externally allocated texture that may also be drawn into.
    pub fn wrap_renderable_backend_texture(
        &self,
        texture: &BackendTexture,
        sample_count: u32,
        ownership: WrapOwnership,
        cacheable: WrapCacheable,
        release: Option<ReleaseCallback>,
    ) -> Option<Rc<SurfaceProxy>> {
        if self.is_abandoned() {
            return None;
        }
        let sample_count = self
            .caps()
            .get_render_target_sample_count(sample_count, &texture.format)?;
        let surface = self.resource_provider.wrap_renderable_backend_texture(
            texture,
            sample_count,
            ownership,
            cacheable,
        );
        self.finish_wrap(surface, release)
    }

    /// Wraps an externally allocated render target, such as a window's framebuffer.
    pub fn wrap_backend_render_target(
        &self,
        render_target: &BackendRenderTarget,
        release: Option<ReleaseCallback>,
    ) -> Option<Rc<SurfaceProxy>> {
        if self.is_abandoned() {
            return None;
        }
        let surface = self
            .resource_provider
            .wrap_backend_render_target(render_target);
        self.finish_wrap(surface, release)
    }
}

impl Drop for ProxyProvider {
    fn drop(&mut self) {
        self.orphan_all_unique_keys();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{Backend, ContextOptions, KeyDomain, TextureFormat};
    use vellum_infra::HeadlessResourceProvider;

    fn rgba() -> BackendFormat {
        BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm)
    }

    fn desc(w: i32, h: i32, renderable: Renderable) -> SurfaceDescriptor {
        SurfaceDescriptor {
            dimensions: ISize::new(w, h),
            format: rgba(),
            renderable,
            sample_count: 1,
            mipmapped: Mipmapped::No,
            budgeted: Budgeted::Yes,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: "test".into(),
        }
    }

    fn provider() -> ProxyProvider {
        ProxyProvider::new(Rc::new(HeadlessResourceProvider::new(
            Caps::default(),
            &ContextOptions::default(),
        )))
    }

    #[test]
    fn renderable_proxies_round_sample_counts_up() {
        let provider = provider();
        let mut d = desc(32, 32, Renderable::Yes);
        d.sample_count = 3;
        let proxy = provider.create_proxy(&d).unwrap();
        assert_eq!(proxy.sample_count(), 4);
        assert_eq!(proxy.capability(), ProxyCapability::TextureRenderTarget);
        assert!(proxy.requires_manual_msaa_resolve());

        d.sample_count = 16;
        assert!(provider.create_proxy(&d).is_none());
    }

    #[test]
    fn single_pixel_proxies_drop_mipmaps() {
        let provider = provider();
        let mut d = desc(1, 1, Renderable::No);
        d.mipmapped = Mipmapped::Yes;
        let proxy = provider.create_proxy(&d).unwrap();
        assert_eq!(proxy.mipmapped(), Mipmapped::No);

        d.dimensions = ISize::new(8, 8);
        let proxy = provider.create_proxy(&d).unwrap();
        assert_eq!(proxy.mipmapped(), Mipmapped::Yes);
        assert!(proxy.as_texture().unwrap().mipmaps_are_dirty());
    }

    #[test]
    fn oversized_and_foreign_requests_fail_closed() {
        let provider = provider();
        assert!(provider.create_proxy(&desc(9000, 4, Renderable::No)).is_none());
        let mut d = desc(4, 4, Renderable::No);
        d.format = BackendFormat::new(Backend::Vulkan, TextureFormat::Rgba8Unorm);
        assert!(provider.create_proxy(&d).is_none());
        let lazy = provider.create_lazy_proxy(
            Box::new(|_: &dyn ResourceProvider, _: &SurfaceDescriptor| {
                crate::proxy::LazyCallbackResult::failed()
            }),
            &desc(9000, 4, Renderable::No),
            MipmapStatus::NotAllocated,
        );
        assert!(lazy.is_none());
    }

    #[test]
    fn dropping_a_keyed_proxy_frees_its_key() {
        let provider = provider();
        let key = UniqueKey::new(KeyDomain::generate(), &[1]);
        let proxy = provider.create_proxy(&desc(8, 8, Renderable::No)).unwrap();
        provider.assign_unique_key_to_proxy(&key, &proxy).unwrap();
        assert_eq!(provider.num_unique_key_proxies(), 1);
        drop(proxy);
        assert_eq!(provider.num_unique_key_proxies(), 0);
        assert!(provider.find_proxy_by_unique_key(&key).is_none());
    }

    #[test]
    fn abandoned_provider_creates_nothing() {
        let provider = provider();
        provider.abandon();
        assert!(provider.create_proxy(&desc(8, 8, Renderable::No)).is_none());
        let proxy = Rc::new(SurfaceProxy::deferred(
            &desc(8, 8, Renderable::No),
            ProxyCapability::TextureOnly,
            SurfaceFlags::empty(),
            MipmapStatus::NotAllocated,
            None,
        ));
        let key = UniqueKey::new(KeyDomain::generate(), &[2]);
        assert_eq!(
            provider.assign_unique_key_to_proxy(&key, &proxy),
            Err(ResourceError::Abandoned)
        );
    }
}
