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

//! Placeholders for textures and render targets.
//!
//! A [`SurfaceProxy`] presents a stable identity and a uniform query surface (dimensions,
//! format, instantiation state) whether or not real memory backs it yet. Capability is a tag
//! plus optional texture / render-target attribute blocks, so one concrete type covers
//! texture-only, render-target-only and dual proxies.

use crate::proxy::provider::UniqueKeyTable;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Weak;
use std::sync::Arc;
use vellum_core::{
    approx_size, compute_memory_size, BackendFormat, BackingFit, Budgeted, IRect, ISize,
    MipmapStatus, Mipmapped, Protected, ProxyId, Rect, Renderable, ResourceError,
    ResourceProvider, ScratchKey, Surface, SurfaceDescriptor, SurfaceFlags, UniqueKey,
};

/// What a proxy can be used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyCapability {
    /// Can only be sampled.
    TextureOnly,
    /// Can only be drawn into.
    RenderTargetOnly,
    /// Can be sampled and drawn into.
    TextureRenderTarget,
}

impl ProxyCapability {
    /// The capability matching a real surface.
    pub fn of_surface(surface: &Surface) -> Self {
        match (surface.is_texture(), surface.is_render_target()) {
            (true, true) => Self::TextureRenderTarget,
            (false, true) => Self::RenderTargetOnly,
            _ => Self::TextureOnly,
        }
    }

    /// Returns `true` if proxies with this capability can be sampled.
    pub fn is_texture(self) -> bool {
        !matches!(self, Self::RenderTargetOnly)
    }

    /// Returns `true` if proxies with this capability can be drawn into.
    pub fn is_render_target(self) -> bool {
        !matches!(self, Self::TextureOnly)
    }
}

/// How much of a proxy's shape is known before instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyType {
    /// Not lazy, or already instantiated.
    NotLazy,
    /// Dimensions are known; only the backing comes from the callback.
    Partial,
    /// Even the dimensions come from the callback.
    Fully,
}

/// Whether a lazily produced surface should carry the proxy's unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyKeyMode {
    /// Attach the proxy's unique key to the surface.
    Synced,
    /// Leave the surface's key alone.
    Unsynced,
}

/// What a lazy instantiation callback hands back.
#[derive(Debug)]
pub struct LazyCallbackResult {
    /// The surface to bind, or `None` on failure.
    pub surface: Option<Arc<Surface>>,
    /// Whether the proxy's unique key is copied onto the surface.
    pub key_mode: LazyKeyMode,
    /// If `true` the callback is dropped after a successful instantiation.
    pub release_callback: bool,
}

impl LazyCallbackResult {
    /// A successful result with key sync and a one-shot callback.
    pub fn new(surface: Arc<Surface>) -> Self {
        Self {
            surface: Some(surface),
            key_mode: LazyKeyMode::Synced,
            release_callback: true,
        }
    }

    /// A failed result.
    pub fn failed() -> Self {
        Self {
            surface: None,
            key_mode: LazyKeyMode::Synced,
            release_callback: true,
        }
    }
}

impl From<Option<Arc<Surface>>> for LazyCallbackResult {
    fn from(surface: Option<Arc<Surface>>) -> Self {
        match surface {
            Some(surface) => Self::new(surface),
            None => Self::failed(),
        }
    }
}

/// Produces the backing surface of a lazy proxy.
///
/// The descriptor carries the proxy's declared properties. For fully lazy proxies its
/// dimensions are [`ISize::LAZY`] and its fit is approximate.
pub type LazyInstantiateCallback =
    Box<dyn FnMut(&dyn ResourceProvider, &SurfaceDescriptor) -> LazyCallbackResult>;

/// State only texture-capable proxies carry.
#[derive(Debug)]
pub struct TextureAttrs {
    mipmapped: Mipmapped,
    mipmap_status: Cell<MipmapStatus>,
    pending_upload: RefCell<Option<Vec<u8>>>,
    sync_target_key: Cell<bool>,
}

impl TextureAttrs {
    fn new(mipmapped: Mipmapped, mipmap_status: MipmapStatus) -> Self {
        Self {
            mipmapped,
            mipmap_status: Cell::new(mipmap_status),
            pending_upload: RefCell::new(None),
            sync_target_key: Cell::new(true),
        }
    }

    /// Whether the texture has a mip chain.
    pub fn mipmapped(&self) -> Mipmapped {
        self.mipmapped
    }

    /// The current state of the mip chain.
    pub fn mipmap_status(&self) -> MipmapStatus {
        self.mipmap_status.get()
    }

    /// Returns `true` if the mip levels no longer match the base level.
    pub fn mipmaps_are_dirty(&self) -> bool {
        self.mipmap_status.get() == MipmapStatus::Dirty
    }

    /// Marks the mip levels stale after the base level was written.
    pub fn mark_mipmaps_dirty(&self) {
        debug_assert_eq!(self.mipmapped, Mipmapped::Yes);
        self.mipmap_status.set(MipmapStatus::Dirty);
    }

    /// Marks the mip levels as regenerated.
    pub fn mark_mipmaps_clean(&self) {
        debug_assert_eq!(self.mipmapped, Mipmapped::Yes);
        self.mipmap_status.set(MipmapStatus::Valid);
    }

    /// Returns `true` while CPU pixels are waiting to be uploaded.
    pub fn is_deferred(&self) -> bool {
        self.pending_upload.borrow().is_some()
    }

    /// Whether the proxy's unique key was copied onto a lazily produced surface.
    pub fn sync_target_key(&self) -> bool {
        self.sync_target_key.get()
    }
}

/// State only render-target-capable proxies carry.
#[derive(Debug)]
pub struct RenderTargetAttrs {
    sample_count: u32,
    msaa_dirty_rect: Cell<IRect>,
}

impl RenderTargetAttrs {
    fn new(sample_count: u32) -> Self {
        Self {
            sample_count: sample_count.max(1),
            msaa_dirty_rect: Cell::new(IRect::EMPTY),
        }
    }

    /// The multisample count.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Returns `true` if multisampled content has not been resolved yet.
    pub fn is_msaa_dirty(&self) -> bool {
        !self.msaa_dirty_rect.get().is_empty()
    }

    /// The region that needs resolving.
    pub fn msaa_dirty_rect(&self) -> IRect {
        self.msaa_dirty_rect.get()
    }

    /// Grows the unresolved region by `rect`.
    pub fn mark_msaa_dirty(&self, rect: IRect) {
        let mut dirty = self.msaa_dirty_rect.get();
        dirty.join(&rect);
        self.msaa_dirty_rect.set(dirty);
    }

    /// Forgets the unresolved region.
    pub fn mark_msaa_resolved(&self) {
        self.msaa_dirty_rect.set(IRect::EMPTY);
    }
}

/// A deferred, lazy or wrapped stand-in for a GPU surface.
pub struct SurfaceProxy {
    id: ProxyId,
    format: BackendFormat,
    dimensions: Cell<ISize>,
    fit: BackingFit,
    budgeted: Budgeted,
    protected: Protected,
    flags: SurfaceFlags,
    capability: ProxyCapability,
    texture: Option<TextureAttrs>,
    render_target: Option<RenderTargetAttrs>,
    label: String,
    wrapped: bool,
    target: RefCell<Option<Arc<Surface>>>,
    lazy_callback: RefCell<Option<LazyInstantiateCallback>>,
    // A one-shot callback that already ran, kept until its binding is committed.
    spent_callback: RefCell<Option<LazyInstantiateCallback>>,
    unique_key: RefCell<Option<UniqueKey>>,
    key_table: RefCell<Weak<UniqueKeyTable>>,
}

impl SurfaceProxy {
    /// Builds a proxy without backing memory.
    ///
    /// `desc.renderable` is ignored in favor of `capability`. Passing a callback makes the
    /// proxy lazy; [`ISize::LAZY`] dimensions make it fully lazy.
    pub(crate) fn deferred(
        desc: &SurfaceDescriptor,
        capability: ProxyCapability,
        flags: SurfaceFlags,
        mipmap_status: MipmapStatus,
        callback: Option<LazyInstantiateCallback>,
    ) -> Self {
        Self {
            id: ProxyId::next(),
            format: desc.format,
            dimensions: Cell::new(desc.dimensions),
            fit: desc.fit,
            budgeted: desc.budgeted,
            protected: desc.protected,
            flags,
            capability,
            texture: capability
                .is_texture()
                .then(|| TextureAttrs::new(desc.mipmapped, mipmap_status)),
            render_target: capability
                .is_render_target()
                .then(|| RenderTargetAttrs::new(desc.sample_count)),
            label: desc.label.clone(),
            wrapped: false,
            target: RefCell::new(None),
            lazy_callback: RefCell::new(callback),
            spent_callback: RefCell::new(None),
            unique_key: RefCell::new(None),
            key_table: RefCell::new(Weak::new()),
        }
    }

    /// Builds an already-instantiated proxy around `surface`.
    pub(crate) fn wrapped(surface: Arc<Surface>) -> Self {
        let capability = ProxyCapability::of_surface(&surface);
        let mipmapped = surface.mipmapped();
        let status = match mipmapped {
            Mipmapped::Yes => MipmapStatus::Valid,
            Mipmapped::No => MipmapStatus::NotAllocated,
        };
        Self {
            id: ProxyId::next(),
            format: surface.format(),
            dimensions: Cell::new(surface.dimensions()),
            fit: BackingFit::Exact,
            budgeted: if surface.is_budgeted() {
                Budgeted::Yes
            } else {
                Budgeted::No
            },
            protected: surface.protected(),
            flags: surface.flags(),
            capability,
            texture: capability
                .is_texture()
                .then(|| TextureAttrs::new(mipmapped, status)),
            render_target: capability
                .is_render_target()
                .then(|| RenderTargetAttrs::new(surface.sample_count())),
            label: surface.label().to_owned(),
            wrapped: surface.is_wrapped(),
            target: RefCell::new(Some(surface)),
            lazy_callback: RefCell::new(None),
            spent_callback: RefCell::new(None),
            unique_key: RefCell::new(None),
            key_table: RefCell::new(Weak::new()),
        }
    }

    /// The proxy's identity.
    pub fn id(&self) -> ProxyId {
        self.id
    }

    /// The declared dimensions. [`ISize::LAZY`] for uninstantiated fully lazy proxies, empty
    /// after a failed lazy instantiation.
    pub fn dimensions(&self) -> ISize {
        self.dimensions.get()
    }

    /// The declared width.
    pub fn width(&self) -> i32 {
        self.dimensions.get().width
    }

    /// The declared height.
    pub fn height(&self) -> i32 {
        self.dimensions.get().height
    }

    /// The pixel format.
    pub fn format(&self) -> BackendFormat {
        self.format
    }

    /// How closely the backing store must match the declared dimensions.
    pub fn fit(&self) -> BackingFit {
        self.fit
    }

    /// Whether the backing store counts against the cache budget.
    pub fn budgeted(&self) -> Budgeted {
        self.budgeted
    }

    /// Whether the proxy holds protected content.
    pub fn protected(&self) -> Protected {
        self.protected
    }

    /// Usage flags.
    pub fn flags(&self) -> SurfaceFlags {
        self.flags
    }

    /// The debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// What the proxy can be used as.
    pub fn capability(&self) -> ProxyCapability {
        self.capability
    }

    /// Texture state, if the proxy can be sampled.
    pub fn as_texture(&self) -> Option<&TextureAttrs> {
        self.texture.as_ref()
    }

    /// Render-target state, if the proxy can be drawn into.
    pub fn as_render_target(&self) -> Option<&RenderTargetAttrs> {
        self.render_target.as_ref()
    }

    /// Returns `true` if the proxy can be sampled.
    pub fn is_texture(&self) -> bool {
        self.texture.is_some()
    }

    /// Returns `true` if the proxy can be drawn into.
    pub fn is_render_target(&self) -> bool {
        self.render_target.is_some()
    }

    /// Returns `true` if the proxy wraps externally-owned memory.
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }

    /// The multisample count, `1` for texture-only proxies.
    pub fn sample_count(&self) -> u32 {
        self.render_target.as_ref().map_or(1, |rt| rt.sample_count())
    }

    /// Whether the proxy carries a mip chain.
    pub fn mipmapped(&self) -> Mipmapped {
        self.texture.as_ref().map_or(Mipmapped::No, |t| t.mipmapped())
    }

    /// Returns `true` if the proxy must never be written to.
    pub fn read_only(&self) -> bool {
        self.flags.contains(SurfaceFlags::READ_ONLY)
    }

    /// Returns `true` if multisampled rendering must be followed by an explicit resolve.
    pub fn requires_manual_msaa_resolve(&self) -> bool {
        self.flags
            .contains(SurfaceFlags::REQUIRES_MANUAL_MSAA_RESOLVE)
    }

    /// Returns `true` if the render target replays through a secondary command buffer.
    pub fn wraps_secondary_cb(&self) -> bool {
        self.flags.contains(SurfaceFlags::WRAPS_SECONDARY_CB)
    }

    /// Returns `true` if CPU pixels are waiting to be uploaded into this proxy.
    pub fn is_deferred(&self) -> bool {
        self.texture.as_ref().is_some_and(|t| t.is_deferred())
    }

    /// Returns `true` once a surface is bound.
    pub fn is_instantiated(&self) -> bool {
        self.target.borrow().is_some()
    }

    /// The bound surface, if any.
    pub fn peek_surface(&self) -> Option<Arc<Surface>> {
        self.target.borrow().clone()
    }

    /// Returns `true` if the backing has to come from the instantiation callback.
    pub fn is_lazy(&self) -> bool {
        !self.is_instantiated() && self.lazy_callback.borrow().is_some()
    }

    /// Returns `true` if even the dimensions are unknown until instantiation.
    pub fn is_fully_lazy(&self) -> bool {
        self.dimensions.get().is_lazy_sentinel()
    }

    /// How lazy the proxy currently is.
    pub fn lazy_type(&self) -> LazyType {
        if !self.is_lazy() {
            LazyType::NotLazy
        } else if self.is_fully_lazy() {
            LazyType::Fully
        } else {
            LazyType::Partial
        }
    }

    /// The unique key currently held by this proxy.
    pub fn unique_key(&self) -> Option<UniqueKey> {
        self.unique_key.borrow().clone()
    }

    /// Returns `true` if the proxy holds a unique key.
    pub fn has_unique_key(&self) -> bool {
        self.unique_key.borrow().is_some()
    }

    /// Returns `true` while the proxy is registered with a live provider.
    pub fn is_registered(&self) -> bool {
        self.key_table.borrow().strong_count() > 0
    }

    /// The dimensions of the real surface, bound or future.
    ///
    /// Exact-fit proxies report their declared size and approximate-fit proxies their bucket.
    /// Uninstantiated fully lazy proxies have no meaningful answer and report
    /// [`ISize::LAZY`].
    pub fn backing_store_dimensions(&self) -> ISize {
        if let Some(surface) = self.target.borrow().as_ref() {
            return surface.dimensions();
        }
        let dims = self.dimensions.get();
        if self.fit == BackingFit::Exact || dims.is_lazy_sentinel() {
            dims
        } else {
            approx_size(dims)
        }
    }

    /// The full backing store as an integer rectangle.
    pub fn backing_store_bounds(&self) -> IRect {
        IRect::from_size(self.backing_store_dimensions())
    }

    /// The full backing store as a float rectangle.
    pub fn backing_store_bounds_rect(&self) -> Rect {
        Rect::from(self.backing_store_bounds())
    }

    /// Returns `true` if the backing store will be exactly the declared size.
    pub fn is_functionally_exact(&self) -> bool {
        let dims = self.dimensions.get();
        self.fit == BackingFit::Exact || dims == approx_size(dims)
    }

    /// Derives the fungibility class of this proxy's future backing store.
    ///
    /// Returns `None` for fully lazy proxies and failed instantiations.
    pub fn compute_scratch_key(&self) -> Option<ScratchKey> {
        if self.is_fully_lazy() {
            return None;
        }
        let renderable = if self.is_render_target() {
            Renderable::Yes
        } else {
            Renderable::No
        };
        ScratchKey::for_surface(
            self.format,
            self.backing_store_dimensions(),
            renderable,
            self.sample_count(),
            self.mipmapped(),
            self.protected,
        )
    }

    /// The number of bytes the backing store will occupy.
    pub fn gpu_memory_size(&self) -> u64 {
        if let Some(surface) = self.target.borrow().as_ref() {
            return surface.gpu_memory_size();
        }
        if self.is_fully_lazy() {
            return 0;
        }
        compute_memory_size(
            self.backing_store_dimensions(),
            &self.format,
            self.sample_count(),
            self.is_texture() && self.is_render_target(),
            self.mipmapped(),
        )
    }

    /// The descriptor handed to the resource provider or to the lazy callback.
    pub fn surface_descriptor(&self) -> SurfaceDescriptor {
        let (dimensions, fit) = if self.is_fully_lazy() {
            (ISize::LAZY, BackingFit::Approx)
        } else if self.is_functionally_exact() {
            (self.dimensions.get(), BackingFit::Exact)
        } else {
            (self.dimensions.get(), BackingFit::Approx)
        };
        SurfaceDescriptor {
            dimensions,
            format: self.format,
            renderable: if self.is_render_target() {
                Renderable::Yes
            } else {
                Renderable::No
            },
            sample_count: self.sample_count(),
            mipmapped: self.mipmapped(),
            budgeted: self.budgeted,
            protected: self.protected,
            fit,
            label: self.label.clone(),
        }
    }

    /// Allocates a brand-new surface matching this proxy. Does not bind it.
    /// ## Errors
    /// * `ResourceError` - If the provider cannot satisfy the request.
    pub fn create_surface(
        &self,
        provider: &dyn ResourceProvider,
    ) -> Result<Arc<Surface>, ResourceError> {
        debug_assert!(!self.is_fully_lazy(), "fully lazy proxies have no shape yet");
        let desc = self.surface_descriptor();
        match desc.fit {
            BackingFit::Approx => provider.create_approx_texture(&desc),
            BackingFit::Exact => provider.create_texture(&desc),
        }
    }

    /// Backs a non-lazy proxy with a surface, reattaching to a cached one by unique key when
    /// possible.
    ///
    /// Already-instantiated proxies, including every wrapped proxy, succeed immediately.
    /// ## Errors
    /// * `ResourceError::LazyProxy` - If the proxy must go through its callback instead.
    /// * `ResourceError` - If the provider cannot create the surface.
    pub fn instantiate(&self, provider: &dyn ResourceProvider) -> Result<(), ResourceError> {
        if self.is_instantiated() {
            return Ok(());
        }
        if self.is_lazy() {
            return Err(ResourceError::LazyProxy);
        }
        let key = self.unique_key();
        if let Some(surface) = key.as_ref().and_then(|k| provider.find_by_unique_key(k)) {
            self.assign(surface);
            return Ok(());
        }
        let surface = self.create_surface(provider)?;
        if let Some(key) = key {
            provider.assign_unique_key_to_surface(&key, &surface);
        }
        self.assign(surface);
        Ok(())
    }

    /// Backs a lazy proxy by running its callback.
    ///
    /// A uniquely keyed proxy first tries the cache. On failure the proxy's dimensions are
    /// set to empty so later queries see the failed state. A one-shot callback is held back
    /// until the allocator commits the binding, so a dropped flush can run it again.
    /// ## Errors
    /// * `ResourceError::LazyCallbackFailed` - If the callback produced no surface.
    pub fn do_lazy_instantiation(
        &self,
        provider: &dyn ResourceProvider,
    ) -> Result<(), ResourceError> {
        if self.is_instantiated() {
            return Ok(());
        }
        let key = self.unique_key();
        let mut surface = key.as_ref().and_then(|k| provider.find_by_unique_key(k));
        let mut sync_key = true;
        if surface.is_none() {
            // Taken out so the callback may freely query this proxy.
            let Some(mut callback) = self.lazy_callback.borrow_mut().take() else {
                return Err(ResourceError::LazyCallbackFailed);
            };
            let result = callback(provider, &self.surface_descriptor());
            sync_key = result.key_mode == LazyKeyMode::Synced;
            let one_shot = result.surface.is_some() && result.release_callback;
            surface = result.surface;
            if one_shot {
                *self.spent_callback.borrow_mut() = Some(callback);
            } else {
                *self.lazy_callback.borrow_mut() = Some(callback);
            }
        }
        let Some(surface) = surface else {
            log::warn!("Lazy instantiation of {} ('{}') failed", self.id, self.label);
            self.dimensions.set(ISize::default());
            return Err(ResourceError::LazyCallbackFailed);
        };
        if self.is_fully_lazy() {
            self.dimensions.set(surface.dimensions());
        }
        if let Some(texture) = &self.texture {
            texture.sync_target_key.set(sync_key);
            if sync_key {
                if let Some(key) = &key {
                    if surface.unique_key().is_none() {
                        provider.assign_unique_key_to_surface(key, &surface);
                    }
                }
            }
        }
        self.assign(surface);
        Ok(())
    }

    /// Binds `surface` to this proxy.
    pub(crate) fn assign(&self, surface: Arc<Surface>) {
        debug_assert!(!self.is_instantiated(), "{} is already instantiated", self.id);
        log::trace!("Binding {} to {}", surface.id(), self.id);
        *self.target.borrow_mut() = Some(surface);
    }

    /// Drops the bound surface.
    pub fn deinstantiate(&self) {
        debug_assert!(self.is_instantiated(), "{} is not instantiated", self.id);
        self.target.borrow_mut().take();
    }

    /// Unbinds a surface bound for a flush that is being dropped.
    ///
    /// A one-shot callback that already ran is restored, and a proxy that was fully lazy
    /// forgets the dimensions the callback gave it.
    pub(crate) fn roll_back_instantiation(&self, was_fully_lazy: bool) {
        if self.target.borrow_mut().take().is_none() {
            return;
        }
        if let Some(callback) = self.spent_callback.borrow_mut().take() {
            *self.lazy_callback.borrow_mut() = Some(callback);
        }
        if was_fully_lazy && self.lazy_callback.borrow().is_some() {
            self.dimensions.set(ISize::LAZY);
        }
        log::trace!("Rolled back the binding of {}", self.id);
    }

    /// Drops a one-shot callback once its binding can no longer be rolled back.
    pub(crate) fn release_spent_callback(&self) {
        self.spent_callback.borrow_mut().take();
    }

    /// Takes the CPU pixels waiting to be uploaded, leaving the proxy non-deferred.
    pub(crate) fn take_pending_upload(&self) -> Option<Vec<u8>> {
        self.texture
            .as_ref()
            .and_then(|t| t.pending_upload.borrow_mut().take())
    }

    pub(crate) fn set_pending_upload(&self, pixels: Vec<u8>) {
        if let Some(texture) = &self.texture {
            *texture.pending_upload.borrow_mut() = Some(pixels);
        }
    }

    pub(crate) fn set_unique_key(&self, key: UniqueKey, table: Weak<UniqueKeyTable>) {
        *self.unique_key.borrow_mut() = Some(key);
        *self.key_table.borrow_mut() = table;
    }

    pub(crate) fn clear_unique_key(&self) {
        self.unique_key.borrow_mut().take();
        *self.key_table.borrow_mut() = Weak::new();
    }

    /// Detaches the proxy from its provider while keeping the key value.
    pub(crate) fn orphan(&self) {
        *self.key_table.borrow_mut() = Weak::new();
    }
}

impl Drop for SurfaceProxy {
    fn drop(&mut self) {
        let key = self.unique_key.get_mut().take();
        if let (Some(key), Some(table)) = (key, self.key_table.get_mut().upgrade()) {
            table.forget(&key, self.id);
        }
    }
}

impl fmt::Debug for SurfaceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceProxy")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("dimensions", &self.dimensions.get())
            .field("capability", &self.capability)
            .field("fit", &self.fit)
            .field("lazy", &self.lazy_type())
            .field("target", &self.target.borrow().as_ref().map(|s| s.id()))
            .field("unique_key", &self.unique_key.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{Backend, Caps, ContextOptions, TextureFormat};
    use vellum_infra::HeadlessResourceProvider;

    fn desc(w: i32, h: i32, fit: BackingFit) -> SurfaceDescriptor {
        SurfaceDescriptor {
            dimensions: ISize::new(w, h),
            format: BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm),
            renderable: Renderable::Yes,
            sample_count: 1,
            mipmapped: Mipmapped::No,
            budgeted: Budgeted::Yes,
            protected: Protected::No,
            fit,
            label: "test".into(),
        }
    }

    fn provider() -> HeadlessResourceProvider {
        HeadlessResourceProvider::new(Caps::default(), &ContextOptions::default())
    }

    fn deferred(d: &SurfaceDescriptor) -> SurfaceProxy {
        SurfaceProxy::deferred(
            d,
            ProxyCapability::TextureRenderTarget,
            SurfaceFlags::empty(),
            MipmapStatus::NotAllocated,
            None,
        )
    }

    #[test]
    fn approx_proxies_report_bucketed_backing_store() {
        let proxy = deferred(&desc(100, 20, BackingFit::Approx));
        assert_eq!(proxy.dimensions(), ISize::new(100, 20));
        assert_eq!(proxy.backing_store_dimensions(), ISize::new(128, 32));
        let exact = deferred(&desc(100, 20, BackingFit::Exact));
        assert_eq!(exact.backing_store_dimensions(), ISize::new(100, 20));
    }

    #[test]
    fn instantiate_binds_a_surface_of_the_backing_size() {
        let provider = provider();
        let proxy = deferred(&desc(100, 20, BackingFit::Approx));
        proxy.instantiate(&provider).unwrap();
        let surface = proxy.peek_surface().unwrap();
        assert_eq!(surface.dimensions(), ISize::new(128, 32));
        assert_eq!(proxy.compute_scratch_key(), surface.scratch_key());

        proxy.deinstantiate();
        assert!(!proxy.is_instantiated());
    }

    #[test]
    fn instantiate_refuses_lazy_proxies() {
        let provider = provider();
        let proxy = SurfaceProxy::deferred(
            &desc(8, 8, BackingFit::Exact),
            ProxyCapability::TextureRenderTarget,
            SurfaceFlags::empty(),
            MipmapStatus::NotAllocated,
            Some(Box::new(
                |_: &dyn ResourceProvider, _: &SurfaceDescriptor| LazyCallbackResult::failed(),
            )),
        );
        assert_eq!(proxy.instantiate(&provider), Err(ResourceError::LazyProxy));
    }

    #[test]
    fn fully_lazy_proxy_adopts_callback_dimensions() {
        let provider = provider();
        let mut d = desc(1, 1, BackingFit::Approx);
        d.dimensions = ISize::LAZY;
        let proxy = SurfaceProxy::deferred(
            &d,
            ProxyCapability::TextureRenderTarget,
            SurfaceFlags::empty(),
            MipmapStatus::NotAllocated,
            Some(Box::new(
                |provider: &dyn ResourceProvider, request: &SurfaceDescriptor| {
                    assert_eq!(request.dimensions, ISize::LAZY);
                    let mut real = request.clone();
                    real.dimensions = ISize::new(40, 30);
                    real.fit = BackingFit::Exact;
                    provider.create_texture(&real).ok().into()
                },
            )),
        );
        assert_eq!(proxy.lazy_type(), LazyType::Fully);
        assert_eq!(proxy.gpu_memory_size(), 0);

        proxy.do_lazy_instantiation(&provider).unwrap();
        assert_eq!(proxy.dimensions(), ISize::new(40, 30));
        assert_eq!(proxy.lazy_type(), LazyType::NotLazy);
    }

    #[test]
    fn failed_lazy_instantiation_empties_dimensions() {
        let provider = provider();
        let proxy = SurfaceProxy::deferred(
            &desc(8, 8, BackingFit::Exact),
            ProxyCapability::TextureOnly,
            SurfaceFlags::empty(),
            MipmapStatus::NotAllocated,
            Some(Box::new(
                |_: &dyn ResourceProvider, _: &SurfaceDescriptor| LazyCallbackResult::failed(),
            )),
        );
        assert_eq!(
            proxy.do_lazy_instantiation(&provider),
            Err(ResourceError::LazyCallbackFailed)
        );
        assert!(proxy.dimensions().is_empty());
        // The callback is kept so a later flush may retry.
        assert!(proxy.is_lazy());
    }

    #[test]
    fn msaa_dirty_region_accumulates_until_resolved() {
        let attrs = RenderTargetAttrs::new(4);
        assert!(!attrs.is_msaa_dirty());
        attrs.mark_msaa_dirty(IRect::from_ltrb(0, 0, 4, 4));
        attrs.mark_msaa_dirty(IRect::from_ltrb(8, 8, 10, 10));
        assert_eq!(attrs.msaa_dirty_rect(), IRect::from_ltrb(0, 0, 10, 10));
        attrs.mark_msaa_resolved();
        assert!(!attrs.is_msaa_dirty());
    }

    #[test]
    fn memory_size_includes_resolve_buffer_for_msaa_textures() {
        let mut d = desc(16, 16, BackingFit::Exact);
        d.sample_count = 4;
        let proxy = deferred(&d);
        assert_eq!(proxy.gpu_memory_size(), 16 * 16 * 4 * 5);
    }
}
