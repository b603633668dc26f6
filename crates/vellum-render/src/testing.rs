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

//! Fixtures shared by the unit tests.

use crate::manager::DrawingManager;
use crate::proxy::{ProxyCapability, SurfaceProxy};
use std::rc::Rc;
use vellum_core::{
    Backend, BackendFormat, BackingFit, Budgeted, Caps, ContextOptions, ISize, MipmapStatus,
    Mipmapped, Protected, Renderable, SurfaceDescriptor, SurfaceFlags, TextureFormat,
};
use vellum_infra::{HeadlessResourceProvider, RecordingDevice};

pub(crate) fn rgba_desc(w: i32, h: i32, fit: BackingFit) -> SurfaceDescriptor {
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

/// An exact-fit, renderable and texturable RGBA proxy.
pub(crate) fn deferred_proxy(w: i32, h: i32) -> Rc<SurfaceProxy> {
    Rc::new(SurfaceProxy::deferred(
        &rgba_desc(w, h, BackingFit::Exact),
        ProxyCapability::TextureRenderTarget,
        SurfaceFlags::empty(),
        MipmapStatus::NotAllocated,
        None,
    ))
}

pub(crate) fn headless_provider() -> Rc<HeadlessResourceProvider> {
    Rc::new(HeadlessResourceProvider::new(
        Caps::default(),
        &ContextOptions::default(),
    ))
}

/// A mipmapped RGBA proxy whose mip levels start dirty.
pub(crate) fn mipmapped_proxy(w: i32, h: i32) -> Rc<SurfaceProxy> {
    let mut desc = rgba_desc(w, h, BackingFit::Exact);
    desc.mipmapped = Mipmapped::Yes;
    Rc::new(SurfaceProxy::deferred(
        &desc,
        ProxyCapability::TextureRenderTarget,
        SurfaceFlags::empty(),
        MipmapStatus::Dirty,
        None,
    ))
}

/// A 4x multisampled render target that needs explicit resolves.
pub(crate) fn msaa_proxy(w: i32, h: i32) -> Rc<SurfaceProxy> {
    let mut desc = rgba_desc(w, h, BackingFit::Exact);
    desc.sample_count = 4;
    Rc::new(SurfaceProxy::deferred(
        &desc,
        ProxyCapability::TextureRenderTarget,
        SurfaceFlags::REQUIRES_MANUAL_MSAA_RESOLVE,
        MipmapStatus::NotAllocated,
        None,
    ))
}

pub(crate) fn manager(options: ContextOptions) -> (DrawingManager, Rc<RecordingDevice>) {
    let device = Rc::new(RecordingDevice::new());
    let provider = Rc::new(HeadlessResourceProvider::new(Caps::default(), &options));
    (DrawingManager::new(provider, device.clone(), options), device)
}
