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

//! Setup shared by the integration tests.

#![allow(dead_code)]

use std::rc::Rc;
use vellum_core::{
    Backend, BackendFormat, BackingFit, Budgeted, Caps, ContextOptions, GpuDevice, ISize,
    Mipmapped, Protected, Renderable, ResourceProvider, SurfaceDescriptor, TextureFormat,
};
use vellum_infra::{HeadlessResourceProvider, RecordingDevice};
use vellum_render::{DirectContext, DrawingManager, ProxyProvider, SurfaceProxy};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn rgba() -> BackendFormat {
    BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm)
}

pub fn desc(w: i32, h: i32, renderable: Renderable) -> SurfaceDescriptor {
    SurfaceDescriptor {
        dimensions: ISize::new(w, h),
        format: rgba(),
        renderable,
        sample_count: 1,
        mipmapped: Mipmapped::No,
        budgeted: Budgeted::Yes,
        protected: Protected::No,
        fit: BackingFit::Exact,
        label: "integration".into(),
    }
}

/// A headless resource provider and a proxy provider on top of it.
pub struct Harness {
    pub resources: Rc<HeadlessResourceProvider>,
    pub proxies: ProxyProvider,
}

impl Harness {
    pub fn new(options: &ContextOptions) -> Self {
        let resources = Rc::new(HeadlessResourceProvider::new(Caps::default(), options));
        let shared: Rc<dyn ResourceProvider> = resources.clone();
        Self {
            resources,
            proxies: ProxyProvider::new(shared),
        }
    }

    pub fn render_target(&self, w: i32, h: i32) -> Rc<SurfaceProxy> {
        self.proxies
            .create_proxy(&desc(w, h, Renderable::Yes))
            .expect("valid render target")
    }

    pub fn texture(&self, w: i32, h: i32) -> Rc<SurfaceProxy> {
        self.proxies
            .create_proxy(&desc(w, h, Renderable::No))
            .expect("valid texture")
    }

    pub fn msaa_target(&self, w: i32, h: i32) -> Rc<SurfaceProxy> {
        let mut d = desc(w, h, Renderable::Yes);
        d.sample_count = 4;
        self.proxies.create_proxy(&d).expect("valid msaa target")
    }
}

/// A drawing manager over a fresh headless provider, and the device it records into.
pub fn manager(options: ContextOptions) -> (DrawingManager, Harness, Rc<RecordingDevice>) {
    let harness = Harness::new(&options);
    let device = Rc::new(RecordingDevice::new());
    let resources: Rc<dyn ResourceProvider> = harness.resources.clone();
    let gpu: Rc<dyn GpuDevice> = device.clone();
    (DrawingManager::new(resources, gpu, options), harness, device)
}

/// A context over a fresh headless provider, with the provider and device kept for
/// inspection.
pub fn context(
    options: ContextOptions,
) -> (DirectContext, Rc<HeadlessResourceProvider>, Rc<RecordingDevice>) {
    let resources = Rc::new(HeadlessResourceProvider::new(Caps::default(), &options));
    let device = Rc::new(RecordingDevice::new());
    let shared: Rc<dyn ResourceProvider> = resources.clone();
    let gpu: Rc<dyn GpuDevice> = device.clone();
    (DirectContext::new(shared, gpu, options), resources, device)
}
