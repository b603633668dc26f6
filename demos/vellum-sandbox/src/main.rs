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

// Vellum Sandbox
// Records a small frame against the headless backend, flushes it and reports what the
// device received.

use std::rc::Rc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use vellum_core::{
    Backend, BackendFormat, BackingFit, Budgeted, Caps, ContextOptions, GpuDevice, IPoint,
    IRect, ISize, Mipmapped, Protected, Rect, Renderable, ResourceProvider, SurfaceDescriptor,
    TextureFormat,
};
use vellum_infra::{DeviceEvent, HeadlessResourceProvider, RecordingDevice, SurfaceHandoff};
use vellum_render::DirectContext;

fn rgba() -> BackendFormat {
    BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm)
}

fn render_target(width: i32, height: i32, sample_count: u32, label: &str) -> SurfaceDescriptor {
    SurfaceDescriptor {
        dimensions: ISize::new(width, height),
        format: rgba(),
        renderable: Renderable::Yes,
        sample_count,
        mipmapped: Mipmapped::No,
        budgeted: Budgeted::Yes,
        protected: Protected::No,
        fit: BackingFit::Exact,
        label: label.to_owned(),
    }
}

fn load_options() -> Result<ContextOptions> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading options from {path}"))?;
            ContextOptions::from_ron_str(&text).with_context(|| format!("parsing {path}"))
        }
        None => Ok(ContextOptions {
            reduce_ops_task_splitting: true,
            ..Default::default()
        }),
    }
}

fn record_frame(ctx: &mut DirectContext) -> Result<()> {
    let provider = ctx.proxy_provider();
    let backbuffer = provider
        .create_proxy(&render_target(256, 256, 1, "backbuffer"))
        .ok_or_else(|| anyhow!("backbuffer rejected"))?;
    let shadow = provider
        .create_proxy(&render_target(128, 128, 4, "shadow"))
        .ok_or_else(|| anyhow!("shadow target rejected"))?;
    let checker: Vec<u8> = (0..16 * 16)
        .flat_map(|i| if (i / 16 + i % 16) % 2 == 0 { [255u8; 4] } else { [0, 0, 0, 255] })
        .collect();
    let pattern = provider
        .create_proxy_from_pixels(
            checker,
            ISize::new(16, 16),
            rgba(),
            Mipmapped::No,
            Budgeted::Yes,
            "checker",
        )
        .ok_or_else(|| anyhow!("checker texture rejected"))?;
    let snapshot = provider
        .create_proxy(&SurfaceDescriptor {
            renderable: Renderable::No,
            ..render_target(64, 64, 1, "snapshot")
        })
        .ok_or_else(|| anyhow!("snapshot rejected"))?;

    // Shadow pass, then the main pass samples it.
    ctx.clear(&shadow, [1.0, 1.0, 1.0, 1.0])?;
    ctx.fill_rect(&shadow, Rect::from_xywh(16.0, 16.0, 64.0, 64.0), [0.2, 0.2, 0.2, 1.0])?;

    ctx.clear(&backbuffer, [0.1, 0.1, 0.15, 1.0])?;
    ctx.draw_texture(&backbuffer, &pattern, Rect::from_xywh(0.0, 0.0, 64.0, 64.0), Mipmapped::No)?;
    ctx.draw_texture(&backbuffer, &shadow, Rect::from_xywh(96.0, 96.0, 128.0, 128.0), Mipmapped::No)?;
    ctx.fill_rect(&backbuffer, Rect::from_xywh(200.0, 8.0, 48.0, 48.0), [0.9, 0.3, 0.1, 1.0])?;

    ctx.copy(&backbuffer, IRect::from_ltrb(0, 0, 64, 64), &snapshot, IPoint::new(0, 0))?;
    ctx.flush_surfaces(&[backbuffer])?;
    ctx.submit()?;
    Ok(())
}

fn report(device: &RecordingDevice) {
    let mut passes = 0;
    let mut draws = 0;
    let mut other = 0;
    for event in device.events() {
        match event {
            DeviceEvent::BeginPass { .. } => passes += 1,
            DeviceEvent::Draw { .. } => draws += 1,
            DeviceEvent::Submit { .. } => {}
            e => {
                log::debug!("{e:?}");
                other += 1;
            }
        }
    }
    log::info!("Device received {passes} passes, {draws} draws and {other} other commands");
}

fn lend_across_threads(resources: &HeadlessResourceProvider) -> Result<()> {
    let surface = resources
        .create_texture(&render_target(32, 32, 1, "shared"))
        .context("allocating the shared surface")?;
    let handoff = SurfaceHandoff::new(surface, resources.return_handle());
    thread::spawn(move || {
        let borrower = vellum_core::ContextId::next();
        match handoff.borrow_for(borrower, None) {
            Ok(surface) => log::info!("Worker borrowed {}", surface.id()),
            Err(err) => log::warn!("Worker could not borrow: {err}"),
        }
    })
    .join()
    .map_err(|_| anyhow!("worker thread panicked"))?;
    Ok(())
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let options = load_options()?;
    let resources = Rc::new(HeadlessResourceProvider::new(Caps::default(), &options));
    let device = Rc::new(RecordingDevice::new());
    let shared: Rc<dyn ResourceProvider> = resources.clone();
    let gpu: Rc<dyn GpuDevice> = device.clone();
    let mut ctx = DirectContext::new(shared, gpu, options);

    for frame in 0..3 {
        record_frame(&mut ctx).with_context(|| format!("frame {frame}"))?;
    }
    report(&device);
    let stats = ctx.stats();
    log::info!(
        "{} flushes: {} tasks executed, {} merged, {} surfaces created, {} reused",
        stats.flush_number,
        stats.tasks_executed,
        stats.tasks_merged,
        stats.surfaces_created,
        stats.surfaces_reused
    );

    lend_across_threads(&resources)?;
    ctx.perform_deferred_cleanup();
    log::info!(
        "Cache holds {} surfaces",
        resources.surface_cache().surface_count()
    );
    Ok(())
}
