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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use vellum_core::{
    DeviceError, DrawCommand, GpuDevice, IPoint, IRect, LoadOp, OpsRenderPass,
    RenderPassDescriptor, Surface, SurfaceId,
};

/// One command received by a [`RecordingDevice`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A render pass was opened.
    BeginPass {
        /// The surface drawn into.
        target: SurfaceId,
        /// The color load operation.
        load: LoadOp,
        /// The surfaces sampled during the pass.
        sampled: Vec<SurfaceId>,
    },
    /// A draw was recorded into the open pass on `target`.
    Draw {
        /// The surface drawn into.
        target: SurfaceId,
        /// The draw itself.
        command: DrawCommand,
    },
    /// A render pass was submitted.
    Submit {
        /// The surface drawn into.
        target: SurfaceId,
    },
    /// An MSAA resolve was performed.
    Resolve {
        /// The resolved surface.
        target: SurfaceId,
        /// The resolved region.
        rect: IRect,
    },
    /// Mip levels were regenerated.
    RegenerateMipmaps {
        /// The regenerated texture.
        texture: SurfaceId,
    },
    /// A copy was performed.
    Copy {
        /// The source surface.
        src: SurfaceId,
        /// The copied region of the source.
        src_rect: IRect,
        /// The destination surface.
        dst: SurfaceId,
        /// The destination origin.
        dst_point: IPoint,
    },
    /// Pixels were uploaded.
    WritePixels {
        /// The destination surface.
        dst: SurfaceId,
        /// The number of bytes uploaded.
        bytes: usize,
    },
    /// Queued work was flushed to the GPU.
    SubmitToGpu,
}

type EventLog = Arc<Mutex<Vec<DeviceEvent>>>;

fn record(log: &EventLog, event: DeviceEvent) {
    if let Ok(mut events) = log.lock() {
        events.push(event);
    }
}

#[derive(Debug)]
struct RecordingPass {
    target: SurfaceId,
    log: EventLog,
}

impl OpsRenderPass for RecordingPass {
    fn draw(&mut self, command: &DrawCommand) -> Result<(), DeviceError> {
        record(
            &self.log,
            DeviceEvent::Draw {
                target: self.target,
                command: command.clone(),
            },
        );
        Ok(())
    }

    fn target(&self) -> SurfaceId {
        self.target
    }
}

/// A [`GpuDevice`] that records every command it receives.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    log: EventLog,
    fail_submits: AtomicBool,
}

impl RecordingDevice {
    /// Creates a device with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every recorded event, in order.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.log.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Clears the log.
    pub fn clear(&self) {
        if let Ok(mut events) = self.log.lock() {
            events.clear();
        }
    }

    /// Makes every later render-pass submission fail.
    pub fn set_fail_submits(&self, fail: bool) {
        self.fail_submits.store(fail, Ordering::Relaxed);
    }

    /// The number of draws recorded across all passes.
    pub fn draw_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Draw { .. }))
            .count()
    }
}

impl GpuDevice for RecordingDevice {
    fn begin_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<Box<dyn OpsRenderPass>, DeviceError> {
        if !descriptor.target.is_render_target() {
            return Err(DeviceError::RenderPassFailed(format!(
                "{} is not a render target",
                descriptor.target.id()
            )));
        }
        let target = descriptor.target.id();
        record(
            &self.log,
            DeviceEvent::BeginPass {
                target,
                load: descriptor.color_load,
                sampled: descriptor.sampled.iter().map(|s| s.id()).collect(),
            },
        );
        Ok(Box::new(RecordingPass {
            target,
            log: self.log.clone(),
        }))
    }

    fn submit(&self, pass: Box<dyn OpsRenderPass>) -> Result<(), DeviceError> {
        if self.fail_submits.load(Ordering::Relaxed) {
            return Err(DeviceError::SubmitFailed(format!(
                "pass on {} rejected",
                pass.target()
            )));
        }
        record(
            &self.log,
            DeviceEvent::Submit {
                target: pass.target(),
            },
        );
        Ok(())
    }

    fn resolve_render_target(
        &self,
        target: &Arc<Surface>,
        rect: IRect,
    ) -> Result<(), DeviceError> {
        record(
            &self.log,
            DeviceEvent::Resolve {
                target: target.id(),
                rect,
            },
        );
        Ok(())
    }

    fn regenerate_mipmap_levels(&self, texture: &Arc<Surface>) -> Result<(), DeviceError> {
        record(
            &self.log,
            DeviceEvent::RegenerateMipmaps {
                texture: texture.id(),
            },
        );
        Ok(())
    }

    fn copy_surface(
        &self,
        src: &Arc<Surface>,
        src_rect: IRect,
        dst: &Arc<Surface>,
        dst_point: IPoint,
    ) -> Result<(), DeviceError> {
        if src.id() == dst.id() {
            return Err(DeviceError::CopyFailed("source and destination alias".into()));
        }
        record(
            &self.log,
            DeviceEvent::Copy {
                src: src.id(),
                src_rect,
                dst: dst.id(),
                dst_point,
            },
        );
        Ok(())
    }

    fn write_pixels(
        &self,
        dst: &Arc<Surface>,
        rect: IRect,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let expected = rect.size().area() * dst.format().bytes_per_pixel() as u64;
        if data.len() as u64 != expected {
            return Err(DeviceError::UploadFailed(format!(
                "expected {expected} bytes, got {}",
                data.len()
            )));
        }
        record(
            &self.log,
            DeviceEvent::WritePixels {
                dst: dst.id(),
                bytes: data.len(),
            },
        );
        Ok(())
    }

    fn submit_to_gpu(&self) -> Result<(), DeviceError> {
        record(&self.log, DeviceEvent::SubmitToGpu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{
        Backend, BackendFormat, BackingFit, Budgeted, ISize, Mipmapped, Protected, Rect,
        Renderable, StoreOp, SurfaceDescriptor, TextureFormat,
    };

    fn target() -> Arc<Surface> {
        let desc = SurfaceDescriptor {
            dimensions: ISize::new(16, 16),
            format: BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm),
            renderable: Renderable::Yes,
            sample_count: 1,
            mipmapped: Mipmapped::No,
            budgeted: Budgeted::Yes,
            protected: Protected::No,
            fit: BackingFit::Exact,
            label: "rt".into(),
        };
        Arc::new(Surface::new(&desc, None))
    }

    #[test]
    fn pass_records_draws_in_order() {
        let device = RecordingDevice::new();
        let rt = target();
        let mut pass = device
            .begin_render_pass(&RenderPassDescriptor {
                target: rt.clone(),
                bounds: IRect::from_ltrb(0, 0, 16, 16),
                color_load: LoadOp::Clear([0.0; 4]),
                color_store: StoreOp::Store,
                clear_stencil: false,
                sampled: Vec::new(),
            })
            .unwrap();
        let cmd = DrawCommand {
            op_name: "FillRectOp",
            bounds: Rect::from_ltrb(0.0, 0.0, 4.0, 4.0),
            instance_count: 1,
            texture: None,
        };
        pass.draw(&cmd).unwrap();
        device.submit(pass).unwrap();

        let events = device.events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], DeviceEvent::BeginPass { .. }));
        assert_eq!(
            events[1],
            DeviceEvent::Draw {
                target: rt.id(),
                command: cmd
            }
        );
        assert_eq!(events[2], DeviceEvent::Submit { target: rt.id() });
        assert_eq!(device.draw_count(), 1);
    }

    #[test]
    fn upload_size_is_checked() {
        let device = RecordingDevice::new();
        let rt = target();
        let rect = IRect::from_ltrb(0, 0, 2, 2);
        assert!(device.write_pixels(&rt, rect, &[0u8; 16]).is_ok());
        assert!(device.write_pixels(&rt, rect, &[0u8; 15]).is_err());
    }

    #[test]
    fn failing_submits_report_errors() {
        let device = RecordingDevice::new();
        device.set_fail_submits(true);
        let pass = device
            .begin_render_pass(&RenderPassDescriptor {
                target: target(),
                bounds: IRect::from_ltrb(0, 0, 16, 16),
                color_load: LoadOp::Load,
                color_store: StoreOp::Store,
                clear_stencil: false,
                sampled: Vec::new(),
            })
            .unwrap();
        assert!(matches!(
            device.submit(pass),
            Err(DeviceError::SubmitFailed(_))
        ));
    }
}
