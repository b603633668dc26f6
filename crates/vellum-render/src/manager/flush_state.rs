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

use crate::proxy::SurfaceProxy;
use std::sync::Arc;
use vellum_core::{
    Caps, DeviceError, DrawCommand, GpuDevice, IRect, OpsRenderPass, RenderPassDescriptor,
    ResourceProvider, Surface,
};

/// The per-flush state handed to tasks and ops while they prepare and execute.
///
/// It owns at most one open render pass and the uploads scheduled during preparation.
pub struct FlushState<'a> {
    device: &'a dyn GpuDevice,
    provider: &'a dyn ResourceProvider,
    pass: Option<Box<dyn OpsRenderPass>>,
    pending_uploads: Vec<(Arc<Surface>, IRect, Vec<u8>)>,
}

impl<'a> FlushState<'a> {
    /// Creates an empty flush state.
    pub fn new(device: &'a dyn GpuDevice, provider: &'a dyn ResourceProvider) -> Self {
        Self {
            device,
            provider,
            pass: None,
            pending_uploads: Vec::new(),
        }
    }

    /// The device commands are recorded on.
    pub fn device(&self) -> &'a dyn GpuDevice {
        self.device
    }

    /// The resource provider of the flushing context.
    pub fn resource_provider(&self) -> &'a dyn ResourceProvider {
        self.provider
    }

    /// The capabilities of the device.
    pub fn caps(&self) -> &'a Caps {
        self.provider.caps()
    }

    /// Returns `true` while a render pass is open.
    pub fn has_open_pass(&self) -> bool {
        self.pass.is_some()
    }

    /// Opens a render pass. Any pass left open is dropped without submission.
    /// ## Errors
    /// * `DeviceError` - If the device cannot open the pass.
    pub fn begin_render_pass(
        &mut self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<(), DeviceError> {
        if self.pass.take().is_some() {
            log::warn!("Dropping an unsubmitted render pass");
        }
        self.pass = Some(self.device.begin_render_pass(descriptor)?);
        Ok(())
    }

    /// Records a draw into the open render pass.
    /// ## Errors
    /// * `DeviceError::RenderPassFailed` - If no pass is open, or the pass rejects the draw.
    pub fn draw(&mut self, command: &DrawCommand) -> Result<(), DeviceError> {
        match self.pass.as_mut() {
            Some(pass) => pass.draw(command),
            None => Err(DeviceError::RenderPassFailed("no open render pass".into())),
        }
    }

    /// Submits the open render pass.
    /// ## Errors
    /// * `DeviceError` - If no pass is open or the device rejects it.
    pub fn submit_render_pass(&mut self) -> Result<(), DeviceError> {
        match self.pass.take() {
            Some(pass) => self.device.submit(pass),
            None => Err(DeviceError::RenderPassFailed("no open render pass".into())),
        }
    }

    /// Drops the open render pass without submitting it.
    pub fn abort_render_pass(&mut self) {
        self.pass = None;
    }

    /// Queues the pixels waiting on `proxy` for upload into its surface.
    pub fn schedule_upload(&mut self, proxy: &SurfaceProxy) {
        let Some(surface) = proxy.peek_surface() else {
            log::warn!("{} has pending pixels but no surface", proxy.id());
            return;
        };
        if let Some(pixels) = proxy.take_pending_upload() {
            self.pending_uploads.push((surface, IRect::from_size(proxy.dimensions()), pixels));
        }
    }

    /// The number of uploads waiting for [`FlushState::pre_execute_draws`].
    pub fn num_pending_uploads(&self) -> usize {
        self.pending_uploads.len()
    }

    /// Performs every scheduled upload, in scheduling order.
    /// ## Errors
    /// * `DeviceError` - The first upload the device rejects. Later uploads are dropped.
    pub fn pre_execute_draws(&mut self) -> Result<(), DeviceError> {
        let mut uploads = std::mem::take(&mut self.pending_uploads).into_iter();
        while let Some((surface, rect, pixels)) = uploads.next() {
            if let Err(err) = self.device.write_pixels(&surface, rect, &pixels) {
                let dropped = uploads.len();
                if dropped > 0 {
                    log::warn!("Skipping {dropped} uploads after a failed upload");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Drops any open pass and pending upload.
    pub fn reset(&mut self) {
        self.pass = None;
        self.pending_uploads.clear();
    }
}

impl std::fmt::Debug for FlushState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushState")
            .field("open_pass", &self.pass.is_some())
            .field("pending_uploads", &self.pending_uploads.len())
            .finish()
    }
}
