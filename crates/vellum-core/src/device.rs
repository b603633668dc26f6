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

//! The device contract consumed by render-task execution.

use crate::error::DeviceError;
use crate::geometry::{IPoint, IRect, Rect};
use crate::id::SurfaceId;
use crate::surface::Surface;
use std::fmt::Debug;
use std::sync::Arc;

/// What happens to a render target's contents at the start of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    /// Keep the existing contents.
    Load,
    /// Clear to the given RGBA color.
    Clear([f32; 4]),
    /// Contents are undefined.
    Discard,
}

/// What happens to a render target's contents at the end of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    /// Write the results back.
    Store,
    /// Results may be discarded.
    Discard,
}

/// Describes a render pass into one surface.
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    /// The surface drawn into.
    pub target: Arc<Surface>,
    /// The region touched by the pass.
    pub bounds: IRect,
    /// The color load operation.
    pub color_load: LoadOp,
    /// The color store operation.
    pub color_store: StoreOp,
    /// If `true`, the stencil buffer is cleared at the start of the pass.
    pub clear_stencil: bool,
    /// Surfaces sampled by draws in the pass.
    pub sampled: Vec<Arc<Surface>>,
}

/// A single draw recorded into a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    /// The name of the op that produced this draw.
    pub op_name: &'static str,
    /// The device-space bounds of the draw.
    pub bounds: Rect,
    /// The number of instances drawn.
    pub instance_count: u32,
    /// The texture sampled by the draw, if any.
    pub texture: Option<SurfaceId>,
}

/// An open render pass that accepts draws until submitted.
pub trait OpsRenderPass: Debug {
    /// Records a draw into the pass.
    /// ## Errors
    /// * `DeviceError` - If the draw cannot be encoded.
    fn draw(&mut self, command: &DrawCommand) -> Result<(), DeviceError>;

    /// The surface this pass renders into.
    fn target(&self) -> SurfaceId;
}

/// The device entry points used while executing render tasks.
///
/// All methods take `&self`; implementations use interior mutability.
pub trait GpuDevice: Debug {
    /// Opens a render pass into `descriptor.target`.
    /// ## Errors
    /// * `DeviceError` - If the pass cannot be created.
    fn begin_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<Box<dyn OpsRenderPass>, DeviceError>;

    /// Finishes a render pass and queues its work.
    fn submit(&self, pass: Box<dyn OpsRenderPass>) -> Result<(), DeviceError>;

    /// Resolves the multisampled contents of `target` within `rect`.
    fn resolve_render_target(&self, target: &Arc<Surface>, rect: IRect)
        -> Result<(), DeviceError>;

    /// Regenerates every mip level of `texture` from its base level.
    fn regenerate_mipmap_levels(&self, texture: &Arc<Surface>) -> Result<(), DeviceError>;

    /// Copies `src_rect` of `src` into `dst` at `dst_point`.
    fn copy_surface(
        &self,
        src: &Arc<Surface>,
        src_rect: IRect,
        dst: &Arc<Surface>,
        dst_point: IPoint,
    ) -> Result<(), DeviceError>;

    /// Uploads tightly packed pixel data into `rect` of `dst`.
    fn write_pixels(&self, dst: &Arc<Surface>, rect: IRect, data: &[u8])
        -> Result<(), DeviceError>;

    /// Flushes queued work to the GPU.
    fn submit_to_gpu(&self) -> Result<(), DeviceError>;
}
