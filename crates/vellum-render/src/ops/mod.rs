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

//! Drawing operations recorded into ops tasks.
//!
//! An [`Op`] is one draw. Ops of the same concrete type may be merged into one, or chained
//! so they execute back-to-back. Which of the two applies is decided by the op itself in
//! [`Op::on_combine_if_possible`]; [`combine_if_possible`] guards the type check.

mod fill_rect;
mod texture;

pub use fill_rect::FillRectOp;
pub use texture::TextureOp;

use crate::manager::FlushState;
use crate::proxy::SurfaceProxy;
use std::any::Any;
use std::fmt::Debug;
use std::rc::Rc;
use vellum_core::{Caps, DeviceError, IRect, Mipmapped, Rect};

/// The outcome of trying to combine two ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineResult {
    /// The ops must stay in separate chains.
    CannotCombine,
    /// The ops stay separate but may share a chain.
    MayChain,
    /// The second op was absorbed into the first and can be discarded.
    Merged,
}

/// The clip state applied to an op when it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedClip {
    /// A scissor rectangle, if the op is clipped to one.
    pub scissor: Option<IRect>,
    /// If `true`, the op is clipped by the stencil buffer.
    pub stencil: bool,
}

impl AppliedClip {
    /// Returns `true` if the clip restricts drawing at all.
    pub fn does_clip(&self) -> bool {
        self.scissor.is_some() || self.stencil
    }
}

/// What an op's processors require of the render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessorAnalysis {
    /// The op reads the destination through a copy of it.
    pub requires_dst_texture: bool,
    /// Draws must not overlap, because a barrier or dst copy sits between them.
    pub requires_non_overlapping_draws: bool,
}

/// A single recorded draw.
pub trait Op: Any + Debug {
    /// A short name for logs and device commands.
    fn name(&self) -> &'static str;

    /// The op as [`Any`], for downcasting in combine implementations.
    fn as_any(&self) -> &dyn Any;

    /// The op as mutable [`Any`], so a merge can take the absorbed op's payload.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// The device-space bounds of the op.
    fn bounds(&self) -> Rect;

    /// Tries to absorb `other`, which is guaranteed to have the same concrete type.
    ///
    /// On [`CombineResult::Merged`] the implementation must have grown its own bounds to
    /// cover `other`.
    fn on_combine_if_possible(&mut self, other: &mut dyn Op, caps: &Caps) -> CombineResult;

    /// Calls `visitor` once for every proxy the op samples.
    fn visit_proxies(&self, _visitor: &mut dyn FnMut(&Rc<SurfaceProxy>, Mipmapped)) {}

    /// Called once before any task executes.
    fn prepare(&mut self, _state: &mut FlushState<'_>) {}

    /// Records the op into the open render pass.
    /// ## Errors
    /// * `DeviceError` - If the device rejects the draw.
    fn execute(&self, state: &mut FlushState<'_>, chain_bounds: &Rect) -> Result<(), DeviceError>;
}

/// Tries to combine `other` into `op`. Ops of different types never combine.
pub fn combine_if_possible(op: &mut dyn Op, other: &mut dyn Op, caps: &Caps) -> CombineResult {
    if op.as_any().type_id() != other.as_any().type_id() {
        return CombineResult::CannotCombine;
    }
    let result = op.on_combine_if_possible(other, caps);
    if result == CombineResult::Merged {
        log::trace!("Merged {} into {}", other.name(), op.name());
    }
    result
}

/// Returns `true` if draws covering `a` and `b` may execute in either order.
pub fn can_reorder(a: &Rect, b: &Rect) -> bool {
    !a.overlaps(b)
}
