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

use super::{CombineResult, Op};
use crate::manager::FlushState;
use smallvec::SmallVec;
use std::any::Any;
use vellum_core::{Caps, DeviceError, DrawCommand, Rect};

/// The most rectangles a single fill op batches before it only chains.
const MAX_RECTS_PER_OP: usize = 512;

/// Fills one or more solid-colored rectangles.
#[derive(Debug, Clone)]
pub struct FillRectOp {
    rects: SmallVec<[(Rect, [f32; 4]); 1]>,
    antialias: bool,
    bounds: Rect,
}

impl FillRectOp {
    /// Creates an op filling `rect` with `color`.
    pub fn new(rect: Rect, color: [f32; 4], antialias: bool) -> Self {
        let mut rects = SmallVec::new();
        rects.push((rect, color));
        Self {
            rects,
            antialias,
            bounds: rect,
        }
    }

    /// The number of rectangles batched into this op.
    pub fn rect_count(&self) -> usize {
        self.rects.len()
    }

    /// Returns `true` if edges are antialiased.
    pub fn antialias(&self) -> bool {
        self.antialias
    }
}

impl Op for FillRectOp {
    fn name(&self) -> &'static str {
        "FillRectOp"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn on_combine_if_possible(&mut self, other: &mut dyn Op, _caps: &Caps) -> CombineResult {
        let Some(other) = other.as_any_mut().downcast_mut::<FillRectOp>() else {
            return CombineResult::CannotCombine;
        };
        // Antialiased and aliased fills use different pipelines.
        if self.antialias != other.antialias {
            return CombineResult::CannotCombine;
        }
        if self.rects.len() + other.rects.len() > MAX_RECTS_PER_OP {
            return CombineResult::MayChain;
        }
        self.rects.extend(other.rects.drain(..));
        self.bounds.join_non_empty(&other.bounds);
        CombineResult::Merged
    }

    fn execute(&self, state: &mut FlushState<'_>, _chain_bounds: &Rect) -> Result<(), DeviceError> {
        state.draw(&DrawCommand {
            op_name: self.name(),
            bounds: self.bounds,
            instance_count: self.rects.len() as u32,
            texture: None,
        })
    }
}
