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
use crate::proxy::SurfaceProxy;
use smallvec::SmallVec;
use std::any::Any;
use std::rc::Rc;
use vellum_core::{Caps, DeviceError, DrawCommand, Mipmapped, Rect};

/// Draws one or more quads sampling a texture proxy.
///
/// Quads sampling the same proxy with the same filtering merge into one draw. Quads sampling
/// different proxies of the same format can share a chain.
#[derive(Debug)]
pub struct TextureOp {
    proxy: Rc<SurfaceProxy>,
    mipmapped: Mipmapped,
    quads: SmallVec<[Rect; 1]>,
    bounds: Rect,
}

impl TextureOp {
    /// Creates an op drawing `proxy` into `dst`. `mipmapped` requests mip-filtered sampling.
    pub fn new(proxy: Rc<SurfaceProxy>, dst: Rect, mipmapped: Mipmapped) -> Self {
        let mut quads = SmallVec::new();
        quads.push(dst);
        Self {
            proxy,
            mipmapped,
            quads,
            bounds: dst,
        }
    }

    /// The sampled proxy.
    pub fn proxy(&self) -> &Rc<SurfaceProxy> {
        &self.proxy
    }

    /// The number of quads batched into this op.
    pub fn quad_count(&self) -> usize {
        self.quads.len()
    }
}

impl Op for TextureOp {
    fn name(&self) -> &'static str {
        "TextureOp"
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
        let Some(other) = other.as_any_mut().downcast_mut::<TextureOp>() else {
            return CombineResult::CannotCombine;
        };
        if Rc::ptr_eq(&self.proxy, &other.proxy) && self.mipmapped == other.mipmapped {
            self.quads.extend(other.quads.drain(..));
            self.bounds.join_non_empty(&other.bounds);
            return CombineResult::Merged;
        }
        if self.proxy.format() == other.proxy.format() {
            CombineResult::MayChain
        } else {
            CombineResult::CannotCombine
        }
    }

    fn visit_proxies(&self, visitor: &mut dyn FnMut(&Rc<SurfaceProxy>, Mipmapped)) {
        visitor(&self.proxy, self.mipmapped);
    }

    fn execute(&self, state: &mut FlushState<'_>, _chain_bounds: &Rect) -> Result<(), DeviceError> {
        state.draw(&DrawCommand {
            op_name: self.name(),
            bounds: self.bounds,
            instance_count: self.quads.len() as u32,
            texture: self.proxy.peek_surface().map(|s| s.id()),
        })
    }
}
