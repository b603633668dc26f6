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

use crate::manager::FlushState;
use crate::proxy::SurfaceProxy;
use std::rc::Rc;
use vellum_core::{DeviceError, IPoint, IRect};

/// The payload of a task copying a region of one surface into another.
#[derive(Debug)]
pub struct CopyTask {
    src: Rc<SurfaceProxy>,
    src_rect: IRect,
    dst_point: IPoint,
}

impl CopyTask {
    /// Creates a copy of `src_rect` from `src` to `dst_point` in the task's target.
    pub fn new(src: Rc<SurfaceProxy>, src_rect: IRect, dst_point: IPoint) -> Self {
        Self {
            src,
            src_rect,
            dst_point,
        }
    }

    /// The copy source.
    pub fn src(&self) -> &Rc<SurfaceProxy> {
        &self.src
    }

    /// The copied region of the source.
    pub fn src_rect(&self) -> IRect {
        self.src_rect
    }

    /// Where the region lands in the destination.
    pub fn dst_point(&self) -> IPoint {
        self.dst_point
    }

    /// The region of the destination the copy writes.
    pub fn dst_rect(&self) -> IRect {
        IRect::from_point_size(self.dst_point, self.src_rect.size())
    }

    pub(crate) fn execute(&self, dst: &SurfaceProxy, state: &mut FlushState<'_>) -> Result<bool, DeviceError> {
        let (Some(src), Some(dst)) = (self.src.peek_surface(), dst.peek_surface()) else {
            return Ok(false);
        };
        state
            .device()
            .copy_surface(&src, self.src_rect, &dst, self.dst_point)?;
        Ok(true)
    }
}
