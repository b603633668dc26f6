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
use bitflags::bitflags;
use smallvec::SmallVec;
use std::rc::Rc;
use vellum_core::{DeviceError, IRect};

bitflags! {
    /// The work a texture resolve task performs on one proxy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResolveFlags: u8 {
        /// Resolve the multisampled contents into the single-sample texture.
        const MSAA = 1 << 0;
        /// Regenerate the mip levels from the base level.
        const MIPMAPS = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy)]
struct Resolve {
    flags: ResolveFlags,
    msaa_rect: IRect,
}

/// The payload of an implicit task that makes surfaces readable before dependents run.
///
/// Its targets, held by the owning [`super::RenderTask`], line up with the recorded resolves.
#[derive(Debug, Default)]
pub struct TextureResolveTask {
    resolves: SmallVec<[Resolve; 1]>,
}

impl TextureResolveTask {
    /// Creates a task with nothing to resolve.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of recorded resolves.
    pub fn num_resolves(&self) -> usize {
        self.resolves.len()
    }

    /// The flags of the `index`th resolve.
    pub fn flags(&self, index: usize) -> Option<ResolveFlags> {
        self.resolves.get(index).map(|r| r.flags)
    }

    /// Records a resolve of `proxy` and marks it clean.
    pub(crate) fn record(&mut self, proxy: &SurfaceProxy, flags: ResolveFlags) {
        debug_assert!(!flags.is_empty());
        let mut msaa_rect = IRect::EMPTY;
        if flags.contains(ResolveFlags::MSAA) {
            if let Some(rt) = proxy.as_render_target() {
                msaa_rect = rt.msaa_dirty_rect();
                rt.mark_msaa_resolved();
            }
        }
        if flags.contains(ResolveFlags::MIPMAPS) {
            if let Some(tex) = proxy.as_texture() {
                tex.mark_mipmaps_clean();
            }
        }
        self.resolves.push(Resolve { flags, msaa_rect });
    }

    /// Performs every MSAA resolve, then every mipmap regeneration.
    pub(crate) fn execute(
        &self,
        targets: &[Rc<SurfaceProxy>],
        state: &mut FlushState<'_>,
    ) -> Result<bool, DeviceError> {
        for (resolve, target) in self.resolves.iter().zip(targets) {
            if !resolve.flags.contains(ResolveFlags::MSAA) {
                continue;
            }
            // Missing when instantiation failed.
            if let Some(surface) = target.peek_surface() {
                state.device().resolve_render_target(&surface, resolve.msaa_rect)?;
            }
        }
        for (resolve, target) in self.resolves.iter().zip(targets) {
            if !resolve.flags.contains(ResolveFlags::MIPMAPS) {
                continue;
            }
            if let Some(surface) = target.peek_surface() {
                state.device().regenerate_mipmap_levels(&surface)?;
            }
        }
        Ok(true)
    }
}
