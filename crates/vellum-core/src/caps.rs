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

//! Device capabilities that constrain which surfaces may be created.

use crate::format::{Backend, BackendFormat};
use crate::geometry::ISize;
use crate::settings::ContextOptions;
use crate::types::{Mipmapped, Renderable};

/// A snapshot of what the device behind a context can do.
#[derive(Debug, Clone)]
pub struct Caps {
    /// The backend these capabilities describe.
    pub backend: Backend,
    /// The largest width or height of a sample-only texture.
    pub max_texture_size: i32,
    /// The largest width or height of a render target.
    pub max_render_target_size: i32,
    /// Supported multisample counts, ascending. Always contains `1`.
    pub sample_counts: Vec<u32>,
    /// If `true`, multisampled render targets resolve as part of the render pass.
    pub msaa_resolves_automatically: bool,
    /// If `true`, textures may carry mip chains.
    pub mipmap_support: bool,
    /// If `true`, protected surfaces can be allocated.
    pub protected_content_support: bool,
    /// If `true`, non-renderable textures may be served from the scratch pool.
    pub reuse_scratch_textures: bool,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            backend: Backend::Mock,
            max_texture_size: 8192,
            max_render_target_size: 8192,
            sample_counts: vec![1, 2, 4, 8],
            msaa_resolves_automatically: false,
            mipmap_support: true,
            protected_content_support: false,
            reuse_scratch_textures: true,
        }
    }
}

impl Caps {
    /// Overrides the option-driven capability switches.
    pub fn apply_options(&mut self, options: &ContextOptions) {
        self.reuse_scratch_textures = options.reuse_scratch_textures;
    }

    /// Returns the smallest supported sample count that is at least `requested`.
    ///
    /// A request of `0` is treated as `1`. Returns `None` if the format cannot be rendered to
    /// or no supported count is large enough.
    pub fn get_render_target_sample_count(
        &self,
        requested: u32,
        format: &BackendFormat,
    ) -> Option<u32> {
        let fmt = format.format()?;
        if fmt.is_stencil() {
            return None;
        }
        let requested = requested.max(1);
        self.sample_counts.iter().copied().find(|&c| c >= requested)
    }

    /// Returns `true` if `format` can be rendered to with at least `sample_count` samples.
    pub fn is_format_renderable(&self, format: &BackendFormat, sample_count: u32) -> bool {
        self.get_render_target_sample_count(sample_count, format).is_some()
    }

    /// Checks whether a surface with the given parameters may be created on this device.
    pub fn validate_surface_params(
        &self,
        dimensions: ISize,
        format: &BackendFormat,
        renderable: Renderable,
        sample_count: u32,
        mipmapped: Mipmapped,
    ) -> bool {
        let Some(fmt) = format.format() else {
            return false;
        };
        if format.backend() != self.backend {
            return false;
        }
        if dimensions.is_empty() {
            return false;
        }
        if mipmapped == Mipmapped::Yes && !self.mipmap_support {
            return false;
        }
        match renderable {
            Renderable::Yes => {
                if !self.is_format_renderable(format, sample_count) {
                    return false;
                }
                let max = self.max_render_target_size;
                dimensions.width <= max && dimensions.height <= max
            }
            Renderable::No => {
                if sample_count != 1 || !fmt.is_texturable() {
                    return false;
                }
                let max = self.max_texture_size;
                dimensions.width <= max && dimensions.height <= max
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::TextureFormat;

    fn rgba() -> BackendFormat {
        BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn sample_count_rounds_up_to_supported() {
        let caps = Caps {
            sample_counts: vec![1, 4, 8],
            ..Default::default()
        };
        assert_eq!(caps.get_render_target_sample_count(0, &rgba()), Some(1));
        assert_eq!(caps.get_render_target_sample_count(2, &rgba()), Some(4));
        assert_eq!(caps.get_render_target_sample_count(8, &rgba()), Some(8));
        assert_eq!(caps.get_render_target_sample_count(16, &rgba()), None);
        assert!(caps.is_format_renderable(&rgba(), 2));
        assert!(!caps.is_format_renderable(&rgba(), 16));
    }

    #[test]
    fn validation_enforces_size_limits() {
        let caps = Caps {
            max_texture_size: 256,
            max_render_target_size: 128,
            ..Default::default()
        };
        let f = rgba();
        assert!(caps.validate_surface_params(
            ISize::new(256, 256),
            &f,
            Renderable::No,
            1,
            Mipmapped::No
        ));
        assert!(!caps.validate_surface_params(
            ISize::new(256, 256),
            &f,
            Renderable::Yes,
            1,
            Mipmapped::No
        ));
        assert!(!caps.validate_surface_params(
            ISize::new(0, 16),
            &f,
            Renderable::No,
            1,
            Mipmapped::No
        ));
    }

    #[test]
    fn validation_rejects_foreign_backend_and_invalid_format() {
        let caps = Caps::default();
        let vk = BackendFormat::new(Backend::Vulkan, TextureFormat::Rgba8Unorm);
        assert!(!caps.validate_surface_params(
            ISize::new(8, 8),
            &vk,
            Renderable::No,
            1,
            Mipmapped::No
        ));
        assert!(!caps.validate_surface_params(
            ISize::new(8, 8),
            &BackendFormat::invalid(Backend::Mock),
            Renderable::No,
            1,
            Mipmapped::No
        ));
    }
}
