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

//! Pixel formats and the backend-tagged format used to describe surfaces.

use serde::{Deserialize, Serialize};

/// The graphics backend a format or surface belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// An in-memory backend with no real device, used by headless runs and tests.
    Mock,
    /// The Vulkan API.
    Vulkan,
    /// Apple's Metal API.
    Metal,
    /// OpenGL / OpenGL ES.
    OpenGl,
}

/// Defines the memory format of pixels in a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    // 8-bit formats
    /// One 8-bit unsigned normalized component, typically used for coverage masks.
    Alpha8,
    /// One 8-bit unsigned normalized component.
    R8Unorm,
    /// Two 8-bit unsigned normalized components.
    Rg8Unorm,
    /// Four 8-bit unsigned normalized components (RGBA).
    Rgba8Unorm,
    /// Four 8-bit unsigned normalized components (RGBA) in the sRGB color space.
    Rgba8UnormSrgb,
    /// Four 8-bit unsigned normalized components (BGRA).
    Bgra8Unorm,
    // 16-bit float formats
    /// One 16-bit float component.
    R16Float,
    /// Four 16-bit float components.
    Rgba16Float,
    // Depth/stencil formats
    /// An 8-bit stencil-only format.
    Stencil8,
    /// A 24-bit unsigned normalized depth format with an 8-bit stencil component.
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Returns the size in bytes of a single pixel for this format.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Alpha8 => 1,
            TextureFormat::R8Unorm => 1,
            TextureFormat::Rg8Unorm => 2,
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba8UnormSrgb => 4,
            TextureFormat::Bgra8Unorm => 4,
            TextureFormat::R16Float => 2,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Stencil8 => 1,
            TextureFormat::Depth24PlusStencil8 => 4,
        }
    }

    /// Returns `true` if surfaces of this format can be sampled as textures.
    pub fn is_texturable(&self) -> bool {
        !self.is_stencil()
    }

    /// Returns `true` for stencil-carrying formats.
    pub fn is_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::Stencil8 | TextureFormat::Depth24PlusStencil8
        )
    }
}

/// A pixel format tagged with the backend it is expressed for.
///
/// A default-constructed `BackendFormat` carries no format and is invalid; every proxy factory
/// rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendFormat {
    backend: Backend,
    format: Option<TextureFormat>,
}

impl BackendFormat {
    /// Creates a valid format for the given backend.
    pub const fn new(backend: Backend, format: TextureFormat) -> Self {
        Self {
            backend,
            format: Some(format),
        }
    }

    /// Creates an invalid format for the given backend.
    pub const fn invalid(backend: Backend) -> Self {
        Self {
            backend,
            format: None,
        }
    }

    /// Returns the backend this format is expressed for.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Returns the underlying pixel format, if any.
    pub fn format(&self) -> Option<TextureFormat> {
        self.format
    }

    /// Returns `true` if this format carries a pixel format.
    pub fn is_valid(&self) -> bool {
        self.format.is_some()
    }

    /// Returns the size in bytes of a single pixel, or zero for an invalid format.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.format.map_or(0, |f| f.bytes_per_pixel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_format_reports_zero_size() {
        let f = BackendFormat::invalid(Backend::Mock);
        assert!(!f.is_valid());
        assert_eq!(f.bytes_per_pixel(), 0);
    }

    #[test]
    fn stencil_formats_are_not_texturable() {
        assert!(!TextureFormat::Stencil8.is_texturable());
        assert!(TextureFormat::Rgba8Unorm.is_texturable());
        assert_eq!(
            BackendFormat::new(Backend::Vulkan, TextureFormat::Rgba16Float).bytes_per_pixel(),
            8
        );
    }
}
