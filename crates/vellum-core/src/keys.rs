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

//! Resource keys.
//!
//! A [`ScratchKey`] names a fungibility class: any two surfaces with equal scratch keys can
//! stand in for each other once their contents are no longer needed. A [`UniqueKey`] names one
//! specific piece of content; at most one live proxy and one cached surface hold it at a time.

use crate::format::BackendFormat;
use crate::geometry::ISize;
use crate::types::{Mipmapped, Protected, Renderable};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// The fungibility class of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    format: BackendFormat,
    dimensions: ISize,
    renderable: Renderable,
    sample_count: u32,
    mipmapped: Mipmapped,
    protected: Protected,
}

impl ScratchKey {
    /// Builds the scratch key for a texture or render target with the given properties.
    ///
    /// Returns `None` for invalid formats and empty dimensions, which have no fungibility class.
    pub fn for_surface(
        format: BackendFormat,
        dimensions: ISize,
        renderable: Renderable,
        sample_count: u32,
        mipmapped: Mipmapped,
        protected: Protected,
    ) -> Option<Self> {
        if !format.is_valid() || dimensions.is_empty() || sample_count == 0 {
            return None;
        }
        Some(Self {
            format,
            dimensions,
            renderable,
            sample_count,
            mipmapped,
            protected,
        })
    }

    /// The backing-store dimensions this key describes.
    pub fn dimensions(&self) -> ISize {
        self.dimensions
    }

    /// The format this key describes.
    pub fn format(&self) -> BackendFormat {
        self.format
    }

    /// The sample count this key describes.
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Whether surfaces of this class are renderable.
    pub fn renderable(&self) -> Renderable {
        self.renderable
    }
}

static NEXT_KEY_DOMAIN: AtomicU32 = AtomicU32::new(1);

/// A namespace for unique keys, so that independent clients cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDomain(u32);

impl KeyDomain {
    /// Allocates a fresh, process-wide domain.
    pub fn generate() -> Self {
        Self(NEXT_KEY_DOMAIN.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies one logical piece of surface content.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    domain: KeyDomain,
    data: Vec<u32>,
}

impl UniqueKey {
    /// Creates a key in `domain` from the given data words.
    pub fn new(domain: KeyDomain, data: &[u32]) -> Self {
        Self {
            domain,
            data: data.to_vec(),
        }
    }

    /// The domain this key belongs to.
    pub fn domain(&self) -> KeyDomain {
        self.domain
    }

    /// The data words of this key.
    pub fn data(&self) -> &[u32] {
        &self.data
    }
}

impl fmt::Debug for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueKey({}:{:?})", self.domain.0, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Backend, TextureFormat};

    fn rgba() -> BackendFormat {
        BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm)
    }

    #[test]
    fn scratch_keys_compare_by_shape() {
        let a = ScratchKey::for_surface(
            rgba(),
            ISize::new(64, 64),
            Renderable::Yes,
            1,
            Mipmapped::No,
            Protected::No,
        );
        let b = ScratchKey::for_surface(
            rgba(),
            ISize::new(64, 64),
            Renderable::Yes,
            1,
            Mipmapped::No,
            Protected::No,
        );
        let c = ScratchKey::for_surface(
            rgba(),
            ISize::new(64, 64),
            Renderable::Yes,
            4,
            Mipmapped::No,
            Protected::No,
        );
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn scratch_key_rejects_lazy_dimensions() {
        let k = ScratchKey::for_surface(
            rgba(),
            ISize::LAZY,
            Renderable::No,
            1,
            Mipmapped::No,
            Protected::No,
        );
        assert!(k.is_none());
    }

    #[test]
    fn unique_keys_in_different_domains_differ() {
        let d1 = KeyDomain::generate();
        let d2 = KeyDomain::generate();
        assert_eq!(UniqueKey::new(d1, &[1, 2]), UniqueKey::new(d1, &[1, 2]));
        assert_ne!(UniqueKey::new(d1, &[1, 2]), UniqueKey::new(d2, &[1, 2]));
    }
}
