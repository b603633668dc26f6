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

//! Small enums and flags that describe how a surface is allocated and used.

use crate::geometry::ISize;
use bitflags::bitflags;

/// How closely a backing store must match the requested dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackingFit {
    /// The backing store may be larger than requested, rounded up to a pooled bucket size.
    Approx,
    /// The backing store has exactly the requested dimensions.
    Exact,
}

/// Whether a surface counts against the resource cache budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Budgeted {
    /// Counted against the budget.
    Yes,
    /// Not counted against the budget.
    No,
}

/// Whether a texture carries a full mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mipmapped {
    /// The surface has a full mip chain.
    Yes,
    /// The surface has only the base level.
    No,
}

/// The state of a texture's mip chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MipmapStatus {
    /// The texture has no mip levels beyond the base.
    NotAllocated,
    /// The mip levels exist but must be regenerated before sampling.
    Dirty,
    /// The mip levels are up to date.
    Valid,
}

/// Whether a surface holds protected content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protected {
    /// Protected content.
    Yes,
    /// Ordinary content.
    No,
}

/// Whether a surface can be drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Renderable {
    /// The surface is a render target.
    Yes,
    /// The surface is sample-only.
    No,
}

bitflags! {
    /// Per-surface usage flags that affect instantiation and recycling.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SurfaceFlags: u32 {
        /// The surface must never be written to.
        const READ_ONLY = 1 << 0;
        /// The render target wraps a secondary command buffer whose replay order is unknown.
        const WRAPS_SECONDARY_CB = 1 << 1;
        /// The render target needs an explicit resolve after multisampled rendering.
        const REQUIRES_MANUAL_MSAA_RESOLVE = 1 << 2;
        /// The render target was supplied by the client; its target (0,0) is the window origin.
        const GL_RT_FBO_ID_IS_ZERO = 1 << 3;
    }
}

const MIN_APPROX_SIZE: i32 = 16;
const MAGIC_TOL: i32 = 1024;

/// Rounds a single dimension up to its approximate-fit bucket.
///
/// Sizes below 16 become 16; sizes up to 1024 round up to the next power of two; above
/// that the bucket is the smaller of 1.5 × the floor power of two and the ceiling power of two.
pub fn approx_dimension(value: i32) -> i32 {
    let value = value.max(MIN_APPROX_SIZE);
    if (value as u32).is_power_of_two() {
        return value;
    }
    let ceil_pow2 = (value as u32).next_power_of_two() as i32;
    if value <= MAGIC_TOL {
        return ceil_pow2;
    }
    let floor_pow2 = ceil_pow2 >> 1;
    let mid = floor_pow2 + (floor_pow2 >> 1);
    if value <= mid {
        mid
    } else {
        ceil_pow2
    }
}

/// Rounds both dimensions of `size` up to their approximate-fit buckets.
pub fn approx_size(size: ISize) -> ISize {
    ISize::new(approx_dimension(size.width), approx_dimension(size.height))
}

/// Returns the number of levels in a full mip chain for `size`.
pub fn mip_level_count(size: ISize) -> u32 {
    let largest = size.width.max(size.height).max(1) as u32;
    32 - largest.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approx_size_buckets() {
        assert_eq!(approx_dimension(1), 16);
        assert_eq!(approx_dimension(16), 16);
        assert_eq!(approx_dimension(17), 32);
        assert_eq!(approx_dimension(1000), 1024);
        assert_eq!(approx_dimension(1024), 1024);
        assert_eq!(approx_dimension(1025), 1536);
        assert_eq!(approx_dimension(1536), 1536);
        assert_eq!(approx_dimension(1537), 2048);
        assert_eq!(approx_size(ISize::new(5, 300)), ISize::new(16, 512));
    }

    #[test]
    fn mip_levels_follow_largest_dimension() {
        assert_eq!(mip_level_count(ISize::new(1, 1)), 1);
        assert_eq!(mip_level_count(ISize::new(2, 1)), 2);
        assert_eq!(mip_level_count(ISize::new(256, 16)), 9);
        assert_eq!(mip_level_count(ISize::new(300, 300)), 9);
    }

    #[test]
    fn surface_flags_compose() {
        let f = SurfaceFlags::READ_ONLY | SurfaceFlags::WRAPS_SECONDARY_CB;
        assert!(f.contains(SurfaceFlags::READ_ONLY));
        assert!(!f.contains(SurfaceFlags::REQUIRES_MANUAL_MSAA_RESOLVE));
    }
}
