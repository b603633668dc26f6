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

//! Process-wide identifiers for proxies, surfaces and recording contexts.
//!
//! Proxy and surface identifiers are drawn from one monotonic counter so that a proxy id
//! can never collide with a surface id, even though the two are distinct types.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

// Zero is reserved as the invalid id.
static NEXT_UNIQUE_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_CONTEXT_ID: AtomicU32 = AtomicU32::new(1);

fn next_unique_id() -> u32 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The identity of a surface proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(pub u32);

impl ProxyId {
    /// Allocates a fresh id from the shared proxy/surface counter.
    pub fn next() -> Self {
        Self(next_unique_id())
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proxy#{}", self.0)
    }
}

/// The identity of a backend-allocated surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl SurfaceId {
    /// Allocates a fresh id from the shared proxy/surface counter.
    pub fn next() -> Self {
        Self(next_unique_id())
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// The identity of a recording or direct context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

impl ContextId {
    /// Allocates a fresh context id.
    pub fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_and_surface_ids_share_a_counter() {
        let p = ProxyId::next();
        let s = SurfaceId::next();
        let p2 = ProxyId::next();
        assert!(s.0 > p.0);
        assert!(p2.0 > s.0);
    }

    #[test]
    fn ids_are_never_zero() {
        assert_ne!(ProxyId::next().0, 0);
        assert_ne!(SurfaceId::next().0, 0);
        assert_ne!(ContextId::next().0, 0);
    }
}
