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

//! Flush-time assignment of real surfaces to proxies.
//!
//! Render tasks report when each proxy is live as an inclusive range of op indices. The
//! [`ResourceAllocator`] walks those intervals in start order and lets proxies whose lifetimes
//! do not overlap share one surface.

mod resource_allocator;

pub use resource_allocator::{ActualUse, AllocatorStats, AllowRecycling, ResourceAllocator};
