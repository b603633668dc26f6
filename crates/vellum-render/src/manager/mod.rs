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

//! The render-task graph and the flush that executes it.
//!
//! [`DrawingManager`] records tasks and their dependencies; on flush it sorts them, lets the
//! [`crate::allocator::ResourceAllocator`] back their proxies, and drives them through a
//! [`FlushState`].

mod drawing_manager;
mod flush_state;
mod stats;

pub use drawing_manager::{DependencyPlan, DrawingManager};
pub use flush_state::FlushState;
pub use stats::FlushStats;
