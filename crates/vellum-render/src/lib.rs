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

//! # Vellum Render
//!
//! The scheduling core: surface proxies, the proxy provider, render tasks and their op
//! chains, the drawing manager that orders them into a DAG, and the resource allocator that
//! assigns real surfaces to proxies at flush time.
//!
//! Everything in this crate is single-threaded per context. Proxies are shared through `Rc`
//! and carry their mutable state in `Cell`/`RefCell`; the only cross-thread objects are the
//! [`vellum_core::Surface`]s they eventually point at.

#![warn(missing_docs)]

pub mod allocator;
pub mod context;
pub mod error;
pub mod manager;
pub mod ops;
pub mod proxy;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use allocator::{ActualUse, AllowRecycling, AllocatorStats, ResourceAllocator};
pub use context::DirectContext;
pub use error::{AllocatorError, GraphError};
pub use manager::{DependencyPlan, DrawingManager, FlushState, FlushStats};
pub use ops::{AppliedClip, CombineResult, FillRectOp, Op, ProcessorAnalysis, TextureOp};
pub use proxy::{
    InvalidateGpuResource, LazyCallbackResult, LazyInstantiateCallback, LazyKeyMode,
    ProxyCapability, ProxyProvider, SurfaceProxy,
};
pub use task::{OpsTask, RenderTask, ResolveFlags, TaskFlags, TaskId};
