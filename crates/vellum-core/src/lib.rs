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

//! # Vellum Core
//!
//! Foundational crate containing the types, traits, and interface contracts shared by
//! the deferred surface allocator and the render-task scheduler.
//!
//! Everything that talks to real GPU memory is expressed here as a trait
//! ([`ResourceProvider`], [`ResourceCache`], [`GpuDevice`]). Concrete implementations live
//! in `vellum-infra`, and the scheduling core in `vellum-render` only ever sees the traits.

#![warn(missing_docs)]

pub mod caps;
pub mod device;
pub mod error;
pub mod format;
pub mod geometry;
pub mod graph;
pub mod id;
pub mod keys;
pub mod provider;
pub mod settings;
pub mod single_owner;
pub mod surface;
pub mod types;

pub use caps::Caps;
pub use device::{DrawCommand, GpuDevice, LoadOp, OpsRenderPass, RenderPassDescriptor, StoreOp};
pub use error::{DeviceError, FlushError, ResourceError};
pub use format::{Backend, BackendFormat, TextureFormat};
pub use geometry::{IPoint, IRect, ISize, Rect};
pub use graph::{topological_sort, CycleError};
pub use id::{ContextId, ProxyId, SurfaceId};
pub use keys::{KeyDomain, ScratchKey, UniqueKey};
pub use provider::{
    BackendRenderTarget, BackendTexture, IoType, ResourceCache, ResourceProvider, WrapCacheable,
    WrapOwnership,
};
pub use settings::ContextOptions;
pub use single_owner::{SingleOwner, SingleOwnerGuard};
pub use surface::{compute_memory_size, ReleaseCallback, Surface, SurfaceDescriptor};
pub use types::{
    approx_size, BackingFit, Budgeted, MipmapStatus, Mipmapped, Protected, Renderable, SurfaceFlags,
};
