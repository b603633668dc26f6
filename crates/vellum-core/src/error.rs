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

//! Defines the hierarchy of error types for surface allocation and flushing.

use crate::geometry::ISize;
use crate::id::ContextId;
use std::fmt;

/// An error related to the creation, lookup or wrapping of a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The device could not allocate a surface of the requested shape.
    AllocationFailed {
        /// The debug label of the requested surface.
        label: String,
    },
    /// The requested dimensions are empty or exceed the device limits.
    InvalidGeometry {
        /// The dimensions that were rejected.
        dimensions: ISize,
    },
    /// The format is invalid or not usable on this backend.
    InvalidFormat,
    /// The provider or context has been abandoned.
    Abandoned,
    /// A lazy instantiation callback returned no surface.
    LazyCallbackFailed,
    /// The proxy is lazy and can only be instantiated through its callback.
    LazyProxy,
    /// The cache could not free enough memory for a planned allocation.
    BudgetExceeded {
        /// The number of bytes that needed to be freed.
        requested: u64,
        /// The number of bytes the cache could have freed.
        purgeable: u64,
    },
    /// The unique key is already held by another proxy or cached surface.
    KeyConflict,
    /// A surface owned by one context was requested while borrowed by another.
    CrossContextMisuse {
        /// The context that owns the surface.
        owner: ContextId,
        /// The context currently borrowing it.
        borrower: ContextId,
    },
    /// A generic resource could not be found.
    NotFound,
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::AllocationFailed { label } => {
                write!(f, "Failed to allocate surface '{label}'")
            }
            ResourceError::InvalidGeometry { dimensions } => {
                write!(
                    f,
                    "Invalid surface dimensions {}x{}",
                    dimensions.width, dimensions.height
                )
            }
            ResourceError::InvalidFormat => write!(f, "Invalid or unsupported surface format."),
            ResourceError::Abandoned => write!(f, "The context has been abandoned."),
            ResourceError::LazyCallbackFailed => {
                write!(f, "Lazy instantiation callback returned no surface.")
            }
            ResourceError::LazyProxy => {
                write!(f, "Lazy proxies must be instantiated through their callback.")
            }
            ResourceError::BudgetExceeded {
                requested,
                purgeable,
            } => {
                write!(
                    f,
                    "Cannot make {requested} bytes of headroom; only {purgeable} bytes are purgeable"
                )
            }
            ResourceError::KeyConflict => write!(f, "Unique key is already in use."),
            ResourceError::CrossContextMisuse { owner, borrower } => {
                write!(
                    f,
                    "Surface owned by context {} is still borrowed by context {}",
                    owner.0, borrower.0
                )
            }
            ResourceError::NotFound => write!(f, "Resource not found."),
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
        }
    }
}

impl std::error::Error for ResourceError {}

/// An error reported by the device while executing recorded work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// A render pass could not be started.
    RenderPassFailed(String),
    /// A command could not be encoded or a pass could not be submitted.
    SubmitFailed(String),
    /// An MSAA resolve failed.
    ResolveFailed(String),
    /// Mip level regeneration failed.
    MipmapFailed(String),
    /// A surface-to-surface copy failed.
    CopyFailed(String),
    /// A pixel upload failed.
    UploadFailed(String),
    /// The device has been lost.
    Lost,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::RenderPassFailed(msg) => write!(f, "Render pass failed: {msg}"),
            DeviceError::SubmitFailed(msg) => write!(f, "Submission failed: {msg}"),
            DeviceError::ResolveFailed(msg) => write!(f, "MSAA resolve failed: {msg}"),
            DeviceError::MipmapFailed(msg) => write!(f, "Mipmap regeneration failed: {msg}"),
            DeviceError::CopyFailed(msg) => write!(f, "Surface copy failed: {msg}"),
            DeviceError::UploadFailed(msg) => write!(f, "Pixel upload failed: {msg}"),
            DeviceError::Lost => write!(f, "The device has been lost."),
        }
    }
}

impl std::error::Error for DeviceError {}

/// A high-level error that can occur while flushing recorded work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushError {
    /// The context has been abandoned.
    Abandoned,
    /// Surfaces could not be assigned to every proxy used by the flush.
    InstantiationFailed,
    /// The render-task graph could not be ordered.
    CyclicGraph,
    /// A resource-related error.
    Resource(ResourceError),
    /// A device-related error.
    Device(DeviceError),
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushError::Abandoned => write!(f, "Cannot flush an abandoned context."),
            FlushError::InstantiationFailed => {
                write!(f, "Failed to instantiate surfaces for the flush.")
            }
            FlushError::CyclicGraph => write!(f, "The render-task graph contains a cycle."),
            FlushError::Resource(err) => write!(f, "Resource error during flush: {err}"),
            FlushError::Device(err) => write!(f, "Device error during flush: {err}"),
        }
    }
}

impl std::error::Error for FlushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlushError::Resource(err) => Some(err),
            FlushError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for FlushError {
    fn from(err: ResourceError) -> Self {
        FlushError::Resource(err)
    }
}

impl From<DeviceError> for FlushError {
    fn from(err: DeviceError) -> Self {
        FlushError::Device(err)
    }
}
