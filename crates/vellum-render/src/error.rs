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

//! Errors raised by the allocator and the task graph.

use crate::task::TaskId;
use thiserror::Error;
use vellum_core::{FlushError, ProxyId, ResourceError};

/// An error raised while planning or assigning surfaces for a flush.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    /// A proxy could not be backed by a surface.
    #[error("failed to instantiate {proxy}")]
    InstantiationFailed {
        /// The first proxy that failed.
        proxy: ProxyId,
    },
    /// An earlier call failed and the allocator has not been reset since.
    #[error("a previous instantiation failed; the allocator must be reset")]
    PreviouslyFailed,
    /// The cache could not free enough memory for the planned allocations.
    #[error(transparent)]
    Budget(#[from] ResourceError),
}

impl From<AllocatorError> for FlushError {
    fn from(err: AllocatorError) -> Self {
        match err {
            AllocatorError::Budget(source) => FlushError::Resource(source),
            AllocatorError::InstantiationFailed { .. } | AllocatorError::PreviouslyFailed => {
                FlushError::InstantiationFailed
            }
        }
    }
}

/// An error raised while mutating the render-task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The task does not exist, or was removed by the last flush.
    #[error("unknown render task {0}")]
    UnknownTask(TaskId),
    /// The task no longer accepts ops, targets or dependencies.
    #[error("render task {0} is closed")]
    TaskClosed(TaskId),
    /// The operation only applies to ops tasks.
    #[error("render task {0} is not an ops task")]
    NotAnOpsTask(TaskId),
    /// The edge would make a task depend on itself, directly or transitively.
    #[error("making {dependent} depend on {depended_on} would create a cycle")]
    Cycle {
        /// The task that would gain the dependency.
        dependent: TaskId,
        /// The task it would depend on.
        depended_on: TaskId,
    },
    /// The proxy cannot be drawn into.
    #[error("{0} is not a render target")]
    NotRenderable(ProxyId),
    /// The copy source or destination is unsuitable.
    #[error("cannot copy from {src} to {dst}")]
    InvalidCopy {
        /// The copy source.
        src: ProxyId,
        /// The copy destination.
        dst: ProxyId,
    },
    /// The drawing manager has been abandoned.
    #[error("the drawing manager has been abandoned")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_errors_map_onto_flush_errors() {
        let budget = AllocatorError::from(ResourceError::BudgetExceeded {
            requested: 10,
            purgeable: 0,
        });
        assert!(matches!(
            FlushError::from(budget),
            FlushError::Resource(ResourceError::BudgetExceeded { .. })
        ));
        assert_eq!(
            FlushError::from(AllocatorError::PreviouslyFailed),
            FlushError::InstantiationFailed
        );
    }

    #[test]
    fn graph_error_messages_name_the_task() {
        let id = TaskId(7);
        assert_eq!(GraphError::TaskClosed(id).to_string(), "render task task#7 is closed");
    }
}
