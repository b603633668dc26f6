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

//! Render tasks: the nodes of the flush-time dependency graph.
//!
//! A [`RenderTask`] carries the state every task shares (targets, dependency edges, flags,
//! deferred uploads) and a [`TaskKind`] with the kind-specific payload. Edges and the
//! last-writer table are owned by the drawing manager; tasks only store the ids.

mod copy_task;
mod op_chain;
mod ops_task;
mod render_task;
mod resolve_task;

pub use copy_task::CopyTask;
pub use op_chain::OpChain;
pub use ops_task::{ArenaId, OpsTask, StencilContent};
pub use render_task::{RenderTask, TaskFlags, TaskId, TaskKind};
pub use resolve_task::{ResolveFlags, TextureResolveTask};
