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

//! Per-context options that tune scheduling and allocation.

use serde::{Deserialize, Serialize};

/// A collection of options that affect how a context records, merges and allocates.
///
/// Missing fields in a RON document fall back to their [`Default`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    /// If `true`, adjacent compatible ops tasks are merged at flush time.
    pub reduce_ops_task_splitting: bool,
    /// A global switch for register recycling in the resource allocator.
    pub allow_scratch_recycling: bool,
    /// How many chains back an op may look for a chain to join.
    pub max_op_chain_distance: usize,
    /// How many chains forward a chain may look for a chain to merge with at close time.
    pub max_op_merge_distance: usize,
    /// The device is asked to submit after this many executed tasks.
    pub max_render_tasks_before_submit: usize,
    /// The byte budget of the resource cache.
    pub resource_budget_bytes: u64,
    /// If `true`, non-renderable textures may be served from the scratch pool.
    pub reuse_scratch_textures: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            reduce_ops_task_splitting: false,
            allow_scratch_recycling: true,
            max_op_chain_distance: 10,
            max_op_merge_distance: 10,
            max_render_tasks_before_submit: 100,
            resource_budget_bytes: 256 * 1024 * 1024,
            reuse_scratch_textures: true,
        }
    }
}

impl ContextOptions {
    /// Parses options from a RON document.
    pub fn from_ron_str(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(text)
    }

    /// Serializes these options to a RON document.
    pub fn to_ron_string(&self) -> Result<String, ron::Error> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
    }
}
