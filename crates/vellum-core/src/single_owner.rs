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

//! A debug-only guard asserting that a context is used from one thread at a time.

use std::sync::Mutex;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct OwnerState {
    owner: Option<ThreadId>,
    depth: u32,
}

/// Asserts, in debug builds, that all guarded sections run on the same thread.
///
/// Sections may nest. Ownership is released when the outermost guard drops, after which
/// another thread may take over.
#[derive(Debug, Default)]
pub struct SingleOwner {
    state: Mutex<OwnerState>,
}

/// Keeps a [`SingleOwner`] claimed for the current thread until dropped.
#[must_use]
#[derive(Debug)]
pub struct SingleOwnerGuard<'a> {
    owner: &'a SingleOwner,
}

impl SingleOwner {
    /// Creates an unclaimed owner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the owner for the current thread.
    ///
    /// In debug builds this panics if another thread currently holds the claim.
    pub fn enter(&self) -> SingleOwnerGuard<'_> {
        if cfg!(debug_assertions) {
            if let Ok(mut state) = self.state.lock() {
                let current = thread::current().id();
                match state.owner {
                    Some(owner) => debug_assert_eq!(
                        owner, current,
                        "context used from two threads at once"
                    ),
                    None => state.owner = Some(current),
                }
                state.depth += 1;
            }
        }
        SingleOwnerGuard { owner: self }
    }
}

impl Drop for SingleOwnerGuard<'_> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            if let Ok(mut state) = self.owner.state.lock() {
                state.depth = state.depth.saturating_sub(1);
                if state.depth == 0 {
                    state.owner = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn nested_sections_on_one_thread_are_allowed() {
        let owner = SingleOwner::new();
        let _outer = owner.enter();
        let _inner = owner.enter();
    }

    #[test]
    fn ownership_moves_after_release() {
        let owner = Arc::new(SingleOwner::new());
        drop(owner.enter());
        let other = owner.clone();
        thread::spawn(move || {
            let _guard = other.enter();
        })
        .join()
        .unwrap();
    }
}
