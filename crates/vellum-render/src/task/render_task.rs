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

use super::{CopyTask, OpsTask, TextureResolveTask};
use crate::allocator::{ActualUse, AllowRecycling, ResourceAllocator};
use crate::manager::FlushState;
use crate::proxy::SurfaceProxy;
use bitflags::bitflags;
use smallvec::SmallVec;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};
use vellum_core::{Caps, DeviceError, IRect, Mipmapped};

static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

/// The identity of a render task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u32);

impl TaskId {
    /// Allocates a fresh task id.
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

bitflags! {
    /// State and scheduling flags of a render task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TaskFlags: u8 {
        /// The task accepts no more ops, targets or dependencies.
        const CLOSED = 1 << 0;
        /// The task is no longer the last writer of any proxy.
        const DISOWNED = 1 << 1;
        /// The task renders an atlas and is not closed when another task reads from it.
        const ATLAS = 1 << 2;
        /// Sorting and merging never move tasks across this one.
        const BLOCKS_REORDERING = 1 << 3;
    }
}

/// The kind-specific payload of a render task.
#[derive(Debug)]
pub enum TaskKind {
    /// Draws ops into a single render target.
    Ops(OpsTask),
    /// Resolves MSAA and regenerates mipmaps before the surfaces are read.
    TextureResolve(TextureResolveTask),
    /// Copies a region of one surface into another.
    Copy(CopyTask),
}

/// One node of the render-task graph.
///
/// A task moves from open to closed once, when its write set is frozen, and is disowned at
/// the end of the flush that executed it.
#[derive(Debug)]
pub struct RenderTask {
    id: TaskId,
    flags: TaskFlags,
    targets: SmallVec<[Rc<SurfaceProxy>; 1]>,
    dependencies: SmallVec<[TaskId; 2]>,
    dependents: SmallVec<[TaskId; 2]>,
    texture_resolve_task: Option<TaskId>,
    deferred_proxies: Vec<Weak<SurfaceProxy>>,
    kind: TaskKind,
}

impl RenderTask {
    pub(crate) fn new(kind: TaskKind) -> Self {
        Self {
            id: TaskId::next(),
            flags: TaskFlags::empty(),
            targets: SmallVec::new(),
            dependencies: SmallVec::new(),
            dependents: SmallVec::new(),
            texture_resolve_task: None,
            deferred_proxies: Vec::new(),
            kind,
        }
    }

    /// The task's id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// The task's flags.
    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    /// Returns `true` once the task accepts no more work.
    pub fn is_closed(&self) -> bool {
        self.flags.contains(TaskFlags::CLOSED)
    }

    /// Returns `true` once the task has been disowned.
    pub fn is_disowned(&self) -> bool {
        self.flags.contains(TaskFlags::DISOWNED)
    }

    /// Returns `true` if sorting and merging must not move tasks across this one.
    pub fn blocks_reordering(&self) -> bool {
        self.flags.contains(TaskFlags::BLOCKS_REORDERING)
    }

    pub(crate) fn set_flag(&mut self, flag: TaskFlags) {
        self.flags.insert(flag);
    }

    /// The kind-specific payload.
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut TaskKind {
        &mut self.kind
    }

    /// The ops payload, if this is an ops task.
    pub fn as_ops_task(&self) -> Option<&OpsTask> {
        match &self.kind {
            TaskKind::Ops(ops) => Some(ops),
            _ => None,
        }
    }

    pub(crate) fn as_ops_task_mut(&mut self) -> Option<&mut OpsTask> {
        match &mut self.kind {
            TaskKind::Ops(ops) => Some(ops),
            _ => None,
        }
    }

    /// The proxies this task writes.
    pub fn targets(&self) -> &[Rc<SurfaceProxy>] {
        &self.targets
    }

    /// The `index`th target.
    pub fn target(&self, index: usize) -> Option<&Rc<SurfaceProxy>> {
        self.targets.get(index)
    }

    /// The number of targets.
    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub(crate) fn push_target(&mut self, proxy: Rc<SurfaceProxy>) {
        debug_assert!(!self.is_closed());
        debug_assert!(!self.targets.iter().any(|t| t.id() == proxy.id()));
        self.targets.push(proxy);
    }

    /// The tasks this one depends on.
    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    /// The tasks that depend on this one.
    pub fn dependents(&self) -> &[TaskId] {
        &self.dependents
    }

    /// Returns `true` if there is a direct edge from this task to `other`.
    pub fn depends_on(&self, other: TaskId) -> bool {
        self.dependencies.contains(&other)
    }

    pub(crate) fn push_dependency(&mut self, other: TaskId) {
        if !self.dependencies.contains(&other) {
            self.dependencies.push(other);
        }
    }

    pub(crate) fn push_dependent(&mut self, other: TaskId) {
        if !self.dependents.contains(&other) {
            self.dependents.push(other);
        }
    }

    /// Points the edge to `old` at `new` instead. Returns `false` if there was no such edge.
    pub(crate) fn replace_dependency(&mut self, old: TaskId, new: TaskId) -> bool {
        let Some(pos) = self.dependencies.iter().position(|d| *d == old) else {
            return false;
        };
        if self.dependencies.contains(&new) || new == self.id {
            self.dependencies.remove(pos);
        } else {
            self.dependencies[pos] = new;
        }
        true
    }

    pub(crate) fn replace_dependent(&mut self, old: TaskId, new: TaskId) {
        let Some(pos) = self.dependents.iter().position(|d| *d == old) else {
            return;
        };
        if self.dependents.contains(&new) || new == self.id {
            self.dependents.remove(pos);
        } else {
            self.dependents[pos] = new;
        }
    }

    pub(crate) fn remove_dependent(&mut self, other: TaskId) {
        self.dependents.retain(|d| *d != other);
    }

    /// The implicit resolve task this one will depend on once closed.
    pub fn texture_resolve_task(&self) -> Option<TaskId> {
        self.texture_resolve_task
    }

    pub(crate) fn set_texture_resolve_task(&mut self, task: TaskId) {
        self.texture_resolve_task = Some(task);
    }

    pub(crate) fn push_deferred_proxy(&mut self, proxy: &Rc<SurfaceProxy>) {
        self.deferred_proxies.push(Rc::downgrade(proxy));
    }

    /// The still-live deferred texture proxies whose uploads this task schedules.
    pub fn deferred_proxies(&self) -> impl Iterator<Item = Rc<SurfaceProxy>> + '_ {
        self.deferred_proxies.iter().filter_map(Weak::upgrade)
    }

    pub(crate) fn take_deferred_proxies(&mut self) -> Vec<Weak<SurfaceProxy>> {
        std::mem::take(&mut self.deferred_proxies)
    }

    pub(crate) fn extend_deferred_proxies(&mut self, proxies: Vec<Weak<SurfaceProxy>>) {
        self.deferred_proxies.extend(proxies);
    }

    /// Returns `true` if this task reads or writes `proxy`.
    pub fn is_used(&self, proxy: &SurfaceProxy) -> bool {
        if self.targets.iter().any(|t| t.id() == proxy.id()) {
            return true;
        }
        match &self.kind {
            TaskKind::Ops(ops) => ops.is_used(proxy),
            TaskKind::Copy(copy) => copy.src().id() == proxy.id(),
            TaskKind::TextureResolve(_) => false,
        }
    }

    /// Returns `true` if every target is backed by a surface.
    pub fn is_instantiated(&self) -> bool {
        self.targets.iter().all(|t| t.is_instantiated())
    }

    /// Freezes the task's write set.
    ///
    /// Marks the first target MSAA-dirty or mip-dirty when the task will write it, sets
    /// [`TaskFlags::CLOSED`] and hands back the pending resolve task, which the caller must
    /// link as a dependency and close.
    pub(crate) fn close(&mut self, caps: &Caps) -> Option<TaskId> {
        if self.is_closed() {
            return None;
        }
        let dirty = match (&mut self.kind, self.targets.first()) {
            (TaskKind::Ops(ops), Some(target)) => ops.on_make_closed(target, caps),
            (TaskKind::Copy(copy), Some(_)) => Some(copy.dst_rect()),
            _ => None,
        };
        if let (Some(rect), Some(target)) = (dirty, self.targets.first()) {
            mark_target_dirty(target, rect);
        }
        self.set_flag(TaskFlags::CLOSED);
        self.texture_resolve_task.take()
    }

    /// Empties an ops task so a fullscreen clear can become its load op.
    ///
    /// Returns `false` if existing work could not be discarded or the target cannot change
    /// its load op, in which case the caller must record a clear op instead.
    pub(crate) fn reset_for_fullscreen_clear(&mut self, can_discard_previous: bool) -> bool {
        let wraps_secondary_cb = self.targets.first().is_some_and(|t| t.wraps_secondary_cb());
        let TaskKind::Ops(ops) = &mut self.kind else {
            return false;
        };
        if !can_discard_previous && !ops.is_empty() {
            return false;
        }
        ops.delete_ops();
        self.deferred_proxies.clear();
        !wraps_secondary_cb
    }

    /// Records this task's proxy uses with the allocator, advancing its op counter.
    pub fn gather_proxy_intervals(&self, alloc: &mut ResourceAllocator<'_>) {
        debug_assert!(self.is_closed());
        match &self.kind {
            TaskKind::Ops(ops) => {
                if ops.is_color_no_op() {
                    return;
                }
                for proxy in self.deferred_proxies() {
                    alloc.add_interval(&proxy, 0, 0, ActualUse::No, AllowRecycling::Yes);
                }
                let Some(target) = self.targets.first() else {
                    return;
                };
                let cur = alloc.cur_op();
                let chains = ops.num_chains() as u32;
                if chains > 0 {
                    alloc.add_interval(target, cur, cur + chains - 1, ActualUse::Yes, AllowRecycling::Yes);
                } else {
                    // A load op with no draws still needs the target live for one op.
                    alloc.add_interval(target, cur, cur, ActualUse::Yes, AllowRecycling::Yes);
                    alloc.inc_ops();
                }
                let allow = if target.wraps_secondary_cb() {
                    AllowRecycling::No
                } else {
                    AllowRecycling::Yes
                };
                for chain in ops.chains() {
                    let cur = alloc.cur_op();
                    chain.visit_proxies(&mut |p: &Rc<SurfaceProxy>, _: Mipmapped| {
                        alloc.add_interval(p, cur, cur, ActualUse::Yes, allow);
                    });
                    // Merged-away chains still count, to keep op indices consistent.
                    alloc.inc_ops();
                }
            }
            TaskKind::TextureResolve(_) => {
                let cur = alloc.cur_op();
                for target in &self.targets {
                    alloc.add_interval(target, cur, cur, ActualUse::Yes, AllowRecycling::Yes);
                }
                alloc.inc_ops();
            }
            TaskKind::Copy(copy) => {
                let cur = alloc.cur_op();
                alloc.add_interval(copy.src(), cur, cur, ActualUse::Yes, AllowRecycling::Yes);
                for target in &self.targets {
                    alloc.add_interval(target, cur, cur, ActualUse::Yes, AllowRecycling::Yes);
                }
                alloc.inc_ops();
            }
        }
    }

    /// Schedules deferred uploads, then lets the ops prepare.
    pub fn prepare(&mut self, state: &mut FlushState<'_>) {
        for proxy in self.deferred_proxies.iter().filter_map(Weak::upgrade) {
            state.schedule_upload(&proxy);
        }
        if let TaskKind::Ops(ops) = &mut self.kind {
            ops.prepare(state);
        }
    }

    /// Executes the task. Returns `false` if there was nothing to do.
    /// ## Errors
    /// * `DeviceError` - If the device rejects any command.
    pub fn execute(&self, state: &mut FlushState<'_>) -> Result<bool, DeviceError> {
        match &self.kind {
            TaskKind::Ops(ops) => match self.targets.first() {
                Some(target) => ops.execute(target, state),
                None => Ok(false),
            },
            TaskKind::TextureResolve(resolve) => resolve.execute(&self.targets, state),
            TaskKind::Copy(copy) => match self.targets.first() {
                Some(dst) => copy.execute(dst, state),
                None => Ok(false),
            },
        }
    }

    /// Stops tracking this task as the writer of its targets.
    pub(crate) fn disown(&mut self) {
        self.set_flag(TaskFlags::DISOWNED);
    }
}

fn mark_target_dirty(target: &SurfaceProxy, rect: IRect) {
    if target.requires_manual_msaa_resolve() {
        if let Some(rt) = target.as_render_target() {
            rt.mark_msaa_dirty(rect);
        }
    }
    if let Some(tex) = target.as_texture() {
        if tex.mipmapped() == Mipmapped::Yes {
            tex.mark_mipmaps_dirty();
        }
    }
}
