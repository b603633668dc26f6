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

use super::OpChain;
use crate::manager::FlushState;
use crate::ops::{can_reorder, AppliedClip, Op, ProcessorAnalysis};
use crate::proxy::SurfaceProxy;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use vellum_core::{
    Caps, DeviceError, IRect, LoadOp, Mipmapped, Rect, RenderPassDescriptor, StoreOp, Surface,
};

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies the recording arena an ops task allocates its ops from.
///
/// Only ops tasks from the same arena may be merged at flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId(pub u32);

impl ArenaId {
    /// Allocates a fresh arena id.
    pub fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What the stencil buffer holds when the task's render pass begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StencilContent {
    /// The previous contents are irrelevant.
    #[default]
    DontCare,
    /// The user stencil bits are cleared.
    UserBitsCleared,
    /// The contents left by the previous task are kept.
    Preserved,
}

/// The payload of a render task that draws ops into one render target.
#[derive(Debug)]
pub struct OpsTask {
    chains: Vec<OpChain>,
    color_load_op: LoadOp,
    initial_stencil_content: StencilContent,
    must_preserve_stencil: bool,
    cannot_merge_backward: bool,
    total_bounds: Rect,
    clipped_content_bounds: IRect,
    sampled_proxies: Vec<Weak<SurfaceProxy>>,
    arena: ArenaId,
    max_chain_distance: usize,
    max_merge_distance: usize,
}

impl OpsTask {
    /// Creates an empty task allocating from `arena`.
    pub fn new(arena: ArenaId) -> Self {
        Self {
            chains: Vec::new(),
            color_load_op: LoadOp::Load,
            initial_stencil_content: StencilContent::DontCare,
            must_preserve_stencil: false,
            cannot_merge_backward: false,
            total_bounds: Rect::EMPTY,
            clipped_content_bounds: IRect::EMPTY,
            sampled_proxies: Vec::new(),
            arena,
            max_chain_distance: 10,
            max_merge_distance: 10,
        }
    }

    /// Bounds how many chains recording looks back, and how far closing looks ahead, for a
    /// chain to join.
    pub fn set_search_limits(&mut self, max_chain_distance: usize, max_merge_distance: usize) {
        self.max_chain_distance = max_chain_distance.max(1);
        self.max_merge_distance = max_merge_distance.max(1);
    }

    /// The recorded chains, including chains emptied by forward merging.
    pub fn chains(&self) -> &[OpChain] {
        &self.chains
    }

    /// The number of chains, including emptied ones.
    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    /// The number of ops across every chain.
    pub fn num_ops(&self) -> usize {
        self.chains.iter().map(|c| c.ops().len()).sum()
    }

    /// Returns `true` if no op was recorded.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// The arena the task allocates from.
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    /// The load op applied to the color attachment.
    pub fn color_load_op(&self) -> LoadOp {
        self.color_load_op
    }

    /// Sets the color load op. A clear makes the whole backing store part of the task's
    /// bounds.
    pub fn set_color_load_op(&mut self, op: LoadOp, backing_bounds: Rect) {
        self.color_load_op = op;
        if matches!(op, LoadOp::Clear(_)) {
            self.total_bounds = backing_bounds;
        }
    }

    /// The stencil contents expected at the start of the pass.
    pub fn initial_stencil_content(&self) -> StencilContent {
        self.initial_stencil_content
    }

    /// Sets the stencil contents expected at the start of the pass.
    pub fn set_initial_stencil_content(&mut self, content: StencilContent) {
        self.initial_stencil_content = content;
    }

    /// Returns `true` if the stencil must be stored at the end of the pass.
    pub fn must_preserve_stencil(&self) -> bool {
        self.must_preserve_stencil
    }

    /// Requires the stencil to be stored at the end of the pass.
    pub fn set_must_preserve_stencil(&mut self) {
        self.must_preserve_stencil = true;
    }

    /// Prevents this task from being merged into an earlier one.
    pub fn set_cannot_merge_backward(&mut self) {
        self.cannot_merge_backward = true;
    }

    /// The union of every recorded op's bounds.
    pub fn total_bounds(&self) -> Rect {
        self.total_bounds
    }

    /// The content bounds clipped to the backing store, computed at close.
    pub fn clipped_content_bounds(&self) -> IRect {
        self.clipped_content_bounds
    }

    /// Returns `true` if executing the task would leave the target unchanged.
    pub fn is_color_no_op(&self) -> bool {
        self.chains.is_empty() && self.color_load_op == LoadOp::Load
    }

    pub(crate) fn add_sampled_proxy(&mut self, proxy: &Rc<SurfaceProxy>) {
        self.sampled_proxies.push(Rc::downgrade(proxy));
    }

    /// The still-live proxies sampled by the recorded ops.
    pub fn sampled_proxies(&self) -> impl Iterator<Item = Rc<SurfaceProxy>> + '_ {
        self.sampled_proxies.iter().filter_map(Weak::upgrade)
    }

    pub(crate) fn is_used(&self, proxy: &SurfaceProxy) -> bool {
        if self.sampled_proxies().any(|p| p.id() == proxy.id()) {
            return true;
        }
        let mut used = false;
        for chain in &self.chains {
            chain.visit_proxies(&mut |p: &Rc<SurfaceProxy>, _: Mipmapped| used |= p.id() == proxy.id());
        }
        used
    }

    pub(crate) fn delete_ops(&mut self) {
        self.chains.clear();
        self.sampled_proxies.clear();
    }

    /// Records `op`, joining it onto one of the last chains when possible.
    ///
    /// Ops with non-finite bounds are dropped. The backward search stops at the first chain
    /// the op overlaps, or at the search limit.
    pub(crate) fn record_op(
        &mut self,
        op: Box<dyn Op>,
        analysis: ProcessorAnalysis,
        clip: Option<AppliedClip>,
        caps: &Caps,
    ) {
        if !op.bounds().is_finite() {
            log::warn!("Dropping {} with non-finite bounds", op.name());
            return;
        }
        self.total_bounds.join(&op.bounds());
        let clip = clip.filter(AppliedClip::does_clip);
        let mut op = op;
        let count = self.chains.len();
        let max_chain_distance = self.max_chain_distance;
        let max_merge_distance = self.max_merge_distance;
        for (i, candidate) in self.chains.iter_mut().rev().enumerate() {
            match candidate.append_op(op, analysis, clip.as_ref(), caps, max_merge_distance) {
                None => return,
                Some(rejected) => op = rejected,
            }
            if !can_reorder(&candidate.bounds(), &op.bounds()) {
                log::trace!("{} intersects chain {}", op.name(), count - 1 - i);
                break;
            }
            if i + 1 == max_chain_distance {
                break;
            }
        }
        self.chains.push(OpChain::new(op, analysis, clip));
    }

    /// Merges each chain into a later one when painter's order allows.
    pub(crate) fn forward_combine(&mut self, caps: &Caps) {
        let max_merge_distance = self.max_merge_distance;
        let len = self.chains.len();
        for i in 0..len.saturating_sub(1) {
            let max_candidate = (i + max_merge_distance).min(len - 1);
            let (head, tail) = self.chains.split_at_mut(i + 1);
            let chain = &mut head[i];
            for candidate in tail.iter_mut().take(max_candidate - i) {
                if candidate.prepend_chain(chain, caps, max_merge_distance) {
                    break;
                }
                if !can_reorder(&chain.bounds(), &candidate.bounds()) {
                    break;
                }
            }
        }
    }

    /// The dirty region closing this task would report for `target`, without closing it.
    pub fn would_dirty_target(&self, target: &SurfaceProxy) -> Option<IRect> {
        if self.is_color_no_op() {
            return None;
        }
        target
            .backing_store_bounds_rect()
            .intersect(&self.total_bounds)
            .map(|r| r.round_out())
    }

    pub(crate) fn on_make_closed(&mut self, target: &SurfaceProxy, caps: &Caps) -> Option<IRect> {
        self.forward_combine(caps);
        let dirty = self.would_dirty_target(target)?;
        self.clipped_content_bounds = dirty;
        Some(dirty)
    }

    /// Returns `true` if `later`, which targets the same proxy, may be folded into this task.
    ///
    /// A later task that clears the stencil user bits is never folded in, since its clear would
    /// land after the stencil writes of this task.
    pub fn can_merge(&self, later: &OpsTask) -> bool {
        self.arena == later.arena
            && !later.cannot_merge_backward
            && matches!(
                later.initial_stencil_content,
                StencilContent::DontCare | StencilContent::Preserved
            )
    }

    /// Folds the payload of `later` into this task.
    pub(crate) fn absorb(&mut self, later: &mut OpsTask) {
        self.clipped_content_bounds.join(&later.clipped_content_bounds);
        self.total_bounds.join(&later.total_bounds);
        if self.initial_stencil_content == StencilContent::DontCare {
            self.initial_stencil_content = later.initial_stencil_content;
        }
        self.sampled_proxies.append(&mut later.sampled_proxies);
        self.chains.append(&mut later.chains);
        self.must_preserve_stencil = later.must_preserve_stencil;
    }

    pub(crate) fn prepare(&mut self, state: &mut FlushState<'_>) {
        if self.is_color_no_op()
            || (self.clipped_content_bounds.is_empty() && self.color_load_op != LoadOp::Discard)
        {
            return;
        }
        for chain in self.chains.iter_mut().filter(|c| !c.is_empty()) {
            chain.prepare(state);
        }
    }

    pub(crate) fn execute(&self, target: &SurfaceProxy, state: &mut FlushState<'_>) -> Result<bool, DeviceError> {
        if self.is_color_no_op() || self.clipped_content_bounds.is_empty() {
            return Ok(false);
        }
        let Some(surface) = target.peek_surface() else {
            return Ok(false);
        };
        let sampled: Vec<Arc<Surface>> = self
            .sampled_proxies()
            .filter_map(|p| p.peek_surface())
            .collect();
        state.begin_render_pass(&RenderPassDescriptor {
            target: surface,
            bounds: self.clipped_content_bounds,
            color_load: self.color_load_op,
            color_store: StoreOp::Store,
            clear_stencil: self.initial_stencil_content == StencilContent::UserBitsCleared,
            sampled,
        })?;
        for chain in self.chains.iter().filter(|c| !c.is_empty()) {
            if let Err(err) = chain.execute(state) {
                state.abort_render_pass();
                return Err(err);
            }
        }
        state.submit_render_pass()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::FillRectOp;
    use crate::testing::deferred_proxy;

    fn fill(l: f32, t: f32, r: f32, b: f32) -> Box<dyn Op> {
        Box::new(FillRectOp::new(Rect::from_ltrb(l, t, r, b), [1.0; 4], false))
    }

    fn aa_fill(l: f32, t: f32, r: f32, b: f32) -> Box<dyn Op> {
        Box::new(FillRectOp::new(Rect::from_ltrb(l, t, r, b), [1.0; 4], true))
    }

    fn record(task: &mut OpsTask, op: Box<dyn Op>) {
        task.record_op(op, ProcessorAnalysis::default(), None, &Caps::default());
    }

    #[test]
    fn compatible_ops_share_one_chain() {
        let mut task = OpsTask::new(ArenaId::next());
        record(&mut task, fill(0.0, 0.0, 4.0, 4.0));
        record(&mut task, fill(8.0, 8.0, 12.0, 12.0));
        assert_eq!(task.num_chains(), 1);
        assert_eq!(task.num_ops(), 1);
        assert_eq!(task.total_bounds(), Rect::from_ltrb(0.0, 0.0, 12.0, 12.0));
    }

    #[test]
    fn backward_search_skips_disjoint_chains() {
        let mut task = OpsTask::new(ArenaId::next());
        record(&mut task, fill(0.0, 0.0, 4.0, 4.0));
        record(&mut task, aa_fill(10.0, 10.0, 14.0, 14.0));
        // Disjoint from the antialiased chain, so it can join the first one.
        record(&mut task, fill(20.0, 20.0, 24.0, 24.0));
        assert_eq!(task.num_chains(), 2);
    }

    #[test]
    fn backward_search_stops_at_overlap() {
        let mut task = OpsTask::new(ArenaId::next());
        record(&mut task, fill(0.0, 0.0, 4.0, 4.0));
        record(&mut task, aa_fill(0.0, 0.0, 14.0, 14.0));
        record(&mut task, fill(2.0, 2.0, 6.0, 6.0));
        assert_eq!(task.num_chains(), 3);
    }

    #[test]
    fn non_finite_ops_are_dropped() {
        let mut task = OpsTask::new(ArenaId::next());
        record(&mut task, fill(0.0, 0.0, f32::INFINITY, 4.0));
        assert!(task.is_empty());
        assert!(task.is_color_no_op());
    }

    #[test]
    fn clear_load_op_covers_backing_store() {
        let target = deferred_proxy(32, 16);
        let mut task = OpsTask::new(ArenaId::next());
        task.set_color_load_op(LoadOp::Clear([0.0; 4]), target.backing_store_bounds_rect());
        assert!(!task.is_color_no_op());
        let dirty = task.on_make_closed(&target, &Caps::default());
        assert_eq!(dirty, Some(IRect::from_ltrb(0, 0, 32, 16)));
        assert_eq!(task.clipped_content_bounds(), IRect::from_ltrb(0, 0, 32, 16));
    }

    #[test]
    fn content_outside_the_target_does_not_dirty_it() {
        let target = deferred_proxy(8, 8);
        let mut task = OpsTask::new(ArenaId::next());
        record(&mut task, fill(20.0, 20.0, 24.0, 24.0));
        assert_eq!(task.on_make_closed(&target, &Caps::default()), None);
    }

    #[test]
    fn forward_combine_respects_painters_order() {
        let mut task = OpsTask::new(ArenaId::next());
        record(&mut task, fill(0.0, 0.0, 4.0, 4.0));
        record(&mut task, aa_fill(0.0, 0.0, 4.0, 4.0));
        // Overlaps the antialiased chain, so it starts a third chain during recording.
        record(&mut task, fill(2.0, 2.0, 3.0, 3.0));
        assert_eq!(task.num_chains(), 3);
        task.forward_combine(&Caps::default());
        assert!(!task.chains()[0].is_empty());
    }

    #[test]
    fn forward_combine_folds_chains_the_backward_search_missed() {
        let mut task = OpsTask::new(ArenaId::next());
        task.set_search_limits(1, 10);
        record(&mut task, fill(0.0, 0.0, 4.0, 4.0));
        record(&mut task, aa_fill(10.0, 10.0, 14.0, 14.0));
        record(&mut task, fill(20.0, 20.0, 24.0, 24.0));
        assert_eq!(task.num_chains(), 3);
        task.forward_combine(&Caps::default());
        assert!(task.chains()[0].is_empty());
        assert_eq!(task.num_chains(), 3);
        assert_eq!(task.num_ops(), 2);
        assert_eq!(task.chains()[2].bounds(), Rect::from_ltrb(0.0, 0.0, 24.0, 24.0));
    }

    #[test]
    fn absorbing_keeps_first_stencil_content_and_last_preserve_flag() {
        let arena = ArenaId::next();
        let mut first = OpsTask::new(arena);
        let mut later = OpsTask::new(arena);
        later.set_initial_stencil_content(StencilContent::Preserved);
        later.set_must_preserve_stencil();
        record(&mut later, fill(0.0, 0.0, 4.0, 4.0));
        assert!(first.can_merge(&later));
        first.absorb(&mut later);
        assert_eq!(first.initial_stencil_content(), StencilContent::Preserved);
        assert!(first.must_preserve_stencil());
        assert_eq!(first.num_chains(), 1);
        assert!(later.is_empty());

        let mut blocked = OpsTask::new(arena);
        blocked.set_cannot_merge_backward();
        assert!(!first.can_merge(&blocked));
        assert!(!first.can_merge(&OpsTask::new(ArenaId::next())));

        let mut clearing = OpsTask::new(arena);
        clearing.set_initial_stencil_content(StencilContent::UserBitsCleared);
        assert!(!first.can_merge(&clearing));
    }
}
