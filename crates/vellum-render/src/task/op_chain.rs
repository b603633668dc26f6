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

use crate::manager::FlushState;
use crate::ops::{can_reorder, combine_if_possible, AppliedClip, CombineResult, Op, ProcessorAnalysis};
use crate::proxy::SurfaceProxy;
use std::collections::VecDeque;
use std::rc::Rc;
use vellum_core::{Caps, DeviceError, Mipmapped, Rect};

/// A run of ops that execute back-to-back with the same clip and processor requirements.
///
/// A chain is emptied, but not removed, when it is merged forward into a later chain.
#[derive(Debug)]
pub struct OpChain {
    ops: Vec<Box<dyn Op>>,
    analysis: ProcessorAnalysis,
    clip: Option<AppliedClip>,
    bounds: Rect,
}

impl OpChain {
    pub(crate) fn new(op: Box<dyn Op>, analysis: ProcessorAnalysis, clip: Option<AppliedClip>) -> Self {
        let bounds = op.bounds();
        Self {
            ops: vec![op],
            analysis,
            clip,
            bounds,
        }
    }

    /// The ops in execution order.
    pub fn ops(&self) -> &[Box<dyn Op>] {
        &self.ops
    }

    /// Returns `true` if the chain was merged away.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The union of the ops' bounds.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// The clip shared by every op in the chain.
    pub fn clip(&self) -> Option<&AppliedClip> {
        self.clip.as_ref()
    }

    pub(crate) fn visit_proxies(&self, visitor: &mut dyn FnMut(&Rc<SurfaceProxy>, Mipmapped)) {
        for op in &self.ops {
            op.visit_proxies(visitor);
        }
    }

    /// Tries to add `op` to the end of this chain. Gives the op back on failure.
    pub(crate) fn append_op(
        &mut self,
        op: Box<dyn Op>,
        analysis: ProcessorAnalysis,
        clip: Option<&AppliedClip>,
        caps: &Caps,
        max_merge_distance: usize,
    ) -> Option<Box<dyn Op>> {
        let bounds = op.bounds();
        let mut list = VecDeque::from([op]);
        if self.try_concat(&mut list, analysis, clip, bounds, caps, max_merge_distance) {
            None
        } else {
            list.pop_front()
        }
    }

    /// Tries to concatenate `that` in front of this chain, leaving `that` empty on success.
    pub(crate) fn prepend_chain(&mut self, that: &mut OpChain, caps: &Caps, max_merge_distance: usize) -> bool {
        let mut list: VecDeque<Box<dyn Op>> = std::mem::take(&mut that.ops).into();
        if !self.try_concat_front(&mut list, that, caps, max_merge_distance) {
            that.ops = list.into();
            return false;
        }
        true
    }

    // `that`'s ops run first, so they become the head and this chain's ops are concatenated
    // onto them.
    fn try_concat_front(
        &mut self,
        front: &mut VecDeque<Box<dyn Op>>,
        that: &OpChain,
        caps: &Caps,
        max_merge_distance: usize,
    ) -> bool {
        let mut head = OpChain {
            ops: std::mem::take(front).into(),
            analysis: that.analysis,
            clip: that.clip,
            bounds: that.bounds,
        };
        let mut mine: VecDeque<Box<dyn Op>> = std::mem::take(&mut self.ops).into();
        if head.try_concat(&mut mine, self.analysis, self.clip.as_ref(), self.bounds, caps, max_merge_distance) {
            self.ops = head.ops;
            self.bounds = head.bounds;
            true
        } else {
            self.ops = mine.into();
            *front = head.ops.into();
            false
        }
    }

    fn try_concat(
        &mut self,
        list: &mut VecDeque<Box<dyn Op>>,
        analysis: ProcessorAnalysis,
        clip: Option<&AppliedClip>,
        bounds: Rect,
        caps: &Caps,
        max_merge_distance: usize,
    ) -> bool {
        let Some(list_head) = list.front() else {
            return true;
        };
        let Some(own_head) = self.ops.first() else {
            return false;
        };
        if own_head.as_any().type_id() != list_head.as_any().type_id()
            || self.clip.as_ref() != clip
            || self.analysis.requires_non_overlapping_draws != analysis.requires_non_overlapping_draws
            || (self.analysis.requires_non_overlapping_draws
                && self.bounds.touches_or_overlaps(&bounds))
            || self.analysis.requires_dst_texture != analysis.requires_dst_texture
        {
            return false;
        }
        let mut first = true;
        while let Some(mut head) = list.pop_front() {
            let Some(tail) = self.ops.last_mut() else {
                list.push_front(head);
                return false;
            };
            match combine_if_possible(tail.as_mut(), head.as_mut(), caps) {
                CombineResult::CannotCombine => {
                    list.push_front(head);
                    if first {
                        return false;
                    }
                    // Chaining is transitive, so the rest can always follow in order.
                    self.ops.extend(list.drain(..));
                }
                CombineResult::MayChain => {
                    list.push_front(head);
                    let a = std::mem::take(&mut self.ops);
                    let b = std::mem::take(list);
                    self.ops = concat_lists(a, b, caps, max_merge_distance);
                }
                CombineResult::Merged => {
                    log::trace!("Merged {} into chain tail", head.name());
                }
            }
            first = false;
        }
        self.bounds.join(&bounds);
        true
    }

    pub(crate) fn prepare(&mut self, state: &mut FlushState<'_>) {
        for op in &mut self.ops {
            op.prepare(state);
        }
    }

    pub(crate) fn execute(&self, state: &mut FlushState<'_>) -> Result<(), DeviceError> {
        for op in &self.ops {
            op.execute(state, &self.bounds)?;
        }
        Ok(())
    }
}

/// Concatenates two chainable lists, merging ops across them where painter's order allows.
///
/// Each op of `b` is tried against `a`'s ops from the original tail backwards. It is either
/// merged into an op of `a`, merges an op of `a` into itself (that op then moves into `b`),
/// or is appended to `a`. Ops appended this way are not merge candidates for later ops of `b`.
fn concat_lists(
    mut a: Vec<Box<dyn Op>>,
    mut b: VecDeque<Box<dyn Op>>,
    caps: &Caps,
    max_merge_distance: usize,
) -> Vec<Box<dyn Op>> {
    let mut orig_tail = a.len().checked_sub(1);
    let mut skip_bounds = Rect::largest_inverted();
    while let Some(b_bounds) = b.front().map(|op| op.bounds()) {
        let mut merged = false;
        let mut checks = 0;
        let no_skip = orig_tail.is_some() && orig_tail == a.len().checked_sub(1);
        let mut can_backward_merge = no_skip || can_reorder(&b_bounds, &skip_bounds);
        let mut forward_merge_bounds = skip_bounds;
        let mut cursor = orig_tail;
        while let Some(ai) = cursor {
            let a_bounds = a[ai].bounds();
            let can_forward_merge =
                ai + 1 == a.len() || can_reorder(&a_bounds, &forward_merge_bounds);
            if can_forward_merge || can_backward_merge {
                if let Some(b_head) = b.front_mut() {
                    merged = combine_if_possible(a[ai].as_mut(), b_head.as_mut(), caps)
                        == CombineResult::Merged;
                }
            }
            if merged {
                b.pop_front();
                if !can_backward_merge {
                    // The merged op must execute at b's position.
                    orig_tail = match orig_tail {
                        Some(t) if t == ai => ai.checked_sub(1),
                        Some(t) => Some(t - 1),
                        None => None,
                    };
                    let detached = a.remove(ai);
                    b.push_front(detached);
                    if a.is_empty() {
                        return b.into();
                    }
                }
                break;
            }
            checks += 1;
            if checks == max_merge_distance {
                break;
            }
            forward_merge_bounds.join_non_empty(&a_bounds);
            can_backward_merge = can_backward_merge && can_reorder(&b_bounds, &a_bounds);
            cursor = ai.checked_sub(1);
        }
        if !merged {
            if let Some(op) = b.pop_front() {
                skip_bounds.join_non_empty(&op.bounds());
                a.push(op);
            }
        }
    }
    a
}
