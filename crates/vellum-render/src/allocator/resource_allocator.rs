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

use crate::error::AllocatorError;
use crate::proxy::SurfaceProxy;
use ahash::AHashMap;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use vellum_core::{
    Budgeted, ContextOptions, ProxyId, ResourceProvider, ScratchKey, Surface, UniqueKey,
};

/// Whether an interval records a real read or write of the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActualUse {
    /// The proxy is only pinned, e.g. waiting for an upload.
    No,
    /// The proxy is read or written.
    Yes,
}

/// Whether the proxy's surface may be handed to a later proxy once the interval ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowRecycling {
    /// The surface is kept for this proxy alone.
    No,
    /// The surface may be recycled.
    Yes,
}

/// Counters describing one allocation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// The number of registers created while planning.
    pub registers_created: usize,
    /// The number of surfaces newly created while assigning.
    pub surfaces_created: usize,
    /// The number of proxies bound to a surface that already existed.
    pub surfaces_reused: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IntervalId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegisterId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocatorState {
    Recording,
    Planned,
    Assigned,
}

#[derive(Debug)]
struct Interval {
    proxy: Rc<SurfaceProxy>,
    start: u32,
    end: u32,
    uses: u32,
    allow_recycling: bool,
    register: Option<RegisterId>,
}

/// One future surface, shared in turn by proxies whose intervals do not overlap.
#[derive(Debug)]
struct Register {
    originating: Weak<SurfaceProxy>,
    scratch_key: Option<ScratchKey>,
    existing_surface: Option<Arc<Surface>>,
    accounted_for_budget: bool,
}

/// Plans and performs the binding of surfaces to the proxies used by one flush.
///
/// The allocator moves through `add_interval* -> plan_assignment -> [make_budget_headroom]
/// -> assign`, and back to the start with [`ResourceAllocator::reset`]. Any failure is
/// sticky: later calls fail until the allocator is reset.
pub struct ResourceAllocator<'a> {
    provider: &'a dyn ResourceProvider,
    allow_scratch_recycling: bool,
    intervals: Vec<Interval>,
    by_proxy: AHashMap<ProxyId, IntervalId>,
    // Sorted by increasing start.
    pending: Vec<IntervalId>,
    // Sorted by increasing end.
    active: Vec<IntervalId>,
    // Sorted by increasing start.
    finished: Vec<IntervalId>,
    registers: Vec<Register>,
    unique_key_registers: AHashMap<UniqueKey, RegisterId>,
    free_pool: AHashMap<ScratchKey, VecDeque<RegisterId>>,
    // Proxies bound since the last successful `assign`, with whether they were fully lazy.
    bound: Vec<(Rc<SurfaceProxy>, bool)>,
    num_ops: u32,
    failed: bool,
    state: AllocatorState,
    stats: AllocatorStats,
}

impl<'a> ResourceAllocator<'a> {
    /// Creates an allocator drawing surfaces from `provider`.
    pub fn new(provider: &'a dyn ResourceProvider, options: &ContextOptions) -> Self {
        Self {
            provider,
            allow_scratch_recycling: options.allow_scratch_recycling,
            intervals: Vec::new(),
            by_proxy: AHashMap::new(),
            pending: Vec::new(),
            active: Vec::new(),
            finished: Vec::new(),
            registers: Vec::new(),
            unique_key_registers: AHashMap::new(),
            free_pool: AHashMap::new(),
            bound: Vec::new(),
            num_ops: 0,
            failed: false,
            state: AllocatorState::Recording,
            stats: AllocatorStats::default(),
        }
    }

    /// The index the next recorded op will get.
    pub fn cur_op(&self) -> u32 {
        self.num_ops
    }

    /// Advances the op counter.
    pub fn inc_ops(&mut self) {
        self.num_ops += 1;
    }

    /// Returns `true` once an instantiation failed; cleared by [`ResourceAllocator::reset`].
    pub fn failed_instantiation(&self) -> bool {
        self.failed
    }

    /// Returns `true` if no interval was recorded.
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The counters of the current pass.
    pub fn stats(&self) -> AllocatorStats {
        self.stats
    }

    /// The number of registers created so far.
    pub fn num_registers(&self) -> usize {
        self.registers.len()
    }

    /// The register planned for `proxy`, as an index in creation order.
    ///
    /// Instantiated, lazy and unrecorded proxies have none.
    pub fn register_index(&self, proxy: ProxyId) -> Option<usize> {
        let id = self.by_proxy.get(&proxy)?;
        self.intervals[id.0].register.map(|r| r.0)
    }

    /// Records that `proxy` is live from op `start` to op `end`, both inclusive.
    ///
    /// A proxy already recorded has its interval extended instead. Instantiated proxies whose
    /// surface cannot be recycled are skipped. Read-only proxies never get an interval: lazy
    /// ones are instantiated on the spot, and a failure there poisons the allocator. Once
    /// poisoned, further calls are ignored until [`ResourceAllocator::reset`].
    pub fn add_interval(
        &mut self,
        proxy: &Rc<SurfaceProxy>,
        start: u32,
        end: u32,
        actual_use: ActualUse,
        allow_recycling: AllowRecycling,
    ) {
        debug_assert!(start <= end);
        debug_assert_eq!(
            self.state,
            AllocatorState::Recording,
            "intervals added after planning"
        );
        if self.state != AllocatorState::Recording || self.failed {
            return;
        }
        if proxy
            .peek_surface()
            .is_some_and(|surface| surface.scratch_key().is_none())
        {
            return;
        }
        if proxy.read_only() {
            if proxy.is_lazy() {
                let fully_lazy = proxy.is_fully_lazy();
                if proxy.do_lazy_instantiation(self.provider).is_ok() {
                    self.bound.push((proxy.clone(), fully_lazy));
                } else {
                    log::warn!("Read-only lazy {} failed to instantiate", proxy.id());
                    self.fail();
                }
            }
            return;
        }

        if let Some(&id) = self.by_proxy.get(&proxy.id()) {
            let interval = &mut self.intervals[id.0];
            if actual_use == ActualUse::Yes {
                interval.uses += 1;
            }
            if allow_recycling == AllowRecycling::No {
                interval.allow_recycling = false;
            }
            interval.end = interval.end.max(end);
            return;
        }

        let id = IntervalId(self.intervals.len());
        self.intervals.push(Interval {
            proxy: proxy.clone(),
            start,
            end,
            uses: u32::from(actual_use == ActualUse::Yes),
            allow_recycling: allow_recycling == AllowRecycling::Yes,
            register: None,
        });
        self.by_proxy.insert(proxy.id(), id);
        let intervals = &self.intervals;
        let pos = self
            .pending
            .partition_point(|other| intervals[other.0].start <= start);
        self.pending.insert(pos, id);
        log::trace!("Interval [{start}, {end}] for {}", proxy.id());
    }

    /// Assigns a register to every recorded proxy that needs a surface.
    ///
    /// Fully lazy proxies are instantiated here so that their size is known for budgeting.
    /// ## Errors
    /// * `AllocatorError::InstantiationFailed` - If a fully lazy proxy failed to instantiate.
    /// * `AllocatorError::PreviouslyFailed` - If an earlier step already failed.
    pub fn plan_assignment(&mut self) -> Result<(), AllocatorError> {
        debug_assert_eq!(self.state, AllocatorState::Recording);
        self.state = AllocatorState::Planned;
        if self.failed {
            return Err(AllocatorError::PreviouslyFailed);
        }
        let pending = std::mem::take(&mut self.pending);
        let mut failure = None;
        for id in pending {
            let start = self.intervals[id.0].start;
            self.expire(start);
            self.insert_active(id);

            let proxy = self.intervals[id.0].proxy.clone();
            if proxy.is_instantiated() {
                continue;
            }
            if proxy.is_lazy() {
                if proxy.is_fully_lazy() {
                    if proxy.do_lazy_instantiation(self.provider).is_err() {
                        failure = Some(proxy.id());
                        break;
                    }
                    self.bound.push((proxy, true));
                }
                continue;
            }
            let register = self.find_or_create_register(&proxy);
            self.intervals[id.0].register = Some(register);
        }
        self.expire(u32::MAX);
        match failure {
            Some(proxy) => {
                self.fail();
                Err(AllocatorError::InstantiationFailed { proxy })
            }
            None => Ok(()),
        }
    }

    /// Asks the cache to make room for every surface the plan will create.
    /// ## Errors
    /// * `AllocatorError::Budget` - If the cache cannot free enough memory. Nothing is purged
    ///   in that case.
    /// * `AllocatorError::PreviouslyFailed` - If an earlier step already failed.
    pub fn make_budget_headroom(&mut self) -> Result<(), AllocatorError> {
        debug_assert_eq!(self.state, AllocatorState::Planned);
        if self.failed {
            return Err(AllocatorError::PreviouslyFailed);
        }
        let mut bytes_needed = 0u64;
        for id in &self.finished {
            let interval = &self.intervals[id.0];
            let proxy = &interval.proxy;
            if proxy.budgeted() == Budgeted::No || proxy.is_instantiated() {
                continue;
            }
            // Fully lazy proxies were instantiated while planning.
            if proxy.is_lazy() {
                bytes_needed += proxy.gpu_memory_size();
                continue;
            }
            let Some(register) = interval.register else {
                continue;
            };
            let register = &mut self.registers[register.0];
            if !register.accounted_for_budget && register.existing_surface.is_none() {
                bytes_needed += proxy.gpu_memory_size();
            }
            register.accounted_for_budget = true;
        }
        log::debug!("Plan needs {bytes_needed} bytes of headroom");
        self.provider
            .cache()
            .purge_to_make_headroom(bytes_needed)
            .map_err(AllocatorError::from)
    }

    /// Binds a surface to every planned proxy, in order of interval start.
    ///
    /// On failure every proxy bound since the last successful assignment is unbound again,
    /// lazy ones included, so no proxy is left holding a surface from a flush that will not
    /// execute.
    /// ## Errors
    /// * `AllocatorError::InstantiationFailed` - If any proxy could not be backed.
    /// * `AllocatorError::PreviouslyFailed` - If an earlier step already failed.
    pub fn assign(&mut self) -> Result<(), AllocatorError> {
        debug_assert_eq!(self.state, AllocatorState::Planned, "assign before planning");
        if self.failed {
            return Err(AllocatorError::PreviouslyFailed);
        }
        self.state = AllocatorState::Assigned;
        let finished = std::mem::take(&mut self.finished);
        let mut failure = None;
        for &id in &finished {
            let proxy = self.intervals[id.0].proxy.clone();
            if proxy.is_instantiated() {
                continue;
            }
            if proxy.is_lazy() {
                let fully_lazy = proxy.is_fully_lazy();
                if proxy.do_lazy_instantiation(self.provider).is_err() {
                    failure = Some(proxy.id());
                    break;
                }
                self.bound.push((proxy, fully_lazy));
                continue;
            }
            let Some(register) = self.intervals[id.0].register else {
                failure = Some(proxy.id());
                break;
            };
            if !self.instantiate_surface(register, &proxy) {
                failure = Some(proxy.id());
                break;
            }
            self.bound.push((proxy, false));
        }
        self.finished = finished;
        let Some(proxy) = failure else {
            for (proxy, _) in self.bound.drain(..) {
                proxy.release_spent_callback();
            }
            return Ok(());
        };
        log::warn!("Failed to instantiate {proxy}");
        self.fail();
        Err(AllocatorError::InstantiationFailed { proxy })
    }

    // Poisons the allocator and unbinds everything bound since the last successful assign.
    fn fail(&mut self) {
        self.failed = true;
        if !self.bound.is_empty() {
            log::warn!("Unbinding {} proxies of the failed flush", self.bound.len());
        }
        for (proxy, fully_lazy) in self.bound.drain(..) {
            proxy.roll_back_instantiation(fully_lazy);
        }
    }

    /// Forgets every interval and register and clears the failure flag.
    ///
    /// Proxies bound by a plan that is being redone stay bound, and are still unbound if the
    /// next attempt fails.
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.by_proxy.clear();
        self.pending.clear();
        self.active.clear();
        self.finished.clear();
        self.registers.clear();
        self.unique_key_registers.clear();
        self.free_pool.clear();
        self.num_ops = 0;
        self.failed = false;
        self.state = AllocatorState::Recording;
        self.stats = AllocatorStats::default();
    }

    fn insert_active(&mut self, id: IntervalId) {
        let end = self.intervals[id.0].end;
        let intervals = &self.intervals;
        let pos = self
            .active
            .partition_point(|other| intervals[other.0].end <= end);
        self.active.insert(pos, id);
    }

    // Retires active intervals that end before `cur`, returning recyclable registers to the
    // free pool.
    fn expire(&mut self, cur: u32) {
        while let Some(&id) = self.active.first() {
            if self.intervals[id.0].end >= cur {
                break;
            }
            self.active.remove(0);
            let interval = &self.intervals[id.0];
            if let Some(register) = interval.register {
                if self.is_recyclable(&self.registers[register.0], interval) {
                    if let Some(key) = self.registers[register.0].scratch_key {
                        log::trace!("Recycling register {} after {}", register.0, interval.proxy.id());
                        self.free_pool.entry(key).or_default().push_back(register);
                    }
                }
            }
            let start = interval.start;
            let intervals = &self.intervals;
            let pos = self
                .finished
                .partition_point(|other| intervals[other.0].start <= start);
            self.finished.insert(pos, id);
        }
    }

    // Recycling is off if the interval, the target's command-buffer model or the options
    // forbid it.
    fn is_recyclable(&self, register: &Register, interval: &Interval) -> bool {
        let proxy = &interval.proxy;
        if !interval.allow_recycling || proxy.wraps_secondary_cb() || !self.allow_scratch_recycling {
            return false;
        }
        if !self.can_use_scratch(proxy) {
            return false;
        }
        if register.scratch_key.is_none()
            || register
                .originating
                .upgrade()
                .is_some_and(|p| p.has_unique_key())
        {
            return false;
        }
        // Any reference beyond the graph's uses and our own means someone outside the flush
        // still holds the proxy.
        Rc::strong_count(proxy) <= interval.uses as usize + 1
    }

    fn can_use_scratch(&self, proxy: &SurfaceProxy) -> bool {
        self.provider.caps().reuse_scratch_textures || proxy.is_render_target()
    }

    fn find_or_create_register(&mut self, proxy: &Rc<SurfaceProxy>) -> RegisterId {
        if let Some(key) = proxy.unique_key() {
            if let Some(&register) = self.unique_key_registers.get(&key) {
                return register;
            }
            let existing = self.provider.find_by_unique_key(&key);
            let register = self.push_register(proxy, None, existing);
            self.unique_key_registers.insert(key, register);
            return register;
        }
        let scratch_key = proxy.compute_scratch_key();
        if let Some(key) = &scratch_key {
            if let Some(register) = self.free_pool.get_mut(key).and_then(VecDeque::pop_front) {
                return register;
            }
        }
        let existing = match &scratch_key {
            Some(key) if self.can_use_scratch(proxy) => {
                self.provider.cache().find_and_ref_scratch_surface(key)
            }
            _ => None,
        };
        self.push_register(proxy, scratch_key, existing)
    }

    fn push_register(
        &mut self,
        proxy: &Rc<SurfaceProxy>,
        scratch_key: Option<ScratchKey>,
        existing_surface: Option<Arc<Surface>>,
    ) -> RegisterId {
        let id = RegisterId(self.registers.len());
        self.registers.push(Register {
            originating: Rc::downgrade(proxy),
            scratch_key,
            existing_surface,
            accounted_for_budget: false,
        });
        self.stats.registers_created += 1;
        id
    }

    fn instantiate_surface(&mut self, register: RegisterId, proxy: &Rc<SurfaceProxy>) -> bool {
        let reg = &self.registers[register.0];
        let surface = match &reg.existing_surface {
            Some(surface) => {
                self.stats.surfaces_reused += 1;
                surface.clone()
            }
            None => {
                let originating = reg.originating.upgrade();
                match originating {
                    Some(origin) if Rc::ptr_eq(&origin, proxy) => {
                        match proxy.create_surface(self.provider) {
                            Ok(surface) => {
                                self.stats.surfaces_created += 1;
                                surface
                            }
                            Err(err) => {
                                log::warn!("Could not create a surface for {}: {err}", proxy.id());
                                return false;
                            }
                        }
                    }
                    Some(origin) => match origin.peek_surface() {
                        Some(surface) => {
                            self.stats.surfaces_reused += 1;
                            surface
                        }
                        None => return false,
                    },
                    None => return false,
                }
            }
        };
        if proxy.budgeted() == Budgeted::Yes && !surface.is_budgeted() {
            self.provider.cache().make_budgeted(&surface);
        }
        if let Some(key) = proxy.unique_key() {
            if surface.unique_key().is_none() {
                self.provider.assign_unique_key_to_surface(&key, &surface);
            }
        }
        proxy.assign(surface);
        true
    }
}

impl std::fmt::Debug for ResourceAllocator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceAllocator")
            .field("intervals", &self.intervals.len())
            .field("registers", &self.registers.len())
            .field("num_ops", &self.num_ops)
            .field("failed", &self.failed)
            .field("state", &self.state)
            .finish()
    }
}
