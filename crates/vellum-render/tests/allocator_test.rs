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

mod common;

use common::{init_logging, Harness};
use std::rc::Rc;
use vellum_core::{
    BackingFit, ContextOptions, ISize, KeyDomain, MipmapStatus, Protected, Renderable, ResourceError,
    ResourceProvider, SurfaceDescriptor, UniqueKey,
};
use vellum_render::{
    ActualUse, AllocatorError, AllowRecycling, LazyCallbackResult, ResourceAllocator,
    SurfaceProxy,
};

fn record(alloc: &mut ResourceAllocator<'_>, proxy: &Rc<SurfaceProxy>, start: u32, end: u32) {
    alloc.add_interval(proxy, start, end, ActualUse::Yes, AllowRecycling::Yes);
}

#[test]
fn disjoint_intervals_share_one_surface() {
    // --- 1. ARRANGE ---
    init_logging();
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let proxies: Vec<_> = (0..3).map(|_| harness.render_target(64, 64)).collect();
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &proxies[0], 0, 2);
    record(&mut alloc, &proxies[1], 3, 5);
    record(&mut alloc, &proxies[2], 6, 8);

    // --- 2. ACT ---
    alloc.plan_assignment().expect("plan");
    let registers: Vec<_> = proxies.iter().map(|p| alloc.register_index(p.id())).collect();
    alloc.assign().expect("assign");

    // --- 3. ASSERT ---
    assert_eq!(alloc.num_registers(), 1);
    assert!(registers.iter().all(|r| *r == Some(0)));
    assert_eq!(alloc.stats().surfaces_created, 1);
    assert_eq!(harness.resources.surfaces_created(), 1);
    let ids: Vec<_> = proxies
        .iter()
        .map(|p| p.peek_surface().expect("bound").id())
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn overlapping_intervals_get_separate_registers() {
    // --- 1. ARRANGE ---
    init_logging();
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let proxies: Vec<_> = (0..3).map(|_| harness.render_target(64, 64)).collect();
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &proxies[0], 0, 5);
    record(&mut alloc, &proxies[1], 2, 7);
    record(&mut alloc, &proxies[2], 6, 8);

    // --- 2. ACT ---
    alloc.plan_assignment().expect("plan");
    alloc.assign().expect("assign");

    // --- 3. ASSERT ---
    let first = alloc.register_index(proxies[0].id());
    let second = alloc.register_index(proxies[1].id());
    let third = alloc.register_index(proxies[2].id());
    assert_ne!(first, second, "overlapping intervals must not share");
    assert_ne!(second, third, "overlapping intervals must not share");
    // The first interval ended before the third started.
    assert_eq!(first, third);
    assert_eq!(alloc.num_registers(), 2);
    assert_eq!(harness.resources.surfaces_created(), 2);
}

#[test]
fn recycling_is_refused_when_any_party_forbids_it() {
    init_logging();

    // Held outside the flush.
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let (a, b) = (harness.render_target(32, 32), harness.render_target(32, 32));
    let _outside = a.clone();
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &a, 0, 0);
    record(&mut alloc, &b, 1, 1);
    alloc.plan_assignment().expect("plan");
    assert_eq!(alloc.num_registers(), 2);

    // Interval forbids it.
    let (a, b) = (harness.render_target(32, 32), harness.render_target(32, 32));
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    alloc.add_interval(&a, 0, 0, ActualUse::Yes, AllowRecycling::No);
    record(&mut alloc, &b, 1, 1);
    alloc.plan_assignment().expect("plan");
    assert_eq!(alloc.num_registers(), 2);

    // Context options forbid it.
    let strict = ContextOptions {
        allow_scratch_recycling: false,
        ..Default::default()
    };
    let (a, b) = (harness.render_target(32, 32), harness.render_target(32, 32));
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &strict);
    record(&mut alloc, &a, 0, 0);
    record(&mut alloc, &b, 1, 1);
    alloc.plan_assignment().expect("plan");
    assert_eq!(alloc.num_registers(), 2);

    // Uniquely keyed proxies keep their register.
    let (a, b) = (harness.render_target(32, 32), harness.render_target(32, 32));
    let key = UniqueKey::new(KeyDomain::generate(), &[1]);
    harness
        .proxies
        .assign_unique_key_to_proxy(&key, &a)
        .expect("fresh key");
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &a, 0, 0);
    record(&mut alloc, &b, 1, 1);
    alloc.plan_assignment().expect("plan");
    assert_eq!(alloc.num_registers(), 2);
}

#[test]
fn different_shapes_never_share() {
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let small = harness.render_target(16, 16);
    let large = harness.render_target(64, 64);
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &small, 0, 0);
    record(&mut alloc, &large, 1, 1);
    alloc.plan_assignment().expect("plan");
    assert_ne!(
        alloc.register_index(small.id()),
        alloc.register_index(large.id())
    );
}

#[test]
fn planning_is_deterministic() {
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let ranges = [(0, 3), (1, 2), (3, 6), (4, 4), (7, 9), (5, 8)];

    let run = || {
        let proxies: Vec<_> = ranges
            .iter()
            .map(|_| harness.render_target(32, 32))
            .collect();
        let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
        for (proxy, (start, end)) in proxies.iter().zip(ranges) {
            record(&mut alloc, proxy, start, end);
        }
        alloc.plan_assignment().expect("plan");
        proxies
            .iter()
            .map(|p| alloc.register_index(p.id()))
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run());
}

#[test]
fn failed_lazy_instantiation_is_sticky_until_reset() {
    // --- 1. ARRANGE ---
    init_logging();
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let lazy = harness
        .proxies
        .make_fully_lazy_proxy(
            Box::new(|_: &dyn ResourceProvider, _: &SurfaceDescriptor| {
                LazyCallbackResult::failed()
            }),
            common::rgba(),
            Renderable::Yes,
            1,
            Protected::No,
        )
        .expect("lazy proxy");
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &lazy, 0, 0);

    // --- 2. ACT ---
    let planned = alloc.plan_assignment();

    // --- 3. ASSERT ---
    assert_eq!(
        planned,
        Err(AllocatorError::InstantiationFailed { proxy: lazy.id() })
    );
    assert!(alloc.failed_instantiation());
    assert_eq!(
        alloc.make_budget_headroom(),
        Err(AllocatorError::PreviouslyFailed)
    );
    assert_eq!(alloc.assign(), Err(AllocatorError::PreviouslyFailed));
    assert!(!lazy.is_instantiated());

    alloc.reset();
    assert!(!alloc.failed_instantiation());
    assert!(alloc.is_empty());
}

#[test]
fn failed_assignment_unbinds_the_whole_flush() {
    // --- 1. ARRANGE ---
    init_logging();
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let existing = harness.render_target(8, 8);
    existing
        .instantiate(harness.resources.as_ref())
        .expect("instantiate before the flush");
    let first = harness.render_target(16, 16);
    let second = harness.render_target(32, 32);
    harness.resources.set_allocation_limit(Some(1));

    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &existing, 0, 2);
    record(&mut alloc, &first, 0, 0);
    record(&mut alloc, &second, 1, 1);
    alloc.plan_assignment().expect("plan");

    // --- 2. ACT ---
    let assigned = alloc.assign();

    // --- 3. ASSERT ---
    assert_eq!(
        assigned,
        Err(AllocatorError::InstantiationFailed { proxy: second.id() })
    );
    assert!(alloc.failed_instantiation());
    assert!(!first.is_instantiated(), "partial binding must be rolled back");
    assert!(!second.is_instantiated());
    assert!(existing.is_instantiated(), "earlier bindings are left alone");
}

#[test]
fn failed_assignment_also_unbinds_lazy_proxies() {
    // --- 1. ARRANGE ---
    init_logging();
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let fully = harness
        .proxies
        .make_fully_lazy_proxy(
            Box::new(
                |provider: &dyn ResourceProvider, desc: &SurfaceDescriptor| -> LazyCallbackResult {
                    let mut sized = desc.clone();
                    sized.dimensions = ISize::new(40, 20);
                    sized.fit = BackingFit::Exact;
                    provider.create_texture(&sized).ok().into()
                },
            ),
            common::rgba(),
            Renderable::Yes,
            1,
            Protected::No,
        )
        .expect("fully lazy");
    let partial = harness
        .proxies
        .create_lazy_proxy(
            Box::new(
                |provider: &dyn ResourceProvider, desc: &SurfaceDescriptor| -> LazyCallbackResult {
                    provider.create_texture(desc).ok().into()
                },
            ),
            &common::desc(20, 20, Renderable::No),
            MipmapStatus::NotAllocated,
        )
        .expect("lazy proxy");
    let plain = harness.render_target(32, 32);
    harness.resources.set_allocation_limit(Some(2));

    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &fully, 0, 0);
    record(&mut alloc, &partial, 1, 1);
    record(&mut alloc, &plain, 2, 2);
    alloc.plan_assignment().expect("plan");
    assert!(fully.is_instantiated());

    // --- 2. ACT ---
    let assigned = alloc.assign();

    // --- 3. ASSERT ---
    assert_eq!(
        assigned,
        Err(AllocatorError::InstantiationFailed { proxy: plain.id() })
    );
    assert!(!fully.is_instantiated());
    assert!(!partial.is_instantiated());
    assert!(!plain.is_instantiated());
    assert!(fully.dimensions().is_lazy_sentinel());
    assert!(fully.is_lazy(), "one-shot callbacks survive a dropped flush");
    assert!(partial.is_lazy());
}

#[test]
fn lazy_proxies_instantiate_through_their_callback() {
    init_logging();
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let lazy = harness
        .proxies
        .create_lazy_proxy(
            Box::new(
                |provider: &dyn ResourceProvider, desc: &SurfaceDescriptor| -> LazyCallbackResult {
                    provider.create_texture(desc).ok().into()
                },
            ),
            &common::desc(20, 20, Renderable::No),
            MipmapStatus::NotAllocated,
        )
        .expect("lazy proxy");
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &lazy, 0, 0);
    alloc.plan_assignment().expect("plan");
    assert_eq!(alloc.register_index(lazy.id()), None, "lazy proxies skip registers");
    alloc.assign().expect("assign");
    assert!(lazy.is_instantiated());
}

#[test]
fn budget_headroom_fails_without_purgeable_memory() {
    // --- 1. ARRANGE ---
    let options = ContextOptions {
        resource_budget_bytes: 1024,
        ..Default::default()
    };
    let harness = Harness::new(&options);
    let proxy = harness.render_target(64, 64);
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &proxy, 0, 0);
    alloc.plan_assignment().expect("plan");

    // --- 2. ACT ---
    let headroom = alloc.make_budget_headroom();

    // --- 3. ASSERT ---
    assert!(matches!(
        headroom,
        Err(AllocatorError::Budget(ResourceError::BudgetExceeded { purgeable: 0, .. }))
    ));
}

#[test]
fn cached_scratch_surfaces_are_reused() {
    let options = ContextOptions::default();
    let harness = Harness::new(&options);
    let first = harness.render_target(48, 48);
    first
        .instantiate(harness.resources.as_ref())
        .expect("instantiate");
    let surface = first.peek_surface().expect("bound");
    drop(first);

    let second = harness.render_target(48, 48);
    let mut alloc = ResourceAllocator::new(harness.resources.as_ref(), &options);
    record(&mut alloc, &second, 0, 0);
    let surface_id = surface.id();
    // The cache holds the last reference now.
    drop(surface);
    alloc.plan_assignment().expect("plan");
    alloc.assign().expect("assign");

    assert_eq!(alloc.stats().surfaces_reused, 1);
    assert_eq!(alloc.stats().surfaces_created, 0);
    assert_eq!(second.peek_surface().map(|s| s.id()), Some(surface_id));
    assert_eq!(harness.resources.surfaces_created(), 1);
}
