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

use anyhow::Result;
use common::{context, init_logging, manager, rgba};
use vellum_core::{
    Budgeted, ContextOptions, DeviceError, FlushError, IPoint, IRect, ISize, LoadOp, Mipmapped,
    Rect, Renderable,
};
use vellum_infra::DeviceEvent;
use vellum_render::{FillRectOp, ProcessorAnalysis};

fn rect(size: f32) -> Rect {
    Rect::from_ltrb(0.0, 0.0, size, size)
}

fn count(events: &[DeviceEvent], wanted: fn(&DeviceEvent) -> bool) -> usize {
    events.iter().filter(|e| wanted(e)).count()
}

#[test]
fn uploads_run_before_the_passes_that_read_them() -> Result<()> {
    // --- 1. ARRANGE ---
    init_logging();
    let (mut ctx, _resources, device) = context(ContextOptions::default());
    let pixels = ctx
        .proxy_provider()
        .create_proxy_from_pixels(
            vec![255; 8 * 8 * 4],
            ISize::new(8, 8),
            rgba(),
            Mipmapped::No,
            Budgeted::Yes,
            "pixels",
        )
        .expect("pixel proxy");
    let target = ctx
        .proxy_provider()
        .create_proxy(&common::desc(32, 32, Renderable::Yes))
        .expect("target");
    ctx.clear(&target, [0.0, 0.0, 0.0, 1.0])?;
    ctx.draw_texture(&target, &pixels, rect(8.0), Mipmapped::No)?;

    // --- 2. ACT ---
    ctx.flush_and_submit()?;

    // --- 3. ASSERT ---
    let events = device.events();
    let target_id = target.peek_surface().expect("target bound").id();
    let pixels_id = pixels.peek_surface().expect("pixels bound").id();
    assert_eq!(
        events.first(),
        Some(&DeviceEvent::WritePixels {
            dst: pixels_id,
            bytes: 8 * 8 * 4
        })
    );
    assert!(matches!(
        &events[1],
        DeviceEvent::BeginPass { target, load: LoadOp::Clear(_), sampled }
            if *target == target_id && sampled == &vec![pixels_id]
    ));
    assert!(matches!(events[2], DeviceEvent::Draw { .. }));
    assert_eq!(events[3], DeviceEvent::Submit { target: target_id });
    assert_eq!(events.last(), Some(&DeviceEvent::SubmitToGpu));
    assert!(!pixels.is_deferred(), "the upload was consumed");
    assert_eq!(ctx.stats().tasks_executed, 1);
    Ok(())
}

#[test]
fn the_device_is_asked_to_submit_every_few_tasks() {
    let options = ContextOptions {
        max_render_tasks_before_submit: 2,
        ..Default::default()
    };
    let (mut dm, harness, device) = manager(options);
    let targets: Vec<_> = (0..5).map(|_| harness.render_target(16, 16)).collect();
    for target in &targets {
        let task = dm.new_ops_task(target.clone()).expect("task");
        dm.add_draw_op(
            task,
            Box::new(FillRectOp::new(rect(4.0), [1.0; 4], false)),
            ProcessorAnalysis::default(),
            None,
        )
        .expect("draw");
    }

    dm.flush(&[]).expect("flush");

    let events = device.events();
    assert_eq!(count(&events, |e| matches!(e, DeviceEvent::SubmitToGpu)), 2);
    assert_eq!(dm.last_flush_stats().tasks_executed, 5);
}

#[test]
fn flushing_unused_proxies_does_nothing() {
    let (mut dm, harness, device) = manager(ContextOptions::default());
    let drawn = harness.render_target(16, 16);
    let untouched = harness.render_target(16, 16);
    let task = dm.new_ops_task(drawn.clone()).expect("task");
    dm.add_draw_op(
        task,
        Box::new(FillRectOp::new(rect(4.0), [1.0; 4], false)),
        ProcessorAnalysis::default(),
        None,
    )
    .expect("draw");

    dm.flush(&[untouched]).expect("nothing to flush");
    assert_eq!(dm.num_tasks(), 1);
    assert!(device.events().is_empty());
    assert_eq!(dm.stats().flush_number, 0);

    dm.flush(&[drawn]).expect("flush");
    assert_eq!(dm.num_tasks(), 0);
    assert_eq!(device.draw_count(), 1);
    assert_eq!(dm.stats().flush_number, 1);
}

#[test]
fn allocation_failure_drops_the_whole_flush() {
    // --- 1. ARRANGE ---
    init_logging();
    let (mut dm, harness, device) = manager(ContextOptions::default());
    let first = harness.render_target(16, 16);
    let second = harness.render_target(32, 32);
    for target in [&first, &second] {
        let task = dm.new_ops_task(target.clone()).expect("task");
        dm.add_draw_op(
            task,
            Box::new(FillRectOp::new(rect(4.0), [1.0; 4], false)),
            ProcessorAnalysis::default(),
            None,
        )
        .expect("draw");
    }
    harness.resources.set_allocation_limit(Some(1));

    // --- 2. ACT ---
    let result = dm.flush(&[]);

    // --- 3. ASSERT ---
    assert_eq!(result, Err(FlushError::InstantiationFailed));
    assert!(device.events().is_empty(), "no task may execute");
    assert!(!first.is_instantiated());
    assert!(!second.is_instantiated());
    assert_eq!(dm.num_tasks(), 0, "the graph is cleared anyway");
    assert_eq!(dm.last_flush_stats().failed_flushes, 1);
    assert_eq!(dm.stats().failed_flushes, 1);
}

#[test]
fn device_errors_do_not_stop_the_flush() {
    let (mut dm, harness, device) = manager(ContextOptions::default());
    device.set_fail_submits(true);
    for _ in 0..3 {
        let target = harness.render_target(16, 16);
        let task = dm.new_ops_task(target).expect("task");
        dm.add_draw_op(
            task,
            Box::new(FillRectOp::new(rect(4.0), [1.0; 4], false)),
            ProcessorAnalysis::default(),
            None,
        )
        .expect("draw");
    }

    let result = dm.flush(&[]);

    assert!(matches!(
        result,
        Err(FlushError::Device(DeviceError::SubmitFailed(_)))
    ));
    let events = device.events();
    assert_eq!(
        count(&events, |e| matches!(e, DeviceEvent::BeginPass { .. })),
        3,
        "every task was attempted"
    );
    assert_eq!(dm.num_tasks(), 0);
}

#[test]
fn transient_targets_recycle_surfaces_within_a_flush() -> Result<()> {
    // --- 1. ARRANGE ---
    init_logging();
    let (mut ctx, resources, _device) = context(ContextOptions::default());
    let shape = common::desc(64, 64, Renderable::Yes);
    let output = ctx
        .proxy_provider()
        .create_proxy(&common::desc(32, 32, Renderable::Yes))
        .expect("output");
    {
        let scratch = ctx.proxy_provider().create_proxy(&shape).expect("scratch");
        ctx.fill_rect(&scratch, rect(64.0), [1.0, 0.0, 0.0, 1.0])?;
        ctx.draw_texture(&output, &scratch, rect(32.0), Mipmapped::No)?;
    }
    {
        let later = ctx.proxy_provider().create_proxy(&shape).expect("later");
        ctx.fill_rect(&later, rect(64.0), [0.0, 1.0, 0.0, 1.0])?;
    }

    // --- 2. ACT ---
    ctx.flush()?;

    // --- 3. ASSERT ---
    let stats = ctx.drawing_manager().last_flush_stats();
    assert_eq!(stats.surfaces_created, 2);
    assert_eq!(stats.surfaces_reused, 1);
    assert_eq!(resources.surfaces_created(), 2);
    Ok(())
}

#[test]
fn flush_surfaces_leaves_msaa_targets_resolved() -> Result<()> {
    // --- 1. ARRANGE ---
    init_logging();
    let (mut ctx, _resources, device) = context(ContextOptions::default());
    let mut desc = common::desc(32, 32, Renderable::Yes);
    desc.sample_count = 4;
    let msaa = ctx.proxy_provider().create_proxy(&desc).expect("msaa");
    ctx.fill_rect(&msaa, rect(16.0), [1.0; 4])?;

    // --- 2. ACT ---
    ctx.flush_surfaces(std::slice::from_ref(&msaa))?;

    // --- 3. ASSERT ---
    let surface = msaa.peek_surface().expect("bound").id();
    let events = device.events();
    let submit = events
        .iter()
        .position(|e| *e == DeviceEvent::Submit { target: surface })
        .expect("the pass was submitted");
    let resolve = events
        .iter()
        .position(|e| matches!(e, DeviceEvent::Resolve { target, .. } if *target == surface))
        .expect("the target was resolved");
    assert!(submit < resolve);
    assert!(!msaa.as_render_target().expect("rt").is_msaa_dirty());
    Ok(())
}

#[test]
fn copies_execute_after_their_source_is_written() -> Result<()> {
    let (mut ctx, _resources, device) = context(ContextOptions::default());
    let src = ctx
        .proxy_provider()
        .create_proxy(&common::desc(32, 32, Renderable::Yes))
        .expect("src");
    let dst = ctx
        .proxy_provider()
        .create_proxy(&common::desc(32, 32, Renderable::No))
        .expect("dst");
    ctx.fill_rect(&src, rect(32.0), [1.0; 4])?;
    ctx.copy(&src, IRect::from_ltrb(0, 0, 16, 16), &dst, IPoint::new(16, 16))?;

    ctx.flush()?;

    let src_id = src.peek_surface().expect("src bound").id();
    let dst_id = dst.peek_surface().expect("dst bound").id();
    let events = device.events();
    let submit = events
        .iter()
        .position(|e| *e == DeviceEvent::Submit { target: src_id });
    let copy = events.iter().position(|e| {
        *e == DeviceEvent::Copy {
            src: src_id,
            src_rect: IRect::from_ltrb(0, 0, 16, 16),
            dst: dst_id,
            dst_point: IPoint::new(16, 16),
        }
    });
    assert!(submit.is_some() && copy.is_some());
    assert!(submit < copy);
    Ok(())
}

#[test]
fn stats_accumulate_across_flushes() -> Result<()> {
    let (mut ctx, _resources, _device) = context(ContextOptions::default());
    let target = ctx
        .proxy_provider()
        .create_proxy(&common::desc(16, 16, Renderable::Yes))
        .expect("target");
    for _ in 0..3 {
        ctx.fill_rect(&target, rect(8.0), [1.0; 4])?;
        ctx.flush()?;
    }

    assert_eq!(ctx.stats().flush_number, 3);
    assert_eq!(ctx.stats().tasks_executed, 3);
    assert_eq!(ctx.drawing_manager().last_flush_stats().flush_number, 3);
    assert_eq!(
        ctx.drawing_manager().last_flush_stats().surfaces_created,
        0,
        "the target stays bound between flushes"
    );
    Ok(())
}

#[test]
fn abandoned_managers_refuse_to_flush() {
    let (mut dm, harness, device) = manager(ContextOptions::default());
    let target = harness.render_target(16, 16);
    let task = dm.new_ops_task(target.clone()).expect("task");
    dm.add_draw_op(
        task,
        Box::new(FillRectOp::new(rect(4.0), [1.0; 4], false)),
        ProcessorAnalysis::default(),
        None,
    )
    .expect("draw");

    dm.abandon();

    assert_eq!(dm.flush(&[]), Err(FlushError::Abandoned));
    assert!(device.events().is_empty());
    assert!(dm.new_ops_task(target).is_err());
}
