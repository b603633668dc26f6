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

use super::{FlushState, FlushStats};
use crate::allocator::ResourceAllocator;
use crate::error::GraphError;
use crate::ops::{AppliedClip, FillRectOp, Op, ProcessorAnalysis};
use crate::proxy::SurfaceProxy;
use crate::task::{
    ArenaId, CopyTask, OpsTask, RenderTask, ResolveFlags, TaskFlags, TaskId, TaskKind,
    TextureResolveTask,
};
use ahash::{AHashMap, AHashSet};
use std::rc::Rc;
use std::time::Instant;
use vellum_core::{
    topological_sort, Caps, ContextOptions, DeviceError, FlushError, GpuDevice, IPoint, IRect,
    LoadOp, Mipmapped, ProxyId, ResourceProvider,
};

/// What recording a read of a proxy will do to the task graph.
///
/// Produced by [`DrawingManager::plan_dependency`] without touching the graph, and carried
/// out by [`DrawingManager::apply_dependency`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyPlan {
    /// The task reads a proxy it is itself writing. No edge is added.
    SelfRead,
    /// The task already depends on the proxy's writer, directly or through its resolve task.
    Satisfied,
    /// The task depends directly on the proxy's last writer, if there is one.
    Direct {
        /// The last writer of the proxy.
        writer: Option<TaskId>,
        /// Whether the writer must be closed first.
        close_writer: bool,
        /// Whether the proxy has a pending upload the task must schedule.
        record_deferred: bool,
    },
    /// The proxy must be resolved before it is read, through the task's resolve task.
    Resolve {
        /// The last writer of the proxy, which the resolve task will depend on.
        writer: Option<TaskId>,
        /// Whether the writer must be closed first.
        close_writer: bool,
        /// The resolves to perform.
        flags: ResolveFlags,
    },
}

/// Owns the render-task graph of one context and turns it into device work on flush.
///
/// Tasks are recorded in the order the front-end issues them and linked by the proxies they
/// read and write. A flush closes every task, sorts them so each runs after its
/// dependencies, optionally clusters and merges tasks that share a target, allocates
/// surfaces and executes the result.
pub struct DrawingManager {
    resource_provider: Rc<dyn ResourceProvider>,
    device: Rc<dyn GpuDevice>,
    options: ContextOptions,
    tasks: AHashMap<TaskId, RenderTask>,
    dag: Vec<TaskId>,
    reorder_blockers: Vec<usize>,
    active_ops_task: Option<TaskId>,
    last_render_tasks: AHashMap<ProxyId, TaskId>,
    arenas: AHashMap<ProxyId, ArenaId>,
    abandoned: bool,
    stats: FlushStats,
    last_flush: FlushStats,
}

impl DrawingManager {
    /// Creates an empty manager.
    pub fn new(
        resource_provider: Rc<dyn ResourceProvider>,
        device: Rc<dyn GpuDevice>,
        options: ContextOptions,
    ) -> Self {
        Self {
            resource_provider,
            device,
            options,
            tasks: AHashMap::new(),
            dag: Vec::new(),
            reorder_blockers: Vec::new(),
            active_ops_task: None,
            last_render_tasks: AHashMap::new(),
            arenas: AHashMap::new(),
            abandoned: false,
            stats: FlushStats::default(),
            last_flush: FlushStats::default(),
        }
    }

    // --- Accessors ---

    /// The device capabilities.
    pub fn caps(&self) -> &Caps {
        self.resource_provider.caps()
    }

    /// The options this manager was created with.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Returns a recorded task.
    pub fn task(&self, id: TaskId) -> Option<&RenderTask> {
        self.tasks.get(&id)
    }

    /// The tasks of the pending flush, in recording order until a flush sorts them.
    pub fn dag(&self) -> &[TaskId] {
        &self.dag
    }

    /// The number of recorded tasks.
    pub fn num_tasks(&self) -> usize {
        self.dag.len()
    }

    /// The ops task new draws go to, if one is open.
    pub fn active_ops_task(&self) -> Option<TaskId> {
        self.active_ops_task
    }

    /// The task that last wrote `proxy` in the pending flush.
    pub fn last_render_task(&self, proxy: &SurfaceProxy) -> Option<TaskId> {
        self.last_render_tasks
            .get(&proxy.id())
            .copied()
            .filter(|id| self.tasks.get(id).is_some_and(|t| !t.is_disowned()))
    }

    /// Totals over every flush so far.
    pub fn stats(&self) -> &FlushStats {
        &self.stats
    }

    /// The statistics of the most recent flush.
    pub fn last_flush_stats(&self) -> &FlushStats {
        &self.last_flush
    }

    /// Returns `true` once the manager or its resource provider was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned || self.resource_provider.is_abandoned()
    }

    /// Drops every recorded task and refuses further work.
    pub fn abandon(&mut self) {
        log::debug!("Drawing manager abandoned with {} tasks", self.dag.len());
        self.abandoned = true;
        self.remove_render_tasks();
    }

    /// The ops payload of a recorded task.
    /// ## Errors
    /// * `GraphError::UnknownTask` - If the task does not exist.
    /// * `GraphError::NotAnOpsTask` - If it is not an ops task.
    pub fn ops_task_mut(&mut self, id: TaskId) -> Result<&mut OpsTask, GraphError> {
        self.tasks
            .get_mut(&id)
            .ok_or(GraphError::UnknownTask(id))?
            .as_ops_task_mut()
            .ok_or(GraphError::NotAnOpsTask(id))
    }

    // --- Recording ---

    /// Opens a new ops task drawing into `target` and makes it the active task.
    /// ## Errors
    /// * `GraphError::Abandoned` - If the manager was abandoned.
    /// * `GraphError::NotRenderable` - If `target` is not a render target.
    pub fn new_ops_task(&mut self, target: Rc<SurfaceProxy>) -> Result<TaskId, GraphError> {
        self.new_ops_task_with_flags(target, TaskFlags::empty())
    }

    /// Like [`DrawingManager::new_ops_task`], also setting [`TaskFlags::ATLAS`] or
    /// [`TaskFlags::BLOCKS_REORDERING`]. Other flags are ignored.
    /// ## Errors
    /// * `GraphError::Abandoned` - If the manager was abandoned.
    /// * `GraphError::NotRenderable` - If `target` is not a render target.
    pub fn new_ops_task_with_flags(
        &mut self,
        target: Rc<SurfaceProxy>,
        flags: TaskFlags,
    ) -> Result<TaskId, GraphError> {
        if self.is_abandoned() {
            return Err(GraphError::Abandoned);
        }
        if !target.is_render_target() {
            return Err(GraphError::NotRenderable(target.id()));
        }
        self.close_active_ops_task();

        let arena = *self.arenas.entry(target.id()).or_insert_with(ArenaId::next);
        let mut ops = OpsTask::new(arena);
        ops.set_search_limits(
            self.options.max_op_chain_distance,
            self.options.max_op_merge_distance,
        );
        let mut task = RenderTask::new(TaskKind::Ops(ops));
        task.set_flag(flags & (TaskFlags::ATLAS | TaskFlags::BLOCKS_REORDERING));
        let id = self.append_task(task);
        self.add_target(id, target);
        self.active_ops_task = Some(id);
        log::trace!("Opened {id}");
        Ok(id)
    }

    /// Returns the active ops task if it draws into `target`, else opens a new one.
    /// ## Errors
    /// See [`DrawingManager::new_ops_task`].
    pub fn get_or_create_ops_task(
        &mut self,
        target: &Rc<SurfaceProxy>,
    ) -> Result<TaskId, GraphError> {
        if let Some(id) = self.active_ops_task {
            let reusable = self.tasks.get(&id).is_some_and(|t| {
                !t.is_closed() && t.target(0).is_some_and(|p| p.id() == target.id())
            });
            if reusable {
                return Ok(id);
            }
        }
        self.new_ops_task(target.clone())
    }

    /// Records a copy of `src_rect` from `src` into `dst` at `dst_point`, as a closed task.
    /// ## Errors
    /// * `GraphError::Abandoned` - If the manager was abandoned.
    /// * `GraphError::InvalidCopy` - If the surfaces alias, or a rectangle is empty or out of
    ///   bounds.
    pub fn new_copy_task(
        &mut self,
        src: Rc<SurfaceProxy>,
        src_rect: IRect,
        dst: Rc<SurfaceProxy>,
        dst_point: IPoint,
    ) -> Result<TaskId, GraphError> {
        if self.is_abandoned() {
            return Err(GraphError::Abandoned);
        }
        self.close_active_ops_task();
        let dst_rect = IRect::from_point_size(dst_point, src_rect.size());
        if src.id() == dst.id()
            || !IRect::from_size(src.dimensions()).contains(&src_rect)
            || !IRect::from_size(dst.dimensions()).contains(&dst_rect)
        {
            return Err(GraphError::InvalidCopy {
                src: src.id(),
                dst: dst.id(),
            });
        }
        let task = RenderTask::new(TaskKind::Copy(CopyTask::new(
            src.clone(),
            src_rect,
            dst_point,
        )));
        let id = self.append_task(task);
        self.add_dependency(id, &src, Mipmapped::No)?;
        self.add_target(id, dst);
        self.close_task(id);
        Ok(id)
    }

    /// Records `op` into the ops task `task`, first making the task depend on every proxy
    /// the op samples.
    /// ## Errors
    /// * `GraphError::Abandoned` - If the manager was abandoned.
    /// * `GraphError::UnknownTask`, `GraphError::TaskClosed`, `GraphError::NotAnOpsTask` -
    ///   If `task` cannot take ops.
    /// * `GraphError::Cycle` - If a sampled proxy would make the graph cyclic.
    pub fn add_draw_op(
        &mut self,
        task: TaskId,
        op: Box<dyn Op>,
        analysis: ProcessorAnalysis,
        clip: Option<AppliedClip>,
    ) -> Result<(), GraphError> {
        if self.is_abandoned() {
            return Err(GraphError::Abandoned);
        }
        self.check_open(task)?;
        self.ops_task_mut(task)?;

        let mut sampled = Vec::new();
        op.visit_proxies(&mut |proxy: &Rc<SurfaceProxy>, mipmapped: Mipmapped| {
            sampled.push((proxy.clone(), mipmapped));
        });
        for (proxy, mipmapped) in &sampled {
            self.ops_task_mut(task)?.add_sampled_proxy(proxy);
            self.add_dependency(task, proxy, *mipmapped)?;
        }

        let caps = self.resource_provider.caps();
        let ops = self
            .tasks
            .get_mut(&task)
            .and_then(RenderTask::as_ops_task_mut)
            .ok_or(GraphError::NotAnOpsTask(task))?;
        ops.record_op(op, analysis, clip, caps);
        Ok(())
    }

    /// Clears all of `target` to `color`.
    ///
    /// A fullscreen clear discards the ops recorded so far on the active task and becomes its
    /// load op; when the load op cannot change, a clear op is drawn instead.
    /// ## Errors
    /// See [`DrawingManager::new_ops_task`] and [`DrawingManager::add_draw_op`].
    pub fn clear(&mut self, target: &Rc<SurfaceProxy>, color: [f32; 4]) -> Result<TaskId, GraphError> {
        let id = self.get_or_create_ops_task(target)?;
        let backing = target.backing_store_bounds_rect();
        let reset = self
            .tasks
            .get_mut(&id)
            .is_some_and(|t| t.reset_for_fullscreen_clear(true));
        if reset {
            self.ops_task_mut(id)?
                .set_color_load_op(LoadOp::Clear(color), backing);
        } else {
            self.add_draw_op(
                id,
                Box::new(FillRectOp::new(backing, color, false)),
                ProcessorAnalysis::default(),
                None,
            )?;
        }
        Ok(id)
    }

    /// Closes the active ops task, if any.
    pub fn close_active_ops_task(&mut self) {
        if let Some(id) = self.active_ops_task.take() {
            self.close_task(id);
        }
    }

    // --- Dependencies ---

    /// Makes `task` depend on whatever must run before it may read `proxy`.
    /// ## Errors
    /// * `GraphError::UnknownTask`, `GraphError::TaskClosed` - If `task` cannot take
    ///   dependencies.
    /// * `GraphError::Cycle` - If the edge would make the graph cyclic.
    pub fn add_dependency(
        &mut self,
        task: TaskId,
        proxy: &Rc<SurfaceProxy>,
        mipmapped: Mipmapped,
    ) -> Result<(), GraphError> {
        self.check_open(task)?;
        let plan = self.plan_dependency(task, proxy, mipmapped)?;
        self.apply_dependency(task, proxy, plan)
    }

    /// Works out what [`DrawingManager::add_dependency`] would do, without changing anything.
    ///
    /// Closing the writer can dirty the proxy, so the plan accounts for the dirty region the
    /// close would report.
    /// ## Errors
    /// * `GraphError::UnknownTask` - If `task` does not exist.
    pub fn plan_dependency(
        &self,
        task: TaskId,
        proxy: &SurfaceProxy,
        mipmapped: Mipmapped,
    ) -> Result<DependencyPlan, GraphError> {
        let dependent = self.tasks.get(&task).ok_or(GraphError::UnknownTask(task))?;
        let writer = self.last_render_task(proxy);
        if writer == Some(task) {
            debug_assert!(
                !proxy.requires_manual_msaa_resolve(),
                "self-read of a target needing manual resolve"
            );
            debug_assert!(!proxy.is_deferred(), "self-read of a deferred texture");
            return Ok(DependencyPlan::SelfRead);
        }

        let mut close_writer = false;
        let mut close_dirties = None;
        if let Some(w) = writer {
            if dependent.depends_on(w) || dependent.texture_resolve_task() == Some(w) {
                return Ok(DependencyPlan::Satisfied);
            }
            if let Some(writer_task) = self.tasks.get(&w) {
                if !writer_task.is_closed() && !writer_task.flags().contains(TaskFlags::ATLAS) {
                    close_writer = true;
                    close_dirties = dirty_on_close(writer_task, proxy);
                }
            }
        }

        let mut flags = ResolveFlags::empty();
        if proxy.requires_manual_msaa_resolve() {
            let dirty = proxy.as_render_target().is_some_and(|rt| rt.is_msaa_dirty())
                || close_dirties.is_some_and(|r| !r.is_empty());
            if dirty {
                flags |= ResolveFlags::MSAA;
            }
        }
        if mipmapped == Mipmapped::Yes {
            if let Some(tex) = proxy.as_texture() {
                if tex.mipmapped() == Mipmapped::Yes
                    && (tex.mipmaps_are_dirty() || close_dirties.is_some())
                {
                    flags |= ResolveFlags::MIPMAPS;
                }
            }
        }
        if !flags.is_empty() {
            return Ok(DependencyPlan::Resolve {
                writer,
                close_writer,
                flags,
            });
        }
        Ok(DependencyPlan::Direct {
            writer,
            close_writer,
            record_deferred: proxy.is_deferred(),
        })
    }

    /// Carries out a plan made by [`DrawingManager::plan_dependency`] for the same task and
    /// proxy.
    /// ## Errors
    /// * `GraphError::UnknownTask` - If `task` does not exist.
    /// * `GraphError::Cycle` - If the edge would make the graph cyclic.
    pub fn apply_dependency(
        &mut self,
        task: TaskId,
        proxy: &Rc<SurfaceProxy>,
        plan: DependencyPlan,
    ) -> Result<(), GraphError> {
        if !self.tasks.contains_key(&task) {
            return Err(GraphError::UnknownTask(task));
        }
        match plan {
            DependencyPlan::SelfRead | DependencyPlan::Satisfied => Ok(()),
            DependencyPlan::Direct {
                writer,
                close_writer,
                record_deferred,
            } => {
                if let (Some(w), true) = (writer, close_writer) {
                    self.close_task(w);
                }
                if record_deferred {
                    if let Some(t) = self.tasks.get_mut(&task) {
                        t.push_deferred_proxy(proxy);
                    }
                }
                match writer {
                    Some(w) => self.link(task, w),
                    None => Ok(()),
                }
            }
            DependencyPlan::Resolve {
                writer,
                close_writer,
                flags,
            } => {
                if let (Some(w), true) = (writer, close_writer) {
                    self.close_task(w);
                }
                let resolve = self.texture_resolve_task_for(task);
                if let Some(TaskKind::TextureResolve(resolver)) =
                    self.tasks.get_mut(&resolve).map(RenderTask::kind_mut)
                {
                    resolver.record(proxy, flags);
                }
                self.add_dependency(resolve, proxy, Mipmapped::No)?;
                self.add_target(resolve, proxy.clone());
                log::trace!("{resolve} resolves {} ({flags:?}) for {task}", proxy.id());
                Ok(())
            }
        }
    }

    // --- Flush ---

    /// Executes every recorded task and clears the graph.
    ///
    /// With a non-empty `proxies`, nothing happens unless some task uses one of them. The
    /// flush is all or nothing: if surfaces cannot be allocated, no task executes. Device
    /// errors do not stop execution; the first one is reported.
    /// ## Errors
    /// * `FlushError::Abandoned` - If the manager was abandoned.
    /// * `FlushError::CyclicGraph` - If the tasks could not be ordered.
    /// * `FlushError::InstantiationFailed` / `FlushError::Resource` - If allocation failed.
    /// * `FlushError::Device` - The first device error met while executing.
    pub fn flush(&mut self, proxies: &[Rc<SurfaceProxy>]) -> Result<(), FlushError> {
        if self.is_abandoned() {
            return Err(FlushError::Abandoned);
        }
        if !proxies.is_empty() {
            let used = self
                .dag
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .any(|t| proxies.iter().any(|p| t.is_used(p)));
            if !used {
                log::trace!("No task uses the {} flushed proxies", proxies.len());
                return Ok(());
            }
        }

        let started = Instant::now();
        let mut flush = FlushStats::default();
        let result = self.flush_graph(&mut flush);
        if let Err(err) = &result {
            log::warn!("Flush failed: {err}");
            flush.failed_flushes = 1;
        }
        flush.cpu_flush_time_ms = started.elapsed().as_secs_f32() * 1000.0;
        self.stats.accumulate(&flush);
        flush.flush_number = self.stats.flush_number;
        log::debug!(
            "Flush #{}: {} tasks executed, {} merged, {} surfaces created, {} reused",
            flush.flush_number,
            flush.tasks_executed,
            flush.tasks_merged,
            flush.surfaces_created,
            flush.surfaces_reused
        );
        self.last_flush = flush;
        result
    }

    /// Flushes, then resolves and regenerates the mipmaps of each of `proxies` so their
    /// surfaces can be read outside the graph.
    /// ## Errors
    /// The flush error if the flush failed, else the first device error of the resolves.
    pub fn flush_surfaces(&mut self, proxies: &[Rc<SurfaceProxy>]) -> Result<(), FlushError> {
        let flushed = self.flush(proxies);
        if self.is_abandoned() {
            return flushed;
        }
        let mut resolved = Ok(());
        for proxy in proxies {
            if let Err(err) = resolve_and_mipmap(self.device.as_ref(), proxy) {
                log::warn!("Resolving {} after flush failed: {err}", proxy.id());
                if resolved.is_ok() {
                    resolved = Err(FlushError::Device(err));
                }
            }
        }
        flushed.and(resolved)
    }

    fn flush_graph(&mut self, flush: &mut FlushStats) -> Result<(), FlushError> {
        self.close_all_tasks();
        if let Err(err) = self.sort_tasks() {
            log::warn!("{err}");
            self.remove_render_tasks();
            return Err(FlushError::CyclicGraph);
        }

        let provider = self.resource_provider.clone();
        let mut alloc = ResourceAllocator::new(provider.as_ref(), &self.options);
        let mut reordered = false;
        if self.options.reduce_ops_task_splitting {
            reordered = self.reorder_tasks(&mut alloc, flush);
            if !reordered {
                alloc.reset();
            }
        }
        let planned = if reordered {
            Ok(())
        } else {
            for id in &self.dag {
                if let Some(task) = self.tasks.get(id) {
                    task.gather_proxy_intervals(&mut alloc);
                }
            }
            alloc.plan_assignment()
        };
        let assigned = planned.and_then(|()| alloc.assign());
        let alloc_stats = alloc.stats();
        flush.registers_created = alloc_stats.registers_created as u64;
        flush.surfaces_created = alloc_stats.surfaces_created as u64;
        flush.surfaces_reused = alloc_stats.surfaces_reused as u64;
        drop(alloc);

        let result = match assigned {
            Ok(()) => self.execute_render_tasks(flush),
            Err(err) => {
                log::warn!("Dropping flush of {} tasks: {err}", self.dag.len());
                Err(err.into())
            }
        };
        self.remove_render_tasks();
        if flush.tasks_executed > 0 {
            provider.cache().purge_as_needed();
        }
        result
    }

    fn execute_render_tasks(&mut self, flush: &mut FlushStats) -> Result<(), FlushError> {
        let device = self.device.clone();
        let provider = self.resource_provider.clone();
        let mut state = FlushState::new(device.as_ref(), provider.as_ref());
        let order = self.dag.clone();
        let mut first_error: Option<DeviceError> = None;

        for id in &order {
            if let Some(task) = self.tasks.get_mut(id) {
                if task.is_instantiated() {
                    task.prepare(&mut state);
                }
            }
        }
        if let Err(err) = state.pre_execute_draws() {
            log::warn!("Upload failed: {err}");
            first_error.get_or_insert(err);
        }

        let submit_every = self.options.max_render_tasks_before_submit.max(1);
        let mut since_submit = 0;
        for id in &order {
            let Some(task) = self.tasks.get(id) else {
                continue;
            };
            if !task.is_instantiated() {
                continue;
            }
            match task.execute(&mut state) {
                Ok(true) => flush.tasks_executed += 1,
                Ok(false) => {}
                Err(err) => {
                    log::warn!("{id} failed to execute: {err}");
                    first_error.get_or_insert(err);
                }
            }
            since_submit += 1;
            if since_submit >= submit_every {
                if let Err(err) = device.submit_to_gpu() {
                    first_error.get_or_insert(err);
                }
                since_submit = 0;
            }
        }
        state.reset();
        match first_error {
            Some(err) => Err(FlushError::Device(err)),
            None => Ok(()),
        }
    }

    fn close_all_tasks(&mut self) {
        let order = self.dag.clone();
        for id in order {
            self.close_task(id);
        }
        self.active_ops_task = None;
    }

    /// Orders each span between reorder blockers so tasks follow their dependencies.
    fn sort_tasks(&mut self) -> Result<(), GraphError> {
        let mut sorted = Vec::with_capacity(self.dag.len());
        for (span, blocker) in self.spans() {
            let nodes = &self.dag[span];
            let edges: Vec<(TaskId, TaskId)> = nodes
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .flat_map(|t| t.dependencies().iter().map(move |d| (*d, t.id())))
                .collect();
            let order = topological_sort(nodes.iter().copied(), edges).map_err(|_| {
                let first = nodes.first().copied().unwrap_or(TaskId(0));
                GraphError::Cycle {
                    dependent: first,
                    depended_on: first,
                }
            })?;
            sorted.extend(order);
            sorted.extend(blocker);
        }
        self.dag = sorted;
        Ok(())
    }

    /// Clusters tasks that write the same target and merges the resulting runs of ops tasks.
    ///
    /// Returns `false`, leaving the graph untouched, if nothing could be clustered or the
    /// allocator could not fit the clustered order in the budget.
    fn reorder_tasks(&mut self, alloc: &mut ResourceAllocator<'_>, flush: &mut FlushStats) -> bool {
        let mut order = Vec::with_capacity(self.dag.len());
        let mut clustered = false;
        for (span, blocker) in self.spans() {
            let (span_order, span_clustered) = self.cluster_span(&self.dag[span]);
            clustered |= span_clustered;
            order.extend(span_order);
            order.extend(blocker);
        }
        if !clustered {
            return false;
        }

        for id in &order {
            if let Some(task) = self.tasks.get(id) {
                task.gather_proxy_intervals(alloc);
            }
        }
        if let Err(err) = alloc.plan_assignment() {
            log::debug!("Clustered order could not be planned: {err}");
            return false;
        }
        if let Err(err) = alloc.make_budget_headroom() {
            log::debug!("Clustered order is over budget: {err}");
            return false;
        }
        self.dag = order;

        let mut merged_dag = Vec::with_capacity(self.dag.len());
        let mut i = 0;
        while i < self.dag.len() {
            let id = self.dag[i];
            let merged = self.merge_following(i);
            flush.tasks_merged += merged as u64;
            merged_dag.push(id);
            i += 1 + merged;
        }
        self.dag = merged_dag;
        true
    }

    /// Folds the ops tasks directly after `dag[index]` into it. Returns how many were folded.
    fn merge_following(&mut self, index: usize) -> usize {
        let id = self.dag[index];
        let Some(survivor) = self.tasks.get(&id) else {
            return 0;
        };
        let (Some(ops), Some(target)) = (survivor.as_ops_task(), survivor.target(0)) else {
            return 0;
        };
        let mut merging = Vec::new();
        for next in &self.dag[index + 1..] {
            let Some(candidate) = self.tasks.get(next) else {
                break;
            };
            let Some(next_ops) = candidate.as_ops_task() else {
                break;
            };
            let same_target = candidate.target(0).is_some_and(|t| t.id() == target.id());
            if !same_target || !ops.can_merge(next_ops) {
                break;
            }
            if matches!(next_ops.color_load_op(), LoadOp::Clear(_)) {
                return 0;
            }
            merging.push(*next);
        }
        if merging.is_empty() {
            return 0;
        }
        let target_id = target.id();

        let merging_set: AHashSet<TaskId> = merging.iter().copied().collect();
        for &merged_id in &merging {
            let Some(mut merged) = self.tasks.remove(&merged_id) else {
                continue;
            };
            for &dependent in merged.dependents() {
                if dependent == id || merging_set.contains(&dependent) {
                    continue;
                }
                if let Some(t) = self.tasks.get_mut(&dependent) {
                    t.replace_dependency(merged_id, id);
                }
                if let Some(s) = self.tasks.get_mut(&id) {
                    s.push_dependent(dependent);
                }
            }
            for &dependency in merged.dependencies() {
                if dependency == id || merging_set.contains(&dependency) {
                    continue;
                }
                if let Some(t) = self.tasks.get_mut(&dependency) {
                    t.replace_dependent(merged_id, id);
                }
                if let Some(s) = self.tasks.get_mut(&id) {
                    s.push_dependency(dependency);
                }
            }
            let deferred = merged.take_deferred_proxies();
            if let Some(s) = self.tasks.get_mut(&id) {
                s.remove_dependent(merged_id);
                s.extend_deferred_proxies(deferred);
                if let (Some(dst), Some(src)) = (s.as_ops_task_mut(), merged.as_ops_task_mut()) {
                    dst.absorb(src);
                }
            }
            merged.disown();
            if self.last_render_tasks.get(&target_id) == Some(&merged_id) {
                self.last_render_tasks.insert(target_id, id);
            }
            log::trace!("Merged {merged_id} into {id}");
        }
        merging.len()
    }

    /// Clusters one span: a task writing a single target is moved up to join the earlier
    /// tasks writing the same target, together with everything recorded between them, when
    /// none of the tasks it passes are needed by the moved ones.
    ///
    /// Returns the new order and whether anything moved. Spans of fewer than three tasks
    /// come back unchanged.
    fn cluster_span(&self, span: &[TaskId]) -> (Vec<TaskId>, bool) {
        if span.len() < 3 {
            return (span.to_vec(), false);
        }
        let single_target = |id: &TaskId| -> Option<ProxyId> {
            let task = self.tasks.get(id)?;
            (task.num_targets() == 1).then(|| task.target(0).map(|t| t.id()))?
        };

        let mut out: Vec<TaskId> = Vec::with_capacity(span.len());
        let mut last_task: AHashMap<ProxyId, TaskId> = AHashMap::new();
        let mut clustered = false;
        for &id in span {
            let Some(target) = single_target(&id) else {
                if let Some(task) = self.tasks.get(&id) {
                    for t in task.targets() {
                        last_task.remove(&t.id());
                    }
                }
                out.push(id);
                continue;
            };
            let Some(tail) = last_task.insert(target, id) else {
                out.push(id);
                continue;
            };
            let Some(tail_pos) = out.iter().position(|t| *t == tail) else {
                out.push(id);
                continue;
            };
            if tail_pos + 1 == out.len() {
                out.push(id);
                continue;
            }
            let mut head = tail_pos;
            while head > 0 && single_target(&out[head - 1]) == Some(target) {
                head -= 1;
            }
            let moved_head = tail_pos + 1;
            let blocked = out[moved_head..].iter().any(|moved| {
                out[head..moved_head]
                    .iter()
                    .any(|passed| self.task_depends_on(*moved, *passed))
            });
            if blocked {
                out.push(id);
                continue;
            }
            let moved: Vec<TaskId> = out.drain(moved_head..).collect();
            for m in &moved {
                if let Some(t) = single_target(m) {
                    last_task.remove(&t);
                }
            }
            let passed = out.split_off(head);
            out.extend(moved);
            out.extend(passed);
            out.push(id);
            clustered = true;
        }
        (out, clustered)
    }

    /// Whether `depender` must stay after `dependee`: it reads or writes something
    /// `dependee` uses, or depends on it directly.
    fn task_depends_on(&self, depender: TaskId, dependee: TaskId) -> bool {
        let (Some(a), Some(b)) = (self.tasks.get(&depender), self.tasks.get(&dependee)) else {
            return false;
        };
        a.targets().iter().any(|t| b.is_used(t)) || a.depends_on(dependee)
    }

    /// Splits the DAG at the reorder blockers: each span of reorderable tasks, followed by
    /// the blocker that ends it.
    fn spans(&self) -> Vec<(std::ops::Range<usize>, Option<TaskId>)> {
        let mut spans = Vec::with_capacity(self.reorder_blockers.len() + 1);
        let mut start = 0;
        for &blocker in &self.reorder_blockers {
            if blocker >= self.dag.len() || blocker < start {
                continue;
            }
            spans.push((start..blocker, Some(self.dag[blocker])));
            start = blocker + 1;
        }
        spans.push((start..self.dag.len(), None));
        spans
    }

    fn remove_render_tasks(&mut self) {
        for task in self.tasks.values_mut() {
            task.disown();
        }
        self.dag.clear();
        self.reorder_blockers.clear();
        self.last_render_tasks.clear();
        self.arenas.clear();
        self.tasks.clear();
        self.active_ops_task = None;
    }

    // --- Graph plumbing ---

    fn append_task(&mut self, task: RenderTask) -> TaskId {
        let id = task.id();
        if task.blocks_reordering() {
            self.reorder_blockers.push(self.dag.len());
        }
        self.tasks.insert(id, task);
        self.dag.push(id);
        id
    }

    /// Inserts `task` just before the last task, keeping a trailing blocker last.
    fn insert_task_before_last(&mut self, task: RenderTask) -> TaskId {
        let id = task.id();
        self.tasks.insert(id, task);
        if self.dag.is_empty() {
            self.dag.push(id);
            return id;
        }
        let last = self.dag.len() - 1;
        if let Some(blocker) = self.reorder_blockers.last_mut() {
            if *blocker == last {
                *blocker += 1;
            }
        }
        self.dag.push(id);
        self.dag.swap(last, last + 1);
        id
    }

    fn texture_resolve_task_for(&mut self, task: TaskId) -> TaskId {
        if let Some(existing) = self.tasks.get(&task).and_then(RenderTask::texture_resolve_task) {
            return existing;
        }
        let resolve = RenderTask::new(TaskKind::TextureResolve(TextureResolveTask::new()));
        let id = self.insert_task_before_last(resolve);
        if let Some(t) = self.tasks.get_mut(&task) {
            t.set_texture_resolve_task(id);
        }
        id
    }

    /// Makes `task` the last writer of `proxy`, ordered after the previous writer.
    fn add_target(&mut self, task: TaskId, proxy: Rc<SurfaceProxy>) {
        if let Some(prev) = self.last_render_task(&proxy) {
            if prev != task {
                self.close_task(prev);
                // The previous writer was recorded first and is closed, so this cannot cycle.
                let linked = self.link(task, prev);
                if let Err(err) = &linked {
                    log::error!("Lost the ordering of {task} after {prev}: {err}");
                }
                debug_assert!(linked.is_ok(), "a new writer must order after {prev}");
            }
        }
        self.last_render_tasks.insert(proxy.id(), task);
        if let Some(t) = self.tasks.get_mut(&task) {
            t.push_target(proxy);
        }
    }

    fn close_task(&mut self, id: TaskId) {
        let caps = self.resource_provider.caps();
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if task.is_closed() {
            return;
        }
        let resolve = task.close(caps);
        if let Some(resolve) = resolve {
            task.push_dependency(resolve);
            if let Some(r) = self.tasks.get_mut(&resolve) {
                r.push_dependent(id);
                r.close(caps);
            }
        }
        if self.active_ops_task == Some(id) {
            self.active_ops_task = None;
        }
    }

    fn check_open(&self, task: TaskId) -> Result<(), GraphError> {
        match self.tasks.get(&task) {
            None => Err(GraphError::UnknownTask(task)),
            Some(t) if t.is_closed() => Err(GraphError::TaskClosed(task)),
            Some(_) => Ok(()),
        }
    }

    fn link(&mut self, dependent: TaskId, depended_on: TaskId) -> Result<(), GraphError> {
        if dependent == depended_on || self.reaches(depended_on, dependent) {
            return Err(GraphError::Cycle {
                dependent,
                depended_on,
            });
        }
        if let Some(t) = self.tasks.get_mut(&dependent) {
            t.push_dependency(depended_on);
        }
        if let Some(t) = self.tasks.get_mut(&depended_on) {
            t.push_dependent(dependent);
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` by following dependency edges.
    fn reaches(&self, from: TaskId, to: TaskId) -> bool {
        let mut stack = vec![from];
        let mut seen = AHashSet::new();
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(task) = self.tasks.get(&id) {
                stack.extend(task.dependencies().iter().copied());
            }
        }
        false
    }
}

impl std::fmt::Debug for DrawingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawingManager")
            .field("dag", &self.dag)
            .field("reorder_blockers", &self.reorder_blockers)
            .field("active_ops_task", &self.active_ops_task)
            .field("abandoned", &self.abandoned)
            .finish()
    }
}

// The region closing `writer` would mark dirty on `proxy`.
fn dirty_on_close(writer: &RenderTask, proxy: &SurfaceProxy) -> Option<IRect> {
    let target = writer.target(0)?;
    if target.id() != proxy.id() {
        return None;
    }
    match writer.kind() {
        TaskKind::Ops(ops) => ops.would_dirty_target(target),
        TaskKind::Copy(copy) => Some(copy.dst_rect()),
        TaskKind::TextureResolve(_) => None,
    }
}

fn resolve_and_mipmap(device: &dyn GpuDevice, proxy: &SurfaceProxy) -> Result<(), DeviceError> {
    let Some(surface) = proxy.peek_surface() else {
        return Ok(());
    };
    if proxy.requires_manual_msaa_resolve() {
        if let Some(rt) = proxy.as_render_target() {
            if rt.is_msaa_dirty() {
                device.resolve_render_target(&surface, rt.msaa_dirty_rect())?;
                device.submit_to_gpu()?;
                rt.mark_msaa_resolved();
            }
        }
    }
    if let Some(tex) = proxy.as_texture() {
        if tex.mipmaps_are_dirty() {
            device.regenerate_mipmap_levels(&surface)?;
            tex.mark_mipmaps_clean();
        }
    }
    Ok(())
}
