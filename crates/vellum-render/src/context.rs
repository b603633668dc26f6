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

//! The entry point tying proxies, the task graph and the device together.

use crate::error::GraphError;
use crate::manager::{DrawingManager, FlushStats};
use crate::ops::{FillRectOp, ProcessorAnalysis, TextureOp};
use crate::proxy::{ProxyProvider, SurfaceProxy};
use crate::task::TaskId;
use std::rc::Rc;
use vellum_core::{
    ContextOptions, FlushError, GpuDevice, IPoint, IRect, Mipmapped, Rect, ResourceProvider,
    SingleOwner,
};

/// One recording context: a proxy provider and a drawing manager sharing a resource
/// provider and a device.
///
/// Every entry point claims the context's [`SingleOwner`] for its duration.
pub struct DirectContext {
    single_owner: SingleOwner,
    options: ContextOptions,
    resource_provider: Rc<dyn ResourceProvider>,
    device: Rc<dyn GpuDevice>,
    proxy_provider: ProxyProvider,
    drawing_manager: DrawingManager,
}

impl DirectContext {
    /// Creates a context over `resource_provider` and `device`.
    pub fn new(
        resource_provider: Rc<dyn ResourceProvider>,
        device: Rc<dyn GpuDevice>,
        options: ContextOptions,
    ) -> Self {
        log::info!(
            "Creating context {} (task merging {})",
            resource_provider.context_id().0,
            if options.reduce_ops_task_splitting { "on" } else { "off" }
        );
        Self {
            single_owner: SingleOwner::new(),
            proxy_provider: ProxyProvider::new(resource_provider.clone()),
            drawing_manager: DrawingManager::new(
                resource_provider.clone(),
                device.clone(),
                options.clone(),
            ),
            options,
            resource_provider,
            device,
        }
    }

    /// The options the context was created with.
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// The factory for surface proxies.
    pub fn proxy_provider(&self) -> &ProxyProvider {
        &self.proxy_provider
    }

    /// The render-task graph.
    pub fn drawing_manager(&self) -> &DrawingManager {
        &self.drawing_manager
    }

    /// Mutable access to the render-task graph, for callers recording their own tasks.
    pub fn drawing_manager_mut(&mut self) -> &mut DrawingManager {
        &mut self.drawing_manager
    }

    /// Totals over every flush of this context.
    pub fn stats(&self) -> &FlushStats {
        self.drawing_manager.stats()
    }

    /// Fills `rect` of `target` with `color`.
    /// ## Errors
    /// * `GraphError` - If the target cannot be drawn into.
    pub fn fill_rect(
        &mut self,
        target: &Rc<SurfaceProxy>,
        rect: Rect,
        color: [f32; 4],
    ) -> Result<TaskId, GraphError> {
        let _guard = self.single_owner.enter();
        let task = self.drawing_manager.get_or_create_ops_task(target)?;
        self.drawing_manager.add_draw_op(
            task,
            Box::new(FillRectOp::new(rect, color, true)),
            ProcessorAnalysis::default(),
            None,
        )?;
        Ok(task)
    }

    /// Draws `texture` into `dst` of `target`.
    /// ## Errors
    /// * `GraphError` - If the target cannot be drawn into, or the read would make the graph
    ///   cyclic.
    pub fn draw_texture(
        &mut self,
        target: &Rc<SurfaceProxy>,
        texture: &Rc<SurfaceProxy>,
        dst: Rect,
        mipmapped: Mipmapped,
    ) -> Result<TaskId, GraphError> {
        let _guard = self.single_owner.enter();
        let task = self.drawing_manager.get_or_create_ops_task(target)?;
        self.drawing_manager.add_draw_op(
            task,
            Box::new(TextureOp::new(texture.clone(), dst, mipmapped)),
            ProcessorAnalysis::default(),
            None,
        )?;
        Ok(task)
    }

    /// Clears all of `target` to `color`.
    /// ## Errors
    /// * `GraphError` - If the target cannot be drawn into.
    pub fn clear(&mut self, target: &Rc<SurfaceProxy>, color: [f32; 4]) -> Result<TaskId, GraphError> {
        let _guard = self.single_owner.enter();
        self.drawing_manager.clear(target, color)
    }

    /// Copies `src_rect` of `src` into `dst` at `dst_point`.
    /// ## Errors
    /// * `GraphError::InvalidCopy` - If the copy is out of bounds or the proxies alias.
    pub fn copy(
        &mut self,
        src: &Rc<SurfaceProxy>,
        src_rect: IRect,
        dst: &Rc<SurfaceProxy>,
        dst_point: IPoint,
    ) -> Result<TaskId, GraphError> {
        let _guard = self.single_owner.enter();
        self.drawing_manager
            .new_copy_task(src.clone(), src_rect, dst.clone(), dst_point)
    }

    /// Executes all recorded work.
    /// ## Errors
    /// See [`DrawingManager::flush`].
    pub fn flush(&mut self) -> Result<(), FlushError> {
        let _guard = self.single_owner.enter();
        self.drawing_manager.flush(&[])
    }

    /// Executes the recorded work touching `proxies` and leaves them resolved.
    /// ## Errors
    /// See [`DrawingManager::flush_surfaces`].
    pub fn flush_surfaces(&mut self, proxies: &[Rc<SurfaceProxy>]) -> Result<(), FlushError> {
        let _guard = self.single_owner.enter();
        self.drawing_manager.flush_surfaces(proxies)
    }

    /// Asks the device to submit everything it has queued.
    /// ## Errors
    /// * `FlushError::Device` - If the device rejects the submission.
    pub fn submit(&self) -> Result<(), FlushError> {
        let _guard = self.single_owner.enter();
        self.device.submit_to_gpu().map_err(FlushError::Device)
    }

    /// Flushes all recorded work, then submits it.
    /// ## Errors
    /// The first error of the flush or the submission.
    pub fn flush_and_submit(&mut self) -> Result<(), FlushError> {
        self.flush()?;
        self.submit()
    }

    /// Takes back surfaces returned from other threads, then purges the cache down to its
    /// budget.
    pub fn perform_deferred_cleanup(&self) {
        let _guard = self.single_owner.enter();
        let cache = self.resource_provider.cache();
        let returned = cache.process_returned_surfaces();
        if returned > 0 {
            log::debug!("Received {returned} surfaces from other threads");
        }
        cache.purge_as_needed();
    }

    /// Stops all work: factories fail and flushes are refused from now on.
    pub fn abandon(&mut self) {
        let _guard = self.single_owner.enter();
        self.proxy_provider.abandon();
        self.drawing_manager.abandon();
    }

    /// Returns `true` once the context was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.proxy_provider.is_abandoned() || self.drawing_manager.is_abandoned()
    }
}

impl Drop for DirectContext {
    fn drop(&mut self) {
        if self.drawing_manager.num_tasks() > 0 && !self.is_abandoned() {
            log::warn!(
                "Context dropped with {} unflushed tasks",
                self.drawing_manager.num_tasks()
            );
        }
        self.proxy_provider.remove_all_unique_keys();
    }
}

impl std::fmt::Debug for DirectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectContext")
            .field("context", &self.resource_provider.context_id())
            .field("drawing_manager", &self.drawing_manager)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{
        Backend, BackendFormat, BackingFit, Budgeted, Caps, ISize, Protected, Renderable,
        SurfaceDescriptor, TextureFormat,
    };
    use vellum_infra::{DeviceEvent, HeadlessResourceProvider, RecordingDevice};

    fn context() -> (DirectContext, Rc<RecordingDevice>) {
        let options = ContextOptions::default();
        let device = Rc::new(RecordingDevice::new());
        let provider = Rc::new(HeadlessResourceProvider::new(Caps::default(), &options));
        (DirectContext::new(provider, device.clone(), options), device)
    }

    fn target(ctx: &DirectContext) -> Rc<SurfaceProxy> {
        ctx.proxy_provider()
            .create_proxy(&SurfaceDescriptor {
                dimensions: ISize::new(32, 32),
                format: BackendFormat::new(Backend::Mock, TextureFormat::Rgba8Unorm),
                renderable: Renderable::Yes,
                sample_count: 1,
                mipmapped: Mipmapped::No,
                budgeted: Budgeted::Yes,
                protected: Protected::No,
                fit: BackingFit::Exact,
                label: "ctx".into(),
            })
            .unwrap()
    }

    #[test]
    fn draws_into_the_same_target_share_a_task() {
        let (mut ctx, _) = context();
        let rt = target(&ctx);
        let a = ctx.fill_rect(&rt, Rect::from_ltrb(0.0, 0.0, 4.0, 4.0), [1.0; 4]).unwrap();
        let b = ctx.fill_rect(&rt, Rect::from_ltrb(8.0, 8.0, 12.0, 12.0), [1.0; 4]).unwrap();
        assert_eq!(a, b);
        assert_eq!(ctx.drawing_manager().num_tasks(), 1);
    }

    #[test]
    fn flush_and_submit_ends_with_a_gpu_submit() {
        let (mut ctx, device) = context();
        let rt = target(&ctx);
        ctx.fill_rect(&rt, Rect::from_ltrb(0.0, 0.0, 4.0, 4.0), [1.0; 4]).unwrap();
        ctx.flush_and_submit().unwrap();
        assert_eq!(device.events().last(), Some(&DeviceEvent::SubmitToGpu));
        assert_eq!(ctx.stats().tasks_executed, 1);
        assert!(rt.is_instantiated());
    }

    #[test]
    fn abandoned_context_refuses_work() {
        let (mut ctx, _) = context();
        let rt = target(&ctx);
        ctx.abandon();
        assert!(ctx.is_abandoned());
        assert!(ctx.flush().is_err());
        assert_eq!(
            ctx.fill_rect(&rt, Rect::from_ltrb(0.0, 0.0, 1.0, 1.0), [1.0; 4]),
            Err(GraphError::Abandoned)
        );
    }
}
