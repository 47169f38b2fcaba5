//! Per-frame renderer on top of the swapchain
//!
//! A two-state machine, idle or frame-in-progress:
//!
//! ```text
//! begin_frame ─► begin_swapchain_render_pass ─► (record draws)
//!             ─► end_swapchain_render_pass   ─► end_frame
//! ```
//!
//! `begin_frame` returns `None` when the swapchain had to be rebuilt and the
//! caller should skip rendering for this tick. Out-of-date and suboptimal
//! presentation, as well as resize events forwarded through
//! [`Renderer::handle_window_event`], are absorbed by recreating the swapchain.
//! Calling the frame methods out of order is reported as
//! [`VulkanError::ProtocolViolation`].

use super::context::GpuContext;
use super::error::{VulkanError, VulkanResult};
use super::frame::{AcquireOutcome, FrameBackend, FrameCounter, FramebufferSource, PresentChain, MAX_FRAMES_IN_FLIGHT};
use crate::render::window::WindowEvent;
use ash::vk;
use std::sync::Arc;

/// Renderer driving the real GPU context
pub type VulkanRenderer = Renderer<Arc<GpuContext>>;

/// Frame protocol state machine
pub struct Renderer<B: FrameBackend> {
    chain: B::Chain,
    backend: B,
    command_buffers: Vec<vk::CommandBuffer>,
    current_image_index: u32,
    frame: FrameCounter,
    frame_started: bool,
    framebuffer_resized: bool,
    recreation_count: u64,
}

impl<B: FrameBackend> Renderer<B> {
    /// Build the first swapchain for the window's current size and allocate one
    /// command buffer per frame in flight.
    ///
    /// Blocks while the window reports a zero-sized framebuffer.
    pub fn new(backend: B, window: &mut impl FramebufferSource) -> VulkanResult<Self> {
        let extent = wait_for_nonzero_extent(window);
        let chain = backend.create_chain(extent, None)?;
        let command_buffers = backend.allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)?;

        Ok(Self {
            chain,
            backend,
            command_buffers,
            current_image_index: 0,
            frame: FrameCounter::default(),
            frame_started: false,
            framebuffer_resized: false,
            recreation_count: 0,
        })
    }

    /// React to a window event; only resizes matter to the renderer
    pub fn handle_window_event(&mut self, event: &WindowEvent) {
        if let WindowEvent::FramebufferResized { width, height } = *event {
            log::debug!("Framebuffer resized to {}x{}", width, height);
            self.framebuffer_resized = true;
        }
    }

    /// Acquire the next image and begin recording.
    ///
    /// Returns `Ok(None)` when the swapchain was out of date and has been rebuilt.
    pub fn begin_frame(&mut self, window: &mut impl FramebufferSource) -> VulkanResult<Option<vk::CommandBuffer>> {
        if self.frame_started {
            return Err(VulkanError::protocol("Cannot begin a frame while another frame is in progress"));
        }

        match self.chain.acquire_next_image()? {
            AcquireOutcome::OutOfDate => {
                log::warn!("Swapchain out of date on acquire");
                self.recreate_swapchain(window)?;
                return Ok(None);
            }
            AcquireOutcome::Acquired { image_index, .. } => {
                self.current_image_index = image_index;
            }
        }

        let command_buffer = self.command_buffers[self.frame.index()];
        self.backend.begin_command_buffer(command_buffer)?;
        self.frame_started = true;
        Ok(Some(command_buffer))
    }

    /// Finish recording, submit and present.
    ///
    /// Rebuilds the swapchain when presentation reports it stale or a resize was
    /// flagged since the last frame.
    pub fn end_frame(&mut self, window: &mut impl FramebufferSource) -> VulkanResult<()> {
        let command_buffer = self
            .current_command_buffer()
            .map_err(|_| VulkanError::protocol("Cannot end a frame when no frame is in progress"))?;

        if let Err(e) = self.backend.end_command_buffer(command_buffer) {
            // Nothing was submitted, so the frame slot stays in step with the swapchain
            self.frame_started = false;
            return Err(e);
        }
        let outcome = self
            .chain
            .submit_command_buffers(command_buffer, self.current_image_index);

        self.frame_started = false;
        self.frame.advance();

        let outcome = outcome?;
        if outcome.needs_recreation() || self.framebuffer_resized {
            if outcome.needs_recreation() {
                log::warn!("Presentation reported {:?}", outcome);
            }
            self.framebuffer_resized = false;
            self.recreate_swapchain(window)?;
        }

        Ok(())
    }

    /// Begin the swapchain render pass on the current frame's command buffer
    pub fn begin_swapchain_render_pass(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.check_recording(command_buffer, "begin")?;

        let framebuffer = self.chain.framebuffer(self.current_image_index)?;
        self.backend
            .cmd_begin_render_pass(command_buffer, self.chain.render_pass(), framebuffer, self.chain.extent());
        Ok(())
    }

    /// End the swapchain render pass on the current frame's command buffer
    pub fn end_swapchain_render_pass(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.check_recording(command_buffer, "end")?;
        self.backend.cmd_end_render_pass(command_buffer);
        Ok(())
    }

    fn check_recording(&self, command_buffer: vk::CommandBuffer, action: &str) -> VulkanResult<()> {
        if !self.frame_started {
            return Err(VulkanError::protocol(format!(
                "Cannot {} the swapchain render pass when no frame is in progress",
                action
            )));
        }
        if command_buffer != self.current_command_buffer()? {
            return Err(VulkanError::protocol(format!(
                "Cannot {} the render pass on a command buffer from a different frame",
                action
            )));
        }
        Ok(())
    }

    /// Command buffer being recorded this frame
    pub fn current_command_buffer(&self) -> VulkanResult<vk::CommandBuffer> {
        if !self.frame_started {
            return Err(VulkanError::protocol(
                "The command buffer is only available while a frame is in progress",
            ));
        }
        Ok(self.command_buffers[self.frame.index()])
    }

    /// Frame-in-flight slot of the frame being recorded
    pub fn frame_index(&self) -> VulkanResult<usize> {
        if !self.frame_started {
            return Err(VulkanError::protocol("The frame index is only available while a frame is in progress"));
        }
        Ok(self.frame.index())
    }

    /// Whether `begin_frame` succeeded without a matching `end_frame` yet
    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_started
    }

    /// Render pass pipelines must be compatible with
    pub fn swapchain_render_pass(&self) -> vk::RenderPass {
        self.chain.render_pass()
    }

    /// Current swapchain size
    pub fn extent(&self) -> vk::Extent2D {
        self.chain.extent()
    }

    /// Width over height of the swapchain images
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.chain.extent();
        extent.width as f32 / extent.height as f32
    }

    /// How many times the swapchain has been rebuilt since construction
    pub fn recreation_count(&self) -> u64 {
        self.recreation_count
    }

    /// Active swapchain
    pub fn chain(&self) -> &B::Chain {
        &self.chain
    }

    fn recreate_swapchain(&mut self, window: &mut impl FramebufferSource) -> VulkanResult<()> {
        let extent = wait_for_nonzero_extent(window);
        self.backend.wait_idle()?;

        let chain = self.backend.create_chain(extent, Some(&self.chain))?;
        if !self.chain.compare_swap_formats(&chain) {
            return Err(VulkanError::FormatChanged {
                old_image: self.chain.image_format(),
                new_image: chain.image_format(),
                old_depth: self.chain.depth_format(),
                new_depth: chain.depth_format(),
            });
        }

        // Dropping the old chain waits for the device before tearing it down
        self.chain = chain;
        self.recreation_count += 1;

        log::info!(
            "Recreated swapchain at {}x{} (#{})",
            extent.width,
            extent.height,
            self.recreation_count
        );
        Ok(())
    }
}

impl<B: FrameBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to wait for device idle before freeing command buffers: {}", e);
        }
        self.backend.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();
    }
}

fn wait_for_nonzero_extent(window: &mut impl FramebufferSource) -> vk::Extent2D {
    let mut extent = window.framebuffer_extent();
    while extent.width == 0 || extent.height == 0 {
        window.wait_events();
        extent = window.framebuffer_extent();
    }
    extent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::frame::PresentOutcome;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    const START: vk::Extent2D = vk::Extent2D { width: 846, height: 484 };

    #[derive(Default)]
    struct BackendLog {
        chains_created: usize,
        presentations: usize,
        render_passes_begun: usize,
        render_passes_ended: usize,
        freed_command_buffers: usize,
        acquire_script: VecDeque<AcquireOutcome>,
        present_script: VecDeque<PresentOutcome>,
        next_image_format: Option<vk::Format>,
        last_submitted: Option<vk::CommandBuffer>,
        previous_chain_seen: Vec<bool>,
        failing_begin_recordings: usize,
        failing_end_recordings: usize,
    }

    struct MockChain {
        log: Rc<RefCell<BackendLog>>,
        extent: vk::Extent2D,
        image_format: vk::Format,
        image_count: u32,
        next_image: u32,
    }

    impl PresentChain for MockChain {
        fn acquire_next_image(&mut self) -> VulkanResult<AcquireOutcome> {
            if let Some(outcome) = self.log.borrow_mut().acquire_script.pop_front() {
                return Ok(outcome);
            }
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            })
        }

        fn submit_command_buffers(
            &mut self,
            command_buffer: vk::CommandBuffer,
            _image_index: u32,
        ) -> VulkanResult<PresentOutcome> {
            let mut log = self.log.borrow_mut();
            log.last_submitted = Some(command_buffer);
            let outcome = log.present_script.pop_front().unwrap_or(PresentOutcome::Presented);
            if outcome != PresentOutcome::OutOfDate {
                log.presentations += 1;
            }
            Ok(outcome)
        }

        fn render_pass(&self) -> vk::RenderPass {
            vk::RenderPass::from_raw(0xAA)
        }

        fn framebuffer(&self, image_index: u32) -> VulkanResult<vk::Framebuffer> {
            Ok(vk::Framebuffer::from_raw(0x100 + u64::from(image_index)))
        }

        fn extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn image_format(&self) -> vk::Format {
            self.image_format
        }

        fn depth_format(&self) -> vk::Format {
            vk::Format::D32_SFLOAT
        }

        fn image_count(&self) -> usize {
            self.image_count as usize
        }
    }

    struct MockBackend {
        log: Rc<RefCell<BackendLog>>,
    }

    impl FrameBackend for MockBackend {
        type Chain = MockChain;

        fn create_chain(&self, extent: vk::Extent2D, previous: Option<&MockChain>) -> VulkanResult<MockChain> {
            let mut log = self.log.borrow_mut();
            log.chains_created += 1;
            log.previous_chain_seen.push(previous.is_some());
            let image_format = log.next_image_format.unwrap_or(vk::Format::B8G8R8A8_SRGB);
            Ok(MockChain {
                log: Rc::clone(&self.log),
                extent,
                image_format,
                image_count: 3,
                next_image: 0,
            })
        }

        fn wait_idle(&self) -> VulkanResult<()> {
            Ok(())
        }

        fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
            Ok((0..u64::from(count)).map(|i| vk::CommandBuffer::from_raw(0x10 + i)).collect())
        }

        fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
            self.log.borrow_mut().freed_command_buffers += command_buffers.len();
        }

        fn begin_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
            let mut log = self.log.borrow_mut();
            if log.failing_begin_recordings > 0 {
                log.failing_begin_recordings -= 1;
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            Ok(())
        }

        fn end_command_buffer(&self, _command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
            let mut log = self.log.borrow_mut();
            if log.failing_end_recordings > 0 {
                log.failing_end_recordings -= 1;
                return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
            }
            Ok(())
        }

        fn cmd_begin_render_pass(
            &self,
            _command_buffer: vk::CommandBuffer,
            _render_pass: vk::RenderPass,
            _framebuffer: vk::Framebuffer,
            _extent: vk::Extent2D,
        ) {
            self.log.borrow_mut().render_passes_begun += 1;
        }

        fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {
            self.log.borrow_mut().render_passes_ended += 1;
        }
    }

    /// Window that reports zero size for a number of waits after being minimized
    struct MockWindow {
        extent: vk::Extent2D,
        restored_extent: vk::Extent2D,
        waits_until_restored: usize,
        wait_calls: usize,
    }

    impl MockWindow {
        fn new(extent: vk::Extent2D) -> Self {
            Self {
                extent,
                restored_extent: extent,
                waits_until_restored: 0,
                wait_calls: 0,
            }
        }

        fn minimize_then_restore(&mut self, waits: usize, restored: vk::Extent2D) {
            self.extent = vk::Extent2D { width: 0, height: 0 };
            self.restored_extent = restored;
            self.waits_until_restored = waits;
        }
    }

    impl FramebufferSource for MockWindow {
        fn framebuffer_extent(&self) -> vk::Extent2D {
            self.extent
        }

        fn wait_events(&mut self) {
            self.wait_calls += 1;
            if self.waits_until_restored > 0 {
                self.waits_until_restored -= 1;
                if self.waits_until_restored == 0 {
                    self.extent = self.restored_extent;
                }
            }
        }
    }

    fn setup() -> (Renderer<MockBackend>, MockWindow, Rc<RefCell<BackendLog>>) {
        let log = Rc::new(RefCell::new(BackendLog::default()));
        let mut window = MockWindow::new(START);
        let renderer = Renderer::new(MockBackend { log: Rc::clone(&log) }, &mut window).unwrap();
        (renderer, window, log)
    }

    fn run_frame(renderer: &mut Renderer<MockBackend>, window: &mut MockWindow) -> bool {
        let Some(command_buffer) = renderer.begin_frame(window).unwrap() else {
            return false;
        };
        renderer.begin_swapchain_render_pass(command_buffer).unwrap();
        renderer.end_swapchain_render_pass(command_buffer).unwrap();
        renderer.end_frame(window).unwrap();
        true
    }

    #[test]
    fn test_steady_frames_present_without_recreation() {
        let (mut renderer, mut window, log) = setup();

        for _ in 0..10 {
            assert!(run_frame(&mut renderer, &mut window));
        }

        assert_eq!(log.borrow().presentations, 10);
        assert_eq!(log.borrow().render_passes_begun, 10);
        assert_eq!(log.borrow().render_passes_ended, 10);
        assert_eq!(renderer.recreation_count(), 0);
        assert_eq!(log.borrow().chains_created, 1);
        assert_eq!(renderer.extent(), START);
    }

    #[test]
    fn test_minimized_resize_blocks_then_recreates_once() {
        let (mut renderer, mut window, log) = setup();
        for _ in 0..10 {
            run_frame(&mut renderer, &mut window);
        }

        let restored = vk::Extent2D {
            width: 1024,
            height: 600,
        };
        window.minimize_then_restore(3, restored);
        renderer.handle_window_event(&WindowEvent::FramebufferResized { width: 0, height: 0 });

        assert!(run_frame(&mut renderer, &mut window));
        assert_eq!(window.wait_calls, 3);
        assert_eq!(renderer.recreation_count(), 1);
        assert_eq!(renderer.extent(), restored);

        for _ in 0..5 {
            assert!(run_frame(&mut renderer, &mut window));
        }

        assert_eq!(renderer.recreation_count(), 1);
        assert_eq!(log.borrow().presentations, 16);
        assert_eq!(renderer.extent(), restored);
        // The replacement chain got the old one as a hint
        assert_eq!(log.borrow().previous_chain_seen, vec![false, true]);
    }

    #[test]
    fn test_out_of_date_acquire_skips_frame_and_recreates() {
        let (mut renderer, mut window, log) = setup();
        log.borrow_mut().acquire_script.push_back(AcquireOutcome::OutOfDate);

        assert_eq!(renderer.begin_frame(&mut window).unwrap(), None);
        assert!(!renderer.is_frame_in_progress());
        assert_eq!(renderer.recreation_count(), 1);

        assert!(run_frame(&mut renderer, &mut window));
    }

    #[test]
    fn test_suboptimal_acquire_still_renders() {
        let (mut renderer, mut window, log) = setup();
        log.borrow_mut().acquire_script.push_back(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        });

        assert!(run_frame(&mut renderer, &mut window));
        assert_eq!(renderer.recreation_count(), 0);
    }

    #[test]
    fn test_stale_presentation_recreates() {
        let (mut renderer, mut window, log) = setup();
        log.borrow_mut().present_script.push_back(PresentOutcome::Suboptimal);
        log.borrow_mut().present_script.push_back(PresentOutcome::OutOfDate);

        run_frame(&mut renderer, &mut window);
        assert_eq!(renderer.recreation_count(), 1);
        run_frame(&mut renderer, &mut window);
        assert_eq!(renderer.recreation_count(), 2);
        run_frame(&mut renderer, &mut window);
        assert_eq!(renderer.recreation_count(), 2);
    }

    #[test]
    fn test_resize_flag_is_consumed_once() {
        let (mut renderer, mut window, _log) = setup();
        renderer.handle_window_event(&WindowEvent::FramebufferResized { width: 846, height: 484 });
        renderer.handle_window_event(&WindowEvent::FramebufferResized { width: 846, height: 484 });

        run_frame(&mut renderer, &mut window);
        run_frame(&mut renderer, &mut window);

        assert_eq!(renderer.recreation_count(), 1);
    }

    #[test]
    fn test_other_events_are_ignored() {
        let (mut renderer, mut window, _log) = setup();
        renderer.handle_window_event(&WindowEvent::CloseRequested);
        run_frame(&mut renderer, &mut window);
        assert_eq!(renderer.recreation_count(), 0);
    }

    #[test]
    fn test_frame_index_cycles_with_period_max_frames() {
        let (mut renderer, mut window, _log) = setup();

        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        let start = renderer.frame_index().unwrap();
        assert_eq!(renderer.current_command_buffer().unwrap(), command_buffer);
        renderer.end_frame(&mut window).unwrap();

        let mut seen = vec![command_buffer];
        for _ in 1..MAX_FRAMES_IN_FLIGHT {
            seen.push(renderer.begin_frame(&mut window).unwrap().unwrap());
            renderer.end_frame(&mut window).unwrap();
        }

        renderer.begin_frame(&mut window).unwrap();
        assert_eq!(renderer.frame_index().unwrap(), start);
        renderer.end_frame(&mut window).unwrap();

        seen.dedup();
        assert_eq!(seen.len(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_protocol_violations_are_errors() {
        let (mut renderer, mut window, _log) = setup();

        assert!(matches!(
            renderer.end_frame(&mut window),
            Err(VulkanError::ProtocolViolation { .. })
        ));
        assert!(renderer.frame_index().is_err());
        assert!(renderer.current_command_buffer().is_err());

        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        assert!(matches!(
            renderer.begin_frame(&mut window),
            Err(VulkanError::ProtocolViolation { .. })
        ));

        let foreign = vk::CommandBuffer::from_raw(0xDEAD);
        assert!(renderer.begin_swapchain_render_pass(foreign).is_err());
        assert!(renderer.end_swapchain_render_pass(foreign).is_err());

        renderer.begin_swapchain_render_pass(command_buffer).unwrap();
        renderer.end_swapchain_render_pass(command_buffer).unwrap();
        renderer.end_frame(&mut window).unwrap();

        assert!(renderer.begin_swapchain_render_pass(command_buffer).is_err());
    }

    #[test]
    fn test_format_change_on_recreation_is_fatal() {
        let (mut renderer, mut window, log) = setup();
        log.borrow_mut().next_image_format = Some(vk::Format::R8G8B8A8_UNORM);
        renderer.handle_window_event(&WindowEvent::FramebufferResized { width: 846, height: 484 });

        renderer.begin_frame(&mut window).unwrap();
        let result = renderer.end_frame(&mut window);

        assert!(matches!(
            result,
            Err(VulkanError::FormatChanged {
                old_image: vk::Format::B8G8R8A8_SRGB,
                new_image: vk::Format::R8G8B8A8_UNORM,
                ..
            })
        ));
        assert_eq!(renderer.recreation_count(), 0);
    }

    #[test]
    fn test_submits_the_recorded_command_buffer() {
        let (mut renderer, mut window, log) = setup();
        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        renderer.end_frame(&mut window).unwrap();
        assert_eq!(log.borrow().last_submitted, Some(command_buffer));
    }

    #[test]
    fn test_drop_frees_command_buffers() {
        let (renderer, _window, log) = setup();
        drop(renderer);
        assert_eq!(log.borrow().freed_command_buffers, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_aspect_ratio_follows_extent() {
        let (renderer, _window, _log) = setup();
        assert!((renderer.aspect_ratio() - 846.0 / 484.0).abs() < f32::EPSILON);
        assert_eq!(renderer.swapchain_render_pass(), vk::RenderPass::from_raw(0xAA));
    }

    #[test]
    fn test_failed_end_recording_returns_to_idle() {
        let (mut renderer, mut window, log) = setup();
        log.borrow_mut().failing_end_recordings = 1;

        let command_buffer = renderer.begin_frame(&mut window).unwrap().unwrap();
        renderer.begin_swapchain_render_pass(command_buffer).unwrap();
        renderer.end_swapchain_render_pass(command_buffer).unwrap();

        assert!(matches!(
            renderer.end_frame(&mut window),
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert!(!renderer.is_frame_in_progress());
        assert_eq!(log.borrow().presentations, 0);

        assert!(run_frame(&mut renderer, &mut window));
        assert_eq!(log.borrow().presentations, 1);
    }

    #[test]
    fn test_failed_begin_recording_returns_to_idle() {
        let (mut renderer, mut window, log) = setup();
        log.borrow_mut().failing_begin_recordings = 1;

        assert!(matches!(
            renderer.begin_frame(&mut window),
            Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        ));
        assert!(!renderer.is_frame_in_progress());

        assert!(run_frame(&mut renderer, &mut window));
    }
}
