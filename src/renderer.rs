// =============================================================================
// RENDERER - Owns every GPU object and draws one frame at a time
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for the frame slot's fence (its previous submission is done)
// 2. Acquire a swapchain image
// 3. Update the slot's uniform buffer
// 4. Re-record and submit the slot's command buffer
// 5. Present, rebuilding the swapchain when it no longer matches the window
//
// Field order matters for Drop: fields drop top to bottom, and everything
// above `device` still needs it.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::HasRawDisplayHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::buffer::{Buffer, UniformBuffers};
use crate::backend::command::CommandPools;
use crate::backend::descriptor::{DescriptorSetLayout, DescriptorSets};
use crate::backend::image::{Image, Texture};
use crate::backend::pipeline::{self, GraphicsPipeline, RenderPass};
use crate::backend::sync::{self, FrameCounter, FrameSync};
use crate::backend::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;
use crate::mesh::Mesh;
use crate::texture::TextureData;
use crate::uniform::UniformBufferObject;

pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SWAPCHAIN-SIZED RESOURCES (rebuilt on resize)
    // ─────────────────────────────────────────────────────────────────────────
    targets: SwapchainTargets,
    swapchain: Swapchain,

    // ─────────────────────────────────────────────────────────────────────────
    // PER-FRAME RESOURCES
    // ─────────────────────────────────────────────────────────────────────────
    frame_sync: Vec<FrameSync>,
    command_buffers: Vec<vk::CommandBuffer>,
    descriptor_sets: DescriptorSets,
    uniforms: UniformBuffers,

    // ─────────────────────────────────────────────────────────────────────────
    // SCENE
    // ─────────────────────────────────────────────────────────────────────────
    index_buffer: Buffer,
    vertex_buffer: Buffer,
    index_count: u32,
    // Only referenced through the descriptor sets
    _texture: Texture,

    // ─────────────────────────────────────────────────────────────────────────
    // PIPELINE
    // ─────────────────────────────────────────────────────────────────────────
    commands: CommandPools,
    pipeline: GraphicsPipeline,
    descriptor_layout: DescriptorSetLayout,
    render_pass: RenderPass,

    // ─────────────────────────────────────────────────────────────────────────
    // VULKAN CORE
    // ─────────────────────────────────────────────────────────────────────────
    device: Arc<VulkanDevice>,
    surface: Surface,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE
    // ─────────────────────────────────────────────────────────────────────────
    frames: FrameCounter,
    /// Set on window resize; the swapchain is rebuilt after the next present
    framebuffer_resized: bool,
    clear_color: [f32; 4],
    present_mode: vk::PresentModeKHR,
    vertex_shader: PathBuf,
    fragment_shader: PathBuf,
    start_time: Instant,
    wait_stages: [vk::PipelineStageFlags; 1],
}

impl Renderer {
    /// Run the whole creation sequence for `window`
    pub fn new(window: &Window, config: &Config, mesh: &Mesh, texture: &TextureData) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Instance, surface, device
        // ─────────────────────────────────────────────────────────────────────
        // Validation layers only in debug builds, and only if the config wants them
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let instance = VulkanInstance::new(
            &config.window.title,
            window.raw_display_handle(),
            enable_validation,
        )?;
        log::info!("Validation layers: {}", instance.validation_enabled());
        let surface = Surface::new(Arc::clone(&instance), window)?;
        let device = VulkanDevice::new(instance, &surface, config.graphics.msaa_samples)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Swapchain
        // ─────────────────────────────────────────────────────────────────────
        let present_mode = config.present_mode();
        let size = window.inner_size();
        let swapchain = Swapchain::new(
            Arc::clone(&device),
            &surface,
            size.width,
            size.height,
            present_mode,
            vk::SwapchainKHR::null(),
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Render pass, descriptor layout, pipeline
        // ─────────────────────────────────────────────────────────────────────
        let samples = device.msaa_samples;
        let render_pass = RenderPass::new(
            Arc::clone(&device),
            swapchain.format,
            device.depth_format()?,
            samples,
        )?;

        let descriptor_layout = DescriptorSetLayout::new(Arc::clone(&device))?;
        let graphics_pipeline = GraphicsPipeline::new(
            Arc::clone(&device),
            render_pass.render_pass,
            descriptor_layout.layout,
            &config.assets.vertex_shader,
            &config.assets.fragment_shader,
            samples,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Commands, render targets, framebuffers
        // ─────────────────────────────────────────────────────────────────────
        let commands = CommandPools::new(Arc::clone(&device))?;
        let targets = SwapchainTargets::new(&device, &commands, &swapchain, render_pass.render_pass)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Scene data
        // ─────────────────────────────────────────────────────────────────────
        let texture = Texture::upload(&device, &commands, texture)?;

        let vertex_buffer = Buffer::device_local_with_data(
            &device,
            &commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
            "vertex",
        )?;
        let index_buffer = Buffer::device_local_with_data(
            &device,
            &commands,
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
            "index",
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Per-frame uniforms, descriptors, command buffers, sync
        // ─────────────────────────────────────────────────────────────────────
        let frames = config.frames_in_flight();

        let uniforms = UniformBuffers::new(&device, frames)?;
        let descriptor_sets = DescriptorSets::new(
            Arc::clone(&device),
            &descriptor_layout,
            &uniforms,
            &texture,
            frames,
        )?;
        let command_buffers = commands.allocate_primary(frames as u32)?;

        let frame_sync = (0..frames)
            .map(|_| FrameSync::new(&device.device))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Created sync objects for {} frames in flight, {} swapchain images",
            frames,
            swapchain.image_count()
        );
        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            targets,
            swapchain,
            frame_sync,
            command_buffers,
            descriptor_sets,
            uniforms,
            index_buffer,
            vertex_buffer,
            index_count: mesh.indices.len() as u32,
            _texture: texture,
            commands,
            pipeline: graphics_pipeline,
            descriptor_layout,
            render_pass,
            device,
            surface,
            frames: FrameCounter::new(frames),
            framebuffer_resized: false,
            clear_color: config.graphics.clear_color,
            present_mode,
            vertex_shader: config.assets.vertex_shader.clone(),
            fragment_shader: config.assets.fragment_shader.clone(),
            start_time: Instant::now(),
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        })
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.swapchain.present_mode
    }

    /// The window changed size; rebuild after the next present
    pub fn mark_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    // =========================================================================
    // RENDER LOOP
    // =========================================================================

    /// Render a single frame. Returns false when nothing was presented
    /// (minimized window, swapchain rebuilt mid-frame).
    pub fn draw_frame(&mut self, window_size: PhysicalSize<u32>) -> Result<bool> {
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(false);
        }

        // Only happens if a rebuild never completed; try again before
        // acquiring anything
        if !self.targets.matches(self.swapchain.image_count()) {
            self.recreate_swapchain(window_size)?;
            return Ok(false);
        }

        let frame = self.frames.current();
        let image_available = self.frame_sync[frame].image_available;
        let in_flight_fence = self.frame_sync[frame].in_flight_fence;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous submission has finished
        // ─────────────────────────────────────────────────────────────────────
        unsafe {
            self.device
                .device
                .wait_for_fences(&[in_flight_fence], true, u64::MAX)
        }
        .context("Failed to wait for frame fence")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let (image_index, suboptimal) =
            match self.swapchain.acquire_next_image(u64::MAX, image_available)? {
                Some(acquired) => acquired,
                None => {
                    self.recreate_swapchain(window_size)?;
                    return Ok(false);
                }
            };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Update uniforms for this slot
        // ─────────────────────────────────────────────────────────────────────
        let elapsed = self.start_time.elapsed().as_secs_f32();
        self.uniforms
            .update(frame, &UniformBufferObject::at(elapsed, self.swapchain.extent))?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Record and submit
        // ─────────────────────────────────────────────────────────────────────
        let framebuffer = *self
            .targets
            .framebuffers
            .get(image_index as usize)
            .context("No framebuffer for swapchain image")?;
        let render_finished = *self
            .targets
            .render_finished
            .get(image_index as usize)
            .context("No render-finished semaphore for swapchain image")?;

        let cmd = self.command_buffers[frame];
        self.record_command_buffer(cmd, framebuffer, frame)?;

        // Only reset once we know work will be submitted, or the next wait
        // on this fence would never return
        unsafe { self.device.device.reset_fences(&[in_flight_fence]) }
            .context("Failed to reset frame fence")?;

        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&self.wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                in_flight_fence, // Signal this fence when GPU is done
            )
        }
        .context("Failed to submit draw command buffer")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Present
        // ─────────────────────────────────────────────────────────────────────
        let out_of_date = self.swapchain.present(
            self.device.present_queue,
            image_index,
            &signal_semaphores,
        )?;

        self.frames.advance();

        if suboptimal || out_of_date || self.framebuffer_resized {
            self.recreate_swapchain(window_size)?;
        }

        Ok(true)
    }

    fn record_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        frame: usize,
    ) -> Result<()> {
        let device = &self.device.device;
        let extent = self.swapchain.extent;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;

            let begin_info = vk::CommandBufferBeginInfo::builder();
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            let clear_values = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.clear_color,
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];

            let render_area = vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent,
            };

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

            let viewport = vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.descriptor_sets.sets[frame]],
                &[],
            );

            device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);

            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .context("Failed to record command buffer")?;
        }

        Ok(())
    }

    // =========================================================================
    // SWAPCHAIN RECREATION
    // =========================================================================

    /// Rebuild everything sized by the swapchain. Does nothing while the
    /// window has no area; the resize flag stays set until it succeeds.
    ///
    /// The new objects are only swapped in once all of them exist. On error
    /// the previous set stays, and the retired swapchain reports out of date
    /// on the next acquire, which lands back here.
    pub fn recreate_swapchain(&mut self, window_size: PhysicalSize<u32>) -> Result<()> {
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(());
        }

        // Wait for GPU to finish all work before destroying resources
        self.device.wait_idle()?;

        let swapchain = Swapchain::new(
            Arc::clone(&self.device),
            &self.surface,
            window_size.width,
            window_size.height,
            self.present_mode,
            self.swapchain.swapchain,
        )?;

        // The render pass (and the pipeline built against it) is tied to the
        // colour format
        let rebuilt = if swapchain.format != self.render_pass.color_format {
            log::warn!(
                "Swapchain format changed from {:?} to {:?}, rebuilding render pass",
                self.render_pass.color_format,
                swapchain.format
            );
            let render_pass = RenderPass::new(
                Arc::clone(&self.device),
                swapchain.format,
                self.device.depth_format()?,
                self.device.msaa_samples,
            )?;
            let pipeline = GraphicsPipeline::new(
                Arc::clone(&self.device),
                render_pass.render_pass,
                self.descriptor_layout.layout,
                &self.vertex_shader,
                &self.fragment_shader,
                self.device.msaa_samples,
            )?;
            Some((render_pass, pipeline))
        } else {
            None
        };

        let render_pass = rebuilt
            .as_ref()
            .map_or(self.render_pass.render_pass, |(render_pass, _)| render_pass.render_pass);
        let targets = SwapchainTargets::new(&self.device, &self.commands, &swapchain, render_pass)?;

        // Old targets go before the old swapchain whose views they use
        self.targets = targets;
        self.swapchain = swapchain;
        if let Some((render_pass, pipeline)) = rebuilt {
            self.pipeline = pipeline;
            self.render_pass = render_pass;
        }

        self.framebuffer_resized = false;
        log::info!(
            "Recreated swapchain: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }

    // =========================================================================
    // SHADER HOT RELOAD
    // =========================================================================

    /// Rebuild the pipeline from the shader files on disk. On failure the
    /// current pipeline stays in use. Returns whether the pipeline changed.
    pub fn reload_pipeline(&mut self) -> bool {
        if let Err(e) = self.device.wait_idle() {
            log::error!("Shader reload skipped: {:#}", e);
            return false;
        }

        match GraphicsPipeline::new(
            Arc::clone(&self.device),
            self.render_pass.render_pass,
            self.descriptor_layout.layout,
            &self.vertex_shader,
            &self.fragment_shader,
            self.device.msaa_samples,
        ) {
            Ok(pipeline) => {
                self.pipeline = pipeline;
                log::info!("Reloaded shaders");
                true
            }
            Err(e) => {
                log::error!("Shader reload failed, keeping previous pipeline: {:#}", e);
                false
            }
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything
        let _ = self.device.wait_idle();

        // Raw handles first; owned wrappers follow in field order
        for sync in &self.frame_sync {
            sync.destroy(&self.device.device);
        }
    }
}

// =============================================================================
// SWAPCHAIN-SIZED TARGETS
// =============================================================================

/// Render targets, framebuffers and render-finished semaphores for one
/// swapchain. Built as a unit so a failed rebuild never leaves a partial set.
struct SwapchainTargets {
    framebuffers: Vec<vk::Framebuffer>,
    /// One per swapchain image
    render_finished: Vec<vk::Semaphore>,
    color_target: Option<Image>,
    depth_target: Image,
    device: Arc<VulkanDevice>,
}

impl SwapchainTargets {
    fn new(
        device: &Arc<VulkanDevice>,
        commands: &CommandPools,
        swapchain: &Swapchain,
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        let samples = device.msaa_samples;
        let color_target = if samples == vk::SampleCountFlags::TYPE_1 {
            None
        } else {
            Some(Image::color_target(
                device,
                swapchain.extent,
                swapchain.format,
                samples,
            )?)
        };
        let depth_target = Image::depth_target(device, commands, swapchain.extent, samples)?;

        // From here on Drop takes care of whatever has been created
        let mut targets = Self {
            framebuffers: Vec::new(),
            render_finished: Vec::new(),
            color_target,
            depth_target,
            device: Arc::clone(device),
        };

        targets.framebuffers = pipeline::create_framebuffers(
            device,
            render_pass,
            &swapchain.image_views,
            targets.depth_target.view,
            targets.color_target.as_ref().map(|target| target.view),
            swapchain.extent,
        )?;

        for _ in 0..swapchain.image_count() {
            targets
                .render_finished
                .push(sync::create_semaphore(&device.device)?);
        }

        Ok(targets)
    }

    fn matches(&self, image_count: usize) -> bool {
        targets_match(self.framebuffers.len(), self.render_finished.len(), image_count)
    }
}

impl Drop for SwapchainTargets {
    fn drop(&mut self) {
        pipeline::destroy_framebuffers(&self.device, &self.framebuffers);
        for &semaphore in &self.render_finished {
            unsafe { self.device.device.destroy_semaphore(semaphore, None) };
        }
    }
}

/// Every swapchain image needs its own framebuffer and render-finished
/// semaphore before a frame can be drawn into it
fn targets_match(framebuffers: usize, semaphores: usize, images: usize) -> bool {
    images > 0 && framebuffers == images && semaphores == images
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_targets_match_the_swapchain() {
        assert!(targets_match(3, 3, 3));
    }

    #[test]
    fn missing_framebuffers_force_a_rebuild() {
        assert!(!targets_match(0, 3, 3));
    }

    #[test]
    fn missing_semaphores_force_a_rebuild() {
        assert!(!targets_match(3, 0, 3));
    }

    #[test]
    fn targets_from_an_older_swapchain_force_a_rebuild() {
        assert!(!targets_match(2, 2, 3));
    }
}
