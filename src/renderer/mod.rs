pub mod camera;
pub mod config;
pub mod context;
pub mod protocol;
pub mod resources;
pub mod shader_data;

mod pipeline;

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use winit::window::Window;

use crate::renderer::camera::Camera;
use crate::renderer::config::RenderConfig;
use crate::renderer::context::GraphicsContext;
use crate::renderer::protocol::{AcquiredImage, FrameOps, FrameOutcome};
use crate::renderer::resources::buffer::AllocatedBuffer;
use crate::renderer::shader_data::CameraData;

const VERT_SHADER_PATH: &str = "shaders-built/triangle.vert.spv";
const FRAG_SHADER_PATH: &str = "shaders-built/triangle.frag.spv";

/// Records and submits one frame at a time against the context's swapchain.
///
/// Single frame in flight: the command buffer is reset and re-recorded every
/// frame, and the fence gates the host until the previous frame's GPU work
/// has fully completed.
pub struct Renderer {
    camera: Camera,
    camera_buffer: AllocatedBuffer,

    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    shader_modules: [vk::ShaderModule; 2],

    // Signaled by acquire, waited on by the submit before color output.
    present_semaphore: vk::Semaphore,

    // Signaled by the submit, waited on by present.
    render_semaphore: vk::Semaphore,

    // Signaled when the frame's GPU work has fully completed. Created
    // signaled so the first frame's wait passes.
    render_fence: vk::Fence,

    config: RenderConfig,

    // Declared last: every object above is destroyed before the context.
    ctx: GraphicsContext,
}

impl Renderer {
    pub fn new(window: Arc<Window>, config: RenderConfig) -> Result<Self> {
        let ctx = GraphicsContext::new(window, &config)?;
        let device = ctx.device.clone();

        let command_pool = unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                .queue_family_index(config.queue_family_index);
            device.create_command_pool(&pool_info, None)?
        };
        let command_buffer = unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            device.allocate_command_buffers(&alloc_info)?[0]
        };

        let camera = Camera::new();
        let camera_buffer = AllocatedBuffer::new(
            std::mem::size_of::<CameraData>() as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            "Camera Uniform Buffer",
            gpu_allocator::MemoryLocation::CpuToGpu,
            ctx.allocator(),
            device.clone(),
        )?;

        let pipeline_layout = pipeline::create_pipeline_layout(&device)?;
        let vert_module = ctx.load_shader(Path::new(VERT_SHADER_PATH))?;
        let frag_module = ctx.load_shader(Path::new(FRAG_SHADER_PATH))?;
        let pipeline = pipeline::create_graphics_pipeline(
            &device,
            pipeline_layout,
            ctx.color_format,
            vert_module,
            frag_module,
        )?;

        let present_semaphore = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        let render_semaphore = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        let render_fence = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )?
        };

        Ok(Self {
            camera,
            camera_buffer,

            command_pool,
            command_buffer,

            pipeline_layout,
            pipeline,
            shader_modules: [vert_module, frag_module],

            present_semaphore,
            render_semaphore,
            render_fence,

            config,

            ctx,
        })
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Run one pass of the frame protocol.
    pub fn render(&mut self) -> Result<FrameOutcome> {
        protocol::render_frame(self)
    }
}

impl FrameOps for Renderer {
    fn wait_frame_fence(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.render_fence], true, self.config.gpu_timeout_ns)
                .wrap_err("Error while waiting for the frame fence")
        }
    }

    fn reset_frame_fence(&mut self) -> Result<()> {
        unsafe {
            self.ctx
                .device
                .reset_fences(&[self.render_fence])
                .wrap_err("Error while resetting the frame fence")
        }
    }

    fn acquire_image(&mut self) -> Result<AcquiredImage> {
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.ctx.swapchain,
                self.config.gpu_timeout_ns,
                self.present_semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::warn!("Swapchain is suboptimal for the surface");
                }
                Ok(AcquiredImage::Index(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date on acquire, skipping frame");
                Ok(AcquiredImage::OutOfDate)
            }
            Err(err) => Err(err).wrap_err("Failed to acquire swapchain image"),
        }
    }

    fn record_commands(&mut self, image_index: u32) -> Result<()> {
        // The frame fence has signaled by this point, so the previous
        // frame's GPU work can no longer read the uniform buffer.
        let camera_data = [self.camera.as_shader_data()];
        self.camera_buffer.write(&camera_data, 0)?;

        let device = &self.ctx.device;
        let cmd = self.command_buffer;
        let extent = self.ctx.swapchain_extent;
        let image = self.ctx.swapchain_images[image_index as usize];

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )?;

            // Presented/undefined layout to color attachment, gated on the
            // color output stage where the acquire semaphore is waited.
            let to_color_attachment = vk::ImageMemoryBarrier2::default()
                .dst_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .dst_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .image(image)
                .subresource_range(color_subresource_range());
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default()
                    .image_memory_barriers(std::slice::from_ref(&to_color_attachment)),
            );

            let color_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(self.ctx.swapchain_image_views[image_index as usize])
                .image_layout(vk::ImageLayout::ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: self.config.clear_color,
                    },
                });
            let depth_attachment = vk::RenderingAttachmentInfo::default()
                .image_view(self.ctx.depth_image_view())
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                });
            let rendering_info = vk::RenderingInfo::default()
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                })
                .layer_count(1)
                .color_attachments(std::slice::from_ref(&color_attachment))
                .depth_attachment(&depth_attachment)
                .stencil_attachment(&depth_attachment);

            device.cmd_begin_rendering(cmd, &rendering_info);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_set_viewport(
                cmd,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D::default(),
                    extent,
                }],
            );
            // One hard-coded triangle; no vertex buffer is bound
            device.cmd_draw(cmd, 3, 1, 0, 0);
            device.cmd_end_rendering(cmd);

            let to_present = vk::ImageMemoryBarrier2::default()
                .src_stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
                .src_access_mask(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .image(image)
                .subresource_range(color_subresource_range());
            device.cmd_pipeline_barrier2(
                cmd,
                &vk::DependencyInfo::default()
                    .image_memory_barriers(std::slice::from_ref(&to_present)),
            );

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }

    fn submit_commands(&mut self) -> Result<()> {
        let wait_semaphores = [self.present_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.command_buffer];
        let signal_semaphores = [self.render_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.queue, &[submit_info], self.render_fence)
                .wrap_err("Failed to submit frame commands")
        }
    }

    fn present_image(&mut self, image_index: u32) -> Result<FrameOutcome> {
        let wait_semaphores = [self.render_semaphore];
        let swapchains = [self.ctx.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.queue, &present_info)
        };
        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    log::warn!("Swapchain is suboptimal after present");
                }
                Ok(FrameOutcome::Presented)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::warn!("Swapchain out of date on present");
                Ok(FrameOutcome::OutOfDate)
            }
            Err(err) => Err(err).wrap_err("Failed to present swapchain image"),
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            let _ = device.device_wait_idle();
            device.destroy_fence(self.render_fence, None);
            device.destroy_semaphore(self.render_semaphore, None);
            device.destroy_semaphore(self.present_semaphore, None);
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            for module in self.shader_modules {
                device.destroy_shader_module(module, None);
            }
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
