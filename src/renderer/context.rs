use std::ffi::{c_void, CStr};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::config::RenderConfig;
use crate::renderer::resources::image::AllocatedImage;

pub const DEPTH_FORMAT: vk::Format = vk::Format::D16_UNORM;

/// Used when the surface reports `UNDEFINED`, i.e. it has no preference
const FALLBACK_COLOR_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Owns the Vulkan instance, device, presentation surface, swapchain, and
/// allocator. Built once at startup, torn down in reverse dependency order
/// when dropped.
pub struct GraphicsContext {
    pub window: Arc<Window>,

    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    pub physical_device: vk::PhysicalDevice,
    pub device: Arc<ash::Device>,
    pub queue: vk::Queue,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,

    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,
    pub swapchain_extent: vk::Extent2D,
    pub color_format: vk::Format,

    allocator: Option<Arc<Mutex<Allocator>>>,
    depth_image: Option<AllocatedImage>,
}

impl GraphicsContext {
    pub fn new(window: Arc<Window>, config: &RenderConfig) -> Result<Self> {
        let entry = ash::Entry::linked();

        let (instance, validation_enabled) = Self::create_instance(&entry, &window)?;
        let debug_utils = if validation_enabled {
            Some(Self::create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        // First enumerated device, no capability scoring. Multi-GPU systems
        // get whatever the loader lists first.
        let physical_device = unsafe { instance.enumerate_physical_devices()? }
            .into_iter()
            .next()
            .ok_or_eyre("No Vulkan physical device found")?;
        let device_name = unsafe {
            let props = instance.get_physical_device_properties(physical_device);
            props
                .device_name_as_c_str()
                .unwrap_or(c"unknown")
                .to_string_lossy()
                .into_owned()
        };
        log::info!("Using physical device: {device_name}");

        let device = Arc::new(Self::create_device(&instance, physical_device, config)?);
        let queue = unsafe { device.get_device_queue(config.queue_family_index, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let surface_formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let color_format = choose_color_format(&surface_formats);

        let surface_capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let swapchain_extent = swapchain_extent(&surface_capabilities, &window);

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(surface_capabilities.min_image_count)
            .image_format(color_format)
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(swapchain_extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(choose_pre_transform(&surface_capabilities))
            .composite_alpha(choose_composite_alpha(
                surface_capabilities.supported_composite_alpha,
            ))
            .present_mode(config.present_mode)
            .clipped(true);
        let swapchain = unsafe { swapchain_loader.create_swapchain(&swapchain_info, None)? };

        let swapchain_images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        let swapchain_image_views = swapchain_images
            .iter()
            .map(|image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(*image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(color_format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.create_image_view(&view_info, None) }
            })
            .collect::<ash::prelude::VkResult<Vec<vk::ImageView>>>()?;

        let depth_tiling = {
            let props = unsafe {
                instance.get_physical_device_format_properties(physical_device, DEPTH_FORMAT)
            };
            let attachment = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
            choose_depth_tiling(
                props.linear_tiling_features.contains(attachment),
                props.optimal_tiling_features.contains(attachment),
            )?
        };
        let depth_image = AllocatedImage::new_depth_image(
            DEPTH_FORMAT,
            swapchain_extent,
            depth_tiling,
            allocator.clone(),
            device.clone(),
        )?;

        Ok(Self {
            window,

            _entry: entry,
            instance,
            debug_utils,

            physical_device,
            device,
            queue,

            surface,
            surface_loader,

            swapchain,
            swapchain_loader,
            swapchain_images,
            swapchain_image_views,
            swapchain_extent,
            color_format,

            allocator: Some(allocator),
            depth_image: Some(depth_image),
        })
    }

    pub fn allocator(&self) -> Arc<Mutex<Allocator>> {
        self.allocator
            .as_ref()
            .expect("allocator lives until teardown")
            .clone()
    }

    pub fn depth_image_view(&self) -> vk::ImageView {
        self.depth_image
            .as_ref()
            .expect("depth image lives until teardown")
            .view
    }

    /// Load a pre-compiled SPIR-V blob. The file is read before any Vulkan
    /// call is made; blob contents are only validated by the driver.
    pub fn load_shader(&self, path: &Path) -> Result<vk::ShaderModule> {
        let words = read_spirv(path)?;
        let shader_module_info = vk::ShaderModuleCreateInfo::default().code(&words);
        let shader_module = unsafe {
            self.device
                .create_shader_module(&shader_module_info, None)?
        };
        Ok(shader_module)
    }

    fn create_instance(entry: &ash::Entry, window: &Window) -> Result<(ash::Instance, bool)> {
        let validation_enabled = Self::validation_layer_supported(entry)?;
        if !validation_enabled {
            log::warn!("{VALIDATION_LAYER:?} not available, running without validation");
        }

        let application_info = vk::ApplicationInfo::default().api_version(vk::API_VERSION_1_3);

        let enabled_layer_names = if validation_enabled {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        let mut enabled_extension_names = ash_window::enumerate_required_extensions(
            window.display_handle()?.as_raw(),
        )?
        .to_vec();
        if validation_enabled {
            enabled_extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);

        let instance = unsafe { entry.create_instance(&instance_info, None)? };
        Ok((instance, validation_enabled))
    }

    fn validation_layer_supported(entry: &ash::Entry) -> Result<bool> {
        let supported = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(supported
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .any(|name| name == VALIDATION_LAYER))
    }

    fn create_debug_utils_messenger(
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let debug_utils_info = debug_utils_messenger_create_info();
        let debug_utils_messenger = unsafe {
            debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
        };
        Ok((debug_utils_loader, debug_utils_messenger))
    }

    fn create_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        config: &RenderConfig,
    ) -> Result<ash::Device> {
        let queue_priorities = [config.queue_priority];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(config.queue_family_index)
            .queue_priorities(&queue_priorities)];

        let enabled_extension_names = [
            ash::khr::swapchain::NAME.as_ptr(),
            ash::khr::dynamic_rendering::NAME.as_ptr(),
        ];

        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true)
            .dynamic_rendering(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .push_next(&mut vulkan_13_features);

        Ok(unsafe { instance.create_device(physical_device, &device_info, None)? })
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        // Reverse dependency order: allocations before the allocator, the
        // allocator before the device.
        self.depth_image.take();
        self.allocator.take();

        unsafe {
            for view in self.swapchain_image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            // Swapchain images belong to the swapchain; destroying the
            // swapchain releases them.
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// The surface's first reported format wins; `UNDEFINED` means the surface
/// has no preference and the fixed fallback applies.
fn choose_color_format(formats: &[vk::SurfaceFormatKHR]) -> vk::Format {
    match formats.first() {
        Some(first) if first.format != vk::Format::UNDEFINED => first.format,
        _ => FALLBACK_COLOR_FORMAT,
    }
}

fn choose_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// First supported mode in a fixed preference order.
fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|mode| supported.contains(*mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Linear tiling wins when it can back a depth-stencil attachment, then
/// optimal; a format supporting neither cannot be used at all.
fn choose_depth_tiling(
    linear_supported: bool,
    optimal_supported: bool,
) -> Result<vk::ImageTiling> {
    if linear_supported {
        Ok(vk::ImageTiling::LINEAR)
    } else if optimal_supported {
        Ok(vk::ImageTiling::OPTIMAL)
    } else {
        Err(eyre!(
            "Depth-stencil attachment not supported for {DEPTH_FORMAT:?} in any tiling"
        ))
    }
}

fn swapchain_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window: &Window,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let window_size = window.inner_size();
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .wrap_err_with(|| format!("Failed to open shader file: {}", path.display()))?;
    let words = ash::util::read_spv(&mut Cursor::new(&bytes))
        .wrap_err_with(|| format!("Invalid SPIR-V blob: {}", path.display()))?;
    Ok(words)
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", msg_type, msg);
        }
        _ => {
            log::info!("{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn first_surface_format_wins() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_SRGB),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_color_format(&formats), vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn undefined_surface_format_falls_back_to_bgra() {
        let formats = [surface_format(vk::Format::UNDEFINED)];
        assert_eq!(choose_color_format(&formats), vk::Format::B8G8R8A8_UNORM);
        assert_eq!(choose_color_format(&[]), vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn identity_pre_transform_preferred_over_current() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY
                | vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );

        let caps = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );
    }

    #[test]
    fn composite_alpha_follows_preference_order() {
        let all = vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
            | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
            | vk::CompositeAlphaFlagsKHR::INHERIT
            | vk::CompositeAlphaFlagsKHR::OPAQUE;
        assert_eq!(
            choose_composite_alpha(all),
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(
                vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED | vk::CompositeAlphaFlagsKHR::OPAQUE
            ),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(
                vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::OPAQUE
            ),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        // Opaque is also the fallback for an empty mask
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::empty()),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn depth_tiling_is_pure_in_the_support_flags() {
        assert_eq!(
            choose_depth_tiling(true, true).unwrap(),
            vk::ImageTiling::LINEAR
        );
        assert_eq!(
            choose_depth_tiling(true, false).unwrap(),
            vk::ImageTiling::LINEAR
        );
        assert_eq!(
            choose_depth_tiling(false, true).unwrap(),
            vk::ImageTiling::OPTIMAL
        );
        assert!(choose_depth_tiling(false, false).is_err());
    }

    #[test]
    fn missing_shader_file_fails_before_any_gpu_call() {
        let err = read_spirv(Path::new("shaders-built/does-not-exist.spv"))
            .expect_err("reading a missing blob must fail");
        assert!(err.to_string().contains("does-not-exist"));
    }

    #[test]
    fn truncated_spirv_blob_is_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join("ember-truncated-shader.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23]).unwrap();
        assert!(read_spirv(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
