// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Presentation surface
// - Physical device selection (last suitable discrete GPU)
// - Logical device + graphics/present queues

use super::capability::{self, QueueFamilyIndices};
use super::error::{RenderError, RenderResult, VkResultExt};
use super::surface::PresentationTarget;
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"mini-renderer";

/// Vulkan device wrapper, destroyed last
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Presentation
    pub surface: vk::SurfaceKHR,
    pub surface_loader: khr::Surface,
    pub swapchain_loader: khr::Swapchain,

    // Queue handles
    pub queue_families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    // Debug utils (if validation enabled)
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl VulkanDevice {
    /// Create the instance, surface and logical device
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `target` - Window the swapchain will present to
    /// * `enable_validation` - Enable Vulkan validation layers
    pub fn new(
        app_name: &str,
        target: &dyn PresentationTarget,
        enable_validation: bool,
    ) -> RenderResult<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }?;

        if enable_validation && !Self::validation_layer_available(&entry)? {
            return Err(RenderError::MissingValidationLayer(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ));
        }

        // Step 2: Create instance (+ debug messenger)
        let instance = Self::create_instance(&entry, app_name, target, enable_validation)?;
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 3: Surface
        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = target.create_surface(&entry, &instance)?;

        // Step 4: Pick physical device (GPU)
        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        // Step 5: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, queue_families)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };
        let swapchain_loader = khr::Swapchain::new(&instance, &device);

        // Step 6: Cache device properties
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            swapchain_loader,
            queue_families,
            graphics_queue,
            present_queue,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn validation_layer_available(entry: &Entry) -> RenderResult<bool> {
        let layers = entry
            .enumerate_instance_layer_properties()
            .vk_context("Failed to enumerate instance layers")?;

        Ok(layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER))
    }

    fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
        vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        target: &dyn PresentationTarget,
        enable_validation: bool,
    ) -> RenderResult<ash::Instance> {
        // Interior NULs cannot come from a sane config; drop them rather than fail
        let app_name_cstr = CString::new(app_name.replace('\0', "")).unwrap_or_default();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(0)
            .engine_name(ENGINE_NAME)
            .engine_version(0)
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = target.required_extensions()?;
        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        // Chained messenger covers vkCreateInstance/vkDestroyInstance themselves
        let mut debug_info = Self::debug_messenger_info();

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);
        if enable_validation {
            create_info = create_info.push_next(&mut debug_info);
        }

        unsafe { entry.create_instance(&create_info, None) }
            .vk_context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> RenderResult<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = Self::debug_messenger_info();

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .vk_context("Failed to set up debug messenger")?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> RenderResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .vk_context("Failed to enumerate physical devices")?;

        let candidates = devices
            .into_iter()
            .map(|device| capability::query_candidate(instance, surface_loader, surface, device))
            .collect::<RenderResult<Vec<_>>>()?;

        for candidate in &candidates {
            log::debug!(
                "GPU candidate {} ({:?}) suitable: {}",
                candidate.name,
                candidate.device_type,
                candidate.is_suitable()
            );
        }

        let picked = capability::select_device(&candidates).ok_or(RenderError::NoSuitableDevice)?;
        let queues = picked.queues.ok_or(RenderError::NoSuitableDevice)?;

        log::info!("Selected GPU: {}", picked.name);
        log::info!(
            "Queue families: graphics {}, present {}",
            queues.graphics,
            queues.present
        );

        Ok((picked.handle, queues))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queues: QueueFamilyIndices,
    ) -> RenderResult<ash::Device> {
        let queue_priorities = [1.0];

        // One request per distinct family
        let families: BTreeSet<u32> = [queues.graphics, queues.present].into_iter().collect();
        let queue_create_infos: Vec<_> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = capability::required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }
            .vk_context("Failed to create logical device")
    }

    pub fn memory_types(&self) -> &[vk::MemoryType] {
        &self.memory_properties.memory_types[..self.memory_properties.memory_type_count as usize]
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.vk_context("Failed to wait for device idle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
