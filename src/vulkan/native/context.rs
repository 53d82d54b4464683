use std::ffi::{c_void, CStr};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{AccelerationStructure, RayTracingPipeline, Synchronization2};
use ash::vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

use crate::vulkan::error::DeviceError;

/// Raw Vulkan objects shared by the device and the swapchain.
pub struct VulkanContext {
    _entry: ash::Entry,
    pub instance: ash::Instance,
    debug_messenger: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub surface_loader: ash::extensions::khr::Surface,
    pub surface: vk::SurfaceKHR,

    pub context_raytracing: Option<ContextRaytracing>,
    pub synchronisation2_loader: Synchronization2,

    pub physical_device: vk::PhysicalDevice,
    pub device_name: String,
    pub graphics_family: u32,
    pub compute_family: u32,

    pub device: ash::Device,
}

pub struct ContextRaytracing {
    pub ray_tracing_pipeline: RayTracingPipeline,
    pub physical_device_ray_tracing_pipeline_properties_khr:
        vk::PhysicalDeviceRayTracingPipelinePropertiesKHR,

    pub acceleration_structure: AccelerationStructure,
    pub physical_device_acceleration_structure_properties_khr:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
}

// SAFETY: the property structs only carry a `p_next` raw pointer that is null
// once queried and never dereferenced; everything else is plain data or loaders.
unsafe impl Send for ContextRaytracing {}
unsafe impl Sync for ContextRaytracing {}

impl VulkanContext {
    pub fn new(window: &Window) -> Result<Self, DeviceError> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|err| DeviceError::Loading(err.to_string()))?;

        let debug_utils_available = unsafe { entry.enumerate_instance_extension_properties(None) }?
            .iter()
            .any(|property| {
                (unsafe { CStr::from_ptr(property.extension_name.as_ptr()) }) == DebugUtils::name()
            });

        let instance = {
            let mut extensions =
                ash_window::enumerate_required_extensions(window.raw_display_handle())?.to_vec();
            if debug_utils_available {
                extensions.push(DebugUtils::name().as_ptr());
            }

            let app_info = ApplicationInfo::builder().api_version(vk::API_VERSION_1_3);
            let create_info = InstanceCreateInfo::builder()
                .application_info(&app_info)
                .enabled_extension_names(&extensions);
            unsafe { entry.create_instance(&create_info, None) }?
        };

        let debug_messenger = if debug_utils_available {
            let loader = DebugUtils::new(&entry, &instance);
            let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }?;
            Some((loader, messenger))
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        let selection = find_physical_device(&instance, surface, &surface_loader)?;
        let device = create_logical_device(&instance, &selection)?;

        let synchronisation2_loader = Synchronization2::new(&instance, &device);

        let context_raytracing = selection.ray_tracing.then(|| ContextRaytracing {
            ray_tracing_pipeline: RayTracingPipeline::new(&instance, &device),
            physical_device_ray_tracing_pipeline_properties_khr: unsafe {
                RayTracingPipeline::get_properties(&instance, selection.physical_device)
            },
            acceleration_structure: AccelerationStructure::new(&instance, &device),
            physical_device_acceleration_structure_properties_khr: unsafe {
                AccelerationStructure::get_properties(&instance, selection.physical_device)
            },
        });

        let device_name = unsafe {
            let properties = instance.get_physical_device_properties(selection.physical_device);
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };
        log::info!(
            "Using {device_name}, graphics family {}, compute family {}, ray tracing {}",
            selection.graphics_family,
            selection.compute_family,
            selection.ray_tracing
        );

        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,

            surface,
            surface_loader,

            context_raytracing,
            synchronisation2_loader,

            physical_device: selection.physical_device,
            device_name,
            graphics_family: selection.graphics_family,
            compute_family: selection.compute_family,

            device,
        })
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };

        unsafe { self.surface_loader.destroy_surface(self.surface, None) };

        if let Some((loader, messenger)) = self.debug_messenger.take() {
            unsafe { loader.destroy_debug_utils_messenger(messenger, None) };
        }

        unsafe { self.instance.destroy_instance(None) };
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!(target: "vulkan", "[{message_type:?}] {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!(target: "vulkan", "[{message_type:?}] {message}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            log::debug!(target: "vulkan", "[{message_type:?}] {message}")
        }
        _ => log::trace!(target: "vulkan", "[{message_type:?}] {message}"),
    }
    vk::FALSE
}

struct PhysicalDeviceSelection {
    physical_device: vk::PhysicalDevice,
    graphics_family: u32,
    compute_family: u32,
    ray_tracing: bool,
}

fn ray_tracing_extensions() -> [&'static CStr; 3] {
    [
        AccelerationStructure::name(),
        RayTracingPipeline::name(),
        ash::extensions::khr::DeferredHostOperations::name(),
    ]
}

fn find_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::extensions::khr::Surface,
) -> Result<PhysicalDeviceSelection, DeviceError> {
    let swapchain_extension = ash::extensions::khr::Swapchain::name();
    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    physical_devices
        .into_iter()
        .filter_map(|pd| {
            let extension_properties =
                unsafe { instance.enumerate_device_extension_properties(pd) }.ok()?;
            let supported: Vec<&CStr> = extension_properties
                .iter()
                .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
                .collect();
            if !supported.contains(&swapchain_extension) {
                return None;
            }
            let ray_tracing = ray_tracing_extensions()
                .iter()
                .all(|extension| supported.contains(extension));

            let families = unsafe { instance.get_physical_device_queue_family_properties(pd) };
            let graphics_family = families.iter().enumerate().position(|(index, info)| {
                // Acquire barriers for compute results need compute stages on this queue too
                let supports_graphics = info
                    .queue_flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE);
                let supports_surface = unsafe {
                    surface_loader.get_physical_device_surface_support(pd, index as u32, surface)
                }
                .unwrap_or(false);
                supports_graphics && supports_surface
            })? as u32;
            // A dedicated compute family if there is one, otherwise share the graphics family
            let compute_family = families
                .iter()
                .position(|info| {
                    info.queue_flags.contains(vk::QueueFlags::COMPUTE)
                        && !info.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                })
                .map(|index| index as u32)
                .unwrap_or(graphics_family);

            Some(PhysicalDeviceSelection {
                physical_device: pd,
                graphics_family,
                compute_family,
                ray_tracing,
            })
        })
        .min_by_key(|selection| {
            let device_type =
                unsafe { instance.get_physical_device_properties(selection.physical_device) }
                    .device_type;

            match device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                vk::PhysicalDeviceType::CPU => 3,
                vk::PhysicalDeviceType::OTHER => 4,
                _ => 5,
            }
        })
        .ok_or(DeviceError::NoSuitableDevice)
}

fn create_logical_device(
    instance: &ash::Instance,
    selection: &PhysicalDeviceSelection,
) -> Result<ash::Device, DeviceError> {
    let mut device_extensions = vec![
        ash::extensions::khr::Swapchain::name().as_ptr(),
        Synchronization2::name().as_ptr(),
    ];
    if selection.ray_tracing {
        device_extensions.extend(ray_tracing_extensions().iter().map(|name| name.as_ptr()));
    }

    let queue_priorities = [1.0];
    let mut families = vec![selection.graphics_family];
    if selection.compute_family != selection.graphics_family {
        families.push(selection.compute_family);
    }
    let queue_create_infos: Vec<_> = families
        .iter()
        .map(|&family| {
            DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut physical_device_vulkan12_features = vk::PhysicalDeviceVulkan12Features {
        buffer_device_address: vk::TRUE,
        ..vk::PhysicalDeviceVulkan12Features::default()
    };

    let mut enabled_ray_tracing_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR {
            ray_tracing_pipeline: vk::TRUE,
            ..vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
        };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    let mut create_info = DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut physical_device_vulkan12_features);
    if selection.ray_tracing {
        create_info = create_info
            .push_next(&mut enabled_ray_tracing_pipeline_features)
            .push_next(&mut enabled_acceleration_structure_features);
    }

    Ok(unsafe { instance.create_device(selection.physical_device, &create_info, None) }?)
}
